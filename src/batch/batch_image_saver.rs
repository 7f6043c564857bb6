//! 批量图片保存
//!
//! 与批量加载节点配合, 按原文件名保存处理后的图片

use std::path::{Path, PathBuf};

use candle_core::Device;
use image::DynamicImage;
use log::{error, info, warn};
use pyo3::{
    exceptions::PyRuntimeError,
    pyclass, pymethods,
    types::{PyAnyMethods, PyDict, PyDictMethods, PyList, PyListMethods, PyType},
    Bound, Py, PyAny, PyErr, PyResult, Python,
};
use serde_json::Value;

use crate::{
    core::{
        category::CATEGORY_BATCH,
        utils::{
            image::tensor_to_images,
            save::{
                construct_filename, fallback_base_name, handle_existing_file, normalize_file_type,
                resolve_output_directory, save_with_format, OutputFormat, OverwriteMode,
                TextChunk,
            },
        },
    },
    error::Error,
    wrapper::{
        comfy::folder_paths::FolderPaths,
        comfyui::{
            types::{NODE_BOOLEAN, NODE_IMAGE, NODE_INT, NODE_STRING},
            PromptServer,
        },
        torch::tensor::TensorWrapper,
    },
};

/// 保存参数
#[derive(Debug, Clone)]
struct SaveOptions {
    quality: u8,
    overwrite_mode: OverwriteMode,
    output_directory: String,
    output_base_name: String,
    output_file_type: String,
    filename_prefix: String,
    filename_suffix: String,
}

/// 已保存的文件
#[derive(Debug, Clone, PartialEq, Eq)]
struct SavedImage {
    filename: String,
    path: PathBuf,
    subfolder: String,
}

/// 批量图片保存
#[pyclass(subclass)]
pub struct BatchImageSaver {
    device: Device,
}

impl PromptServer for BatchImageSaver {}

#[pymethods]
impl BatchImageSaver {
    #[new]
    fn new() -> Self {
        Self {
            device: Device::Cpu,
        }
    }

    // 输出节点
    #[classattr]
    #[pyo3(name = "OUTPUT_NODE")]
    fn output_node() -> bool {
        true
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() -> (&'static str, &'static str, &'static str) {
        (NODE_IMAGE, NODE_STRING, NODE_STRING)
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (&'static str, &'static str, &'static str) {
        ("OUTPUT_IMAGE", "SAVED_FILENAME", "SAVED_PATH")
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_BATCH;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Save processed images with configurable naming, format and overwrite policy."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "save_image";

    #[classmethod]
    #[pyo3(name = "INPUT_TYPES")]
    fn input_types(_cls: &Bound<'_, PyType>) -> PyResult<Py<PyDict>> {
        Python::with_gil(|py| {
            let dict = PyDict::new(py);
            dict.set_item("required", {
                let required = PyDict::new(py);
                required.set_item("image", (NODE_IMAGE, { PyDict::new(py) }))?;
                required.set_item(
                    "quality",
                    (NODE_INT, {
                        let quality = PyDict::new(py);
                        quality.set_item("default", 100)?;
                        quality.set_item("min", 1)?;
                        quality.set_item("max", 100)?;
                        quality.set_item("step", 1)?;
                        quality.set_item(
                            "tooltip",
                            "Quality for JPG (1-100), PNG and WebP are lossless",
                        )?;
                        quality
                    }),
                )?;
                required.set_item(
                    "overwrite_mode",
                    (OverwriteMode::choices(), {
                        let overwrite_mode = PyDict::new(py);
                        overwrite_mode.set_item("default", OverwriteMode::Overwrite.to_string())?;
                        overwrite_mode
                            .set_item("tooltip", "What to do when the output file already exists")?;
                        overwrite_mode
                    }),
                )?;
                required
            })?;

            dict.set_item("optional", {
                let optional = PyDict::new(py);
                optional.set_item(
                    "output_directory",
                    (NODE_STRING, {
                        let output_directory = PyDict::new(py);
                        output_directory.set_item("default", "")?;
                        output_directory.set_item(
                            "tooltip",
                            "Absolute path, or a folder name inside the ComfyUI output directory",
                        )?;
                        output_directory
                    }),
                )?;
                optional.set_item(
                    "output_base_name",
                    (NODE_STRING, {
                        let output_base_name = PyDict::new(py);
                        output_base_name.set_item("default", "")?;
                        output_base_name.set_item(
                            "tooltip",
                            "File name without extension, usually from the loader",
                        )?;
                        output_base_name
                    }),
                )?;
                optional.set_item(
                    "output_file_type",
                    (NODE_STRING, {
                        let output_file_type = PyDict::new(py);
                        output_file_type.set_item("default", "png")?;
                        output_file_type.set_item("tooltip", "png, jpg, jpeg or webp")?;
                        output_file_type
                    }),
                )?;
                optional.set_item(
                    "filename_prefix",
                    (NODE_STRING, {
                        let filename_prefix = PyDict::new(py);
                        filename_prefix.set_item("default", "")?;
                        filename_prefix.set_item("tooltip", "The prefix of the saved file name")?;
                        filename_prefix
                    }),
                )?;
                optional.set_item(
                    "filename_suffix",
                    (NODE_STRING, {
                        let filename_suffix = PyDict::new(py);
                        filename_suffix.set_item("default", "")?;
                        filename_suffix.set_item("tooltip", "The suffix of the saved file name")?;
                        filename_suffix
                    }),
                )?;
                optional.set_item(
                    "save_workflow",
                    (NODE_BOOLEAN, {
                        let save_workflow = PyDict::new(py);
                        save_workflow.set_item("default", true)?;
                        save_workflow.set_item("label_on", "enabled")?;
                        save_workflow.set_item("label_off", "disabled")?;
                        save_workflow.set_item("tooltip", "Embed the workflow in saved PNG files")?;
                        save_workflow
                    }),
                )?;
                optional
            })?;

            dict.set_item("hidden", {
                let hidden = PyDict::new(py);
                hidden.set_item("prompt", "PROMPT")?;
                hidden.set_item("extra_pnginfo", "EXTRA_PNGINFO")?;
                hidden
            })?;

            Ok(dict.into())
        })
    }

    #[allow(clippy::too_many_arguments)]
    #[pyo3(
        name = "save_image",
        signature = (
            image,
            quality = 100,
            overwrite_mode = "Overwrite",
            output_directory = "",
            output_base_name = "",
            output_file_type = "png",
            filename_prefix = "",
            filename_suffix = "",
            save_workflow = true,
            prompt = None,
            extra_pnginfo = None
        )
    )]
    fn save_image<'py>(
        &mut self,
        py: Python<'py>,
        image: Bound<'py, PyAny>,
        quality: u8,
        overwrite_mode: &str,
        output_directory: &str,
        output_base_name: &str,
        output_file_type: &str,
        filename_prefix: &str,
        filename_suffix: &str,
        save_workflow: bool,
        prompt: Option<Bound<'py, PyDict>>,
        extra_pnginfo: Option<Bound<'py, PyDict>>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let results = overwrite_mode
            .parse::<OverwriteMode>()
            .map_err(|e| Error::ParseEnumString(e.to_string()))
            .and_then(|overwrite_mode| {
                let options = SaveOptions {
                    quality,
                    overwrite_mode,
                    output_directory: output_directory.to_string(),
                    output_base_name: output_base_name.to_string(),
                    output_file_type: output_file_type.to_string(),
                    filename_prefix: filename_prefix.to_string(),
                    filename_suffix: filename_suffix.to_string(),
                };
                self.execute(
                    py,
                    &image,
                    &options,
                    save_workflow,
                    prompt.as_ref(),
                    extra_pnginfo.as_ref(),
                )
            });

        match results {
            Ok(v) => self.node_result(py, image, v),
            Err(e) => {
                error!("BatchImageSaver error, {e}");
                if let Err(e) = self.send_error(py, "BatchImageSaver".to_string(), e.to_string()) {
                    error!("send error failed, {e}");
                    return Err(PyErr::new::<PyRuntimeError, _>(e.to_string()));
                };
                Err(PyErr::new::<PyRuntimeError, _>(e.to_string()))
            }
        }
    }
}

impl BatchImageSaver {
    fn execute<'py>(
        &self,
        py: Python<'py>,
        image: &Bound<'py, PyAny>,
        options: &SaveOptions,
        save_workflow: bool,
        prompt: Option<&Bound<'py, PyDict>>,
        extra_pnginfo: Option<&Bound<'py, PyDict>>,
    ) -> Result<Option<SavedImage>, Error> {
        let metadata = if save_workflow {
            Self::workflow_metadata(prompt, extra_pnginfo)?
        } else {
            Vec::new()
        };

        // HWC -> 1HWC
        let tensor = TensorWrapper::<f32>::new(image, &self.device)?.into_tensor();
        let tensor = match tensor.rank() {
            3 => tensor.unsqueeze(0)?,
            _ => tensor,
        };
        let images = tensor_to_images(&tensor)?;
        let Some(first) = images.first() else {
            return Err(Error::InvalidTensorShape("empty image batch".to_string()));
        };
        if images.len() > 1 {
            warn!("received {} images, only the first one is saved", images.len());
        }

        let folder_paths = FolderPaths::from_host(py);
        Self::save(first, options, &folder_paths, &metadata)
    }

    /// 组合为前端需要的数据结构
    ///
    /// 输入图片原样输出, 跳过保存时文件名与路径为空字符串
    fn node_result<'py>(
        &self,
        py: Python<'py>,
        image: Bound<'py, PyAny>,
        saved: Option<SavedImage>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let images = PyList::empty(py);
        let (filename, path) = match saved {
            Some(saved) => {
                let item = PyDict::new(py);
                item.set_item("filename", &saved.filename)?;
                item.set_item("subfolder", &saved.subfolder)?;
                item.set_item("type", "output")?;
                images.append(item)?;
                (saved.filename, saved.path.to_string_lossy().to_string())
            }
            None => (String::new(), String::new()),
        };

        let ui = PyDict::new(py);
        ui.set_item("images", images)?;

        let dict = PyDict::new(py);
        dict.set_item("ui", ui)?;
        dict.set_item("result", (image, filename, path))?;
        Ok(dict)
    }

    /// 保存单张图片
    ///
    /// 跳过模式下文件已存在时返回 None
    fn save(
        image: &DynamicImage,
        options: &SaveOptions,
        folder_paths: &FolderPaths,
        metadata: &[TextChunk],
    ) -> Result<Option<SavedImage>, Error> {
        let extension = normalize_file_type(&options.output_file_type);
        let format = OutputFormat::from_file_type(&extension);

        let base_name = match options.output_base_name.trim() {
            "" => fallback_base_name(),
            v => v.to_string(),
        };

        let output_dir =
            resolve_output_directory(&options.output_directory, folder_paths.output_directory())?;
        let filename = construct_filename(
            &base_name,
            &options.filename_prefix,
            &options.filename_suffix,
            &extension,
        );

        let (path, should_save) =
            handle_existing_file(&output_dir.join(&filename), options.overwrite_mode)?;
        if !should_save {
            return Ok(None);
        }

        save_with_format(image, &path, format, options.quality, metadata)?;
        info!("saved image: {}", path.display());

        Ok(Some(SavedImage {
            filename: Self::file_name(&path),
            subfolder: folder_paths.subfolder_of(&path),
            path,
        }))
    }

    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// 工作流文本块
    ///
    /// prompt 与 extra_pnginfo 中的每一项各写入一个文本块
    fn workflow_metadata(
        prompt: Option<&Bound<'_, PyDict>>,
        extra_pnginfo: Option<&Bound<'_, PyDict>>,
    ) -> Result<Vec<TextChunk>, Error> {
        let mut results = Vec::new();

        if let Some(prompt) = prompt {
            let prompt: Value = pythonize::depythonize(prompt.as_any())?;
            results.push(TextChunk {
                keyword: "prompt".to_string(),
                text: prompt.to_string(),
            });
        }

        if let Some(extra_pnginfo) = extra_pnginfo {
            for (key, value) in extra_pnginfo.iter() {
                let keyword: String = key.extract()?;
                let text: Value = pythonize::depythonize(&value)?;
                results.push(TextChunk {
                    keyword,
                    text: text.to_string(),
                });
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::{GenericImageView, ImageBuffer, ImageFormat, Rgb, RgbImage};

    use super::*;

    fn red_image() -> DynamicImage {
        let img: RgbImage = ImageBuffer::from_pixel(10, 10, Rgb([255, 0, 0]));
        DynamicImage::ImageRgb8(img)
    }

    fn options(dir: &Path, base_name: &str, file_type: &str, mode: OverwriteMode) -> SaveOptions {
        SaveOptions {
            quality: 100,
            overwrite_mode: mode,
            output_directory: dir.to_string_lossy().to_string(),
            output_base_name: base_name.to_string(),
            output_file_type: file_type.to_string(),
            filename_prefix: String::new(),
            filename_suffix: String::new(),
        }
    }

    #[test]
    fn test_save_png() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let options = options(dir.path(), "test_image", "png", OverwriteMode::Overwrite);

        let saved = BatchImageSaver::save(&red_image(), &options, &FolderPaths::default(), &[])?;
        let saved = saved.expect("image should be saved");
        assert_eq!(saved.filename, "test_image.png");
        assert_eq!(saved.path, dir.path().join("test_image.png"));
        assert_eq!(saved.subfolder, "");

        let loaded = image::open(&saved.path)?;
        assert_eq!(loaded.dimensions(), (10, 10));
        Ok(())
    }

    #[test]
    fn test_save_keeps_jpeg_extension() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let options = options(dir.path(), "photo", "JPEG", OverwriteMode::Overwrite);

        let saved = BatchImageSaver::save(&red_image(), &options, &FolderPaths::default(), &[])?;
        let saved = saved.expect("image should be saved");
        assert_eq!(saved.filename, "photo.jpeg");
        assert_eq!(
            image::ImageReader::open(&saved.path)?.with_guessed_format()?.format(),
            Some(ImageFormat::Jpeg)
        );
        Ok(())
    }

    #[test]
    fn test_save_unknown_type_as_png() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let options = options(dir.path(), "photo", "", OverwriteMode::Overwrite);

        let saved = BatchImageSaver::save(&red_image(), &options, &FolderPaths::default(), &[])?;
        assert_eq!(saved.map(|v| v.filename), Some("photo.png".to_string()));
        Ok(())
    }

    #[test]
    fn test_save_prefix_suffix() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut options = options(dir.path(), "photo", "webp", OverwriteMode::Overwrite);
        options.filename_prefix = "upscaled_".to_string();
        options.filename_suffix = "_2x".to_string();

        let saved = BatchImageSaver::save(&red_image(), &options, &FolderPaths::default(), &[])?;
        assert_eq!(
            saved.map(|v| v.filename),
            Some("upscaled_photo_2x.webp".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_skip_existing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("existing.png"), b"keep")?;
        let options = options(dir.path(), "existing", "png", OverwriteMode::Skip);

        let saved = BatchImageSaver::save(&red_image(), &options, &FolderPaths::default(), &[])?;
        assert!(saved.is_none());
        assert_eq!(fs::read(dir.path().join("existing.png"))?, b"keep");
        Ok(())
    }

    #[test]
    fn test_rename_existing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("photo.png"), b"keep")?;
        let options = options(dir.path(), "photo", "png", OverwriteMode::Rename);

        let saved = BatchImageSaver::save(&red_image(), &options, &FolderPaths::default(), &[])?;
        let saved = saved.expect("image should be saved");
        assert_eq!(saved.filename, "photo_1.png");
        assert_eq!(saved.path, dir.path().join("photo_1.png"));
        Ok(())
    }

    #[test]
    fn test_fallback_base_name_when_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let options = options(dir.path(), "  ", "png", OverwriteMode::Overwrite);

        let saved = BatchImageSaver::save(&red_image(), &options, &FolderPaths::default(), &[])?;
        let saved = saved.expect("image should be saved");
        assert!(saved.filename.starts_with("output_"));
        assert!(saved.filename.ends_with(".png"));
        Ok(())
    }

    #[test]
    fn test_relative_directory_under_output() -> anyhow::Result<()> {
        let output = tempfile::tempdir()?;
        let folder_paths = FolderPaths::with_output_directory(output.path());
        let mut options = options(output.path(), "photo", "png", OverwriteMode::Overwrite);
        options.output_directory = "images".to_string();

        let saved = BatchImageSaver::save(&red_image(), &options, &folder_paths, &[])?;
        let saved = saved.expect("image should be saved");
        assert_eq!(saved.path, output.path().join("images").join("photo.png"));
        assert_eq!(saved.subfolder, "images");
        Ok(())
    }

    fn workflow_dicts(py: Python<'_>) -> PyResult<(Bound<'_, PyDict>, Bound<'_, PyDict>)> {
        let inputs = PyDict::new(py);
        inputs.set_item("directory", "/data")?;
        let node = PyDict::new(py);
        node.set_item("class_type", "BatchImageLoader")?;
        node.set_item("inputs", inputs)?;
        let prompt = PyDict::new(py);
        prompt.set_item("3", node)?;

        let workflow = PyDict::new(py);
        workflow.set_item("nodes", PyList::empty(py))?;
        let extra_pnginfo = PyDict::new(py);
        extra_pnginfo.set_item("workflow", workflow)?;
        Ok((prompt, extra_pnginfo))
    }

    #[test]
    fn test_workflow_metadata() -> anyhow::Result<()> {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| -> anyhow::Result<()> {
            let (prompt, extra_pnginfo) = workflow_dicts(py)?;

            let chunks = BatchImageSaver::workflow_metadata(Some(&prompt), Some(&extra_pnginfo))?;
            assert_eq!(chunks.len(), 2);
            assert_eq!(chunks[0].keyword, "prompt");
            assert_eq!(
                serde_json::from_str::<Value>(&chunks[0].text)?,
                serde_json::json!({
                    "3": {"class_type": "BatchImageLoader", "inputs": {"directory": "/data"}}
                })
            );
            assert_eq!(chunks[1].keyword, "workflow");
            assert_eq!(
                serde_json::from_str::<Value>(&chunks[1].text)?,
                serde_json::json!({"nodes": []})
            );

            assert!(BatchImageSaver::workflow_metadata(None, None)?.is_empty());
            Ok(())
        })
    }

    #[test]
    fn test_save_embeds_workflow() -> anyhow::Result<()> {
        pyo3::prepare_freethreaded_python();
        let dir = tempfile::tempdir()?;
        let options = options(dir.path(), "photo", "png", OverwriteMode::Overwrite);

        let metadata = Python::with_gil(|py| -> anyhow::Result<Vec<TextChunk>> {
            let (prompt, extra_pnginfo) = workflow_dicts(py)?;
            Ok(BatchImageSaver::workflow_metadata(
                Some(&prompt),
                Some(&extra_pnginfo),
            )?)
        })?;

        let folder_paths = FolderPaths::default();
        let saved = BatchImageSaver::save(&red_image(), &options, &folder_paths, &metadata)?;
        let saved = saved.expect("image should be saved");

        let decoder = png::Decoder::new(fs::File::open(&saved.path)?);
        let reader = decoder.read_info()?;
        let keywords: Vec<&str> = reader
            .info()
            .utf8_text
            .iter()
            .map(|chunk| chunk.keyword.as_str())
            .collect();
        assert_eq!(keywords, ["prompt", "workflow"]);
        Ok(())
    }

    #[test]
    fn test_node_result_skipped() -> anyhow::Result<()> {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| -> anyhow::Result<()> {
            let saver = BatchImageSaver::new();
            let image = pyo3::types::PyString::new(py, "image tensor").into_any();

            let result = saver.node_result(py, image.clone(), None)?;
            let ui = result
                .get_item("ui")?
                .ok_or_else(|| anyhow::anyhow!("missing ui"))?;
            assert_eq!(ui.get_item("images")?.len()?, 0);

            let (output, filename, path): (Bound<'_, PyAny>, String, String) = result
                .get_item("result")?
                .ok_or_else(|| anyhow::anyhow!("missing result"))?
                .extract()?;
            assert_eq!(output.as_ptr(), image.as_ptr());
            assert_eq!((filename.as_str(), path.as_str()), ("", ""));
            Ok(())
        })
    }

    #[test]
    fn test_node_result_saved() -> anyhow::Result<()> {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| -> anyhow::Result<()> {
            let saver = BatchImageSaver::new();
            let image = pyo3::types::PyString::new(py, "image tensor").into_any();
            let saved = SavedImage {
                filename: "photo.png".to_string(),
                path: PathBuf::from("/output/images/photo.png"),
                subfolder: "images".to_string(),
            };

            let result = saver.node_result(py, image, Some(saved))?;
            let ui = result
                .get_item("ui")?
                .ok_or_else(|| anyhow::anyhow!("missing ui"))?;
            let item = ui.get_item("images")?.get_item(0)?;
            assert_eq!(item.get_item("filename")?.extract::<String>()?, "photo.png");
            assert_eq!(item.get_item("subfolder")?.extract::<String>()?, "images");
            assert_eq!(item.get_item("type")?.extract::<String>()?, "output");

            let (_, filename, path): (Bound<'_, PyAny>, String, String) = result
                .get_item("result")?
                .ok_or_else(|| anyhow::anyhow!("missing result"))?
                .extract()?;
            assert_eq!(filename, "photo.png");
            assert_eq!(path, "/output/images/photo.png");
            Ok(())
        })
    }
}
