//! 批量图片加载
//!
//! 每次执行只加载目录中的一张图片, 索引保存在全局迭代状态中。
//! 批次未结束时自动请求下一次执行, 结束时停止自动排队。

use std::path::Path;

use candle_core::Device;
use image::DynamicImage;
use log::{debug, error, info, warn};
use pyo3::{
    exceptions::PyRuntimeError,
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, IntoPyObjectExt, Py, PyAny, PyErr, PyResult, Python,
};
use strum_macros::{Display, EnumString};

use crate::{
    core::{
        category::CATEGORY_BATCH,
        iteration_state::{iteration_store, IterationStatus, IterationStore},
        utils::{
            directory::{
                directory_name, filter_files_by_patterns, normalize_path, pattern_for_preset,
                FilterPreset, DEFAULT_IMAGE_PATTERN,
            },
            image::{image_to_tensor, load_image},
            sorting::natural_sort,
        },
    },
    error::Error,
    wrapper::{
        comfyui::{
            queue_control::{should_continue, stop_auto_queue, trigger_next_queue},
            types::{NODE_BOOLEAN, NODE_IMAGE, NODE_INT, NODE_START_INDEX_MAX, NODE_STRING},
            PromptServer,
        },
        torch::tensor::TensorWrapper,
    },
};

/// 迭代模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum IterationMode {
    /// 从上次的位置继续
    #[strum(to_string = "Continue")]
    Continue,
    /// 从头开始
    #[strum(to_string = "Reset")]
    Reset,
}

/// 图片加载失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum ErrorHandling {
    #[strum(to_string = "Stop on error")]
    StopOnError,
    #[strum(to_string = "Skip on error")]
    SkipOnError,
}

/// 单次加载的结果
#[derive(Debug)]
struct LoadedImage {
    image: DynamicImage,
    index: usize,
    filename: String,
    /// 跳过失败文件时越过了批次末尾
    wrapped: bool,
}

/// 单次执行的输出
#[derive(Debug, Clone, PartialEq, Eq)]
struct LoadOutput {
    input_directory: String,
    base_name: String,
    file_type: String,
    filename: String,
    index: usize,
    total_count: usize,
    status: IterationStatus,
    batch_complete: bool,
}

/// 批量图片加载
#[pyclass(subclass)]
pub struct BatchImageLoader {
    device: Device,
}

impl PromptServer for BatchImageLoader {}

#[pymethods]
impl BatchImageLoader {
    #[new]
    fn new() -> Self {
        Self {
            device: Device::Cpu,
        }
    }

    // 返回参数类型
    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() -> (
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
    ) {
        (
            NODE_IMAGE,
            NODE_STRING,
            NODE_STRING,
            NODE_STRING,
            NODE_STRING,
            NODE_INT,
            NODE_INT,
            NODE_STRING,
            NODE_BOOLEAN,
        )
    }

    // 返回参数名称
    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
    ) {
        (
            "IMAGE",
            "INPUT_DIRECTORY",
            "INPUT_BASE_NAME",
            "INPUT_FILE_TYPE",
            "FILENAME",
            "INDEX",
            "TOTAL_COUNT",
            "STATUS",
            "BATCH_COMPLETE",
        )
    }

    #[classattr]
    #[pyo3(name = "OUTPUT_NODE")]
    fn output_node() -> bool {
        false
    }

    // 节点分类
    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_BATCH;

    // 节点描述, 可选
    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Load images from a directory one at a time, advancing on every queue run."
    }

    // 执行方法名称
    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "load_image";

    #[classmethod]
    #[pyo3(name = "INPUT_TYPES")]
    fn input_types(_cls: &Bound<'_, PyType>) -> PyResult<Py<PyDict>> {
        Python::with_gil(|py| {
            let dict = PyDict::new(py);
            dict.set_item("required", {
                let required = PyDict::new(py);
                required.set_item(
                    "directory",
                    (NODE_STRING, {
                        let directory = PyDict::new(py);
                        directory.set_item("default", "")?;
                        directory.set_item("multiline", false)?;
                        directory.set_item("tooltip", "Path to directory containing images")?;
                        directory
                    }),
                )?;
                required.set_item(
                    "filter_preset",
                    (FilterPreset::choices(), {
                        let filter_preset = PyDict::new(py);
                        filter_preset.set_item("default", FilterPreset::AllImages.to_string())?;
                        filter_preset
                    }),
                )?;
                required.set_item(
                    "iteration_mode",
                    (
                        vec![
                            IterationMode::Continue.to_string(),
                            IterationMode::Reset.to_string(),
                        ],
                        {
                            let iteration_mode = PyDict::new(py);
                            iteration_mode
                                .set_item("default", IterationMode::Continue.to_string())?;
                            iteration_mode.set_item(
                                "tooltip",
                                "Continue = resume from current position, Reset = start fresh",
                            )?;
                            iteration_mode
                        },
                    ),
                )?;
                required.set_item(
                    "error_handling",
                    (
                        vec![
                            ErrorHandling::StopOnError.to_string(),
                            ErrorHandling::SkipOnError.to_string(),
                        ],
                        {
                            let error_handling = PyDict::new(py);
                            error_handling
                                .set_item("default", ErrorHandling::StopOnError.to_string())?;
                            error_handling
                                .set_item("tooltip", "How to handle images that fail to load")?;
                            error_handling
                        },
                    ),
                )?;
                required
            })?;

            dict.set_item("optional", {
                let optional = PyDict::new(py);
                optional.set_item(
                    "custom_pattern",
                    (NODE_STRING, {
                        let custom_pattern = PyDict::new(py);
                        custom_pattern.set_item("default", DEFAULT_IMAGE_PATTERN)?;
                        custom_pattern.set_item(
                            "tooltip",
                            "Comma-separated glob patterns (used when filter_preset is Custom)",
                        )?;
                        custom_pattern
                    }),
                )?;
                optional.set_item(
                    "start_index",
                    (NODE_INT, {
                        let start_index = PyDict::new(py);
                        start_index.set_item("default", 0)?;
                        start_index.set_item("min", 0)?;
                        start_index.set_item("max", NODE_START_INDEX_MAX)?;
                        start_index
                            .set_item("tooltip", "Starting index for batch processing (0-based)")?;
                        start_index
                    }),
                )?;
                optional
            })?;

            dict.set_item("hidden", {
                let hidden = PyDict::new(py);
                hidden.set_item("prompt", "PROMPT")?;
                hidden.set_item("extra_pnginfo", "EXTRA_PNGINFO")?;
                hidden.set_item("unique_id", "UNIQUE_ID")?;
                // 由队列控制写入, 使执行缓存失效
                hidden.set_item("queue_nonce", NODE_INT)?;
                hidden
            })?;

            Ok(dict.into())
        })
    }

    /// 执行前校验输入
    ///
    /// 通过时返回 True, 否则返回错误信息
    #[classmethod]
    #[pyo3(
        name = "VALIDATE_INPUTS",
        signature = (
            directory = "",
            filter_preset = "All Images",
            custom_pattern = DEFAULT_IMAGE_PATTERN,
            **_kwargs
        )
    )]
    fn validate_inputs(
        _cls: &Bound<'_, PyType>,
        directory: &str,
        filter_preset: &str,
        custom_pattern: &str,
        _kwargs: Option<Bound<'_, PyDict>>,
    ) -> PyResult<Py<PyAny>> {
        Python::with_gil(|py| match Self::validate(directory, filter_preset, custom_pattern) {
            Ok(_) => true.into_py_any(py),
            Err(message) => message.into_py_any(py),
        })
    }

    /// 缓存判断
    ///
    /// 目录、索引或 queue_nonce 变化时重新执行
    #[classmethod]
    #[pyo3(
        name = "IS_CHANGED",
        signature = (
            directory = "",
            filter_preset = "All Images",
            iteration_mode = "Continue",
            queue_nonce = 0,
            **_kwargs
        )
    )]
    fn is_changed(
        _cls: &Bound<'_, PyType>,
        directory: &str,
        filter_preset: &str,
        iteration_mode: &str,
        queue_nonce: u64,
        _kwargs: Option<Bound<'_, PyDict>>,
    ) -> PyResult<String> {
        Self::changed_hash(
            iteration_store(),
            directory,
            filter_preset,
            iteration_mode,
            queue_nonce,
        )
        .map_err(|e| PyErr::new::<PyRuntimeError, _>(e.to_string()))
    }

    #[allow(clippy::type_complexity)]
    #[allow(clippy::too_many_arguments)]
    #[pyo3(
        name = "load_image",
        signature = (
            directory,
            filter_preset,
            iteration_mode = "Continue",
            error_handling = "Stop on error",
            custom_pattern = DEFAULT_IMAGE_PATTERN,
            start_index = 0,
            prompt = None,
            extra_pnginfo = None,
            unique_id = None,
            queue_nonce = None
        )
    )]
    fn load_image<'py>(
        &mut self,
        py: Python<'py>,
        directory: &str,
        filter_preset: &str,
        iteration_mode: &str,
        error_handling: &str,
        custom_pattern: &str,
        start_index: usize,
        prompt: Option<Bound<'py, PyDict>>,
        extra_pnginfo: Option<Bound<'py, PyDict>>,
        unique_id: Option<String>,
        queue_nonce: Option<u64>,
    ) -> PyResult<(
        Bound<'py, PyAny>,
        String,
        String,
        String,
        String,
        usize,
        usize,
        String,
        bool,
    )> {
        debug!("load_image: {directory}, unique_id={unique_id:?}, nonce={queue_nonce:?}");

        let results = self.execute(
            py,
            directory,
            filter_preset,
            iteration_mode,
            error_handling,
            custom_pattern,
            start_index,
            prompt.as_ref(),
            extra_pnginfo.as_ref(),
            unique_id.as_deref(),
        );

        match results {
            Ok(v) => Ok(v),
            Err(e) => {
                error!("BatchImageLoader error, {e}");
                if let Err(e) = self.send_error(py, "BatchImageLoader".to_string(), e.to_string())
                {
                    error!("send error failed, {e}");
                    return Err(PyErr::new::<PyRuntimeError, _>(e.to_string()));
                };
                Err(PyErr::new::<PyRuntimeError, _>(e.to_string()))
            }
        }
    }
}

impl BatchImageLoader {
    #[allow(clippy::type_complexity)]
    #[allow(clippy::too_many_arguments)]
    fn execute<'py>(
        &self,
        py: Python<'py>,
        directory: &str,
        filter_preset: &str,
        iteration_mode: &str,
        error_handling: &str,
        custom_pattern: &str,
        start_index: usize,
        prompt: Option<&Bound<'py, PyDict>>,
        extra_pnginfo: Option<&Bound<'py, PyDict>>,
        unique_id: Option<&str>,
    ) -> Result<
        (
            Bound<'py, PyAny>,
            String,
            String,
            String,
            String,
            usize,
            usize,
            String,
            bool,
        ),
        Error,
    > {
        let iteration_mode = iteration_mode
            .parse::<IterationMode>()
            .map_err(|e| Error::ParseEnumString(e.to_string()))?;
        let error_handling = error_handling
            .parse::<ErrorHandling>()
            .map_err(|e| Error::ParseEnumString(e.to_string()))?;

        let (loaded, output) = Self::process(
            iteration_store(),
            directory,
            filter_preset,
            custom_pattern,
            iteration_mode,
            error_handling,
            start_index,
        )?;

        // 队列控制
        if output.batch_complete {
            info!("batch complete, stopping auto queue");
            stop_auto_queue(py);
        } else {
            let queued = trigger_next_queue(py, prompt, extra_pnginfo, unique_id);
            debug!("trigger next queue: {queued}");
        }

        // HWC -> 1HWC
        let tensor = image_to_tensor(&loaded.image, &self.device)?.unsqueeze(0)?;
        let image = TensorWrapper::<f32>::from_tensor(tensor).to_py_tensor(py)?;

        Ok((
            image,
            output.input_directory,
            output.base_name,
            output.file_type,
            output.filename,
            output.index,
            output.total_count,
            output.status.to_string(),
            output.batch_complete,
        ))
    }

    /// 校验目录与匹配结果
    fn validate(directory: &str, filter_preset: &str, custom_pattern: &str) -> Result<(), String> {
        if directory.trim().is_empty() {
            return Err("Directory path is required".to_string());
        }
        if !Path::new(directory).is_dir() {
            return Err(format!("Directory does not exist: {directory}"));
        }

        let pattern = pattern_for_preset(filter_preset, custom_pattern);
        if filter_files_by_patterns(directory, &pattern).is_empty() {
            return Err(format!("No images found matching pattern: {pattern}"));
        }
        Ok(())
    }

    /// 缓存键: `{目录}|{预设}|{索引}|{模式}|{nonce}`
    fn changed_hash(
        store: &IterationStore,
        directory: &str,
        filter_preset: &str,
        iteration_mode: &str,
        queue_nonce: u64,
    ) -> Result<String, Error> {
        if directory.is_empty() {
            return Ok(String::new());
        }

        let normalized = normalize_path(directory).to_string_lossy().to_string();
        let state = store.get_state(&normalized)?;
        Ok(format!(
            "{normalized}|{filter_preset}|{}|{iteration_mode}|{queue_nonce}",
            state.index
        ))
    }

    /// 扫描目录并按自然顺序排序
    fn scan(
        directory: &str,
        filter_preset: &str,
        custom_pattern: &str,
    ) -> Result<Vec<String>, Error> {
        let pattern = pattern_for_preset(filter_preset, custom_pattern);
        let mut files = filter_files_by_patterns(directory, &pattern);
        natural_sort(&mut files)?;
        Ok(files)
    }

    /// 单次执行的状态流转, 不涉及 Python
    fn process(
        store: &IterationStore,
        directory: &str,
        filter_preset: &str,
        custom_pattern: &str,
        iteration_mode: IterationMode,
        error_handling: ErrorHandling,
        start_index: usize,
    ) -> Result<(LoadedImage, LoadOutput), Error> {
        let dir = normalize_path(directory);
        if !dir.is_dir() {
            return Err(Error::InvalidDirectory(directory.to_string()));
        }
        let dir_key = dir.to_string_lossy().to_string();

        let files = Self::scan(&dir_key, filter_preset, custom_pattern)?;
        let total_count = files.len();
        info!("found {total_count} files in {dir_key}");

        if store.observe_directory(&dir_key)? {
            info!("directory changed, state reset: {dir_key}");
        }
        if iteration_mode == IterationMode::Reset {
            store.reset(&dir_key)?;
        }

        store.set_total_count(&dir_key, total_count)?;
        if start_index > 0 && store.get_state(&dir_key)?.index == 0 {
            debug!("applying start_index={start_index}");
            store.set_index(&dir_key, start_index)?;
        }
        store.set_status(&dir_key, IterationStatus::Processing)?;

        if files.is_empty() {
            let pattern = pattern_for_preset(filter_preset, custom_pattern);
            return Err(Error::NoImagesFound(pattern));
        }

        let current_index = store.get_state(&dir_key)?.index;
        let loaded =
            Self::load_with_error_handling(store, &dir, &files, current_index, error_handling)?;

        // 越过末尾回到开头时本批次已结束
        let batch_complete = loaded.wrapped || !should_continue(loaded.index, total_count);
        let status = if batch_complete {
            store.wrap_index(&dir_key)?;
            store.set_status(&dir_key, IterationStatus::Completed)?;
            IterationStatus::Completed
        } else {
            store.set_index(&dir_key, loaded.index + 1)?;
            IterationStatus::Processing
        };

        let path = Path::new(&loaded.filename);
        let base_name = path
            .file_stem()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_type = path
            .extension()
            .map(|v| v.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "png".to_string());

        let output = LoadOutput {
            input_directory: directory_name(&dir),
            base_name,
            file_type,
            filename: loaded.filename.clone(),
            index: loaded.index,
            total_count,
            status,
            batch_complete,
        };
        Ok((loaded, output))
    }

    /// 加载当前索引的图片
    ///
    /// 跳过模式下失败的文件会被跳过, 所有文件都失败时返回错误。
    /// 跳过时越过批次末尾会标记为 wrapped
    fn load_with_error_handling(
        store: &IterationStore,
        directory: &Path,
        files: &[String],
        start: usize,
        error_handling: ErrorHandling,
    ) -> Result<LoadedImage, Error> {
        let dir_key = directory.to_string_lossy().to_string();
        let total_count = files.len();
        let mut index = start;
        let mut wrapped = false;

        for _ in 0..total_count {
            let filename = &files[index];
            match load_image(&directory.join(filename)) {
                Ok(image) => {
                    return Ok(LoadedImage {
                        image,
                        index,
                        filename: filename.clone(),
                        wrapped,
                    })
                }
                Err(e) => match error_handling {
                    ErrorHandling::StopOnError => {
                        return Err(Error::LoadFailed(filename.clone(), e.to_string()));
                    }
                    ErrorHandling::SkipOnError => {
                        warn!("skipping {filename}, {e}");
                        let next = store.advance(&dir_key)?;
                        wrapped |= next <= index;
                        index = next;
                    }
                },
            }
        }

        Err(Error::AllImagesFailed)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::{ImageBuffer, Rgb, RgbImage};

    use super::*;

    fn write_image(dir: &Path, name: &str) -> anyhow::Result<()> {
        let img: RgbImage = ImageBuffer::from_pixel(2, 2, Rgb([10, 20, 30]));
        img.save_with_format(dir.join(name), image::ImageFormat::Png)?;
        Ok(())
    }

    fn image_dir(names: &[&str]) -> anyhow::Result<tempfile::TempDir> {
        let dir = tempfile::tempdir()?;
        for name in names {
            write_image(dir.path(), name)?;
        }
        Ok(dir)
    }

    fn run(
        store: &IterationStore,
        dir: &Path,
        mode: IterationMode,
        error_handling: ErrorHandling,
        start_index: usize,
    ) -> Result<LoadOutput, Error> {
        BatchImageLoader::process(
            store,
            &dir.to_string_lossy(),
            "All Images",
            "",
            mode,
            error_handling,
            start_index,
        )
        .map(|(_, output)| output)
    }

    fn tick(store: &IterationStore, dir: &Path) -> Result<LoadOutput, Error> {
        run(store, dir, IterationMode::Continue, ErrorHandling::StopOnError, 0)
    }

    fn skip_tick(store: &IterationStore, dir: &Path) -> Result<LoadOutput, Error> {
        run(store, dir, IterationMode::Continue, ErrorHandling::SkipOnError, 0)
    }

    #[test]
    fn test_validate() -> anyhow::Result<()> {
        let dir = image_dir(&["a.png"])?;
        let path = dir.path().to_string_lossy().to_string();

        assert_eq!(
            BatchImageLoader::validate("  ", "All Images", ""),
            Err("Directory path is required".to_string())
        );
        assert_eq!(
            BatchImageLoader::validate("/nonexistent/batch/dir", "All Images", ""),
            Err("Directory does not exist: /nonexistent/batch/dir".to_string())
        );
        assert_eq!(
            BatchImageLoader::validate(&path, "JPG Only", ""),
            Err("No images found matching pattern: *.jpg,*.jpeg".to_string())
        );
        assert_eq!(BatchImageLoader::validate(&path, "PNG Only", ""), Ok(()));
        Ok(())
    }

    #[test]
    fn test_changed_hash() -> anyhow::Result<()> {
        let store = IterationStore::default();
        assert_eq!(
            BatchImageLoader::changed_hash(&store, "", "All Images", "Continue", 0)?,
            ""
        );

        store.set_total_count("/data/images", 5)?;
        store.set_index("/data/images", 2)?;
        assert_eq!(
            BatchImageLoader::changed_hash(&store, "/data/images/", "PNG Only", "Continue", 7)?,
            "/data/images|PNG Only|2|Continue|7"
        );
        Ok(())
    }

    #[test]
    fn test_iterates_in_natural_order() -> anyhow::Result<()> {
        let dir = image_dir(&["img10.png", "img2.png", "img1.png"])?;
        let store = IterationStore::default();

        let first = tick(&store, dir.path())?;
        assert_eq!(first.filename, "img1.png");
        assert_eq!((first.index, first.total_count), (0, 3));
        assert_eq!(first.status, IterationStatus::Processing);
        assert!(!first.batch_complete);

        let second = tick(&store, dir.path())?;
        assert_eq!(second.filename, "img2.png");
        assert_eq!(second.index, 1);

        let third = tick(&store, dir.path())?;
        assert_eq!(third.filename, "img10.png");
        assert_eq!(third.index, 2);
        assert_eq!(third.status, IterationStatus::Completed);
        assert!(third.batch_complete);

        // 批次结束后从头开始
        let state = store.get_state(&dir.path().to_string_lossy())?;
        assert_eq!(state.index, 0);
        assert_eq!(state.status, IterationStatus::Completed);

        let again = tick(&store, dir.path())?;
        assert_eq!(again.filename, "img1.png");
        Ok(())
    }

    #[test]
    fn test_output_fields() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let images = dir.path().join("holiday");
        fs::create_dir(&images)?;
        write_image(&images, "Photo.PNG")?;

        let store = IterationStore::default();
        let output = tick(&store, &images)?;
        assert_eq!(
            output,
            LoadOutput {
                input_directory: "holiday".to_string(),
                base_name: "Photo".to_string(),
                file_type: "png".to_string(),
                filename: "Photo.PNG".to_string(),
                index: 0,
                total_count: 1,
                status: IterationStatus::Completed,
                batch_complete: true,
            }
        );
        Ok(())
    }

    #[test]
    fn test_reset_mode_starts_over() -> anyhow::Result<()> {
        let dir = image_dir(&["a.png", "b.png", "c.png"])?;
        let store = IterationStore::default();

        tick(&store, dir.path())?;
        let output = run(&store, dir.path(), IterationMode::Reset, ErrorHandling::StopOnError, 0)?;
        assert_eq!(output.filename, "a.png");
        Ok(())
    }

    #[test]
    fn test_start_index() -> anyhow::Result<()> {
        let dir = image_dir(&["a.png", "b.png", "c.png"])?;
        let store = IterationStore::default();

        let continue_mode = IterationMode::Continue;
        let stop = ErrorHandling::StopOnError;
        let output = run(&store, dir.path(), continue_mode, stop, 1)?;
        assert_eq!(output.filename, "b.png");

        // 索引不为 0 时忽略 start_index
        let output = run(&store, dir.path(), continue_mode, stop, 1)?;
        assert_eq!(output.filename, "c.png");

        // 越界时回到 0
        let other = image_dir(&["x.png", "y.png"])?;
        let output = run(&store, other.path(), continue_mode, stop, 5)?;
        assert_eq!(output.filename, "x.png");
        Ok(())
    }

    #[test]
    fn test_directory_change_resets() -> anyhow::Result<()> {
        let first = image_dir(&["a.png", "b.png", "c.png"])?;
        let second = image_dir(&["x.png", "y.png"])?;
        let store = IterationStore::default();

        tick(&store, first.path())?;
        tick(&store, first.path())?;
        let output = tick(&store, second.path())?;
        assert_eq!(output.filename, "x.png");

        let output = tick(&store, first.path())?;
        assert_eq!(output.filename, "a.png");
        Ok(())
    }

    #[test]
    fn test_files_removed_between_runs() -> anyhow::Result<()> {
        let dir = image_dir(&["a.png", "b.png", "c.png", "d.png"])?;
        let store = IterationStore::default();

        for _ in 0..3 {
            tick(&store, dir.path())?;
        }
        fs::remove_file(dir.path().join("c.png"))?;
        fs::remove_file(dir.path().join("d.png"))?;

        let output = tick(&store, dir.path())?;
        assert_eq!(output.filename, "a.png");
        assert_eq!(output.total_count, 2);
        Ok(())
    }

    #[test]
    fn test_stop_on_error() -> anyhow::Result<()> {
        let dir = image_dir(&["b.png"])?;
        fs::write(dir.path().join("a.png"), b"broken")?;
        let store = IterationStore::default();

        let result = tick(&store, dir.path());
        assert!(matches!(result, Err(Error::LoadFailed(name, _)) if name == "a.png"));
        Ok(())
    }

    #[test]
    fn test_skip_on_error() -> anyhow::Result<()> {
        let dir = image_dir(&["a.png", "c.png"])?;
        fs::write(dir.path().join("b.png"), b"broken")?;
        let store = IterationStore::default();

        let first = skip_tick(&store, dir.path())?;
        assert_eq!(first.filename, "a.png");

        let second = skip_tick(&store, dir.path())?;
        assert_eq!(second.filename, "c.png");
        assert_eq!(second.index, 2);
        assert!(second.batch_complete);
        Ok(())
    }

    #[test]
    fn test_skip_past_last_file_completes_batch() -> anyhow::Result<()> {
        let dir = image_dir(&["a.png"])?;
        fs::write(dir.path().join("b.png"), b"broken")?;
        let store = IterationStore::default();
        let key = dir.path().to_string_lossy().to_string();

        let first = skip_tick(&store, dir.path())?;
        assert_eq!((first.filename.as_str(), first.index), ("a.png", 0));
        assert!(!first.batch_complete);

        // b.png 失败后回到开头, 本批次结束
        let second = skip_tick(&store, dir.path())?;
        assert_eq!((second.filename.as_str(), second.index), ("a.png", 0));
        assert!(second.batch_complete);
        assert_eq!(second.status, IterationStatus::Completed);
        assert!(store.is_complete(&key)?);
        assert_eq!(store.get_state(&key)?.index, 0);

        let third = skip_tick(&store, dir.path())?;
        assert_eq!(third.filename, "a.png");
        assert!(!third.batch_complete);
        Ok(())
    }

    #[test]
    fn test_all_images_fail() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("a.png"), b"broken")?;
        fs::write(dir.path().join("b.png"), b"broken")?;
        let store = IterationStore::default();

        let result = skip_tick(&store, dir.path());
        assert!(matches!(result, Err(Error::AllImagesFailed)));
        Ok(())
    }

    #[test]
    fn test_empty_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("notes.txt"), b"text")?;
        let store = IterationStore::default();

        let result = tick(&store, dir.path());
        assert!(matches!(result, Err(Error::NoImagesFound(_))));

        let result = run(
            &store,
            Path::new("/nonexistent/batch/dir"),
            IterationMode::Continue,
            ErrorHandling::StopOnError,
            0,
        );
        assert!(matches!(result, Err(Error::InvalidDirectory(_))));
        Ok(())
    }

    #[test]
    fn test_mode_strings() -> anyhow::Result<()> {
        assert_eq!("Reset".parse::<IterationMode>()?, IterationMode::Reset);
        assert_eq!(
            "Skip on error".parse::<ErrorHandling>()?,
            ErrorHandling::SkipOnError
        );
        Ok(())
    }
}
