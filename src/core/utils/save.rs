//! 图片保存
//!
//! 文件名、覆盖策略、输出目录以及各格式的编码

use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use image::{
    codecs::{jpeg::JpegEncoder, webp::WebPEncoder},
    DynamicImage, GenericImageView,
};
use log::info;
use png::{Compression, Encoder};
use rand::Rng;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::Error;

/// 重命名时最多尝试的次数
pub const MAX_RENAME_ATTEMPTS: usize = 10000;

/// JPEG 的最高质量
const JPEG_MAX_QUALITY: u8 = 95;

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg,
    WebP,
}

impl OutputFormat {
    /// 从文件类型解析输出格式, 未知类型按 PNG 处理
    pub fn from_file_type(file_type: &str) -> Self {
        match normalize_file_type(file_type).as_str() {
            "jpg" | "jpeg" => OutputFormat::Jpeg,
            "webp" => OutputFormat::WebP,
            _ => OutputFormat::Png,
        }
    }
}

/// 规范化文件类型
///
/// 去掉空白与前导点并转为小写; 空值或不支持的类型返回 png
pub fn normalize_file_type(file_type: &str) -> String {
    let file_type = file_type.trim().trim_start_matches('.').to_lowercase();
    match file_type.as_str() {
        "png" | "jpg" | "jpeg" | "webp" => file_type,
        _ => "png".to_string(),
    }
}

/// 拼接输出文件名: `{prefix}{base}{suffix}.{ext}`
pub fn construct_filename(base_name: &str, prefix: &str, suffix: &str, extension: &str) -> String {
    format!("{prefix}{base_name}{suffix}.{extension}")
}

/// 文件已存在时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, EnumIter)]
pub enum OverwriteMode {
    #[strum(to_string = "Overwrite")]
    Overwrite,
    #[strum(to_string = "Skip")]
    Skip,
    #[strum(to_string = "Rename")]
    Rename,
}

impl OverwriteMode {
    pub fn choices() -> Vec<String> {
        OverwriteMode::iter().map(|v| v.to_string()).collect()
    }
}

/// 按覆盖策略处理已存在的文件
///
/// 返回最终路径以及是否需要保存
pub fn handle_existing_file(path: &Path, mode: OverwriteMode) -> Result<(PathBuf, bool), Error> {
    if !path.exists() {
        return Ok((path.to_path_buf(), true));
    }

    match mode {
        OverwriteMode::Overwrite => Ok((path.to_path_buf(), true)),
        OverwriteMode::Skip => {
            let name = path
                .file_name()
                .map(|v| v.to_string_lossy().to_string())
                .unwrap_or_default();
            info!("Skipped: {name}");
            Ok((path.to_path_buf(), false))
        }
        OverwriteMode::Rename => {
            let parent = path.parent().unwrap_or_else(|| Path::new(""));
            let stem = path
                .file_stem()
                .map(|v| v.to_string_lossy().to_string())
                .unwrap_or_default();
            let ext = path
                .extension()
                .map(|v| format!(".{}", v.to_string_lossy()))
                .unwrap_or_default();

            for counter in 1..=MAX_RENAME_ATTEMPTS {
                let candidate = parent.join(format!("{stem}_{counter}{ext}"));
                if !candidate.exists() {
                    return Ok((candidate, true));
                }
            }
            Err(Error::RenameExhausted(MAX_RENAME_ATTEMPTS))
        }
    }
}

/// 解析输出目录并创建
///
/// - 绝对路径直接使用
/// - 相对路径拼接到 ComfyUI 的输出目录下
/// - 为空时使用 ComfyUI 的输出目录, 未知时使用当前目录
pub fn resolve_output_directory(
    output_dir: &str,
    default_output: Option<&Path>,
) -> Result<PathBuf, Error> {
    let output_dir = output_dir.trim();

    let resolved = if output_dir.is_empty() {
        default_output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        let path = Path::new(output_dir);
        match default_output {
            Some(base) if !path.is_absolute() => base.join(path),
            _ => path.to_path_buf(),
        }
    };

    fs::create_dir_all(&resolved)?;
    Ok(resolved)
}

/// PNG 文本块, 用于嵌入工作流
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub keyword: String,
    pub text: String,
}

/// 未提供文件名时的默认名称
pub fn fallback_base_name() -> String {
    let mut rng = rand::rng();
    format!("output_{}", rng.random_range(1000..=9999))
}

/// 按格式保存图片
///
/// quality 取值 1-100, PNG 忽略该参数, WebP 使用无损编码。
/// metadata 只写入 PNG。
pub fn save_with_format(
    image: &DynamicImage,
    path: &Path,
    format: OutputFormat,
    quality: u8,
    metadata: &[TextChunk],
) -> Result<(), Error> {
    let quality = quality.clamp(1, 100);

    match format {
        OutputFormat::Png => save_png(image, path, metadata),
        OutputFormat::Jpeg => {
            // JPEG 不支持透明通道
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            let mut writer = BufWriter::new(File::create(path)?);
            let encoder =
                JpegEncoder::new_with_quality(&mut writer, quality.min(JPEG_MAX_QUALITY));
            rgb.write_with_encoder(encoder)?;
            Ok(())
        }
        OutputFormat::WebP => {
            let image = if image.color().has_alpha() {
                DynamicImage::ImageRgba8(image.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(image.to_rgb8())
            };
            let mut writer = BufWriter::new(File::create(path)?);
            image.write_with_encoder(WebPEncoder::new_lossless(&mut writer))?;
            Ok(())
        }
    }
}

/// 保存为 PNG
fn save_png(image: &DynamicImage, path: &Path, metadata: &[TextChunk]) -> Result<(), Error> {
    let (width, height) = image.dimensions();

    let (color_type, data) = if image.color().has_alpha() {
        (png::ColorType::Rgba, image.to_rgba8().into_raw())
    } else {
        (png::ColorType::Rgb, image.to_rgb8().into_raw())
    };

    let file = File::create(path)?;
    let writer = BufWriter::new(file);

    let mut encoder = Encoder::new(writer, width, height);
    encoder.set_color(color_type);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(Compression::default());

    // iTXt 支持 UTF-8
    for chunk in metadata {
        encoder.add_itxt_chunk(chunk.keyword.clone(), chunk.text.clone())?;
    }

    let mut writer = encoder.write_header()?;
    writer.write_image_data(&data)?;

    Ok(())
}
