//! 目录操作

use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use glob::{MatchOptions, Pattern};
use log::warn;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// 默认的图片匹配规则
pub const DEFAULT_IMAGE_PATTERN: &str = "*.png,*.jpg,*.jpeg,*.webp";

/// 文件过滤预设
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, EnumIter)]
pub enum FilterPreset {
    #[strum(to_string = "All Images")]
    AllImages,
    #[strum(to_string = "PNG Only")]
    PngOnly,
    #[strum(to_string = "JPG Only")]
    JpgOnly,
    #[strum(to_string = "Custom")]
    Custom,
}

impl FilterPreset {
    /// 前端下拉框选项
    pub fn choices() -> Vec<String> {
        FilterPreset::iter().map(|v| v.to_string()).collect()
    }
}

/// 获取预设对应的匹配规则
///
/// 未知的预设返回默认规则
pub fn pattern_for_preset(preset: &str, custom_pattern: &str) -> String {
    match preset.parse::<FilterPreset>() {
        Ok(FilterPreset::AllImages) => DEFAULT_IMAGE_PATTERN.to_string(),
        Ok(FilterPreset::PngOnly) => "*.png".to_string(),
        Ok(FilterPreset::JpgOnly) => "*.jpg,*.jpeg".to_string(),
        Ok(FilterPreset::Custom) => {
            let custom_pattern = custom_pattern.trim();
            if custom_pattern.is_empty() {
                DEFAULT_IMAGE_PATTERN.to_string()
            } else {
                custom_pattern.to_string()
            }
        }
        Err(_) => DEFAULT_IMAGE_PATTERN.to_string(),
    }
}

/// 解析逗号分隔的匹配规则
fn parse_patterns(pattern_string: &str) -> Vec<Pattern> {
    pattern_string
        .split(',')
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .filter_map(|p| match Pattern::new(&p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!("invalid glob pattern {p:?}, {e}");
                None
            }
        })
        .collect()
}

/// 按匹配规则过滤目录中的文件
///
/// 只扫描单层目录, 忽略大小写, 返回文件名列表
pub fn filter_files_by_patterns(directory: &str, pattern_string: &str) -> Vec<String> {
    let dir = Path::new(directory);
    if !dir.is_dir() {
        return Vec::new();
    }

    let patterns = parse_patterns(pattern_string);
    if patterns.is_empty() {
        return Vec::new();
    }

    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };

    let entries = match fs::read_dir(dir) {
        Ok(v) => v,
        Err(e) => {
            warn!("read dir failed, {directory}, {e}");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };

        let name_lower = name.to_lowercase();
        if patterns
            .iter()
            .any(|p| p.matches_with(&name_lower, options))
        {
            files.push(name.to_string());
        }
    }

    files
}

/// 规范化目录路径
///
/// 转为绝对路径并按词法处理 `.`、`..` 和结尾的分隔符, 不解析符号链接
pub fn normalize_path(directory: &str) -> PathBuf {
    let path = Path::new(directory);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// 目录最后一级的名称
pub fn directory_name(directory: &Path) -> String {
    directory
        .file_name()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_default()
}
