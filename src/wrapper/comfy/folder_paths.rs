//! 文件夹路径
//!
//! 依赖:
//! - python: folder_paths

use std::path::{Path, PathBuf};

use log::warn;
use pyo3::{
    types::{PyAnyMethods, PyModule},
    PyResult, Python,
};

use crate::core::utils::directory::normalize_path;

/// ComfyUI 的目录配置
#[derive(Debug, Default, Clone)]
pub struct FolderPaths {
    /// 输出目录, 不在 ComfyUI 中运行时未知
    output_directory: Option<PathBuf>,
}

impl FolderPaths {
    /// 从 ComfyUI 的 folder_paths 模块获取目录
    pub fn from_host(py: Python<'_>) -> Self {
        match Self::get_output_directory(py) {
            Ok(output_directory) => Self::with_output_directory(output_directory),
            Err(e) => {
                warn!("folder_paths unavailable, {e}");
                Self::default()
            }
        }
    }

    pub fn with_output_directory<P: Into<PathBuf>>(output_directory: P) -> Self {
        Self {
            output_directory: Some(output_directory.into()),
        }
    }

    fn get_output_directory(py: Python<'_>) -> PyResult<String> {
        PyModule::import(py, "folder_paths")?
            .getattr("get_output_directory")?
            .call0()?
            .extract::<String>()
    }

    pub fn output_directory(&self) -> Option<&Path> {
        self.output_directory.as_deref()
    }

    /// 文件所在目录相对于输出目录的路径
    ///
    /// 位于输出目录根部或输出目录之外时返回空字符串
    pub fn subfolder_of(&self, path: &Path) -> String {
        let Some(output_directory) = &self.output_directory else {
            return String::new();
        };
        let Some(parent) = path.parent() else {
            return String::new();
        };

        let output_directory = normalize_path(&output_directory.to_string_lossy());
        let parent = normalize_path(&parent.to_string_lossy());
        match parent.strip_prefix(&output_directory) {
            Ok(relative) => relative.to_string_lossy().to_string(),
            Err(_) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subfolder_of() {
        let folder_paths = FolderPaths::with_output_directory("/comfy/output");

        assert_eq!(
            folder_paths.subfolder_of(Path::new("/comfy/output/images/a.png")),
            "images"
        );
        assert_eq!(
            folder_paths.subfolder_of(Path::new("/comfy/output/a/b/c.png")),
            "a/b"
        );
        assert_eq!(folder_paths.subfolder_of(Path::new("/comfy/output/a.png")), "");
        assert_eq!(folder_paths.subfolder_of(Path::new("/elsewhere/a.png")), "");
        assert_eq!(
            folder_paths.subfolder_of(Path::new("/comfy/output-2/a.png")),
            ""
        );
    }

    #[test]
    fn test_unknown_output_directory() {
        let folder_paths = FolderPaths::default();
        assert!(folder_paths.output_directory().is_none());
        assert_eq!(folder_paths.subfolder_of(Path::new("/comfy/output/images/a.png")), "");
    }
}
