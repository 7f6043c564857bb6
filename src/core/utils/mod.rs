//! 工具
pub mod directory;
pub mod image;
pub mod save;
pub mod sorting;
