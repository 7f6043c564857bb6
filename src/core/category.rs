//! 节点分类

/// 批处理
pub const CATEGORY_BATCH: &str = "batch_processing";
