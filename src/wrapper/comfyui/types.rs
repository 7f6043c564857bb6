//! 类型定义
//! 相关节点定义: ComfyUI/comfy/comfy_types/node_typing.py

pub const NODE_INT: &str = "INT";
pub const NODE_STRING: &str = "STRING";
pub const NODE_BOOLEAN: &str = "BOOLEAN";
pub const NODE_IMAGE: &str = "IMAGE";

/// 起始索引的最大值
pub const NODE_START_INDEX_MAX: u64 = 99999;
/// 进度索引的最大值
pub const NODE_PROGRESS_INT_MAX: u64 = 999999;
