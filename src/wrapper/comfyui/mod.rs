//! ComfyUI 服务端包装

mod prompt_server;
pub use prompt_server::{prompt_server_instance, send_sync, PromptServer};

pub mod queue_control;
pub mod types;
