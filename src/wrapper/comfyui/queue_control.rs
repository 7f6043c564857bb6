//! 队列控制
//!
//! 批处理未结束时请求 ComfyUI 再执行一次工作流, 结束时停止自动排队。
//!
//! 依赖:
//! - python: server.PromptServer
//! - http: POST /prompt

use std::{env, time::Duration};

use log::{info, warn};
use pyo3::{
    types::{PyAnyMethods, PyDict},
    Bound, PyAny, Python,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::Error,
    wrapper::comfyui::{prompt_server_instance, send_sync},
};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8188;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// 前端扩展监听的排队事件
pub const ADD_QUEUE_EVENT: &str = "impact-add-queue";
pub const STOP_AUTO_QUEUE_EVENT: &str = "impact-stop-auto-queue";

/// 是否还有下一张图片需要处理
pub fn should_continue(current_index: usize, total_count: usize) -> bool {
    current_index + 1 < total_count
}

/// ComfyUI HTTP 服务地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl QueueConfig {
    /// 默认值 -> 环境变量 -> 运行中的 PromptServer
    pub fn resolve(py: Python<'_>) -> Self {
        let config = Self::from_env();
        match prompt_server_instance(py) {
            Some(server) => config.with_server(&server),
            None => config,
        }
    }

    /// 读取环境变量
    ///
    /// COMFYUI_HOST, COMFYUI_PORT, COMFYUI_QUEUE_TIMEOUT_SECS
    pub fn from_env() -> Self {
        Self::default().with_overrides(
            env::var("COMFYUI_HOST").ok(),
            env::var("COMFYUI_PORT").ok(),
            env::var("COMFYUI_QUEUE_TIMEOUT_SECS").ok(),
        )
    }

    fn with_overrides(
        mut self,
        host: Option<String>,
        port: Option<String>,
        timeout_secs: Option<String>,
    ) -> Self {
        if let Some(host) = host.filter(|v| !v.trim().is_empty()) {
            self.host = loopback_for_wildcard(host.trim());
        }
        if let Some(port) = port {
            match port.trim().parse::<u16>() {
                Ok(v) => self.port = v,
                Err(e) => warn!("invalid COMFYUI_PORT {port:?}, {e}"),
            }
        }
        if let Some(timeout_secs) = timeout_secs {
            match timeout_secs.trim().parse::<u64>() {
                Ok(v) => self.timeout = Duration::from_secs(v),
                Err(e) => warn!("invalid COMFYUI_QUEUE_TIMEOUT_SECS {timeout_secs:?}, {e}"),
            }
        }
        self
    }

    /// 使用 PromptServer 实际监听的地址与端口
    pub fn with_server(mut self, server: &Bound<'_, PyAny>) -> Self {
        if let Some(address) = server
            .getattr("address")
            .and_then(|v| v.extract::<String>())
            .ok()
            .filter(|v| !v.is_empty())
        {
            self.host = loopback_for_wildcard(&address);
        }
        if let Ok(port) = server.getattr("port").and_then(|v| v.extract::<u16>()) {
            self.port = port;
        }
        self
    }

    pub fn prompt_url(&self) -> String {
        if self.host.contains(':') {
            format!("http://[{}]:{}/prompt", self.host, self.port)
        } else {
            format!("http://{}:{}/prompt", self.host, self.port)
        }
    }
}

/// 监听所有地址时通过本地回环访问
fn loopback_for_wildcard(host: &str) -> String {
    match host {
        "0.0.0.0" => DEFAULT_HOST.to_string(),
        "::" | "[::]" => "::1".to_string(),
        _ => host.to_string(),
    }
}

/// 在工作流中写入新的 queue_nonce
///
/// 使 ComfyUI 的执行缓存认为加载节点的输入已变化
pub fn inject_queue_nonce(prompt: &mut Value, unique_id: &str, nonce: u64) -> bool {
    let Some(inputs) = prompt
        .get_mut(unique_id)
        .and_then(|node| node.get_mut("inputs"))
        .and_then(|inputs| inputs.as_object_mut())
    else {
        return false;
    };

    inputs.insert("queue_nonce".to_string(), json!(nonce));
    true
}

/// POST /prompt 请求体
#[derive(Debug, Serialize)]
struct PromptRequest<'a> {
    prompt: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra_data: Option<ExtraData<'a>>,
}

/// 随工作流提交的附加数据, 保存节点从中读取 extra_pnginfo
#[derive(Debug, Serialize)]
struct ExtraData<'a> {
    extra_pnginfo: &'a Value,
}

impl<'a> PromptRequest<'a> {
    fn new(prompt: &'a Value, extra_pnginfo: Option<&'a Value>) -> Self {
        Self {
            prompt,
            extra_data: extra_pnginfo.map(|extra_pnginfo| ExtraData { extra_pnginfo }),
        }
    }
}

/// POST /prompt 响应
#[derive(Debug, Default, Deserialize)]
struct PromptResponse {
    #[serde(default)]
    prompt_id: String,
}

/// 提交工作流, 返回 prompt_id
fn post_prompt(
    config: &QueueConfig,
    prompt: &Value,
    extra_pnginfo: Option<&Value>,
) -> Result<String, Error> {
    let client = reqwest::blocking::Client::builder()
        .timeout(config.timeout)
        .build()?;

    let response = client
        .post(config.prompt_url())
        .json(&PromptRequest::new(prompt, extra_pnginfo))
        .send()?
        .error_for_status()?;

    let payload: PromptResponse = response.json()?;
    Ok(payload.prompt_id)
}

/// 请求执行下一次工作流
///
/// 已知工作流与节点 id 时直接提交到 /prompt, 否则或提交失败时发送排队事件给前端。
/// extra_pnginfo 随请求一起提交, 后续执行中的保存节点仍可写入工作流。
/// 不会返回错误, 返回是否发出了请求。
pub fn trigger_next_queue(
    py: Python<'_>,
    prompt: Option<&Bound<'_, PyDict>>,
    extra_pnginfo: Option<&Bound<'_, PyDict>>,
    unique_id: Option<&str>,
) -> bool {
    if let (Some(prompt), Some(unique_id)) = (prompt, unique_id) {
        match queue_prompt(py, prompt, extra_pnginfo, unique_id) {
            Ok(prompt_id) => {
                info!("queued next batch item, prompt_id: {prompt_id}");
                return true;
            }
            Err(e) => warn!("queue prompt failed, fallback to {ADD_QUEUE_EVENT}, {e}"),
        }
    }

    send_sync(py, ADD_QUEUE_EVENT, &PyDict::new(py), None)
}

fn queue_prompt(
    py: Python<'_>,
    prompt: &Bound<'_, PyDict>,
    extra_pnginfo: Option<&Bound<'_, PyDict>>,
    unique_id: &str,
) -> Result<String, Error> {
    let mut graph: Value = pythonize::depythonize(prompt.as_any())?;
    let nonce = rand::random::<u32>() as u64;
    if !inject_queue_nonce(&mut graph, unique_id, nonce) {
        return Err(Error::OptionNone(format!(
            "node {unique_id} not found in prompt"
        )));
    }

    let extra_pnginfo: Option<Value> = extra_pnginfo
        .map(|v| pythonize::depythonize(v.as_any()))
        .transpose()?;

    let config = QueueConfig::resolve(py);
    py.allow_threads(|| post_prompt(&config, &graph, extra_pnginfo.as_ref()))
}

/// 通知前端停止自动排队
///
/// 没有运行中的服务时返回 false
pub fn stop_auto_queue(py: Python<'_>) -> bool {
    if prompt_server_instance(py).is_none() {
        return false;
    }
    send_sync(py, STOP_AUTO_QUEUE_EVENT, &PyDict::new(py), None);
    true
}
