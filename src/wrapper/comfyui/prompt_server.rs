//! Prompt Server
//!
//! 依赖:
//! - python: server.PromptServer

use log::warn;
use pyo3::{
    types::{PyAnyMethods, PyDict, PyDictMethods, PyModule},
    Bound, PyAny, PyResult, PyTypeInfo, Python,
};

/// 前端错误通知使用的事件名称
pub const ERROR_EVENT: &str = "batch_processing";

/// 获取 PromptServer 实例
///
/// 不在 ComfyUI 中运行或服务尚未启动时返回 None
pub fn prompt_server_instance(py: Python<'_>) -> Option<Bound<'_, PyAny>> {
    let server = PyModule::import(py, "server")
        .and_then(|m| m.getattr("PromptServer"))
        .and_then(|v| v.getattr("instance"))
        .ok()?;
    if server.is_none() {
        return None;
    }
    Some(server)
}

/// 向前端发送事件
///
/// sid 为 None 时广播给所有客户端, 返回是否发送成功
pub fn send_sync(py: Python<'_>, event: &str, data: &Bound<'_, PyDict>, sid: Option<&str>) -> bool {
    let Some(server) = prompt_server_instance(py) else {
        return false;
    };

    let result = (|| -> PyResult<()> {
        let kwargs = PyDict::new(py);
        kwargs.set_item("sid", sid)?;
        server.call_method("send_sync", (event, data), Some(&kwargs))?;
        Ok(())
    })();

    match result {
        Ok(_) => true,
        Err(e) => {
            warn!("send_sync {event} failed, {e}");
            false
        }
    }
}

/// comfyui PromptServer wrapper
pub trait PromptServer: PyTypeInfo {
    /// 发送错误信息到ComfyUI
    ///
    /// 当节点执行出现异常时通知前端
    fn send_error(&self, py: Python, error_type: String, message: String) -> PyResult<()> {
        let error_data = PyDict::new(py);
        error_data.set_item("type", &error_type)?;
        error_data.set_item("node", self.get_class_name(py)?)?;
        error_data.set_item("message", message)?;

        send_sync(py, ERROR_EVENT, &error_data, None);
        Ok(())
    }

    /// 广播节点的执行结果, 用于实时更新前端显示
    fn broadcast_executed(
        &self,
        py: Python,
        unique_id: &str,
        output: &Bound<'_, PyDict>,
    ) -> PyResult<bool> {
        let data = PyDict::new(py);
        data.set_item("node", unique_id)?;
        data.set_item("output", output)?;

        Ok(send_sync(py, "executed", &data, None))
    }

    /// Class 名称
    fn get_class_name(&self, py: Python) -> PyResult<String> {
        Self::type_object(py)
            .getattr("__name__")?
            .extract::<String>()
    }
}
