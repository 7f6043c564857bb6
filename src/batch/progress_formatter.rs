//! 批处理进度
//!
//! 将加载节点输出的索引与总数格式化为 "3 of 10 (30%)"

use log::{debug, error};
use pyo3::{
    exceptions::PyRuntimeError,
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyErr, PyResult, Python,
};

use crate::{
    core::category::CATEGORY_BATCH,
    error::Error,
    wrapper::comfyui::{
        types::{NODE_INT, NODE_PROGRESS_INT_MAX, NODE_STRING},
        PromptServer,
    },
};

/// 格式化进度文本
///
/// index 从 0 开始, 百分比向下取整
pub fn format_progress_text(index: usize, total_count: usize) -> String {
    let current = index + 1;
    let total = total_count.max(1);
    let percentage = current * 100 / total;
    format!("{current} of {total} ({percentage}%)")
}

/// 批处理进度
#[pyclass(subclass)]
pub struct BatchProgressFormatter {}

impl PromptServer for BatchProgressFormatter {}

#[pymethods]
impl BatchProgressFormatter {
    #[new]
    fn new() -> Self {
        Self {}
    }

    #[classattr]
    #[pyo3(name = "OUTPUT_NODE")]
    fn output_node() -> bool {
        true
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() -> (&'static str,) {
        (NODE_STRING,)
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (&'static str,) {
        ("PROGRESS_TEXT",)
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_BATCH;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Format the batch position as \"3 of 10 (30%)\"."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "format_progress";

    #[classmethod]
    #[pyo3(name = "INPUT_TYPES")]
    fn input_types(_cls: &Bound<'_, PyType>) -> PyResult<Py<PyDict>> {
        Python::with_gil(|py| {
            let dict = PyDict::new(py);
            dict.set_item("required", {
                let required = PyDict::new(py);
                required.set_item(
                    "index",
                    (NODE_INT, {
                        let index = PyDict::new(py);
                        index.set_item("default", 0)?;
                        index.set_item("min", 0)?;
                        index.set_item("max", NODE_PROGRESS_INT_MAX)?;
                        index.set_item("forceInput", true)?;
                        index.set_item("tooltip", "Wire from BatchImageLoader INDEX output")?;
                        index
                    }),
                )?;
                required.set_item(
                    "total_count",
                    (NODE_INT, {
                        let total_count = PyDict::new(py);
                        total_count.set_item("default", 1)?;
                        total_count.set_item("min", 0)?;
                        total_count.set_item("max", NODE_PROGRESS_INT_MAX)?;
                        total_count.set_item("forceInput", true)?;
                        total_count
                            .set_item("tooltip", "Wire from BatchImageLoader TOTAL_COUNT output")?;
                        total_count
                    }),
                )?;
                required
            })?;

            dict.set_item("hidden", {
                let hidden = PyDict::new(py);
                hidden.set_item("unique_id", "UNIQUE_ID")?;
                hidden
            })?;

            Ok(dict.into())
        })
    }

    #[pyo3(name = "format_progress", signature = (index, total_count, unique_id = None))]
    fn format_progress<'py>(
        &mut self,
        py: Python<'py>,
        index: usize,
        total_count: usize,
        unique_id: Option<String>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let progress_text = format_progress_text(index, total_count);

        match self.node_result(py, &progress_text, unique_id.as_deref()) {
            Ok(v) => Ok(v),
            Err(e) => {
                error!("BatchProgressFormatter error, {e}");
                if let Err(e) =
                    self.send_error(py, "BatchProgressFormatter".to_string(), e.to_string())
                {
                    error!("send error failed, {e}");
                    return Err(PyErr::new::<PyRuntimeError, _>(e.to_string()));
                };
                Err(PyErr::new::<PyRuntimeError, _>(e.to_string()))
            }
        }
    }
}

impl BatchProgressFormatter {
    /// 组合为前端需要的数据结构, 并实时推送到前端
    fn node_result<'py>(
        &self,
        py: Python<'py>,
        progress_text: &str,
        unique_id: Option<&str>,
    ) -> Result<Bound<'py, PyDict>, Error> {
        let ui = PyDict::new(py);
        ui.set_item("text", vec![progress_text])?;

        if let Some(unique_id) = unique_id {
            let sent = self.broadcast_executed(py, unique_id, &ui)?;
            debug!("progress {progress_text} broadcast: {sent}");
        }

        let dict = PyDict::new(py);
        dict.set_item("ui", ui)?;
        dict.set_item("result", (progress_text,))?;
        Ok(dict)
    }
}

#[cfg(test)]
mod tests {
    use pyo3::types::PyAnyMethods;

    use super::*;

    #[test]
    fn test_format_progress_text() {
        assert_eq!(format_progress_text(0, 10), "1 of 10 (10%)");
        assert_eq!(format_progress_text(2, 10), "3 of 10 (30%)");
        assert_eq!(format_progress_text(9, 10), "10 of 10 (100%)");
    }

    #[test]
    fn test_percentage_floors() {
        assert_eq!(format_progress_text(0, 3), "1 of 3 (33%)");
        assert_eq!(format_progress_text(1, 3), "2 of 3 (66%)");
        assert_eq!(format_progress_text(28, 100), "29 of 100 (29%)");
    }

    #[test]
    fn test_format_progress_without_host() -> anyhow::Result<()> {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| -> anyhow::Result<()> {
            let mut formatter = BatchProgressFormatter::new();

            for unique_id in [None, Some("7".to_string())] {
                let result = formatter.format_progress(py, 2, 10, unique_id)?;
                let ui = result
                    .get_item("ui")?
                    .ok_or_else(|| anyhow::anyhow!("missing ui"))?;
                let text: Vec<String> = ui.get_item("text")?.extract()?;
                assert_eq!(text, ["3 of 10 (30%)"]);

                let (progress_text,): (String,) = result
                    .get_item("result")?
                    .ok_or_else(|| anyhow::anyhow!("missing result"))?
                    .extract()?;
                assert_eq!(progress_text, "3 of 10 (30%)");
            }
            Ok(())
        })
    }

    #[test]
    fn test_zero_total() {
        assert_eq!(format_progress_text(0, 0), "1 of 1 (100%)");
    }
}
