//! 批量图片处理节点
use pyo3::{
    types::{PyModule, PyModuleMethods},
    Bound, PyResult, Python,
};

use crate::core::node::NodeRegister;

mod batch_image_loader;
pub use batch_image_loader::{BatchImageLoader, ErrorHandling, IterationMode};

mod batch_image_saver;
pub use batch_image_saver::BatchImageSaver;

mod progress_formatter;
pub use progress_formatter::{format_progress_text, BatchProgressFormatter};

/// 批处理模块
pub fn submodule(py: Python<'_>) -> PyResult<Bound<'_, PyModule>> {
    let submodule = PyModule::new(py, "batch")?;
    submodule.add_class::<BatchImageLoader>()?;
    submodule.add_class::<BatchImageSaver>()?;
    submodule.add_class::<BatchProgressFormatter>()?;
    Ok(submodule)
}

/// Batch node register
pub fn node_register(py: Python<'_>) -> PyResult<Vec<NodeRegister<'_>>> {
    let nodes: Vec<NodeRegister> = vec![
        NodeRegister(
            "BatchImageLoader",
            py.get_type::<BatchImageLoader>(),
            "Batch Image Loader",
        ),
        NodeRegister(
            "BatchImageSaver",
            py.get_type::<BatchImageSaver>(),
            "Batch Image Saver",
        ),
        NodeRegister(
            "BatchProgressFormatter",
            py.get_type::<BatchProgressFormatter>(),
            "Batch Progress Formatter",
        ),
    ];
    Ok(nodes)
}
