//! 错误处理

#[allow(unused)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // 标准库错误处理
    #[error("io error, {0}")]
    Io(std::io::Error),
    // std::sync::poison::rwlock
    #[error("lock error, {0}")]
    LockError(String),
    #[error("option none, {0}")]
    OptionNone(String),
    #[error("strum error, {0}")]
    ParseEnumString(String),

    #[error("serde json error, {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("regex error, {0}")]
    RegexError(#[from] regex::Error),
    #[error("http request error, {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("py error, {0}")]
    PyErr(#[from] pyo3::PyErr),
    #[error("pythonize error, {0}")]
    PythonizeError(#[from] pythonize::PythonizeError),
    #[error("py downcast error, {0}")]
    PyDowncastError(String),

    #[error("tensor error, {0}")]
    TensorErr(#[from] candle_core::Error),
    #[error("invalid tensor shape, {0}")]
    InvalidTensorShape(String),

    #[error("image error, {0}")]
    ImageError(#[from] image::ImageError),
    #[error("creating image buffer error")]
    ImageBuffer,
    #[error("unsupported number of channels: {0}")]
    UnsupportedNumberOfChannels(u32),
    #[error("png encoding error, {0}")]
    PngEncodingError(#[from] png::EncodingError),

    #[error("invalid directory, {0}")]
    InvalidDirectory(String),
    #[error("no images found matching pattern: {0}")]
    NoImagesFound(String),
    #[error("failed to load image {0}: {1}")]
    LoadFailed(String, String),
    #[error("failed to load any images from directory - all files skipped or failed")]
    AllImagesFailed,
    #[error("could not find unique filename after {0} attempts")]
    RenameExhausted(usize),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
