/// Typed errors for the denoising pipeline.
///
/// `Configuration` is raised before a run starts. Everything else is scoped
/// to a single file and is reported as an event while the batch continues.
#[derive(Debug, thiserror::Error)]
pub enum DenoiseError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Invalid noise window: {0}")]
    InvalidWindow(String),
    #[error("Invalid denoise parameters: {0}")]
    InvalidDenoiseParameters(String),
    #[error("Invalid filter spec: {0}")]
    InvalidFilterSpec(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DenoiseError>;
