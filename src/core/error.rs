use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame has zero dimension: {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },
    #[error("Pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },
    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Resize failed for {width}x{height} frame")]
    Resize { width: u32, height: u32 },
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Inference backend error: {0}")]
    Backend(String),
    #[error("Score out of range: {0}")]
    InvalidScore(f32),
    #[error("Model produced no output")]
    EmptyOutput,
    #[error("Model load failed: {0}")]
    ModelLoad(String),
    #[error("Tensor shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        actual: [usize; 4],
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] json5::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A capture session is already running")]
    AlreadyRunning,
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to build async runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
