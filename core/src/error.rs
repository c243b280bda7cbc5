use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipError {
    #[error("clipboard unavailable: {0}")]
    ClipboardIo(String),

    #[error("history index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("failed to encode clipboard image: {0}")]
    Image(#[from] image::ImageError),

    #[error("hotkey registration failed: {0}")]
    Hotkey(String),

    #[error("idle time unavailable: {0}")]
    Idle(String),
}

pub type Result<T> = std::result::Result<T, ClipError>;
