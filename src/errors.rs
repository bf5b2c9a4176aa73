use thiserror::Error;

pub type Result<T> = std::result::Result<T, AvatarError>;

#[derive(Error, Debug)]
pub enum AvatarError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid image data: {0}")]
    Decode(String),
    #[error("Item is unavailable: {0}")]
    FetchUnavailable(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Parsing error")]
    Parse,
    #[error("Storage error: {0} {1}")]
    Storage(String, String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<image::ImageError> for AvatarError {
    fn from(value: image::ImageError) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<serde_json::Error> for AvatarError {
    fn from(_: serde_json::Error) -> Self {
        Self::Parse
    }
}

impl From<base64::DecodeError> for AvatarError {
    fn from(value: base64::DecodeError) -> Self {
        Self::Decode(value.to_string())
    }
}
