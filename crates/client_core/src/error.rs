use shared::error::{ErrorCode, ErrorReport};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("unsupported controller kind `{0}`")]
    UnsupportedRequestKind(String),
}

impl From<&ControllerError> for ErrorReport {
    fn from(value: &ControllerError) -> Self {
        match value {
            ControllerError::UnsupportedRequestKind(_) => {
                ErrorReport::new(ErrorCode::UnsupportedRequestKind, value.to_string())
            }
        }
    }
}
