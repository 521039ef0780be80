use serde::{ser::Serializer, Serialize};
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error("Invalid {field}: {reason}")]
  Validation { field: &'static str, reason: String },
  #[error("Cannot {operation} stream: {reason}")]
  Lifecycle {
    operation: &'static str,
    reason: &'static str,
  },
  #[error("Camera error: {0}")]
  CameraError(String),
  #[error("Camera did not complete {0} within {1:?}")]
  Timeout(&'static str, Duration),
  #[error("Failed to write frame to client {0}")]
  Write(String),
}

impl Error {
  pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
    Error::Validation {
      field,
      reason: reason.into(),
    }
  }

  pub(crate) fn lifecycle(operation: &'static str, reason: &'static str) -> Self {
    Error::Lifecycle { operation, reason }
  }

  pub fn is_validation(&self) -> bool {
    matches!(self, Error::Validation { .. })
  }

  pub fn is_lifecycle(&self) -> bool {
    matches!(self, Error::Lifecycle { .. })
  }

  /// Hardware failures, including lifecycle operations that timed out.
  pub fn is_camera(&self) -> bool {
    matches!(self, Error::CameraError(_) | Error::Timeout(..))
  }
}

impl Serialize for Error {
  fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(self.to_string().as_ref())
  }
}
