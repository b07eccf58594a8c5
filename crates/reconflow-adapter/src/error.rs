use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("{0}")]
  Failed(String),
}
