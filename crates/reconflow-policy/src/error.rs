use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
  #[error("catalog lookup failed for '{slug}': {message}")]
  Catalog { slug: String, message: String },
}
