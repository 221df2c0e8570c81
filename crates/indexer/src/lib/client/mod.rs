pub mod beacon;
pub mod execution;
pub mod reliable;

#[derive(Debug, thiserror::Error)]
pub enum InitializationError {
    #[error("Failed to build HTTP client: {0:?}")]
    HttpClient(#[from] reqwest::Error),
}
