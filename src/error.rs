#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Profiler(#[from] cyclescope_runtime::Error),

    #[error("invalid workload: {0}")]
    InvalidWorkload(String),

    #[error("failed to encode report as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
