/// Typed failures surfaced by the engine. Every command failure is converted
/// into an `Error` event carrying one of these; the worker loop itself never
/// aborts on a command failure.
#[derive(Debug, thiserror::Error)]
pub enum DictError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed index: {reason}")]
    Parse { reason: String },

    #[error("malformed dictionary data: {reason}")]
    Format { reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown dictionary: {name}")]
    NotFound { name: String },

    #[error("download cancelled: {name}")]
    Cancelled { name: String },

    #[error("engine is closed")]
    Closed,
}

impl DictError {
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse { reason: reason.into() }
    }

    pub fn format(reason: impl Into<String>) -> Self {
        Self::Format { reason: reason.into() }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
