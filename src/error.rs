pub type DrawscopeResult<T> = Result<T, DrawscopeError>;

/// Recoverable failures: resource allocation, shader build, replay misuse.
///
/// Contract violations (restore without backup, unknown uniform kind during
/// variant sync, syncing a variant that was never created) are visualizer
/// programming defects and panic instead of travelling through this type.
#[derive(thiserror::Error, Debug)]
pub enum DrawscopeError {
    #[error("shader error: {0}")]
    Shader(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("replay error: {0}")]
    Replay(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DrawscopeError {
    pub fn shader(msg: impl Into<String>) -> Self {
        Self::Shader(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn replay(msg: impl Into<String>) -> Self {
        Self::Replay(msg.into())
    }
}
