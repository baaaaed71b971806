use crate::shader::Diagnostic;

/// Result alias that carries the custom [`BeatlineError`] type.
pub type Result<T> = std::result::Result<T, BeatlineError>;

/// Common error type for the core crate.
///
/// Frame-path failures (a shader that stops compiling mid-show, a binding
/// pointing at the wrong kind of texture, a scene cycle) never surface here:
/// they are logged and the frame degrades. This type is what host-facing
/// operations such as project loading or an explicit compile return.
#[derive(Debug, thiserror::Error)]
pub enum BeatlineError {
    /// Free-form message for conditions that do not deserve their own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Project or configuration documents that failed to parse.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("scene index {index} is out of range ({count} scenes)")]
    SceneIndex { index: usize, count: usize },
    /// A shader unit failed to produce a pipeline.
    #[error("`{unit}` failed to compile ({} diagnostics)", diagnostics.len())]
    Compile {
        unit: String,
        diagnostics: Vec<Diagnostic>,
    },
    /// The GPU device refused an allocation or a submission.
    #[error("gpu: {0}")]
    Gpu(String),
}

impl BeatlineError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn gpu<T: Into<String>>(msg: T) -> Self {
        Self::Gpu(msg.into())
    }
}

impl From<&str> for BeatlineError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BeatlineError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
