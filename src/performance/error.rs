//! Harness error taxonomy

use std::path::PathBuf;

/// Errors raised by the harness core.
///
/// Adapter and analyzer failures are always surfaced to the caller. The
/// only place a failure is downgraded is the batch baseline comparison,
/// which logs and skips unknown benchmarks.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("cannot compute statistics for '{name}': no samples")]
    EmptyInput { name: String },

    /// A NaN or infinite timing; `index` is the sample position when known
    #[error("benchmark '{name}' has a non-finite value ({value})")]
    InvalidSample {
        name: String,
        index: Option<usize>,
        value: f64,
    },

    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("load test execution failed ({tool}): {message}")]
    LoadTestExecution { tool: String, message: String },

    /// `origin` names what was parsed: a result file path or a tool's stdout
    #[error("failed to parse load test result from {origin}: {message}")]
    ResultParse { origin: String, message: String },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("benchmark '{name}' not found in baseline")]
    BenchmarkNotFound { name: String },

    #[error("malformed baseline {}: {source}", path.display())]
    BaselineParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub(crate) fn execution(tool: &str, message: impl Into<String>) -> Self {
        Self::LoadTestExecution {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
