use std::fmt;
use thiserror::Error;

/// Central error type for the docflow engine
#[derive(Error, Debug)]
pub enum DocflowError {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("Pipeline '{pipeline}' depends on unknown pipeline '{dependency}'")]
    UnknownDependency { pipeline: String, dependency: String },

    #[error("Cyclic pipeline dependency: {}", .pipelines.join(" -> "))]
    CyclicDependency { pipelines: Vec<String> },

    #[error("Duplicate pipeline name: {0}")]
    DuplicatePipeline(String),

    #[error("Pipeline '{pipeline}' depends on excluded manual pipeline '{dependency}'")]
    ExcludedDependency { pipeline: String, dependency: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ============================================================================
    // Execution Errors
    // ============================================================================
    #[error("Module '{module}' failed in {phase} phase of pipeline '{pipeline}': {source}")]
    ModuleExecution {
        pipeline: String,
        phase: String,
        module: String,
        #[source]
        source: Box<DocflowError>,
    },

    #[error("{} document(s) failed during fan-out: {}", .0.len(), FanOutSummary(.0))]
    AggregateFanOut(Vec<FanOutFailure>),

    #[error("Execution was cancelled")]
    Cancelled,

    #[error("Task join error: {0}")]
    TaskJoin(String),

    // ============================================================================
    // Metadata Errors
    // ============================================================================
    #[error("Required metadata key not found: {0}")]
    MissingMetadata(String),

    #[error("Metadata key '{key}' is not a {expected}")]
    MetadataType { key: String, expected: &'static str },

    #[error("Metadata key '{key}' exceeded the deferred resolution limit of {limit}")]
    MetadataResolution { key: String, limit: usize },

    // ============================================================================
    // Content Errors
    // ============================================================================
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read content: {0}")]
    ContentRead(String),

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mutex lock error")]
    LockError,

    /// Builder pattern validation error
    #[error("Builder error: {0}")]
    BuilderError(String),

    #[error("{0}")]
    GenericError(String),
}

/// One failed unit of a fan-out
#[derive(Debug)]
pub struct FanOutFailure {
    /// Position of the document in the fan-out input
    pub index: usize,

    /// Identity of the failing document
    pub document_id: uuid::Uuid,

    /// Display form of the document source, "unknown" if it has none
    pub source: String,

    /// Module that was executing
    pub module: String,

    /// The failure raised by the unit
    pub error: DocflowError,
}

impl fmt::Display for FanOutFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} in module {}: {}",
            self.index, self.source, self.module, self.error
        )
    }
}

struct FanOutSummary<'a>(&'a [FanOutFailure]);

impl fmt::Display for FanOutSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl DocflowError {
    /// Whether this error was detected while planning a run, before any module executed
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            DocflowError::UnknownPipeline(_)
                | DocflowError::UnknownDependency { .. }
                | DocflowError::CyclicDependency { .. }
                | DocflowError::DuplicatePipeline(_)
                | DocflowError::ExcludedDependency { .. }
                | DocflowError::InvalidConfig(_)
        )
    }

    /// Whether this error reports a cancelled run rather than a data failure
    pub fn is_cancelled(&self) -> bool {
        match self {
            DocflowError::Cancelled => true,
            DocflowError::ModuleExecution { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

// Implement conversion from PoisonError for Mutex locks
impl<T> From<std::sync::PoisonError<T>> for DocflowError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        DocflowError::LockError
    }
}

// Automatic conversion from String (for module authors returning plain messages)
impl From<String> for DocflowError {
    fn from(err: String) -> Self {
        DocflowError::GenericError(err)
    }
}

impl From<&str> for DocflowError {
    fn from(err: &str) -> Self {
        DocflowError::GenericError(err.to_string())
    }
}

// Helper type alias for Results
pub type DocflowResult<T> = Result<T, DocflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DocflowError::CyclicDependency {
            pipelines: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert_eq!(err.to_string(), "Cyclic pipeline dependency: A -> B -> A");
    }

    #[test]
    fn test_configuration_classification() {
        assert!(DocflowError::UnknownPipeline("x".to_string()).is_configuration_error());
        assert!(DocflowError::DuplicatePipeline("x".to_string()).is_configuration_error());
        assert!(!DocflowError::Cancelled.is_configuration_error());
    }

    #[test]
    fn test_cancelled_through_module_wrapper() {
        let err = DocflowError::ModuleExecution {
            pipeline: "Pages".to_string(),
            phase: "Process".to_string(),
            module: "Render".to_string(),
            source: Box::new(DocflowError::Cancelled),
        };
        assert!(err.is_cancelled());
        assert!(!DocflowError::LockError.is_cancelled());
    }

    #[test]
    fn test_fan_out_display_lists_every_failure() {
        let err = DocflowError::AggregateFanOut(vec![
            FanOutFailure {
                index: 3,
                document_id: uuid::Uuid::nil(),
                source: "a.md".to_string(),
                module: "Render".to_string(),
                error: DocflowError::from("bad front matter"),
            },
            FanOutFailure {
                index: 7,
                document_id: uuid::Uuid::nil(),
                source: "b.md".to_string(),
                module: "Render".to_string(),
                error: DocflowError::from("missing layout"),
            },
        ]);
        let message = err.to_string();
        assert!(message.starts_with("2 document(s) failed"));
        assert!(message.contains("[3] a.md in module Render: bad front matter"));
        assert!(message.contains("[7] b.md in module Render: missing layout"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DocflowError = io_err.into();
        assert!(matches!(err, DocflowError::Io(_)));
    }
}
