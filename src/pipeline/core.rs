use crate::document::Document;
use crate::error::{DocflowError, DocflowResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::context::ExecutionContext;

/// A single transformation step
///
/// A module turns an ordered list of input documents into a freshly built
/// ordered list of output documents. Inputs are never mutated; a module that
/// changes a document returns a clone made with [`Document::clone_with`].
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use docflow::document::Document;
/// use docflow::error::DocflowResult;
/// use docflow::pipeline::{ExecutionContext, Module};
///
/// struct Uppercase;
///
/// #[async_trait]
/// impl Module for Uppercase {
///     async fn execute(
///         &self,
///         inputs: &[Document],
///         context: &ExecutionContext,
///     ) -> DocflowResult<Vec<Document>> {
///         context
///             .for_each_document(inputs, |doc| async move {
///                 let upper = doc.read_to_string()?.to_uppercase();
///                 Ok(vec![doc.with_content(upper)])
///             })
///             .await
///     }
///
///     fn name(&self) -> &str {
///         "Uppercase"
///     }
/// }
/// ```
#[async_trait]
pub trait Module: Send + Sync {
    /// Execute this module
    ///
    /// Returning an error stops the enclosing phase and pipeline.
    async fn execute(
        &self,
        inputs: &[Document],
        context: &ExecutionContext,
    ) -> DocflowResult<Vec<Document>>;

    /// Module name for logging and diagnostics
    fn name(&self) -> &str;
}

/// The four phases of a pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Input,
    Process,
    Transform,
    Output,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Input, Phase::Process, Phase::Transform, Phase::Output];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Input => "Input",
            Phase::Process => "Process",
            Phase::Transform => "Transform",
            Phase::Output => "Output",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a pipeline runs without being selected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionPolicy {
    /// Runs unless excluded, and whenever a running pipeline depends on it
    #[default]
    Default,
    /// Runs on every invocation
    Always,
    /// Runs only when selected or depended upon
    Manual,
}

/// Result of one phase of a pipeline
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase: Phase,

    /// Number of modules in the phase
    pub module_count: usize,

    pub input_documents: usize,

    /// Zero when the phase failed
    pub output_documents: usize,

    pub duration: Duration,

    pub success: bool,

    /// Module that failed, if any
    pub failed_module: Option<String>,
}

impl PhaseResult {
    pub fn success(
        phase: Phase,
        module_count: usize,
        input_documents: usize,
        output_documents: usize,
        duration: Duration,
    ) -> Self {
        Self {
            phase,
            module_count,
            input_documents,
            output_documents,
            duration,
            success: true,
            failed_module: None,
        }
    }

    pub fn failure(
        phase: Phase,
        module_count: usize,
        input_documents: usize,
        failed_module: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            phase,
            module_count,
            input_documents,
            output_documents: 0,
            duration,
            success: false,
            failed_module: Some(failed_module.into()),
        }
    }
}

/// Why a pipeline did not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Not part of the candidate set for this run
    NotSelected,
    /// A pipeline it depends on failed, was skipped or was cancelled
    UpstreamFailed { upstream: String },
}

/// Final state of one pipeline in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    Succeeded,
    Failed,
    Skipped(SkipReason),
    Cancelled,
}

/// Result of a complete pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub pipeline_name: String,

    pub status: PipelineStatus,

    /// Results from each phase that ran
    pub phase_results: Vec<PhaseResult>,

    /// Output phase documents, empty unless the pipeline succeeded
    pub documents: Vec<Document>,

    pub error: Option<Arc<DocflowError>>,

    pub total_duration: Duration,
}

impl PipelineReport {
    pub fn success(
        pipeline_name: impl Into<String>,
        phase_results: Vec<PhaseResult>,
        documents: Vec<Document>,
        total_duration: Duration,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            status: PipelineStatus::Succeeded,
            phase_results,
            documents,
            error: None,
            total_duration,
        }
    }

    pub fn failure(
        pipeline_name: impl Into<String>,
        phase_results: Vec<PhaseResult>,
        error: DocflowError,
        total_duration: Duration,
    ) -> Self {
        let status = if error.is_cancelled() {
            PipelineStatus::Cancelled
        } else {
            PipelineStatus::Failed
        };
        Self {
            pipeline_name: pipeline_name.into(),
            status,
            phase_results,
            documents: Vec::new(),
            error: Some(Arc::new(error)),
            total_duration,
        }
    }

    pub fn skipped(pipeline_name: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            status: PipelineStatus::Skipped(reason),
            phase_results: Vec::new(),
            documents: Vec::new(),
            error: None,
            total_duration: Duration::from_secs(0),
        }
    }

    pub fn cancelled(pipeline_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            status: PipelineStatus::Cancelled,
            phase_results: Vec::new(),
            documents: Vec::new(),
            error: None,
            total_duration: Duration::from_secs(0),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, PipelineStatus::Skipped(_))
    }

    /// Get the phase that failed (if any)
    pub fn failed_phase(&self) -> Option<&PhaseResult> {
        self.phase_results.iter().find(|r| !r.success)
    }

    /// Convert into a result carrying the output documents
    pub fn into_result(self) -> DocflowResult<Vec<Document>> {
        match (self.status, self.error) {
            (PipelineStatus::Succeeded, _) => Ok(self.documents),
            (PipelineStatus::Cancelled, _) => Err(DocflowError::Cancelled),
            (_, Some(error)) => Err(DocflowError::GenericError(error.to_string())),
            (PipelineStatus::Skipped(reason), None) => Err(DocflowError::GenericError(format!(
                "Pipeline '{}' was skipped: {:?}",
                self.pipeline_name, reason
            ))),
            (PipelineStatus::Failed, None) => Err(DocflowError::GenericError(format!(
                "Pipeline '{}' failed",
                self.pipeline_name
            ))),
        }
    }
}
