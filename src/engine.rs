//! Engine: pipeline registry and run orchestration
//!
//! The engine owns the registered pipelines in declaration order. A run plans
//! the candidate pipelines with the [`DependencyScheduler`], then executes each
//! wave concurrently, one task per pipeline. Outputs of completed pipelines are
//! shared read-only with later waves.

use crate::config::EngineConfig;
use crate::document::Document;
use crate::error::{DocflowError, DocflowResult};
use crate::io::FileProvider;
use crate::logger::{LogLevel, TraceSink};
use crate::metadata::fold_key;
use crate::pipeline::{
    DependencyScheduler, ExecutionContext, ExecutionPlan, Pipeline, PipelineReport,
    PipelineStatus, RunRequest, SkipReason,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Succeeded,
    /// At least one pipeline failed or was skipped because an upstream failed
    Failed,
    Cancelled,
}

/// A pipeline that failed during a run
#[derive(Debug, Clone)]
pub struct PipelineFailure {
    pub pipeline: String,
    pub error: Arc<DocflowError>,
}

/// Result of [`Engine::run`]
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,

    /// One report per registered pipeline, in declaration order
    pub pipelines: Vec<PipelineReport>,

    pub failures: Vec<PipelineFailure>,
    pub plan: ExecutionPlan,
    pub duration: Duration,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn report(&self, pipeline: &str) -> Option<&PipelineReport> {
        let folded = fold_key(pipeline);
        self.pipelines
            .iter()
            .find(|r| fold_key(&r.pipeline_name) == folded)
    }

    pub fn status_of(&self, pipeline: &str) -> Option<&PipelineStatus> {
        self.report(pipeline).map(|r| &r.status)
    }

    /// Final documents of a pipeline that succeeded in this run
    pub fn outputs(&self, pipeline: &str) -> Option<&[Document]> {
        self.report(pipeline)
            .filter(|r| r.succeeded())
            .map(|r| r.documents.as_slice())
    }
}

/// Registry and runner for pipelines
///
/// # Example
/// ```
/// use docflow::engine::Engine;
/// use docflow::pipeline::{Pipeline, RunRequest};
///
/// let mut engine = Engine::new();
/// engine.register_pipeline(Pipeline::builder("Pages").build());
///
/// let runtime = tokio::runtime::Runtime::new().unwrap();
/// let result = runtime.block_on(engine.run(&RunRequest::new())).unwrap();
/// assert!(result.succeeded());
/// ```
pub struct Engine {
    pipelines: Vec<Arc<Pipeline>>,
    config: Arc<EngineConfig>,
    sink: Arc<TraceSink>,
    file_provider: Option<Arc<dyn FileProvider>>,
    cancellation: Mutex<CancellationToken>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Create an engine with the default configuration
    pub fn new() -> Self {
        Self::build(EngineConfig::default())
    }

    /// Create an engine with a validated configuration
    pub fn with_config(config: EngineConfig) -> DocflowResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        let sink = TraceSink::new(config.trace_capacity);
        sink.set_min_level(config.min_trace_level);
        Self {
            pipelines: Vec::new(),
            config: Arc::new(config),
            sink: Arc::new(sink),
            file_provider: None,
            cancellation: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_file_provider(mut self, provider: Arc<dyn FileProvider>) -> Self {
        self.file_provider = Some(provider);
        self
    }

    /// Register a pipeline, replacing any pipeline with the same name in place
    pub fn register_pipeline(&mut self, pipeline: Pipeline) {
        let folded = fold_key(pipeline.name());
        match self
            .pipelines
            .iter()
            .position(|p| fold_key(p.name()) == folded)
        {
            Some(index) => {
                tracing::debug!(pipeline = pipeline.name(), "Replacing pipeline");
                self.pipelines[index] = Arc::new(pipeline);
            }
            None => self.pipelines.push(Arc::new(pipeline)),
        }
    }

    /// Register a pipeline, failing if the name is already taken
    pub fn add_pipeline(&mut self, pipeline: Pipeline) -> DocflowResult<()> {
        if self.pipeline(pipeline.name()).is_some() {
            return Err(DocflowError::DuplicatePipeline(pipeline.name().to_string()));
        }
        self.pipelines.push(Arc::new(pipeline));
        Ok(())
    }

    pub fn pipeline(&self, name: &str) -> Option<&Arc<Pipeline>> {
        let folded = fold_key(name);
        self.pipelines.iter().find(|p| fold_key(p.name()) == folded)
    }

    /// Registered pipeline names in declaration order
    pub fn pipeline_names(&self) -> Vec<&str> {
        self.pipelines.iter().map(|p| p.name()).collect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn trace_sink(&self) -> &Arc<TraceSink> {
        &self.sink
    }

    /// Token that cancels the current or next run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.current_token()
    }

    /// Plan a run without executing anything
    pub fn plan(&self, request: &RunRequest) -> DocflowResult<ExecutionPlan> {
        DependencyScheduler::new(&self.pipelines).plan(request)
    }

    /// Execute the pipelines selected by `request`
    ///
    /// Configuration errors are returned before any module runs. Pipeline
    /// failures are reported in the [`RunResult`] instead.
    pub async fn run(&self, request: &RunRequest) -> DocflowResult<RunResult> {
        let run_id = Uuid::new_v4();
        let run_start = Instant::now();

        let plan = match self.plan(request) {
            Ok(plan) => plan,
            Err(error) => {
                self.sink
                    .log(LogLevel::Error, format!("Run {} not started: {}", run_id, error));
                return Err(error);
            }
        };

        self.sink.log(
            LogLevel::Info,
            format!(
                "Starting run {} with {} pipelines in {} waves",
                run_id,
                plan.candidates.len(),
                plan.waves.len()
            ),
        );

        let token = self.current_token();
        let concurrency = self
            .config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit)));
        let mut reports: HashMap<String, PipelineReport> = HashMap::new();
        let mut outputs: HashMap<String, Vec<Document>> = HashMap::new();

        for wave in &plan.waves {
            let shared_outputs = Arc::new(outputs.clone());
            let mut names = Vec::new();
            let mut tasks = Vec::new();

            for name in wave {
                let Some(pipeline) = self.pipeline(name).cloned() else {
                    continue;
                };

                if let Some(upstream) = self.failed_upstream(&pipeline, &reports) {
                    self.sink.log(
                        LogLevel::Warn,
                        format!("Skipping pipeline '{}': upstream '{}' did not succeed", name, upstream),
                    );
                    reports.insert(
                        fold_key(name),
                        PipelineReport::skipped(name, SkipReason::UpstreamFailed { upstream }),
                    );
                    continue;
                }

                if token.is_cancelled() {
                    reports.insert(fold_key(name), PipelineReport::cancelled(name));
                    continue;
                }

                let seed = if pipeline.is_isolated() {
                    Vec::new()
                } else {
                    pipeline
                        .dependencies()
                        .iter()
                        .filter_map(|dep| outputs.get(&fold_key(dep)))
                        .flat_map(|documents| documents.iter().cloned())
                        .collect()
                };

                let mut context = ExecutionContext::new(pipeline.name())
                    .with_run_id(run_id)
                    .with_sink(Arc::clone(&self.sink))
                    .with_cancellation(token.clone())
                    .with_config(Arc::clone(&self.config))
                    .with_concurrency(concurrency.clone())
                    .with_shared_outputs(Arc::clone(&shared_outputs));
                if let Some(provider) = &self.file_provider {
                    context = context.with_file_provider(Arc::clone(provider));
                }

                names.push(name.clone());
                tasks.push(tokio::spawn(async move {
                    pipeline.execute(seed, &context).await
                }));
            }

            let results = join_all(tasks).await;
            for (name, result) in names.into_iter().zip(results) {
                let report = result.unwrap_or_else(|e| {
                    PipelineReport::failure(
                        &name,
                        Vec::new(),
                        DocflowError::TaskJoin(e.to_string()),
                        Duration::from_secs(0),
                    )
                });
                if report.succeeded() {
                    outputs.insert(fold_key(&name), report.documents.clone());
                }
                reports.insert(fold_key(&name), report);
            }
        }

        let pipelines: Vec<PipelineReport> = self
            .pipelines
            .iter()
            .map(|p| {
                reports
                    .remove(&fold_key(p.name()))
                    .unwrap_or_else(|| PipelineReport::skipped(p.name(), SkipReason::NotSelected))
            })
            .collect();

        let failures: Vec<PipelineFailure> = pipelines
            .iter()
            .filter(|r| r.status == PipelineStatus::Failed)
            .filter_map(|r| {
                r.error.as_ref().map(|error| PipelineFailure {
                    pipeline: r.pipeline_name.clone(),
                    error: Arc::clone(error),
                })
            })
            .collect();

        let cancelled = token.is_cancelled()
            || pipelines.iter().any(|r| r.status == PipelineStatus::Cancelled);
        let failed = pipelines.iter().any(|r| {
            matches!(
                r.status,
                PipelineStatus::Failed | PipelineStatus::Skipped(SkipReason::UpstreamFailed { .. })
            )
        });
        let status = if cancelled {
            RunStatus::Cancelled
        } else if failed {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        if cancelled {
            self.reset_cancellation();
        }

        let duration = run_start.elapsed();
        let level = match status {
            RunStatus::Succeeded => LogLevel::Info,
            RunStatus::Failed => LogLevel::Error,
            RunStatus::Cancelled => LogLevel::Warn,
        };
        self.sink.log(
            level,
            format!(
                "Run {} finished as {:?} in {:.2}s ({} failures)",
                run_id,
                status,
                duration.as_secs_f64(),
                failures.len()
            ),
        );

        Ok(RunResult {
            run_id,
            status,
            pipelines,
            failures,
            plan,
            duration,
        })
    }

    /// First dependency of `pipeline` that did not succeed in this run
    fn failed_upstream(
        &self,
        pipeline: &Pipeline,
        reports: &HashMap<String, PipelineReport>,
    ) -> Option<String> {
        pipeline.dependencies().iter().find_map(|dep| {
            match reports.get(&fold_key(dep)) {
                Some(report) if report.succeeded() => None,
                Some(report) => Some(report.pipeline_name.clone()),
                None => Some(dep.clone()),
            }
        })
    }

    fn current_token(&self) -> CancellationToken {
        match self.cancellation.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swap in a fresh token once a run has observed cancellation
    fn reset_cancellation(&self) {
        let mut token = match self.cancellation.lock() {
            Ok(token) => token,
            Err(poisoned) => poisoned.into_inner(),
        };
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ExecutionPolicy, Module};
    use async_trait::async_trait;

    struct Emit(&'static str);

    #[async_trait]
    impl Module for Emit {
        async fn execute(
            &self,
            inputs: &[Document],
            context: &ExecutionContext,
        ) -> DocflowResult<Vec<Document>> {
            let mut outputs = inputs.to_vec();
            outputs.push(context.document(self.0, [("Origin", context.pipeline_name())]));
            Ok(outputs)
        }

        fn name(&self) -> &str {
            "Emit"
        }
    }

    #[test]
    fn test_register_replaces_in_place() {
        let mut engine = Engine::new();
        engine.register_pipeline(Pipeline::builder("A").build());
        engine.register_pipeline(Pipeline::builder("B").build());
        engine.register_pipeline(
            Pipeline::builder("a")
                .policy(ExecutionPolicy::Manual)
                .build(),
        );

        assert_eq!(engine.pipeline_names(), vec!["a", "B"]);
        assert_eq!(
            engine.pipeline("A").map(|p| p.policy()),
            Some(ExecutionPolicy::Manual)
        );
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let mut engine = Engine::new();
        engine.add_pipeline(Pipeline::builder("Pages").build()).unwrap();

        let error = engine
            .add_pipeline(Pipeline::builder("PAGES").build())
            .unwrap_err();
        assert!(matches!(error, DocflowError::DuplicatePipeline(name) if name == "PAGES"));
        assert_eq!(engine.pipeline_names().len(), 1);
    }

    #[test]
    fn test_with_config_applies_trace_level() {
        let config = EngineConfig::builder()
            .min_trace_level(LogLevel::Warn)
            .build()
            .unwrap();
        let engine = Engine::with_config(config).unwrap();

        assert_eq!(engine.trace_sink().min_level(), LogLevel::Warn);
        engine.trace_sink().log(LogLevel::Info, "hidden");
        assert!(engine.trace_sink().events().is_empty());
    }

    #[tokio::test]
    async fn test_run_collects_reports_for_every_pipeline() {
        let mut engine = Engine::new();
        engine.register_pipeline(Pipeline::builder("Pages").input(Emit("page")).build());
        engine.register_pipeline(
            Pipeline::builder("Drafts")
                .input(Emit("draft"))
                .policy(ExecutionPolicy::Manual)
                .build(),
        );

        let result = engine.run(&RunRequest::new()).await.unwrap();

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.pipelines.len(), 2);
        assert_eq!(
            result.status_of("drafts"),
            Some(&PipelineStatus::Skipped(SkipReason::NotSelected))
        );
        let pages = result.outputs("Pages").unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].metadata().get_string("Origin").unwrap(), "Pages");
        assert!(result.outputs("Drafts").is_none());
    }

    #[tokio::test]
    async fn test_cancellation_resets_after_run() {
        let mut engine = Engine::new();
        engine.register_pipeline(Pipeline::builder("Pages").input(Emit("page")).build());

        engine.cancellation_token().cancel();
        let cancelled = engine.run(&RunRequest::new()).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert_eq!(cancelled.status_of("Pages"), Some(&PipelineStatus::Cancelled));

        let next = engine.run(&RunRequest::new()).await.unwrap();
        assert_eq!(next.status, RunStatus::Succeeded);
    }
}
