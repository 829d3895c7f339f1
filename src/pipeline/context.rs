use crate::config::EngineConfig;
use crate::document::{Content, Document};
use crate::error::{DocflowError, DocflowResult};
use crate::io::FileProvider;
use crate::logger::{LogLevel, TraceEvent, TraceSink};
use crate::metadata::{fold_key, MetaValue, Metadata};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-invocation state handed to every module
///
/// A context is cheap to clone: everything shared across a run sits behind an
/// `Arc`. The engine derives one context per pipeline phase and module, so the
/// trace events a module emits carry its pipeline, phase and module name.
///
/// # Example
/// ```
/// use docflow::pipeline::ExecutionContext;
///
/// let context = ExecutionContext::new("Pages");
/// let document = context.document("hello", [("Title", "Home")]);
///
/// assert_eq!(context.pipeline_name(), "Pages");
/// assert_eq!(document.metadata().get_string("title").unwrap(), "Home");
/// ```
#[derive(Clone)]
pub struct ExecutionContext {
    run_id: Uuid,
    pipeline: Arc<str>,
    phase: super::Phase,
    module: Option<Arc<str>>,
    sink: Arc<TraceSink>,
    cancellation: CancellationToken,
    config: Arc<EngineConfig>,
    outputs: Arc<HashMap<String, Vec<Document>>>,
    file_provider: Option<Arc<dyn FileProvider>>,
    concurrency: Option<Arc<Semaphore>>,
    /// Set inside a fan-out unit; nested fan-outs run under the unit's permit
    in_fan_out: bool,
}

impl ExecutionContext {
    /// Create a standalone context for a pipeline
    pub fn new(pipeline: impl Into<String>) -> Self {
        let config = EngineConfig::default();
        let pipeline: String = pipeline.into();
        Self {
            run_id: Uuid::new_v4(),
            pipeline: Arc::from(pipeline),
            phase: super::Phase::Input,
            module: None,
            sink: Arc::new(TraceSink::new(config.trace_capacity)),
            cancellation: CancellationToken::new(),
            config: Arc::new(config),
            outputs: Arc::new(HashMap::new()),
            file_provider: None,
            concurrency: None,
            in_fan_out: false,
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_sink(mut self, sink: Arc<TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Use `config`, sizing the fan-out limit from `max_concurrency`
    pub fn with_config(mut self, config: Arc<EngineConfig>) -> Self {
        self.concurrency = config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit)));
        self.config = config;
        self
    }

    /// Share an existing fan-out limit across contexts of one run
    pub(crate) fn with_concurrency(mut self, limit: Option<Arc<Semaphore>>) -> Self {
        self.concurrency = limit;
        self
    }

    /// Outputs of completed pipelines, keyed by pipeline name
    pub fn with_outputs(mut self, outputs: HashMap<String, Vec<Document>>) -> Self {
        let folded = outputs
            .into_iter()
            .map(|(name, documents)| (fold_key(&name), documents))
            .collect();
        self.outputs = Arc::new(folded);
        self
    }

    pub(crate) fn with_shared_outputs(
        mut self,
        outputs: Arc<HashMap<String, Vec<Document>>>,
    ) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_file_provider(mut self, provider: Arc<dyn FileProvider>) -> Self {
        self.file_provider = Some(provider);
        self
    }

    /// Context for another phase of the same pipeline
    pub fn for_phase(&self, phase: super::Phase) -> Self {
        let mut context = self.clone();
        context.phase = phase;
        context.module = None;
        context
    }

    /// Context for a module invocation
    pub fn for_module(&self, module: &str) -> Self {
        let mut context = self.clone();
        context.module = Some(Arc::from(module));
        context
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline
    }

    pub fn phase(&self) -> super::Phase {
        self.phase
    }

    /// Module currently executing, if any
    pub fn module_name(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn sink(&self) -> &Arc<TraceSink> {
        &self.sink
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn file_provider(&self) -> Option<&Arc<dyn FileProvider>> {
        self.file_provider.as_ref()
    }

    pub(crate) fn concurrency(&self) -> Option<&Arc<Semaphore>> {
        self.concurrency.as_ref()
    }

    /// Context handed to a fan-out unit
    pub(crate) fn for_fan_out_unit(&self) -> Self {
        let mut context = self.clone();
        context.in_fan_out = true;
        context
    }

    /// Whether this context belongs to a running fan-out unit
    pub fn in_fan_out(&self) -> bool {
        self.in_fan_out
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fail with `Cancelled` once the run's cancellation signal is raised
    pub fn check_cancelled(&self) -> DocflowResult<()> {
        if self.cancellation.is_cancelled() {
            Err(DocflowError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Output documents of a pipeline that completed earlier in this run
    pub fn outputs(&self, pipeline: &str) -> Option<&[Document]> {
        self.outputs.get(&fold_key(pipeline)).map(Vec::as_slice)
    }

    /// Create a root document using this run's metadata settings
    pub fn document<I, K, V>(&self, content: impl Into<Content>, metadata: I) -> Document
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetaValue>,
    {
        let metadata = Metadata::new()
            .with_resolution_limit(self.config.metadata_resolution_limit)
            .clone_with(metadata);
        Document::new(content, metadata)
    }

    /// Trace event pre-filled with this context's pipeline, phase and module
    pub fn event(&self, level: LogLevel, message: impl Into<String>) -> TraceEvent {
        let event = TraceEvent::new(level, message)
            .pipeline(&*self.pipeline)
            .phase(self.phase.as_str());
        match &self.module {
            Some(module) => event.module(&**module),
            None => event,
        }
    }

    pub fn trace(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.record(self.event(level, message));
    }

    pub fn trace_document(&self, level: LogLevel, document: &Document, message: impl Into<String>) {
        self.sink
            .record(self.event(level, message).document(document.source_display()));
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("pipeline", &self.pipeline)
            .field("phase", &self.phase)
            .field("module", &self.module)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Phase;

    #[test]
    fn test_context_creation() {
        let context = ExecutionContext::new("Pages");
        assert_eq!(context.pipeline_name(), "Pages");
        assert_eq!(context.phase(), Phase::Input);
        assert!(context.module_name().is_none());
        assert!(!context.is_cancelled());
    }

    #[test]
    fn test_phase_and_module_scoping() {
        let context = ExecutionContext::new("Pages").for_phase(Phase::Transform);
        let module_context = context.for_module("Render");

        assert_eq!(module_context.phase(), Phase::Transform);
        assert_eq!(module_context.module_name(), Some("Render"));
        assert!(context.module_name().is_none());
        assert_eq!(module_context.run_id(), context.run_id());
    }

    #[test]
    fn test_cancellation() {
        let token = CancellationToken::new();
        let context = ExecutionContext::new("Pages").with_cancellation(token.clone());
        assert!(context.check_cancelled().is_ok());

        token.cancel();
        assert!(context.is_cancelled());
        assert!(matches!(
            context.check_cancelled(),
            Err(DocflowError::Cancelled)
        ));
    }

    #[test]
    fn test_outputs_are_case_insensitive() {
        let document = Document::new("a", Metadata::new());
        let mut outputs = HashMap::new();
        outputs.insert("Base".to_string(), vec![document.clone()]);

        let context = ExecutionContext::new("Derived").with_outputs(outputs);
        assert_eq!(context.outputs("base").map(|d| d.len()), Some(1));
        assert!(context.outputs("other").is_none());
    }

    #[test]
    fn test_document_uses_configured_limit() {
        let config = EngineConfig::builder()
            .metadata_resolution_limit(3)
            .build()
            .unwrap();
        let context = ExecutionContext::new("Pages").with_config(Arc::new(config));
        let document = context.document("", [("A", 1)]);
        assert_eq!(document.metadata().resolution_limit(), 3);
    }

    #[test]
    fn test_trace_carries_context() {
        let context = ExecutionContext::new("Pages")
            .for_phase(Phase::Process)
            .for_module("Render");
        let document = Document::builder().source("/in/a.md").build();
        context.trace_document(LogLevel::Warn, &document, "slow render");

        let events = context.sink().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pipeline.as_deref(), Some("Pages"));
        assert_eq!(events[0].phase.as_deref(), Some("Process"));
        assert_eq!(events[0].module.as_deref(), Some("Render"));
        assert_eq!(events[0].document.as_deref(), Some("/in/a.md"));
    }
}
