use super::context::ExecutionContext;
use super::core::{ExecutionPolicy, Module, Phase, PhaseResult, PipelineReport};
use super::module_list::{ModuleList, ModuleListBuilder};
use crate::document::Document;
use crate::error::DocflowError;
use crate::logger::LogLevel;
use crate::metadata::fold_key;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A named unit of four module lists plus scheduling metadata
///
/// # Example
/// ```
/// use docflow::pipeline::{ExecutionPolicy, Pipeline};
///
/// let pipeline = Pipeline::builder("Feed")
///     .depends_on("Posts")
///     .policy(ExecutionPolicy::Manual)
///     .build();
///
/// assert_eq!(pipeline.dependencies(), ["Posts".to_string()]);
/// ```
pub struct Pipeline {
    name: String,
    input: ModuleList,
    process: ModuleList,
    transform: ModuleList,
    output: ModuleList,
    dependencies: Vec<String>,
    isolated: bool,
    policy: ExecutionPolicy,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Get the pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn modules(&self, phase: Phase) -> &ModuleList {
        match phase {
            Phase::Input => &self.input,
            Phase::Process => &self.process,
            Phase::Transform => &self.transform,
            Phase::Output => &self.output,
        }
    }

    /// Total number of modules across all phases
    pub fn module_count(&self) -> usize {
        Phase::ALL.iter().map(|p| self.modules(*p).len()).sum()
    }

    /// Dependency names in declaration order
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn depends_on(&self, name: &str) -> bool {
        let folded = fold_key(name);
        self.dependencies.iter().any(|d| fold_key(d) == folded)
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    /// Run the four phases in order over `seed`
    ///
    /// `seed` becomes the input of the first Input module. Each module gets the
    /// previous module's output; a phase without modules passes its input
    /// through. The first failing module stops the pipeline. Cancellation is
    /// checked before each module, and output produced after the signal was
    /// raised is discarded.
    pub async fn execute(&self, seed: Vec<Document>, context: &ExecutionContext) -> PipelineReport {
        context.trace(
            LogLevel::Info,
            format!(
                "Starting pipeline '{}' with {} modules and {} seed documents (run: {})",
                self.name,
                self.module_count(),
                seed.len(),
                context.run_id()
            ),
        );

        let pipeline_start = Instant::now();
        let mut phase_results = Vec::with_capacity(Phase::ALL.len());
        let mut documents = seed;

        for phase in Phase::ALL {
            let modules = self.modules(phase);
            let phase_context = context.for_phase(phase);
            let input_count = documents.len();

            if modules.is_empty() {
                phase_results.push(PhaseResult::success(
                    phase,
                    0,
                    input_count,
                    input_count,
                    Duration::from_secs(0),
                ));
                continue;
            }

            phase_context.trace(
                LogLevel::Debug,
                format!(
                    "Executing {} phase of '{}': {} modules over {} documents",
                    phase,
                    self.name,
                    modules.len(),
                    input_count
                ),
            );

            let phase_start = Instant::now();
            for (index, module) in modules.iter().enumerate() {
                let module_context = phase_context.for_module(module.name());

                if let Err(error) = module_context.check_cancelled() {
                    return self.cancelled(phase_results, error, pipeline_start.elapsed());
                }

                module_context.trace(
                    LogLevel::Debug,
                    format!(
                        "Executing module {}/{}: {}",
                        index + 1,
                        modules.len(),
                        module.name()
                    ),
                );

                let result = module_context
                    .trace_errors(None, module.execute(&documents, &module_context))
                    .await;

                match result {
                    Ok(outputs) => {
                        if let Err(error) = module_context.check_cancelled() {
                            return self.cancelled(phase_results, error, pipeline_start.elapsed());
                        }
                        documents = outputs;
                    }
                    Err(error) => {
                        phase_results.push(PhaseResult::failure(
                            phase,
                            modules.len(),
                            input_count,
                            module.name(),
                            phase_start.elapsed(),
                        ));
                        let error = self.wrap_module_error(phase, module.name(), error);
                        module_context.trace(
                            LogLevel::Error,
                            format!("Pipeline '{}' failed: {}", self.name, error),
                        );
                        return PipelineReport::failure(
                            &self.name,
                            phase_results,
                            error,
                            pipeline_start.elapsed(),
                        );
                    }
                }
            }

            phase_results.push(PhaseResult::success(
                phase,
                modules.len(),
                input_count,
                documents.len(),
                phase_start.elapsed(),
            ));
        }

        let total_duration = pipeline_start.elapsed();
        context.trace(
            LogLevel::Info,
            format!(
                "Pipeline '{}' completed with {} documents in {:.2}s",
                self.name,
                documents.len(),
                total_duration.as_secs_f64()
            ),
        );

        PipelineReport::success(&self.name, phase_results, documents, total_duration)
    }

    fn cancelled(
        &self,
        phase_results: Vec<PhaseResult>,
        error: DocflowError,
        elapsed: Duration,
    ) -> PipelineReport {
        tracing::info!(pipeline = %self.name, "Pipeline cancelled");
        PipelineReport::failure(&self.name, phase_results, error, elapsed)
    }

    fn wrap_module_error(&self, phase: Phase, module: &str, error: DocflowError) -> DocflowError {
        match error {
            DocflowError::AggregateFanOut(_) | DocflowError::Cancelled => error,
            other => DocflowError::ModuleExecution {
                pipeline: self.name.clone(),
                phase: phase.to_string(),
                module: module.to_string(),
                source: Box::new(other),
            },
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("process", &self.process)
            .field("transform", &self.transform)
            .field("output", &self.output)
            .field("dependencies", &self.dependencies)
            .field("isolated", &self.isolated)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Builder for constructing pipelines
pub struct PipelineBuilder {
    name: String,
    input: ModuleListBuilder,
    process: ModuleListBuilder,
    transform: ModuleListBuilder,
    output: ModuleListBuilder,
    dependencies: Vec<String>,
    isolated: bool,
    policy: ExecutionPolicy,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: ModuleListBuilder::new(),
            process: ModuleListBuilder::new(),
            transform: ModuleListBuilder::new(),
            output: ModuleListBuilder::new(),
            dependencies: Vec::new(),
            isolated: false,
            policy: ExecutionPolicy::Default,
        }
    }

    /// Append a module to a phase
    pub fn add_module<M: Module + 'static>(mut self, phase: Phase, module: M) -> Self {
        let list = self.list_mut(phase);
        *list = std::mem::take(list).add_module(module);
        self
    }

    /// Append a shared module to a phase
    pub fn add_shared_module(mut self, phase: Phase, module: Arc<dyn Module>) -> Self {
        let list = self.list_mut(phase);
        *list = std::mem::take(list).add_shared_module(module);
        self
    }

    /// Append every module of `modules` to a phase
    pub fn modules(mut self, phase: Phase, modules: ModuleList) -> Self {
        for module in modules.iter() {
            self = self.add_shared_module(phase, Arc::clone(module));
        }
        self
    }

    pub fn input<M: Module + 'static>(self, module: M) -> Self {
        self.add_module(Phase::Input, module)
    }

    pub fn process<M: Module + 'static>(self, module: M) -> Self {
        self.add_module(Phase::Process, module)
    }

    pub fn transform<M: Module + 'static>(self, module: M) -> Self {
        self.add_module(Phase::Transform, module)
    }

    pub fn output<M: Module + 'static>(self, module: M) -> Self {
        self.add_module(Phase::Output, module)
    }

    /// Declare a dependency; repeated names are ignored case-insensitively
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let folded = fold_key(&name);
        if !self.dependencies.iter().any(|d| fold_key(d) == folded) {
            self.dependencies.push(name);
        }
        self
    }

    pub fn isolated(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }

    pub fn policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Pipeline {
        Pipeline {
            name: self.name,
            input: self.input.build(),
            process: self.process.build(),
            transform: self.transform.build(),
            output: self.output.build(),
            dependencies: self.dependencies,
            isolated: self.isolated,
            policy: self.policy,
        }
    }

    fn list_mut(&mut self, phase: Phase) -> &mut ModuleListBuilder {
        match phase {
            Phase::Input => &mut self.input,
            Phase::Process => &mut self.process,
            Phase::Transform => &mut self.transform,
            Phase::Output => &mut self.output,
        }
    }
}
