//! Pipelines of document transformation modules
//!
//! A [`Pipeline`] groups four ordered [`ModuleList`]s (Input, Process,
//! Transform, Output). Each module receives the previous module's documents and
//! returns a new list. Pipelines declare dependencies on each other by name;
//! the [`DependencyScheduler`] orders them into waves and the engine runs each
//! wave concurrently.
//!
//! # Example
//! ```
//! use async_trait::async_trait;
//! use docflow::document::Document;
//! use docflow::error::DocflowResult;
//! use docflow::pipeline::{ExecutionContext, Module, Pipeline};
//!
//! struct Greeting;
//!
//! #[async_trait]
//! impl Module for Greeting {
//!     async fn execute(
//!         &self,
//!         inputs: &[Document],
//!         context: &ExecutionContext,
//!     ) -> DocflowResult<Vec<Document>> {
//!         let mut outputs = inputs.to_vec();
//!         outputs.push(context.document("hello", [("Title", "Greeting")]));
//!         Ok(outputs)
//!     }
//!
//!     fn name(&self) -> &str {
//!         "Greeting"
//!     }
//! }
//!
//! let pipeline = Pipeline::builder("Pages").input(Greeting).build();
//! let context = ExecutionContext::new("Pages");
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let report = runtime.block_on(pipeline.execute(Vec::new(), &context));
//! assert!(report.succeeded());
//! assert_eq!(report.documents.len(), 1);
//! ```

pub mod context;
pub mod core;
pub mod executor;
pub mod module_list;
pub mod modules;
pub mod scheduler;
mod trace;

// Re-export main types
pub use context::ExecutionContext;
pub use self::core::{
    ExecutionPolicy, Module, Phase, PhaseResult, PipelineReport, PipelineStatus, SkipReason,
};
pub use executor::{Pipeline, PipelineBuilder};
pub use module_list::{ModuleList, ModuleListBuilder};
pub use scheduler::{DependencyScheduler, ExecutionPlan, RunRequest};
