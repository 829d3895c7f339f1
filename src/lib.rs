//! Document-processing pipelines with dependency scheduling
//!
//! Register [`pipeline::Pipeline`]s with an [`engine::Engine`] and call
//! [`engine::Engine::run`]. Each pipeline runs its Input, Process, Transform
//! and Output modules in order over immutable [`document::Document`]s.
//! Pipelines that depend on each other are ordered into waves; independent
//! pipelines in a wave run concurrently.

pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod io;
pub mod logger;
pub mod metadata;
pub mod pipeline;

pub use config::EngineConfig;
pub use document::{Content, Document};
pub use engine::{Engine, RunResult, RunStatus};
pub use error::{DocflowError, DocflowResult};
pub use metadata::{MetaValue, Metadata};
pub use pipeline::{ExecutionContext, Module, Pipeline, RunRequest};
