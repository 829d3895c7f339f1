//! Failure tracing around module work
//!
//! Every module invocation, whether over a whole batch or a single document,
//! runs through [`ExecutionContext::trace_errors`]. On failure it records one
//! error event naming the document source and module, then returns the same
//! error. Nothing here swallows a failure.

use super::context::ExecutionContext;
use crate::document::Document;
use crate::error::{DocflowError, DocflowResult, FanOutFailure};
use crate::logger::LogLevel;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;

impl ExecutionContext {
    /// Await `action`, tracing any failure before returning it unchanged
    pub async fn trace_errors<T, Fut>(
        &self,
        document: Option<&Document>,
        action: Fut,
    ) -> DocflowResult<T>
    where
        Fut: Future<Output = DocflowResult<T>>,
    {
        let result = action.await;
        if let Err(error) = &result {
            self.trace_failure(document, error);
        }
        result
    }

    /// Synchronous form of [`trace_errors`](Self::trace_errors)
    pub fn trace_errors_sync<T, F>(&self, document: Option<&Document>, action: F) -> DocflowResult<T>
    where
        F: FnOnce() -> DocflowResult<T>,
    {
        let result = action();
        if let Err(error) = &result {
            self.trace_failure(document, error);
        }
        result
    }

    /// Run `action` over each document in order, stopping at the first failure
    ///
    /// Documents after a failing one are never passed to `action`. Outputs are
    /// concatenated in input order.
    pub async fn for_each_document<F, Fut>(
        &self,
        documents: &[Document],
        mut action: F,
    ) -> DocflowResult<Vec<Document>>
    where
        F: FnMut(Document) -> Fut,
        Fut: Future<Output = DocflowResult<Vec<Document>>>,
    {
        let mut outputs = Vec::with_capacity(documents.len());
        for document in documents {
            self.check_cancelled()?;
            let produced = self
                .trace_errors(Some(document), action(document.clone()))
                .await?;
            outputs.extend(produced);
        }
        Ok(outputs)
    }

    /// Run `action` over every document concurrently
    ///
    /// Each document gets its own task and every task runs to completion, even
    /// after a sibling fails. If any failed the call returns
    /// [`DocflowError::AggregateFanOut`] listing all failures in input order
    /// and the successful outputs are dropped. Otherwise outputs are
    /// concatenated in input order regardless of completion order.
    pub async fn fan_out<F, Fut>(
        &self,
        documents: &[Document],
        action: F,
    ) -> DocflowResult<Vec<Document>>
    where
        F: Fn(Document, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DocflowResult<Vec<Document>>> + Send + 'static,
    {
        self.check_cancelled()?;

        let action = Arc::new(action);
        let tasks: Vec<_> = documents
            .iter()
            .cloned()
            .map(|document| {
                tokio::spawn(run_unit(self.clone(), document, Arc::clone(&action)))
            })
            .collect();

        let results = join_all(tasks).await;

        // In-flight results are discarded once the run is cancelled
        self.check_cancelled()?;

        let module = self.module_name().unwrap_or("unknown").to_string();
        let mut outputs = Vec::new();
        let mut failures = Vec::new();
        for (index, (result, document)) in results.into_iter().zip(documents).enumerate() {
            let result =
                result.unwrap_or_else(|e| Err(DocflowError::TaskJoin(e.to_string())));
            match result {
                Ok(produced) => outputs.extend(produced),
                Err(error) => failures.push(FanOutFailure {
                    index,
                    document_id: document.id(),
                    source: document.source_display(),
                    module: module.clone(),
                    error,
                }),
            }
        }

        if failures.is_empty() {
            return Ok(outputs);
        }

        tracing::warn!(
            pipeline = self.pipeline_name(),
            module = %module,
            failed = failures.len(),
            total = documents.len(),
            "Fan-out completed with errors"
        );
        self.trace(
            LogLevel::Error,
            format!(
                "{} of {} documents failed in module {}",
                failures.len(),
                documents.len(),
                module
            ),
        );
        Err(DocflowError::AggregateFanOut(failures))
    }

    fn trace_failure(&self, document: Option<&Document>, error: &DocflowError) {
        let module = self.module_name().unwrap_or("unknown");
        if error.is_cancelled() {
            self.trace(LogLevel::Warn, format!("Module {} was cancelled", module));
            return;
        }

        let event = match document {
            Some(document) => self
                .event(
                    LogLevel::Error,
                    format!(
                        "Error while processing document {} in module {}: {}",
                        document.source_display(),
                        module,
                        error
                    ),
                )
                .document(document.source_display()),
            None => self.event(
                LogLevel::Error,
                format!("Error while processing in module {}: {}", module, error),
            ),
        };
        self.sink().record(event);
    }
}

async fn run_unit<F, Fut>(
    context: ExecutionContext,
    document: Document,
    action: Arc<F>,
) -> DocflowResult<Vec<Document>>
where
    F: Fn(Document, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DocflowResult<Vec<Document>>> + Send + 'static,
{
    // Units of a nested fan-out already run under their parent's permit
    let limit = if context.in_fan_out() {
        None
    } else {
        context.concurrency().cloned()
    };
    let _permit = match limit {
        Some(limit) => Some(
            limit
                .acquire_owned()
                .await
                .map_err(|e| DocflowError::TaskJoin(e.to_string()))?,
        ),
        None => None,
    };
    context.check_cancelled()?;

    let context = context.for_fan_out_unit();
    let unit = action(document.clone(), context.clone());
    context.trace_errors(Some(&document), unit).await
}
