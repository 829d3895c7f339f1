use crate::document::Document;
use crate::error::DocflowResult;
use crate::logger::LogLevel;
use crate::pipeline::{ExecutionContext, Module};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

type MessageFn = dyn Fn(&Document) -> DocflowResult<String> + Send + Sync;

#[derive(Clone)]
enum Message {
    Fixed(String),
    PerDocument(Arc<MessageFn>),
}

/// Writes a message to the trace sink for every input and passes it through
#[derive(Clone)]
pub struct Trace {
    message: Message,
    level: LogLevel,
}

impl Trace {
    /// Trace the same message for each document
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Message::Fixed(message.into()),
            level: LogLevel::Info,
        }
    }

    /// Trace a message computed from each document
    pub fn per_document<F>(message: F) -> Self
    where
        F: Fn(&Document) -> DocflowResult<String> + Send + Sync + 'static,
    {
        Self {
            message: Message::PerDocument(Arc::new(message)),
            level: LogLevel::Info,
        }
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match &self.message {
            Message::Fixed(message) => message.as_str(),
            Message::PerDocument(_) => "<per document>",
        };
        f.debug_struct("Trace")
            .field("message", &message)
            .field("level", &self.level)
            .finish()
    }
}

#[async_trait]
impl Module for Trace {
    async fn execute(
        &self,
        inputs: &[Document],
        context: &ExecutionContext,
    ) -> DocflowResult<Vec<Document>> {
        for document in inputs {
            let message = match &self.message {
                Message::Fixed(message) => message.clone(),
                Message::PerDocument(message) => {
                    context.trace_errors_sync(Some(document), || message(document))?
                }
            };
            context.trace_document(self.level, document, message);
        }
        Ok(inputs.to_vec())
    }

    fn name(&self) -> &str {
        "Trace"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trace_passes_documents_through() {
        let inputs = vec![
            Document::builder().source("/in/a.md").content("a").build(),
            Document::builder().source("/in/b.md").content("b").build(),
        ];
        let context = ExecutionContext::new("Pages").for_module("Trace");

        let outputs = Trace::new("checkpoint")
            .level(LogLevel::Warn)
            .execute(&inputs, &context)
            .await
            .unwrap();

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].id(), inputs[0].id());

        let events = context.sink().events_at(LogLevel::Warn);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.message == "checkpoint"));
        assert_eq!(events[1].document.as_deref(), Some("/in/b.md"));
    }

    #[tokio::test]
    async fn test_trace_per_document_message() {
        let inputs = vec![Document::builder().meta("Title", "Home").build()];
        let context = ExecutionContext::new("Pages");

        Trace::per_document(|doc| Ok(format!("title={}", doc.metadata().get_string("Title")?)))
            .execute(&inputs, &context)
            .await
            .unwrap();

        let events = context.sink().events_at(LogLevel::Info);
        assert!(events.iter().any(|e| e.message == "title=Home"));
    }
}
