use crate::document::Document;
use crate::error::DocflowResult;
use crate::pipeline::{ExecutionContext, Module};
use async_trait::async_trait;
use std::collections::HashSet;

/// Metadata key holding child documents unless configured otherwise
pub const CHILDREN_KEY: &str = "Children";

/// Flattens document trees into a single list
///
/// Each input is emitted followed by its descendants, depth first, with
/// children in the order they are stored. Traversal uses an explicit stack so
/// deep trees cannot overflow the call stack. A document reached twice is
/// emitted once.
///
/// This intentionally differs from a bare push-all-then-pop walk, which would
/// emit the inputs in reverse and repeat shared children: roots here keep
/// their input order and repeats are dropped.
#[derive(Debug, Clone)]
pub struct Flatten {
    children_key: String,
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}

impl Flatten {
    pub fn new() -> Self {
        Self::with_children_key(CHILDREN_KEY)
    }

    pub fn with_children_key(key: impl Into<String>) -> Self {
        Self {
            children_key: key.into(),
        }
    }

    fn children(&self, document: &Document) -> DocflowResult<Vec<Document>> {
        if !document.metadata().contains_key(&self.children_key) {
            return Ok(Vec::new());
        }
        document.metadata().get_documents(&self.children_key)
    }
}

#[async_trait]
impl Module for Flatten {
    async fn execute(
        &self,
        inputs: &[Document],
        context: &ExecutionContext,
    ) -> DocflowResult<Vec<Document>> {
        let mut stack: Vec<Document> = inputs.iter().rev().cloned().collect();
        let mut seen = HashSet::new();
        let mut results = Vec::new();

        while let Some(current) = stack.pop() {
            if !seen.insert(current.id()) {
                continue;
            }
            let children =
                context.trace_errors_sync(Some(&current), || self.children(&current))?;
            stack.extend(children.into_iter().rev());
            results.push(current);
        }

        Ok(results)
    }

    fn name(&self) -> &str {
        "Flatten"
    }
}
