use crate::document::{Content, Document};
use crate::error::DocflowResult;
use crate::metadata::{fold_key, MetaValue};
use crate::pipeline::{ExecutionContext, Module};
use async_trait::async_trait;
use std::collections::HashSet;

/// Which input metadata the joined document carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinedMetadata {
    /// No input metadata
    #[default]
    DefaultOnly,
    FirstDocument,
    LastDocument,
    /// Union of all inputs; the first value seen for a key wins
    AllWithFirstDuplicates,
    /// Union of all inputs; the last value seen for a key wins
    AllWithLastDuplicates,
}

/// Joins every input into a single document
///
/// Contents are concatenated in input order with an optional delimiter between
/// them. With no inputs the module still produces one empty document.
#[derive(Debug, Clone, Default)]
pub struct Join {
    delimiter: String,
    metadata: JoinedMetadata,
}

impl Join {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
            metadata: JoinedMetadata::DefaultOnly,
        }
    }

    pub fn metadata(mut self, mode: JoinedMetadata) -> Self {
        self.metadata = mode;
        self
    }

    fn joined_metadata(&self, inputs: &[Document]) -> Vec<(String, MetaValue)> {
        let entries = |document: &Document| -> Vec<(String, MetaValue)> {
            document
                .metadata()
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect()
        };

        match self.metadata {
            JoinedMetadata::DefaultOnly => Vec::new(),
            JoinedMetadata::FirstDocument => inputs.first().map(entries).unwrap_or_default(),
            JoinedMetadata::LastDocument => inputs.last().map(entries).unwrap_or_default(),
            JoinedMetadata::AllWithFirstDuplicates => {
                let mut seen = HashSet::new();
                inputs
                    .iter()
                    .flat_map(entries)
                    .filter(|(key, _)| seen.insert(fold_key(key)))
                    .collect()
            }
            // Later pairs replace earlier ones when applied to a snapshot
            JoinedMetadata::AllWithLastDuplicates => inputs.iter().flat_map(entries).collect(),
        }
    }
}

#[async_trait]
impl Module for Join {
    async fn execute(
        &self,
        inputs: &[Document],
        context: &ExecutionContext,
    ) -> DocflowResult<Vec<Document>> {
        if inputs.is_empty() {
            return Ok(vec![
                context.document(Content::empty(), Vec::<(String, MetaValue)>::new())
            ]);
        }

        let mut joined = Vec::new();
        for (index, document) in inputs.iter().enumerate() {
            if index > 0 {
                joined.extend_from_slice(self.delimiter.as_bytes());
            }
            let bytes = context.trace_errors_sync(Some(document), || {
                document.content().read_bytes()
            })?;
            joined.extend(bytes);
        }

        Ok(vec![context.document(joined, self.joined_metadata(inputs))])
    }

    fn name(&self) -> &str {
        "Join"
    }
}
