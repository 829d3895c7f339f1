use crate::document::{Content, Document};
use crate::error::DocflowResult;
use crate::metadata::MetaValue;
use crate::pipeline::{ExecutionContext, Module};
use async_trait::async_trait;

/// Folds all inputs into one document
///
/// The result descends from the first input. Each later input appends its
/// content and overrides metadata keys it shares with what came before.
#[derive(Debug, Clone, Copy, Default)]
pub struct Combine;

impl Combine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Module for Combine {
    async fn execute(
        &self,
        inputs: &[Document],
        context: &ExecutionContext,
    ) -> DocflowResult<Vec<Document>> {
        let mut documents = inputs.iter();
        let mut combined = match documents.next() {
            Some(first) => first.clone(),
            None => return Ok(Vec::new()),
        };

        for input in documents {
            context.check_cancelled()?;
            combined = context.trace_errors_sync(Some(input), || {
                let mut content = combined.content().read_bytes()?;
                content.extend(input.content().read_bytes()?);
                let overrides: Vec<(String, MetaValue)> = input
                    .metadata()
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.clone()))
                    .collect();
                Ok(combined.clone_with(Some(Content::from(content)), overrides))
            })?;
        }

        Ok(vec![combined])
    }

    fn name(&self) -> &str {
        "Combine"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_combine_appends_content_and_overrides_metadata() {
        let first = Document::builder()
            .content("a")
            .meta("A", "a")
            .meta("Title", "first")
            .build();
        let second = Document::builder()
            .content("b")
            .meta("title", "second")
            .meta("B", "b")
            .build();
        let third = Document::builder().content("c").build();

        let context = ExecutionContext::new("Pages");
        let outputs = Combine::new()
            .execute(&[first.clone(), second, third], &context)
            .await
            .unwrap();

        assert_eq!(outputs.len(), 1);
        let combined = &outputs[0];
        assert_eq!(combined.read_to_string().unwrap(), "abc");
        assert_eq!(combined.metadata().get_string("Title").unwrap(), "second");
        assert_eq!(combined.metadata().get_string("A").unwrap(), "a");
        assert_eq!(combined.metadata().get_string("B").unwrap(), "b");
        assert!(combined.same_lineage(&first));
    }

    #[tokio::test]
    async fn test_combine_single_and_empty() {
        let context = ExecutionContext::new("Pages");
        let only = Document::builder().content("solo").build();

        let outputs = Combine.execute(&[only.clone()], &context).await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].id(), only.id());

        let outputs = Combine.execute(&[], &context).await.unwrap();
        assert!(outputs.is_empty());
    }
}
