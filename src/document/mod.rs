//! Immutable documents
//!
//! A [`Document`] never changes after it is built. Modules produce changed
//! documents with [`Document::clone_with`], which returns a new document in the
//! same lineage as the original.

use crate::error::{DocflowError, DocflowResult};
use crate::io::FileHandle;
use crate::metadata::{MetaValue, Metadata};
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
enum ContentRepr {
    Empty,
    Bytes(Arc<[u8]>),
    File(Arc<dyn FileHandle>),
}

/// Opaque readable document content
#[derive(Clone)]
pub struct Content(ContentRepr);

impl Content {
    pub fn empty() -> Self {
        Content(ContentRepr::Empty)
    }

    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Content(ContentRepr::Bytes(Arc::from(bytes.as_ref())))
    }

    /// Content read lazily from a provider file
    pub fn from_file(file: Arc<dyn FileHandle>) -> Self {
        Content(ContentRepr::File(file))
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            ContentRepr::Empty => true,
            ContentRepr::Bytes(bytes) => bytes.is_empty(),
            ContentRepr::File(_) => false,
        }
    }

    pub fn open(&self) -> DocflowResult<Box<dyn Read + Send>> {
        match &self.0 {
            ContentRepr::Empty => Ok(Box::new(std::io::empty())),
            ContentRepr::Bytes(bytes) => Ok(Box::new(Cursor::new(Arc::clone(bytes)))),
            ContentRepr::File(file) => file.open(),
        }
    }

    pub fn read_bytes(&self) -> DocflowResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.open()?
            .read_to_end(&mut bytes)
            .map_err(|e| DocflowError::ContentRead(e.to_string()))?;
        Ok(bytes)
    }

    pub fn read_to_string(&self) -> DocflowResult<String> {
        String::from_utf8(self.read_bytes()?)
            .map_err(|e| DocflowError::ContentRead(format!("Content is not UTF-8: {}", e)))
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::from_bytes(value)
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content(ContentRepr::Bytes(Arc::from(value.into_bytes())))
    }
}

impl From<Vec<u8>> for Content {
    fn from(value: Vec<u8>) -> Self {
        Content(ContentRepr::Bytes(Arc::from(value)))
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            ContentRepr::Empty => f.write_str("Content::Empty"),
            ContentRepr::Bytes(bytes) => write!(f, "Content::Bytes({} bytes)", bytes.len()),
            ContentRepr::File(file) => write!(f, "Content::File({})", file.path().display()),
        }
    }
}

struct DocumentInner {
    id: Uuid,
    lineage: Uuid,
    generation: u32,
    source: Option<PathBuf>,
    content: Content,
    metadata: Metadata,
    created_at: DateTime<Utc>,
}

/// Immutable unit of content and metadata
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

impl Document {
    /// Create a root document
    pub fn new(content: impl Into<Content>, metadata: Metadata) -> Self {
        Self::builder().content(content).metadata(metadata).build()
    }

    pub fn builder() -> DocumentBuilder {
        DocumentBuilder::new()
    }

    /// Unique identity of this instance
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Identity shared by a document and every clone derived from it
    pub fn lineage_id(&self) -> Uuid {
        self.inner.lineage
    }

    /// Number of clones between the root document and this one
    pub fn generation(&self) -> u32 {
        self.inner.generation
    }

    pub fn same_lineage(&self, other: &Document) -> bool {
        self.inner.lineage == other.inner.lineage
    }

    pub fn source(&self) -> Option<&Path> {
        self.inner.source.as_deref()
    }

    /// Source path for diagnostics
    pub fn source_display(&self) -> String {
        self.inner
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn content(&self) -> &Content {
        &self.inner.content
    }

    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Resolved metadata lookup
    pub fn get(&self, key: &str) -> DocflowResult<Option<MetaValue>> {
        self.inner.metadata.get(key)
    }

    pub fn read_to_string(&self) -> DocflowResult<String> {
        self.inner.content.read_to_string()
    }

    /// Derive a new document, replacing content and applying metadata overrides
    pub fn clone_with<I, K, V>(&self, content: Option<Content>, overrides: I) -> Document
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetaValue>,
    {
        Document {
            inner: Arc::new(DocumentInner {
                id: Uuid::new_v4(),
                lineage: self.inner.lineage,
                generation: self.inner.generation.saturating_add(1),
                source: self.inner.source.clone(),
                content: content.unwrap_or_else(|| self.inner.content.clone()),
                metadata: self.inner.metadata.clone_with(overrides),
                created_at: Utc::now(),
            }),
        }
    }

    pub fn with_content(&self, content: impl Into<Content>) -> Document {
        self.clone_with(Some(content.into()), Vec::<(String, MetaValue)>::new())
    }

    pub fn with_metadata<I, K, V>(&self, overrides: I) -> Document
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetaValue>,
    {
        self.clone_with(None, overrides)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.inner.id)
            .field("lineage", &self.inner.lineage)
            .field("source", &self.inner.source)
            .field("content", &self.inner.content)
            .field("metadata", &self.inner.metadata)
            .finish()
    }
}

/// Builder for root documents
#[derive(Default)]
pub struct DocumentBuilder {
    source: Option<PathBuf>,
    content: Content,
    metadata: Metadata,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn content(mut self, content: impl Into<Content>) -> Self {
        self.content = content.into();
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add a single metadata entry, replacing any case-insensitive match
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata = self.metadata.clone_with([(key.into(), value.into())]);
        self
    }

    pub fn build(self) -> Document {
        let id = Uuid::new_v4();
        Document {
            inner: Arc::new(DocumentInner {
                id,
                lineage: id,
                generation: 0,
                source: self.source,
                content: self.content,
                metadata: self.metadata,
                created_at: Utc::now(),
            }),
        }
    }
}
