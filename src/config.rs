use crate::error::{DocflowError, DocflowResult};
use crate::logger::LogLevel;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default maximum length of a deferred metadata chain
pub const DEFAULT_RESOLUTION_LIMIT: usize = 32;

/// Default number of trace events kept by an engine
pub const DEFAULT_TRACE_CAPACITY: usize = 1000;

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deferred metadata values nested deeper than this fail to resolve
    pub metadata_resolution_limit: usize,

    /// Ring buffer size of the trace sink
    pub trace_capacity: usize,

    /// Events below this level are dropped by the trace sink
    pub min_trace_level: LogLevel,

    /// Upper bound on concurrently running fan-out units, `None` for unbounded
    pub max_concurrency: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metadata_resolution_limit: DEFAULT_RESOLUTION_LIMIT,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
            min_trace_level: LogLevel::Debug,
            max_concurrency: None,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> DocflowResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> DocflowResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DocflowError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> DocflowResult<()> {
        if self.metadata_resolution_limit == 0 {
            return Err(DocflowError::InvalidConfig(
                "metadata_resolution_limit must be greater than zero".to_string(),
            ));
        }
        if self.trace_capacity == 0 {
            return Err(DocflowError::InvalidConfig(
                "trace_capacity must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrency == Some(0) {
            return Err(DocflowError::InvalidConfig(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for constructing EngineConfig instances with a fluent API
///
/// # Example
/// ```
/// use docflow::config::EngineConfig;
/// use docflow::logger::LogLevel;
///
/// let config = EngineConfig::builder()
///     .metadata_resolution_limit(8)
///     .min_trace_level(LogLevel::Info)
///     .max_concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_concurrency, Some(4));
/// ```
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata_resolution_limit(mut self, limit: usize) -> Self {
        self.config.metadata_resolution_limit = limit;
        self
    }

    pub fn trace_capacity(mut self, capacity: usize) -> Self {
        self.config.trace_capacity = capacity;
        self
    }

    pub fn min_trace_level(mut self, level: LogLevel) -> Self {
        self.config.min_trace_level = level;
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrency = Some(limit);
        self
    }

    pub fn unbounded_concurrency(mut self) -> Self {
        self.config.max_concurrency = None;
        self
    }

    /// Build the configuration, rejecting zero limits
    pub fn build(self) -> DocflowResult<EngineConfig> {
        self.config
            .validate()
            .map_err(|e| DocflowError::BuilderError(e.to_string()))?;
        Ok(self.config)
    }
}
