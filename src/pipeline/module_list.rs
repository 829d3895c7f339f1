use super::core::Module;
use std::fmt;
use std::sync::Arc;

/// Ordered, immutable sequence of modules
///
/// Built once with [`ModuleListBuilder`] and shared by reference afterwards.
#[derive(Clone)]
pub struct ModuleList {
    modules: Arc<[Arc<dyn Module>]>,
}

impl Default for ModuleList {
    fn default() -> Self {
        Self::from(Vec::new())
    }
}

impl ModuleList {
    pub fn builder() -> ModuleListBuilder {
        ModuleListBuilder::new()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Module>> {
        self.modules.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn Module>> {
        self.modules.get(index)
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }
}

impl fmt::Debug for ModuleList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl From<Vec<Arc<dyn Module>>> for ModuleList {
    fn from(modules: Vec<Arc<dyn Module>>) -> Self {
        Self {
            modules: modules.into(),
        }
    }
}

/// Builder for constructing module lists
#[derive(Default)]
pub struct ModuleListBuilder {
    modules: Vec<Arc<dyn Module>>,
}

impl ModuleListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to the list
    pub fn add_module<M: Module + 'static>(mut self, module: M) -> Self {
        self.modules.push(Arc::new(module));
        self
    }

    /// Add a shared module to the list
    pub fn add_shared_module(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    /// Build the list
    pub fn build(self) -> ModuleList {
        ModuleList::from(self.modules)
    }
}
