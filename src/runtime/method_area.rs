use std::sync::Arc;

use dashmap::DashMap;

use crate::runtime::RuntimeClass;

/// Every class defined by a [`Runtime`](crate::Runtime), keyed by internal
/// name. Entries are never removed or replaced.
#[derive(Debug, Default)]
pub struct MethodArea {
    classes: DashMap<String, Arc<RuntimeClass>>,
}

impl MethodArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<RuntimeClass>> {
        self.classes.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Registers `class` unless its name is taken, and returns whichever
    /// instance ends up in the table.
    pub(crate) fn register(&self, class: Arc<RuntimeClass>) -> Arc<RuntimeClass> {
        Arc::clone(
            self.classes
                .entry(class.name().to_string())
                .or_insert(class)
                .value(),
        )
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.classes.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}
