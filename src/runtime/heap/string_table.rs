use std::{collections::HashMap, sync::Arc};

use crate::runtime::Reference;

/// Interned `java/lang/String` instances, keyed by their contents.
#[derive(Debug, Default)]
pub struct StringTable {
    map: HashMap<Arc<str>, Reference>,
}

impl StringTable {
    pub(in crate::runtime) fn new() -> Self {
        Self::default()
    }

    pub(in crate::runtime) fn get(&self, value: &str) -> Option<Reference> {
        self.map.get(value).copied()
    }

    pub(in crate::runtime) fn insert(&mut self, value: &str, reference: Reference) {
        self.map.insert(Arc::from(value), reference);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
