//! # Compiled Expression Cache
//!
//! An injected handle shared across DAGs that memoizes prepared functions by
//! their 128-bit action fingerprint. This is the only shared mutable state in
//! the crate; it carries its own lock. No actual code generation happens
//! here — a cache hit simply reuses the previously prepared callable and
//! marks the node as compiled.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::functions::PreparedFunction;

/// Fingerprint-keyed store of prepared functions.
#[derive(Default)]
pub struct CompiledExpressionCache {
    entries: Mutex<HashMap<u128, Arc<dyn PreparedFunction>>>,
}

impl CompiledExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: u128) -> Option<Arc<dyn PreparedFunction>> {
        self.entries.lock().get(&fingerprint).cloned()
    }

    pub fn insert(&self, fingerprint: u128, function: Arc<dyn PreparedFunction>) {
        self.entries.lock().insert(fingerprint, function);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ColumnWithTypeAndName;
    use crate::error::Result;
    use crate::types::{Column, DataType, Value};

    struct ConstOne;

    impl PreparedFunction for ConstOne {
        fn execute(
            &self,
            _args: &[ColumnWithTypeAndName],
            result_type: &DataType,
            num_rows: usize,
            _dry_run: bool,
        ) -> Result<Column> {
            Column::constant(Value::Int8(1), result_type, num_rows)
        }
    }

    #[test]
    fn insert_then_hit() {
        let cache = CompiledExpressionCache::new();
        assert!(cache.get(42).is_none());
        cache.insert(42, Arc::new(ConstOne));
        assert!(cache.get(42).is_some());
        assert_eq!(cache.len(), 1);
    }
}
