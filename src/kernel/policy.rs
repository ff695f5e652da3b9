//! Allowed-type policy: the set of (mode, language) pairs a manager will
//! create kernels for. Process-wide, injected at manager construction,
//! never read from ambient configuration at call time.

use crate::driver::KernelTypeKey;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct AllowedTypes {
    types: HashSet<KernelTypeKey>,
}

impl AllowedTypes {
    pub fn new(types: impl IntoIterator<Item = KernelTypeKey>) -> Self {
        Self {
            types: types.into_iter().collect(),
        }
    }

    pub fn is_allowed(&self, key: &KernelTypeKey) -> bool {
        self.types.contains(key)
    }
}
