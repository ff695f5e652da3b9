//! Strongly-typed identifiers.
//!
//! IDs are validated at construction time and implement common traits so they
//! can be used directly as map keys and in tagged wire payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize, Deserialize.
/// The `uuid` flag additionally generates a random `new()` and `Default`.
macro_rules! define_id {
    ($name:ident, uuid) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// Kernel identity is always caller-composed (namespace + base, or a bare
// base); it is never randomly generated, so it gets the non-uuid variant.
define_id!(KernelId);
define_id!(ExecutionId, uuid);

impl KernelId {
    /// Compose an effective kernel ID from an optional namespace and a base.
    ///
    /// Effective ID is `namespace + ":" + base` when a namespace is
    /// supplied. Callers must validate that `base` does not contain `":"`
    /// before calling this (see `validation::validate_kernel_base`).
    pub fn compose(namespace: Option<&str>, base: &str) -> Self {
        match namespace {
            Some(ns) if !ns.is_empty() => Self(format!("{}:{}", ns, base)),
            _ => Self(base.to_string()),
        }
    }

    /// The namespace component, if this ID was composed with one.
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once(':').map(|(ns, _)| ns)
    }

    /// Whether this ID lies within the given namespace (prefix match on
    /// `namespace + ":"`; an empty/absent filter matches everything).
    pub fn in_namespace(&self, namespace: Option<&str>) -> bool {
        match namespace {
            None => true,
            Some(ns) if ns.is_empty() => true,
            Some(ns) => {
                let prefix = format!("{}:", ns);
                self.0.starts_with(&prefix)
            }
        }
    }
}

/// Stable handler identity for event subscriptions.
///
/// Closures have no reliable identity in Rust, so subscriptions are keyed by
/// an arena-style monotonic counter instead (see design notes on cyclic /
/// pointer graphs: "use stable handler identities... rather than closure
/// identity").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerId(u64);

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

impl HandlerId {
    pub fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_with_namespace() {
        let id = KernelId::compose(Some("tenant-a"), "foo");
        assert_eq!(id.as_str(), "tenant-a:foo");
    }

    #[test]
    fn compose_without_namespace() {
        let id = KernelId::compose(None, "foo");
        assert_eq!(id.as_str(), "foo");
    }

    #[test]
    fn namespace_extraction() {
        assert_eq!(KernelId::compose(Some("tenant-a"), "foo").namespace(), Some("tenant-a"));
        assert_eq!(KernelId::compose(None, "foo").namespace(), None);
    }

    #[test]
    fn in_namespace_prefix_match() {
        let id = KernelId::compose(Some("tenant-a"), "foo");
        assert!(id.in_namespace(Some("tenant-a")));
        assert!(!id.in_namespace(Some("tenant-b")));
        assert!(id.in_namespace(None));
    }

    #[test]
    fn handler_ids_are_unique_and_monotonic() {
        let a = HandlerId::next();
        let b = HandlerId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }
}
