//! # Configuration
//!
//! A minimal, framework-agnostic key/value configuration store, in the
//! spirit of `app.set()` / `app.get()`. Typed readers (such as
//! [`crate::query::QueryConfig`]) pull what they need from a snapshot.
//!
//! ```rust
//! use crm_core::CrmConfig;
//! let mut cfg = CrmConfig::new();
//!
//! cfg.set("paginate.default", "10");
//! cfg.set("paginate.max", "50");
//!
//! assert_eq!(cfg.get("paginate.default"), Some("10"));
//! ```
//!
//! ## Environment overrides
//! Variables sharing a prefix are folded in with `__` as the path separator:
//!
//! ```bash
//! export CRM__PAGINATE__MAX=50   # -> paginate.max
//! ```

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct CrmConfig {
    values: HashMap<String, String>,
}

impl CrmConfig {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Fold in `(key, value)` pairs whose key starts with `prefix`.
    /// `CRM__PAGINATE__DEFAULT` becomes `paginate.default`.
    pub fn merge_prefixed<I>(&mut self, prefix: &str, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                if !normalized.is_empty() {
                    self.set(normalized, value);
                }
            }
        }
    }

    /// [`Self::merge_prefixed`] over the process environment.
    pub fn load_env(&mut self, prefix: &str) {
        self.merge_prefixed(prefix, std::env::vars());
    }

    pub fn snapshot(&self) -> CrmConfigSnapshot {
        CrmConfigSnapshot::new(self.values.clone())
    }
}

/// Immutable view handed to components at construction time.
#[derive(Debug, Clone, Default)]
pub struct CrmConfigSnapshot {
    map: HashMap<String, String>,
}

impl CrmConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.trim().parse::<bool>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_vars_become_dotted_keys() {
        let mut cfg = CrmConfig::new();
        cfg.merge_prefixed(
            "CRM__",
            vec![
                ("CRM__PAGINATE__MAX".to_string(), "50".to_string()),
                ("OTHER__PAGINATE__MAX".to_string(), "7".to_string()),
            ],
        );
        assert_eq!(cfg.get("paginate.max"), Some("50"));
        assert_eq!(cfg.snapshot().get_usize("paginate.max"), Some(50));
        assert!(!cfg.has("other.paginate.max"));
    }
}
