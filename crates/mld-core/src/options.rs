//! Detector configuration
//!
//! Options have code defaults and can be overridden from the environment:
//! - `MLD_POINTER_POLICY`: `strict` (default) or `lenient`
//! - `MLD_MAX_HEAP_BYTES`: heap cap in bytes, `0` for unlimited

use std::fmt;
use std::str::FromStr;

/// Environment variable selecting the pointer type policy
pub const ENV_POINTER_POLICY: &str = "MLD_POINTER_POLICY";

/// Environment variable capping the tracked heap
pub const ENV_MAX_HEAP_BYTES: &str = "MLD_MAX_HEAP_BYTES";

/// What to do when an object pointer resolves to a record of another type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerTypePolicy {
    /// Treat the pointer as unresolved and skip it
    #[default]
    Strict,
    /// Follow the pointer and scan the target with its own registered layout
    Lenient,
}

impl FromStr for PointerTypePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(PointerTypePolicy::Strict),
            "lenient" => Ok(PointerTypePolicy::Lenient),
            other => Err(format!(
                "unknown pointer policy `{}` (expected `strict` or `lenient`)",
                other
            )),
        }
    }
}

impl fmt::Display for PointerTypePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointerTypePolicy::Strict => f.write_str("strict"),
            PointerTypePolicy::Lenient => f.write_str("lenient"),
        }
    }
}

/// Leak detector options
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DetectorOptions {
    /// Pointer type policy for `ObjPtr` fields
    pub pointer_policy: PointerTypePolicy,

    /// Maximum bytes the tracked heap may hand out (0 = unlimited)
    pub max_heap_bytes: usize,
}

impl DetectorOptions {
    /// Defaults overridden by `MLD_POINTER_POLICY` and `MLD_MAX_HEAP_BYTES`
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DetectorOptions::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(value) = lookup(ENV_POINTER_POLICY) {
            match value.parse() {
                Ok(policy) => options.pointer_policy = policy,
                Err(err) => tracing::warn!(variable = ENV_POINTER_POLICY, "{}", err),
            }
        }

        if let Some(value) = lookup(ENV_MAX_HEAP_BYTES) {
            match value.trim().parse() {
                Ok(bytes) => options.max_heap_bytes = bytes,
                Err(err) => tracing::warn!(
                    variable = ENV_MAX_HEAP_BYTES,
                    value = %value,
                    "ignoring heap cap: {}",
                    err
                ),
            }
        }

        options
    }

    /// Set the pointer type policy
    pub fn with_pointer_policy(mut self, policy: PointerTypePolicy) -> Self {
        self.pointer_policy = policy;
        self
    }

    /// Set the heap cap
    pub fn with_max_heap_bytes(mut self, bytes: usize) -> Self {
        self.max_heap_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: FxHashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let options = DetectorOptions::default();
        assert_eq!(options.pointer_policy, PointerTypePolicy::Strict);
        assert_eq!(options.max_heap_bytes, 0);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("strict".parse(), Ok(PointerTypePolicy::Strict));
        assert_eq!(" Lenient ".parse(), Ok(PointerTypePolicy::Lenient));
        assert!("loose".parse::<PointerTypePolicy>().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let options = DetectorOptions::from_lookup(lookup_from(&[
            (ENV_POINTER_POLICY, "lenient"),
            (ENV_MAX_HEAP_BYTES, "4096"),
        ]));
        assert_eq!(options.pointer_policy, PointerTypePolicy::Lenient);
        assert_eq!(options.max_heap_bytes, 4096);
    }

    #[test]
    fn test_bad_values_ignored() {
        let options = DetectorOptions::from_lookup(lookup_from(&[
            (ENV_POINTER_POLICY, "sometimes"),
            (ENV_MAX_HEAP_BYTES, "lots"),
        ]));
        assert_eq!(options, DetectorOptions::default());
    }

    #[test]
    fn test_builder_methods() {
        let options = DetectorOptions::default()
            .with_pointer_policy(PointerTypePolicy::Lenient)
            .with_max_heap_bytes(1 << 20);
        assert_eq!(options.pointer_policy, PointerTypePolicy::Lenient);
        assert_eq!(options.max_heap_bytes, 1 << 20);
    }
}
