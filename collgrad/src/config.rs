//! Runtime-configurable behaviour of the collective client.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `COLLGRAD_`) or by constructing a custom `CollConfig`.

use crate::types::ReduceOp;

/// Client-side policy knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct CollConfig {
    /// Treat Adasum on an accelerator without a GPU-aware transport as a
    /// capability error instead of warning and reducing through the host path.
    pub strict_gpu_adasum: bool,

    /// Reduction op used when a request does not name one.
    pub default_op: ReduceOp,

    /// Prefix prepended to auto-generated operation names.
    pub name_scope: Option<String>,
}

impl Default for CollConfig {
    fn default() -> Self {
        Self {
            strict_gpu_adasum: false,
            default_op: ReduceOp::Average,
            name_scope: None,
        }
    }
}

impl CollConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `COLLGRAD_STRICT_GPU_ADASUM` (`1`/`true`/`yes`/`on`)
    /// - `COLLGRAD_DEFAULT_OP` (`average`, `sum`, `adasum`, `min`, `max`, `product`)
    /// - `COLLGRAD_NAME_SCOPE`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(v) = lookup("COLLGRAD_STRICT_GPU_ADASUM") {
            cfg.strict_gpu_adasum = parse_flag(&v);
        }
        if let Some(v) = lookup("COLLGRAD_DEFAULT_OP") {
            match v.parse::<ReduceOp>() {
                Ok(op) => cfg.default_op = op,
                Err(e) => tracing::warn!("ignoring COLLGRAD_DEFAULT_OP: {e}"),
            }
        }
        if let Some(v) = lookup("COLLGRAD_NAME_SCOPE") {
            let v = v.trim();
            if !v.is_empty() {
                cfg.name_scope = Some(v.to_string());
            }
        }

        cfg
    }
}

fn parse_flag(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
