use std::env;

const DEFAULT_COLLECT_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Run a full collection when leaving the gate once this many proxies were created
    /// since the last cycle. `None` leaves collection entirely to the embedder.
    pub collect_threshold: Option<usize>,
    /// Treat a surviving cache entry on a cache miss as a fatal bug instead of
    /// overwriting it.
    pub strict_cache: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            collect_threshold: Some(DEFAULT_COLLECT_THRESHOLD),
            strict_cache: cfg!(debug_assertions),
        }
    }
}

impl BridgeConfig {
    /// Reads `PROXY_BRIDGE_COLLECT_THRESHOLD` and `PROXY_BRIDGE_STRICT_CACHE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let collect_threshold = match lookup("PROXY_BRIDGE_COLLECT_THRESHOLD").as_deref() {
            Some("0") | Some("off") => None,
            Some(v) => v.parse().ok().or(defaults.collect_threshold),
            None => defaults.collect_threshold,
        };

        let strict_cache = match lookup("PROXY_BRIDGE_STRICT_CACHE").as_deref() {
            Some("1") | Some("true") => true,
            Some("0") | Some("false") => false,
            _ => defaults.strict_cache,
        };

        Self {
            collect_threshold,
            strict_cache,
        }
    }

    pub fn without_auto_collect(mut self) -> Self {
        self.collect_threshold = None;
        self
    }
}
