//! Engine configuration
//!
//! Built in code with the `with_*` methods, read from a TOML file (every
//! field is optional), and overridden from the environment:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `WEFT_DISPATCH_THREADS` | available cores, at most 8 | Workers draining the runnable queue |
//! | `WEFT_SITE_THREADS` | `4` | Threads running blocking site calls |
//! | `WEFT_STACK_LIMIT` | unlimited | Maximum closure call depth per token |
//! | `WEFT_TOKEN_LIMIT` | unlimited | Maximum number of live tokens |
//! | `WEFT_MAX_PUBLICATIONS` | unlimited | Stop after this many top-level publications |
//! | `WEFT_BURST` | `256` | Steps a worker runs one token for before requeueing it |
//!
//! Unparseable or zero values are reported and ignored.

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

pub const DEFAULT_SITE_THREADS: usize = 4;
pub const DEFAULT_BURST: usize = 256;
const MAX_DEFAULT_DISPATCH_THREADS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub dispatch_threads: usize,
    pub site_threads: usize,
    pub stack_limit: Option<usize>,
    pub token_limit: Option<usize>,
    pub max_publications: Option<u64>,
    pub burst: usize,
    /// Capabilities granted to privileged sites; anything absent is denied
    pub capabilities: BTreeMap<String, bool>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        EngineConfig {
            dispatch_threads: cores.clamp(1, MAX_DEFAULT_DISPATCH_THREADS),
            site_threads: DEFAULT_SITE_THREADS,
            stack_limit: None,
            token_limit: None,
            max_publications: None,
            burst: DEFAULT_BURST,
            capabilities: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overridden from the environment
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Apply `WEFT_*` overrides on top of this configuration
    pub fn with_env(mut self) -> Self {
        let var = |name: &str| std::env::var(name).ok();
        if let Some(n) = parse_positive("WEFT_DISPATCH_THREADS", var("WEFT_DISPATCH_THREADS")) {
            self.dispatch_threads = n;
        }
        if let Some(n) = parse_positive("WEFT_SITE_THREADS", var("WEFT_SITE_THREADS")) {
            self.site_threads = n;
        }
        if let Some(n) = parse_positive("WEFT_STACK_LIMIT", var("WEFT_STACK_LIMIT")) {
            self.stack_limit = Some(n);
        }
        if let Some(n) = parse_positive("WEFT_TOKEN_LIMIT", var("WEFT_TOKEN_LIMIT")) {
            self.token_limit = Some(n);
        }
        if let Some(n) = parse_positive("WEFT_MAX_PUBLICATIONS", var("WEFT_MAX_PUBLICATIONS")) {
            self.max_publications = Some(n as u64);
        }
        if let Some(n) = parse_positive("WEFT_BURST", var("WEFT_BURST")) {
            self.burst = n;
        }
        self
    }

    /// Parse a TOML configuration file's contents
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn with_dispatch_threads(mut self, n: usize) -> Self {
        self.dispatch_threads = n.max(1);
        self
    }

    pub fn with_site_threads(mut self, n: usize) -> Self {
        self.site_threads = n.max(1);
        self
    }

    pub fn with_stack_limit(mut self, frames: usize) -> Self {
        self.stack_limit = Some(frames);
        self
    }

    pub fn with_token_limit(mut self, tokens: usize) -> Self {
        self.token_limit = Some(tokens);
        self
    }

    pub fn with_max_publications(mut self, n: u64) -> Self {
        self.max_publications = Some(n);
        self
    }

    pub fn with_burst(mut self, steps: usize) -> Self {
        self.burst = steps.max(1);
        self
    }

    pub fn with_capability(mut self, name: impl Into<String>, granted: bool) -> Self {
        self.capabilities.insert(name.into(), granted);
        self
    }

    pub fn grants(&self, capability: &str) -> bool {
        self.capabilities.get(capability).copied().unwrap_or(false)
    }
}

/// Parse a positive count from an optional environment value
///
/// Missing values yield `None` silently; zero or garbage is reported.
fn parse_positive(name: &str, value: Option<String>) -> Option<usize> {
    let value = value?;
    match value.trim().parse::<usize>() {
        Ok(0) => {
            warn!("{}=0 is invalid, ignoring", name);
            None
        }
        Ok(n) => Some(n),
        Err(_) => {
            warn!("{}='{}' is not a valid number, ignoring", name, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // Helper to set env var (tests touching the environment are serialized)
    unsafe fn set_env(key: &str, value: &str) {
        // SAFETY: caller runs under #[serial]
        unsafe { std::env::set_var(key, value) };
    }

    unsafe fn restore_env(key: &str, orig: Option<String>) {
        // SAFETY: caller runs under #[serial]
        unsafe {
            match orig {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.dispatch_threads >= 1);
        assert!(config.dispatch_threads <= MAX_DEFAULT_DISPATCH_THREADS);
        assert_eq!(config.site_threads, DEFAULT_SITE_THREADS);
        assert_eq!(config.burst, DEFAULT_BURST);
        assert!(config.stack_limit.is_none());
        assert!(!config.grants("anything"));
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_dispatch_threads(0)
            .with_stack_limit(64)
            .with_token_limit(1000)
            .with_max_publications(1)
            .with_capability("net", true)
            .with_capability("fs", false);

        assert_eq!(config.dispatch_threads, 1);
        assert_eq!(config.stack_limit, Some(64));
        assert_eq!(config.token_limit, Some(1000));
        assert_eq!(config.max_publications, Some(1));
        assert!(config.grants("net"));
        assert!(!config.grants("fs"));
    }

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive("X", None), None);
        assert_eq!(parse_positive("X", Some("12".into())), Some(12));
        assert_eq!(parse_positive("X", Some(" 3 ".into())), Some(3));
        assert_eq!(parse_positive("X", Some("0".into())), None);
        assert_eq!(parse_positive("X", Some("lots".into())), None);
    }

    #[test]
    fn test_from_toml() {
        let config = EngineConfig::from_toml(
            r#"
            dispatch_threads = 2
            max_publications = 10

            [capabilities]
            net = true
            "#,
        )
        .unwrap();
        assert_eq!(config.dispatch_threads, 2);
        assert_eq!(config.max_publications, Some(10));
        assert_eq!(config.site_threads, DEFAULT_SITE_THREADS);
        assert!(config.grants("net"));

        assert!(EngineConfig::from_toml("threads = 2").is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let orig_threads = std::env::var("WEFT_DISPATCH_THREADS").ok();
        let orig_limit = std::env::var("WEFT_STACK_LIMIT").ok();
        let orig_burst = std::env::var("WEFT_BURST").ok();

        // SAFETY: serialized with every other env-touching test
        unsafe {
            set_env("WEFT_DISPATCH_THREADS", "3");
            set_env("WEFT_STACK_LIMIT", "100");
            set_env("WEFT_BURST", "zero");
        }

        let config = EngineConfig::from_env();
        assert_eq!(config.dispatch_threads, 3);
        assert_eq!(config.stack_limit, Some(100));
        assert_eq!(config.burst, DEFAULT_BURST);

        // SAFETY: as above
        unsafe {
            restore_env("WEFT_DISPATCH_THREADS", orig_threads);
            restore_env("WEFT_STACK_LIMIT", orig_limit);
            restore_env("WEFT_BURST", orig_burst);
        }
    }
}
