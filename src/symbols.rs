// =============================================================================
// Symbol Metadata — YAML symbol registry with mtime-based hot reload
// =============================================================================
//
// Maps symbol code -> {exchange, price_scale, product_type, tags, tick_size}.
// When `price_scale` is absent but `tick_size` is positive, the scale is
// derived as round(1 / tick_size). Anything invalid falls back to the default
// scale of 10^4.
//
// Hot reload: the file's mtime is checked before resolution-critical reads;
// on change the whole map is rebuilt and swapped atomically.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{info, warn};

use crate::pricing::DEFAULT_PRICE_SCALE;

// ---------------------------------------------------------------------------
// YAML schema
// ---------------------------------------------------------------------------

/// Tags may be written as a comma-separated string or a YAML sequence.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TagField {
    Csv(String),
    List(Vec<String>),
}

impl TagField {
    fn into_tags(self) -> Vec<String> {
        match self {
            Self::Csv(s) => s
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            Self::List(v) => v.into_iter().map(|t| t.trim().to_lowercase()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawSymbolEntry {
    code: String,
    #[serde(default)]
    exchange: Option<String>,
    #[serde(default)]
    price_scale: Option<i64>,
    #[serde(default)]
    tick_size: Option<f64>,
    #[serde(default)]
    product_type: Option<String>,
    #[serde(default)]
    tags: Option<TagField>,
}

#[derive(Debug, Deserialize)]
struct RawSymbolsFile {
    #[serde(default)]
    symbols: Vec<RawSymbolEntry>,
}

// ---------------------------------------------------------------------------
// Resolved entries
// ---------------------------------------------------------------------------

/// Fully resolved metadata for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub code: String,
    pub exchange: String,
    pub price_scale: i64,
    pub product_type: String,
    pub tags: Vec<String>,
    pub tick_size: f64,
}

struct Inner {
    by_code: HashMap<String, SymbolInfo>,
    loaded_mtime: Option<SystemTime>,
}

/// Thread-safe symbol registry.
pub struct SymbolMetadata {
    config_path: PathBuf,
    inner: RwLock<Inner>,
}

impl SymbolMetadata {
    /// Load the registry from `config_path`. A missing or malformed file
    /// yields an empty registry with a warning, not an error — the engine
    /// must be able to start while ops fixes the config.
    pub fn new(config_path: impl AsRef<Path>) -> Self {
        let meta = Self {
            config_path: config_path.as_ref().to_path_buf(),
            inner: RwLock::new(Inner {
                by_code: HashMap::new(),
                loaded_mtime: None,
            }),
        };
        if let Err(e) = meta.reload() {
            warn!(path = %meta.config_path.display(), error = %e, "symbol registry load failed, starting empty");
        }
        meta
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    fn parse(path: &Path) -> Result<HashMap<String, SymbolInfo>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read symbol registry {}", path.display()))?;
        let raw: RawSymbolsFile = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse symbol registry {}", path.display()))?;

        let mut by_code = HashMap::with_capacity(raw.symbols.len());
        for entry in raw.symbols {
            let scale = resolve_price_scale(&entry);
            let info = SymbolInfo {
                code: entry.code.clone(),
                exchange: entry.exchange.unwrap_or_default(),
                price_scale: scale,
                product_type: entry.product_type.unwrap_or_else(|| "stock".to_string()),
                tags: entry.tags.map(TagField::into_tags).unwrap_or_default(),
                tick_size: entry.tick_size.unwrap_or(0.0),
            };
            by_code.insert(entry.code, info);
        }
        Ok(by_code)
    }

    /// Rebuild the registry from disk unconditionally.
    pub fn reload(&self) -> Result<()> {
        let by_code = Self::parse(&self.config_path)?;
        let mtime = std::fs::metadata(&self.config_path)
            .and_then(|m| m.modified())
            .ok();

        let mut inner = self.inner.write();
        info!(
            path = %self.config_path.display(),
            count = by_code.len(),
            "symbol registry loaded"
        );
        inner.by_code = by_code;
        inner.loaded_mtime = mtime;
        Ok(())
    }

    /// Reload only if the file's mtime changed since the last load.
    ///
    /// Returns `true` if a reload happened.
    pub fn reload_if_changed(&self) -> bool {
        let current = std::fs::metadata(&self.config_path)
            .and_then(|m| m.modified())
            .ok();
        let changed = {
            let inner = self.inner.read();
            current.is_some() && current != inner.loaded_mtime
        };
        if !changed {
            return false;
        }
        match self.reload() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "symbol registry hot-reload failed, keeping previous map");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// True if `symbol` is registered.
    pub fn is_known(&self, symbol: &str) -> bool {
        self.inner.read().by_code.contains_key(symbol)
    }

    /// Price scale for `symbol`; unknown symbols get the default.
    pub fn price_scale(&self, symbol: &str) -> i64 {
        self.reload_if_changed();
        self.inner
            .read()
            .by_code
            .get(symbol)
            .map(|s| s.price_scale)
            .unwrap_or(DEFAULT_PRICE_SCALE)
    }

    /// Exchange for `symbol`, empty string if unknown.
    pub fn exchange(&self, symbol: &str) -> String {
        self.inner
            .read()
            .by_code
            .get(symbol)
            .map(|s| s.exchange.clone())
            .unwrap_or_default()
    }

    /// Product type for `symbol` ("stock" default).
    pub fn product_type(&self, symbol: &str) -> String {
        self.inner
            .read()
            .by_code
            .get(symbol)
            .map(|s| s.product_type.clone())
            .unwrap_or_else(|| "stock".to_string())
    }

    /// All symbols carrying at least one of `tags` (case-insensitive).
    pub fn symbols_for_tags(&self, tags: &[&str]) -> HashSet<String> {
        let wanted: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
        self.inner
            .read()
            .by_code
            .values()
            .filter(|info| wanted.iter().any(|t| info.tags.contains(t)))
            .map(|info| info.code.clone())
            .collect()
    }

    /// Snapshot of every registered code.
    pub fn codes(&self) -> Vec<String> {
        self.inner.read().by_code.keys().cloned().collect()
    }
}

/// Explicit `price_scale` wins; otherwise derive from tick_size; otherwise
/// (or on nonsense input) fall back to the default.
fn resolve_price_scale(entry: &RawSymbolEntry) -> i64 {
    if let Some(scale) = entry.price_scale {
        if scale > 0 {
            return scale;
        }
        warn!(code = %entry.code, scale, "invalid price_scale, using default");
        return DEFAULT_PRICE_SCALE;
    }
    if let Some(tick) = entry.tick_size {
        if tick > 0.0 && tick.is_finite() {
            let derived = (1.0 / tick).round() as i64;
            if derived > 0 {
                return derived;
            }
        }
        warn!(code = %entry.code, tick_size = tick, "invalid tick_size, using default");
    }
    DEFAULT_PRICE_SCALE
}

impl std::fmt::Debug for SymbolMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolMetadata")
            .field("path", &self.config_path)
            .field("count", &self.inner.read().by_code.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(path: &Path, body: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn load_and_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.yaml");
        write_config(
            &path,
            "\
symbols:
  - code: 'AAA'
    tags: 'TW50,Large'
    price_scale: 100
    exchange: 'TSE'
  - code: 'BBB'
    tags: ['FUT', 'Index']
    tick_size: 0.5
    exchange: 'FUT'
    product_type: 'future'
",
        );

        let meta = SymbolMetadata::new(&path);
        assert_eq!(meta.price_scale("AAA"), 100);
        // Derived from tick_size 0.5 -> round(1/0.5) = 2.
        assert_eq!(meta.price_scale("BBB"), 2);
        assert_eq!(meta.exchange("BBB"), "FUT");
        assert_eq!(meta.product_type("AAA"), "stock");
        assert_eq!(meta.product_type("BBB"), "future");

        let tw50: HashSet<String> = ["AAA".to_string()].into_iter().collect();
        assert_eq!(meta.symbols_for_tags(&["tw50"]), tw50);
        let fut: HashSet<String> = ["BBB".to_string()].into_iter().collect();
        assert_eq!(meta.symbols_for_tags(&["fut", "index"]), fut);
    }

    #[test]
    fn unknown_symbol_gets_default_scale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.yaml");
        write_config(&path, "symbols: []\n");
        let meta = SymbolMetadata::new(&path);
        assert_eq!(meta.price_scale("MISSING"), DEFAULT_PRICE_SCALE);
        assert!(!meta.is_known("MISSING"));
    }

    #[test]
    fn zero_tick_size_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.yaml");
        write_config(
            &path,
            "symbols:\n  - code: 'CCC'\n    tick_size: 0.0\n",
        );
        let meta = SymbolMetadata::new(&path);
        assert_eq!(meta.price_scale("CCC"), DEFAULT_PRICE_SCALE);
    }

    #[test]
    fn reload_if_changed_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.yaml");
        write_config(&path, "symbols:\n  - code: 'AAA'\n    tags: 'tw50'\n");

        let meta = SymbolMetadata::new(&path);
        assert!(!meta.symbols_for_tags(&["tw50"]).is_empty());
        assert!(!meta.reload_if_changed());

        // Rewrite with a different set and force an mtime bump.
        std::thread::sleep(std::time::Duration::from_millis(20));
        write_config(&path, "symbols:\n  - code: 'CCC'\n    tags: 'new'\n");

        assert!(meta.reload_if_changed());
        assert!(meta.symbols_for_tags(&["tw50"]).is_empty());
        let new: HashSet<String> = ["CCC".to_string()].into_iter().collect();
        assert_eq!(meta.symbols_for_tags(&["new"]), new);
    }

    #[test]
    fn missing_file_starts_empty() {
        let meta = SymbolMetadata::new("/nonexistent/symbols.yaml");
        assert!(meta.codes().is_empty());
        assert_eq!(meta.price_scale("AAA"), DEFAULT_PRICE_SCALE);
    }
}
