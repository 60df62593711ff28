// =============================================================================
// Scanner Configuration — static settings loaded once at startup
// =============================================================================
//
// Everything the scanner needs to know before connecting: which venues and
// symbols to track, order book depth, the net-profit threshold, the scan
// cadence, per-venue taker fees and per-symbol volume caps.
//
// Loaded from a JSON file; every field carries a serde default so that a
// partial file still deserialises. There is no runtime reloading — the loaded
// value is shared immutably behind an `Arc`.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_venues() -> Vec<String> {
    vec!["binance".to_string(), "okx".to_string()]
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTC/USDT".to_string(),
        "ETH/USDT".to_string(),
        "SOL/USDT".to_string(),
    ]
}

fn default_order_book_depth() -> usize {
    20
}

fn default_min_profit_pct() -> f64 {
    0.01
}

fn default_scanner_interval_seconds() -> f64 {
    2.0
}

fn default_taker_fee_pct() -> HashMap<String, f64> {
    HashMap::from([("binance".to_string(), 0.1), ("okx".to_string(), 0.1)])
}

fn default_desired_trade_volume_base() -> HashMap<String, f64> {
    HashMap::from([
        ("BTC/USDT".to_string(), 0.05),
        ("ETH/USDT".to_string(), 1.0),
        ("SOL/USDT".to_string(), 20.0),
    ])
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// Config
// =============================================================================

/// Top-level configuration for the arb-radar service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Venue ids to track, in priority order.
    #[serde(default = "default_venues")]
    pub venues: Vec<String>,

    /// Symbols to track, in `BASE/QUOTE` form.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Order book levels requested per subscription.
    #[serde(default = "default_order_book_depth")]
    pub order_book_depth: usize,

    /// Minimum net profit (percent, after taker fees) for an opportunity to
    /// be published. 0.01 means one basis point.
    #[serde(default = "default_min_profit_pct")]
    pub min_profit_pct: f64,

    /// Seconds between scan ticks.
    #[serde(default = "default_scanner_interval_seconds")]
    pub scanner_interval_seconds: f64,

    /// Taker fee (percent) per venue. A venue absent from this map cannot be
    /// priced, so pairs involving it are never evaluated.
    #[serde(default = "default_taker_fee_pct")]
    pub taker_fee_pct: HashMap<String, f64>,

    /// Maximum base-currency volume considered per opportunity, per symbol.
    /// A symbol absent from this map (or capped at <= 0) is not scanned.
    #[serde(default = "default_desired_trade_volume_base")]
    pub desired_trade_volume_base: HashMap<String, f64>,

    /// API listen address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            venues: default_venues(),
            symbols: default_symbols(),
            order_book_depth: default_order_book_depth(),
            min_profit_pct: default_min_profit_pct(),
            scanner_interval_seconds: default_scanner_interval_seconds(),
            taker_fee_pct: default_taker_fee_pct(),
            desired_trade_volume_base: default_desired_trade_volume_base(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Returns an error if the file is missing or malformed so the caller can
    /// fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            venues = ?config.venues,
            symbols = ?config.symbols,
            "config loaded"
        );

        Ok(config)
    }

    /// Apply environment overrides: `ARB_RADAR_SYMBOLS` (comma separated) and
    /// `ARB_RADAR_BIND_ADDR`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(syms) = std::env::var("ARB_RADAR_SYMBOLS") {
            let parsed: Vec<String> = syms
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.symbols = parsed;
            }
        }
        if let Ok(addr) = std::env::var("ARB_RADAR_BIND_ADDR") {
            if !addr.is_empty() {
                self.bind_addr = addr;
            }
        }
    }

    /// Taker fee in percent for a venue, if configured.
    pub fn taker_fee_for(&self, venue: &str) -> Option<f64> {
        self.taker_fee_pct.get(venue).copied()
    }

    /// Per-symbol volume cap, if configured and usable.
    pub fn volume_cap_for(&self, symbol: &str) -> Option<f64> {
        self.desired_trade_volume_base
            .get(symbol)
            .copied()
            .filter(|cap| *cap > 1e-9)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.venues, vec!["binance", "okx"]);
        assert_eq!(cfg.symbols.len(), 3);
        assert_eq!(cfg.order_book_depth, 20);
        assert!((cfg.min_profit_pct - 0.01).abs() < f64::EPSILON);
        assert!((cfg.scanner_interval_seconds - 2.0).abs() < f64::EPSILON);
        assert_eq!(cfg.taker_fee_for("binance"), Some(0.1));
        assert_eq!(cfg.bind_addr, "0.0.0.0:3001");
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.venues, vec!["binance", "okx"]);
        assert_eq!(cfg.order_book_depth, 20);
        assert!(cfg.volume_cap_for("BTC/USDT").is_some());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "venues": ["kraken"],
            "min_profit_pct": 0.25,
            "taker_fee_pct": { "kraken": 0.26 }
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.venues, vec!["kraken"]);
        assert!((cfg.min_profit_pct - 0.25).abs() < f64::EPSILON);
        assert_eq!(cfg.taker_fee_for("kraken"), Some(0.26));
        assert_eq!(cfg.taker_fee_for("binance"), None);
        // Untouched fields come from defaults.
        assert_eq!(cfg.symbols.len(), 3);
        assert!((cfg.scanner_interval_seconds - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_or_non_positive_volume_cap_is_none() {
        let json = r#"{ "desired_trade_volume_base": { "BTC/USDT": 0.0, "ETH/USDT": -1.0 } }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.volume_cap_for("BTC/USDT"), None);
        assert_eq!(cfg.volume_cap_for("ETH/USDT"), None);
        assert_eq!(cfg.volume_cap_for("SOL/USDT"), None);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.venues, cfg2.venues);
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.order_book_depth, cfg2.order_book_depth);
    }
}
