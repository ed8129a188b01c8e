use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::models::TriggerMethod;
use crate::risk::TrailingRules;
use crate::Result;

/// Process-wide settings, loaded once at startup
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub trading: TradingSettings,
    pub trailing: TrailingSettings,
    pub price_feed: PriceFeedSettings,
    pub signals: SignalSettings,
    pub persistence: PersistenceSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub market_cache_ttl_secs: u64,
    pub requests_per_second: u32,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            base_url: "https://api.india.delta.exchange".to_string(),
            request_timeout_secs: 10,
            market_cache_ttl_secs: 300,
            requests_per_second: 8,
        }
    }
}

/// Price deltas used when a signal carries no usable zones
///
/// Magnitudes only; the side decides the sign.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FallbackDeltas {
    pub entry: f64,
    pub long_stop_loss: f64,
    pub long_take_profit: f64,
    pub short_stop_loss: f64,
    pub short_take_profit: f64,
}

impl Default for FallbackDeltas {
    fn default() -> Self {
        Self {
            entry: 50.0,
            long_stop_loss: 500.0,
            long_take_profit: 3000.0,
            short_stop_loss: 3000.0,
            short_take_profit: 500.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    pub symbol: String,
    pub product_id: u64,
    pub order_size: f64,
    pub fixed_offset: f64,
    pub fallback: FallbackDeltas,
    pub settle_delay_secs: u64,
    pub trigger_method: TriggerMethod,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            symbol: "BTCUSD".to_string(),
            product_id: 27,
            order_size: 1.0,
            fixed_offset: 100.0,
            fallback: FallbackDeltas::default(),
            settle_delay_secs: 2,
            trigger_method: TriggerMethod::LastTradedPrice,
        }
    }
}

impl TradingSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrailingSettings {
    #[serde(flatten)]
    pub rules: TrailingRules,
    pub check_interval_secs: u64,
    pub startup_timeout_secs: u64,
    pub startup_poll_secs: u64,
    pub stop_ttl_secs: u64,
    pub push_bracket_on_all_tiers: bool,
    pub contract_value: f64,
    pub usd_inr_rate: f64,
}

impl Default for TrailingSettings {
    fn default() -> Self {
        Self {
            rules: TrailingRules::default(),
            check_interval_secs: 1,
            startup_timeout_secs: 30,
            startup_poll_secs: 2,
            stop_ttl_secs: 300,
            push_bracket_on_all_tiers: false,
            contract_value: 0.001,
            usd_inr_rate: 85.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriceFeedSettings {
    pub url: String,
    pub reconnect_delay_secs: u64,
}

impl Default for PriceFeedSettings {
    fn default() -> Self {
        Self {
            url: "wss://stream.binance.com:9443/ws/btcusdt@trade".to_string(),
            reconnect_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AccountSettings {
    pub signal_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    pub database_url: String,
    pub auth: Option<String>,
    pub account: String,
    pub accounts: HashMap<String, AccountSettings>,
    pub reconnect_delay_secs: u64,
    /// Bound on one-shot reads and order writes; the stream only bounds its connect
    pub request_timeout_secs: u64,
}

impl Default for SignalSettings {
    fn default() -> Self {
        let mut accounts = HashMap::new();
        accounts.insert(
            "MAIN".to_string(),
            AccountSettings {
                signal_key: "signal_MAIN".to_string(),
            },
        );
        Self {
            database_url: String::new(),
            auth: None,
            account: "MAIN".to_string(),
            accounts,
            reconnect_delay_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl SignalSettings {
    /// Signal key for an account, falling back to `signal_{account}`
    ///
    /// Account names are matched case-insensitively; config sources
    /// lowercase table keys.
    pub fn signal_key(&self, account: &str) -> String {
        self.accounts
            .get(account)
            .or_else(|| self.accounts.get(&account.to_lowercase()))
            .map(|a| a.signal_key.clone())
            .unwrap_or_else(|| format!("signal_{}", account))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Firebase,
    Redis,
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    pub sink: SinkKind,
    pub redis_url: String,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            sink: SinkKind::Firebase,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("trading.log".to_string()),
        }
    }
}

/// Legacy environment variables and the setting each one overrides
const LEGACY_ENV: &[(&str, &str)] = &[
    ("DELTA_API_KEY", "exchange.api_key"),
    ("DELTA_API_SECRET", "exchange.api_secret"),
    ("DELTA_PRIVATE_URL", "exchange.base_url"),
    ("FIXED_OFFSET", "trading.fixed_offset"),
    ("MARKET_CACHE_TTL", "exchange.market_cache_ttl_secs"),
    ("LOG_FILE", "logging.file"),
    ("LOG_LEVEL", "logging.level"),
    ("FIREBASE_DATABASE_URL", "signals.database_url"),
    ("FIREBASE_AUTH", "signals.auth"),
    ("REDIS_URL", "persistence.redis_url"),
];

impl Settings {
    /// Load settings: defaults, then the optional TOML file, then
    /// `TRAILBOT__SECTION__KEY` variables, then the legacy variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("TRAILBOT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_ENV {
            if let Ok(value) = std::env::var(var) {
                builder = builder.set_override(*key, value)?;
            }
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.trailing.rules.validate()?;
        Ok(settings)
    }

    pub fn signal_key(&self) -> String {
        self.signals.signal_key(&self.signals.account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let settings = Settings::default();

        assert_eq!(settings.trading.symbol, "BTCUSD");
        assert_eq!(settings.trading.product_id, 27);
        assert_eq!(settings.trading.fixed_offset, 100.0);
        assert_eq!(settings.trading.settle_delay(), Duration::from_secs(2));
        assert_eq!(settings.trailing.rules.levels.len(), 4);
        assert_eq!(settings.trailing.stop_ttl_secs, 300);
        assert_eq!(settings.exchange.market_cache_ttl_secs, 300);
        assert_eq!(settings.signal_key(), "signal_MAIN");
    }

    #[test]
    fn test_unknown_account_key() {
        let settings = SignalSettings::default();
        assert_eq!(settings.signal_key("V1"), "signal_V1");
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = std::env::temp_dir().join(format!("trailbot-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bot.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[trading]
symbol = "ETHUSD"
product_id = 3136
fixed_offset = 5.0

[trading.fallback]
entry = 2.0

[trailing]
start_trailing_profit_pct = 0.01
fixed_stop_loss_pct = 0.02
check_interval_secs = 3

[[trailing.levels]]
min_profit_pct = 0.01
trailing_stop_offset = 0.004

[[trailing.levels]]
min_profit_pct = 0.03
book_fraction = 0.5

[persistence]
sink = "redis"
"#
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.trading.symbol, "ETHUSD");
        assert_eq!(settings.trading.product_id, 3136);
        assert_eq!(settings.trading.fallback.entry, 2.0);
        assert_eq!(settings.trading.fallback.long_take_profit, 3000.0);
        assert_eq!(settings.trailing.check_interval_secs, 3);
        assert_eq!(settings.trailing.rules.start_trailing_profit_pct, 0.01);
        assert_eq!(settings.trailing.rules.levels.len(), 2);
        assert_eq!(settings.trailing.rules.levels[1].book_fraction, Some(0.5));
        assert_eq!(settings.persistence.sink, SinkKind::Redis);

        std::fs::remove_dir_all(&dir).ok();
    }
}
