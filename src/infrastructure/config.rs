use crate::application::persistence::{DEFAULT_CACHE_KEY, DEFAULT_MAX_AGE_MS};
use crate::application::subscriber::DEFAULT_MAX_RECONNECT_ATTEMPTS;
use crate::domain::channel::{RatioValues, SignalValues};
use serde::Deserialize;

const MS_PER_HOUR: i64 = 60 * 60 * 1000;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub run: RunSettings,
    pub storage: StorageSettings,
    pub simulator: SimulatorSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Which transport carries the signal topic.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process broker; the simulator publishes straight into it.
    #[default]
    Local,
    /// MQTT 3.1.1 over TCP.
    Mqtt,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerSettings {
    pub kind: TransportKind,
    pub signal_topic: String,
    pub max_reconnect_attempts: u32,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::Local,
            signal_topic: "chromatography/detector/detector_1/signal".to_string(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            host: "broker.emqx.io".to_string(),
            port: 1883,
            client_id: "chromatograph-telemetry".to_string(),
            keep_alive_secs: 60,
            connect_timeout_ms: 4000,
            reconnect_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunSettings {
    pub duration_minutes: f64,
    pub resolution_minutes: f64,
    pub tick_interval_ms: u64,
    pub resize_debounce_ms: u64,
    pub initial_ratios: RatioValues,
    pub default_signal: SignalValues,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            duration_minutes: 30.0,
            resolution_minutes: 0.1,
            tick_interval_ms: 1000,
            resize_debounce_ms: 150,
            initial_ratios: RatioValues {
                a: 80.0,
                b: 20.0,
                c: 0.0,
                d: 0.0,
            },
            default_signal: SignalValues::new(0.156, 0.132),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    pub dir: String,
    pub cache_key: String,
    pub max_age_hours: i64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            dir: "data".to_string(),
            cache_key: DEFAULT_CACHE_KEY.to_string(),
            max_age_hours: DEFAULT_MAX_AGE_MS / MS_PER_HOUR,
        }
    }
}

impl StorageSettings {
    pub fn max_age_ms(&self) -> i64 {
        self.max_age_hours * MS_PER_HOUR
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulatorSettings {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
        }
    }
}

/// `config/chart.toml` if present, then `CHART__SECTION__KEY` overrides.
pub fn load_settings() -> anyhow::Result<Settings> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/chart").required(false))
        .add_source(config::Environment::with_prefix("CHART").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}
