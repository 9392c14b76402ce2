//! Configuration for the engine monitor.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use peptalk_core::{ClientOptions, ConnectionConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Engine endpoint.
    pub engine: ConnectionConfig,
    /// Reconnect and timeout settings.
    pub timing: TimingConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Console output.
    pub monitor: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Fixed delay between reconnect attempts, in seconds.
    pub reconnect_delay_secs: u64,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// How long a console request waits for its reply, in milliseconds.
    pub request_timeout_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Seconds between on-air reports. 0 turns reporting off.
    pub report_interval_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for TimingConfig {
    fn default() -> Self {
        let opts = ClientOptions::default();
        Self {
            reconnect_delay_secs: opts.reconnect_delay.as_secs(),
            connect_timeout_ms: opts.connect_timeout.as_millis() as u64,
            request_timeout_ms: opts.request_timeout.as_millis() as u64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 2,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl MonitorConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Apply `--host` / `--port` overrides.
    pub fn override_endpoint(&mut self, host: Option<String>, port: Option<u16>) {
        if let Some(host) = host {
            self.engine.host = host;
        }
        if let Some(port) = port {
            self.engine.port = port;
        }
    }

    /// Client timing derived from `[timing]`. Zero values fall back to
    /// the client defaults.
    pub fn to_client_options(&self) -> ClientOptions {
        let defaults = ClientOptions::default();
        let or_default = |value: Duration, fallback: Duration| {
            if value.is_zero() { fallback } else { value }
        };
        ClientOptions {
            reconnect_delay: or_default(
                Duration::from_secs(self.timing.reconnect_delay_secs),
                defaults.reconnect_delay,
            ),
            connect_timeout: or_default(
                Duration::from_millis(self.timing.connect_timeout_ms),
                defaults.connect_timeout,
            ),
            request_timeout: or_default(
                Duration::from_millis(self.timing.request_timeout_ms),
                defaults.request_timeout,
            ),
            ..defaults
        }
    }

    /// `None` when periodic reports are off.
    pub fn report_interval(&self) -> Option<Duration> {
        match self.monitor.report_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = MonitorConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("[engine]"));
        assert!(text.contains("reconnect_delay_secs = 5"));
        assert!(text.contains("report_interval_secs"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = MonitorConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: MonitorConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.engine.port, peptalk_core::DEFAULT_PORT);
        assert!(parsed.engine.enabled);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: MonitorConfig = toml::from_str(
            r#"
            [engine]
            host = "viz-01"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.engine.host, "viz-01");
        assert_eq!(parsed.engine.port, peptalk_core::DEFAULT_PORT);
        assert_eq!(parsed.timing.reconnect_delay_secs, 5);
    }

    #[test]
    fn client_options_replace_zero_with_defaults() {
        let mut cfg = MonitorConfig::default();
        cfg.timing.reconnect_delay_secs = 0;
        cfg.timing.request_timeout_ms = 250;
        let opts = cfg.to_client_options();
        assert_eq!(opts.reconnect_delay, Duration::from_secs(5));
        assert_eq!(opts.request_timeout, Duration::from_millis(250));
    }

    #[test]
    fn cli_overrides_endpoint() {
        let mut cfg = MonitorConfig::default();
        cfg.override_endpoint(None, Some(6200));
        assert_eq!(cfg.engine.host, "127.0.0.1");
        assert_eq!(cfg.engine.port, 6200);
    }

    #[test]
    fn zero_interval_disables_reports() {
        let mut cfg = MonitorConfig::default();
        assert_eq!(cfg.report_interval(), Some(Duration::from_secs(2)));
        cfg.monitor.report_interval_secs = 0;
        assert_eq!(cfg.report_interval(), None);
    }

    #[test]
    fn write_default_then_load() {
        let path = std::env::temp_dir().join(format!("peptalk-monitor-{}.toml", std::process::id()));
        MonitorConfig::write_default(&path).unwrap();
        let cfg = MonitorConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cfg.monitor.report_interval_secs, 2);
        assert_eq!(cfg.timing.connect_timeout_ms, 5000);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = MonitorConfig::load(Path::new("/nonexistent/peptalk-monitor.toml"));
        assert_eq!(cfg.engine.port, peptalk_core::DEFAULT_PORT);
    }
}
