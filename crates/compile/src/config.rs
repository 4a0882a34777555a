//! Compiler defaults and their environment overrides.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Fallbacks applied when a spec leaves a value unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfig {
    /// Port used when neither port nor target port is known.
    pub default_port: i32,
    /// Prefix of synthesized port names, suffixed with `-<1-based index>`.
    pub default_port_name: String,
    pub default_units: u32,
    /// Suffix of the generated default domain.
    pub base_domain: String,
    pub chart_version: String,
    pub chart_description: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            default_port: 8080,
            default_port_name: "http-default".to_string(),
            default_units: 1,
            base_domain: "keel.cloud".to_string(),
            chart_version: "0.0.1".to_string(),
            chart_description: "Keel application".to_string(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparsable override");
                fallback
            }
        },
        Err(_) => fallback,
    }
}

impl CompilerConfig {
    /// Defaults overlaid with `KEEL_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            default_port: env_parsed("KEEL_DEFAULT_PORT", d.default_port),
            default_port_name: std::env::var("KEEL_DEFAULT_PORT_NAME").unwrap_or(d.default_port_name),
            default_units: env_parsed("KEEL_DEFAULT_UNITS", d.default_units),
            base_domain: std::env::var("KEEL_BASE_DOMAIN").unwrap_or(d.base_domain),
            chart_version: std::env::var("KEEL_CHART_VERSION").unwrap_or(d.chart_version),
            chart_description: d.chart_description,
        }
    }
}
