//! Process-level engine configuration and connect options.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::timeout::TimeoutSettings;
use crate::transport::Headers;

/// Environment variable that turns on debug mode (all timeouts disabled).
pub const DEBUG_ENV: &str = "PWDEBUG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
	pub debug_mode: bool,
	/// Reported to the driver in `initialize`.
	pub sdk_language: String,
	pub remote: bool,
	pub default_timeout: Option<Duration>,
	pub default_navigation_timeout: Option<Duration>,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			debug_mode: false,
			sdk_language: "rust".to_string(),
			remote: false,
			default_timeout: None,
			default_navigation_timeout: None,
		}
	}
}

impl EngineConfig {
	/// Defaults, with debug mode taken from `PWDEBUG`.
	pub fn from_env() -> Self {
		Self {
			debug_mode: std::env::var(DEBUG_ENV).is_ok_and(|value| is_enabled(&value)),
			..Self::default()
		}
	}

	/// Root timeout settings seeded with this configuration's defaults.
	pub fn timeout_settings(&self) -> TimeoutSettings {
		let settings = TimeoutSettings::new(self.debug_mode);
		settings.set_default_timeout(self.default_timeout);
		settings.set_default_navigation_timeout(self.default_navigation_timeout);
		settings
	}
}

fn is_enabled(value: &str) -> bool {
	!matches!(value.trim(), "" | "0" | "false")
}

/// Options for connecting to a driver over a socket or a tunnel.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
	pub ws_endpoint: String,
	pub headers: Headers,
	/// Hosts the remote side may reach through this client, e.g. `"<loopback>"`
	pub expose_network: Option<String>,
	pub slow_mo: Option<Duration>,
	/// Handshake deadline; `None` uses the default, zero waits forever.
	pub timeout: Option<Duration>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams<'a> {
	ws_endpoint: &'a str,
	headers: BTreeMap<&'a str, &'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	expose_network: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	slow_mo: Option<u64>,
	timeout: u64,
}

impl ConnectOptions {
	pub fn new(ws_endpoint: impl Into<String>) -> Self {
		Self {
			ws_endpoint: ws_endpoint.into(),
			..Self::default()
		}
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	/// Params for `LocalUtils.connect`, with `timeout` already resolved.
	pub fn to_params(&self, timeout: Duration) -> Result<Value> {
		let params = ConnectParams {
			ws_endpoint: &self.ws_endpoint,
			headers: self
				.headers
				.iter()
				.map(|(name, value)| (name.as_str(), value.as_str()))
				.collect(),
			expose_network: self.expose_network.as_deref(),
			slow_mo: self.slow_mo.map(|d| d.as_millis() as u64),
			timeout: timeout.as_millis() as u64,
		};
		Ok(serde_json::to_value(params)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn debug_flag_values() {
		assert!(is_enabled("1"));
		assert!(is_enabled("console"));
		assert!(!is_enabled(""));
		assert!(!is_enabled("0"));
	}

	#[test]
	fn connect_params_are_camel_case() {
		let options = ConnectOptions {
			slow_mo: Some(Duration::from_millis(50)),
			..ConnectOptions::new("ws://127.0.0.1:9000/").header("x-token", "abc")
		};
		let params = options.to_params(Duration::from_secs(5)).unwrap();
		assert_eq!(params["wsEndpoint"], "ws://127.0.0.1:9000/");
		assert_eq!(params["headers"]["x-token"], "abc");
		assert_eq!(params["slowMo"], 50);
		assert_eq!(params["timeout"], 5000);
		assert!(params.get("exposeNetwork").is_none());
	}

	#[test]
	fn config_seeds_timeouts() {
		let config = EngineConfig {
			default_timeout: Some(Duration::from_millis(1234)),
			..EngineConfig::default()
		};
		let settings = config.timeout_settings();
		assert_eq!(settings.timeout(None), Duration::from_millis(1234));
		assert_eq!(settings.navigation_timeout(None), Duration::from_millis(1234));
	}
}
