//! Layered settings
//!
//! Values are merged from several sources in priority order:
//!
//! 1. built-in defaults ([`Settings::default`])
//! 2. `settings/base.toml`
//! 3. `settings/{profile}.toml`, where the profile comes from `RANGO_ENV`
//!    and defaults to `local`
//! 4. `RANGO_*` environment variables (`RANGO_DATABASE_URL`, `RANGO_DEBUG`, ...)
//!
//! Missing files are skipped. The merged map is deserialized into the typed
//! [`Settings`] struct.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::core::exception::{Error, Result};
use crate::core::server::DEFAULT_MAX_BODY_SIZE;

/// Prefix of the environment variables read by [`EnvSource`]
pub const ENV_PREFIX: &str = "RANGO_";

/// Environment variable selecting the settings profile
pub const PROFILE_VAR: &str = "RANGO_ENV";

pub const DEFAULT_PROFILE: &str = "local";

pub trait ConfigSource: Send + Sync {
	fn load(&self) -> std::result::Result<IndexMap<String, Value>, SourceError>;

	/// Higher priorities override lower ones
	fn priority(&self) -> u8;

	fn description(&self) -> String;
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Parse error: {0}")]
	Parse(String),

	#[error("TOML error: {0}")]
	Toml(#[from] toml::de::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Lowest-priority source holding fixed values
pub struct DefaultSource {
	values: IndexMap<String, Value>,
}

impl DefaultSource {
	pub fn new() -> Self {
		Self {
			values: IndexMap::new(),
		}
	}

	pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
		self.values.insert(key.into(), value);
		self
	}

	/// Keys whose default value satisfies `predicate`
	pub fn keys_where(&self, predicate: impl Fn(&Value) -> bool) -> Vec<String> {
		self.values
			.iter()
			.filter(|(_, value)| predicate(value))
			.map(|(key, _)| key.clone())
			.collect()
	}

	/// Every field of a serializable struct becomes a default
	pub fn from_serializable<T: Serialize>(defaults: &T) -> std::result::Result<Self, SourceError> {
		match serde_json::to_value(defaults)? {
			Value::Object(map) => Ok(Self {
				values: map.into_iter().collect(),
			}),
			_ => Err(SourceError::Parse("Defaults must serialize to an object".to_string())),
		}
	}
}

impl Default for DefaultSource {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigSource for DefaultSource {
	fn load(&self) -> std::result::Result<IndexMap<String, Value>, SourceError> {
		Ok(self.values.clone())
	}

	fn priority(&self) -> u8 {
		0
	}

	fn description(&self) -> String {
		"Default values".to_string()
	}
}

/// A TOML file; a missing file contributes nothing
pub struct TomlFileSource {
	path: PathBuf,
	priority: u8,
}

impl TomlFileSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			priority: 50,
		}
	}

	pub fn with_priority(mut self, priority: u8) -> Self {
		self.priority = priority;
		self
	}
}

impl ConfigSource for TomlFileSource {
	fn load(&self) -> std::result::Result<IndexMap<String, Value>, SourceError> {
		if !self.path.exists() {
			return Ok(IndexMap::new());
		}

		let content = fs::read_to_string(&self.path)?;
		let toml_value: toml::Value = toml::from_str(&content)?;

		let json_value = serde_json::to_value(&toml_value)?;
		let map = json_value
			.as_object()
			.ok_or_else(|| SourceError::Parse("Expected table at root".to_string()))?;

		Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
	}

	fn priority(&self) -> u8 {
		self.priority
	}

	fn description(&self) -> String {
		format!("TOML file: {}", self.path.display())
	}
}

/// Environment variables, optionally filtered by prefix
///
/// Keys are lowercased with the prefix removed. Integers and booleans are
/// parsed; keys registered with [`EnvSource::with_bool_keys`] also accept
/// `1`/`0`, `yes`/`no` and `on`/`off`.
pub struct EnvSource {
	prefix: Option<String>,
	vars: Option<Vec<(String, String)>>,
	bool_keys: Vec<String>,
}

impl EnvSource {
	/// Reads the process environment
	pub fn new() -> Self {
		Self {
			prefix: None,
			vars: None,
			bool_keys: Vec::new(),
		}
	}

	/// Reads a fixed set of variables instead of the process environment
	pub fn from_vars<I, K, V>(vars: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			prefix: None,
			vars: Some(
				vars.into_iter()
					.map(|(k, v)| (k.into(), v.into()))
					.collect(),
			),
			bool_keys: Vec::new(),
		}
	}

	pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.prefix = Some(prefix.into());
		self
	}

	pub fn with_bool_keys<I, K>(mut self, keys: I) -> Self
	where
		I: IntoIterator<Item = K>,
		K: Into<String>,
	{
		self.bool_keys.extend(keys.into_iter().map(Into::into));
		self
	}

	fn parse_value(&self, key: &str, value: String) -> Value {
		if self.bool_keys.iter().any(|k| k == key) {
			match value.trim().to_lowercase().as_str() {
				"true" | "1" | "yes" | "on" => return Value::Bool(true),
				"false" | "0" | "no" | "off" => return Value::Bool(false),
				_ => {}
			}
		}
		if let Ok(num) = value.parse::<i64>() {
			Value::Number(num.into())
		} else if let Ok(b) = value.parse::<bool>() {
			Value::Bool(b)
		} else {
			Value::String(value)
		}
	}
}

impl Default for EnvSource {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigSource for EnvSource {
	fn load(&self) -> std::result::Result<IndexMap<String, Value>, SourceError> {
		let vars: Vec<(String, String)> = match &self.vars {
			Some(vars) => vars.clone(),
			None => std::env::vars().collect(),
		};

		let mut config = IndexMap::new();
		for (key, value) in vars {
			let clean_key = match &self.prefix {
				Some(prefix) => match key.strip_prefix(prefix.as_str()) {
					Some(stripped) => stripped.to_string(),
					None => continue,
				},
				None => key,
			};
			let lower_key = clean_key.to_lowercase();
			let parsed = self.parse_value(&lower_key, value);
			config.insert(lower_key, parsed);
		}
		Ok(config)
	}

	fn priority(&self) -> u8 {
		100
	}

	fn description(&self) -> String {
		match &self.prefix {
			Some(prefix) => format!("Environment variables (prefix: {})", prefix),
			None => "Environment variables".to_string(),
		}
	}
}

/// Merges sources by priority
#[derive(Default)]
pub struct SettingsBuilder {
	sources: Vec<Box<dyn ConfigSource>>,
}

impl SettingsBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_source<S: ConfigSource + 'static>(mut self, source: S) -> Self {
		self.sources.push(Box::new(source));
		self
	}

	/// Load every source and merge them, lowest priority first
	pub fn build(mut self) -> Result<MergedSettings> {
		self.sources.sort_by_key(|source| source.priority());

		let mut values = IndexMap::new();
		for source in &self.sources {
			let loaded = source.load().map_err(|e| {
				Error::Configuration(format!("{}: {}", source.description(), e))
			})?;
			tracing::debug!(source = %source.description(), keys = loaded.len(), "settings source loaded");
			values.extend(loaded);
		}
		Ok(MergedSettings { values })
	}
}

/// Untyped result of [`SettingsBuilder::build`]
#[derive(Debug, Clone)]
pub struct MergedSettings {
	values: IndexMap<String, Value>,
}

impl MergedSettings {
	pub fn get(&self, key: &str) -> Option<&Value> {
		self.values.get(key)
	}

	/// Deserialize into a typed settings struct
	pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
		let object: serde_json::Map<String, Value> = self.values.into_iter().collect();
		serde_json::from_value(Value::Object(object))
			.map_err(|e| Error::Configuration(format!("Invalid settings: {}", e)))
	}
}

/// Typed application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
	pub debug: bool,
	/// `host:port` for `runserver`
	pub bind_address: String,
	pub database_url: String,
	/// Templates here override the built-in ones
	pub template_dir: Option<PathBuf>,
	pub session_cookie_name: String,
	/// Session lifetime in seconds
	pub session_cookie_age: i64,
	pub login_url: String,
	pub csrf_enabled: bool,
	/// `EnvFilter` directive used when `RUST_LOG` is unset
	pub log_level: String,
	/// Largest request body the server reads, in bytes
	pub max_body_size: usize,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			debug: false,
			bind_address: "127.0.0.1:8000".to_string(),
			database_url: "sqlite://rango.sqlite3".to_string(),
			template_dir: None,
			session_cookie_name: "sessionid".to_string(),
			session_cookie_age: 60 * 60 * 24 * 7 * 2,
			login_url: "/rango/login/".to_string(),
			csrf_enabled: true,
			log_level: "info".to_string(),
			max_body_size: DEFAULT_MAX_BODY_SIZE,
		}
	}
}

impl Settings {
	/// Load settings from `settings_dir` and the process environment
	pub fn load(settings_dir: &Path) -> Result<Self> {
		let profile = std::env::var(PROFILE_VAR).unwrap_or_else(|_| DEFAULT_PROFILE.to_string());
		Self::load_with(settings_dir, &profile, EnvSource::new().with_prefix(ENV_PREFIX))
	}

	/// Load settings with an explicit profile and environment source
	pub fn load_with(settings_dir: &Path, profile: &str, env: EnvSource) -> Result<Self> {
		let defaults = DefaultSource::from_serializable(&Settings::default())
			.map_err(|e| Error::Configuration(e.to_string()))?;
		let env = env.with_bool_keys(defaults.keys_where(Value::is_boolean));

		let settings: Settings = SettingsBuilder::new()
			.add_source(defaults)
			.add_source(TomlFileSource::new(settings_dir.join("base.toml")).with_priority(50))
			.add_source(
				TomlFileSource::new(settings_dir.join(format!("{}.toml", profile))).with_priority(60),
			)
			.add_source(env)
			.build()?
			.into_typed()?;

		settings.validate()?;
		tracing::debug!(profile, debug = settings.debug, "settings loaded");
		Ok(settings)
	}

	/// Reject values the application cannot run with
	pub fn validate(&self) -> Result<()> {
		if self.bind_address.parse::<SocketAddr>().is_err() {
			return Err(Error::Configuration(format!(
				"bind_address '{}' is not a socket address",
				self.bind_address
			)));
		}
		if self.session_cookie_age <= 0 {
			return Err(Error::Configuration(
				"session_cookie_age must be positive".to_string(),
			));
		}
		if self.max_body_size == 0 {
			return Err(Error::Configuration(
				"max_body_size must be positive".to_string(),
			));
		}
		if !self.login_url.starts_with('/') {
			return Err(Error::Configuration(format!(
				"login_url '{}' must be an absolute path",
				self.login_url
			)));
		}
		if self.session_cookie_name.is_empty()
			|| !self
				.session_cookie_name
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
		{
			return Err(Error::Configuration(format!(
				"session_cookie_name '{}' is not a valid cookie name",
				self.session_cookie_name
			)));
		}
		Ok(())
	}

	/// Settings for tests: in-memory database, no CSRF checks
	pub fn for_testing() -> Self {
		Self {
			debug: true,
			database_url: "sqlite::memory:".to_string(),
			csrf_enabled: false,
			..Self::default()
		}
	}
}
