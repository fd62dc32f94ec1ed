//! Forest configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Tunables for one [`crate::Forest`].
///
/// Every field has a default, so an empty TOML document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodesConfig {
	/// Upper bound on concurrently running background enumerations.
	pub worker_threads: usize,
	/// Name given to background worker threads.
	pub thread_name: String,
	/// Name of placeholder nodes built by [`crate::Forest::placeholder`].
	pub wait_label: String,
	/// Cap on how long `nodes(true)` blocks for a running enumeration.
	pub optimal_wait_timeout_ms: Option<u64>,
}

impl Default for NodesConfig {
	fn default() -> Self {
		Self {
			worker_threads: 2,
			thread_name: "arbor-populator".to_string(),
			wait_label: "Please wait...".to_string(),
			optimal_wait_timeout_ms: None,
		}
	}
}

impl NodesConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(source)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses, and validates a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let source = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		tracing::debug!(path = %path.display(), "config.load");
		Self::from_toml_str(&source)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.worker_threads == 0 {
			return Err(ConfigError::Invalid {
				field: "worker_threads",
				reason: "must be at least 1".to_string(),
			});
		}
		if self.thread_name.is_empty() {
			return Err(ConfigError::Invalid {
				field: "thread_name",
				reason: "must not be empty".to_string(),
			});
		}
		Ok(())
	}

	pub fn optimal_wait_timeout(&self) -> Option<Duration> {
		self.optimal_wait_timeout_ms.map(Duration::from_millis)
	}
}
