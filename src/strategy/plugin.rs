//! Strategy plugin contract: version envelope, factory and cleanup
//! hooks.
//!
//! The dynamic-library loading mechanism is platform-specific and lives
//! outside this crate; hosts hand the runtime a [`StrategyPlugin`]
//! resolved from whatever loading scheme they use. Registration
//! validates the semver compatibility envelope against
//! [`CORE_VERSION`] and runs the factory inside a crash barrier: a
//! panicking factory refuses registration and leaves the plugin
//! retryable.

use super::contract::{Strategy, StrategyError};
use super::runtime::StrategyRuntime;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// The version of the runtime plugins compile against.
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration payload handed to a plugin factory.
pub type PluginConfig = serde_json::Value;

/// Factory exported by a plugin.
pub type StrategyFactory =
    Arc<dyn Fn(&PluginConfig) -> Result<Arc<dyn Strategy>, StrategyError> + Send + Sync>;

/// Optional cleanup hook exported by a plugin.
pub type CleanupFn = Arc<dyn Fn() -> Result<(), StrategyError> + Send + Sync>;

/// Identity and compatibility envelope a plugin exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin (and strategy) name
    pub name: String,
    /// Plugin version
    pub version: String,
    /// Author attribution
    pub author: String,
    /// Free-form strategy classification
    pub strategy_type: String,
    /// Lowest compatible core version (inclusive)
    pub min_core_version: String,
    /// Highest compatible core version (inclusive); empty means
    /// unbounded
    pub max_core_version: String,
}

/// A plugin as handed to the runtime by the host's loader.
pub struct StrategyPlugin {
    /// Exported identity and version envelope
    pub info: PluginInfo,
    /// Exported strategy factory
    pub factory: StrategyFactory,
    /// Exported cleanup hook, if any
    pub cleanup: Option<CleanupFn>,
}

impl fmt::Debug for StrategyPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyPlugin")
            .field("info", &self.info)
            .finish()
    }
}

/// Plugin registration failures.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A version field failed to parse as semver
    #[error("plugin '{name}': invalid version '{value}': {source}")]
    InvalidVersion {
        /// Plugin name
        name: String,
        /// The offending version string
        value: String,
        /// Parser error
        source: semver::Error,
    },

    /// The core version lies outside the plugin's envelope
    #[error(
        "plugin '{name}' is incompatible: core {core} outside [{min}, {max}]"
    )]
    IncompatibleVersion {
        /// Plugin name
        name: String,
        /// Core version checked
        core: String,
        /// Envelope lower bound
        min: String,
        /// Envelope upper bound (or "∞")
        max: String,
    },

    /// The factory returned an error
    #[error("plugin '{name}' strategy creation failed: {reason}")]
    CreationFailed {
        /// Plugin name
        name: String,
        /// Error or panic description
        reason: String,
    },

    /// The created strategy's name is already registered
    #[error(transparent)]
    Registry(#[from] super::registry::RegistryError),
}

/// Checks `core` against the plugin's `[min, max]` envelope.
pub fn validate_compatibility(info: &PluginInfo, core: &str) -> Result<(), PluginError> {
    let parse = |value: &str| -> Result<Version, PluginError> {
        Version::parse(value).map_err(|source| PluginError::InvalidVersion {
            name: info.name.clone(),
            value: value.to_string(),
            source,
        })
    };

    let core_version = parse(core)?;
    let min = parse(&info.min_core_version)?;
    if core_version < min {
        return Err(PluginError::IncompatibleVersion {
            name: info.name.clone(),
            core: core.to_string(),
            min: info.min_core_version.clone(),
            max: if info.max_core_version.is_empty() {
                "∞".to_string()
            } else {
                info.max_core_version.clone()
            },
        });
    }
    if !info.max_core_version.is_empty() {
        let max = parse(&info.max_core_version)?;
        if core_version > max {
            return Err(PluginError::IncompatibleVersion {
                name: info.name.clone(),
                core: core.to_string(),
                min: info.min_core_version.clone(),
                max: info.max_core_version.clone(),
            });
        }
    }
    Ok(())
}

impl StrategyRuntime {
    /// Validates a plugin's version envelope, creates its strategy
    /// inside a crash barrier and registers the result.
    ///
    /// # Errors
    /// [`PluginError`] for version or creation failures; a fault never
    /// corrupts the registry and the plugin may be retried.
    pub fn register_plugin(
        &self,
        plugin: &StrategyPlugin,
        config: &PluginConfig,
        priority: i32,
    ) -> Result<Arc<dyn Strategy>, PluginError> {
        validate_compatibility(&plugin.info, CORE_VERSION)?;

        let factory = Arc::clone(&plugin.factory);
        let created = catch_unwind(AssertUnwindSafe(|| factory(config)));
        let strategy = match created {
            Ok(Ok(strategy)) => strategy,
            Ok(Err(err)) => {
                warn!(plugin = %plugin.info.name, error = %err, "plugin factory failed");
                return Err(PluginError::CreationFailed {
                    name: plugin.info.name.clone(),
                    reason: err.to_string(),
                });
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic during strategy creation".to_string());
                warn!(plugin = %plugin.info.name, %reason, "plugin factory panicked");
                return Err(PluginError::CreationFailed {
                    name: plugin.info.name.clone(),
                    reason,
                });
            }
        };

        self.registry().register(Arc::clone(&strategy), priority)?;
        info!(
            plugin = %plugin.info.name,
            version = %plugin.info.version,
            strategy = %strategy.name(),
            "plugin registered"
        );
        Ok(strategy)
    }
}
