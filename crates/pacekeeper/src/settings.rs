//! TOML configuration of named limiter profiles.
//!
//! The configuration system supports:
//! - Bundled defaults (include_str! from pacekeeper.toml)
//! - User overrides (./pacekeeper.toml or ~/.config/pacekeeper/pacekeeper.toml)
//! - Automatic merging with user values taking precedence
//!
//! ```toml
//! [defaults]
//! max_requests = 60
//! time_window = 60
//!
//! [limiters.github]
//! strategy = "adaptive"
//! max_requests = 5000
//! time_window = 3600
//! ```

use crate::{RateLimitConfig, RateLimitSettings};
use config::{Config, File, FileFormat};
use pacekeeper_error::{ConfigError, ConfigErrorKind, PacekeeperResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Top-level pacekeeper configuration.
///
/// Acts as the configuration provider for limiters: `defaults` applies to
/// every limiter, and each named profile under `limiters` overrides it.
///
/// # Example
///
/// ```no_run
/// use pacekeeper::PacekeeperConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PacekeeperConfig::load()?;
/// let github = config.limiter("github")?;
/// println!("GitHub allows {} requests per {:?}", github.max_requests(), github.time_window());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct PacekeeperConfig {
    /// Settings shared by every limiter
    #[serde(default)]
    pub defaults: RateLimitSettings,

    /// Map of profile name to profile settings
    #[serde(default)]
    pub limiters: HashMap<String, RateLimitSettings>,
}

impl PacekeeperConfig {
    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> PacekeeperResult<Self> {
        debug!("Loading configuration from file");

        Ok(Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .map_err(|e| {
                ConfigError::new(ConfigErrorKind::Load(format!(
                    "{}: {}",
                    path.as_ref().display(),
                    e
                )))
            })?
            .try_deserialize()
            .map_err(|e| ConfigError::new(ConfigErrorKind::Parse(e.to_string())))?)
    }

    /// Load configuration with precedence: user override > bundled default.
    ///
    /// Configuration sources in order of precedence (later sources override earlier):
    /// 1. Bundled defaults (pacekeeper.toml shipped with the library)
    /// 2. User config in home directory (~/.config/pacekeeper/pacekeeper.toml)
    /// 3. User config in current directory (./pacekeeper.toml)
    ///
    /// User config files are optional and silently skipped if not found.
    #[instrument]
    pub fn load() -> PacekeeperResult<Self> {
        debug!("Loading configuration with precedence: current dir > home dir > bundled defaults");

        const DEFAULT_CONFIG: &str = include_str!("../../../pacekeeper.toml");

        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config/pacekeeper/pacekeeper.toml");
            builder = builder.add_source(File::from(home_config).required(false));
        }

        builder = builder.add_source(File::with_name("pacekeeper").required(false));

        Ok(builder
            .build()
            .map_err(|e| ConfigError::new(ConfigErrorKind::Load(e.to_string())))?
            .try_deserialize()
            .map_err(|e| ConfigError::new(ConfigErrorKind::Parse(e.to_string())))?)
    }

    /// Settings of a named profile merged over the shared defaults.
    ///
    /// Returns `None` if no profile has that name.
    #[instrument(skip(self))]
    pub fn settings(&self, name: &str) -> Option<RateLimitSettings> {
        let profile = self.limiters.get(name)?;
        debug!(name, "Resolved limiter profile");
        Some(profile.or(&self.defaults))
    }

    /// Validated configuration for a named profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile does not exist or fails validation.
    pub fn limiter(&self, name: &str) -> PacekeeperResult<RateLimitConfig> {
        let settings = self
            .settings(name)
            .ok_or_else(|| ConfigError::new(ConfigErrorKind::UnknownProfile(name.to_string())))?;
        Ok(RateLimitConfig::from_settings(&settings)?)
    }

    /// Validated configuration from the shared defaults alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the defaults fail validation.
    pub fn default_limiter(&self) -> PacekeeperResult<RateLimitConfig> {
        Ok(RateLimitConfig::from_settings(&self.defaults)?)
    }
}
