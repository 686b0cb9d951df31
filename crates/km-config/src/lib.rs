//! Configuration management for km.
//!
//! Parses `km.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! CLI settings can be applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! String configuration values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `kroki.server_url`
//! - `resolver.workspace_root`

mod expand;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override Kroki server URL.
    pub kroki_url: Option<String>,
    /// Override workspace root for file references.
    pub workspace_root: Option<PathBuf>,
    /// Override resolution timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "km.toml";

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Upper bound for `resolver.timeout_ms`.
const MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Kroki block configuration.
    pub kroki: KrokiConfig,
    /// Resolver configuration (paths are relative strings from TOML).
    resolver: ResolverConfigRaw,

    /// Resolved resolver configuration (set after loading).
    #[serde(skip)]
    pub resolver_resolved: ResolverConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// Kroki block configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct KrokiConfig {
    /// Kroki server URL.
    pub server_url: String,
    /// Info-string token marking kroki blocks.
    pub marker: String,
    /// Diagram type for blocks without a `lang` attribute.
    pub default_lang: Option<String>,
}

impl Default for KrokiConfig {
    fn default() -> Self {
        Self {
            server_url: "https://kroki.io".to_owned(),
            marker: "kroki".to_owned(),
            default_lang: None,
        }
    }
}

/// Raw resolver configuration as parsed from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ResolverConfigRaw {
    workspace_root: Option<String>,
    timeout_ms: Option<u64>,
}

/// Resolved resolver configuration with absolute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Directory that file references in blocks are relative to.
    pub workspace_root: PathBuf,
    /// Bound on a single content resolution.
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`kroki.server_url`").
        field: String,
        /// Error message (e.g., "${`KROKI_URL`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Require a URL field to use http:// or https:// scheme.
fn require_http_url(url: &str, field: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https://"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `km.toml` in current directory and parents.
    ///
    /// CLI settings are applied after loading and path resolution, allowing CLI
    /// arguments to take precedence over config file values. The result is
    /// validated after overrides are applied.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails,
    /// or the final configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }
        config.validate()?;

        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(kroki_url) = &settings.kroki_url {
            self.kroki.server_url.clone_from(kroki_url);
        }
        if let Some(workspace_root) = &settings.workspace_root {
            self.resolver_resolved
                .workspace_root
                .clone_from(workspace_root);
        }
        if let Some(timeout_ms) = settings.timeout_ms {
            self.resolver_resolved.timeout = Duration::from_millis(timeout_ms);
        }
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    fn default_with_base(base: &Path) -> Self {
        Self {
            kroki: KrokiConfig::default(),
            resolver: ResolverConfigRaw::default(),
            resolver_resolved: ResolverConfig {
                workspace_root: base.to_path_buf(),
                ..ResolverConfig::default()
            },
            config_path: None,
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        // Expand environment variables before path resolution
        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Called automatically at the end of [`Config::load`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_kroki()?;
        self.validate_resolver()?;
        Ok(())
    }

    fn validate_kroki(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.kroki.server_url, "kroki.server_url")?;
        require_http_url(&self.kroki.server_url, "kroki.server_url")?;

        require_non_empty(&self.kroki.marker, "kroki.marker")?;
        if self.kroki.marker.contains(char::is_whitespace) {
            return Err(ConfigError::Validation(
                "kroki.marker cannot contain whitespace".to_owned(),
            ));
        }

        if let Some(lang) = &self.kroki.default_lang {
            require_non_empty(lang, "kroki.default_lang")?;
        }

        Ok(())
    }

    fn validate_resolver(&self) -> Result<(), ConfigError> {
        let timeout = self.resolver_resolved.timeout;
        if timeout.is_zero() {
            return Err(ConfigError::Validation(
                "resolver.timeout_ms must be greater than 0".to_owned(),
            ));
        }
        if timeout > MAX_TIMEOUT {
            return Err(ConfigError::Validation(format!(
                "resolver.timeout_ms cannot exceed {}",
                MAX_TIMEOUT.as_millis()
            )));
        }
        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.kroki.server_url = expand::expand_env(&self.kroki.server_url, "kroki.server_url")?;

        if let Some(ref root) = self.resolver.workspace_root {
            self.resolver.workspace_root =
                Some(expand::expand_env(root, "resolver.workspace_root")?);
        }

        Ok(())
    }

    /// Resolve relative paths against the config directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        self.resolver_resolved = ResolverConfig {
            workspace_root: self
                .resolver
                .workspace_root
                .as_ref()
                .map_or_else(|| config_dir.to_path_buf(), |root| config_dir.join(root)),
            timeout: Duration::from_millis(self.resolver.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
        };
    }
}
