//! Configuration management infrastructure.
//!
//! This module provides configuration file support for verification runs:
//! trust material locations, OCSP policy, worker pool sizing, spooling and
//! timeouts. Command line flags override values loaded from file.

use crate::domain::trust::{
    TrustContext, DEFAULT_OCSP_FRESHNESS_SECONDS, MAX_OCSP_FRESHNESS_SECONDS,
};
use crate::infra::error::{VerifyError, VerifyResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default size up to which a container is spooled in memory.
pub const DEFAULT_SPOOL_THRESHOLD_BYTES: usize = 8 * 1024 * 1024;

/// Application configuration with all verification preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfiguration {
    /// Maximum age of an OCSP response relative to signing time
    pub ocsp_freshness_seconds: u64,

    /// Whether an expired OCSP nextUpdate rejects the response
    pub verify_ocsp_next_update: bool,

    /// Number of container validation workers
    pub worker_threads: usize,

    /// Containers larger than this are spooled to a temporary file
    pub spool_threshold_bytes: usize,

    /// Overall timeout for one archive, if any
    pub timeout_seconds: Option<u64>,

    /// Signer every container must be signed by (CN or serialNumber)
    pub expected_signer: Option<String>,

    /// Trust material locations
    pub trust: TrustMaterialConfig,
}

/// PEM files holding trusted certificates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustMaterialConfig {
    /// Trusted CA certificates (signing certificate anchors)
    pub ca_certificates: Vec<PathBuf>,

    /// Trusted OCSP responder certificates
    pub ocsp_responders: Vec<PathBuf>,

    /// Trusted time-stamping authority certificates
    pub tsa_certificates: Vec<PathBuf>,
}

impl Default for VerifierConfiguration {
    fn default() -> Self {
        Self {
            ocsp_freshness_seconds: DEFAULT_OCSP_FRESHNESS_SECONDS,
            verify_ocsp_next_update: false,
            worker_threads: std::thread::available_parallelism().map_or(4, |n| n.get()),
            spool_threshold_bytes: DEFAULT_SPOOL_THRESHOLD_BYTES,
            timeout_seconds: None,
            expected_signer: None,
            trust: TrustMaterialConfig::default(),
        }
    }
}

impl VerifierConfiguration {
    /// Builds the trust context by loading every configured PEM file.
    pub fn load_trust_context(&self) -> VerifyResult<TrustContext> {
        let mut ctx = TrustContext::new()
            .with_ocsp_freshness_seconds(self.ocsp_freshness_seconds)?
            .with_ocsp_next_update_check(self.verify_ocsp_next_update);

        for path in &self.trust.ca_certificates {
            for cert in TrustContext::load_pem(path)? {
                ctx = ctx.with_ca(cert);
            }
        }
        for path in &self.trust.ocsp_responders {
            for cert in TrustContext::load_pem(path)? {
                ctx = ctx.with_ocsp_responder(cert);
            }
        }
        for path in &self.trust.tsa_certificates {
            for cert in TrustContext::load_pem(path)? {
                ctx = ctx.with_tsa(cert);
            }
        }

        log::debug!("Loaded trust context: {ctx:?}");
        Ok(ctx)
    }
}

/// Configuration manager for handling config files
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new configuration manager with default path
    pub fn new() -> VerifyResult<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Create a configuration manager with custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> VerifyResult<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            Ok(config_dir.join("archive-verifier").join("config.toml"))
        } else {
            Ok(PathBuf::from("archive-verifier-config.toml"))
        }
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load_or_default(&self) -> VerifyResult<VerifierConfiguration> {
        if self.config_path.exists() {
            self.load()
        } else {
            log::debug!(
                "Configuration file not found, using defaults: {}",
                self.config_path.display()
            );
            Ok(VerifierConfiguration::default())
        }
    }

    /// Load configuration from file
    pub fn load(&self) -> VerifyResult<VerifierConfiguration> {
        log::info!("Loading configuration from: {}", self.config_path.display());

        let content = fs::read_to_string(&self.config_path).map_err(|e| {
            VerifyError::Configuration(format!(
                "Failed to read config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        let config: VerifierConfiguration = toml::from_str(&content).map_err(|e| {
            VerifyError::Configuration(format!("Failed to parse config file: {e}"))
        })?;

        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &VerifierConfiguration) -> VerifyResult<()> {
        log::info!("Saving configuration to: {}", self.config_path.display());

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                VerifyError::Configuration(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| {
            VerifyError::Configuration(format!("Failed to serialize config: {e}"))
        })?;

        fs::write(&self.config_path, content).map_err(|e| {
            VerifyError::Configuration(format!(
                "Failed to write config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        log::info!("Configuration saved successfully");
        Ok(())
    }

    /// Validate configuration values
    pub fn validate_config(config: &VerifierConfiguration) -> VerifyResult<()> {
        if config.worker_threads == 0 {
            return Err(VerifyError::Configuration(
                "Worker threads must be greater than 0".to_string(),
            ));
        }

        if config.spool_threshold_bytes == 0 {
            return Err(VerifyError::Configuration(
                "Spool threshold must be greater than 0".to_string(),
            ));
        }

        if config.ocsp_freshness_seconds == 0 {
            return Err(VerifyError::Configuration(
                "OCSP freshness must be greater than 0".to_string(),
            ));
        }

        if config.ocsp_freshness_seconds > MAX_OCSP_FRESHNESS_SECONDS {
            return Err(VerifyError::Configuration(format!(
                "OCSP freshness must not exceed {MAX_OCSP_FRESHNESS_SECONDS} seconds"
            )));
        }

        if config.timeout_seconds == Some(0) {
            return Err(VerifyError::Configuration(
                "Timeout must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Update a specific configuration value
    pub fn update_value(&self, key: &str, value: &str) -> VerifyResult<()> {
        let mut config = self.load_or_default()?;
        let invalid = |kind: &str| {
            VerifyError::Configuration(format!("Invalid {kind} value for {key}: {value}"))
        };

        match key {
            "ocsp_freshness_seconds" => {
                config.ocsp_freshness_seconds = value.parse().map_err(|_| invalid("integer"))?;
            }
            "verify_ocsp_next_update" => {
                config.verify_ocsp_next_update = value.parse().map_err(|_| invalid("boolean"))?;
            }
            "worker_threads" => {
                config.worker_threads = value.parse().map_err(|_| invalid("integer"))?;
            }
            "spool_threshold_bytes" => {
                config.spool_threshold_bytes = value.parse().map_err(|_| invalid("integer"))?;
            }
            "timeout_seconds" => {
                config.timeout_seconds = match value {
                    "" | "none" => None,
                    v => Some(v.parse().map_err(|_| invalid("integer"))?),
                };
            }
            "expected_signer" => {
                config.expected_signer = (!value.is_empty()).then(|| value.to_string());
            }
            _ => {
                return Err(VerifyError::Configuration(format!(
                    "Unknown configuration key: {key}"
                )));
            }
        }

        Self::validate_config(&config)?;
        self.save(&config)
    }

    /// Get the configuration file path
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Export configuration as a portable format
    pub fn export_config(&self, format: ExportFormat) -> VerifyResult<String> {
        let config = self.load_or_default()?;

        match format {
            ExportFormat::Toml => toml::to_string_pretty(&config)
                .map_err(|e| VerifyError::Configuration(format!("TOML export failed: {e}"))),
            ExportFormat::Json => serde_json::to_string_pretty(&config)
                .map_err(|e| VerifyError::Configuration(format!("JSON export failed: {e}"))),
            ExportFormat::Yaml => serde_yaml::to_string(&config)
                .map_err(|e| VerifyError::Configuration(format!("YAML export failed: {e}"))),
        }
    }
}

/// Configuration export formats
#[derive(Debug, Clone, Copy)]
pub enum ExportFormat {
    Toml,
    Json,
    Yaml,
}
