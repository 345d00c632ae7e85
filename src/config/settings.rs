//! Application settings and configuration
//!
//! This module provides configuration management for the application,
//! loading settings from environment variables with sensible defaults.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::time::Duration;

/// Default Gemini REST endpoint
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!("Invalid environment: {}. Expected: development, staging, or production", s),
        }
    }
}

/// Sandbox container configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SandboxConfig {
    /// Base image. Must already exist on the Docker host.
    pub image: String,
    pub memory_limit_mb: i64,
    pub cpu_period: i64,
    /// Microseconds of CPU per `cpu_period`
    pub cpu_quota: i64,
    /// Container user; `None` keeps the image default
    pub user: Option<String>,
    /// Wall-clock limit for the test command
    #[serde(with = "duration_secs")]
    pub execution_timeout: Duration,
    /// Limit for the pip install step
    #[serde(with = "duration_secs")]
    pub install_timeout: Duration,
    /// Allow network while installing packages
    pub install_network: bool,
}

impl SandboxConfig {
    pub fn memory_limit_bytes(&self) -> i64 {
        self.memory_limit_mb * 1024 * 1024
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "python:3.11-slim".to_string(),
            memory_limit_mb: 256,
            cpu_period: 100_000,
            cpu_quota: 50_000, // half a CPU
            user: Some("nobody".to_string()),
            execution_timeout: Duration::from_secs(30),
            install_timeout: Duration::from_secs(120),
            install_network: true,
        }
    }
}

/// Feedback backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedbackConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl FeedbackConfig {
    /// Whether a backend can be called at all
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().map(|k| !k.is_empty()).unwrap_or(false)
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.0-flash-exp".to_string(),
            base_url: GEMINI_API_BASE.to_string(),
            timeout_seconds: 60,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,

    // Server settings
    pub host: String,
    pub port: u16,

    pub sandbox: SandboxConfig,

    pub feedback: FeedbackConfig,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let defaults = SandboxConfig::default();

        let settings = Self {
            app_name: env_or_default("APP_NAME", "snippet-test-runner"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: env_or_default("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: env_or_default("LOG_LEVEL", "info"),

            host: env_or_default("HOST", "0.0.0.0"),
            port: env_or_default("PORT", "8000")
                .parse()
                .context("Invalid PORT value")?,

            sandbox: SandboxConfig {
                image: env_or_default("SANDBOX_IMAGE", &defaults.image),
                memory_limit_mb: env_or_default("SANDBOX_MEMORY_LIMIT_MB", "256")
                    .parse()
                    .context("Invalid SANDBOX_MEMORY_LIMIT_MB value")?,
                cpu_period: defaults.cpu_period,
                cpu_quota: env_or_default("SANDBOX_CPU_QUOTA", "50000")
                    .parse()
                    .context("Invalid SANDBOX_CPU_QUOTA value")?,
                // An empty value runs as the image's default user
                user: match env::var("SANDBOX_USER") {
                    Ok(user) if user.trim().is_empty() => None,
                    Ok(user) => Some(user),
                    Err(_) => defaults.user.clone(),
                },
                execution_timeout: Duration::from_secs(
                    env_or_default("SANDBOX_EXECUTION_TIMEOUT", "30")
                        .parse()
                        .context("Invalid SANDBOX_EXECUTION_TIMEOUT value")?,
                ),
                install_timeout: Duration::from_secs(
                    env_or_default("SANDBOX_INSTALL_TIMEOUT", "120")
                        .parse()
                        .context("Invalid SANDBOX_INSTALL_TIMEOUT value")?,
                ),
                install_network: env_or_default("SANDBOX_INSTALL_NETWORK", "true")
                    .parse()
                    .unwrap_or(true),
            },

            feedback: FeedbackConfig {
                api_key: env::var("GOOGLE_API_KEY").ok().filter(|k| !k.is_empty()),
                model: env_or_default("GEMINI_MODEL", "gemini-2.0-flash-exp"),
                base_url: env_or_default("GEMINI_BASE_URL", GEMINI_API_BASE),
                timeout_seconds: env_or_default("GEMINI_TIMEOUT_SECONDS", "60")
                    .parse()
                    .unwrap_or(60),
            },
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.sandbox.image.trim().is_empty() {
            anyhow::bail!("SANDBOX_IMAGE cannot be empty");
        }
        if self.sandbox.memory_limit_mb < 16 {
            anyhow::bail!("Sandbox memory limit must be at least 16 MB");
        }
        if self.sandbox.cpu_quota < 1_000 {
            anyhow::bail!("Sandbox CPU quota must be >= 1000");
        }
        if self.sandbox.execution_timeout.is_zero() {
            anyhow::bail!("Sandbox execution_timeout must be > 0");
        }
        if self.sandbox.install_timeout.is_zero() {
            anyhow::bail!("Sandbox install_timeout must be > 0");
        }

        if self.sandbox.user.is_none() {
            tracing::warn!("Sandbox containers will run as the image's default user");
        }

        Ok(())
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Get the server address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "snippet-test-runner".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            sandbox: SandboxConfig::default(),
            feedback: FeedbackConfig::default(),
        }
    }
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Serialize durations as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
