//! Layered configuration: `config/default.toml` < `config/{env}.toml` <
//! environment variables prefixed `DRIFTROOM_` < `.env` (loaded into the
//! process environment before the layered config is built, for local dev).

use std::time::Duration;

use driftroom_crypto::MasterKey;
use serde::Deserialize;
use thiserror::Error;

/// Blob store connection details, used for both the attachment and archive
/// buckets.
#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    /// S3-compatible endpoint URL, or a `file://` path for the filesystem
    /// backend in local development.
    pub endpoint: String,
    /// Access key; ignored by the filesystem backend.
    pub access_key: Option<String>,
    /// Secret key; ignored by the filesystem backend.
    pub secret_key: Option<String>,
    /// Bucket/prefix for final JSON archives.
    pub archive_bucket: String,
    /// Bucket/prefix for user-uploaded attachments.
    pub attachment_bucket: String,
    /// Optional region, required by some S3-compatible providers.
    pub region: Option<String>,
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base64-encoded 32-byte master key wrapping all room keys.
    pub master_key_b64: String,
    /// Postgres connection string.
    pub database_url: String,
    /// Blob store connection details.
    pub blob: BlobConfig,
    /// JWT signing secret. Derived from `master_key_b64` via HKDF if unset
    /// (logged at `warn`, since a dedicated secret is strongly preferred).
    pub jwt_secret: Option<String>,
    /// Device-id session cookie lifetime, in days.
    #[serde(default = "default_session_cookie_days")]
    pub session_cookie_days: i64,
    /// Address the HTTP/WS server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Period between archival worker sweeps, in seconds.
    #[serde(default = "default_archival_period_secs")]
    pub archival_period_secs: u64,
}

const fn default_session_cookie_days() -> i64 {
    30
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_owned()
}

const fn default_archival_period_secs() -> u64 {
    60
}

/// Errors that can occur while loading or validating [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The layered `config` build failed (missing required key, parse
    /// error, etc).
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    /// `master_key_b64` did not decode to a 32-byte key.
    #[error("invalid master key: {0}")]
    InvalidMasterKey(#[from] driftroom_crypto::CryptoFailure),
}

impl Config {
    /// Loads configuration from `config/default.toml`, an optional
    /// `config/{env}.toml` (selected by `APP_ENV`, defaulting to
    /// `development`), environment variables prefixed `DRIFTROOM_`
    /// (double-underscore separated for nesting, e.g.
    /// `DRIFTROOM_BLOB__ENDPOINT`), and a `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if any layer fails to parse or a
    /// required field is missing.
    pub fn load() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_err() {
            tracing::debug!("no .env file found, continuing with process environment only");
        }

        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_owned());
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("DRIFTROOM")
                    .separator("__")
                    .try_parsing(true),
            );

        let cfg: Self = builder.build()?.try_deserialize()?;
        Ok(cfg)
    }

    /// Parses [`Self::master_key_b64`] into a usable key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMasterKey`] if the value is not valid
    /// base64 encoding exactly 32 bytes.
    pub fn master_key(&self) -> Result<MasterKey, ConfigError> {
        Ok(MasterKey::from_base64(&self.master_key_b64)?)
    }

    /// Resolves the JWT signing secret, deriving one from the master key via
    /// HKDF-SHA256 if none was configured.
    #[must_use]
    pub fn jwt_secret_bytes(&self) -> Vec<u8> {
        if let Some(secret) = &self.jwt_secret {
            return secret.as_bytes().to_vec();
        }
        tracing::warn!(
            "jwt_secret not configured, deriving one from master_key_b64; set a dedicated secret for production"
        );
        let hk = hkdf::Hkdf::<sha2::Sha256>::new(None, self.master_key_b64.as_bytes());
        let mut derived = [0u8; 32];
        // Output length is fixed and within HKDF-SHA256's capacity, never fails.
        let _ = hk.expand(b"driftroom-jwt", &mut derived);
        derived.to_vec()
    }

    /// The device-id session cookie lifetime as a [`Duration`].
    #[must_use]
    pub fn session_cookie_lifetime(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.session_cookie_days.max(0)).unwrap_or(30) * 86_400)
    }

    /// Period between archival worker ticks.
    #[must_use]
    pub fn archival_period(&self) -> Duration {
        Duration::from_secs(self.archival_period_secs)
    }
}
