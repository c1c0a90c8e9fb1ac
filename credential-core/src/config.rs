//! Environment-driven configuration, loaded once at process startup.

use std::env::VarError;
use std::str::FromStr;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::tls::SecurityLevel;

/// Top-level configuration for the credential store core.
#[derive(Clone)]
pub struct CredentialStoreConfig {
    /// Root key-encryption-key bytes used to wrap per-key DEKs at rest.
    pub root_kek: Zeroizing<[u8; 32]>,
    /// How long a retrieved key's plaintext material may be cached before re-fetch.
    pub key_cache_ttl: Duration,
    /// Maximum distinct nonces tracked per key before forced rotation.
    pub max_tracked_nonces_per_key: u64,
    /// How long a tracked nonce is retained before it is pruned.
    pub nonce_retention_hours: u64,
    /// How often the rotation scheduler evaluates policies.
    pub rotation_check_interval: Duration,
    /// Maximum rotations the scheduler will run concurrently.
    pub max_concurrent_rotations: usize,
    /// Minimum time between repeated alerts for the same rule/key pair.
    pub alert_cooldown: Duration,
    /// Minimum acceptable TLS/cipher security level for the TLS context builder.
    pub security_level: SecurityLevel,
}

impl CredentialStoreConfig {
    /// Load configuration from the environment (and an optional `.env` file).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `ENCRYPTION_ROOT_KEY` is set but is
    /// not valid base64 or is not exactly 32 bytes after decoding.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            root_kek: parse_root_kek()?,
            key_cache_ttl: Duration::from_secs(parse_env("KEY_CACHE_TTL_SECS", 300)),
            max_tracked_nonces_per_key: parse_env("MAX_TRACKED_NONCES_PER_KEY", 1_000_000),
            nonce_retention_hours: parse_env("NONCE_RETENTION_HOURS", 24),
            rotation_check_interval: Duration::from_secs(parse_env(
                "ROTATION_CHECK_INTERVAL_SECS",
                300,
            )),
            max_concurrent_rotations: parse_env("MAX_CONCURRENT_ROTATIONS", 3),
            alert_cooldown: Duration::from_secs(parse_env("ALERT_COOLDOWN_SECS", 300)),
            security_level: parse_env("TLS_SECURITY_LEVEL", SecurityLevel::High),
        })
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(value) => value.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_root_kek() -> Result<Zeroizing<[u8; 32]>> {
    match std::env::var("ENCRYPTION_ROOT_KEY") {
        Ok(encoded) => {
            use base64::Engine;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| Error::invalid_input(format!("ENCRYPTION_ROOT_KEY: {e}")))?;
            let bytes: [u8; 32] = decoded
                .try_into()
                .map_err(|_| Error::invalid_input("ENCRYPTION_ROOT_KEY must decode to 32 bytes"))?;
            Ok(Zeroizing::new(bytes))
        }
        Err(VarError::NotPresent) => {
            // Development fallback: generate an ephemeral root key so the
            // engine can be exercised without provisioning one.
            use rand::RngCore;
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            Ok(Zeroizing::new(bytes))
        }
        Err(e) => Err(Error::invalid_input(format!("ENCRYPTION_ROOT_KEY: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_documented_defaults() {
        // Guards against environment leaking between tests: clear the vars
        // this test asserts on, but leave ENCRYPTION_ROOT_KEY untouched.
        std::env::remove_var("MAX_TRACKED_NONCES_PER_KEY");
        std::env::remove_var("ROTATION_CHECK_INTERVAL_SECS");
        let config = CredentialStoreConfig::from_env().unwrap();
        assert_eq!(config.max_tracked_nonces_per_key, 1_000_000);
        assert_eq!(config.rotation_check_interval, Duration::from_secs(300));
        assert_eq!(config.max_concurrent_rotations, 3);
    }

    #[test]
    fn test_parse_env_falls_back_on_invalid_value() {
        std::env::set_var("MAX_CONCURRENT_ROTATIONS", "not-a-number");
        let value: usize = parse_env("MAX_CONCURRENT_ROTATIONS", 3);
        assert_eq!(value, 3);
        std::env::remove_var("MAX_CONCURRENT_ROTATIONS");
    }
}
