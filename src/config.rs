// src/config.rs
//! Process settings.
//!
//! Values come from `DID_`-prefixed environment variables (a `.env` file is
//! loaded into the environment first) layered over built-in defaults, e.g.
//! `DID_RPC_URL`, `DID_ISSUER_PRIVATE_KEY`, `DID_LISTEN_ADDR`.

use config::{Config, ConfigError, Environment, Source};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_RPC_URL: &str = "https://api.s0.b.hmny.io";
pub const DEFAULT_REGISTRY_ADDRESS: &str = "0xf880b97Be7c402Cc441895bF397c3f865BfE1Cb2";

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub rpc_url: String,
    pub registry_address: String,
    /// Hex key of the issuer account
    pub issuer_private_key: String,
    /// DID bound on-chain to the issuer account
    pub issuer_did: String,
    pub listen_addr: SocketAddr,
    pub rpc_timeout_secs: u64,
    /// Extra attempts for idempotent registry reads
    pub read_retries: u32,
    pub request_nonce_ttl_secs: u64,
    pub renewal_days: i64,
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_source(Environment::with_prefix("DID").try_parsing(true))
    }

    fn from_source<S>(source: S) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        let settings: Settings = Config::builder()
            .set_default("rpc_url", DEFAULT_RPC_URL)?
            .set_default("registry_address", DEFAULT_REGISTRY_ADDRESS)?
            .set_default("listen_addr", "127.0.0.1:8888")?
            .set_default("rpc_timeout_secs", 15)?
            .set_default("read_retries", 2)?
            .set_default("request_nonce_ttl_secs", 300)?
            .set_default("renewal_days", 365)?
            .add_source(source)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer_private_key.trim().is_empty() {
            return Err(ConfigError::Message("issuer_private_key is empty".into()));
        }
        if self.issuer_did.trim().is_empty() {
            return Err(ConfigError::Message("issuer_did is empty".into()));
        }
        if self.rpc_timeout_secs == 0 {
            return Err(ConfigError::Message("rpc_timeout_secs must be positive".into()));
        }
        if self.renewal_days <= 0 {
            return Err(ConfigError::Message("renewal_days must be positive".into()));
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn request_nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.request_nonce_ttl_secs)
    }

    pub fn renewal_period(&self) -> chrono::Duration {
        chrono::Duration::days(self.renewal_days)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("rpc_url", &self.rpc_url)
            .field("registry_address", &self.registry_address)
            .field("issuer_did", &self.issuer_did)
            .field("listen_addr", &self.listen_addr)
            .field("rpc_timeout_secs", &self.rpc_timeout_secs)
            .field("read_retries", &self.read_retries)
            .field("request_nonce_ttl_secs", &self.request_nonce_ttl_secs)
            .field("renewal_days", &self.renewal_days)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn json(source: &str) -> File<config::FileSourceString, FileFormat> {
        File::from_str(source, FileFormat::Json)
    }

    #[test]
    fn defaults_fill_everything_but_issuer() {
        let settings = Settings::from_source(json(
            r#"{ "issuer_private_key": "0x01", "issuer_did": "did:metablox:foundation" }"#,
        ))
        .unwrap();
        assert_eq!(settings.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(settings.registry_address, DEFAULT_REGISTRY_ADDRESS);
        assert_eq!(settings.listen_addr, "127.0.0.1:8888".parse().unwrap());
        assert_eq!(settings.rpc_timeout(), Duration::from_secs(15));
        assert_eq!(settings.read_retries, 2);
        assert_eq!(settings.request_nonce_ttl(), Duration::from_secs(300));
        assert_eq!(settings.renewal_period(), chrono::Duration::days(365));
    }

    #[test]
    fn sources_override_defaults() {
        let settings = Settings::from_source(json(
            r#"{
                "issuer_private_key": "0x01",
                "issuer_did": "did:metablox:foundation",
                "rpc_url": "http://localhost:8545",
                "rpc_timeout_secs": 3,
                "listen_addr": "0.0.0.0:9000"
            }"#,
        ))
        .unwrap();
        assert_eq!(settings.rpc_url, "http://localhost:8545");
        assert_eq!(settings.rpc_timeout_secs, 3);
        assert_eq!(settings.listen_addr.port(), 9000);
    }

    #[test]
    fn issuer_identity_is_required() {
        assert!(Settings::from_source(json("{}")).is_err());
        assert!(Settings::from_source(json(
            r#"{ "issuer_private_key": " ", "issuer_did": "did:metablox:foundation" }"#
        ))
        .is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let result = Settings::from_source(json(
            r#"{ "issuer_private_key": "0x01", "issuer_did": "d", "rpc_timeout_secs": 0 }"#,
        ));
        assert!(result.is_err());
    }

    #[test]
    fn debug_hides_private_key() {
        let settings = Settings::from_source(json(
            r#"{ "issuer_private_key": "0xdeadbeef", "issuer_did": "did:metablox:foundation" }"#,
        ))
        .unwrap();
        assert!(!format!("{:?}", settings).contains("deadbeef"));
    }
}
