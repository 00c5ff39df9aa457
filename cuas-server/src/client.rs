//! Outbound HTTP: credential login and payload decryption.
//!
//! Both calls are GET requests with query parameters against the same
//! service. The traits let the listeners and the refresh loop run against
//! in-process fakes in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use cuas_core::config::DecryptConfig;
use cuas_core::encrypted::DecryptedFields;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service rejected request: {0}")]
    Rejected(String),
    #[error("no decrypt credential available")]
    NoCredential,
    #[error("decrypt returned an empty serial")]
    EmptySerial,
}

/// Exchanges configured credentials for a decrypt token.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn login(&self) -> Result<String, ClientError>;
}

/// Decrypts one hex payload with a token.
#[async_trait]
pub trait Decryptor: Send + Sync {
    async fn decrypt(&self, payload_hex: &str, token: &str)
        -> Result<DecryptedFields, ClientError>;
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: TokenData,
}

#[derive(Debug, Default, Deserialize)]
struct TokenData {
    #[serde(default)]
    token: String,
    #[allow(dead_code)]
    #[serde(default)]
    orders: Vec<String>,
}

/// reqwest-backed client for the login and decrypt endpoints.
#[derive(Clone)]
pub struct ServiceClient {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl ServiceClient {
    /// Build a client; every request is bounded by `config.timeout_secs`.
    pub fn new(config: &DecryptConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(ServiceClient {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl CredentialSource for ServiceClient {
    async fn login(&self) -> Result<String, ClientError> {
        let resp: LoginResponse = self
            .client
            .get(self.url("/api/login"))
            .query(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await?
            .json()
            .await?;

        if !resp.success {
            return Err(ClientError::Rejected(resp.msg));
        }
        if resp.data.token.is_empty() {
            return Err(ClientError::Rejected("empty token".into()));
        }
        Ok(resp.data.token)
    }
}

#[async_trait]
impl Decryptor for ServiceClient {
    async fn decrypt(
        &self,
        payload_hex: &str,
        token: &str,
    ) -> Result<DecryptedFields, ClientError> {
        let fields: DecryptedFields = self
            .client
            .get(self.url("/api/yd/decryptl"))
            .query(&[("hex", payload_hex), ("token", token)])
            .send()
            .await?
            .json()
            .await?;

        if fields.sn.is_empty() {
            return Err(ClientError::EmptySerial);
        }
        Ok(fields)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
