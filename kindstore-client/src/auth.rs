/// Service-account credential renewal
///
/// A background task signs a JWT bearer assertion, exchanges it at the token
/// endpoint and publishes the access token into a single-writer watch slot.
/// Requests read the slot when they are sent.
use crate::config::{ClientConfig, ServiceAccount};
use crate::error::{ClientError, Result};
use crate::transport::{HttpRequest, Transport};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub aud: String,
    pub iss: String,
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(account: &ServiceAccount, scope: &str, lifetime: Duration) -> Self {
        let now = Utc::now().timestamp();
        Self {
            aud: account.token_uri.clone(),
            iss: account.client_email.clone(),
            scope: scope.to_string(),
            iat: now,
            exp: now + lifetime.as_secs() as i64,
        }
    }
}

/// Produces the signed assertion sent to the token endpoint
pub trait TokenSigner: Send + Sync {
    fn sign(&self, claims: &Claims) -> Result<String>;
}

/// RS256 signer over the service account's PEM private key
pub struct Rs256Signer {
    key: EncodingKey,
}

impl Rs256Signer {
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| ClientError::Auth(format!("invalid private key: {}", e)))?;
        Ok(Self { key })
    }
}

impl TokenSigner for Rs256Signer {
    fn sign(&self, claims: &Claims) -> Result<String> {
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, &self.key)
            .map_err(|e| ClientError::Auth(format!("cannot sign assertion: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Current bearer token; written only by the renewal task
pub type TokenSlot = Arc<watch::Sender<Option<String>>>;

pub(crate) struct Renewal {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) signer: Arc<dyn TokenSigner>,
    pub(crate) account: ServiceAccount,
    pub(crate) config: ClientConfig,
    pub(crate) token: TokenSlot,
    pub(crate) connected: Arc<AtomicBool>,
}

impl Renewal {
    /// One sign-and-exchange round trip
    pub(crate) async fn exchange(&self) -> Result<(String, Duration)> {
        let claims = Claims::new(&self.account, &self.config.scope, self.config.token_lifetime);
        let assertion = self.signer.sign(&claims)?;
        let request = HttpRequest::form(
            self.account.token_uri.clone(),
            vec![
                ("grant_type".to_string(), JWT_BEARER_GRANT.to_string()),
                ("assertion".to_string(), assertion),
            ],
        );

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(ClientError::protocol("token", response.status, &response.body));
        }
        let token: TokenResponse = serde_json::from_value(response.body)
            .map_err(|e| ClientError::Auth(format!("malformed token response: {}", e)))?;
        Ok((token.access_token, Duration::from_secs(token.expires_in)))
    }

    /// Sleep until shortly before expiry, never less than the retry delay
    pub(crate) fn renew_after(&self, expires_in: Duration) -> Duration {
        expires_in
            .saturating_sub(self.config.token_renew_margin)
            .max(self.config.renewal_retry_delay)
    }

    /// Runs until the task is aborted at disconnect
    pub(crate) async fn run(self) {
        loop {
            match self.exchange().await {
                Ok((token, expires_in)) => {
                    self.token.send_replace(Some(token));
                    if !self.connected.swap(true, Ordering::SeqCst) {
                        info!(project = %self.account.project_id, "obtained first access token");
                    }
                    let wait = self.renew_after(expires_in);
                    debug!(?wait, "access token installed");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    warn!(error = %e, "token renewal failed");
                    tokio::time::sleep(self.config.renewal_retry_delay).await;
                }
            }
        }
    }
}
