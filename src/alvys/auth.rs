use std::fmt;

use jiff::{SignedDuration, Timestamp};
use log::info;
use serde::Deserialize;

use crate::{
    alvys::{retry::RetryPolicy, transport::Transport},
    error::IngestError,
};

pub const DEFAULT_AUTH_BASE: &str = "https://integrations.alvys.com";
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Credentials of one tenant, as read from the roster.
#[derive(Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub scac: String,
    pub tenant_id: String,
    pub client_id: String,
    client_secret: String,
    pub grant_type: String,
}

impl TenantContext {
    pub fn new(
        scac: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
        grant_type: &str,
    ) -> Self {
        TenantContext {
            scac: scac.trim().to_uppercase(),
            tenant_id: tenant_id.trim().to_string(),
            client_id: client_id.trim().to_string(),
            client_secret: client_secret.trim().to_string(),
            grant_type: grant_type.trim().to_string(),
        }
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Same credentials under another SCAC.
    pub fn with_scac(&self, scac: &str) -> Self {
        TenantContext {
            scac: scac.trim().to_uppercase(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantContext")
            .field("scac", &self.scac)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("grant_type", &self.grant_type)
            .finish()
    }
}

#[derive(Clone)]
pub struct Token {
    pub value: String,
    pub expires_at: Timestamp,
}

impl Token {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

/// Exchanges tenant credentials for a bearer token.  Tokens are returned to
/// the caller and never cached, so one tenant's token can't leak into
/// another tenant's requests.
pub struct TokenManager<'a, T: Transport> {
    transport: &'a T,
    auth_base: String,
    retry: RetryPolicy,
}

impl<'a, T: Transport> TokenManager<'a, T> {
    pub fn new(transport: &'a T, auth_base: &str, retry: RetryPolicy) -> Self {
        TokenManager {
            transport,
            auth_base: auth_base.trim_end_matches('/').to_string(),
            retry,
        }
    }

    pub fn auth_url(&self, tenant_id: &str) -> String {
        format!("{}/api/authentication/{}/token", self.auth_base, tenant_id)
    }

    pub fn acquire_token(&self, ctx: &TenantContext) -> Result<Token, IngestError> {
        let auth_error = |message: String| IngestError::Auth {
            scac: ctx.scac.clone(),
            message,
        };
        let url = self.auth_url(&ctx.tenant_id);
        let form = [
            ("client_id", ctx.client_id.as_str()),
            ("client_secret", ctx.client_secret()),
            ("grant_type", ctx.grant_type.as_str()),
        ];
        let res = self
            .retry
            .send(&format!("[{}] token", ctx.scac), || {
                self.transport.post_form(&url, &form)
            })
            .map_err(|e| auth_error(e.to_string()))?;
        if !res.is_success() {
            return Err(auth_error(format!("HTTP {} {}", res.status, res.snippet())));
        }

        let body: TokenResponse = serde_json::from_str(&res.body)
            .map_err(|e| auth_error(format!("invalid token response: {}", e)))?;
        let value = body
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| auth_error("no access_token in token response".to_string()))?;
        let expires_in = body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        let now = Timestamp::now();
        let expires_at = now
            .checked_add(SignedDuration::from_secs(expires_in))
            .unwrap_or(now);
        info!("[{}] Acquired access token", ctx.scac);
        Ok(Token { value, expires_at })
    }
}
