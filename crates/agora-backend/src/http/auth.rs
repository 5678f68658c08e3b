//! Auth gateway over the backend's token-grant endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::broadcast;

use agora_core::Identity;

use crate::AuthResult;
use crate::auth::{AuthEvent, AuthGateway, Credentials, SignUpRequest};
use crate::error::AuthError;

use super::{HttpBackend, TokenSet};

// =============================================================================
// Wire types
// =============================================================================

/// Token-grant response: tokens plus the user they belong to.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    user: WireUser,
}

/// The gateway's user representation.
#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    email: Option<String>,
    #[serde(default)]
    user_metadata: serde_json::Value,
}

impl WireUser {
    /// Maps the wire user onto the identity claims this core tracks.
    fn into_identity(self) -> AuthResult<Identity> {
        let email = self
            .email
            .ok_or_else(|| AuthError::protocol("user response missing email claim"))?;
        let mut identity = Identity::new(self.id, email);
        if let Some(name) = self.user_metadata.get("display_name").and_then(|v| v.as_str()) {
            identity = identity.with_display_name(name);
        }
        Ok(identity)
    }
}

/// Error body shape shared by the auth endpoints. All fields are optional;
/// the endpoints are not consistent about which they populate.
#[derive(Debug, Default, Deserialize)]
struct AuthErrorBody {
    error_code: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
}

impl AuthErrorBody {
    fn message(&self) -> String {
        self.error_description
            .clone()
            .or_else(|| self.msg.clone())
            .unwrap_or_else(|| "no error detail".to_string())
    }
}

// =============================================================================
// Response handling
// =============================================================================

impl HttpBackend {
    /// Decodes a token-grant success response and installs the session.
    async fn install_session(&self, response: reqwest::Response) -> AuthResult<Identity> {
        let grant: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::protocol(format!("malformed token response: {e}")))?;
        let identity = grant.user.into_identity()?;

        let mut tokens = self.tokens.write().await;
        *tokens = Some(TokenSet {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            identity: identity.clone(),
        });
        Ok(identity)
    }

    /// Maps a non-2xx auth response to an error, consuming the body.
    async fn auth_failure(response: reqwest::Response) -> AuthError {
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body: AuthErrorBody = response.json().await.unwrap_or_default();

        match status.as_u16() {
            429 => AuthError::RateLimited { retry_after },
            400 | 401 if body.error_code.as_deref() == Some("user_already_exists") => {
                AuthError::already_registered(body.message())
            }
            400 | 401 | 403 => AuthError::InvalidCredentials,
            status => AuthError::backend(status, body.message()),
        }
    }

    fn auth_transport_error(e: reqwest::Error) -> AuthError {
        AuthError::network(e.to_string())
    }
}

/// Reads a `Retry-After` seconds value, if the gateway sent one.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// =============================================================================
// AuthGateway implementation
// =============================================================================

#[async_trait]
impl AuthGateway for HttpBackend {
    async fn session(&self) -> AuthResult<Option<Identity>> {
        let access_token = match self.tokens.read().await.as_ref() {
            Some(tokens) => tokens.access_token.clone(),
            None => return Ok(None),
        };

        let response = self
            .client
            .get(self.endpoint(&["auth", "v1", "user"]))
            .header("apikey", &self.config.api_key)
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(Self::auth_transport_error)?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            // The backend no longer recognizes the token.
            tracing::debug!("held session rejected by gateway");
            *self.tokens.write().await = None;
            self.emit(AuthEvent::SignedOut);
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::auth_failure(response).await);
        }

        let user: WireUser = response
            .json()
            .await
            .map_err(|e| AuthError::protocol(format!("malformed user response: {e}")))?;
        let identity = user.into_identity()?;

        if let Some(tokens) = self.tokens.write().await.as_mut() {
            tokens.identity = identity.clone();
        }
        Ok(Some(identity))
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> AuthResult<Identity> {
        let mut url = self.endpoint(&["auth", "v1", "token"]);
        url.query_pairs_mut().append_pair("grant_type", "password");

        let response = self
            .client
            .post(url)
            .header("apikey", &self.config.api_key)
            .json(credentials)
            .send()
            .await
            .map_err(Self::auth_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::auth_failure(response).await);
        }

        let identity = self.install_session(response).await?;
        tracing::info!(user = %identity.user_id, "signed in");
        self.emit(AuthEvent::SignedIn(identity.clone()));
        Ok(identity)
    }

    async fn sign_up(&self, request: &SignUpRequest) -> AuthResult<Identity> {
        let body = serde_json::json!({
            "email": request.email,
            "password": request.password,
            "data": request.metadata,
        });

        let response = self
            .client
            .post(self.endpoint(&["auth", "v1", "signup"]))
            .header("apikey", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::auth_transport_error)?;

        match response.status().as_u16() {
            409 | 422 => {
                let _ = response.bytes().await;
                return Err(AuthError::already_registered(&request.email));
            }
            status if !(200..300).contains(&status) => {
                return Err(Self::auth_failure(response).await);
            }
            _ => {}
        }

        let identity = self.install_session(response).await?;
        tracing::info!(user = %identity.user_id, "signed up");
        self.emit(AuthEvent::SignedIn(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let held = self.tokens.write().await.take();
        let Some(tokens) = held else {
            return Ok(());
        };

        tracing::info!(user = %tokens.identity.user_id, "signing out");
        self.emit(AuthEvent::SignedOut);

        let response = self
            .client
            .post(self.endpoint(&["auth", "v1", "logout"]))
            .header("apikey", &self.config.api_key)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(Self::auth_transport_error)?;

        // The token may already be dead server-side; that is still a
        // successful sign-out from this client's point of view.
        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status().is_success()
        {
            return Ok(());
        }
        Err(Self::auth_failure(response).await)
    }

    async fn refresh_session(&self) -> AuthResult<Option<Identity>> {
        let refresh_token = match self.tokens.read().await.as_ref() {
            Some(tokens) => tokens.refresh_token.clone(),
            None => return Ok(None),
        };

        let mut url = self.endpoint(&["auth", "v1", "token"]);
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");

        let response = self
            .client
            .post(url)
            .header("apikey", &self.config.api_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(Self::auth_transport_error)?;

        match response.status().as_u16() {
            400 | 401 => {
                // Refresh token revoked or expired: the session is gone.
                let _ = response.bytes().await;
                tracing::info!("refresh rejected, dropping session");
                *self.tokens.write().await = None;
                self.emit(AuthEvent::SignedOut);
                Ok(None)
            }
            status if !(200..300).contains(&status) => Err(Self::auth_failure(response).await),
            _ => {
                let identity = self.install_session(response).await?;
                tracing::debug!(user = %identity.user_id, "session refreshed");
                self.emit(AuthEvent::TokenRefreshed(identity.clone()));
                Ok(Some(identity))
            }
        }
    }

    fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events_tx.subscribe()
    }
}
