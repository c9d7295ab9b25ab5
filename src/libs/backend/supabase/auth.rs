use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::libs::backend::backend_traits::BackendError;
use crate::libs::backend::records::{AuthEvent, AuthSession, AuthUser, SignUpOutcome, SignUpRequest};
use crate::libs::backend::supabase::rest::ApiErrorBody;
use crate::libs::core::error::AuthError;

/// Sessions this close to expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 60;
const AUTH_EVENT_BUFFER_SIZE: usize = 16;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl From<TokenResponse> for AuthSession {
    fn from(token: TokenResponse) -> Self {
        let expires_at = token
            .expires_at
            .or_else(|| token.expires_in.map(|secs| Utc::now().timestamp() + secs));
        AuthSession {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user: token.user,
        }
    }
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

/// GoTrue client holding the current session in memory.
pub struct GoTrueClient {
    http: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl GoTrueClient {
    pub fn new(http: Client, project_url: &str, anon_key: &str) -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_BUFFER_SIZE);
        Self {
            http,
            base_url: format!("{}/auth/v1", project_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
            session: RwLock::new(None),
            events,
        }
    }

    /// Restores a persisted session from its refresh token.
    pub async fn restore(&self, refresh_token: &str) -> Result<AuthSession, BackendError> {
        let session = self.refresh(refresh_token).await?;
        self.install(session.clone(), AuthEvent::SignedIn(session.clone()))
            .await;
        Ok(session)
    }

    /// Current session, refreshed first when it is about to expire. A refresh the
    /// server rejects ends the session.
    pub async fn session(&self) -> Result<Option<AuthSession>, BackendError> {
        let current = self.session.read().await.clone();
        let Some(session) = current else {
            return Ok(None);
        };
        if !session.expires_within(Utc::now(), REFRESH_MARGIN_SECS) {
            return Ok(Some(session));
        }

        debug!(user_id = %session.user.id, "refreshing access token");
        match self.refresh(&session.refresh_token).await {
            Ok(refreshed) => {
                self.install(
                    refreshed.clone(),
                    AuthEvent::TokenRefreshed(refreshed.clone()),
                )
                .await;
                Ok(Some(refreshed))
            }
            Err(BackendError::Auth(e)) => {
                warn!(error = %e, "refresh token rejected, signing out");
                self.clear().await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Bearer token for data requests: the user's access token, or the anon key.
    pub async fn bearer(&self) -> Result<String, BackendError> {
        Ok(self
            .session()
            .await?
            .map(|session| session.access_token)
            .unwrap_or_else(|| self.anon_key.clone()))
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError> {
        let body = serde_json::to_value(PasswordGrant { email, password })?;
        let session: AuthSession = self
            .post::<TokenResponse>("token?grant_type=password", &body, email)
            .await?
            .into();
        info!(user_id = %session.user.id, "signed in");
        self.install(session.clone(), AuthEvent::SignedIn(session.clone()))
            .await;
        Ok(session)
    }

    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, BackendError> {
        let body = json!({
            "email": request.email,
            "password": request.password,
            "data": { "full_name": request.full_name },
        });
        let response: Value = self.post("signup", &body, &request.email).await?;

        match parse_sign_up(response, &request.email)? {
            SignUpOutcome::SignedIn(session) => {
                self.install(session.clone(), AuthEvent::SignedIn(session.clone()))
                    .await;
                Ok(SignUpOutcome::SignedIn(session))
            }
            pending => {
                info!("sign-up awaiting email confirmation");
                Ok(pending)
            }
        }
    }

    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<AuthSession, BackendError> {
        let body = json!({ "type": "signup", "email": email, "token": code });
        let session: AuthSession = self
            .post::<TokenResponse>("verify", &body, email)
            .await?
            .into();
        self.install(session.clone(), AuthEvent::SignedIn(session.clone()))
            .await;
        Ok(session)
    }

    pub async fn resend_otp(&self, email: &str) -> Result<(), BackendError> {
        let body = json!({ "type": "signup", "email": email });
        let _: Value = self.post("resend", &body, email).await?;
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<(), BackendError> {
        let Some(session) = self.session.read().await.clone() else {
            return Ok(());
        };

        let response = self
            .http
            .post(format!("{}/logout", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await;
        // The local session ends even if the server-side revoke fails.
        match response {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "remote sign-out rejected");
            }
            Err(e) => warn!(error = %e, "remote sign-out failed"),
            Ok(_) => {}
        }
        self.clear().await;
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, BackendError> {
        let body = json!({ "refresh_token": refresh_token });
        Ok(self
            .post::<TokenResponse>("token?grant_type=refresh_token", &body, "")
            .await?
            .into())
    }

    async fn install(&self, session: AuthSession, event: AuthEvent) {
        *self.session.write().await = Some(session);
        let _ = self.events.send(event);
    }

    async fn clear(&self) {
        let previous = self.session.write().await.take();
        if previous.is_some() {
            let _ = self.events.send(AuthEvent::SignedOut);
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        email: &str,
    ) -> Result<T, BackendError> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(map_auth_error(status.as_u16(), &body, email))
        }
    }
}

/// Signup answers with a full token response when e-mail confirmation is off and
/// with the bare user object otherwise. A user object without identities is how
/// GoTrue reports an already registered address while confirmation is pending.
fn parse_sign_up(response: Value, email: &str) -> Result<SignUpOutcome, BackendError> {
    if response.get("access_token").is_some() {
        let token: TokenResponse = serde_json::from_value(response)?;
        return Ok(SignUpOutcome::SignedIn(token.into()));
    }

    let user = response.get("user").unwrap_or(&response);
    if let Some(Value::Array(identities)) = user.get("identities") {
        if identities.is_empty() {
            return Err(AuthError::UserAlreadyExists(email.to_string()).into());
        }
    }
    Ok(SignUpOutcome::ConfirmationRequired {
        email: email.to_string(),
    })
}

fn map_auth_error(status: u16, body: &str, email: &str) -> BackendError {
    let parsed = ApiErrorBody::parse(body);
    let text = parsed.text().unwrap_or("").to_string();
    let lowered = text.to_lowercase();

    let auth = match parsed.code() {
        Some("email_not_confirmed") => Some(AuthError::EmailNotConfirmed),
        Some("invalid_grant") if lowered.contains("email not confirmed") => {
            Some(AuthError::EmailNotConfirmed)
        }
        Some("invalid_credentials") | Some("invalid_grant") => Some(AuthError::InvalidCredentials),
        Some("otp_expired") | Some("otp_disabled") => Some(AuthError::InvalidCode),
        Some("user_already_exists") | Some("email_exists") => {
            Some(AuthError::UserAlreadyExists(email.to_string()))
        }
        _ if lowered.contains("token has expired or is invalid") => Some(AuthError::InvalidCode),
        _ if (400..500).contains(&status) && !text.is_empty() => Some(AuthError::Rejected(text.clone())),
        _ => None,
    };

    match auth {
        Some(auth) => BackendError::Auth(auth),
        None => BackendError::Api {
            status,
            message: if text.is_empty() { body.trim().to_string() } else { text },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_of(err: BackendError) -> AuthError {
        match err {
            BackendError::Auth(auth) => auth,
            other => panic!("expected auth error, got {:?}", other),
        }
    }

    #[test]
    fn maps_gotrue_error_codes() {
        let invalid = map_auth_error(
            400,
            r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#,
            "a@b.c",
        );
        assert_eq!(auth_of(invalid), AuthError::InvalidCredentials);

        let expired = map_auth_error(
            403,
            r#"{"code":403,"error_code":"otp_expired","msg":"Token has expired or is invalid"}"#,
            "a@b.c",
        );
        assert_eq!(auth_of(expired), AuthError::InvalidCode);

        let unconfirmed = map_auth_error(
            400,
            r#"{"error":"invalid_grant","error_description":"Email not confirmed"}"#,
            "a@b.c",
        );
        assert_eq!(auth_of(unconfirmed), AuthError::EmailNotConfirmed);

        let exists = map_auth_error(
            422,
            r#"{"code":422,"error_code":"user_already_exists","msg":"User already registered"}"#,
            "a@b.c",
        );
        assert_eq!(
            auth_of(exists),
            AuthError::UserAlreadyExists("a@b.c".to_string())
        );
    }

    #[test]
    fn server_failures_stay_api_errors() {
        assert!(matches!(
            map_auth_error(503, "upstream down", "a@b.c"),
            BackendError::Api { status: 503, .. }
        ));
    }

    #[test]
    fn sign_up_response_shapes() {
        let signed_in = parse_sign_up(
            json!({
                "access_token": "at",
                "refresh_token": "rt",
                "expires_in": 3600,
                "user": { "id": "u1", "email": "a@b.c" }
            }),
            "a@b.c",
        )
        .expect("token response");
        assert!(matches!(signed_in, SignUpOutcome::SignedIn(ref s) if s.user.id == "u1"));

        let pending = parse_sign_up(
            json!({ "id": "u1", "email": "a@b.c", "identities": [{ "id": "i1" }] }),
            "a@b.c",
        )
        .expect("user response");
        assert_eq!(
            pending,
            SignUpOutcome::ConfirmationRequired {
                email: "a@b.c".to_string()
            }
        );

        let duplicate = parse_sign_up(json!({ "id": "u1", "identities": [] }), "a@b.c")
            .expect_err("duplicate address");
        assert_eq!(
            auth_of(duplicate),
            AuthError::UserAlreadyExists("a@b.c".to_string())
        );
    }
}
