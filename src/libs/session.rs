use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::libs::backend::backend_traits::Backend;
use crate::libs::backend::records::{AuthEvent, AuthUser, ProfileUpdate, SignUpOutcome, SignUpRequest};
use crate::libs::core::error::AuthError;
use crate::libs::core::models::{non_empty, Identity};

pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(6);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    SignedOut,
    /// Sign-up succeeded but the e-mailed code has not been entered yet.
    PendingVerification { email: String },
    Authenticated(Identity),
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::Loading)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignUpForm {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub full_name: String,
}

/// Owns the signed-in identity. Dependents follow it through [`SessionStore::subscribe`].
pub struct SessionStore {
    backend: Arc<dyn Backend>,
    state: watch::Sender<SessionState>,
    /// Parent of every listener that must end with the session.
    scope: Mutex<CancellationToken>,
    /// Set when the init timeout forced `SignedOut` before hydration finished.
    forced_ready: AtomicBool,
    init_timeout: Duration,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn Backend>, init_timeout: Duration) -> Self {
        let (state, _) = watch::channel(SessionState::Loading);
        Self {
            backend,
            state,
            scope: Mutex::new(CancellationToken::new()),
            forced_ready: AtomicBool::new(false),
            init_timeout,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity().cloned()
    }

    /// Token cancelled when the current session ends.
    pub fn scope(&self) -> CancellationToken {
        self.scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    /// Resolves the stored session, giving up after the init timeout. Always
    /// returns a non-loading state; a hydration that finishes after the timeout
    /// still applies when nothing else happened in between.
    pub async fn initialize(self: &Arc<Self>) -> SessionState {
        let store = Arc::clone(self);
        let hydration = tokio::spawn(async move {
            let hydrated = store.hydrate().await;
            store.apply_hydration(hydrated);
        });

        match tokio::time::timeout(self.init_timeout, hydration).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "session hydration task failed"),
            Err(_) => warn!(
                timeout_ms = self.init_timeout.as_millis() as u64,
                "session check timed out, continuing signed out"
            ),
        }

        self.state.send_if_modified(|state| {
            if state.is_loading() {
                self.forced_ready.store(true, Ordering::SeqCst);
                *state = SessionState::SignedOut;
                true
            } else {
                false
            }
        });
        self.current()
    }

    async fn hydrate(&self) -> SessionState {
        match self.backend.current_session().await {
            Ok(Some(session)) => {
                SessionState::Authenticated(self.resolve_identity(&session.user).await)
            }
            Ok(None) => SessionState::SignedOut,
            Err(e) => {
                warn!(error = %e, "session check failed");
                SessionState::SignedOut
            }
        }
    }

    fn apply_hydration(&self, hydrated: SessionState) {
        let applied = self.state.send_if_modified(|state| {
            let apply = match (&*state, &hydrated) {
                (SessionState::Loading, _) => true,
                (SessionState::SignedOut, SessionState::Authenticated(_)) => {
                    self.forced_ready.load(Ordering::SeqCst)
                }
                _ => false,
            };
            if apply {
                *state = hydrated.clone();
            }
            apply
        });
        if applied {
            self.forced_ready.store(false, Ordering::SeqCst);
            debug!(state = ?hydrated, "session hydrated");
        }
    }

    /// Profile row if there is one, else a minimal identity from the auth user.
    async fn resolve_identity(&self, user: &AuthUser) -> Identity {
        match self.backend.load_profile(&user.id).await {
            Ok(Some(profile)) => Identity::from_profile(&profile),
            Ok(None) => {
                debug!(user_id = %user.id, "no profile row, using session metadata");
                Identity::fallback(user)
            }
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "profile fetch failed, using session metadata");
                Identity::fallback(user)
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        self.forced_ready.store(false, Ordering::SeqCst);
        self.state.send_replace(state);
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = required(email, "email")?;
        if password.is_empty() {
            return Err(AuthError::MissingField("password"));
        }

        let session = self.backend.sign_in_with_password(email, password).await?;
        let identity = self.resolve_identity(&session.user).await;
        info!(user_id = %identity.id, "signed in");
        self.set_state(SessionState::Authenticated(identity.clone()));
        Ok(identity)
    }

    /// Mismatched passwords are rejected here, before the backend is contacted.
    pub async fn sign_up(&self, form: &SignUpForm) -> Result<SessionState, AuthError> {
        if form.password != form.confirm_password {
            return Err(AuthError::PasswordMismatch);
        }
        let email = required(&form.email, "email")?;
        let full_name = required(&form.full_name, "name")?;
        if form.password.is_empty() {
            return Err(AuthError::MissingField("password"));
        }

        let request = SignUpRequest {
            email: email.to_string(),
            password: form.password.clone(),
            full_name: full_name.to_string(),
        };
        let state = match self.backend.sign_up(&request).await? {
            SignUpOutcome::SignedIn(session) => {
                SessionState::Authenticated(self.resolve_identity(&session.user).await)
            }
            SignUpOutcome::ConfirmationRequired { email } => {
                info!("sign-up needs e-mail verification");
                SessionState::PendingVerification { email }
            }
        };
        self.set_state(state.clone());
        Ok(state)
    }

    pub async fn verify_code(&self, email: &str, code: &str) -> Result<Identity, AuthError> {
        let email = required(email, "email")?;
        let code = required(code, "code")?;

        let session = self.backend.verify_otp(email, code).await?;
        let identity = self.resolve_identity(&session.user).await;
        info!(user_id = %identity.id, "e-mail verified");
        self.set_state(SessionState::Authenticated(identity.clone()));
        Ok(identity)
    }

    pub async fn resend_code(&self, email: &str) -> Result<(), AuthError> {
        let email = required(email, "email")?;
        self.backend.resend_otp(email).await?;
        Ok(())
    }

    /// Back out of code entry to the sign-in screen.
    pub fn cancel_verification(&self) {
        self.state.send_if_modified(|state| {
            if matches!(state, SessionState::PendingVerification { .. }) {
                *state = SessionState::SignedOut;
                true
            } else {
                false
            }
        });
    }

    /// Ends the session locally even when the backend call fails, and cancels
    /// every listener scoped to it.
    pub async fn sign_out(&self) {
        self.end_scope();
        if let Err(e) = self.backend.sign_out().await {
            warn!(error = %e, "backend sign-out failed");
        }
        self.set_state(SessionState::SignedOut);
        info!("signed out");
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Identity, AuthError> {
        let current = self.identity().ok_or(AuthError::NotSignedIn)?;
        if update.is_empty() {
            return Ok(current);
        }

        let profile = self.backend.update_profile(&current.id, update).await?;
        let identity = Identity::from_profile(&profile);
        self.state.send_if_modified(|state| match state {
            SessionState::Authenticated(existing) if existing.id == identity.id => {
                *existing = identity.clone();
                true
            }
            _ => false,
        });
        Ok(identity)
    }

    /// Follows backend auth events until `token` is cancelled.
    pub fn watch_auth_changes(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let mut events = self.backend.auth_events();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => store.on_auth_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("auth watcher stopped");
        })
    }

    async fn on_auth_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(session)
            | AuthEvent::TokenRefreshed(session)
            | AuthEvent::UserUpdated(session) => {
                // Skip events that a later sign-out already superseded.
                match self.backend.current_session().await {
                    Ok(Some(current)) if current.user.id == session.user.id => {}
                    _ => return,
                }
                let identity = self.resolve_identity(&session.user).await;
                debug!(user_id = %identity.id, "identity re-synchronised");
                if self.current().identity() != Some(&identity) {
                    self.set_state(SessionState::Authenticated(identity));
                }
            }
            AuthEvent::SignedOut => {
                if self.current().identity().is_some() {
                    self.end_scope();
                    self.set_state(SessionState::SignedOut);
                }
            }
        }
    }

    fn end_scope(&self) {
        let mut scope = self.scope.lock().unwrap_or_else(PoisonError::into_inner);
        scope.cancel();
        *scope = CancellationToken::new();
    }
}

fn required<'a>(value: &'a str, field: &'static str) -> Result<&'a str, AuthError> {
    non_empty(Some(value)).ok_or(AuthError::MissingField(field))
}
