use thiserror::Error;

use crate::libs::assistant::AssistantError;
use crate::libs::backend::backend_traits::BackendError;
use crate::libs::conversation::ConversationError;
use crate::libs::feed::FeedError;

/// Authentication failures. These are shown inline and never change session state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("The verification code is invalid or has expired")]
    InvalidCode,
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Email address has not been confirmed yet")]
    EmailNotConfirmed,
    #[error("An account already exists for {0}")]
    UserAlreadyExists(String),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("No signed in user")]
    NotSignedIn,
    #[error("{0}")]
    Rejected(String),
    #[error("Authentication service unavailable: {0}")]
    Unavailable(String),
}

impl From<BackendError> for AuthError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Auth(auth) => auth,
            BackendError::NotAuthenticated => AuthError::NotSignedIn,
            other => AuthError::Unavailable(other.to_string()),
        }
    }
}

/// Generative AI service failures. The assistant converts these to fallbacks.
#[derive(Error, Debug)]
pub enum AiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("AI service returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("AI service is not configured")]
    NotConfigured,
    #[error("Failed to parse AI response: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {}", .keys.join(", "))]
    Missing { keys: Vec<String> },
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error(transparent)]
    Assistant(#[from] AssistantError),
    #[error("Sign in to continue")]
    NotMounted,
}
