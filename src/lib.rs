pub mod libs;

use crate::libs::core::models;
use crate::libs::router::View;
use crate::libs::sandbox;
use crate::libs::uniffi::models::ViewTab;

pub use crate::libs::app::{App, AppContext};
pub use crate::libs::core::config::{AppConfig, ConfigStatus};
pub use crate::libs::core::error::{AppError, AuthError, ConfigError};
pub use crate::libs::core::logging::init_logging;
pub use crate::libs::uniffi::client::{ClientError, VibogramClient};

uniffi::setup_scaffolding!();

/// Deterministic avatar for users without a picture.
#[uniffi::export]
pub fn placeholder_avatar_url(seed: String) -> String {
    models::placeholder_avatar(&seed)
}

/// Main tabs in navigation order.
#[uniffi::export]
pub fn view_tabs() -> Vec<ViewTab> {
    View::ALL.into_iter().map(ViewTab::from).collect()
}

#[uniffi::export]
pub fn view_label(tab: ViewTab) -> String {
    View::from(tab).label().to_string()
}

#[uniffi::export]
pub fn language_for_file(file_name: String) -> Option<String> {
    sandbox::language_for(&file_name).map(str::to_string)
}
