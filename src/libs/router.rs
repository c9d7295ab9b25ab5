use crate::libs::core::config::ConfigStatus;
use crate::libs::session::SessionState;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum View {
    #[default]
    Feed,
    Chat,
    Assistant,
    CodeSandbox,
    Profile,
}

impl View {
    pub const ALL: [View; 5] = [
        View::Feed,
        View::Chat,
        View::Assistant,
        View::CodeSandbox,
        View::Profile,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            View::Feed => "Home",
            View::Chat => "Chat",
            View::Assistant => "AI",
            View::CodeSandbox => "Code",
            View::Profile => "Profile",
        }
    }
}

/// What the shell should render, after the configuration and session gates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Screen {
    ConfigurationError { missing: Vec<String> },
    Loading,
    Login,
    VerifyCode { email: String },
    Main(View),
}

/// Tab selection plus the slide-out sidebar. Any view can be selected at any
/// time; the authentication gate lives in [`ViewRouter::screen`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewRouter {
    current: View,
    sidebar_open: bool,
}

impl ViewRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> View {
        self.current
    }

    /// Selecting a view also closes the sidebar.
    pub fn select(&mut self, view: View) {
        self.current = view;
        self.sidebar_open = false;
    }

    pub fn sidebar_open(&self) -> bool {
        self.sidebar_open
    }

    pub fn toggle_sidebar(&mut self) {
        self.sidebar_open = !self.sidebar_open;
    }

    pub fn close_sidebar(&mut self) {
        self.sidebar_open = false;
    }

    pub fn screen(&self, config: &ConfigStatus, session: &SessionState) -> Screen {
        if let ConfigStatus::Missing(keys) = config {
            return Screen::ConfigurationError {
                missing: keys.clone(),
            };
        }
        match session {
            SessionState::Loading => Screen::Loading,
            SessionState::SignedOut => Screen::Login,
            SessionState::PendingVerification { email } => Screen::VerifyCode {
                email: email.clone(),
            },
            SessionState::Authenticated(_) => Screen::Main(self.current),
        }
    }
}
