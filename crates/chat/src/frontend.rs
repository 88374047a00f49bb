use config::Config;
use serde::Serialize;

/// What the web frontend needs to know to render itself.
#[derive(Debug, Clone, Serialize)]
pub struct FrontendSettings {
    auth_enabled: bool,
    feedback_enabled: bool,
    ui: UiSettings,
    sanitize_answer: bool,
    /// The data source type, if answers are grounded on one.
    oyd_enabled: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct UiSettings {
    title: String,
    logo: Option<String>,
    chat_logo: Option<String>,
    chat_title: String,
    chat_description: String,
    show_share_button: bool,
    show_chat_history_button: bool,
}

impl From<&Config> for FrontendSettings {
    fn from(config: &Config) -> Self {
        let ui = &config.ui;

        Self {
            auth_enabled: ui.auth_enabled,
            feedback_enabled: ui.feedback_enabled,
            ui: UiSettings {
                title: ui.title.clone(),
                logo: ui.logo.clone(),
                chat_logo: ui.chat_logo.clone().or_else(|| ui.logo.clone()),
                chat_title: ui.chat_title.clone(),
                chat_description: ui.chat_description.clone(),
                show_share_button: ui.show_share_button,
                show_chat_history_button: ui.show_chat_history_button,
            },
            sanitize_answer: ui.sanitize_answer,
            oyd_enabled: config.datasource.as_ref().map(|source| source.kind.clone()),
        }
    }
}
