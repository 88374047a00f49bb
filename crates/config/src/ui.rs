use serde::Deserialize;

/// Settings the web frontend reads through `/frontend_settings`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UiConfig {
    pub auth_enabled: bool,
    pub feedback_enabled: bool,
    pub sanitize_answer: bool,
    pub title: String,
    pub logo: Option<String>,
    pub chat_logo: Option<String>,
    pub chat_title: String,
    pub chat_description: String,
    pub show_share_button: bool,
    pub show_chat_history_button: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            auth_enabled: true,
            feedback_enabled: false,
            sanitize_answer: false,
            title: "Contoso".to_string(),
            logo: None,
            chat_logo: None,
            chat_title: "Start chatting".to_string(),
            chat_description: "This chatbot is configured to answer your questions".to_string(),
            show_share_button: true,
            show_chat_history_button: true,
        }
    }
}
