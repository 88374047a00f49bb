use indoc::indoc;
use integration_tests::*;
use serde_json::{Value, json};

#[tokio::test]
async fn settings_reflect_the_configuration() {
    let openai = MockAzureOpenAi::unscripted().await;

    let server = TestServer::builder()
        .openai(&openai, true)
        .config(indoc! {r#"
            [ui]
            title = "Northwind Assistant"
            chat_logo = "/chat.svg"
            feedback_enabled = true
            show_share_button = false
        "#})
        .build()
        .await;

    let response = server.client.get("/frontend_settings").await;
    assert_eq!(response.status(), 200);

    let settings: Value = response.json().await.unwrap();

    assert_eq!(
        settings,
        json!({
            "auth_enabled": true,
            "feedback_enabled": true,
            "ui": {
                "title": "Northwind Assistant",
                "logo": null,
                "chat_logo": "/chat.svg",
                "chat_title": "Start chatting",
                "chat_description": "This chatbot is configured to answer your questions",
                "show_share_button": false,
                "show_chat_history_button": true
            },
            "sanitize_answer": false,
            "oyd_enabled": null
        })
    );
}
