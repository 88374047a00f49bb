use indoc::indoc;
use integration_tests::*;
use serde_json::{Value, json};

#[tokio::test]
async fn provider_status_is_forwarded() {
    let openai = MockAzureOpenAi::start([Reply::Error(
        429,
        json!({ "error": { "code": "429", "message": "Rate limit exceeded" } }),
    )])
    .await;

    let server = TestServer::builder().openai(&openai, true).build().await;

    let (status, body) = server
        .converse(&json!({ "messages": [{ "role": "user", "content": "Hi" }] }))
        .await;

    assert_eq!(status, 429);
    insta::assert_snapshot!(body, @r#"{"error":"Rate limit exceeded"}"#);
}

#[tokio::test]
async fn non_json_requests_are_rejected() {
    let openai = MockAzureOpenAi::unscripted().await;
    let server = TestServer::builder().openai(&openai, true).build().await;

    let response = server.client.post_raw("/conversation", "text/plain", "Hi").await;

    assert_eq!(response.status(), 415);
    insta::assert_snapshot!(response.text().await.unwrap(), @r#"{"error":"request must be json"}"#);

    assert!(openai.requests().is_empty());
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let openai = MockAzureOpenAi::unscripted().await;
    let server = TestServer::builder().openai(&openai, true).build().await;

    let response = server
        .client
        .post_raw("/conversation", "application/json", r#"{"messages": [{"role": "pirate"}]}"#)
        .await;

    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    let error = body["error"].as_str().unwrap();

    assert!(error.starts_with("Invalid request: Failed to parse request"), "{error}");
    assert!(openai.requests().is_empty());
}

#[tokio::test]
async fn unreachable_provider_is_an_internal_error() {
    let server = TestServer::start(indoc! {r#"
        [openai]
        endpoint = "http://127.0.0.1:9/"
        model = "gpt-4o"
    "#})
    .await;

    let (status, body) = server
        .converse(&json!({ "messages": [{ "role": "user", "content": "Hi" }] }))
        .await;

    assert_eq!(status, 500);

    let body: Value = serde_json::from_str(&body).unwrap();
    let error = body["error"].as_str().unwrap();

    assert!(error.starts_with("Connection error:"), "{error}");
}
