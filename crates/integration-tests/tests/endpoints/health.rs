use indoc::indoc;
use integration_tests::*;

#[tokio::test]
async fn enabled_by_default() {
    let openai = MockAzureOpenAi::unscripted().await;
    let server = TestServer::builder().openai(&openai, true).build().await;

    let response = server.client.get("/health").await;
    assert_eq!(response.status(), 200);

    insta::assert_snapshot!(response.text().await.unwrap(), @r#"{"status":"healthy"}"#);
}

#[tokio::test]
async fn custom_path() {
    let openai = MockAzureOpenAi::unscripted().await;

    let server = TestServer::builder()
        .openai(&openai, true)
        .config(indoc! {r#"
            [server.health]
            path = "/healthz"
        "#})
        .build()
        .await;

    assert_eq!(server.client.get("/healthz").await.status(), 200);
    assert_eq!(server.client.get("/health").await.status(), 404);
}

#[tokio::test]
async fn disabled() {
    let openai = MockAzureOpenAi::unscripted().await;

    let server = TestServer::builder()
        .openai(&openai, true)
        .config(indoc! {r#"
            [server.health]
            enabled = false
        "#})
        .build()
        .await;

    assert_eq!(server.client.get("/health").await.status(), 404);
}
