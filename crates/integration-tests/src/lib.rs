pub mod functions;
pub mod openai;

use std::{net::SocketAddr, time::Duration};

use config::Config;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use server::ServeConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use functions::MockFunctionHost;
pub use openai::{MockAzureOpenAi, RecordedRequest, Reply};

/// Test client for making HTTP requests to the test server
#[derive(Clone)]
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
    custom_headers: HeaderMap,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            custom_headers: HeaderMap::new(),
        }
    }

    /// Add a custom header to be included in all requests
    pub fn push_header(&mut self, key: &str, value: impl AsRef<str>) {
        let header_name = HeaderName::from_bytes(key.as_bytes()).unwrap();
        let header_value = HeaderValue::from_str(value.as_ref()).unwrap();
        self.custom_headers.insert(header_name, header_value);
    }

    /// Send a POST request to the given path with JSON body
    pub async fn post<T: serde::Serialize>(&self, path: &str, body: &T) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .headers(self.custom_headers.clone())
            .json(body)
            .send()
            .await
            .unwrap()
    }

    /// Send a POST request with a raw body and content type
    pub async fn post_raw(&self, path: &str, content_type: &str, body: impl Into<reqwest::Body>) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .headers(self.custom_headers.clone())
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .unwrap()
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .unwrap()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// A running gateway, stopped when dropped.
pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    pub config: Config,
    _task_handle: tokio::task::JoinHandle<()>,
    shutdown_signal: CancellationToken,
}

impl TestServer {
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder::default()
    }

    /// Start a new test server with the given TOML configuration
    pub async fn start(config_toml: &str) -> Self {
        server::logger::init("server=debug,chat=debug,config=debug,integration_tests=debug");

        // Go through the file loader so placeholders and validation behave as in production
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("chatgate.toml");
        std::fs::write(&config_path, config_toml).unwrap();

        let config = Config::load(&config_path).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let shutdown_signal = CancellationToken::new();

        let serve_config = ServeConfig {
            listen_address: address,
            config: config.clone(),
            shutdown_signal: shutdown_signal.clone(),
        };

        let task_handle = tokio::spawn(async move {
            // Release the port for the server to bind
            drop(listener);

            if let Err(e) = server::serve(serve_config).await {
                log::error!("Test server failed: {e}");
            }
        });

        let client = TestClient::new(format!("http://{address}"));
        wait_until_listening(address).await;

        Self {
            client,
            address,
            config,
            _task_handle: task_handle,
            shutdown_signal,
        }
    }

    /// Posts a conversation and returns the status and raw body.
    pub async fn converse(&self, body: &Value) -> (u16, String) {
        let response = self.client.post("/conversation", body).await;
        let status = response.status().as_u16();

        (status, response.text().await.unwrap())
    }

    /// Posts a conversation and parses every line of the streamed answer.
    pub async fn converse_lines(&self, body: &Value) -> Vec<Value> {
        let response = self.client.post("/conversation", body).await;

        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok()),
            Some("application/json-lines")
        );

        let mut body = String::new();
        let mut chunks = response.bytes_stream();

        while let Some(chunk) = chunks.next().await {
            body.push_str(std::str::from_utf8(&chunk.unwrap()).unwrap());
        }

        body.lines().map(|line| serde_json::from_str(line).unwrap()).collect()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown_signal.cancel();
    }
}

async fn wait_until_listening(address: SocketAddr) {
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(address).await.is_ok() {
            return;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Assembles the configuration of a test server around its mock upstreams.
#[derive(Default)]
pub struct TestServerBuilder {
    config: String,
}

impl TestServerBuilder {
    /// Points the `[openai]` section at the mock provider.
    pub fn openai(mut self, provider: &MockAzureOpenAi, stream: bool) -> Self {
        self.config.push_str(&indoc::formatdoc! {r#"
            [openai]
            endpoint = "{}"
            key = "test-key"
            model = "gpt-4o"
            stream = {stream}

        "#, provider.endpoint()});

        self
    }

    /// Enables function calling against the mock function host.
    pub fn functions(mut self, host: &MockFunctionHost) -> Self {
        self.config.push_str(&indoc::formatdoc! {r#"
            [functions]
            enabled = true
            tools_base_url = "{base}/api/tools"
            tools_key = "tools-code"
            tool_base_url = "{base}/api/tool"
            tool_key = "tool-code"

        "#, base = host.base_url()});

        self
    }

    /// Appends further configuration sections.
    pub fn config(mut self, toml: &str) -> Self {
        self.config.push_str(toml);
        self.config.push('\n');
        self
    }

    pub async fn build(self) -> TestServer {
        TestServer::start(&self.config).await
    }
}
