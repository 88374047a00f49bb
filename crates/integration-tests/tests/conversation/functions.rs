use integration_tests::{
    functions::ToolInvocation,
    openai::{
        arguments_chunk, finish_chunk, text_chunk, text_completion, tool_call_chunk, tool_call_completion,
    },
    *,
};
use serde_json::{Value, json};

fn weather_call() -> Reply {
    Reply::Stream(vec![
        tool_call_chunk(0, "call_1", "get_weather", r#"{"city":"#),
        arguments_chunk(0, r#""Paris"}"#),
        finish_chunk("tool_calls"),
    ])
}

fn content(lines: &[Value]) -> String {
    lines
        .iter()
        .flat_map(|line| line["choices"][0]["messages"].as_array().cloned().unwrap_or_default())
        .filter_map(|message| message["content"].as_str().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn streamed_tool_call_is_executed_and_answered() {
    let host = MockFunctionHost::new().with_tool("get_weather", "Sunny, 22°C").start().await;

    let openai = MockAzureOpenAi::start([
        weather_call(),
        Reply::Stream(vec![text_chunk("It is sunny "), text_chunk("in Paris."), finish_chunk("stop")]),
    ])
    .await;

    let server = TestServer::builder().openai(&openai, true).functions(&host).build().await;

    let lines = server
        .converse_lines(&json!({ "messages": [{ "role": "user", "content": "Weather in Paris?" }] }))
        .await;

    // Nothing of the tool call itself reaches the client.
    assert_eq!(lines.len(), 3);
    assert_eq!(content(&lines), "It is sunny in Paris.");
    assert_eq!(lines[2]["choices"][0]["end_turn"], true);
    assert_eq!(lines[0]["apim-request-id"], "apim-2");

    assert_eq!(
        host.invocations(),
        [ToolInvocation {
            tool_name: "get_weather".to_string(),
            tool_arguments: json!({ "city": "Paris" }),
        }]
    );

    assert_eq!(
        host.access_codes(),
        [Some("tools-code".to_string()), Some("tool-code".to_string())]
    );

    let requests = openai.requests();
    assert_eq!(requests.len(), 2);

    assert_eq!(requests[0].body["tools"][0]["function"]["name"], "get_weather");
    assert_eq!(requests[0].roles(), ["system", "user"]);

    assert_eq!(requests[1].body.get("tools"), None);
    assert_eq!(requests[1].roles(), ["system", "user", "assistant", "function"]);

    assert_eq!(
        requests[1].body["messages"][2],
        json!({
            "role": "assistant",
            "content": null,
            "function_call": { "name": "get_weather", "arguments": "{\"city\":\"Paris\"}" }
        })
    );

    assert_eq!(
        requests[1].body["messages"][3],
        json!({ "role": "function", "name": "get_weather", "content": "Sunny, 22°C" })
    );
}

#[tokio::test]
async fn text_before_the_tool_call_is_streamed() {
    let host = MockFunctionHost::new().with_tool("get_weather", "Rain").start().await;

    let openai = MockAzureOpenAi::start([
        Reply::Stream(vec![
            text_chunk("Let me check. "),
            tool_call_chunk(0, "call_1", "get_weather", r#"{"city":"Oslo"}"#),
            finish_chunk("tool_calls"),
        ]),
        Reply::Stream(vec![text_chunk("Rain in Oslo."), finish_chunk("stop")]),
    ])
    .await;

    let server = TestServer::builder().openai(&openai, true).functions(&host).build().await;

    let lines = server
        .converse_lines(&json!({ "messages": [{ "role": "user", "content": "Weather in Oslo?" }] }))
        .await;

    assert_eq!(content(&lines), "Let me check. Rain in Oslo.");
    assert_eq!(lines[0]["apim-request-id"], "apim-1");
    assert_eq!(lines.last().unwrap()["apim-request-id"], "apim-2");
}

#[tokio::test]
async fn unknown_tool_is_not_executed() {
    let host = MockFunctionHost::new().with_tool("get_weather", "Sunny").start().await;

    let openai = MockAzureOpenAi::start([
        Reply::Stream(vec![
            tool_call_chunk(0, "call_1", "delete_everything", "{}"),
            finish_chunk("tool_calls"),
        ]),
        Reply::Stream(vec![text_chunk("I cannot do that."), finish_chunk("stop")]),
    ])
    .await;

    let server = TestServer::builder().openai(&openai, true).functions(&host).build().await;

    let lines = server
        .converse_lines(&json!({ "messages": [{ "role": "user", "content": "Delete everything" }] }))
        .await;

    assert_eq!(content(&lines), "I cannot do that.");
    assert!(host.invocations().is_empty());

    let requests = openai.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].roles(), ["system", "user"]);
}

#[tokio::test]
async fn failing_function_ends_the_stream_with_an_error() {
    let host = MockFunctionHost::new().with_failing_tool("get_weather").start().await;
    let openai = MockAzureOpenAi::start([weather_call()]).await;

    let server = TestServer::builder().openai(&openai, true).functions(&host).build().await;

    let lines = server
        .converse_lines(&json!({ "messages": [{ "role": "user", "content": "Weather in Paris?" }] }))
        .await;

    assert_eq!(lines.len(), 1);

    insta::assert_snapshot!(
        lines[0]["error"].as_str().unwrap(),
        @"Function 'get_weather' failed: function host answered with status 404 Not Found"
    );

    assert_eq!(openai.requests().len(), 1);
}

#[tokio::test]
async fn tools_are_not_offered_when_functions_are_disabled() {
    let openai = MockAzureOpenAi::start([Reply::Stream(vec![text_chunk("Hi"), finish_chunk("stop")])]).await;
    let server = TestServer::builder().openai(&openai, true).build().await;

    server
        .converse_lines(&json!({ "messages": [{ "role": "user", "content": "Hi" }] }))
        .await;

    assert_eq!(openai.requests()[0].body.get("tools"), None);
}

#[tokio::test]
async fn non_streaming_function_call_is_answered_once() {
    let host = MockFunctionHost::new().with_tool("get_weather", "Sunny").start().await;

    let openai = MockAzureOpenAi::start([
        Reply::Complete(tool_call_completion("call_1", "get_weather", r#"{"city":"Paris"}"#)),
        Reply::Complete(text_completion("Sunny in Paris.")),
    ])
    .await;

    let server = TestServer::builder().openai(&openai, false).functions(&host).build().await;

    let (status, body) = server
        .converse(&json!({ "messages": [{ "role": "user", "content": "Weather in Paris?" }] }))
        .await;

    assert_eq!(status, 200);

    let envelope: Value = serde_json::from_str(&body).unwrap();

    assert_eq!(
        envelope["choices"][0]["messages"],
        json!([{ "role": "assistant", "content": "Sunny in Paris." }])
    );
    assert_eq!(envelope["apim-request-id"], "apim-2");

    assert_eq!(host.invocations().len(), 1);
    assert_eq!(
        openai.requests()[1].roles(),
        ["system", "user", "assistant", "function"]
    );
}
