use std::{mem, pin::Pin, sync::Arc};

use config::Config;
use context::UserSecurityContext;
use futures::{Stream, StreamExt, stream};
use serde_json::{Map, Value};

use crate::{
    dispatch::CompletionDispatcher,
    error::{ChatError, ChatResult},
    format::ResponseFormatter,
    function_call::{self, AccumulatedToolCall, FunctionCallState, Step},
    functions::{FunctionExecutor, FunctionRegistry},
    messages::{ChatRequest, ConversationMessage, ResponseEnvelope},
    provider::{ChunkStream, Dispatched, Provider},
    request::RequestBuilder,
};

/// How many times a single exchange may go back to the model with function results.
pub const MAX_FUNCTION_ROUNDS: usize = 5;

pub type EnvelopeStream = Pin<Box<dyn Stream<Item = ChatResult<ResponseEnvelope>> + Send>>;

/// The answer to a conversation request.
pub enum Answer {
    Complete(ResponseEnvelope),
    /// Envelopes produced as the provider streams, function rounds spliced in.
    Stream(EnvelopeStream),
}

/// Drives a conversation request through the pipeline.
pub struct ConversationOrchestrator {
    builder: RequestBuilder,
    dispatcher: CompletionDispatcher,
    executor: Arc<dyn FunctionExecutor>,
    functions_enabled: bool,
    streaming: bool,
}

impl ConversationOrchestrator {
    pub fn new(
        config: &Config,
        registry: Arc<FunctionRegistry>,
        provider: Arc<dyn Provider>,
        executor: Arc<dyn FunctionExecutor>,
    ) -> Self {
        Self {
            builder: RequestBuilder::new(config, registry),
            dispatcher: CompletionDispatcher::new(provider),
            executor,
            functions_enabled: config.functions.enabled,
            // Promptflow answers in one piece.
            streaming: config.openai.stream && config.promptflow.is_none(),
        }
    }

    /// Answers in the configured mode.
    ///
    /// Errors returned here happened before the first byte of the answer. Once streaming,
    /// failures are items of the stream.
    pub async fn converse(
        self: &Arc<Self>,
        request: ChatRequest,
        security_context: Option<UserSecurityContext>,
    ) -> ChatResult<Answer> {
        if self.streaming {
            let envelopes = Arc::clone(self).stream(request, security_context).await?;
            Ok(Answer::Stream(envelopes))
        } else {
            let envelope = self.complete(request, security_context).await?;
            Ok(Answer::Complete(envelope))
        }
    }

    /// Non-streaming exchange, with at most one function round.
    pub async fn complete(
        &self,
        request: ChatRequest,
        security_context: Option<UserSecurityContext>,
    ) -> ChatResult<ResponseEnvelope> {
        let ChatRequest {
            mut messages,
            history_metadata,
        } = request;

        let built = self.builder.build(&messages, security_context.clone(), true)?;
        let Dispatched {
            response,
            correlation_id,
        } = self.dispatcher.complete(built.request).await?;

        if self.functions_enabled {
            let tool_calls = response
                .choices
                .first()
                .and_then(|choice| choice.message.tool_calls.as_deref())
                .unwrap_or_default();

            let calls = function_call::accumulate(tool_calls)?;
            let synthetic = function_call::resolve(&calls, self.executor.as_ref()).await?;

            if !synthetic.is_empty() {
                messages.extend(synthetic);

                let built = self.builder.build(&messages, security_context, false)?;
                let second = self.dispatcher.complete(built.request).await?;

                let formatter = ResponseFormatter::new(&history_metadata, second.correlation_id.as_deref());
                return Ok(formatter.completion(&second.response));
            }
        }

        Ok(ResponseFormatter::new(&history_metadata, correlation_id.as_deref()).completion(&response))
    }

    /// Streaming exchange. The first provider call is made before returning.
    pub async fn stream(
        self: Arc<Self>,
        request: ChatRequest,
        security_context: Option<UserSecurityContext>,
    ) -> ChatResult<EnvelopeStream> {
        let ChatRequest {
            messages,
            history_metadata,
        } = request;

        let built = self.builder.build(&messages, security_context.clone(), true)?;
        let Dispatched {
            response,
            correlation_id,
        } = self.dispatcher.stream(built.request).await?;

        let exchange = Exchange {
            orchestrator: self,
            messages,
            history_metadata,
            security_context,
            rounds: 0,
            phase: Phase::Streaming {
                chunks: response,
                machine: FunctionCallState::Initial,
                correlation_id,
            },
        };

        Ok(Box::pin(stream::unfold(exchange, Exchange::next)))
    }
}

enum Phase {
    /// Forwarding one provider stream.
    Streaming {
        chunks: ChunkStream,
        machine: FunctionCallState,
        correlation_id: Option<String>,
    },
    Done,
}

/// State of one streaming exchange, carried from envelope to envelope.
struct Exchange {
    orchestrator: Arc<ConversationOrchestrator>,
    messages: Vec<ConversationMessage>,
    history_metadata: Map<String, Value>,
    security_context: Option<UserSecurityContext>,
    rounds: usize,
    phase: Phase,
}

impl Exchange {
    async fn next(mut self) -> Option<(ChatResult<ResponseEnvelope>, Self)> {
        loop {
            let Phase::Streaming {
                mut chunks,
                machine,
                correlation_id,
            } = mem::replace(&mut self.phase, Phase::Done)
            else {
                return None;
            };

            let chunk = match chunks.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(error)) => return Some((Err(error), self)),
                None => {
                    if matches!(machine, FunctionCallState::Streaming { .. }) {
                        log::warn!("The completion stream ended before its tool calls were complete, dropping them");
                    }

                    return None;
                }
            };

            let (machine, step) = if self.orchestrator.functions_enabled {
                match machine.advance(&chunk) {
                    Ok(advanced) => advanced,
                    Err(error) => return Some((Err(error), self)),
                }
            } else {
                (machine, Step::PassThrough)
            };

            match step {
                Step::PassThrough => {
                    let envelope =
                        ResponseFormatter::new(&self.history_metadata, correlation_id.as_deref()).chunk(&chunk);

                    self.phase = Phase::Streaming {
                        chunks,
                        machine,
                        correlation_id,
                    };

                    if let Some(envelope) = envelope {
                        return Some((Ok(envelope), self));
                    }
                }
                Step::Buffered => {
                    self.phase = Phase::Streaming {
                        chunks,
                        machine,
                        correlation_id,
                    };
                }
                Step::Completed(calls) => {
                    // Whatever the first completion still sends is not for the client.
                    drop(chunks);

                    match self.function_round(calls).await {
                        Ok(phase) => self.phase = phase,
                        Err(error) => return Some((Err(error), self)),
                    }
                }
            }
        }
    }

    /// Executes the calls and opens the stream of the answer that uses their results.
    async fn function_round(&mut self, calls: Vec<AccumulatedToolCall>) -> ChatResult<Phase> {
        self.rounds += 1;

        if self.rounds > MAX_FUNCTION_ROUNDS {
            return Err(ChatError::FunctionRoundsExceeded(MAX_FUNCTION_ROUNDS));
        }

        log::debug!("Function round {}: {} tool calls", self.rounds, calls.len());

        let orchestrator = Arc::clone(&self.orchestrator);
        let synthetic = function_call::resolve(&calls, orchestrator.executor.as_ref()).await?;

        self.messages.extend(synthetic);

        let built = orchestrator
            .builder
            .build(&self.messages, self.security_context.clone(), false)?;

        let Dispatched {
            response,
            correlation_id,
        } = orchestrator.dispatcher.stream(built.request).await?;

        Ok(Phase::Streaming {
            chunks: response,
            machine: FunctionCallState::Initial,
            correlation_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use config::Config;
    use futures::{StreamExt, stream};
    use indoc::{formatdoc, indoc};
    use serde_json::Map;

    use super::*;
    use crate::{
        functions::{FunctionDescriptor, ToolDescriptor},
        messages::{
            ChatCompletion, ChunkChoice, CompletionChoice, CompletionChunk, Delta, FinishReason, FunctionCall,
            FunctionFragment, ResponseMessage, Role, ToolCall, ToolCallFragment,
        },
        request::ModelRequest,
    };

    enum Reply {
        Stream(Vec<CompletionChunk>),
        StreamThenFail(Vec<CompletionChunk>),
        Complete(ChatCompletion),
        Fail(u16),
    }

    /// Answers provider calls from a script and records the requests.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<(Reply, &'static str)>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<(Reply, &'static str)>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ModelRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn next_reply(&self, request: &ModelRequest) -> (Reply, &'static str) {
            self.requests.lock().unwrap().push(request.clone());
            self.replies.lock().unwrap().pop_front().unwrap()
        }
    }

    fn rejected(status: u16) -> ChatError {
        ChatError::ProviderApiError {
            status,
            message: "Rate limit is exceeded.".to_string(),
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn complete(&self, request: &ModelRequest) -> ChatResult<Dispatched<ChatCompletion>> {
            match self.next_reply(request) {
                (Reply::Complete(completion), id) => Ok(Dispatched {
                    response: completion,
                    correlation_id: Some(id.to_string()),
                }),
                (Reply::Fail(status), _) => Err(rejected(status)),
                _ => unreachable!("script expects a streaming call"),
            }
        }

        async fn stream(&self, request: &ModelRequest) -> ChatResult<Dispatched<ChunkStream>> {
            let (chunks, id, fail) = match self.next_reply(request) {
                (Reply::Stream(chunks), id) => (chunks, id, false),
                (Reply::StreamThenFail(chunks), id) => (chunks, id, true),
                (Reply::Fail(status), _) => return Err(rejected(status)),
                (Reply::Complete(_), _) => unreachable!("script expects a non-streaming call"),
            };

            let failure = fail.then(|| Err(ChatError::ConnectionError("stream reset".to_string())));
            let items = chunks.into_iter().map(Ok).chain(failure);

            Ok(Dispatched {
                response: Box::pin(stream::iter(items.collect::<Vec<_>>())),
                correlation_id: Some(id.to_string()),
            })
        }
    }

    #[derive(Default)]
    struct CountingExecutor {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl FunctionExecutor for CountingExecutor {
        async fn execute(&self, name: &str, arguments: &str) -> ChatResult<Option<String>> {
            if name != "get_weather" {
                return Ok(None);
            }

            self.calls.lock().unwrap().push((name.to_string(), arguments.to_string()));

            Ok(Some("{\"forecast\": \"sunny\"}".to_string()))
        }
    }

    fn config(stream: bool) -> Config {
        Config::from_toml(&formatdoc! {r#"
            [openai]
            resource = "contoso"
            model = "gpt-4o"
            stream = {stream}

            [functions]
            enabled = true
            tools_base_url = "https://functions.example.com/api/tools"
            tool_base_url = "https://functions.example.com/api/tool"
        "#})
        .unwrap()
    }

    fn orchestrator(
        stream: bool,
        provider: Arc<ScriptedProvider>,
        executor: Arc<CountingExecutor>,
    ) -> Arc<ConversationOrchestrator> {
        let registry = Arc::new(FunctionRegistry::new(vec![ToolDescriptor {
            kind: "function".to_string(),
            function: FunctionDescriptor {
                name: "get_weather".to_string(),
                description: None,
                parameters: None,
                extra: Default::default(),
            },
            extra: Default::default(),
        }]));

        Arc::new(ConversationOrchestrator::new(&config(stream), registry, provider, executor))
    }

    fn request(question: &str) -> ChatRequest {
        let mut history_metadata = Map::new();
        history_metadata.insert("conversation_id".to_string(), "c-1".into());

        ChatRequest {
            messages: vec![ConversationMessage::user(question)],
            history_metadata,
        }
    }

    fn text(content: &str) -> CompletionChunk {
        CompletionChunk::from_delta(Delta {
            content: Some(content.to_string()),
            ..Default::default()
        })
    }

    fn tool_fragment(id: Option<&str>, name: Option<&str>, arguments: &str) -> CompletionChunk {
        CompletionChunk::from_delta(Delta {
            tool_calls: Some(vec![ToolCallFragment {
                index: Some(0),
                id: id.map(str::to_string),
                kind: None,
                function: FunctionFragment {
                    name: name.map(str::to_string),
                    arguments: Some(arguments.to_string()),
                },
            }]),
            ..Default::default()
        })
    }

    fn tool_calls_done() -> CompletionChunk {
        CompletionChunk {
            choices: vec![ChunkChoice {
                index: 0,
                delta: Some(Delta::default()),
                finish_reason: Some(FinishReason::ToolCalls),
            }],
            ..Default::default()
        }
    }

    fn tool_call_stream(name: &str) -> Vec<CompletionChunk> {
        vec![
            tool_fragment(Some("call_1"), Some(name), ""),
            tool_fragment(None, None, "{\"city\":"),
            tool_fragment(None, None, "\"Berlin\"}"),
            tool_calls_done(),
        ]
    }

    fn completion(message: ResponseMessage) -> ChatCompletion {
        ChatCompletion {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion".to_string(),
            created: 1718000000,
            model: "gpt-4o".to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                message,
                finish_reason: Some(FinishReason::Stop),
            }],
        }
    }

    fn text_completion(content: &str) -> ChatCompletion {
        completion(ResponseMessage {
            role: Some("assistant".to_string()),
            content: Some(content.to_string()),
            ..Default::default()
        })
    }

    async fn collect(answer: Answer) -> Vec<ChatResult<ResponseEnvelope>> {
        match answer {
            Answer::Stream(envelopes) => envelopes.collect().await,
            Answer::Complete(_) => unreachable!("streaming is configured"),
        }
    }

    fn contents(envelopes: &[ChatResult<ResponseEnvelope>]) -> Vec<String> {
        envelopes
            .iter()
            .map(|envelope| envelope.as_ref().unwrap().assistant_content())
            .collect()
    }

    #[tokio::test]
    async fn plain_answer_streams_through() {
        let provider = ScriptedProvider::new(vec![(Reply::Stream(vec![text("Hel"), text("lo")]), "apim-1")]);
        let executor = Arc::new(CountingExecutor::default());

        let answer = orchestrator(true, provider.clone(), executor.clone())
            .converse(request("hi"), None)
            .await
            .unwrap();

        let envelopes = collect(answer).await;

        assert_eq!(contents(&envelopes), ["Hel", "lo"]);
        assert_eq!(provider.requests().len(), 1);
        assert!(executor.calls.lock().unwrap().is_empty());

        let envelope = envelopes[0].as_ref().unwrap();

        assert_eq!(envelope.apim_request_id.as_deref(), Some("apim-1"));
        assert_eq!(envelope.history_metadata["conversation_id"], "c-1");
    }

    #[tokio::test]
    async fn one_tool_call_runs_once_and_dispatches_again() {
        let provider = ScriptedProvider::new(vec![
            (Reply::Stream(tool_call_stream("get_weather")), "apim-1"),
            (Reply::Stream(vec![text("It is "), text("sunny.")]), "apim-2"),
        ]);

        let executor = Arc::new(CountingExecutor::default());

        let answer = orchestrator(true, provider.clone(), executor.clone())
            .converse(request("Weather in Berlin?"), None)
            .await
            .unwrap();

        let envelopes = collect(answer).await;

        assert_eq!(contents(&envelopes), ["It is ", "sunny."]);
        assert!(
            envelopes
                .iter()
                .all(|e| e.as_ref().unwrap().apim_request_id.as_deref() == Some("apim-2"))
        );

        assert_eq!(
            *executor.calls.lock().unwrap(),
            vec![("get_weather".to_string(), "{\"city\":\"Berlin\"}".to_string())]
        );

        let requests = provider.requests();

        assert_eq!(requests.len(), 2);
        assert!(requests[0].tools.is_some());
        assert_eq!(requests[1].tools, None);

        let roles: Vec<_> = requests[1].messages.iter().map(ConversationMessage::role).collect();

        assert_eq!(roles, [Role::System, Role::User, Role::Assistant, Role::Function]);

        let ConversationMessage::Assistant(ref invocation) = requests[1].messages[2] else {
            unreachable!("third message is the invocation");
        };

        assert_eq!(invocation.content(), None);
        assert_eq!(
            invocation.called_function(),
            Some(&FunctionCall {
                name: "get_weather".to_string(),
                arguments: "{\"city\":\"Berlin\"}".to_string(),
            })
        );

        assert_eq!(requests[1].messages[3].text(), Some("{\"forecast\": \"sunny\"}"));
    }

    #[tokio::test]
    async fn unknown_tool_is_skipped() {
        let provider = ScriptedProvider::new(vec![
            (Reply::Stream(tool_call_stream("launch_rockets")), "apim-1"),
            (Reply::Stream(vec![text("I cannot do that.")]), "apim-2"),
        ]);

        let executor = Arc::new(CountingExecutor::default());

        let answer = orchestrator(true, provider.clone(), executor.clone())
            .converse(request("Launch the rockets"), None)
            .await
            .unwrap();

        let envelopes = collect(answer).await;

        assert_eq!(contents(&envelopes), ["I cannot do that."]);
        assert!(executor.calls.lock().unwrap().is_empty());

        let requests = provider.requests();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages, requests[0].messages);
    }

    #[tokio::test]
    async fn endless_function_calls_are_cut_off() {
        let replies = (0..=MAX_FUNCTION_ROUNDS)
            .map(|_| (Reply::Stream(tool_call_stream("get_weather")), "apim"))
            .collect();

        let provider = ScriptedProvider::new(replies);
        let executor = Arc::new(CountingExecutor::default());

        let answer = orchestrator(true, provider.clone(), executor.clone())
            .converse(request("Weather in Berlin?"), None)
            .await
            .unwrap();

        let envelopes = collect(answer).await;

        assert_eq!(envelopes.len(), 1);
        assert!(matches!(envelopes[0], Err(ChatError::FunctionRoundsExceeded(MAX_FUNCTION_ROUNDS))));
        assert_eq!(executor.calls.lock().unwrap().len(), MAX_FUNCTION_ROUNDS);
    }

    #[tokio::test]
    async fn unfinished_tool_calls_are_dropped() {
        let mut chunks = tool_call_stream("get_weather");
        chunks.pop();

        let provider = ScriptedProvider::new(vec![(Reply::Stream(chunks), "apim-1")]);
        let executor = Arc::new(CountingExecutor::default());

        let answer = orchestrator(true, provider.clone(), executor.clone())
            .converse(request("Weather in Berlin?"), None)
            .await
            .unwrap();

        let envelopes = collect(answer).await;

        assert!(envelopes.is_empty());
        assert!(executor.calls.lock().unwrap().is_empty());
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn promptflow_answers_in_one_piece() {
        let config = Config::from_toml(indoc! {r#"
            [openai]
            resource = "contoso"
            model = "gpt-4o"
            stream = true

            [promptflow]
            endpoint = "https://flow.example.com/score"
            api_key = "flow-key"
        "#})
        .unwrap();

        let provider = ScriptedProvider::new(vec![(Reply::Complete(text_completion("Sale items are final.")), "")]);
        let registry = Arc::new(FunctionRegistry::new(Vec::new()));
        let orchestrator = Arc::new(ConversationOrchestrator::new(
            &config,
            registry,
            provider,
            Arc::new(CountingExecutor::default()),
        ));

        let Answer::Complete(envelope) = orchestrator.converse(request("Refunds?"), None).await.unwrap() else {
            unreachable!("promptflow answers are not streamed");
        };

        assert_eq!(envelope.assistant_content(), "Sale items are final.");
    }

    #[tokio::test]
    async fn failure_before_streaming_is_an_error() {
        let provider = ScriptedProvider::new(vec![(Reply::Fail(429), "apim-1")]);

        let result = orchestrator(true, provider, Arc::default())
            .converse(request("hi"), None)
            .await;

        let Err(error) = result else {
            unreachable!("the provider rejected the call");
        };

        assert_eq!(error.status_code().as_u16(), 429);
    }

    #[tokio::test]
    async fn failure_mid_stream_ends_the_stream() {
        let provider = ScriptedProvider::new(vec![(Reply::StreamThenFail(vec![text("Hel")]), "apim-1")]);

        let answer = orchestrator(true, provider, Arc::default())
            .converse(request("hi"), None)
            .await
            .unwrap();

        let envelopes = collect(answer).await;

        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].as_ref().unwrap().assistant_content(), "Hel");
        assert!(matches!(envelopes[1], Err(ChatError::ConnectionError(_))));
    }

    #[tokio::test]
    async fn streamed_and_complete_answers_match() {
        let streaming = ScriptedProvider::new(vec![(Reply::Stream(vec![text("A"), text("B"), text("C")]), "apim-1")]);

        let answer = orchestrator(true, streaming, Arc::default())
            .converse(request("hi"), None)
            .await
            .unwrap();

        let envelopes = collect(answer).await;

        assert_eq!(envelopes.len(), 3);

        let streamed: String = contents(&envelopes).concat();

        let complete = ScriptedProvider::new(vec![(Reply::Complete(text_completion("ABC")), "apim-1")]);

        let Answer::Complete(envelope) = orchestrator(false, complete, Arc::default())
            .converse(request("hi"), None)
            .await
            .unwrap()
        else {
            unreachable!("streaming is disabled");
        };

        assert_eq!(streamed, "ABC");
        assert_eq!(envelope.assistant_content(), streamed);
    }

    #[tokio::test]
    async fn complete_answer_with_function_call() {
        let invocation = completion(ResponseMessage {
            role: Some("assistant".to_string()),
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: "call_1".to_string(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: "get_weather".to_string(),
                    arguments: "{\"city\":\"Berlin\"}".to_string(),
                },
            }]),
            context: None,
        });

        let provider = ScriptedProvider::new(vec![
            (Reply::Complete(invocation), "apim-1"),
            (Reply::Complete(text_completion("It is sunny.")), "apim-2"),
        ]);

        let executor = Arc::new(CountingExecutor::default());

        let envelope = orchestrator(false, provider.clone(), executor.clone())
            .complete(request("Weather in Berlin?"), None)
            .await
            .unwrap();

        assert_eq!(envelope.assistant_content(), "It is sunny.");
        assert_eq!(envelope.apim_request_id.as_deref(), Some("apim-2"));
        assert_eq!(executor.calls.lock().unwrap().len(), 1);
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn complete_answer_with_unknown_function_is_not_redispatched() {
        let invocation = completion(ResponseMessage {
            role: Some("assistant".to_string()),
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: "call_1".to_string(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: "launch_rockets".to_string(),
                    arguments: "{}".to_string(),
                },
            }]),
            context: None,
        });

        let provider = ScriptedProvider::new(vec![(Reply::Complete(invocation), "apim-1")]);

        let envelope = orchestrator(false, provider.clone(), Arc::default())
            .complete(request("Launch the rockets"), None)
            .await
            .unwrap();

        assert_eq!(envelope.assistant_content(), "");
        assert_eq!(envelope.apim_request_id.as_deref(), Some("apim-1"));
        assert_eq!(provider.requests().len(), 1);
    }
}
