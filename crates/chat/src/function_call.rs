//! Detection of function calls in a completion.
//!
//! A streamed tool call arrives in pieces: the first fragment carries the call id and the
//! function name, the following ones carry slices of the JSON arguments. The model finishes
//! its tool calls with a chunk that has no tool call fragments at all.
//!
//! [`FunctionCallState`] is advanced by value, one chunk at a time:
//!
//! ```text
//! Initial ──fragments──▶ Streaming ──no fragments──▶ Completed
//!    ▲  │                 │     ▲
//!    └──┘ no fragments    └─────┘ fragments
//! ```
//!
//! Calls are expected one after the other. Fragments of two calls interleaved with each
//! other are rejected.

use std::mem;

use crate::{
    error::{ChatError, ChatResult},
    functions::FunctionExecutor,
    messages::{
        AssistantMessage, CompletionChunk, ConversationMessage, Delta, FunctionCall, FunctionFragment,
        FunctionMessage, ToolCall, ToolCallFragment,
    },
};

/// A tool call with all of its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatedToolCall {
    pub id: String,
    pub name: String,
    /// The concatenated argument fragments, in arrival order.
    pub arguments: String,
}

/// The tool call whose arguments are being received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    id: String,
    name: String,
    index: Option<u32>,
}

impl PendingCall {
    fn seal(self, arguments: String) -> AccumulatedToolCall {
        AccumulatedToolCall {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FunctionCallState {
    /// No function call is happening.
    #[default]
    Initial,
    /// Tool call fragments are being collected.
    Streaming {
        collected: Vec<AccumulatedToolCall>,
        pending: Option<PendingCall>,
        arguments: String,
    },
    /// All tool calls of the completion were received.
    Completed { calls: Vec<AccumulatedToolCall> },
}

/// What the caller should do with the chunk that was just consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Ordinary content, forward it.
    PassThrough,
    /// Part of a tool call, do not forward it.
    Buffered,
    /// The tool calls are complete. Execute them and ask the model again.
    Completed(Vec<AccumulatedToolCall>),
}

impl FunctionCallState {
    /// Consumes one chunk.
    pub fn advance(self, chunk: &CompletionChunk) -> ChatResult<(Self, Step)> {
        // Only chunks with choices move the machine.
        let Some(choice) = chunk.choices.first() else {
            let step = self.idle_step();
            return Ok((self, step));
        };

        let fragments = choice
            .delta
            .as_ref()
            .map(Delta::tool_call_fragments)
            .unwrap_or_default();

        match self {
            Self::Completed { .. } => Ok((self, Step::PassThrough)),
            Self::Initial if fragments.is_empty() => Ok((self, Step::PassThrough)),
            Self::Initial => Self::absorb(Vec::new(), None, String::new(), fragments),
            Self::Streaming {
                mut collected,
                pending,
                arguments,
            } if fragments.is_empty() => {
                if let Some(pending) = pending {
                    collected.push(pending.seal(arguments));
                }

                let step = Step::Completed(collected.clone());
                Ok((Self::Completed { calls: collected }, step))
            }
            Self::Streaming {
                collected,
                pending,
                arguments,
            } => Self::absorb(collected, pending, arguments, fragments),
        }
    }

    fn absorb(
        mut collected: Vec<AccumulatedToolCall>,
        mut pending: Option<PendingCall>,
        mut arguments: String,
        fragments: &[ToolCallFragment],
    ) -> ChatResult<(Self, Step)> {
        for fragment in fragments {
            let piece = fragment.function.arguments.as_deref().unwrap_or_default();

            // Some deployments send `"id": ""` on continuation fragments.
            if let Some(id) = fragment.id.as_deref().filter(|id| !id.is_empty()) {
                if let Some(previous) = pending.take() {
                    collected.push(previous.seal(mem::take(&mut arguments)));
                }

                pending = Some(PendingCall {
                    id: id.to_string(),
                    name: fragment.function.name.clone().unwrap_or_default(),
                    index: fragment.index,
                });

                arguments.push_str(piece);
                continue;
            }

            let Some(ref mut current) = pending else {
                return Err(ChatError::InternalError(Some(
                    "Received tool call arguments before the tool call id".to_string(),
                )));
            };

            if let (Some(expected), Some(received)) = (current.index, fragment.index)
                && expected != received
            {
                return Err(ChatError::InterleavedToolCalls {
                    pending: expected,
                    received,
                });
            }

            if current.name.is_empty()
                && let Some(ref name) = fragment.function.name
            {
                current.name = name.clone();
            }

            arguments.push_str(piece);
        }

        let state = Self::Streaming {
            collected,
            pending,
            arguments,
        };

        Ok((state, Step::Buffered))
    }

    fn idle_step(&self) -> Step {
        match self {
            Self::Streaming { .. } => Step::Buffered,
            Self::Initial | Self::Completed { .. } => Step::PassThrough,
        }
    }
}

/// Folds the tool calls of a non-streamed completion through the same machine.
pub fn accumulate(tool_calls: &[ToolCall]) -> ChatResult<Vec<AccumulatedToolCall>> {
    let fragments = tool_calls
        .iter()
        .enumerate()
        .map(|(index, call)| ToolCallFragment {
            index: u32::try_from(index).ok(),
            id: Some(call.id.clone()),
            kind: Some(call.kind.clone()),
            function: FunctionFragment {
                name: Some(call.function.name.clone()),
                arguments: Some(call.function.arguments.clone()),
            },
        })
        .collect();

    let calls = CompletionChunk::from_delta(Delta {
        tool_calls: Some(fragments),
        ..Default::default()
    });

    let (state, _) = FunctionCallState::Initial.advance(&calls)?;
    let (_, step) = state.advance(&CompletionChunk::from_delta(Delta::default()))?;

    match step {
        Step::Completed(calls) => Ok(calls),
        Step::PassThrough | Step::Buffered => Ok(Vec::new()),
    }
}

/// Executes the calls in order and returns the messages recording them.
///
/// Every executed call yields an assistant message with the invocation, followed by a
/// function message with its result. Calls the executor skips yield nothing.
pub async fn resolve(
    calls: &[AccumulatedToolCall],
    executor: &dyn FunctionExecutor,
) -> ChatResult<Vec<ConversationMessage>> {
    let mut messages = Vec::with_capacity(calls.len() * 2);

    for call in calls {
        let Some(result) = executor.execute(&call.name, &call.arguments).await? else {
            log::debug!("Function call {} to '{}' was not executed", call.id, call.name);
            continue;
        };

        messages.push(ConversationMessage::Assistant(AssistantMessage::function_call(
            FunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        )));

        messages.push(ConversationMessage::Function(FunctionMessage {
            name: call.name.clone(),
            content: result,
            context: None,
        }));
    }

    Ok(messages)
}
