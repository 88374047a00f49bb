use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

use futures::Stream;
use pin_project::pin_project;

use crate::{
    error::{ChatError, ChatResult, ErrorDocument},
    messages::ResponseEnvelope,
};

pub const CONTENT_TYPE: &str = "application/json-lines";

/// Serializes envelopes as newline-delimited JSON, one line per envelope.
///
/// A failure ends the body with a final `{"error": ...}` line.
pub fn frame<S>(envelopes: S) -> NdjsonStream<S>
where
    S: Stream<Item = ChatResult<ResponseEnvelope>>,
{
    NdjsonStream {
        inner: envelopes,
        finished: false,
    }
}

#[pin_project]
pub struct NdjsonStream<S> {
    #[pin]
    inner: S,
    finished: bool,
}

impl<S> Stream for NdjsonStream<S>
where
    S: Stream<Item = ChatResult<ResponseEnvelope>>,
{
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if *this.finished {
            return Poll::Ready(None);
        }

        let line = match ready!(this.inner.poll_next(cx)) {
            Some(Ok(envelope)) => match sonic_rs::to_string(&envelope) {
                Ok(json) => json,
                Err(e) => {
                    log::error!("Failed to serialize response envelope: {e}");
                    *this.finished = true;
                    error_line(&ChatError::InternalError(None))
                }
            },
            Some(Err(error)) => {
                log::error!("Conversation stream failed: {error}");
                *this.finished = true;
                error_line(&error)
            }
            None => {
                *this.finished = true;
                return Poll::Ready(None);
            }
        };

        Poll::Ready(Some(line + "\n"))
    }
}

fn error_line(error: &ChatError) -> String {
    sonic_rs::to_string(&ErrorDocument::from(error))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string())
}
