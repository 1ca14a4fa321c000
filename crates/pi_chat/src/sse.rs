//! Answer stream framing.
//!
//! `text/event-stream` parsing is done by `eventsource-stream`; this module
//! maps each named event onto a [`WireFrame`].

use eventsource_stream::Eventsource;
use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use tracing::warn;

use crate::error::{ChatError, ChatResult};
use crate::frame::WireFrame;

/// Turn a byte stream into decoded frames.
///
/// Malformed payloads of known events are logged and skipped. A transport
/// error is yielded once and ends the stream.
pub fn decode_frames<S, B, E>(bytes: S) -> BoxStream<'static, ChatResult<WireFrame>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut failed = false;
    bytes
        .eventsource()
        .take_while(move |event| {
            let open = !failed;
            failed |= event.is_err();
            future::ready(open)
        })
        .filter_map(|event| async move {
            match event {
                Ok(event) => match WireFrame::decode(&event.event, &event.data) {
                    Ok(frame) => frame.map(Ok),
                    Err(e) => {
                        warn!("Dropping malformed '{}' event: {}", event.event, e);
                        None
                    }
                },
                Err(e) => Some(Err(ChatError::Transport(e.to_string()))),
            }
        })
        .boxed()
}
