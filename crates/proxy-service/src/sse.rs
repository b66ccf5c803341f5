//! Render executor output into the HTTP response each dialect expects.

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream as futures_stream;
use std::convert::Infallible;
use upstream_proxy_core::translators::ClientFrame;

/// Which dialect's SSE framing convention a caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Claude,
    OpenAi,
}

/// Turn the executor's frame list into the response the client dialect
/// expects. A single [`ClientFrame::Unary`] renders as plain JSON; anything
/// else renders as an SSE stream, framed per `dialect`.
pub fn render(frames: Vec<ClientFrame>, dialect: Dialect) -> Response {
    if let [ClientFrame::Unary(value)] = frames.as_slice() {
        return axum::Json(value.clone()).into_response();
    }

    let events: Vec<Result<Event, Infallible>> = frames
        .into_iter()
        .filter_map(|frame| match (frame, dialect) {
            (ClientFrame::Unary(value), _) => Some(Ok(Event::default().data(value.to_string()))),
            (ClientFrame::Event { event, data }, Dialect::Claude) => {
                Some(Ok(Event::default().event(event).data(data.to_string())))
            }
            (ClientFrame::Event { data, .. }, Dialect::OpenAi) => Some(Ok(Event::default().data(data.to_string()))),
            (ClientFrame::Done, Dialect::OpenAi) => Some(Ok(Event::default().data("[DONE]"))),
            (ClientFrame::Done, Dialect::Claude) => None,
        })
        .collect();

    Sse::new(futures_stream::iter(events))
        .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)).text("keep-alive"))
        .into_response()
}
