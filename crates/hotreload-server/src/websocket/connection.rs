//! Socket lifecycle for one upgraded WebSocket.
//!
//! The socket is split: a writer task drains the session's
//! [`ChannelTransport`] queue into the sink, and the read loop feeds text
//! frames to a [`ConnectionHandler`]. Either side closing ends both.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::handler::{ConnectionHandler, Flow};
use super::transport::{ChannelTransport, Transport};
use crate::context::ServerContext;
use crate::errors::ServerError;
use crate::metrics::{CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, CONNECTION_DURATION_SECONDS};

/// How long the writer may take to flush after the read loop ends.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest close reason a close frame may carry.
const MAX_CLOSE_REASON: usize = 123;

/// Drive one connection until the client leaves, the session is closed
/// server-side, or `shutdown` fires.
#[instrument(skip_all, fields(session_id))]
pub async fn run_connection(socket: WebSocket, ctx: Arc<ServerContext>, shutdown: CancellationToken) {
    let started = Instant::now();
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);

    let (mut sink, mut stream) = socket.split();
    let (transport, mut outbound) = ChannelTransport::new(ctx.config.send_queue_capacity);
    let transport = Arc::new(transport);

    let writer_transport = Arc::clone(&transport);
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                        return;
                    }
                }
                () = writer_transport.closed() => break,
            }
        }
        // flush what was queued before close
        while let Ok(frame) = outbound.try_recv() {
            if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                return;
            }
        }
        let reason = writer_transport.close_reason().unwrap_or_default();
        let close = CloseFrame {
            code: close_code::NORMAL,
            reason: truncate(&reason, MAX_CLOSE_REASON).to_owned().into(),
        };
        let _ = sink.send(Message::Close(Some(close))).await;
    });

    let mut handler = ConnectionHandler::new(Arc::clone(&ctx), transport.clone());
    let reason = loop {
        tokio::select! {
            () = shutdown.cancelled() => break "server shutting down",
            () = transport.closed() => break "closed by server",
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if handler.handle_frame(text.as_str()).await == Flow::Close {
                        break "client closed connection";
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        if handler.handle_frame(text).await == Flow::Close {
                            break "client closed connection";
                        }
                    }
                    Err(_) => {
                        let err = ServerError::InvalidMessage("binary frame is not UTF-8".into());
                        handler.reply_error(&err).await;
                    }
                },
                Some(Ok(Message::Close(_))) | None => break "socket closed",
                // control frames are answered by the socket itself
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "socket read failed");
                    break "socket error";
                }
            }
        }
    };

    handler.finish(reason).await;
    transport.close(reason).await;

    let abort = writer.abort_handle();
    match tokio::time::timeout(WRITER_FLUSH_TIMEOUT, writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "socket writer failed"),
        Err(_) => {
            warn!("socket writer did not flush in time");
            abort.abort();
        }
    }

    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    debug!(reason, "connection finished");
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
