//! WebSocket session state and the per-direction pipeline driver (§4.I).
//! Grounded on `websocket_pipeline.hpp`/`.cpp` in the original
//! implementation: two independent loops (client→server, server→client),
//! each owning a `WebSocketPipeline` (aether-ws) for its direction,
//! injecting ping/pong replies and forwarding or blocking reassembled
//! messages through the `websocket_message.received` interceptor.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aether_core::error::WebSocketError;
use aether_ws::handshake::PermessageDeflateParams;
use aether_ws::{Opcode, PipelineEvent, WebSocketPipeline};

use crate::events::{Interceptors, WebSocketMessageCtx, WebSocketMessageEvent};
use crate::flow::ConnectionFlow;
use crate::transport::Transport;

/// Mirrors §4.I "Chunk sizes reflect the 4-byte mask overhead on
/// client-bound frames so that wire frames remain ≤ 4096 bytes": frames
/// written toward the client (which this proxy never masks) use the
/// larger size; frames written toward the server (masked, per RFC 6455)
/// reserve 4 bytes for the mask key.
pub const SERVER_CHUNK_SIZE: usize = 4092;
pub const CLIENT_CHUNK_SIZE: usize = 4092 - 4;

/// Shared state for a single WebSocket connection: who closed first, the
/// close frame exchanged, and whether this flow is under interception
/// (vs. pure passthrough) (§3 "WebSocket pipeline").
pub struct WebSocketSession {
    pub closed: bool,
    pub closed_by: Option<ClosedBy>,
    pub close_code: Option<u16>,
    pub close_reason: String,
    pub intercepted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    Client,
    Server,
}

impl WebSocketSession {
    pub fn new(intercepted: bool) -> Self {
        Self {
            closed: false,
            closed_by: None,
            close_code: None,
            close_reason: String::new(),
            intercepted,
        }
    }
}

/// A reassembled message handed to `websocket_message.received`. An
/// interceptor may rewrite `payload` in place or set `blocked` to
/// suppress forwarding entirely (§4.I step 3, §8 S5).
pub struct InterceptedMessage {
    pub opcode: MessageOpcode,
    pub payload: Vec<u8>,
    pub blocked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOpcode {
    Text,
    Binary,
}

impl MessageOpcode {
    fn to_ws_opcode(self) -> Opcode {
        match self {
            MessageOpcode::Text => Opcode::Text,
            MessageOpcode::Binary => Opcode::Binary,
        }
    }
}

pub struct Direction {
    pub pipeline: WebSocketPipeline,
    pub chunk_size: usize,
}

/// Builds the client-facing and server-facing pipelines for one
/// WebSocket connection, after `permessage-deflate` negotiation (§4.H).
/// The client-facing pipeline never masks what it sends (server→client
/// direction); the server-facing one always does (proxy acting as a
/// WebSocket client toward the origin).
pub fn build_pipelines(deflate: Option<PermessageDeflateParams>) -> (Direction, Direction) {
    let mut to_client_pipeline = WebSocketPipeline::new(false, deflate);
    to_client_pipeline.set_fragment_size(CLIENT_CHUNK_SIZE);
    let mut to_server_pipeline = WebSocketPipeline::new(true, deflate);
    to_server_pipeline.set_fragment_size(SERVER_CHUNK_SIZE);

    let to_client = Direction {
        pipeline: to_client_pipeline,
        chunk_size: CLIENT_CHUNK_SIZE,
    };
    let to_server = Direction {
        pipeline: to_server_pipeline,
        chunk_size: SERVER_CHUNK_SIZE,
    };
    (to_client, to_server)
}

/// Runs the full-duplex WebSocket relay until either side closes or a
/// transport error occurs (§4.E `WebSocketActive`, §4.I main loop).
///
/// Takes `client`/`server` by value rather than reaching into `flow`:
/// the relay reads both directions concurrently via `select!`, and
/// holding `flow`'s mutex across that would deadlock against an
/// interceptor that locks `flow` for metadata mid-dispatch. Callers
/// check the sockets out with `ConnectionFlow::take_transports` first.
pub async fn run(
    flow: Arc<Mutex<ConnectionFlow>>,
    session: Arc<Mutex<WebSocketSession>>,
    mut client: Transport,
    mut server: Transport,
    mut to_client: Direction,
    mut to_server: Direction,
    timeout: Duration,
    interceptors: &Mutex<Interceptors>,
) -> Result<(Transport, Transport), WebSocketError> {
    let mut client_buf = vec![0u8; 16 * 1024];
    let mut server_buf = vec![0u8; 16 * 1024];

    loop {
        if session.lock().expect("session lock poisoned").closed {
            return Ok((client, server));
        }

        tokio::select! {
            n = read_transport(&mut client, &mut client_buf, timeout) => {
                let n = n?;
                pump_direction(
                    &flow,
                    &session,
                    &mut to_server,
                    &client_buf[..n],
                    &mut server,
                    &mut to_client,
                    &mut client,
                    timeout,
                    interceptors,
                    ClosedBy::Client,
                ).await?;
            }
            n = read_transport(&mut server, &mut server_buf, timeout) => {
                let n = n?;
                pump_direction(
                    &flow,
                    &session,
                    &mut to_client,
                    &server_buf[..n],
                    &mut client,
                    &mut to_server,
                    &mut server,
                    timeout,
                    interceptors,
                    ClosedBy::Server,
                ).await?;
            }
        }
    }
}

async fn read_transport(transport: &mut Transport, buf: &mut [u8], timeout: Duration) -> Result<usize, WebSocketError> {
    transport
        .read(buf, timeout)
        .await
        .map_err(|e| WebSocketError::SerializationError(e.to_string()))
}

#[allow(clippy::too_many_arguments)]
async fn pump_direction(
    flow: &Arc<Mutex<ConnectionFlow>>,
    session: &Arc<Mutex<WebSocketSession>>,
    dir: &mut Direction,
    data: &[u8],
    dest: &mut Transport,
    reply_dir: &mut Direction,
    source: &mut Transport,
    timeout: Duration,
    interceptors: &Mutex<Interceptors>,
    closed_by: ClosedBy,
) -> Result<(), WebSocketError> {
    dir.pipeline.feed(data);
    let mut outgoing = Vec::new();
    let mut reply = Vec::new();

    while let Some(event) = dir.pipeline.poll_event()? {
        match event {
            // Ping ⇒ inject a pong back toward whoever sent it, and still
            // forward the ping itself to the other side (§4.I step 3).
            PipelineEvent::Ping(payload) => {
                reply.extend_from_slice(&reply_dir.pipeline.encode_pong(payload.clone())?);
                outgoing.extend_from_slice(&dir.pipeline.encode_ping(payload)?);
            }
            PipelineEvent::Pong(payload) => {
                outgoing.extend_from_slice(&dir.pipeline.encode_pong(payload)?);
            }
            PipelineEvent::Close { code, reason } => {
                let mut guard = session.lock().expect("session lock poisoned");
                guard.closed = true;
                guard.closed_by = Some(closed_by);
                guard.close_code = code;
                guard.close_reason = reason.clone();
                outgoing.extend_from_slice(&dir.pipeline.encode_close(code, &reason)?);
            }
            PipelineEvent::Text(text) => {
                forward_message(flow, session, dir, interceptors, MessageOpcode::Text, text.into_bytes(), &mut outgoing)?;
            }
            PipelineEvent::Binary(bytes) => {
                forward_message(flow, session, dir, interceptors, MessageOpcode::Binary, bytes, &mut outgoing)?;
            }
        }
    }

    if !reply.is_empty() {
        source.write_all(&reply, timeout)
            .await
            .map_err(|e| WebSocketError::SerializationError(e.to_string()))?;
    }
    if !outgoing.is_empty() {
        dest.write_all(&outgoing, timeout)
            .await
            .map_err(|e| WebSocketError::SerializationError(e.to_string()))?;
    }
    Ok(())
}

fn forward_message(
    flow: &Arc<Mutex<ConnectionFlow>>,
    session: &Arc<Mutex<WebSocketSession>>,
    dir: &mut Direction,
    interceptors: &Mutex<Interceptors>,
    opcode: MessageOpcode,
    payload: Vec<u8>,
    outgoing: &mut Vec<u8>,
) -> Result<(), WebSocketError> {
    let intercepted = session.lock().expect("session lock poisoned").intercepted;

    let message = Arc::new(Mutex::new(InterceptedMessage {
        opcode,
        payload,
        blocked: false,
    }));

    if intercepted {
        let mut ctx = WebSocketMessageCtx {
            flow: flow.clone(),
            session: session.clone(),
            message: message.clone(),
        };
        interceptors
            .lock()
            .expect("interceptors lock poisoned")
            .websocket_message
            .dispatch(WebSocketMessageEvent::Received, &mut ctx);
    }

    let message = message.lock().expect("message lock poisoned");
    if message.blocked {
        return Ok(());
    }

    let frames = dir.pipeline.encode_message(message.opcode.to_ws_opcode(), &message.payload)?;
    outgoing.extend_from_slice(&frames);
    Ok(())
}
