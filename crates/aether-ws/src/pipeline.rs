//! Per-direction WebSocket pipeline (§4.I): reassembles fragmented
//! frames into whole messages, applies `permessage-deflate` at the
//! message (not frame) level, re-fragments outgoing messages to a
//! configured chunk size, and arbitrates the close handshake.
//!
//! One `WebSocketPipeline` is owned per direction of a connection —
//! client→proxy and proxy→origin each get their own, since masking and
//! (optionally) the negotiated deflate window differ per direction.

use aether_core::error::WebSocketError;

use crate::deflate::{Deflater, Inflater};
use crate::frame::{serialize_frame, try_decode_frame, Frame};
use crate::handshake::PermessageDeflateParams;
use crate::opcode::Opcode;

/// A complete, reassembled unit handed to the interceptor dispatcher or
/// the other side of the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close { code: Option<u16>, reason: String },
}

struct InProgressMessage {
    opcode: Opcode,
    compressed: bool,
    payload: Vec<u8>,
}

/// Default frame size the pipeline re-fragments outgoing messages to.
/// The original implementation chunks to avoid holding a single huge
/// frame in a write buffer; 16 KiB matches its default.
pub const DEFAULT_FRAGMENT_SIZE: usize = 16 * 1024;

pub struct WebSocketPipeline {
    buf: Vec<u8>,
    in_progress: Option<InProgressMessage>,
    inflater: Option<Inflater>,
    deflater: Option<Deflater>,
    masks_outgoing: bool,
    fragment_size: usize,
    close_sent: bool,
    close_received: bool,
}

impl WebSocketPipeline {
    /// `masks_outgoing` should be `true` for the client-facing leg
    /// (frames the proxy sends toward the real client are never
    /// masked... actually per RFC 6455 only client→server frames are
    /// masked) — set `true` only for the pipeline that emits frames as
    /// a WebSocket *client* (proxy→origin).
    pub fn new(masks_outgoing: bool, deflate: Option<PermessageDeflateParams>) -> Self {
        let (inflater, deflater) = match deflate {
            Some(params) => (
                Some(Inflater::new(params.server_max_window_bits, params.server_no_context_takeover)),
                Some(Deflater::new(params.client_max_window_bits, params.client_no_context_takeover)),
            ),
            None => (None, None),
        };
        Self {
            buf: Vec::new(),
            in_progress: None,
            inflater,
            deflater,
            masks_outgoing,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            close_sent: false,
            close_received: false,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Overrides the chunk size outgoing messages are re-fragmented to
    /// (§4.I "chunk sizes"). Takes effect on the next `encode_message` call.
    pub fn set_fragment_size(&mut self, size: usize) {
        self.fragment_size = size;
    }

    pub fn close_sent(&self) -> bool {
        self.close_sent
    }

    pub fn close_received(&self) -> bool {
        self.close_received
    }

    /// Both sides have now exchanged a close frame: the underlying
    /// transport can be torn down (§4.E Closing state transition).
    pub fn close_handshake_complete(&self) -> bool {
        self.close_sent && self.close_received
    }

    /// Tries to produce one complete, reassembled event from buffered
    /// bytes. Returns `Ok(None)` when more bytes are needed.
    pub fn poll_event(&mut self) -> Result<Option<PipelineEvent>, WebSocketError> {
        loop {
            let (frame, consumed) = match try_decode_frame(&self.buf)? {
                Some(pair) => pair,
                None => return Ok(None),
            };
            self.buf.drain(..consumed);

            if frame.header.opcode.is_control() {
                if let Some(event) = self.handle_control_frame(frame)? {
                    return Ok(Some(event));
                }
                continue;
            }

            if let Some(payload) = self.reassemble(frame)? {
                let (opcode, compressed, mut bytes) = payload;
                if compressed {
                    if let Some(inflater) = &mut self.inflater {
                        bytes = inflater.decompress_message(&bytes)?;
                    }
                }
                return Ok(Some(match opcode {
                    Opcode::Text => PipelineEvent::Text(
                        String::from_utf8(bytes)
                            .map_err(|e| WebSocketError::InvalidFrame(format!("invalid UTF-8 text message: {e}")))?,
                    ),
                    Opcode::Binary => PipelineEvent::Binary(bytes),
                    _ => unreachable!("reassemble only returns data opcodes"),
                }));
            }
        }
    }

    fn handle_control_frame(&mut self, frame: Frame) -> Result<Option<PipelineEvent>, WebSocketError> {
        match frame.header.opcode {
            Opcode::Ping => Ok(Some(PipelineEvent::Ping(frame.payload))),
            Opcode::Pong => Ok(Some(PipelineEvent::Pong(frame.payload))),
            Opcode::Close => {
                self.close_received = true;
                let (code, reason) = parse_close_payload(&frame.payload)?;
                Ok(Some(PipelineEvent::Close { code, reason }))
            }
            _ => unreachable!("control frame opcodes are Ping/Pong/Close"),
        }
    }

    fn reassemble(&mut self, frame: Frame) -> Result<Option<(Opcode, bool, Vec<u8>)>, WebSocketError> {
        match (&mut self.in_progress, frame.header.opcode) {
            (None, Opcode::Continuation) => Err(WebSocketError::UnexpectedOpcode),
            (None, opcode) => {
                let compressed = frame.header.rsv1;
                if frame.header.fin {
                    return Ok(Some((opcode, compressed, frame.payload)));
                }
                self.in_progress = Some(InProgressMessage {
                    opcode,
                    compressed,
                    payload: frame.payload,
                });
                Ok(None)
            }
            (Some(_), Opcode::Continuation) => {
                let mut in_progress = self.in_progress.take().expect("checked Some above");
                in_progress.payload.extend_from_slice(&frame.payload);
                if frame.header.fin {
                    Ok(Some((in_progress.opcode, in_progress.compressed, in_progress.payload)))
                } else {
                    self.in_progress = Some(in_progress);
                    Ok(None)
                }
            }
            (Some(_), _) => Err(WebSocketError::UnexpectedOpcode),
        }
    }

    /// Encodes a whole text/binary message as one or more frames,
    /// compressing and re-fragmenting as configured.
    pub fn encode_message(&mut self, opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>, WebSocketError> {
        let (payload, compressed) = match &mut self.deflater {
            Some(deflater) => (deflater.compress_message(payload)?, true),
            None => (payload.to_vec(), false),
        };

        let mask_key = self.mask_key();
        let mut out = Vec::new();
        if payload.is_empty() {
            let frame = Frame::new(opcode, Vec::new()).with_rsv1(compressed);
            out.extend_from_slice(&serialize_frame(&frame, mask_key)?);
            return Ok(out);
        }

        let chunks: Vec<&[u8]> = payload.chunks(self.fragment_size.max(1)).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let is_first = i == 0;
            let is_last = i == chunks.len() - 1;
            let frame_opcode = if is_first { opcode } else { Opcode::Continuation };
            let frame = Frame::new(frame_opcode, chunk.to_vec())
                .fragment(is_last)
                .with_rsv1(is_first && compressed);
            out.extend_from_slice(&serialize_frame(&frame, mask_key)?);
        }
        Ok(out)
    }

    pub fn encode_ping(&mut self, payload: Vec<u8>) -> Result<Vec<u8>, WebSocketError> {
        serialize_frame(&Frame::new(Opcode::Ping, payload), self.mask_key())
    }

    pub fn encode_pong(&mut self, payload: Vec<u8>) -> Result<Vec<u8>, WebSocketError> {
        serialize_frame(&Frame::new(Opcode::Pong, payload), self.mask_key())
    }

    /// Encodes this side's close frame, marking the local half of the
    /// close handshake as done only once serialization actually succeeds.
    pub fn encode_close(&mut self, code: Option<u16>, reason: &str) -> Result<Vec<u8>, WebSocketError> {
        let mut payload = Vec::new();
        if let Some(code) = code {
            payload.extend_from_slice(&code.to_be_bytes());
            payload.extend_from_slice(reason.as_bytes());
        }
        let bytes = serialize_frame(&Frame::new(Opcode::Close, payload), self.mask_key())?;
        self.close_sent = true;
        Ok(bytes)
    }

    fn mask_key(&self) -> Option<[u8; 4]> {
        if self.masks_outgoing {
            Some(rand::random())
        } else {
            None
        }
    }
}

fn parse_close_payload(payload: &[u8]) -> Result<(Option<u16>, String), WebSocketError> {
    if payload.is_empty() {
        return Ok((None, String::new()));
    }
    if payload.len() < 2 {
        return Err(WebSocketError::InvalidFrame("close frame payload must be 0 or >= 2 bytes".into()));
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8(payload[2..].to_vec())
        .map_err(|e| WebSocketError::InvalidFrame(format!("invalid UTF-8 close reason: {e}")))?;
    Ok((Some(code), reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_uncompressed_text_message() {
        let mut sender = WebSocketPipeline::new(true, None);
        let mut receiver = WebSocketPipeline::new(false, None);

        let bytes = sender.encode_message(Opcode::Text, b"hello").unwrap();
        receiver.feed(&bytes);
        let event = receiver.poll_event().unwrap().unwrap();
        assert_eq!(event, PipelineEvent::Text("hello".to_string()));
    }

    #[test]
    fn reassembles_fragmented_message() {
        let mut pipeline = WebSocketPipeline::new(false, None);
        pipeline.fragment_size = 4;
        let bytes = pipeline.encode_message(Opcode::Binary, b"twelve bytes").unwrap();

        let mut receiver = WebSocketPipeline::new(false, None);
        receiver.feed(&bytes);
        let event = receiver.poll_event().unwrap().unwrap();
        assert_eq!(event, PipelineEvent::Binary(b"twelve bytes".to_vec()));
    }

    #[test]
    fn roundtrips_compressed_message() {
        use crate::handshake::PermessageDeflateParams;
        let params = PermessageDeflateParams::default();
        let mut sender = WebSocketPipeline::new(true, Some(params));
        let mut receiver = WebSocketPipeline::new(false, Some(params));

        let message = b"compress me please".repeat(8);
        let bytes = sender.encode_message(Opcode::Binary, &message).unwrap();
        receiver.feed(&bytes);
        let event = receiver.poll_event().unwrap().unwrap();
        assert_eq!(event, PipelineEvent::Binary(message));
    }

    #[test]
    fn close_frame_marks_received_and_carries_code() {
        let mut sender = WebSocketPipeline::new(true, None);
        let bytes = sender.encode_close(Some(1000), "bye").unwrap();
        assert!(sender.close_sent());

        let mut receiver = WebSocketPipeline::new(false, None);
        receiver.feed(&bytes);
        let event = receiver.poll_event().unwrap().unwrap();
        assert_eq!(
            event,
            PipelineEvent::Close {
                code: Some(1000),
                reason: "bye".to_string()
            }
        );
        assert!(receiver.close_received());
    }

    #[test]
    fn continuation_without_start_is_rejected() {
        let mut pipeline = WebSocketPipeline::new(false, None);
        let frame = Frame::new(Opcode::Continuation, b"oops".to_vec());
        pipeline.feed(&serialize_frame(&frame, None).unwrap());
        assert!(pipeline.poll_event().is_err());
    }
}
