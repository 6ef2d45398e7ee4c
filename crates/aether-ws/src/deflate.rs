//! `permessage-deflate` (RFC 7692) message compression/decompression.
//!
//! Grounded on `permessage_deflate.cpp` in the original implementation:
//! every compressed message is deflated with a sync flush, the trailing
//! 4-octet marker (`00 00 ff ff`) is stripped before sending and
//! re-appended before inflating, and each side's compression context is
//! reset between messages only when its own `*_no_context_takeover`
//! parameter was negotiated.

use aether_core::error::WebSocketError;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

pub struct Deflater {
    compress: Compress,
    no_context_takeover: bool,
}

impl Deflater {
    pub fn new(window_bits: u8, no_context_takeover: bool) -> Self {
        Self {
            compress: Compress::new_with_window_bits(Compression::default(), false, window_bits),
            no_context_takeover,
        }
    }

    /// Compresses one whole message payload, stripping the trailing
    /// empty-block marker so it can be re-appended on the other end.
    pub fn compress_message(&mut self, data: &[u8]) -> Result<Vec<u8>, WebSocketError> {
        let mut out = run_compress(&mut self.compress, data, FlushCompress::Sync)?;
        if out.ends_with(&DEFLATE_TRAILER) {
            out.truncate(out.len() - DEFLATE_TRAILER.len());
        }
        if self.no_context_takeover {
            self.compress.reset();
        }
        Ok(out)
    }
}

pub struct Inflater {
    decompress: Decompress,
    no_context_takeover: bool,
}

impl Inflater {
    pub fn new(window_bits: u8, no_context_takeover: bool) -> Self {
        Self {
            decompress: Decompress::new_with_window_bits(false, window_bits),
            no_context_takeover,
        }
    }

    /// Decompresses one whole message payload, after re-appending the
    /// trailer the sender stripped.
    pub fn decompress_message(&mut self, data: &[u8]) -> Result<Vec<u8>, WebSocketError> {
        let mut input = Vec::with_capacity(data.len() + DEFLATE_TRAILER.len());
        input.extend_from_slice(data);
        input.extend_from_slice(&DEFLATE_TRAILER);

        let out = run_decompress(&mut self.decompress, &input, FlushDecompress::Sync)?;
        if self.no_context_takeover {
            self.decompress.reset(false);
        }
        Ok(out)
    }
}

fn run_compress(compress: &mut Compress, input: &[u8], flush: FlushCompress) -> Result<Vec<u8>, WebSocketError> {
    let mut result = Vec::with_capacity(input.len());
    let mut scratch = [0u8; 8192];
    let mut input_pos = 0usize;

    loop {
        let before_in = compress.total_in();
        let before_out = compress.total_out();
        let status = compress
            .compress(&input[input_pos..], &mut scratch, flush)
            .map_err(|e| WebSocketError::ZlibError(e.to_string()))?;
        let consumed = (compress.total_in() - before_in) as usize;
        let produced = (compress.total_out() - before_out) as usize;
        result.extend_from_slice(&scratch[..produced]);
        input_pos += consumed;

        if status == Status::StreamEnd {
            break;
        }
        if input_pos >= input.len() && produced == 0 {
            break;
        }
    }
    Ok(result)
}

fn run_decompress(decompress: &mut Decompress, input: &[u8], flush: FlushDecompress) -> Result<Vec<u8>, WebSocketError> {
    let mut result = Vec::with_capacity(input.len() * 3);
    let mut scratch = [0u8; 8192];
    let mut input_pos = 0usize;

    loop {
        let before_in = decompress.total_in();
        let before_out = decompress.total_out();
        let status = decompress
            .decompress(&input[input_pos..], &mut scratch, flush)
            .map_err(|e| WebSocketError::ZlibError(e.to_string()))?;
        let consumed = (decompress.total_in() - before_in) as usize;
        let produced = (decompress.total_out() - before_out) as usize;
        result.extend_from_slice(&scratch[..produced]);
        input_pos += consumed;

        if status == Status::StreamEnd {
            break;
        }
        if input_pos >= input.len() && produced == 0 {
            break;
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_message() {
        let mut deflater = Deflater::new(15, false);
        let mut inflater = Inflater::new(15, false);

        let message = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let compressed = deflater.compress_message(&message).unwrap();
        assert!(compressed.len() < message.len());
        let decompressed = inflater.decompress_message(&compressed).unwrap();
        assert_eq!(decompressed, message);
    }

    #[test]
    fn context_reset_between_messages_still_roundtrips() {
        let mut deflater = Deflater::new(15, true);
        let mut inflater = Inflater::new(15, true);

        for msg in ["first message", "second message", "third message"] {
            let compressed = deflater.compress_message(msg.as_bytes()).unwrap();
            let decompressed = inflater.decompress_message(&compressed).unwrap();
            assert_eq!(decompressed, msg.as_bytes());
        }
    }
}
