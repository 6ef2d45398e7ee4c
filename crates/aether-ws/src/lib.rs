//! Hand-rolled WebSocket frame codec, `permessage-deflate` extension,
//! and per-direction pipeline (§4.G, §4.H, §4.I).

pub mod deflate;
pub mod frame;
pub mod handshake;
pub mod opcode;
pub mod pipeline;

pub use deflate::{Deflater, Inflater};
pub use frame::{serialize_frame, try_decode_frame, Frame, FrameHeader};
pub use handshake::{accept_key, negotiate_permessage_deflate, render_extensions_header, PermessageDeflateParams};
pub use opcode::Opcode;
pub use pipeline::{PipelineEvent, WebSocketPipeline, DEFAULT_FRAGMENT_SIZE};
