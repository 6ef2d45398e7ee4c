//! Hand-rolled HTTP/1 request/response codec (§4.D): incremental
//! decoders that report `need more bytes` rather than blocking, plus
//! serializers that re-encode whatever an interceptor left behind.

pub mod chunked;
pub mod limits;
pub mod request;
pub mod response;

pub use chunked::{encode_chunked, try_decode_chunked};
pub use limits::DecodeLimits;
pub use request::{serialize_request, RequestDecoder};
pub use response::{serialize_response, ResponseContext, ResponseDecoder};
