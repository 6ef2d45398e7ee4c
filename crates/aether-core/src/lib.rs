//! Shared data model, error types, and the generic interceptor dispatcher
//! for the aether proxy. Everything here is a leaf: no networking, no TLS,
//! no WebSocket framing — just the types the rest of the workspace agrees on.

pub mod cert;
pub mod cookie;
pub mod error;
pub mod headers;
pub mod intercept;
pub mod message;
pub mod method;
pub mod url;

pub use cert::CertificateInterface;
pub use cookie::{Cookie, CookieCollection};
pub use error::FlowError;
pub use headers::HeaderMap;
pub use intercept::{Dispatcher, InterceptorId, NOT_ATTACHED};
pub use message::{Exchange, Request, Response};
pub use method::{HttpMethod, HttpVersion};
pub use url::{Netloc, Url};
