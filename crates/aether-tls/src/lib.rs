//! TLS ClientHello peeking and on-the-fly certificate minting (§4.B, §4.C).
//!
//! This crate depends only on `aether-core` plus the TLS/crypto stack —
//! it knows nothing about `Transport` or `ConnectionFlow`, which live in
//! `aether-proxy`, so its ClientHello reader is generic over any
//! `tokio::io::AsyncRead`.

pub mod cert_store;
pub mod client_hello;
pub mod properties;
pub mod server_config;

pub use cert_store::{CaSubject, CertificateAuthority, CertificateStore, DhParams, MintedCertificate};
pub use client_hello::{read_client_hello, ClientHello, ReplayPrefixed, ServerName};
pub use properties::Properties;
pub use server_config::{build_client_config, build_server_config, MintingCertResolver};
