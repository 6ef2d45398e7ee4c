/// Size limits enforced while decoding (§4.D, §7 `body_too_large`).
/// Mirrors the proxy's configurable `max_header_size`/`max_body_size`
/// options — unbounded by default, since only the operator's CLI
/// flags (parsed in `aether-proxy`) should impose a real ceiling.
#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    pub max_head_bytes: usize,
    pub max_body_bytes: Option<usize>,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_head_bytes: 64 * 1024,
            max_body_bytes: None,
        }
    }
}
