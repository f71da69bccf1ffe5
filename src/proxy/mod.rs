//! Request translation and backend forwarding.
//!
//! ```text
//! InboundRequest ──translate──▶ OutboundRequest ──forward──▶ GatewayResponse
//!                  (sync, pure)                   (async, bounded by timeout)
//! ```

pub mod forward;
pub mod headers;
pub mod translate;

pub use forward::{ForwardError, Forwarder, GatewayResponse};
pub use headers::{HOP_BY_HOP_HEADERS, is_hop_by_hop, strip_hop_by_hop};
pub use translate::{InboundRequest, OutboundRequest, Translator};
