//! Constants shared across the channel layers.
//!
//! Close codes follow the numeric convention used by message-oriented
//! socket protocols. They are opaque to this crate: it only picks a default
//! when no transport supplied one.

use std::time::Duration;

// =============================================================================
// CLOSE CODES
// =============================================================================

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Endpoint is going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Protocol error.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// No status code was present.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Abnormal closure. Used whenever no transport supplied a code.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Server hit an unexpected condition.
pub const CLOSE_SERVER_ERROR: u16 = 1011;

/// Maximum close reason length in bytes (historical wire limit).
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

// =============================================================================
// HAND-OFF QUEUE
// =============================================================================

/// Capacity of the message hand-off queue between the network callback
/// context and the consumer.
pub const HANDOFF_QUEUE_CAPACITY: usize = 32;

// =============================================================================
// CONNECT TIMING
// =============================================================================

/// Default bound on a whole connection attempt, across all candidates.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// HTTP EMULATION
// =============================================================================

/// Maximum number of redirects followed for a single request.
pub const MAX_REDIRECTS: usize = 8;

/// Path suffix of the emulated session create request.
pub const EMULATION_CREATE_SUFFIX: &str = "/;e/cb";

/// Emulation protocol version advertised on the create request.
pub const EMULATION_VERSION: &str = "wseb-1.0";

/// Content type marking a 200 response whose body is itself an HTTP response.
pub const WRAPPED_HTTP_CONTENT_TYPE: &str = "application/x-message-http";

/// Header names used by the emulation sub-protocol.
pub mod headers {
    /// Challenge issued with a 401.
    pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
    /// Credentials answering a challenge.
    pub const AUTHORIZATION: &str = "Authorization";
    /// Redirect target.
    pub const LOCATION: &str = "Location";
    /// Body media type.
    pub const CONTENT_TYPE: &str = "Content-Type";
    /// Requested / negotiated sub-protocols.
    pub const WEBSOCKET_PROTOCOL: &str = "X-WebSocket-Protocol";
    /// Emulation protocol version.
    pub const WEBSOCKET_VERSION: &str = "X-WebSocket-Version";
    /// Outbound frame sequence number.
    pub const SEQUENCE_NO: &str = "X-Sequence-No";
}
