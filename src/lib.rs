//! # composite-channel
//!
//! Client-side transport engine that establishes a full-duplex, message
//! oriented connection over the best transport available.
//!
//! A [`CompositeChannel`](transport::CompositeChannel) tries an ordered list
//! of candidate strategies (a native socket transport, then HTTP emulation)
//! and falls back on recoverable failures until one opens. The HTTP
//! emulation layer answers authentication challenges and follows redirects
//! allowed by a [`RedirectPolicy`](channel::RedirectPolicy).
//!
//! ## Feature Flags
//!
//! - `emulation` (default): HTTP emulation strategy with auth and redirect
//!   stages
//! - `client` (default): [`DuplexClient`](client::DuplexClient) with an
//!   inbound hand-off queue
//!
//! ## Modules
//!
//! - [`core`]: constants, errors, and the transport/listener traits
//! - [`channel`]: channel records, ready state, locations, redirect policy
//! - [`auth`]: challenge records and handlers
//! - [`transport`]: strategy table, composite engine, timer, queue
//! - [`http`]: HTTP emulation (requires `emulation`)
//! - [`client`]: high-level client (requires `client`)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use composite_channel::prelude::*;
//!
//! struct Refused;
//!
//! impl Transport for Refused {
//!     fn process_connect(
//!         &self,
//!         _request: ConnectRequest,
//!         listener: Arc<dyn ChannelListener>,
//!     ) -> Result<(), ChannelError> {
//!         listener.connection_closed(CloseEvent::failed(ChannelError::Transport("refused".into())));
//!         Ok(())
//!     }
//!
//!     fn process_send(&self, _frame: OutboundFrame) -> Result<(), ChannelError> {
//!         Ok(())
//!     }
//!
//!     fn process_close(&self, _code: u16, _reason: &str) -> Result<(), ChannelError> {
//!         Ok(())
//!     }
//! }
//!
//! struct Print;
//!
//! impl ChannelListener for Print {
//!     fn connection_opened(&self, protocol: Option<&str>) {
//!         println!("open {protocol:?}");
//!     }
//!
//!     fn connection_closed(&self, event: CloseEvent) {
//!         println!("closed {} {}", event.code, event.reason);
//!     }
//!
//!     fn text_message_received(&self, text: &str) {
//!         println!("{text}");
//!     }
//!
//!     fn binary_message_received(&self, data: &[u8]) {
//!         println!("{} bytes", data.len());
//!     }
//! }
//!
//! let registry = StrategyRegistry::with_defaults().register(
//!     StrategyId::NATIVE,
//!     |_: &TransportContext| -> Result<Box<dyn Transport>, ChannelError> { Ok(Box::new(Refused)) },
//! );
//! let channel = CompositeChannel::new(Arc::new(registry), CompositeConfig::default(), Arc::new(Print));
//! channel.connect("ws://example.com/echo", &[]).unwrap();
//! assert_eq!(channel.ready_state(), ReadyState::Closed);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod auth;
pub mod channel;
pub mod transport;

// HTTP emulation (feature-gated)
#[cfg(feature = "emulation")]
#[cfg_attr(docsrs, doc(cfg(feature = "emulation")))]
pub mod http;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::auth::{BasicChallengeHandler, ChallengeRequest, ChallengeResponse, Credentials};
    pub use crate::channel::{ChannelLocation, ReadyState, RedirectPolicy};
    pub use crate::transport::{
        CompositeChannel, CompositeConfig, ConnectOutcome, HandoffQueue, StrategyId,
        StrategyRegistry,
    };

    #[cfg(feature = "emulation")]
    pub use crate::http::{EmulatedTransportFactory, HttpTransport};

    #[cfg(feature = "client")]
    pub use crate::client::{ClientError, DuplexClient, DuplexClientBuilder, Message};
}

// Re-export commonly used items at crate root
pub use crate::core::{ChannelError, ChannelListener, CloseEvent, Transport, TransportFactory};
pub use crate::transport::{CompositeChannel, CompositeConfig, StrategyRegistry};
