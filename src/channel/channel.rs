//! Base channel record.
//!
//! Channels form a tree: a composite owns its selected child, which owns
//! the concrete transport's channel. Children hold only weak references to
//! their parents.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::auth::ChallengeResponse;
use crate::core::ChallengeHandler;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identifier, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Layer of the channel tree a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Top-level logical connection.
    Composite,
    /// Guard around the currently chosen transport.
    Selected,
    /// Concrete transport.
    Concrete,
}

/// Base channel record.
pub struct Channel {
    id: ChannelId,
    kind: ChannelKind,
    /// Next outbound sequence number.
    sequence: AtomicU64,
    parent: Option<Weak<Channel>>,
    /// Credentials sent with the last challenge reply; cleared on success.
    challenge_response: Mutex<Option<ChallengeResponse>>,
}

impl Channel {
    /// Create a root channel.
    pub fn root(kind: ChannelKind) -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::next(),
            kind,
            sequence: AtomicU64::new(0),
            parent: None,
            challenge_response: Mutex::new(None),
        })
    }

    /// Create a child of `parent`.
    pub fn child(parent: &Arc<Channel>, kind: ChannelKind) -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::next(),
            kind,
            sequence: AtomicU64::new(0),
            parent: Some(Arc::downgrade(parent)),
            challenge_response: Mutex::new(None),
        })
    }

    /// Channel identifier.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Layer this channel belongs to.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Get the next outbound sequence number and increment the counter.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of sequence numbers issued so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Parent channel, if it is still alive.
    pub fn parent(&self) -> Option<Arc<Channel>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Store the challenge reply that is about to be sent.
    pub fn set_challenge_response(&self, response: ChallengeResponse) {
        *self.challenge_response.lock() = Some(response);
    }

    /// Check if a challenge reply is stored.
    pub fn has_challenge_response(&self) -> bool {
        self.challenge_response.lock().is_some()
    }

    /// Drop the stored challenge reply. Credentials are wiped on drop.
    pub fn clear_challenge_response(&self) {
        self.challenge_response.lock().take();
    }

    /// Handler chained on the stored challenge reply, if any.
    pub fn next_challenge_handler(&self) -> Option<Arc<dyn ChallengeHandler>> {
        self.challenge_response
            .lock()
            .as_ref()
            .and_then(|response| response.next_handler().cloned())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("sequence", &self.sequence())
            .field("parent", &self.parent().map(|p| p.id()))
            .field("challenge_response", &self.has_challenge_response())
            .finish()
    }
}
