use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the negotiation produced a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "offer")]
    Offer,
    #[serde(rename = "answer")]
    Answer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Offer => f.write_str("offer"),
            Role::Answer => f.write_str("answer"),
        }
    }
}

/// Metadata for one item of a batch, as announced by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMeta {
    pub name: String,
    pub size: u64,
    /// Advisory MIME type; empty when the sender does not know it.
    #[serde(default)]
    pub mime_type: String,
}

/// An offer or answer exchanged out-of-band between two peers.
///
/// The `descriptor` blob is opaque to PeerDrop: it is whatever the peer
/// connection stack needs to reach the other side (an SDP, a rendezvous
/// token, ...). Descriptors are immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    role: Role,
    session_id: String,
    descriptor: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
}

impl SessionDescriptor {
    /// Creates a descriptor from its parts.
    ///
    /// `created_at` is truncated to millisecond precision, the resolution of
    /// the encoded form.
    pub fn new(
        role: Role,
        session_id: impl Into<String>,
        descriptor: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            role,
            session_id: session_id.into(),
            descriptor: descriptor.into(),
            created_at: created_at.trunc_subsecs(3),
        }
    }

    /// Creates an offer for a brand-new session with a random session ID.
    pub fn offer(descriptor: impl Into<String>) -> Self {
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        Self::new(Role::Offer, session_id, descriptor, Utc::now())
    }

    /// Creates the answer matching `offer`.
    pub fn answer_to(offer: &SessionDescriptor, descriptor: impl Into<String>) -> Self {
        Self::new(Role::Answer, offer.session_id.clone(), descriptor, Utc::now())
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The opaque negotiation blob.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
