//! Negotiation references and wire messages for PeerDrop transfers.
//!
//! Two peers exchange a [`SessionDescriptor`] each way out-of-band (a pasted
//! URL, the clipboard, ...) encoded by the [`Codec`]. Once the data channel
//! opens, the sender streams [`WireMessage`] frames: one metadata message,
//! the chunks of every item, then a completion marker.

pub mod codec;
pub mod constants;
pub mod link;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use codec::{Codec, CodecError};
pub use constants::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_REFERENCE_LEN};
pub use link::ShareLink;
pub use messages::WireMessage;
pub use types::{ItemMeta, Role, SessionDescriptor};
