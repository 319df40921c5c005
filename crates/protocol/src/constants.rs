/// Default chunk size: 16 KiB.
///
/// Browser data channels reject or fragment messages much larger than this,
/// so the default stays small even though native transports accept more.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Maximum length of an encoded negotiation reference (practical URL ceiling).
pub const DEFAULT_MAX_REFERENCE_LEN: usize = 2000;

/// Query parameter carrying an offer reference in a share link.
pub const OFFER_QUERY_PARAM: &str = "cross";

/// Query parameter carrying an answer reference in a share link.
pub const ANSWER_QUERY_PARAM: &str = "answer";

/// Public STUN servers used when no ICE servers are configured.
pub const DEFAULT_ICE_SERVERS: [&str; 5] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun3.l.google.com:19302",
    "stun:stun4.l.google.com:19302",
];
