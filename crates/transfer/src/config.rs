//! Transfer configuration.
//!
//! Defaults suit browser-grade data channels. A JSON file can override any
//! subset of the fields; unreadable files fall back to the defaults.

use std::path::Path;
use std::time::Duration;

use peerdrop_protocol::constants::DEFAULT_ICE_SERVERS;
use peerdrop_protocol::{Codec, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_REFERENCE_LEN};
use serde::{Deserialize, Serialize};

use crate::TransferError;

/// Pause sending while more than this many bytes are queued (1 MiB).
pub const DEFAULT_HIGH_WATER_MARK: usize = 1024 * 1024;

/// Resume sending once the queue drains to this many bytes (256 KiB).
pub const DEFAULT_LOW_WATER_MARK: usize = 256 * 1024;

/// Capacity of the session event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Settings shared by both sides of a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferConfig {
    /// Payload bytes per chunk message.
    pub chunk_size: usize,
    /// Back-pressure threshold on the channel's buffered amount.
    pub high_water_mark: usize,
    /// Buffered amount at which a paused sender resumes.
    pub low_water_mark: usize,
    /// Ceiling for negotiation references and share links.
    pub max_reference_len: usize,
    /// Reject chunks that do not continue exactly where the item left off.
    pub strict_offsets: bool,
    /// Ask the negotiator for an ordered channel.
    pub ordered: bool,
    /// Give up if the channel has not opened within this time. `None` waits forever.
    pub negotiation_timeout: Option<Duration>,
    /// STUN/TURN URLs handed to the peer connection stack. Negotiators
    /// advertise them in their descriptor blobs.
    pub ice_servers: Vec<String>,
    /// Capacity of the [`SessionEvent`](crate::SessionEvent) channel.
    pub event_capacity: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            low_water_mark: DEFAULT_LOW_WATER_MARK,
            max_reference_len: DEFAULT_MAX_REFERENCE_LEN,
            strict_offsets: true,
            ordered: true,
            negotiation_timeout: None,
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// On-disk form of [`TransferConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    chunk_size: Option<usize>,
    #[serde(default)]
    high_water_mark: Option<usize>,
    #[serde(default)]
    low_water_mark: Option<usize>,
    #[serde(default)]
    max_reference_len: Option<usize>,
    #[serde(default)]
    strict_offsets: Option<bool>,
    #[serde(default)]
    ordered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    negotiation_timeout_secs: Option<u64>,
    #[serde(default)]
    ice_servers: Option<Vec<String>>,
    #[serde(default)]
    event_capacity: Option<usize>,
}

impl TransferConfig {
    /// Loads configuration from a JSON file.
    ///
    /// A missing file yields the defaults. A file that fails to parse is
    /// logged and ignored.
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        let mut config = TransferConfig::default();
        if !path.exists() {
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let file = match serde_json::from_str::<ConfigFile>(&content) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse transfer config, using defaults"
                );
                return Ok(config);
            }
        };

        if let Some(v) = file.chunk_size.filter(|v| *v > 0) {
            config.chunk_size = v;
        }
        if let Some(v) = file.high_water_mark {
            config.high_water_mark = v;
        }
        if let Some(v) = file.low_water_mark {
            config.low_water_mark = v;
        }
        if let Some(v) = file.max_reference_len {
            config.max_reference_len = v;
        }
        if let Some(v) = file.strict_offsets {
            config.strict_offsets = v;
        }
        if let Some(v) = file.ordered {
            config.ordered = v;
        }
        config.negotiation_timeout = file.negotiation_timeout_secs.map(Duration::from_secs);
        if let Some(v) = file.ice_servers.filter(|v| !v.is_empty()) {
            config.ice_servers = v;
        }
        if let Some(v) = file.event_capacity.filter(|v| *v > 0) {
            config.event_capacity = v;
        }

        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), TransferError> {
        let file = ConfigFile {
            chunk_size: Some(self.chunk_size),
            high_water_mark: Some(self.high_water_mark),
            low_water_mark: Some(self.low_water_mark),
            max_reference_len: Some(self.max_reference_len),
            strict_offsets: Some(self.strict_offsets),
            ordered: Some(self.ordered),
            negotiation_timeout_secs: self.negotiation_timeout.map(|d| d.as_secs()),
            ice_servers: Some(self.ice_servers.clone()),
            event_capacity: Some(self.event_capacity),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| TransferError::Io(std::io::Error::other(e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Codec enforcing [`max_reference_len`](Self::max_reference_len).
    pub fn codec(&self) -> Codec {
        Codec::new(self.max_reference_len)
    }

    /// Chunk size with 0 mapped to the default.
    pub fn effective_chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }
}
