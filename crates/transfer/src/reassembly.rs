//! Receiver-side reassembly of a batch.

use std::collections::BTreeMap;

use peerdrop_protocol::{ItemMeta, WireMessage};
use tracing::{debug, trace};

use crate::error::{ProtocolErrorKind, TransferError};
use crate::types::{CompletedItem, TransferProgress};

/// Upper bound on the capacity reserved up front for one item. Larger
/// items grow as chunks arrive.
const MAX_PREALLOCATION: usize = 16 * 1024 * 1024;

/// Result of feeding one message to the [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Metadata accepted; buffers are ready.
    Announced { items: Vec<ItemMeta> },
    /// A chunk was stored.
    Progress {
        progress: TransferProgress,
        /// The chunk brought its item to its declared size.
        item_completed: bool,
    },
    /// The completion marker arrived and every item is whole.
    Completed(Vec<CompletedItem>),
}

#[derive(Debug)]
struct ItemBuffer {
    meta: ItemMeta,
    /// Contiguous prefix of the item.
    bytes: Vec<u8>,
    /// Chunks that start past the prefix, keyed by offset.
    pending: BTreeMap<usize, Vec<u8>>,
    received: u64,
}

impl ItemBuffer {
    fn new(meta: ItemMeta) -> Self {
        let capacity = usize::try_from(meta.size)
            .unwrap_or(MAX_PREALLOCATION)
            .min(MAX_PREALLOCATION);
        Self {
            meta,
            bytes: Vec::with_capacity(capacity),
            pending: BTreeMap::new(),
            received: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.meta.size
    }

    /// Whether the prefix covers the whole declared size.
    fn is_whole(&self) -> bool {
        self.pending.is_empty() && self.bytes.len() as u64 == self.meta.size
    }

    /// Stores `data` at `offset`. Memory grows with the bytes received,
    /// never with the declared size.
    fn write(&mut self, offset: usize, data: Vec<u8>) {
        if offset > self.bytes.len() {
            self.pending.insert(offset, data);
            return;
        }
        self.splice(offset, &data);

        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() > self.bytes.len() {
                break;
            }
            let (offset, data) = entry.remove_entry();
            self.splice(offset, &data);
        }
    }

    /// Writes `data` at `offset <= bytes.len()`, overwriting any overlap.
    fn splice(&mut self, offset: usize, data: &[u8]) {
        let overlap = (self.bytes.len() - offset).min(data.len());
        self.bytes[offset..offset + overlap].copy_from_slice(&data[..overlap]);
        self.bytes.extend_from_slice(&data[overlap..]);
    }
}

/// Rebuilds a batch from metadata, chunk and completion messages.
///
/// Every rejected message leaves all buffers untouched.
#[derive(Debug)]
pub struct Reassembler {
    strict_offsets: bool,
    items: Option<Vec<ItemBuffer>>,
    chunks_seen: u64,
    completed: bool,
}

impl Reassembler {
    /// With `strict_offsets`, each chunk must start exactly where its item's
    /// received bytes end.
    pub fn new(strict_offsets: bool) -> Self {
        Self {
            strict_offsets,
            items: None,
            chunks_seen: 0,
            completed: false,
        }
    }

    pub fn handle(&mut self, message: WireMessage) -> Result<ReceiveOutcome, TransferError> {
        if self.completed {
            return Err(TransferError::protocol(
                ProtocolErrorKind::UnexpectedMessage,
                None,
                format!("{} after completion", message.kind()),
            ));
        }

        match message {
            WireMessage::Metadata { items } => self.on_metadata(items),
            WireMessage::Chunk {
                item_index,
                offset,
                bytes,
            } => self.on_chunk(item_index as usize, offset, bytes),
            WireMessage::Complete => self.on_complete(),
        }
    }

    fn on_metadata(&mut self, items: Vec<ItemMeta>) -> Result<ReceiveOutcome, TransferError> {
        if self.items.is_some() || self.chunks_seen > 0 {
            return Err(TransferError::protocol(
                ProtocolErrorKind::DuplicateMetadata,
                None,
                "metadata already received",
            ));
        }

        debug!(
            items = items.len(),
            total_bytes = items.iter().map(|m| m.size).fold(0, u64::saturating_add),
            "metadata received"
        );
        self.items = Some(items.iter().cloned().map(ItemBuffer::new).collect());
        Ok(ReceiveOutcome::Announced { items })
    }

    fn on_chunk(
        &mut self,
        item_index: usize,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<ReceiveOutcome, TransferError> {
        let invalid = |message: String| {
            TransferError::protocol(ProtocolErrorKind::InvalidChunk, Some(item_index), message)
        };

        let Some(items) = self.items.as_mut() else {
            return Err(invalid("chunk before metadata".into()));
        };
        let count = items.len();
        let Some(item) = items.get_mut(item_index) else {
            return Err(invalid(format!(
                "item index {item_index} out of range ({count} items)"
            )));
        };

        let len = data.len() as u64;
        let size = item.meta.size;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= size)
            .ok_or_else(|| {
                invalid(format!(
                    "chunk at offset {offset} with {len} bytes exceeds size {size}"
                ))
            })?;
        if item.received.checked_add(len).is_none_or(|total| total > size) {
            return Err(invalid(format!(
                "received bytes would exceed size {size}"
            )));
        }
        if self.strict_offsets && offset != item.received {
            return Err(invalid(format!(
                "expected offset {}, got {offset}",
                item.received
            )));
        }
        let (Ok(start), Ok(_)) = (usize::try_from(offset), usize::try_from(end)) else {
            return Err(invalid(format!("offset {offset} not addressable")));
        };

        item.write(start, data);
        item.received += len;
        self.chunks_seen += 1;

        trace!(item_index, offset, len, received = item.received, "chunk stored");

        Ok(ReceiveOutcome::Progress {
            progress: TransferProgress {
                item_index,
                transferred_bytes: item.received,
                total_bytes: size,
            },
            item_completed: item.is_complete(),
        })
    }

    fn on_complete(&mut self) -> Result<ReceiveOutcome, TransferError> {
        let Some(items) = self.items.as_ref() else {
            return Err(TransferError::protocol(
                ProtocolErrorKind::IncompleteTransfer,
                None,
                "completion before metadata",
            ));
        };

        // The counter can reach the size with overlapping chunks while a
        // gap remains, so the bytes themselves must cover the item too.
        if let Some((index, item)) = items
            .iter()
            .enumerate()
            .find(|(_, i)| !i.is_complete() || !i.is_whole())
        {
            return Err(TransferError::protocol(
                ProtocolErrorKind::IncompleteTransfer,
                Some(index),
                format!(
                    "item {index} ({}) has {} of {} bytes",
                    item.meta.name, item.received, item.meta.size
                ),
            ));
        }

        self.completed = true;
        let completed = self
            .items
            .iter_mut()
            .flatten()
            .map(|item| CompletedItem {
                name: item.meta.name.clone(),
                mime_type: item.meta.mime_type.clone(),
                bytes: std::mem::take(&mut item.bytes),
            })
            .collect::<Vec<_>>();

        debug!(items = completed.len(), "batch reassembled");
        Ok(ReceiveOutcome::Completed(completed))
    }

    /// Announced items, once metadata has arrived.
    pub fn items(&self) -> Option<Vec<ItemMeta>> {
        self.items
            .as_ref()
            .map(|items| items.iter().map(|i| i.meta.clone()).collect())
    }

    /// Name announced for `item_index`.
    pub fn item_name(&self, item_index: usize) -> Option<&str> {
        self.items
            .as_ref()?
            .get(item_index)
            .map(|i| i.meta.name.as_str())
    }

    /// Bytes received so far for `item_index`.
    pub fn received(&self, item_index: usize) -> Option<u64> {
        self.items.as_ref()?.get(item_index).map(|i| i.received)
    }

    pub fn received_bytes(&self) -> u64 {
        self.items
            .as_ref()
            .map_or(0, |items| {
                items.iter().map(|i| i.received).fold(0, u64::saturating_add)
            })
    }

    pub fn total_bytes(&self) -> u64 {
        self.items
            .as_ref()
            .map_or(0, |items| {
                items.iter().map(|i| i.meta.size).fold(0, u64::saturating_add)
            })
    }

    pub fn chunks_seen(&self) -> u64 {
        self.chunks_seen
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}
