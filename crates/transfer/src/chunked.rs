use std::sync::Arc;

use peerdrop_protocol::WireMessage;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::TransferConfig;
use crate::transport::DataChannel;
use crate::types::{TransferItem, TransferProgress};
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Number of chunk messages needed for an item of `size` bytes.
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size.max(1) as u64)
}

// ---------------------------------------------------------------------------
// ChunkPlan
// ---------------------------------------------------------------------------

/// The exact message sequence for a batch: metadata, every chunk of every
/// item in order, then the completion marker.
pub struct ChunkPlan<'a> {
    items: &'a [TransferItem],
    chunk_size: usize,
    stage: Stage,
}

enum Stage {
    Metadata,
    Chunks { item: usize, offset: usize },
    Complete,
    Done,
}

impl<'a> ChunkPlan<'a> {
    /// Plans `items` in strides of `chunk_size` bytes.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (16 KiB) is used.
    pub fn new(items: &'a [TransferItem], chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            items,
            chunk_size,
            stage: Stage::Metadata,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Iterator for ChunkPlan<'_> {
    type Item = WireMessage;

    fn next(&mut self) -> Option<WireMessage> {
        loop {
            match self.stage {
                Stage::Metadata => {
                    self.stage = Stage::Chunks { item: 0, offset: 0 };
                    return Some(WireMessage::Metadata {
                        items: self.items.iter().map(TransferItem::meta).collect(),
                    });
                }
                Stage::Chunks { item, offset } => {
                    let Some(current) = self.items.get(item) else {
                        self.stage = Stage::Complete;
                        continue;
                    };
                    let payload = current.payload();
                    if offset >= payload.len() {
                        self.stage = Stage::Chunks {
                            item: item + 1,
                            offset: 0,
                        };
                        continue;
                    }
                    let end = (offset + self.chunk_size).min(payload.len());
                    self.stage = Stage::Chunks { item, offset: end };
                    return Some(WireMessage::Chunk {
                        item_index: item as u32,
                        offset: offset as u64,
                        bytes: payload[offset..end].to_vec(),
                    });
                }
                Stage::Complete => {
                    self.stage = Stage::Done;
                    return Some(WireMessage::Complete);
                }
                Stage::Done => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ChunkedSender
// ---------------------------------------------------------------------------

/// Totals for a fully sent batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendReport {
    pub items: usize,
    pub chunks: u64,
    pub bytes: u64,
}

/// Last position handed to the channel successfully.
#[derive(Debug, Clone, Copy, Default)]
struct Position {
    item_index: Option<usize>,
    offset: u64,
}

/// Streams a batch over a data channel, pausing while the channel is
/// saturated.
pub struct ChunkedSender {
    items: Arc<[TransferItem]>,
    chunk_size: usize,
    high_water_mark: usize,
    low_water_mark: usize,
}

impl ChunkedSender {
    pub fn new(items: Arc<[TransferItem]>, config: &TransferConfig) -> Self {
        Self {
            items,
            chunk_size: config.effective_chunk_size(),
            high_water_mark: config.high_water_mark,
            low_water_mark: config.low_water_mark.min(config.high_water_mark),
        }
    }

    /// The messages [`send_all`](Self::send_all) will emit, in order.
    pub fn plan(&self) -> ChunkPlan<'_> {
        ChunkPlan::new(&self.items, self.chunk_size)
    }

    /// Sends metadata, all chunks and the completion marker.
    ///
    /// Progress for each chunk is reported on `progress_tx` without blocking.
    /// Stops with [`TransferError::Cancelled`] once `cancel` fires and with
    /// [`TransferError::TransportFailed`] when the channel rejects a frame;
    /// both carry the last position sent successfully.
    pub async fn send_all<C: DataChannel>(
        &self,
        channel: &C,
        cancel: CancellationToken,
        progress_tx: mpsc::Sender<TransferProgress>,
    ) -> Result<SendReport, TransferError> {
        let mut position = Position::default();
        let mut report = SendReport {
            items: self.items.len(),
            ..SendReport::default()
        };

        for message in self.plan() {
            self.wait_for_capacity(channel, &cancel, position).await?;

            let frame = message.to_frame()?;
            channel
                .send(frame)
                .map_err(|e| TransferError::TransportFailed {
                    item_index: position.item_index,
                    offset: position.offset,
                    reason: e.to_string(),
                })?;

            match &message {
                WireMessage::Metadata { items } => {
                    debug!(items = items.len(), "metadata sent");
                }
                WireMessage::Chunk {
                    item_index,
                    offset,
                    bytes,
                } => {
                    let index = *item_index as usize;
                    let end = offset + bytes.len() as u64;
                    position = Position {
                        item_index: Some(index),
                        offset: end,
                    };
                    report.chunks += 1;
                    report.bytes += bytes.len() as u64;
                    trace!(item_index = index, offset, len = bytes.len(), "chunk sent");

                    // Report progress (non-blocking).
                    let _ = progress_tx.try_send(TransferProgress {
                        item_index: index,
                        transferred_bytes: end,
                        total_bytes: self.items[index].size(),
                    });
                }
                WireMessage::Complete => {
                    info!(
                        items = report.items,
                        chunks = report.chunks,
                        bytes = report.bytes,
                        "batch sent"
                    );
                    return Ok(report);
                }
            }

            // Let transport events interleave with a long batch.
            tokio::task::yield_now().await;
        }

        Ok(report)
    }

    async fn wait_for_capacity<C: DataChannel>(
        &self,
        channel: &C,
        cancel: &CancellationToken,
        position: Position,
    ) -> Result<(), TransferError> {
        let cancelled = || TransferError::Cancelled {
            item_index: position.item_index,
            offset: position.offset,
        };

        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        while channel.buffered_amount() > self.high_water_mark {
            trace!(
                buffered = channel.buffered_amount(),
                high_water = self.high_water_mark,
                "waiting for channel to drain"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(cancelled());
                }
                _ = channel.buffered_amount_low(self.low_water_mark) => {}
            }
        }

        Ok(())
    }
}
