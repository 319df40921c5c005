//! Async loops that run a negotiated session to completion.
//!
//! Each driver owns the session mutably and selects between the transport
//! event stream, the session's cancellation token and (on the sender) the
//! chunk stream. Transport events are polled first so a close or error
//! stops the batch before another chunk goes out.

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::chunked::SendReport;
use crate::error::{ErrorKind, Failure, TransferError};
use crate::session::Session;
use crate::transport::{DataChannel, EventReceiver};
use crate::types::{CompletedItem, SessionState, Side, TransferProgress};

/// Processes transport events until the channel is open.
///
/// Applies the configured negotiation timeout, if any.
pub async fn wait_until_open(
    session: &mut Session,
    events: &mut EventReceiver,
) -> Result<(), Failure> {
    let timeout = session.config().negotiation_timeout;
    let deadline = timeout.map(|t| Instant::now() + t);
    let cancel = session.cancel_token();

    loop {
        match session.state() {
            SessionState::Open | SessionState::Transferring | SessionState::Completed => {
                return Ok(());
            }
            SessionState::Failed { .. } => {
                return Err(session.failure_or(ErrorKind::TransportFailed, "session failed"));
            }
            _ => {}
        }

        let next = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, events.recv()).await.ok(),
                None => Some(events.recv().await),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(cancelled(session));
            }
            next = next => match next {
                Some(Some(event)) => session.handle_transport_event(event)?,
                Some(None) => return Err(stream_ended(session)),
                None => {
                    let waited = timeout.unwrap_or_default();
                    session.expire_negotiation(waited);
                    return Err(session.failure_or(ErrorKind::NegotiationTimeout, "negotiation timed out"));
                }
            },
        }
    }
}

/// Runs the sending side: waits for the channel, streams the batch and
/// records progress on the session.
pub async fn drive_sender<C: DataChannel>(
    session: &mut Session,
    channel: &C,
    events: &mut EventReceiver,
) -> Result<SendReport, Failure> {
    if session.side() != Side::Sender {
        return Err(Failure::from(&TransferError::InvalidTransition {
            action: "drive a receiver as sender",
            state: session.state(),
        }));
    }

    wait_until_open(session, events).await?;

    let sender = session.begin_sending().map_err(|e| session.fail(&e))?;
    let cancel = session.cancel_token();
    let (progress_tx, mut progress_rx) = mpsc::channel(session.config().event_capacity.max(1));

    let send = sender.send_all(channel, cancel.clone(), progress_tx);
    tokio::pin!(send);

    let result = loop {
        tokio::select! {
            biased;
            event = events.recv() => {
                // A failure must name the chunks already handed over.
                record_pending_progress(session, &mut progress_rx)?;
                match event {
                    Some(event) => session.handle_transport_event(event)?,
                    None => return Err(stream_ended(session)),
                }
            }
            Some(progress) = progress_rx.recv() => {
                session.record_chunk_sent(progress).map_err(|e| session.fail(&e))?;
            }
            result = &mut send => break result,
        }
    };

    record_pending_progress(session, &mut progress_rx)?;

    match result {
        Ok(report) => {
            session.finish_sending().map_err(|e| session.fail(&e))?;
            info!(
                session = session.id().unwrap_or("-"),
                items = report.items,
                bytes = report.bytes,
                "transfer sent"
            );
            Ok(report)
        }
        Err(e) => Err(session.fail(&e)),
    }
}

/// Runs the receiving side until the batch is complete.
pub async fn drive_receiver(
    session: &mut Session,
    events: &mut EventReceiver,
) -> Result<Vec<CompletedItem>, Failure> {
    if session.side() != Side::Receiver {
        return Err(Failure::from(&TransferError::InvalidTransition {
            action: "drive a sender as receiver",
            state: session.state(),
        }));
    }

    wait_until_open(session, events).await?;
    let cancel = session.cancel_token();

    while session.state() != SessionState::Completed {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(session)),
            event = events.recv() => match event {
                Some(event) => session.handle_transport_event(event)?,
                None => return Err(stream_ended(session)),
            },
        }
    }

    let items = session.take_completed_items().unwrap_or_default();
    info!(
        session = session.id().unwrap_or("-"),
        items = items.len(),
        bytes = session.transferred_bytes(),
        "transfer received"
    );
    Ok(items)
}

fn record_pending_progress(
    session: &mut Session,
    progress_rx: &mut mpsc::Receiver<TransferProgress>,
) -> Result<(), Failure> {
    while let Ok(progress) = progress_rx.try_recv() {
        session.record_chunk_sent(progress).map_err(|e| session.fail(&e))?;
    }
    Ok(())
}

fn cancelled(session: &mut Session) -> Failure {
    let (item_index, offset) = session.last_position();
    session.fail(&TransferError::Cancelled { item_index, offset })
}

fn stream_ended(session: &mut Session) -> Failure {
    debug!(session = session.id().unwrap_or("-"), "transport event stream ended");
    let (item_index, offset) = session.last_position();
    session.fail(&TransferError::TransportFailed {
        item_index,
        offset,
        reason: "event stream ended".into(),
    })
}
