//! Binds a [`Negotiator`] to a [`Session`] and turns descriptors into
//! shareable references.
//!
//! Sending peer: [`offer`], share the reference, then [`decode_remote`] +
//! [`accept_answer`] on the reference that comes back. Receiving peer:
//! [`decode_remote`] + [`answer`], share the reference.

use peerdrop_protocol::SessionDescriptor;
use tracing::debug;

use crate::error::TransferError;
use crate::session::Session;
use crate::transport::Negotiator;

/// Creates the local offer and returns its reference.
///
/// An over-long reference returns [`CodecError::TooLong`] and leaves the
/// session waiting for an answer; the offer stays available through
/// [`Session::local_descriptor`] for another delivery route.
///
/// [`CodecError::TooLong`]: peerdrop_protocol::CodecError::TooLong
pub async fn offer<N: Negotiator>(
    session: &mut Session,
    negotiator: &mut N,
) -> Result<String, TransferError> {
    let blob = match negotiator.create_offer().await {
        Ok(blob) => blob,
        Err(e) => return Err(fail(session, TransferError::transport(e))),
    };
    let offer = session.create_offer(blob)?;
    encode(session, &offer)
}

/// Applies the peer's offer, creates the answer and returns its reference.
pub async fn answer<N: Negotiator>(
    session: &mut Session,
    negotiator: &mut N,
    offer: SessionDescriptor,
) -> Result<String, TransferError> {
    let blob = offer.descriptor().to_string();
    session.apply_remote_descriptor(offer)?;

    let answer_blob = match negotiator.accept_offer(&blob).await {
        Ok(answer) => answer,
        Err(e) => return Err(fail(session, TransferError::transport(e))),
    };
    let answer = session.create_answer(answer_blob)?;
    encode(session, &answer)
}

/// Applies the peer's answer to a session that created an offer.
pub async fn accept_answer<N: Negotiator>(
    session: &mut Session,
    negotiator: &mut N,
    answer: SessionDescriptor,
) -> Result<(), TransferError> {
    let blob = answer.descriptor().to_string();
    session.apply_remote_descriptor(answer)?;

    if let Err(e) = negotiator.accept_answer(&blob).await {
        return Err(fail(session, TransferError::transport(e)));
    }
    Ok(())
}

/// Decodes a reference received from the peer.
///
/// A malformed reference fails the session.
pub fn decode_remote(
    session: &mut Session,
    reference: &str,
) -> Result<SessionDescriptor, TransferError> {
    match session.config().codec().decode::<SessionDescriptor>(reference) {
        Ok(descriptor) => {
            debug!(
                session = %descriptor.session_id(),
                role = %descriptor.role(),
                "remote reference decoded"
            );
            Ok(descriptor)
        }
        Err(e) => Err(fail(session, e.into())),
    }
}

fn encode(session: &Session, descriptor: &SessionDescriptor) -> Result<String, TransferError> {
    let reference = session.config().codec().encode(descriptor)?;
    debug!(
        session = %descriptor.session_id(),
        role = %descriptor.role(),
        len = reference.len(),
        "reference encoded"
    );
    Ok(reference)
}

fn fail(session: &mut Session, err: TransferError) -> TransferError {
    session.fail(&err);
    err
}

#[cfg(test)]
mod tests {
    use peerdrop_protocol::{CodecError, Role};

    use super::*;
    use crate::config::TransferConfig;
    use crate::error::ErrorKind;
    use crate::transport::{DataChannel, EventReceiver, TransportError};
    use crate::types::{SessionState, TransferItem};

    /// Negotiator producing fixed blobs, for exercising the helpers alone.
    struct ScriptedNegotiator {
        blob: String,
        fail: bool,
        applied: Vec<String>,
    }

    impl ScriptedNegotiator {
        fn new(blob: &str) -> Self {
            Self {
                blob: blob.into(),
                fail: false,
                applied: Vec::new(),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new("")
            }
        }

        fn result(&self) -> Result<String, TransportError> {
            if self.fail {
                Err(TransportError::Negotiation("no route".into()))
            } else {
                Ok(self.blob.clone())
            }
        }
    }

    struct NoChannel;

    impl DataChannel for NoChannel {
        fn send(&self, _frame: Vec<u8>) -> Result<(), TransportError> {
            Err(TransportError::Closed)
        }
        fn buffered_amount(&self) -> usize {
            0
        }
        async fn buffered_amount_low(&self, _threshold: usize) {}
        fn close(&self) {}
    }

    impl Negotiator for ScriptedNegotiator {
        type Channel = NoChannel;

        async fn create_offer(&mut self) -> Result<String, TransportError> {
            self.result()
        }

        async fn accept_offer(&mut self, offer: &str) -> Result<String, TransportError> {
            self.applied.push(offer.to_string());
            self.result()
        }

        async fn accept_answer(&mut self, answer: &str) -> Result<(), TransportError> {
            self.applied.push(answer.to_string());
            self.result().map(|_| ())
        }

        async fn connect(self) -> Result<(NoChannel, EventReceiver), TransportError> {
            Err(TransportError::Closed)
        }
    }

    fn sender() -> Session {
        Session::sender(
            TransferConfig::default(),
            vec![TransferItem::new("a.txt", "text/plain", b"hello".to_vec())],
        )
    }

    #[tokio::test]
    async fn offer_answer_exchange() {
        let mut alice = sender();
        let mut bob = Session::receiver(TransferConfig::default());
        let mut alice_net = ScriptedNegotiator::new("v=0 offer");
        let mut bob_net = ScriptedNegotiator::new("v=0 answer");

        let offer_ref = offer(&mut alice, &mut alice_net).await.unwrap();
        assert!(offer_ref.len() <= 2000);

        let offer_desc = decode_remote(&mut bob, &offer_ref).unwrap();
        assert_eq!(offer_desc.role(), Role::Offer);
        let answer_ref = answer(&mut bob, &mut bob_net, offer_desc).await.unwrap();
        assert_eq!(bob_net.applied, vec!["v=0 offer".to_string()]);
        assert_eq!(bob.state(), SessionState::AwaitingRemote);

        let answer_desc = decode_remote(&mut alice, &answer_ref).unwrap();
        accept_answer(&mut alice, &mut alice_net, answer_desc)
            .await
            .unwrap();
        assert_eq!(alice_net.applied, vec!["v=0 answer".to_string()]);
        assert_eq!(alice.state(), SessionState::Connecting);
        assert_eq!(alice.id(), bob.id());
    }

    #[tokio::test]
    async fn oversized_offer_keeps_session_alive() {
        let mut alice = sender();
        let mut net = ScriptedNegotiator::new(&"a".repeat(5000));

        let err = offer(&mut alice, &mut net).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::Codec(CodecError::TooLong { max: 2000, .. })
        ));
        assert_eq!(alice.state(), SessionState::OfferCreated);
        assert!(alice.local_descriptor().is_some());
    }

    #[tokio::test]
    async fn negotiator_failure_fails_session() {
        let mut alice = sender();
        let err = offer(&mut alice, &mut ScriptedNegotiator::failing())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailed);
        assert!(alice.state().is_terminal());
    }

    #[test]
    fn malformed_reference_fails_with_decoding() {
        let mut bob = Session::receiver(TransferConfig::default());
        let err = decode_remote(&mut bob, "%%% not base64 %%%").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decoding);
        assert_eq!(
            bob.state(),
            SessionState::Failed {
                kind: ErrorKind::Decoding
            }
        );
    }

    #[tokio::test]
    async fn answer_for_other_session_rejected() {
        let mut alice = sender();
        let mut net = ScriptedNegotiator::new("offer");
        offer(&mut alice, &mut net).await.unwrap();

        let foreign = SessionDescriptor::answer_to(&SessionDescriptor::offer("x"), "y");
        let err = accept_answer(&mut alice, &mut net, foreign)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert!(net.applied.is_empty());
        assert_eq!(alice.state(), SessionState::OfferCreated);
    }
}
