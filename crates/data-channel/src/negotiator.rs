//! Offer/answer negotiation between two in-process peers.
//!
//! Peers that share a [`Rendezvous`] pair up through descriptor blobs shaped
//! like session descriptions:
//!
//! ```text
//! v=loopback
//! t=<offer token>
//! a=ordered:true
//! a=ice-server:stun:stun.l.google.com:19302
//! ```
//!
//! The answer repeats the offer token and adds its own (`r=`). ICE servers
//! come from [`TransferConfig::ice_servers`]; the loopback never contacts
//! them but advertises them like a real peer connection would. Tokens are
//! CSPRNG hex strings, so a blob cannot be guessed from another session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use peerdrop_transfer::{EventReceiver, Negotiator, TransferConfig, TransportError};
use tracing::{debug, info};

use crate::error::DataChannelError;
use crate::loopback::{LoopbackChannel, LoopbackOptions};
use crate::token::{generate_token, is_well_formed, validate_token};

const VERSION_LINE: &str = "v=loopback";

type Endpoint = (LoopbackChannel, EventReceiver);

#[derive(Default)]
struct Pending {
    answer_token: Option<String>,
    offerer_end: Option<Endpoint>,
}

/// Meeting point for loopback negotiators.
#[derive(Clone, Default)]
pub struct Rendezvous {
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    options: LoopbackOptions,
}

impl Rendezvous {
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            pending: Arc::default(),
            options,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Offers awaiting an answer or a connect.
    pub fn pending_offers(&self) -> usize {
        self.lock().len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Blob {
    offer_token: String,
    answer_token: Option<String>,
    ordered: bool,
    ice_servers: Vec<String>,
}

impl Blob {
    fn render(&self) -> String {
        let mut lines = vec![VERSION_LINE.to_string(), format!("t={}", self.offer_token)];
        if let Some(answer) = &self.answer_token {
            lines.push(format!("r={answer}"));
        }
        lines.push(format!("a=ordered:{}", self.ordered));
        lines.extend(self.ice_servers.iter().map(|url| format!("a=ice-server:{url}")));
        lines.join("\n")
    }

    fn parse(blob: &str) -> Result<Self, DataChannelError> {
        let mut lines = blob.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some(VERSION_LINE) {
            return Err(DataChannelError::MalformedBlob(
                "missing version line".into(),
            ));
        }

        let mut offer_token = None;
        let mut answer_token = None;
        let mut ordered = true;
        let mut ice_servers = Vec::new();
        for line in lines {
            match line.split_once('=') {
                Some(("t", token)) => offer_token = Some(token.to_string()),
                Some(("r", token)) => answer_token = Some(token.to_string()),
                Some(("a", attr)) => {
                    if let Some(value) = attr.strip_prefix("ordered:") {
                        ordered = value != "false";
                    } else if let Some(url) = attr.strip_prefix("ice-server:") {
                        ice_servers.push(url.to_string());
                    }
                }
                _ => {
                    return Err(DataChannelError::MalformedBlob(format!(
                        "unexpected line: {line}"
                    )));
                }
            }
        }

        let offer_token = offer_token
            .filter(|t| is_well_formed(t))
            .ok_or_else(|| DataChannelError::MalformedBlob("missing offer token".into()))?;
        if answer_token.as_deref().is_some_and(|t| !is_well_formed(t)) {
            return Err(DataChannelError::MalformedBlob(
                "invalid answer token".into(),
            ));
        }

        Ok(Self {
            offer_token,
            answer_token,
            ordered,
            ice_servers,
        })
    }
}

#[derive(Default)]
enum Stage {
    #[default]
    Fresh,
    Offered { token: String },
    Answered { token: String },
    Connected(Endpoint),
    Done,
}

/// [`Negotiator`] backed by a [`Rendezvous`].
pub struct LoopbackNegotiator {
    rendezvous: Rendezvous,
    ordered: bool,
    ice_servers: Vec<String>,
    stage: Stage,
}

impl LoopbackNegotiator {
    pub fn new(rendezvous: Rendezvous, config: &TransferConfig) -> Self {
        Self {
            rendezvous,
            ordered: config.ordered,
            ice_servers: config.ice_servers.clone(),
            stage: Stage::Fresh,
        }
    }

    fn offer_blob(&mut self) -> Result<String, DataChannelError> {
        if !matches!(self.stage, Stage::Fresh) {
            return Err(DataChannelError::AlreadyAnswered);
        }
        let token = generate_token();
        self.rendezvous
            .lock()
            .insert(token.clone(), Pending::default());

        let blob = Blob {
            offer_token: token.clone(),
            answer_token: None,
            ordered: self.ordered,
            ice_servers: self.ice_servers.clone(),
        };
        debug!(
            ordered = self.ordered,
            ice_servers = self.ice_servers.len(),
            "loopback offer created"
        );
        self.stage = Stage::Offered { token };
        Ok(blob.render())
    }

    fn answer_blob(&mut self, offer: &str) -> Result<String, DataChannelError> {
        if !matches!(self.stage, Stage::Fresh) {
            return Err(DataChannelError::AlreadyAnswered);
        }
        let offer = Blob::parse(offer)?;
        if offer.answer_token.is_some() {
            return Err(DataChannelError::MalformedBlob(
                "expected an offer, got an answer".into(),
            ));
        }

        let answer_token = generate_token();
        let mut pending = self.rendezvous.lock();
        let slot = pending
            .get_mut(&offer.offer_token)
            .ok_or(DataChannelError::UnknownOffer)?;
        if slot.answer_token.is_some() {
            return Err(DataChannelError::AlreadyAnswered);
        }

        let (offerer_end, answerer_end) = LoopbackChannel::pair(self.rendezvous.options.clone());
        slot.answer_token = Some(answer_token.clone());
        slot.offerer_end = Some(offerer_end);
        drop(pending);

        info!(
            ordered = offer.ordered,
            remote_ice_servers = offer.ice_servers.len(),
            "loopback offer answered"
        );
        self.stage = Stage::Connected(answerer_end);
        Ok(Blob {
            offer_token: offer.offer_token,
            answer_token: Some(answer_token),
            ordered: offer.ordered,
            ice_servers: self.ice_servers.clone(),
        }
        .render())
    }

    fn apply_answer(&mut self, answer: &str) -> Result<(), DataChannelError> {
        let Stage::Offered { token } = &self.stage else {
            return Err(DataChannelError::NotNegotiated);
        };
        let answer = Blob::parse(answer)?;
        let answer_token = answer
            .answer_token
            .as_deref()
            .ok_or(DataChannelError::AnswerMismatch)?;
        if !validate_token(&answer.offer_token, token) {
            return Err(DataChannelError::AnswerMismatch);
        }

        let pending = self.rendezvous.lock();
        let expected = pending
            .get(token)
            .and_then(|slot| slot.answer_token.as_deref())
            .ok_or(DataChannelError::UnknownOffer)?;
        if !validate_token(answer_token, expected) {
            return Err(DataChannelError::AnswerMismatch);
        }
        drop(pending);

        self.stage = Stage::Answered {
            token: token.clone(),
        };
        Ok(())
    }

    fn take_endpoint(&mut self) -> Result<Endpoint, DataChannelError> {
        match std::mem::take(&mut self.stage) {
            Stage::Connected(endpoint) => {
                self.stage = Stage::Done;
                Ok(endpoint)
            }
            Stage::Answered { token } => {
                let slot = self.rendezvous.lock().remove(&token);
                self.stage = Stage::Done;
                slot.and_then(|s| s.offerer_end)
                    .ok_or(DataChannelError::UnknownOffer)
            }
            other => {
                self.stage = other;
                Err(DataChannelError::NotNegotiated)
            }
        }
    }
}

impl Drop for LoopbackNegotiator {
    fn drop(&mut self) {
        if let Stage::Offered { token } | Stage::Answered { token } = &self.stage {
            self.rendezvous.lock().remove(token);
        }
    }
}

impl Negotiator for LoopbackNegotiator {
    type Channel = LoopbackChannel;

    async fn create_offer(&mut self) -> Result<String, TransportError> {
        Ok(self.offer_blob()?)
    }

    async fn accept_offer(&mut self, offer: &str) -> Result<String, TransportError> {
        Ok(self.answer_blob(offer)?)
    }

    async fn accept_answer(&mut self, answer: &str) -> Result<(), TransportError> {
        Ok(self.apply_answer(answer)?)
    }

    async fn connect(mut self) -> Result<Endpoint, TransportError> {
        Ok(self.take_endpoint()?)
    }
}
