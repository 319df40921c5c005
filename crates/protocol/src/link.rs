//! Shareable links carrying a negotiation reference.
//!
//! An offer travels as `<page>?cross=<reference>`, the answer comes back as
//! `<page>?answer=<reference>`.

use url::Url;

use crate::codec::CodecError;
use crate::constants::{ANSWER_QUERY_PARAM, OFFER_QUERY_PARAM};
use crate::types::Role;

/// A negotiation reference paired with the role it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLink {
    role: Role,
    reference: String,
}

impl ShareLink {
    pub fn new(role: Role, reference: impl Into<String>) -> Self {
        Self {
            role,
            reference: reference.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Builds the link on top of `base`, dropping any query or fragment the
    /// base already had.
    ///
    /// Fails with [`CodecError::TooLong`] when the full URL exceeds `max_len`.
    pub fn to_url(&self, base: &str, max_len: usize) -> Result<String, CodecError> {
        let mut url =
            Url::parse(base).map_err(|e| CodecError::Encoding(format!("invalid base URL: {e}")))?;
        url.set_fragment(None);
        url.set_query(None);
        url.query_pairs_mut()
            .append_pair(query_param(self.role), &self.reference);

        let link = String::from(url);
        if link.len() > max_len {
            return Err(CodecError::TooLong {
                length: link.len(),
                max: max_len,
            });
        }
        Ok(link)
    }

    /// Extracts the reference from a pasted link.
    pub fn parse(link: &str) -> Result<Self, CodecError> {
        let url = Url::parse(link.trim())
            .map_err(|e| CodecError::Decoding(format!("invalid link: {e}")))?;

        for (key, value) in url.query_pairs() {
            let role = match key.as_ref() {
                OFFER_QUERY_PARAM => Role::Offer,
                ANSWER_QUERY_PARAM => Role::Answer,
                _ => continue,
            };
            if value.is_empty() {
                return Err(CodecError::Decoding(format!("empty `{key}` parameter")));
            }
            return Ok(Self::new(role, value.into_owned()));
        }

        Err(CodecError::Decoding(
            "link carries no negotiation reference".into(),
        ))
    }
}

fn query_param(role: Role) -> &'static str {
    match role {
        Role::Offer => OFFER_QUERY_PARAM,
        Role::Answer => ANSWER_QUERY_PARAM,
    }
}
