//! QBFT header extra-data.
//!
//! The whole `extra_data` field of a header is one RLP list:
//! `[vanity, validators, vote, round, committed_seals]`, with a nil
//! vote encoded as an empty list. Header hashing strips the committed
//! seals and forces the round to zero; the commit-seal preimage keeps
//! the round the block committed in.

use alloy_consensus::Header;
use alloy_primitives::{Bytes, B256};
use alloy_rlp::{Decodable, Encodable, EMPTY_LIST_CODE};
use thiserror::Error;

use crate::{Address, Signature};

/// Fixed number of extra-data bytes reserved for validator vanity.
pub const EXTRA_VANITY: usize = 32;

/// Fixed number of extra-data bytes reserved for each committed seal.
pub const EXTRA_SEAL: usize = 65;

/// Magic vote byte for adding a validator.
pub const AUTH_VOTE: u8 = 0xFF;

/// Magic vote byte for removing a validator.
pub const DROP_VOTE: u8 = 0x00;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExtraError {
    #[error("invalid qbft header extra-data")]
    InvalidExtra,

    #[error("invalid committed seals")]
    InvalidCommittedSeals,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorVote {
    pub recipient: Address,
    pub vote_type: u8,
}

impl ValidatorVote {
    pub fn auth(recipient: Address) -> Self {
        Self {
            recipient,
            vote_type: AUTH_VOTE,
        }
    }

    pub fn drop(recipient: Address) -> Self {
        Self {
            recipient,
            vote_type: DROP_VOTE,
        }
    }

    fn rlp_payload_length(&self) -> usize {
        self.recipient.length() + self.vote_type.length()
    }
}

impl Encodable for ValidatorVote {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        let payload_length = self.rlp_payload_length();
        alloy_rlp::Header {
            list: true,
            payload_length,
        }
        .encode(out);
        self.recipient.encode(out);
        self.vote_type.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.rlp_payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for ValidatorVote {
    fn decode(buf: &mut &[u8]) -> Result<Self, alloy_rlp::Error> {
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        Ok(Self {
            recipient: Address::decode(buf)?,
            vote_type: u8::decode(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QbftExtra {
    pub vanity: Bytes,
    pub validators: Vec<Address>,
    pub vote: Option<ValidatorVote>,
    pub round: u32,
    pub committed_seals: Vec<Bytes>,
}

impl QbftExtra {
    /// The extra-data a header starts from when it carries none yet:
    /// a zeroed vanity prefix and empty everything else.
    pub fn genesis_default() -> Self {
        Self {
            vanity: Bytes::from(vec![0; EXTRA_VANITY]),
            validators: Vec::new(),
            vote: None,
            round: 0,
            committed_seals: Vec::new(),
        }
    }

    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ExtraError> {
        let mut buf = bytes;
        let extra = Self::decode(&mut buf).map_err(|_| ExtraError::InvalidExtra)?;
        if !buf.is_empty() {
            return Err(ExtraError::InvalidExtra);
        }
        Ok(extra)
    }

    pub fn encode_bytes(&self) -> Bytes {
        Bytes::from(alloy_rlp::encode(self))
    }

    /// Strips the committed seals and pins the round, which is how both
    /// the header hash (round 0) and the commit-seal preimage (claimed
    /// round) are formed.
    pub fn filtered(mut self, round: u32) -> Self {
        self.committed_seals.clear();
        self.round = round;
        self
    }

    fn rlp_payload_length(&self) -> usize {
        self.vanity.length()
            + self.validators.length()
            + self.vote.as_ref().map_or(1, Encodable::length)
            + self.round.length()
            + self.committed_seals.length()
    }
}

impl Encodable for QbftExtra {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        let payload_length = self.rlp_payload_length();
        alloy_rlp::Header {
            list: true,
            payload_length,
        }
        .encode(out);
        self.vanity.encode(out);
        self.validators.encode(out);
        match &self.vote {
            Some(vote) => vote.encode(out),
            None => out.put_u8(EMPTY_LIST_CODE),
        }
        self.round.encode(out);
        self.committed_seals.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.rlp_payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for QbftExtra {
    fn decode(buf: &mut &[u8]) -> Result<Self, alloy_rlp::Error> {
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        if buf.len() < header.payload_length {
            return Err(alloy_rlp::Error::InputTooShort);
        }

        let mut payload = &buf[..header.payload_length];
        *buf = &buf[header.payload_length..];

        let vanity = Bytes::decode(&mut payload)?;
        let validators = Vec::<Address>::decode(&mut payload)?;

        let vote = match payload.first() {
            Some(&EMPTY_LIST_CODE) => {
                payload = &payload[1..];
                None
            }
            Some(_) => Some(ValidatorVote::decode(&mut payload)?),
            None => return Err(alloy_rlp::Error::InputTooShort),
        };

        let round = u32::decode(&mut payload)?;
        let committed_seals = Vec::<Bytes>::decode(&mut payload)?;

        if !payload.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }

        Ok(Self {
            vanity,
            validators,
            vote,
            round,
            committed_seals,
        })
    }
}

/// Decodes the QBFT extra-data out of a header.
pub fn header_extra(header: &Header) -> Result<QbftExtra, ExtraError> {
    QbftExtra::decode_bytes(&header.extra_data)
}

/// Decodes the header's extra-data (or starts from the genesis default
/// when the header carries none), lets `apply` mutate it, and writes
/// the re-encoded result back into the header.
pub fn apply_header_extra<F>(header: &mut Header, apply: F) -> Result<(), ExtraError>
where
    F: FnOnce(&mut QbftExtra) -> Result<(), ExtraError>,
{
    let mut extra = if header.extra_data.is_empty() {
        QbftExtra::genesis_default()
    } else {
        header_extra(header)?
    };

    apply(&mut extra)?;
    header.extra_data = extra.encode_bytes();
    Ok(())
}

pub fn write_validators(extra: &mut QbftExtra, validators: Vec<Address>) {
    extra.validators = validators;
}

pub fn write_round(extra: &mut QbftExtra, round: u32) {
    extra.round = round;
}

pub fn write_vote(extra: &mut QbftExtra, recipient: Address, auth: bool) {
    extra.vote = Some(if auth {
        ValidatorVote::auth(recipient)
    } else {
        ValidatorVote::drop(recipient)
    });
}

/// Writes the committed seals gathered at commit time. Every seal must
/// be exactly [`EXTRA_SEAL`] bytes and at least one is required.
pub fn write_committed_seals(extra: &mut QbftExtra, seals: &[Signature]) -> Result<(), ExtraError> {
    if seals.is_empty() {
        return Err(ExtraError::InvalidCommittedSeals);
    }
    extra.committed_seals = seals
        .iter()
        .map(|seal| Bytes::copy_from_slice(seal.as_bytes()))
        .collect();
    Ok(())
}

/// Raw variant of [`write_committed_seals`] for callers holding wire
/// bytes; rejects seals of the wrong length.
pub fn write_committed_seal_bytes(
    extra: &mut QbftExtra,
    seals: Vec<Bytes>,
) -> Result<(), ExtraError> {
    if seals.is_empty() || seals.iter().any(|seal| seal.len() != EXTRA_SEAL) {
        return Err(ExtraError::InvalidCommittedSeals);
    }
    extra.committed_seals = seals;
    Ok(())
}

/// The 32-byte digest a commit seal signs: the header hashed with its
/// seals stripped and the round pinned to the round being committed.
pub fn commit_seal_preimage(header: &Header, round: u32) -> Result<B256, ExtraError> {
    let extra = header_extra(header)?;
    let mut filtered = header.clone();
    filtered.extra_data = extra.filtered(round).encode_bytes();
    Ok(filtered.hash_slow())
}

/// The canonical header hash: seals stripped, round forced to zero, so
/// the digest is stable across the rounds a height may take to commit.
/// Headers without decodable QBFT extra-data hash as-is.
pub fn header_hash(header: &Header) -> B256 {
    match commit_seal_preimage(header, 0) {
        Ok(hash) => hash,
        Err(_) => header.hash_slow(),
    }
}
