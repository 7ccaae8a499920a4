//! The four QBFT consensus messages and their canonical wire codec.
//!
//! Signatures cover `rlp([code, payload])` where `payload` is the
//! message's inner payload list spliced in raw, so the codec must be
//! byte-canonical: decoding a wire message and re-encoding its payload
//! reproduces the exact bytes the sender signed. alloy-rlp's rejection
//! of non-canonical integers is load-bearing here.

mod commit;
mod prepare;
mod preprepare;
mod round_change;

pub use commit::Commit;
pub use prepare::Prepare;
pub use preprepare::Preprepare;
pub use round_change::{RoundChange, SignedRoundChangePayload};

use alloy_rlp::{Decodable, Encodable};
use thiserror::Error;

use crate::signing::secp256k1::SigningError;
use crate::{Address, PrivateKey, Signature, View};

/// Message codes, fixed at genesis. A second numbering (0x16..0x19)
/// exists in the wild for a different protocol revision and is not
/// accepted here.
pub const PREPREPARE_CODE: u64 = 0x12;
pub const PREPARE_CODE: u64 = 0x13;
pub const COMMIT_CODE: u64 = 0x14;
pub const ROUND_CHANGE_CODE: u64 = 0x15;

pub fn is_consensus_code(code: u64) -> bool {
    matches!(
        code,
        PREPREPARE_CODE | PREPARE_CODE | COMMIT_CODE | ROUND_CHANGE_CODE
    )
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("failed to decode consensus message: {0}")]
    Rlp(#[from] alloy_rlp::Error),

    #[error("unknown consensus message code {0:#x}")]
    UnknownCode(u64),

    #[error("trailing bytes after consensus message")]
    TrailingBytes,
}

/// Fields shared by every consensus message. The source address is
/// never read off the wire; it stays zeroed until signature recovery
/// fills it in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommonPayload {
    pub sequence: u64,
    pub round: u64,
    source: Address,
    signature: Option<Signature>,
}

impl CommonPayload {
    pub fn new(sequence: u64, round: u64) -> Self {
        Self {
            sequence,
            round,
            source: Address::ZERO,
            signature: None,
        }
    }

    pub fn view(&self) -> View {
        View::new(self.sequence, self.round)
    }
}

/// Accessors common to all consensus messages; mirrors what the
/// backlog and the message sets need to treat messages uniformly.
pub trait ConsensusPayload {
    fn code(&self) -> u64;
    fn common(&self) -> &CommonPayload;
    fn common_mut(&mut self) -> &mut CommonPayload;

    /// The inner payload list, the bytes a signature attests to
    /// (wrapped together with the code).
    fn encode_payload(&self) -> Vec<u8>;

    fn view(&self) -> View {
        self.common().view()
    }

    fn source(&self) -> Address {
        self.common().source
    }

    fn set_source(&mut self, address: Address) {
        self.common_mut().source = address;
    }

    fn signature(&self) -> Option<&Signature> {
        self.common().signature.as_ref()
    }

    fn set_signature(&mut self, signature: Signature) {
        self.common_mut().signature = Some(signature);
    }

    /// `rlp([code, payload])` with the payload spliced in raw.
    fn signing_payload(&self) -> Vec<u8> {
        signing_payload(self.code(), &self.encode_payload())
    }

    /// Signs the message with `key` and stores the signature.
    fn sign(&mut self, key: &PrivateKey) -> Result<(), SigningError> {
        let signature = key.sign(&self.signing_payload())?;
        self.set_signature(signature);
        Ok(())
    }

    /// Recovers the signer from the stored signature, stores it as the
    /// message source and returns it.
    fn recover_source(&mut self) -> Result<Address, SigningError> {
        let payload = self.signing_payload();
        let signature = self.signature().ok_or(SigningError::InvalidSignature)?;
        let source = signature.recover(&payload)?;
        self.set_source(source);
        Ok(source)
    }
}

pub(crate) fn signing_payload(code: u64, payload: &[u8]) -> Vec<u8> {
    let payload_length = code.length() + payload.len();
    let mut out = Vec::with_capacity(payload_length + alloy_rlp::length_of_length(payload_length));
    alloy_rlp::Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    code.encode(&mut out);
    out.extend_from_slice(payload);
    out
}

/// Consumes one list item and returns a cursor over its payload.
pub(crate) fn list_payload<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], alloy_rlp::Error> {
    let header = alloy_rlp::Header::decode(buf)?;
    if !header.list {
        return Err(alloy_rlp::Error::UnexpectedString);
    }
    if buf.len() < header.payload_length {
        return Err(alloy_rlp::Error::InputTooShort);
    }
    let payload = &buf[..header.payload_length];
    *buf = &buf[header.payload_length..];
    Ok(payload)
}

/// A missing signature travels as an empty byte string, the way an
/// unsigned message would serialize before signing.
pub(crate) fn encode_opt_signature(
    signature: &Option<Signature>,
    out: &mut dyn alloy_rlp::BufMut,
) {
    match signature {
        Some(signature) => signature.encode(out),
        None => out.put_u8(alloy_rlp::EMPTY_STRING_CODE),
    }
}

pub(crate) fn opt_signature_length(signature: &Option<Signature>) -> usize {
    signature.as_ref().map_or(1, Encodable::length)
}

pub(crate) fn decode_opt_signature(
    buf: &mut &[u8],
) -> Result<Option<Signature>, alloy_rlp::Error> {
    let bytes = alloy_rlp::Header::decode_bytes(buf, false)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    Signature::from_slice(bytes)
        .map(Some)
        .map_err(|_| alloy_rlp::Error::UnexpectedLength)
}

/// A decoded consensus message of any kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Preprepare(Preprepare),
    Prepare(Prepare),
    Commit(Commit),
    RoundChange(RoundChange),
}

impl Message {
    fn payload(&self) -> &dyn ConsensusPayload {
        match self {
            Self::Preprepare(m) => m,
            Self::Prepare(m) => m,
            Self::Commit(m) => m,
            Self::RoundChange(m) => m,
        }
    }

    fn payload_mut(&mut self) -> &mut dyn ConsensusPayload {
        match self {
            Self::Preprepare(m) => m,
            Self::Prepare(m) => m,
            Self::Commit(m) => m,
            Self::RoundChange(m) => m,
        }
    }

    pub fn code(&self) -> u64 {
        self.payload().code()
    }

    pub fn view(&self) -> View {
        self.payload().view()
    }

    pub fn source(&self) -> Address {
        self.payload().source()
    }

    pub fn set_source(&mut self, address: Address) {
        self.payload_mut().set_source(address);
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.payload().signature()
    }

    pub fn set_signature(&mut self, signature: Signature) {
        self.payload_mut().set_signature(signature);
    }

    pub fn signing_payload(&self) -> Vec<u8> {
        self.payload().signing_payload()
    }

    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), SigningError> {
        self.payload_mut().sign(key)
    }

    pub fn recover_source(&mut self) -> Result<Address, SigningError> {
        self.payload_mut().recover_source()
    }

    pub fn encode_wire(&self) -> Vec<u8> {
        match self {
            Self::Preprepare(m) => alloy_rlp::encode(m),
            Self::Prepare(m) => alloy_rlp::encode(m),
            Self::Commit(m) => alloy_rlp::encode(m),
            Self::RoundChange(m) => alloy_rlp::encode(m),
        }
    }
}

impl From<Preprepare> for Message {
    fn from(m: Preprepare) -> Self {
        Self::Preprepare(m)
    }
}

impl From<Prepare> for Message {
    fn from(m: Prepare) -> Self {
        Self::Prepare(m)
    }
}

impl From<Commit> for Message {
    fn from(m: Commit) -> Self {
        Self::Commit(m)
    }
}

impl From<RoundChange> for Message {
    fn from(m: RoundChange) -> Self {
        Self::RoundChange(m)
    }
}

/// Decodes a wire message of the given code. The full buffer must be
/// consumed; trailing bytes are rejected.
pub fn decode(code: u64, data: &[u8]) -> Result<Message, CodecError> {
    let mut buf = data;
    let message = match code {
        PREPREPARE_CODE => Message::Preprepare(Preprepare::decode(&mut buf)?),
        PREPARE_CODE => Message::Prepare(Prepare::decode(&mut buf)?),
        COMMIT_CODE => Message::Commit(Commit::decode(&mut buf)?),
        ROUND_CHANGE_CODE => Message::RoundChange(RoundChange::decode(&mut buf)?),
        other => return Err(CodecError::UnknownCode(other)),
    };

    if !buf.is_empty() {
        return Err(CodecError::TrailingBytes);
    }

    Ok(message)
}
