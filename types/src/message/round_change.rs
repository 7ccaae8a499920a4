use alloy_primitives::B256;
use alloy_rlp::{Decodable, Encodable, EMPTY_LIST_CODE, EMPTY_STRING_CODE};

use super::{
    decode_opt_signature, encode_opt_signature, list_payload, opt_signature_length,
    CommonPayload, ConsensusPayload, Prepare, ROUND_CHANGE_CODE,
};
use crate::Proposal;

/// The signed portion of a ROUND-CHANGE: the view being abandoned plus
/// the sender's prepared certificate summary, if it holds one.
///
/// Inner payload `[sequence, round, prepared]` where `prepared` is
/// `[]` without a certificate and
/// `[prepared_round, prepared_digest, has_bad_proposal]` with one.
/// Wire form `[payload, signature]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignedRoundChangePayload {
    common: CommonPayload,
    pub prepared_round: Option<u64>,
    pub prepared_digest: B256,
    pub has_bad_proposal: bool,
}

impl SignedRoundChangePayload {
    pub fn new(sequence: u64, round: u64) -> Self {
        Self {
            common: CommonPayload::new(sequence, round),
            prepared_round: None,
            prepared_digest: B256::ZERO,
            has_bad_proposal: false,
        }
    }

    fn carries_certificate(&self) -> bool {
        self.prepared_round.is_some() && !self.prepared_digest.is_zero()
    }
}

impl ConsensusPayload for SignedRoundChangePayload {
    fn code(&self) -> u64 {
        ROUND_CHANGE_CODE
    }

    fn common(&self) -> &CommonPayload {
        &self.common
    }

    fn common_mut(&mut self) -> &mut CommonPayload {
        &mut self.common
    }

    fn encode_payload(&self) -> Vec<u8> {
        let prepared_length = if self.carries_certificate() {
            self.prepared_round.unwrap_or_default().length()
                + self.prepared_digest.length()
                + self.has_bad_proposal.length()
        } else {
            0
        };

        let payload_length = self.common.sequence.length()
            + self.common.round.length()
            + prepared_length
            + alloy_rlp::length_of_length(prepared_length);

        let mut out = Vec::with_capacity(payload_length + alloy_rlp::length_of_length(payload_length));
        alloy_rlp::Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.common.sequence.encode(&mut out);
        self.common.round.encode(&mut out);
        alloy_rlp::Header {
            list: true,
            payload_length: prepared_length,
        }
        .encode(&mut out);
        if self.carries_certificate() {
            self.prepared_round.unwrap_or_default().encode(&mut out);
            self.prepared_digest.encode(&mut out);
            self.has_bad_proposal.encode(&mut out);
        }
        out
    }
}

fn decode_signed_payload_fields(
    outer: &mut &[u8],
) -> Result<SignedRoundChangePayload, alloy_rlp::Error> {
    let mut payload = list_payload(outer)?;
    let sequence = u64::decode(&mut payload)?;
    let round = u64::decode(&mut payload)?;

    let mut prepared = list_payload(&mut payload)?;
    let mut message = SignedRoundChangePayload::new(sequence, round);
    if !prepared.is_empty() {
        message.prepared_round = Some(u64::decode(&mut prepared)?);
        message.prepared_digest = B256::decode(&mut prepared)?;
        message.has_bad_proposal = bool::decode(&mut prepared)?;
        if !prepared.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }
    }
    if !payload.is_empty() {
        return Err(alloy_rlp::Error::UnexpectedLength);
    }

    message.common.signature = decode_opt_signature(outer)?;
    Ok(message)
}

impl Encodable for SignedRoundChangePayload {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        let payload = self.encode_payload();
        let payload_length = payload.len() + opt_signature_length(&self.common.signature);
        alloy_rlp::Header {
            list: true,
            payload_length,
        }
        .encode(out);
        out.put_slice(&payload);
        encode_opt_signature(&self.common.signature, out);
    }

    fn length(&self) -> usize {
        let payload_length =
            self.encode_payload().len() + opt_signature_length(&self.common.signature);
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for SignedRoundChangePayload {
    fn decode(buf: &mut &[u8]) -> Result<Self, alloy_rlp::Error> {
        let mut outer = list_payload(buf)?;
        let message = decode_signed_payload_fields(&mut outer)?;
        if !outer.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }
        Ok(message)
    }
}

/// ROUND-CHANGE: a validator's request to abandon the current round.
/// When the sender holds a prepared certificate it ships the prepared
/// block and the quorum of PREPAREs proving the lock.
///
/// Wire form `[[payload, signature], prepared_block, justification]`,
/// with empty placeholders when the optional tail is absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundChange {
    pub signed_payload: SignedRoundChangePayload,
    pub prepared_block: Option<Proposal>,
    pub justification: Vec<Prepare>,
}

impl RoundChange {
    pub fn new(
        sequence: u64,
        round: u64,
        prepared_round: Option<u64>,
        prepared_block: Option<Proposal>,
        has_bad_proposal: bool,
    ) -> Self {
        let mut signed_payload = SignedRoundChangePayload::new(sequence, round);
        signed_payload.prepared_round = prepared_round;

        if let Some(block) = &prepared_block {
            signed_payload.prepared_digest = block.hash();
            signed_payload.has_bad_proposal = has_bad_proposal;
        }

        Self {
            signed_payload,
            prepared_block,
            justification: Vec::new(),
        }
    }

    pub fn prepared_round(&self) -> Option<u64> {
        self.signed_payload.prepared_round
    }

    pub fn prepared_digest(&self) -> B256 {
        self.signed_payload.prepared_digest
    }

    pub fn has_bad_proposal(&self) -> bool {
        self.signed_payload.has_bad_proposal
    }
}

impl ConsensusPayload for RoundChange {
    fn code(&self) -> u64 {
        ROUND_CHANGE_CODE
    }

    fn common(&self) -> &CommonPayload {
        self.signed_payload.common()
    }

    fn common_mut(&mut self) -> &mut CommonPayload {
        self.signed_payload.common_mut()
    }

    fn encode_payload(&self) -> Vec<u8> {
        self.signed_payload.encode_payload()
    }
}

impl Encodable for RoundChange {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        let block_length = self.prepared_block.as_ref().map_or(1, Encodable::length);
        let payload_length =
            self.signed_payload.length() + block_length + self.justification.length();
        alloy_rlp::Header {
            list: true,
            payload_length,
        }
        .encode(out);
        self.signed_payload.encode(out);
        match &self.prepared_block {
            Some(block) => block.encode(out),
            None => out.put_u8(EMPTY_LIST_CODE),
        }
        self.justification.encode(out);
    }

    fn length(&self) -> usize {
        let block_length = self.prepared_block.as_ref().map_or(1, Encodable::length);
        let payload_length =
            self.signed_payload.length() + block_length + self.justification.length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for RoundChange {
    fn decode(buf: &mut &[u8]) -> Result<Self, alloy_rlp::Error> {
        let mut outer = list_payload(buf)?;

        let mut signed = list_payload(&mut outer)?;
        let signed_payload = decode_signed_payload_fields(&mut signed)?;
        if !signed.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }

        let prepared_block = match outer.first() {
            Some(&EMPTY_LIST_CODE) | Some(&EMPTY_STRING_CODE) => {
                outer = &outer[1..];
                None
            }
            Some(_) => Some(Proposal::decode(&mut outer)?),
            None => return Err(alloy_rlp::Error::InputTooShort),
        };

        let justification = Vec::<Prepare>::decode(&mut outer)?;
        if !outer.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }

        // A prepared block that does not hash to the advertised digest
        // is a malformed certificate, caught at the decode boundary.
        if let Some(block) = &prepared_block {
            if block.hash() != signed_payload.prepared_digest {
                return Err(alloy_rlp::Error::Custom(
                    "round-change prepared block does not match prepared digest",
                ));
            }
        }

        Ok(Self {
            signed_payload,
            prepared_block,
            justification,
        })
    }
}
