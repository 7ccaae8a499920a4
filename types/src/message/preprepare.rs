use alloy_rlp::{Decodable, Encodable};

use super::{
    decode_opt_signature, encode_opt_signature, list_payload, opt_signature_length,
    CommonPayload, ConsensusPayload, Prepare, SignedRoundChangePayload, PREPREPARE_CODE,
};
use crate::Proposal;

/// PRE-PREPARE: the proposer's block for a view. At rounds above zero
/// it must carry the round-change certificate (and, when a prepared
/// block is re-proposed, the PREPARE certificate) that justifies it.
///
/// Inner payload `[sequence, round, proposal]`, wire form
/// `[[payload, signature], justification_round_changes,
/// justification_prepares]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preprepare {
    common: CommonPayload,
    pub proposal: Proposal,
    pub justification_round_changes: Vec<SignedRoundChangePayload>,
    pub justification_prepares: Vec<Prepare>,
}

impl Preprepare {
    pub fn new(sequence: u64, round: u64, proposal: Proposal) -> Self {
        Self {
            common: CommonPayload::new(sequence, round),
            proposal,
            justification_round_changes: Vec::new(),
            justification_prepares: Vec::new(),
        }
    }
}

impl ConsensusPayload for Preprepare {
    fn code(&self) -> u64 {
        PREPREPARE_CODE
    }

    fn common(&self) -> &CommonPayload {
        &self.common
    }

    fn common_mut(&mut self) -> &mut CommonPayload {
        &mut self.common
    }

    fn encode_payload(&self) -> Vec<u8> {
        let payload_length = self.common.sequence.length()
            + self.common.round.length()
            + self.proposal.length();
        let mut out = Vec::with_capacity(payload_length + alloy_rlp::length_of_length(payload_length));
        alloy_rlp::Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.common.sequence.encode(&mut out);
        self.common.round.encode(&mut out);
        self.proposal.encode(&mut out);
        out
    }
}

impl Encodable for Preprepare {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        let payload = self.encode_payload();
        let signed_length = payload.len() + opt_signature_length(&self.common.signature);
        let payload_length = signed_length
            + alloy_rlp::length_of_length(signed_length)
            + self.justification_round_changes.length()
            + self.justification_prepares.length();

        alloy_rlp::Header {
            list: true,
            payload_length,
        }
        .encode(out);
        alloy_rlp::Header {
            list: true,
            payload_length: signed_length,
        }
        .encode(out);
        out.put_slice(&payload);
        encode_opt_signature(&self.common.signature, out);
        self.justification_round_changes.encode(out);
        self.justification_prepares.encode(out);
    }

    fn length(&self) -> usize {
        let signed_length =
            self.encode_payload().len() + opt_signature_length(&self.common.signature);
        let payload_length = signed_length
            + alloy_rlp::length_of_length(signed_length)
            + self.justification_round_changes.length()
            + self.justification_prepares.length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for Preprepare {
    fn decode(buf: &mut &[u8]) -> Result<Self, alloy_rlp::Error> {
        let mut outer = list_payload(buf)?;

        let mut signed = list_payload(&mut outer)?;
        let mut payload = list_payload(&mut signed)?;
        let sequence = u64::decode(&mut payload)?;
        let round = u64::decode(&mut payload)?;
        let proposal = Proposal::decode(&mut payload)?;
        if !payload.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }
        let signature = decode_opt_signature(&mut signed)?;
        if !signed.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }

        let justification_round_changes = Vec::<SignedRoundChangePayload>::decode(&mut outer)?;
        let justification_prepares = Vec::<Prepare>::decode(&mut outer)?;
        if !outer.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }

        let mut preprepare = Self::new(sequence, round, proposal);
        preprepare.common.signature = signature;
        preprepare.justification_round_changes = justification_round_changes;
        preprepare.justification_prepares = justification_prepares;
        Ok(preprepare)
    }
}
