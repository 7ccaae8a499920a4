use alloy_primitives::B256;
use alloy_rlp::{Decodable, Encodable};

use super::{
    decode_opt_signature, encode_opt_signature, list_payload, opt_signature_length,
    CommonPayload, ConsensusPayload, PREPARE_CODE,
};
use crate::{Address, Signature};

/// PREPARE: a validator's vote that it received a valid proposal with
/// the given digest from the round's proposer.
///
/// Inner payload `[sequence, round, digest]`, wire form
/// `[payload, signature]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Prepare {
    common: CommonPayload,
    pub digest: B256,
}

impl Prepare {
    pub fn new(sequence: u64, round: u64, digest: B256) -> Self {
        Self {
            common: CommonPayload::new(sequence, round),
            digest,
        }
    }

    /// Rebuilds a PREPARE carried inside a justification, where the
    /// signature and recovered source are already known.
    pub fn with_signature_and_source(
        sequence: u64,
        round: u64,
        digest: B256,
        signature: Signature,
        source: Address,
    ) -> Self {
        let mut prepare = Self::new(sequence, round, digest);
        prepare.set_signature(signature);
        prepare.set_source(source);
        prepare
    }
}

impl ConsensusPayload for Prepare {
    fn code(&self) -> u64 {
        PREPARE_CODE
    }

    fn common(&self) -> &CommonPayload {
        &self.common
    }

    fn common_mut(&mut self) -> &mut CommonPayload {
        &mut self.common
    }

    fn encode_payload(&self) -> Vec<u8> {
        let payload_length =
            self.common.sequence.length() + self.common.round.length() + self.digest.length();
        let mut out = Vec::with_capacity(payload_length + alloy_rlp::length_of_length(payload_length));
        alloy_rlp::Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.common.sequence.encode(&mut out);
        self.common.round.encode(&mut out);
        self.digest.encode(&mut out);
        out
    }
}

impl Encodable for Prepare {
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

impl Decodable for Prepare {
    fn decode(buf: &mut &[u8]) -> Result<Self, alloy_rlp::Error> {
        let mut outer = list_payload(buf)?;

        let mut payload = list_payload(&mut outer)?;
        let sequence = u64::decode(&mut payload)?;
        let round = u64::decode(&mut payload)?;
        let digest = B256::decode(&mut payload)?;
        if !payload.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }

        let signature = decode_opt_signature(&mut outer)?;
        if !outer.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }

        let mut prepare = Self::new(sequence, round, digest);
        prepare.common.signature = signature;
        Ok(prepare)
    }
}
