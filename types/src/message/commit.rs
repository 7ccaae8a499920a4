use alloy_primitives::B256;
use alloy_rlp::{Decodable, Encodable};

use super::{
    decode_opt_signature, encode_opt_signature, list_payload, opt_signature_length,
    CommonPayload, ConsensusPayload, COMMIT_CODE,
};
use crate::Signature;

/// COMMIT: a validator's vote to finalize the prepared digest, carrying
/// the commit seal that will be embedded in the sealed header.
///
/// Inner payload `[sequence, round, digest, commit_seal]`, wire form
/// `[payload, signature]`. The commit seal signs the commit-seal
/// preimage of the proposal header at this round, not the message
/// payload; the outer signature authenticates the message itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    common: CommonPayload,
    pub digest: B256,
    pub commit_seal: Signature,
}

impl Commit {
    pub fn new(sequence: u64, round: u64, digest: B256, commit_seal: Signature) -> Self {
        Self {
            common: CommonPayload::new(sequence, round),
            digest,
            commit_seal,
        }
    }
}

impl ConsensusPayload for Commit {
    fn code(&self) -> u64 {
        COMMIT_CODE
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
            + self.digest.length()
            + self.commit_seal.length();
        let mut out = Vec::with_capacity(payload_length + alloy_rlp::length_of_length(payload_length));
        alloy_rlp::Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.common.sequence.encode(&mut out);
        self.common.round.encode(&mut out);
        self.digest.encode(&mut out);
        self.commit_seal.encode(&mut out);
        out
    }
}

impl Encodable for Commit {
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

impl Decodable for Commit {
    fn decode(buf: &mut &[u8]) -> Result<Self, alloy_rlp::Error> {
        let mut outer = list_payload(buf)?;

        let mut payload = list_payload(&mut outer)?;
        let sequence = u64::decode(&mut payload)?;
        let round = u64::decode(&mut payload)?;
        let digest = B256::decode(&mut payload)?;
        let commit_seal = Signature::decode(&mut payload)?;
        if !payload.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }

        let signature = decode_opt_signature(&mut outer)?;
        if !outer.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }

        let mut commit = Self::new(sequence, round, digest, commit_seal);
        commit.common.signature = signature;
        Ok(commit)
    }
}
