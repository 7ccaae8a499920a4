use core::fmt;

use alloy_consensus::Header;
use alloy_primitives::B256;
use alloy_rlp::{Decodable, Encodable};

use crate::extra;

/// A block proposal under negotiation.
///
/// Consensus only cares about the header: its digest identifies the
/// proposal, its number must match the sequence, and its extra-data
/// carries the validator set and, once committed, the seals. Bodies
/// travel with the execution layer, not with consensus messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    header: Header,
}

impl Proposal {
    pub fn new(header: Header) -> Self {
        Self { header }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn into_header(self) -> Header {
        self.header
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> B256 {
        self.header.parent_hash
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// The proposal digest: stable across rounds and seal sets.
    pub fn hash(&self) -> B256 {
        extra::header_hash(&self.header)
    }
}

impl fmt::Display for Proposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {} ({})", self.number(), self.hash())
    }
}

impl Encodable for Proposal {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.header.encode(out);
    }

    fn length(&self) -> usize {
        self.header.length()
    }
}

impl Decodable for Proposal {
    fn decode(buf: &mut &[u8]) -> Result<Self, alloy_rlp::Error> {
        Header::decode(buf).map(Self::new)
    }
}
