use core::fmt;

use alloy_primitives::Address as AlloyAddress;
use serde::{Deserialize, Serialize};

use crate::signing::secp256k1::PublicKey;
use crate::signing::Hashable;

#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(AlloyAddress);

impl Address {
    const LENGTH: usize = 20;

    pub const ZERO: Self = Self(AlloyAddress::ZERO);

    pub const fn new(value: [u8; Self::LENGTH]) -> Self {
        Self(AlloyAddress::new(value))
    }

    pub fn from_public_key(public_key: &PublicKey) -> Self {
        // Hash (keccak256) of the x and y coordinates of the public key
        let hash = public_key.hash();

        // Take the last 20 bytes for Ethereum address
        let mut address = [0; Self::LENGTH];
        address.copy_from_slice(&hash[12..]);
        Self(AlloyAddress::new(address))
    }

    pub fn into_inner(self) -> [u8; Self::LENGTH] {
        self.0.into()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn to_alloy_address(&self) -> alloy_primitives::Address {
        self.0
    }

    /// EIP-55 checksummed hex rendering, used by the string sort mode.
    pub fn to_checksum_string(&self) -> String {
        self.0.to_checksum(None)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl From<AlloyAddress> for Address {
    fn from(addr: AlloyAddress) -> Self {
        Self::new(addr.into())
    }
}

impl From<Address> for AlloyAddress {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl alloy_rlp::Encodable for Address {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.0.encode(out);
    }

    fn length(&self) -> usize {
        self.0.length()
    }
}

impl alloy_rlp::Decodable for Address {
    fn decode(buf: &mut &[u8]) -> Result<Self, alloy_rlp::Error> {
        AlloyAddress::decode(buf).map(Self)
    }
}
