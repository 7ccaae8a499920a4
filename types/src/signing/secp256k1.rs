use core::fmt;

use alloy_primitives::{keccak256, B256};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

use super::Hashable;
use crate::Address;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid recovery id")]
    InvalidRecoveryId,

    #[error("public key recovery failed")]
    RecoveryFailed,
}

/// A 65-byte recoverable ECDSA signature, `r || s || v` with `v` in {0, 1}.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Signature([u8; Self::LENGTH]);

impl Signature {
    pub const LENGTH: usize = 65;

    pub const fn from_bytes(bytes: [u8; Self::LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, SigningError> {
        let bytes: [u8; Self::LENGTH] =
            slice.try_into().map_err(|_| SigningError::InvalidSignature)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }

    fn split(&self) -> Result<(EcdsaSignature, RecoveryId), SigningError> {
        let signature = EcdsaSignature::from_slice(&self.0[..64])
            .map_err(|_| SigningError::InvalidSignature)?;
        let recovery_id =
            RecoveryId::from_byte(self.0[64]).ok_or(SigningError::InvalidRecoveryId)?;
        Ok((signature, recovery_id))
    }

    /// Recovers the signer address of a signature over `keccak256(message)`.
    pub fn recover(&self, message: &[u8]) -> Result<Address, SigningError> {
        self.recover_prehashed(&keccak256(message))
    }

    /// Recovers the signer address of a signature over an externally
    /// computed 32-byte digest (the commit-seal path).
    pub fn recover_prehashed(&self, prehash: &B256) -> Result<Address, SigningError> {
        let (signature, recovery_id) = self.split()?;
        let verifying_key =
            VerifyingKey::recover_from_prehash(prehash.as_slice(), &signature, recovery_id)
                .map_err(|_| SigningError::RecoveryFailed)?;
        Ok(Address::from_public_key(&PublicKey(verifying_key)))
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0; Self::LENGTH])
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

impl alloy_rlp::Encodable for Signature {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.0.as_slice().encode(out);
    }

    fn length(&self) -> usize {
        self.0.as_slice().length()
    }
}

impl alloy_rlp::Decodable for Signature {
    fn decode(buf: &mut &[u8]) -> Result<Self, alloy_rlp::Error> {
        let bytes = alloy_rlp::Header::decode_bytes(buf, false)?;
        Self::from_slice(bytes).map_err(|_| alloy_rlp::Error::UnexpectedLength)
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Uncompressed SEC1 encoding, 65 bytes with the 0x04 prefix.
    pub fn to_uncompressed_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }
}

impl Hashable for PublicKey {
    type Output = [u8; 32];

    fn hash(&self) -> [u8; 32] {
        // The address fingerprint covers the x and y coordinates only,
        // not the SEC1 point prefix.
        let encoded = self.0.to_encoded_point(false);
        keccak256(&encoded.as_bytes()[1..]).into()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(0x{})", hex::encode(self.to_uncompressed_bytes()))
    }
}

#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    pub fn generate<R>(rng: &mut R) -> Self
    where
        R: RngCore + CryptoRng,
    {
        Self(SigningKey::random(rng))
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, SigningError> {
        SigningKey::from_slice(slice)
            .map(Self)
            .map_err(|_| SigningError::InvalidPrivateKey)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key())
    }

    /// Signs `keccak256(message)`; the normal message-signing path.
    pub fn sign(&self, message: &[u8]) -> Result<Signature, SigningError> {
        self.sign_prehashed(&keccak256(message))
    }

    /// Signs a caller-supplied 32-byte digest without hashing again;
    /// used for commit seals, whose preimage is already a header hash.
    pub fn sign_prehashed(&self, prehash: &B256) -> Result<Signature, SigningError> {
        let (signature, recovery_id) = self
            .0
            .sign_prehash_recoverable(prehash.as_slice())
            .map_err(|_| SigningError::InvalidSignature)?;

        let mut bytes = [0; Signature::LENGTH];
        bytes[..64].copy_from_slice(signature.to_bytes().as_slice());
        bytes[64] = recovery_id.to_byte();
        Ok(Signature(bytes))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never render key material.
        write!(f, "PrivateKey(..)")
    }
}
