//! Domain types for the Obsidian QBFT consensus engine.
//!
//! Everything the wire protocol fixes lives here: validator addresses
//! and their secp256k1 derivation, views, the four consensus message
//! kinds with their canonical RLP encodings, block proposals, and the
//! QBFT header extra-data.

mod address;
pub mod extra;
mod genesis;
pub mod message;
mod proposal;
pub mod signing;
mod validator;
mod view;

pub mod utils;

pub use address::Address;
pub use genesis::Genesis;
pub use proposal::Proposal;
pub use signing::secp256k1::{PrivateKey, PublicKey, Signature};
pub use validator::{ProposerPolicy, SortMode, Validator, ValidatorSet};
pub use view::View;

/// 32-byte block / proposal digest.
pub type Digest = alloy_primitives::B256;
