use std::collections::BTreeMap;

use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Uncompressed SEC1 public key length, including the 0x04 prefix.
const PUBLIC_KEY_LENGTH: usize = 65;

/// A priority transactor's privileges, keyed by its public key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityTransactor {
    pub is_gas_price_waiver: bool,
    pub entity_name: String,
}

/// Public-key (hex) to transactor privileges. Entries come from an
/// on-chain contract read and are treated as untrusted data: anything
/// malformed is skipped, never fatal, because a recoverable read must
/// not be able to halt the chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorityTransactorMap(BTreeMap<String, PriorityTransactor>);

impl PriorityTransactorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, public_key_hex: &str) -> Option<&PriorityTransactor> {
        self.0.get(&normalize_key(public_key_hex))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PriorityTransactor)> {
        self.0.iter()
    }

    /// Inserts an entry if the key is a well-formed secp256k1 public
    /// key; malformed entries are dropped with a warning.
    pub fn insert(&mut self, public_key_hex: &str, transactor: PriorityTransactor) -> bool {
        let key = normalize_key(public_key_hex);
        if !is_valid_public_key(&key) {
            warn!(
                name = %transactor.entity_name,
                "skipping priority transactor with invalid public key"
            );
            return false;
        }
        self.0.insert(key, transactor);
        true
    }

    /// Drops every entry whose key is not a well-formed secp256k1
    /// public key. Applied after loading persisted or contract-sourced
    /// data.
    pub fn sanitize(&mut self) {
        self.0.retain(|key, transactor| {
            let valid = is_valid_public_key(key);
            if !valid {
                warn!(
                    name = %transactor.entity_name,
                    "dropping priority transactor with invalid public key"
                );
            }
            valid
        });
    }
}

fn normalize_key(public_key_hex: &str) -> String {
    public_key_hex
        .strip_prefix("0x")
        .unwrap_or(public_key_hex)
        .to_ascii_lowercase()
}

/// Exactly 65 bytes, not all zero, and on the secp256k1 curve.
fn is_valid_public_key(key_hex: &str) -> bool {
    let Ok(bytes) = hex::decode(key_hex) else {
        return false;
    };
    if bytes.len() != PUBLIC_KEY_LENGTH {
        return false;
    }
    if bytes.iter().all(|b| *b == 0) {
        return false;
    }
    k256::PublicKey::from_sec1_bytes(&bytes).is_ok()
}

/// Per-height snapshot of chain state consensus needs outside the
/// header: today, the priority-transactor privileges in force.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub number: u64,
    pub priority_transactors: PriorityTransactorMap,
}

impl BlockSnapshot {
    pub fn new(number: u64, priority_transactors: PriorityTransactorMap) -> Self {
        Self {
            number,
            priority_transactors,
        }
    }
}

/// Circulating-supply checkpoint at a block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emission {
    pub number: u64,
    pub hash: B256,
    pub circulating_supply: U256,
}

impl Emission {
    pub fn new(number: u64, hash: B256, circulating_supply: U256) -> Self {
        Self {
            number,
            hash,
            circulating_supply,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn valid_key_hex() -> String {
        let mut rng = StdRng::seed_from_u64(1);
        let key = obsidian_qbft_types::PrivateKey::generate(&mut rng);
        hex::encode(key.public_key().to_uncompressed_bytes())
    }

    #[test]
    fn valid_keys_are_accepted() {
        let mut map = PriorityTransactorMap::new();
        assert!(map.insert(
            &valid_key_hex(),
            PriorityTransactor {
                is_gas_price_waiver: true,
                entity_name: "exchange".into(),
            }
        ));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn malformed_keys_are_skipped_not_fatal() {
        let mut map = PriorityTransactorMap::new();

        // Wrong length.
        assert!(!map.insert("0xdeadbeef", PriorityTransactor::default()));
        // All zero.
        assert!(!map.insert(&"00".repeat(65), PriorityTransactor::default()));
        // Not on the curve.
        assert!(!map.insert(&format!("04{}", "11".repeat(64)), PriorityTransactor::default()));
        // Not hex at all.
        assert!(!map.insert("zz", PriorityTransactor::default()));

        assert!(map.is_empty());
    }

    #[test]
    fn sanitize_purges_persisted_garbage() {
        let valid = valid_key_hex();
        let json = format!(
            r#"{{"{valid}":{{"is_gas_price_waiver":false,"entity_name":"ok"}},"junk":{{"is_gas_price_waiver":true,"entity_name":"bad"}}}}"#
        );
        let mut map: PriorityTransactorMap = serde_json::from_str(&json).unwrap();
        assert_eq!(map.len(), 2);

        map.sanitize();
        assert_eq!(map.len(), 1);
        assert!(map.get(&valid).is_some());
    }

    #[test]
    fn lookup_normalizes_prefix_and_case() {
        let valid = valid_key_hex();
        let mut map = PriorityTransactorMap::new();
        map.insert(&valid, PriorityTransactor::default());

        assert!(map.get(&format!("0x{}", valid.to_ascii_uppercase())).is_some());
    }
}
