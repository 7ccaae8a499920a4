use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::{PrivateKey, Validator};

/// Deterministic validator keys for tests and local networks.
pub fn make_validators<const N: usize>() -> [(Validator, PrivateKey); N] {
    let mut rng = StdRng::seed_from_u64(0x42);

    let mut validators = Vec::with_capacity(N);

    for _ in 0..N {
        let sk = PrivateKey::generate(&mut rng);
        let val = Validator::new(sk.address());
        validators.push((val, sk));
    }

    validators
        .try_into()
        .unwrap_or_else(|_| panic!("N validators"))
}
