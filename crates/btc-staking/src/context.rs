//! Process-wide secp256k1 state.
//!
//! Taproot tweaking needs a verification context and the parsed NUMS internal
//! key. Both are created once, on first use, and shared read-only afterwards.

use std::sync::OnceLock;

use bitcoin::secp256k1::{Secp256k1, VerifyOnly, XOnlyPublicKey};

use crate::constants::UNSPENDABLE_INTERNAL_KEY;

struct Context {
    secp: Secp256k1<VerifyOnly>,
    internal_key: XOnlyPublicKey,
}

static CONTEXT: OnceLock<Context> = OnceLock::new();

fn context() -> &'static Context {
    CONTEXT.get_or_init(|| Context {
        secp: Secp256k1::verification_only(),
        // The constant is the BIP-341 NUMS point and always lies on the curve.
        internal_key: XOnlyPublicKey::from_slice(&UNSPENDABLE_INTERNAL_KEY)
            .expect("BIP-341 NUMS point is a valid x-only key"),
    })
}

/// Shared verification context used for taproot output key tweaking.
pub fn secp() -> &'static Secp256k1<VerifyOnly> {
    &context().secp
}

/// The unspendable internal key every staking output commits to.
pub fn internal_key() -> XOnlyPublicKey {
    context().internal_key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_key_matches_constant() {
        assert_eq!(internal_key().serialize(), UNSPENDABLE_INTERNAL_KEY);
    }

    #[test]
    fn context_is_initialized_after_first_use() {
        let _ = secp();
        assert!(CONTEXT.get().is_some());
    }

    #[test]
    fn repeated_access_returns_same_context() {
        let a = secp() as *const _;
        let b = secp() as *const _;
        assert_eq!(a, b);
    }
}
