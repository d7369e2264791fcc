//! Covenant committee witness assembly.
//!
//! Both the unbonding and the slashing leaves end in a covenant multisig
//! (`OP_CHECKSIG` / `OP_CHECKSIGADD` over keys sorted ascending). Script
//! execution pops witness items from the top of the stack, so covenant
//! signatures are pushed in descending key order, one element per key, with
//! an empty element standing in for every key that did not sign.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StakingError;

/// A covenant member's signature over a staking-family transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CovenantSignature {
    /// x-only public key of the signing covenant member.
    pub btc_pk_hex: String,
    /// Schnorr signature.
    pub sig_hex: String,
}

/// Prepend covenant signatures to `original_witness`.
///
/// Signatures from keys outside `params_covenant_pks`, with undecodable hex,
/// or repeating an already-seen key are discarded with a warning. At least
/// `covenant_quorum` signatures must be supplied and remain after filtering;
/// only the first `covenant_quorum` valid ones are used.
pub fn create_covenant_witness(
    original_witness: &[Vec<u8>],
    params_covenant_pks: &[Vec<u8>],
    covenant_sigs: &[CovenantSignature],
    covenant_quorum: usize,
) -> Result<Vec<Vec<u8>>, StakingError> {
    if covenant_sigs.len() < covenant_quorum {
        return Err(StakingError::NotEnoughCovenantSignatures {
            required: covenant_quorum,
            got: covenant_sigs.len(),
        });
    }

    let mut valid: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(covenant_sigs.len());
    for sig in covenant_sigs {
        match decode_signature(sig) {
            Some((pk, signature))
                if params_covenant_pks.contains(&pk)
                    && !valid.iter().any(|(seen, _)| *seen == pk) =>
            {
                valid.push((pk, signature));
            }
            _ => warn!(btc_pk = %sig.btc_pk_hex, "discarding covenant signature"),
        }
    }
    if valid.len() < covenant_quorum {
        return Err(StakingError::NotEnoughValidCovenantSignatures {
            required: covenant_quorum,
            got: valid.len(),
        });
    }
    valid.truncate(covenant_quorum);

    let mut covenant_pks: Vec<&Vec<u8>> = params_covenant_pks.iter().collect();
    covenant_pks.sort_unstable_by(|a, b| b.cmp(a));

    let mut witness: Vec<Vec<u8>> = covenant_pks
        .into_iter()
        .map(|pk| {
            valid
                .iter()
                .find(|(signer, _)| signer == pk)
                .map(|(_, signature)| signature.clone())
                .unwrap_or_default()
        })
        .collect();
    witness.extend_from_slice(original_witness);
    Ok(witness)
}

fn decode_signature(sig: &CovenantSignature) -> Option<(Vec<u8>, Vec<u8>)> {
    let pk = hex::decode(&sig.btc_pk_hex).ok()?;
    let signature = hex::decode(&sig.sig_hex).ok()?;
    Some((pk, signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(pk: u8, s: u8) -> CovenantSignature {
        CovenantSignature {
            btc_pk_hex: hex::encode([pk; 32]),
            sig_hex: hex::encode([s; 64]),
        }
    }

    fn covenant_pks() -> Vec<Vec<u8>> {
        vec![vec![0x10; 32], vec![0x30; 32], vec![0x20; 32]]
    }

    #[test]
    fn signatures_are_ordered_by_descending_key() {
        let original = vec![vec![0xaa], vec![0xbb]];
        let witness = create_covenant_witness(
            &original,
            &covenant_pks(),
            &[sig(0x10, 1), sig(0x30, 3), sig(0x20, 2)],
            3,
        )
        .unwrap();
        assert_eq!(
            witness,
            vec![vec![3; 64], vec![2; 64], vec![1; 64], vec![0xaa], vec![0xbb]]
        );
    }

    #[test]
    fn missing_signers_get_empty_placeholders() {
        let witness =
            create_covenant_witness(&[vec![0xaa]], &covenant_pks(), &[sig(0x10, 1), sig(0x30, 3)], 2)
                .unwrap();
        assert_eq!(witness, vec![vec![3; 64], vec![], vec![1; 64], vec![0xaa]]);
    }

    #[test]
    fn only_quorum_signatures_are_used() {
        let witness = create_covenant_witness(
            &[],
            &covenant_pks(),
            &[sig(0x20, 2), sig(0x10, 1), sig(0x30, 3)],
            2,
        )
        .unwrap();
        assert_eq!(witness, vec![vec![], vec![2; 64], vec![1; 64]]);
    }

    #[test]
    fn too_few_signatures() {
        let err = create_covenant_witness(&[], &covenant_pks(), &[sig(0x10, 1)], 2).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Not enough covenant signatures. Required: 2, got: 1"
        );
    }

    #[test]
    fn unknown_and_duplicate_signers_are_discarded() {
        let err = create_covenant_witness(
            &[],
            &covenant_pks(),
            &[sig(0x10, 1), sig(0x10, 9), sig(0x77, 7)],
            2,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StakingError::NotEnoughValidCovenantSignatures { required: 2, got: 1 }
        ));
    }

    #[test]
    fn malformed_hex_is_discarded() {
        let bad = CovenantSignature {
            btc_pk_hex: "zz".into(),
            sig_hex: "00".into(),
        };
        let err =
            create_covenant_witness(&[], &covenant_pks(), &[sig(0x10, 1), bad], 2).unwrap_err();
        assert!(matches!(
            err,
            StakingError::NotEnoughValidCovenantSignatures { got: 1, .. }
        ));
    }

    #[test]
    fn signature_json_uses_camel_case() {
        let json = serde_json::to_value(sig(0x10, 1)).unwrap();
        assert!(json.get("btcPkHex").is_some());
        assert!(json.get("sigHex").is_some());
    }
}
