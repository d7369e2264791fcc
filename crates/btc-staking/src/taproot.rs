//! Taproot outputs committed to the staking script trees.
//!
//! All trees share the unspendable NUMS internal key, so every spend is a
//! script-path spend. Tree shapes:
//!
//! - staking output: `{slashing, {unbonding, timelock}}`
//! - unbonding output: `{slashing, unbonding_timelock}`
//! - slashing change output: `unbonding_timelock`

use bitcoin::taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo};
use bitcoin::{Address, ScriptBuf, Transaction};

use crate::context;
use crate::error::StakingError;
use crate::network::BtcNetwork;
use crate::scripts::StakingScripts;

/// A taproot output: its script tree spend info plus the derived address.
#[derive(Debug, Clone)]
pub struct TaprootOutputInfo {
    pub spend_info: TaprootSpendInfo,
    pub script_pubkey: ScriptBuf,
    pub address: Address,
}

impl TaprootOutputInfo {
    fn from_leaves(leaves: &[(u8, &ScriptBuf)], network: BtcNetwork) -> Result<Self, StakingError> {
        let mut builder = TaprootBuilder::new();
        for (depth, script) in leaves {
            builder = builder.add_leaf(*depth, (*script).clone()).map_err(|e| {
                StakingError::TransactionBuildError(format!("failed to add tap leaf: {e}"))
            })?;
        }
        let spend_info = builder
            .finalize(context::secp(), context::internal_key())
            .map_err(|_| {
                StakingError::TransactionBuildError("incomplete taproot script tree".into())
            })?;

        let address = Address::p2tr_tweaked(spend_info.output_key(), network.to_bitcoin_network());
        Ok(Self {
            script_pubkey: address.script_pubkey(),
            address,
            spend_info,
        })
    }

    /// Control block proving `leaf` is part of this output's tree.
    pub fn control_block(&self, leaf: &ScriptBuf) -> Result<ControlBlock, StakingError> {
        self.spend_info
            .control_block(&(leaf.clone(), LeafVersion::TapScript))
            .ok_or_else(|| {
                StakingError::TransactionBuildError(
                    "leaf script is not part of the taproot tree".into(),
                )
            })
    }
}

/// The staking output: slashing at depth 1, unbonding and timelock at depth 2.
pub fn derive_staking_output_info(
    scripts: &StakingScripts,
    network: BtcNetwork,
) -> Result<TaprootOutputInfo, StakingError> {
    TaprootOutputInfo::from_leaves(
        &[
            (1, &scripts.slashing_script),
            (2, &scripts.unbonding_script),
            (2, &scripts.timelock_script),
        ],
        network,
    )
}

/// The unbonding output: slashing and unbonding timelock, both at depth 1.
pub fn derive_unbonding_output_info(
    scripts: &StakingScripts,
    network: BtcNetwork,
) -> Result<TaprootOutputInfo, StakingError> {
    TaprootOutputInfo::from_leaves(
        &[
            (1, &scripts.slashing_script),
            (1, &scripts.unbonding_timelock_script),
        ],
        network,
    )
}

/// The change output of a slashing transaction: a single unbonding timelock leaf.
pub fn derive_slashing_output_info(
    scripts: &StakingScripts,
    network: BtcNetwork,
) -> Result<TaprootOutputInfo, StakingError> {
    TaprootOutputInfo::from_leaves(&[(0, &scripts.unbonding_timelock_script)], network)
}

/// Index of the first output of `tx` paying to `address`.
pub fn find_matching_tx_output_index(
    tx: &Transaction,
    address: &Address,
) -> Result<usize, StakingError> {
    let script_pubkey = address.script_pubkey();
    tx.output
        .iter()
        .position(|out| out.script_pubkey == script_pubkey)
        .ok_or_else(|| {
            StakingError::MatchingOutputNotFound(format!(
                "no output of {} pays to {address}",
                tx.compute_txid()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::StakingScriptData;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, TxOut};

    fn scripts() -> StakingScripts {
        StakingScriptData::new(
            &[0x01; 32],
            &[vec![0x02; 32]],
            &[vec![0x10; 32], vec![0x20; 32], vec![0x30; 32]],
            2,
            150,
            101,
        )
        .unwrap()
        .build_scripts()
        .unwrap()
    }

    #[test]
    fn staking_output_is_p2tr_and_deterministic() {
        let s = scripts();
        let a = derive_staking_output_info(&s, BtcNetwork::Mainnet).unwrap();
        let b = derive_staking_output_info(&s, BtcNetwork::Mainnet).unwrap();
        assert!(a.script_pubkey.is_p2tr());
        assert_eq!(a.script_pubkey, b.script_pubkey);
        assert!(a.address.to_string().starts_with("bc1p"));
    }

    #[test]
    fn outputs_use_nums_internal_key() {
        let info = derive_staking_output_info(&scripts(), BtcNetwork::Signet).unwrap();
        assert_eq!(info.spend_info.internal_key(), context::internal_key());
    }

    #[test]
    fn three_trees_produce_distinct_outputs() {
        let s = scripts();
        let staking = derive_staking_output_info(&s, BtcNetwork::Testnet).unwrap();
        let unbonding = derive_unbonding_output_info(&s, BtcNetwork::Testnet).unwrap();
        let slashing = derive_slashing_output_info(&s, BtcNetwork::Testnet).unwrap();
        assert_ne!(staking.script_pubkey, unbonding.script_pubkey);
        assert_ne!(unbonding.script_pubkey, slashing.script_pubkey);
        assert_ne!(staking.script_pubkey, slashing.script_pubkey);
    }

    #[test]
    fn control_blocks_verify_against_output_key() {
        let s = scripts();
        let info = derive_staking_output_info(&s, BtcNetwork::Mainnet).unwrap();
        let output_key = info.spend_info.output_key().to_inner();
        for leaf in [&s.slashing_script, &s.unbonding_script, &s.timelock_script] {
            let cb = info.control_block(leaf).unwrap();
            assert!(cb.verify_taproot_commitment(context::secp(), output_key, leaf));
        }
        // Slashing sits one level above the other two leaves.
        assert_eq!(info.control_block(&s.slashing_script).unwrap().merkle_branch.len(), 1);
        assert_eq!(info.control_block(&s.timelock_script).unwrap().merkle_branch.len(), 2);
    }

    #[test]
    fn unknown_leaf_has_no_control_block() {
        let s = scripts();
        let info = derive_unbonding_output_info(&s, BtcNetwork::Mainnet).unwrap();
        assert!(info.control_block(&s.timelock_script).is_err());
    }

    #[test]
    fn finds_matching_output_index() {
        let info = derive_staking_output_info(&scripts(), BtcNetwork::Mainnet).unwrap();
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![
                TxOut {
                    value: Amount::from_sat(1_000),
                    script_pubkey: ScriptBuf::new_op_return([0u8; 4]),
                },
                TxOut {
                    value: Amount::from_sat(50_000),
                    script_pubkey: info.script_pubkey.clone(),
                },
            ],
        };
        assert_eq!(find_matching_tx_output_index(&tx, &info.address).unwrap(), 1);

        let other = derive_slashing_output_info(&scripts(), BtcNetwork::Mainnet).unwrap();
        assert!(matches!(
            find_matching_tx_output_index(&tx, &other.address),
            Err(StakingError::MatchingOutputNotFound(_))
        ));
    }
}
