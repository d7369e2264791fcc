//! PSBT assembly for staking-family transactions.
//!
//! Only input metadata is filled in here (BIP-174 / BIP-371 fields); signing,
//! finalization and broadcast happen elsewhere.

use bitcoin::psbt::{Input, Psbt};
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::taproot::LeafVersion;
use bitcoin::{ScriptBuf, Transaction, TxOut, Txid};
use tracing::debug;

use crate::constants::NO_COORD_PK_BYTE_LENGTH;
use crate::context;
use crate::error::StakingError;
use crate::network::BtcNetwork;
use crate::script_type::ScriptType;
use crate::scripts::StakingScripts;
use crate::taproot::{derive_staking_output_info, derive_unbonding_output_info, TaprootOutputInfo};
use crate::utxo::Utxo;

/// A PSBT ready for signing plus the fee it pays.
#[derive(Debug, Clone)]
pub struct PsbtResult {
    pub psbt: Psbt,
    pub fee: u64,
}

/// PSBT input fields required to sign a spend of one UTXO.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsbtInputFields {
    pub non_witness_utxo: Option<Transaction>,
    pub witness_utxo: Option<TxOut>,
    pub redeem_script: Option<ScriptBuf>,
    pub witness_script: Option<ScriptBuf>,
    pub tap_internal_key: Option<XOnlyPublicKey>,
}

impl PsbtInputFields {
    fn apply(self, input: &mut Input) {
        input.non_witness_utxo = self.non_witness_utxo;
        input.witness_utxo = self.witness_utxo;
        input.redeem_script = self.redeem_script;
        input.witness_script = self.witness_script;
        input.tap_internal_key = self.tap_internal_key;
    }
}

/// Build the PSBT input fields for spending `utxo`.
///
/// Legacy inputs need the full previous transaction, P2SH additionally its
/// redeem script, P2WSH its witness script. A taproot input gets
/// `tap_internal_key` when the staker's x-only key is supplied.
pub fn get_psbt_input_fields(
    utxo: &Utxo,
    staker_pk_no_coord: Option<&[u8]>,
) -> Result<PsbtInputFields, StakingError> {
    let script_type = ScriptType::classify(&utxo.script_pubkey).ok_or_else(|| {
        StakingError::UnsupportedScriptType(hex::encode(&utxo.script_pubkey))
    })?;
    let witness_utxo = || TxOut {
        value: bitcoin::Amount::from_sat(utxo.value),
        script_pubkey: ScriptBuf::from_bytes(utxo.script_pubkey.clone()),
    };

    let fields = match script_type {
        ScriptType::P2pkh => {
            let raw = utxo
                .raw_tx_hex
                .as_deref()
                .ok_or(StakingError::MissingRawTxHex("legacy P2PKH"))?;
            PsbtInputFields {
                non_witness_utxo: Some(decode_raw_tx(raw)?),
                ..Default::default()
            }
        }
        ScriptType::P2sh => {
            let raw = utxo
                .raw_tx_hex
                .as_deref()
                .ok_or(StakingError::MissingRawTxHex("P2SH"))?;
            let redeem_script = utxo
                .redeem_script
                .clone()
                .ok_or(StakingError::MissingRedeemScript)?;
            PsbtInputFields {
                non_witness_utxo: Some(decode_raw_tx(raw)?),
                redeem_script: Some(ScriptBuf::from_bytes(redeem_script)),
                ..Default::default()
            }
        }
        ScriptType::P2wpkh => PsbtInputFields {
            witness_utxo: Some(witness_utxo()),
            ..Default::default()
        },
        ScriptType::P2wsh => {
            let witness_script = utxo
                .witness_script
                .clone()
                .ok_or(StakingError::MissingWitnessScript)?;
            PsbtInputFields {
                witness_utxo: Some(witness_utxo()),
                witness_script: Some(ScriptBuf::from_bytes(witness_script)),
                ..Default::default()
            }
        }
        ScriptType::P2tr => PsbtInputFields {
            witness_utxo: Some(witness_utxo()),
            tap_internal_key: staker_pk_no_coord.map(parse_x_only).transpose()?,
            ..Default::default()
        },
    };
    Ok(fields)
}

/// Wrap an unsigned staking transaction into a PSBT.
///
/// Every input must be backed by one of `utxos`, matched by `(txid, vout)`.
pub fn staking_psbt(
    staking_tx: &Transaction,
    utxos: &[Utxo],
    staker_pk_no_coord: Option<&[u8]>,
) -> Result<Psbt, StakingError> {
    if let Some(pk) = staker_pk_no_coord {
        if pk.len() != NO_COORD_PK_BYTE_LENGTH {
            return Err(StakingError::InvalidPublicKey("Invalid public key".into()));
        }
    }

    let mut psbt = new_psbt(staking_tx.clone())?;
    for (input, psbt_input) in staking_tx.input.iter().zip(psbt.inputs.iter_mut()) {
        let outpoint = input.previous_output;
        let utxo = find_input_utxo(utxos, outpoint.txid, outpoint.vout)?;
        get_psbt_input_fields(utxo, staker_pk_no_coord)?.apply(psbt_input);
    }
    debug!(txid = %staking_tx.compute_txid(), inputs = psbt.inputs.len(), "built staking psbt");
    Ok(psbt)
}

/// Wrap an unbonding transaction into a PSBT spending the staking output
/// through the unbonding leaf.
pub fn unbonding_psbt(
    scripts: &StakingScripts,
    unbonding_tx: &Transaction,
    staking_tx: &Transaction,
    network: BtcNetwork,
) -> Result<Psbt, StakingError> {
    if unbonding_tx.output.len() != 1 {
        return Err(StakingError::TransactionBuildError(
            "unbonding transaction must have exactly one output".into(),
        ));
    }
    let [input] = unbonding_tx.input.as_slice() else {
        return Err(StakingError::TransactionBuildError(
            "unbonding transaction must have exactly one input".into(),
        ));
    };

    let expected = derive_unbonding_output_info(scripts, network)?;
    if unbonding_tx.output[0].script_pubkey != expected.script_pubkey {
        return Err(StakingError::TransactionBuildError(
            "unbonding output script does not match the expected script".into(),
        ));
    }

    let outpoint = input.previous_output;
    if outpoint.txid != staking_tx.compute_txid() {
        return Err(StakingError::InputUtxoNotFound {
            txid: outpoint.txid.to_string(),
            vout: outpoint.vout,
        });
    }
    let spent = staking_tx
        .output
        .get(outpoint.vout as usize)
        .cloned()
        .ok_or_else(|| {
            StakingError::InvalidIndex(format!(
                "staking transaction has no output {}",
                outpoint.vout
            ))
        })?;

    let staking_output = derive_staking_output_info(scripts, network)?;
    withdrawal_psbt(
        unbonding_tx.clone(),
        spent,
        &staking_output,
        &scripts.unbonding_script,
    )
}

/// Wrap a single-input transaction spending a staking-family taproot output
/// through `leaf` into a PSBT.
///
/// The input carries the spent output, the NUMS internal key, the tree's merkle
/// root and the leaf with its control block, which is everything a signer
/// needs to produce and finalize a script-path signature.
pub fn withdrawal_psbt(
    tx: Transaction,
    spent_output: TxOut,
    output_info: &TaprootOutputInfo,
    leaf: &ScriptBuf,
) -> Result<Psbt, StakingError> {
    if tx.input.len() != 1 {
        return Err(StakingError::TransactionBuildError(format!(
            "expected a single input, got {}",
            tx.input.len()
        )));
    }
    let mut psbt = new_psbt(tx)?;
    set_script_path_spend(&mut psbt.inputs[0], spent_output, output_info, leaf)?;
    Ok(psbt)
}

/// Wrap a staking expansion transaction into a PSBT.
///
/// Input 0 spends the previous staking output at `previous_output_index`
/// through the unbonding leaf of `previous_scripts`, which the covenant
/// committee co-signs. Input 1 is the funding UTXO, matched against `utxos`.
pub fn staking_expansion_psbt(
    network: BtcNetwork,
    expansion_tx: &Transaction,
    previous_staking_tx: &Transaction,
    previous_output_index: usize,
    utxos: &[Utxo],
    previous_scripts: &StakingScripts,
    staker_pk_no_coord: Option<&[u8]>,
) -> Result<Psbt, StakingError> {
    if let Some(pk) = staker_pk_no_coord {
        if pk.len() != NO_COORD_PK_BYTE_LENGTH {
            return Err(StakingError::InvalidPublicKey("Invalid public key".into()));
        }
    }
    let previous_output = previous_staking_tx
        .output
        .get(previous_output_index)
        .cloned()
        .ok_or_else(|| StakingError::InvalidIndex("Previous staking output not found".into()))?;
    if !previous_output.script_pubkey.is_p2tr() {
        return Err(StakingError::TransactionBuildError(
            "Previous staking output script type is not P2TR".into(),
        ));
    }
    let [staking_input, funding_input] = expansion_tx.input.as_slice() else {
        return Err(StakingError::TransactionBuildError(
            "Staking expansion transaction must have exactly 2 inputs".into(),
        ));
    };
    if staking_input.previous_output.txid != previous_staking_tx.compute_txid() {
        return Err(StakingError::TransactionBuildError(
            "Previous staking input hash does not match".into(),
        ));
    }
    if staking_input.previous_output.vout as usize != previous_output_index {
        return Err(StakingError::TransactionBuildError(
            "Previous staking input index does not match".into(),
        ));
    }
    let outpoint = funding_input.previous_output;
    let funding_utxo = find_input_utxo(utxos, outpoint.txid, outpoint.vout)?;

    let previous_tree = derive_staking_output_info(previous_scripts, network)?;
    let mut psbt = new_psbt(expansion_tx.clone())?;
    set_script_path_spend(
        &mut psbt.inputs[0],
        previous_output,
        &previous_tree,
        &previous_scripts.unbonding_script,
    )?;
    get_psbt_input_fields(funding_utxo, staker_pk_no_coord)?.apply(&mut psbt.inputs[1]);
    debug!(txid = %expansion_tx.compute_txid(), "built staking expansion psbt");
    Ok(psbt)
}

fn set_script_path_spend(
    input: &mut Input,
    spent_output: TxOut,
    output_info: &TaprootOutputInfo,
    leaf: &ScriptBuf,
) -> Result<(), StakingError> {
    let control_block = output_info.control_block(leaf)?;
    input.witness_utxo = Some(spent_output);
    input.tap_internal_key = Some(context::internal_key());
    input.tap_merkle_root = output_info.spend_info.merkle_root();
    input
        .tap_scripts
        .insert(control_block, (leaf.clone(), LeafVersion::TapScript));
    Ok(())
}

fn new_psbt(tx: Transaction) -> Result<Psbt, StakingError> {
    Psbt::from_unsigned_tx(tx)
        .map_err(|e| StakingError::TransactionBuildError(format!("PSBT creation failed: {e}")))
}

fn find_input_utxo(utxos: &[Utxo], txid: Txid, vout: u32) -> Result<&Utxo, StakingError> {
    utxos
        .iter()
        .find(|u| u.vout == vout && u.txid.parse::<Txid>().ok() == Some(txid))
        .ok_or_else(|| StakingError::InputUtxoNotFound {
            txid: txid.to_string(),
            vout,
        })
}

fn decode_raw_tx(raw_tx_hex: &str) -> Result<Transaction, StakingError> {
    let bytes = hex::decode(raw_tx_hex)
        .map_err(|e| StakingError::TransactionBuildError(format!("invalid rawTxHex: {e}")))?;
    bitcoin::consensus::deserialize(&bytes)
        .map_err(|e| StakingError::TransactionBuildError(format!("invalid rawTxHex: {e}")))
}

fn parse_x_only(pk: &[u8]) -> Result<XOnlyPublicKey, StakingError> {
    XOnlyPublicKey::from_slice(pk)
        .map_err(|e| StakingError::InvalidPublicKey(format!("not a valid x-only key: {e}")))
}
