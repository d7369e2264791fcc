use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use tracing::debug;

use crate::address::parse_address;
use crate::constants::{BTC_DUST_SAT, BTC_LOCKTIME_HEIGHT_TIME_CUTOFF, NON_RBF_SEQUENCE};
use crate::error::StakingError;
use crate::fee::{script_path_input_size, withdraw_tx_fee};
use crate::network::BtcNetwork;
use crate::psbt::{withdrawal_psbt, PsbtResult};
use crate::scripts::{decode_timelock, StakingScripts};
use crate::taproot::{
    derive_slashing_output_info, derive_staking_output_info, derive_unbonding_output_info,
    find_matching_tx_output_index, TaprootOutputInfo,
};
use crate::utxo::{select_expansion_funding_utxo, select_staking_inputs, Utxo};

/// An unsigned transaction and the fee it pays.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub transaction: Transaction,
    pub fee: u64,
}

/// An unsigned staking expansion transaction, its fee and the UTXO that pays it.
#[derive(Debug, Clone)]
pub struct StakingExpansionResult {
    pub transaction: Transaction,
    pub fee: u64,
    pub funding_utxo: Utxo,
}

/// Build the outputs every staking transaction starts with: the staking
/// output and, for observable staking, the zero-value OP_RETURN.
pub fn build_staking_transaction_outputs(
    scripts: &StakingScripts,
    network: BtcNetwork,
    amount: u64,
) -> Result<Vec<TxOut>, StakingError> {
    let staking_output = derive_staking_output_info(scripts, network)?;
    let mut outputs = vec![TxOut {
        value: Amount::from_sat(amount),
        script_pubkey: staking_output.script_pubkey,
    }];
    if let Some(data_embed) = &scripts.data_embed_script {
        outputs.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: data_embed.clone(),
        });
    }
    Ok(outputs)
}

/// Build an unsigned staking transaction locking `amount` sats into the
/// staking output.
///
/// Inputs are picked from `utxos` largest first. Leftover value above the
/// dust threshold goes back to `change_address`; anything less is left to the
/// fee. A non-zero `lock_height` becomes the absolute locktime.
pub fn staking_transaction(
    scripts: &StakingScripts,
    amount: u64,
    change_address: &str,
    utxos: &[Utxo],
    network: BtcNetwork,
    fee_rate: u64,
    lock_height: u32,
) -> Result<TransactionResult, StakingError> {
    if amount == 0 {
        return Err(StakingError::InvalidInput(
            "staking amount must be greater than 0".into(),
        ));
    }
    if fee_rate == 0 {
        return Err(StakingError::InvalidFeeOrRate(
            "fee rate must be greater than 0".into(),
        ));
    }
    if lock_height >= BTC_LOCKTIME_HEIGHT_TIME_CUTOFF {
        return Err(StakingError::InvalidLockHeight(lock_height));
    }
    let change_address = parse_address(change_address, network)
        .map_err(|e| StakingError::InvalidAddress(format!("invalid change address: {e}")))?;

    let mut outputs = build_staking_transaction_outputs(scripts, network, amount)?;
    let selection = select_staking_inputs(utxos, amount, fee_rate, &outputs)?;

    let input = selection
        .selected
        .iter()
        .map(|utxo| {
            let txid: Txid = utxo.txid.parse().map_err(|e| {
                StakingError::TransactionBuildError(format!("invalid txid {}: {e}", utxo.txid))
            })?;
            Ok(unsigned_input(OutPoint::new(txid, utxo.vout), NON_RBF_SEQUENCE))
        })
        .collect::<Result<Vec<_>, StakingError>>()?;

    // Selection guarantees total_sat >= amount + fee.
    let change = selection.total_sat - amount - selection.fee;
    if change > BTC_DUST_SAT {
        outputs.push(TxOut {
            value: Amount::from_sat(change),
            script_pubkey: change_address.script_pubkey(),
        });
    }

    let transaction = Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(lock_height),
        input,
        output: outputs,
    };
    debug!(
        txid = %transaction.compute_txid(),
        amount,
        fee = selection.fee,
        change,
        "built staking transaction"
    );
    Ok(TransactionResult {
        transaction,
        fee: selection.fee,
    })
}

/// Build an unsigned staking expansion transaction.
///
/// Input 0 spends the previous staking output, which is re-staked under
/// `scripts`. Input 1 is a single UTXO from `utxos` that pays the fee; its
/// leftover above dust returns to `change_address`. The staked amount must
/// equal the previous staking output's value.
#[allow(clippy::too_many_arguments)]
pub fn staking_expansion_transaction(
    scripts: &StakingScripts,
    amount: u64,
    change_address: &str,
    utxos: &[Utxo],
    network: BtcNetwork,
    fee_rate: u64,
    previous_staking_tx: &Transaction,
    previous_scripts: &StakingScripts,
) -> Result<StakingExpansionResult, StakingError> {
    if amount == 0 {
        return Err(StakingError::InvalidInput(
            "staking amount must be greater than 0".into(),
        ));
    }
    if fee_rate == 0 {
        return Err(StakingError::InvalidFeeOrRate(
            "fee rate must be greater than 0".into(),
        ));
    }
    let change_address = parse_address(change_address, network)
        .map_err(|e| StakingError::InvalidAddress(format!("invalid change address: {e}")))?;

    let previous_output = derive_staking_output_info(previous_scripts, network)?;
    let previous_index = find_matching_tx_output_index(previous_staking_tx, &previous_output.address)?;
    let previous_value = previous_staking_tx.output[previous_index].value.to_sat();
    if previous_value != amount {
        return Err(StakingError::InvalidInput(format!(
            "expansion amount {amount} must equal the previous staking amount {previous_value}"
        )));
    }

    let mut outputs = build_staking_transaction_outputs(scripts, network, amount)?;
    let control_block = previous_output.control_block(&previous_scripts.unbonding_script)?;
    let previous_input_size =
        script_path_input_size(&previous_scripts.unbonding_script, control_block.size());
    let funding = select_expansion_funding_utxo(utxos, fee_rate, previous_input_size, &outputs)?;
    let funding_txid: Txid = funding.utxo.txid.parse().map_err(|e| {
        StakingError::TransactionBuildError(format!("invalid txid {}: {e}", funding.utxo.txid))
    })?;

    // Selection guarantees the funding UTXO covers the fee.
    let change = funding.utxo.value - funding.fee;
    if change > BTC_DUST_SAT {
        outputs.push(TxOut {
            value: Amount::from_sat(change),
            script_pubkey: change_address.script_pubkey(),
        });
    }

    let transaction = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![
            unsigned_input(
                OutPoint::new(previous_staking_tx.compute_txid(), previous_index as u32),
                NON_RBF_SEQUENCE,
            ),
            unsigned_input(OutPoint::new(funding_txid, funding.utxo.vout), NON_RBF_SEQUENCE),
        ],
        output: outputs,
    };
    debug!(
        txid = %transaction.compute_txid(),
        amount,
        fee = funding.fee,
        change,
        "built staking expansion transaction"
    );
    Ok(StakingExpansionResult {
        transaction,
        fee: funding.fee,
        funding_utxo: funding.utxo,
    })
}

/// Build an unsigned unbonding transaction spending the staking output at
/// `output_index` into the unbonding output, minus `unbonding_fee`.
pub fn unbonding_transaction(
    scripts: &StakingScripts,
    staking_tx: &Transaction,
    unbonding_fee: u64,
    network: BtcNetwork,
    output_index: usize,
) -> Result<TransactionResult, StakingError> {
    if unbonding_fee == 0 {
        return Err(StakingError::InvalidFeeOrRate(
            "unbonding fee must be greater than 0".into(),
        ));
    }
    let staking_output = derive_staking_output_info(scripts, network)?;
    let spent = spent_output(staking_tx, output_index, &staking_output)?;

    let value = spent
        .value
        .to_sat()
        .checked_sub(unbonding_fee)
        .filter(|v| *v >= BTC_DUST_SAT)
        .ok_or_else(|| {
            StakingError::DustLimitViolation(
                "output value is less than dust limit for unbonding transaction".into(),
            )
        })?;

    let unbonding_output = derive_unbonding_output_info(scripts, network)?;
    let transaction = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![unsigned_input(
            OutPoint::new(staking_tx.compute_txid(), output_index as u32),
            NON_RBF_SEQUENCE,
        )],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: unbonding_output.script_pubkey,
        }],
    };
    debug!(txid = %transaction.compute_txid(), value, fee = unbonding_fee, "built unbonding transaction");
    Ok(TransactionResult {
        transaction,
        fee: unbonding_fee,
    })
}

/// Slash a staking output that is still inside its staking timelock.
pub fn slash_timelock_unbonded_transaction(
    scripts: &StakingScripts,
    staking_tx: &Transaction,
    slashing_pk_script_hex: &str,
    slashing_rate: f64,
    min_fee: u64,
    network: BtcNetwork,
    output_index: usize,
) -> Result<PsbtResult, StakingError> {
    let staking_output = derive_staking_output_info(scripts, network)?;
    slashing_transaction(
        scripts,
        &staking_output,
        staking_tx,
        slashing_pk_script_hex,
        slashing_rate,
        min_fee,
        network,
        output_index,
    )
}

/// Slash the output of an unbonding transaction before its unbonding time
/// has passed.
pub fn slash_early_unbonded_transaction(
    scripts: &StakingScripts,
    unbonding_tx: &Transaction,
    slashing_pk_script_hex: &str,
    slashing_rate: f64,
    min_fee: u64,
    network: BtcNetwork,
) -> Result<PsbtResult, StakingError> {
    let unbonding_output = derive_unbonding_output_info(scripts, network)?;
    slashing_transaction(
        scripts,
        &unbonding_output,
        unbonding_tx,
        slashing_pk_script_hex,
        slashing_rate,
        min_fee,
        network,
        0,
    )
}

/// Withdraw a staking output after its staking timelock has expired.
pub fn withdraw_timelock_unbonded_transaction(
    scripts: &StakingScripts,
    staking_tx: &Transaction,
    withdrawal_address: &str,
    network: BtcNetwork,
    fee_rate: u64,
    output_index: usize,
) -> Result<PsbtResult, StakingError> {
    let staking_output = derive_staking_output_info(scripts, network)?;
    withdrawal_transaction(
        &scripts.timelock_script,
        &staking_output,
        staking_tx,
        withdrawal_address,
        network,
        fee_rate,
        output_index,
    )
}

/// Withdraw an unbonding output after the unbonding time has passed.
pub fn withdraw_early_unbonded_transaction(
    scripts: &StakingScripts,
    unbonding_tx: &Transaction,
    withdrawal_address: &str,
    network: BtcNetwork,
    fee_rate: u64,
) -> Result<PsbtResult, StakingError> {
    let unbonding_output = derive_unbonding_output_info(scripts, network)?;
    withdrawal_transaction(
        &scripts.unbonding_timelock_script,
        &unbonding_output,
        unbonding_tx,
        withdrawal_address,
        network,
        fee_rate,
        0,
    )
}

/// Withdraw the staker's change output of a slashing transaction once the
/// unbonding time has passed.
pub fn withdraw_slashing_transaction(
    scripts: &StakingScripts,
    slashing_tx: &Transaction,
    withdrawal_address: &str,
    network: BtcNetwork,
    fee_rate: u64,
    output_index: usize,
) -> Result<PsbtResult, StakingError> {
    let slashing_output = derive_slashing_output_info(scripts, network)?;
    withdrawal_transaction(
        &scripts.unbonding_timelock_script,
        &slashing_output,
        slashing_tx,
        withdrawal_address,
        network,
        fee_rate,
        output_index,
    )
}

#[allow(clippy::too_many_arguments)]
fn slashing_transaction(
    scripts: &StakingScripts,
    spent_tree: &TaprootOutputInfo,
    tx: &Transaction,
    slashing_pk_script_hex: &str,
    slashing_rate: f64,
    min_fee: u64,
    network: BtcNetwork,
    output_index: usize,
) -> Result<PsbtResult, StakingError> {
    if !(slashing_rate > 0.0 && slashing_rate < 1.0) {
        return Err(StakingError::InvalidSlashingRate(slashing_rate));
    }
    if min_fee == 0 {
        return Err(StakingError::InvalidFeeOrRate(
            "minimum fee must be greater than 0".into(),
        ));
    }
    let slashing_pk_script = hex::decode(slashing_pk_script_hex)
        .map(ScriptBuf::from_bytes)
        .map_err(|e| StakingError::InvalidInput(format!("invalid slashing pk script: {e}")))?;
    let spent = spent_output(tx, output_index, spent_tree)?;
    let value = spent.value.to_sat();

    // Rates carry two decimal places; burn in whole hundredths.
    let rate_hundredths = (slashing_rate * 100.0).round() as u64;
    let slashing_amount = value
        .checked_mul(rate_hundredths)
        .map(|v| v / 100)
        .ok_or_else(|| {
            StakingError::InvalidInput(format!("output value {value} is too large to slash"))
        })?;
    if slashing_amount <= BTC_DUST_SAT {
        return Err(StakingError::DustLimitViolation(format!(
            "slashing amount {slashing_amount} is not above the dust limit"
        )));
    }
    let deducted = slashing_amount.checked_add(min_fee).ok_or_else(|| {
        StakingError::InvalidFeeOrRate(format!("minimum fee {min_fee} is too large"))
    })?;
    let user_funds = value
        .checked_sub(deducted)
        .filter(|v| *v > BTC_DUST_SAT)
        .ok_or_else(|| {
            StakingError::DustLimitViolation(
                "user funds after slashing and fee are not above the dust limit".into(),
            )
        })?;

    let slashing_output = derive_slashing_output_info(scripts, network)?;
    let transaction = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![unsigned_input(
            OutPoint::new(tx.compute_txid(), output_index as u32),
            NON_RBF_SEQUENCE,
        )],
        output: vec![
            TxOut {
                value: Amount::from_sat(slashing_amount),
                script_pubkey: slashing_pk_script,
            },
            TxOut {
                value: Amount::from_sat(user_funds),
                script_pubkey: slashing_output.script_pubkey,
            },
        ],
    };
    debug!(
        txid = %transaction.compute_txid(),
        slashing_amount,
        user_funds,
        fee = min_fee,
        "built slashing transaction"
    );

    let psbt = withdrawal_psbt(transaction, spent, spent_tree, &scripts.slashing_script)?;
    Ok(PsbtResult { psbt, fee: min_fee })
}

fn withdrawal_transaction(
    timelock_leaf: &ScriptBuf,
    spent_tree: &TaprootOutputInfo,
    tx: &Transaction,
    withdrawal_address: &str,
    network: BtcNetwork,
    fee_rate: u64,
    output_index: usize,
) -> Result<PsbtResult, StakingError> {
    if fee_rate == 0 {
        return Err(StakingError::InvalidFeeOrRate(
            "withdrawal fee rate must be greater than 0".into(),
        ));
    }
    let withdrawal_address = parse_address(withdrawal_address, network)?;
    let spent = spent_output(tx, output_index, spent_tree)?;
    let timelock = decode_timelock(timelock_leaf)?;

    let fee = withdraw_tx_fee(fee_rate)?;
    let value = spent.value.to_sat().checked_sub(fee).ok_or_else(|| {
        StakingError::NotEnoughFundsForFee(format!(
            "output value {} cannot cover withdrawal fee {fee}",
            spent.value.to_sat()
        ))
    })?;
    if value < BTC_DUST_SAT {
        return Err(StakingError::DustLimitViolation(
            "output value is less than dust limit for withdrawal transaction".into(),
        ));
    }

    let transaction = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![unsigned_input(
            OutPoint::new(tx.compute_txid(), output_index as u32),
            Sequence::from_height(timelock),
        )],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: withdrawal_address.script_pubkey(),
        }],
    };
    debug!(txid = %transaction.compute_txid(), value, fee, timelock, "built withdrawal transaction");

    let psbt = withdrawal_psbt(transaction, spent, spent_tree, timelock_leaf)?;
    Ok(PsbtResult { psbt, fee })
}

/// The output of `tx` at `index`, which must pay to `expected`.
fn spent_output(
    tx: &Transaction,
    index: usize,
    expected: &TaprootOutputInfo,
) -> Result<TxOut, StakingError> {
    let output = tx.output.get(index).ok_or_else(|| {
        StakingError::InvalidIndex(format!(
            "output index {index} out of range for {} outputs",
            tx.output.len()
        ))
    })?;
    if output.script_pubkey != expected.script_pubkey {
        return Err(StakingError::MatchingOutputNotFound(format!(
            "output {index} of {} does not pay to {}",
            tx.compute_txid(),
            expected.address
        )));
    }
    Ok(output.clone())
}

fn unsigned_input(previous_output: OutPoint, sequence: Sequence) -> TxIn {
    TxIn {
        previous_output,
        script_sig: ScriptBuf::new(),
        sequence,
        witness: Witness::default(),
    }
}
