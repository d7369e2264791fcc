//! Transaction size and fee estimation.
//!
//! Sizes are conservative virtual-byte estimates per input script type, so the
//! fee computed here never undershoots the final signed transaction.

use bitcoin::script::Instruction;
use bitcoin::{Script, TxOut};

use crate::constants::NO_COORD_PK_BYTE_LENGTH;
use crate::error::StakingError;
use crate::script_type::ScriptType;
use crate::utxo::Utxo;

/// Estimated vsize of a P2WPKH input.
pub const P2WPKH_INPUT_SIZE: u64 = 68;

/// Estimated vsize of a P2TR key-path input.
pub const P2TR_INPUT_SIZE: u64 = 58;

/// Estimated vsize of any other input; sized for the largest legacy P2PKH spend.
pub const DEFAULT_INPUT_SIZE: u64 = 180;

/// Upper bound on the size of a non-legacy output (P2TR is the largest).
pub const MAX_NON_LEGACY_OUTPUT_SIZE: u64 = 43;

/// Version, locktime, segwit marker/flag and input/output counts.
pub const TX_BUFFER_SIZE_OVERHEAD: u64 = 11;

/// Extra bytes for a script-path withdrawal witness (leaf + control block).
pub const WITHDRAW_TX_BUFFER_SIZE: u64 = 17;

/// Value field of an OP_RETURN output.
pub const OP_RETURN_OUTPUT_VALUE_SIZE: u64 = 8;

/// Script length prefix of an OP_RETURN output.
pub const OP_RETURN_VALUE_SERIALIZE_SIZE: u64 = 1;

/// Fee rates at or below this threshold get an accuracy buffer added.
pub const WALLET_RELAY_FEE_RATE_THRESHOLD: u64 = 2;

/// Buffer (in sats) covering rounding errors at very low fee rates.
pub const LOW_RATE_ESTIMATION_ACCURACY_BUFFER: u64 = 30;

/// Estimated vsize contributed by spending an output of the given script.
///
/// Returns `None` for scripts that cannot be classified.
pub fn input_size_by_script(script_pubkey: &[u8]) -> Option<u64> {
    ScriptType::classify(script_pubkey).map(|ty| match ty {
        ScriptType::P2wpkh => P2WPKH_INPUT_SIZE,
        ScriptType::P2tr => P2TR_INPUT_SIZE,
        ScriptType::P2pkh | ScriptType::P2sh | ScriptType::P2wsh => DEFAULT_INPUT_SIZE,
    })
}

/// Estimated vsize of a single output.
pub fn output_size(script_pubkey: &Script) -> u64 {
    if script_pubkey.is_op_return() {
        script_pubkey.len() as u64 + OP_RETURN_OUTPUT_VALUE_SIZE + OP_RETURN_VALUE_SERIALIZE_SIZE
    } else {
        MAX_NON_LEGACY_OUTPUT_SIZE
    }
}

/// Size of the change output appended when leftover value exceeds dust.
pub fn estimated_change_output_size() -> u64 {
    MAX_NON_LEGACY_OUTPUT_SIZE
}

/// Estimate the vsize of a transaction spending `inputs` into `outputs`.
///
/// Inputs whose script cannot be classified contribute nothing.
pub fn estimate_size(inputs: &[&Utxo], outputs: &[TxOut]) -> u64 {
    let input_size: u64 = inputs
        .iter()
        .filter_map(|utxo| input_size_by_script(&utxo.script_pubkey))
        .sum();
    let output_size: u64 = outputs.iter().map(|o| output_size(&o.script_pubkey)).sum();
    input_size + output_size + TX_BUFFER_SIZE_OVERHEAD
}

/// Flat buffer added to estimates made at very low fee rates.
pub fn rate_based_tx_buffer_fee(fee_rate: u64) -> u64 {
    if fee_rate <= WALLET_RELAY_FEE_RATE_THRESHOLD {
        LOW_RATE_ESTIMATION_ACCURACY_BUFFER
    } else {
        0
    }
}

/// `vsize * fee_rate`, failing instead of overflowing.
pub fn size_fee(vsize: u64, fee_rate: u64) -> Result<u64, StakingError> {
    vsize.checked_mul(fee_rate).ok_or_else(|| {
        StakingError::InvalidFeeOrRate(format!(
            "fee for {vsize} vbytes at {fee_rate} sat/vbyte overflows"
        ))
    })
}

/// Fee of a transaction of `vsize` vbytes, including the low-rate buffer.
pub fn tx_fee(vsize: u64, fee_rate: u64) -> Result<u64, StakingError> {
    size_fee(vsize, fee_rate)?
        .checked_add(rate_based_tx_buffer_fee(fee_rate))
        .ok_or_else(|| {
            StakingError::InvalidFeeOrRate(format!("fee at {fee_rate} sat/vbyte overflows"))
        })
}

/// Fee of a one-input, one-output script-path withdrawal at `fee_rate` sat/vbyte.
pub fn withdraw_tx_fee(fee_rate: u64) -> Result<u64, StakingError> {
    let size = P2TR_INPUT_SIZE
        + estimated_change_output_size()
        + TX_BUFFER_SIZE_OVERHEAD
        + WITHDRAW_TX_BUFFER_SIZE;
    tx_fee(size, fee_rate)
}

/// Estimated vsize of an input spending a taproot output through `leaf`,
/// assuming every key in the leaf contributes a signature.
///
/// Outpoint, empty scriptSig and sequence are 41 bytes; the witness holds one
/// 64-byte signature per key, the leaf script and the control block.
pub fn script_path_input_size(leaf: &Script, control_block_len: usize) -> u64 {
    let keys = leaf
        .instructions()
        .filter(|i| {
            matches!(i, Ok(Instruction::PushBytes(b)) if b.len() == NO_COORD_PK_BYTE_LENGTH)
        })
        .count() as u64;
    let item_count = keys + 2;
    let witness = compact_size_len(item_count)
        + keys * (1 + 64)
        + compact_size_len(leaf.len() as u64)
        + leaf.len() as u64
        + compact_size_len(control_block_len as u64)
        + control_block_len as u64;
    (41 * 4 + witness).div_ceil(4)
}

fn compact_size_len(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
