use bitcoin::TxOut;
use tracing::debug;

use crate::constants::BTC_DUST_SAT;
use crate::error::StakingError;
use crate::fee::{estimate_size, estimated_change_output_size, size_fee, tx_fee};
use crate::script_type::ScriptType;

/// A single unspent transaction output (UTXO) supplied by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    /// Transaction ID as a hex string (big-endian / display order).
    pub txid: String,
    /// Output index within the transaction.
    pub vout: u32,
    /// Value in satoshis.
    pub value: u64,
    /// The locking script (scriptPubKey) serialized bytes.
    pub script_pubkey: Vec<u8>,
    /// Full previous transaction, required for legacy (non-witness) inputs.
    pub raw_tx_hex: Option<String>,
    /// Redeem script for P2SH inputs.
    pub redeem_script: Option<Vec<u8>>,
    /// Witness script for P2WSH inputs.
    pub witness_script: Option<Vec<u8>>,
}

/// Result of UTXO selection: the chosen UTXOs and the fee they imply.
#[derive(Debug, Clone)]
pub struct UtxoSelection {
    /// The selected UTXOs, largest first.
    pub selected: Vec<Utxo>,
    /// Total value of the selected UTXOs in satoshis.
    pub total_sat: u64,
    /// Estimated fee, including the change output when one will be added.
    pub fee: u64,
}

/// Sum of the values of `utxos`.
pub fn input_value_sum(utxos: &[Utxo]) -> u64 {
    utxos.iter().map(|u| u.value).sum()
}

/// Select inputs covering `amount_sat` plus the fee of a transaction paying `outputs`.
///
/// UTXOs whose script cannot be classified are skipped. The rest are taken
/// largest first; after each addition the fee is re-estimated from the
/// selected inputs and the outputs, plus one change output whenever the
/// leftover would exceed the dust threshold.
pub fn select_staking_inputs(
    utxos: &[Utxo],
    amount_sat: u64,
    fee_rate_sat_vbyte: u64,
    outputs: &[TxOut],
) -> Result<UtxoSelection, StakingError> {
    if utxos.is_empty() {
        return Err(StakingError::InsufficientFunds("no UTXOs available".into()));
    }

    let mut usable: Vec<&Utxo> = utxos
        .iter()
        .filter(|u| {
            let known = ScriptType::classify(&u.script_pubkey).is_some();
            if !known {
                debug!(txid = %u.txid, vout = u.vout, "skipping UTXO with unrecognised script");
            }
            known
        })
        .collect();
    if usable.is_empty() {
        return Err(StakingError::InsufficientFunds(
            "no valid UTXOs available for staking".into(),
        ));
    }

    // Largest first; ties broken by outpoint so the result is order independent.
    usable.sort_by(|a, b| {
        b.value
            .cmp(&a.value)
            .then_with(|| a.txid.cmp(&b.txid))
            .then_with(|| a.vout.cmp(&b.vout))
    });

    let mut selected: Vec<&Utxo> = Vec::new();
    let mut total_sat: u64 = 0;
    let mut fee: u64 = 0;

    for utxo in usable {
        selected.push(utxo);
        total_sat = total_sat.checked_add(utxo.value).ok_or_else(|| {
            StakingError::InvalidInput("total value of the selected UTXOs overflows".into())
        })?;

        fee = tx_fee(estimate_size(&selected, outputs), fee_rate_sat_vbyte)?;
        if total_sat.saturating_sub(required_sat(amount_sat, fee)?) > BTC_DUST_SAT {
            fee = add_fee(fee, size_fee(estimated_change_output_size(), fee_rate_sat_vbyte)?)?;
        }
        if total_sat >= required_sat(amount_sat, fee)? {
            debug!(inputs = selected.len(), total_sat, fee, "selected staking inputs");
            return Ok(UtxoSelection {
                selected: selected.into_iter().cloned().collect(),
                total_sat,
                fee,
            });
        }
    }

    Err(StakingError::InsufficientFunds(format!(
        "unable to gather enough UTXOs: have {} sat, need {} sat (amount {} + fee {})",
        total_sat,
        required_sat(amount_sat, fee)?,
        amount_sat,
        fee,
    )))
}

/// Result of picking the single UTXO that funds a staking expansion.
#[derive(Debug, Clone)]
pub struct FundingSelection {
    pub utxo: Utxo,
    /// Estimated fee, including the change output when one will be added.
    pub fee: u64,
}

/// Pick the smallest single UTXO that pays the fee of an expansion
/// transaction spending a previous staking output into `outputs`.
///
/// The previous staking output funds the staked amount, so the UTXO only has
/// to cover the fee. `previous_input_size` is the vsize of spending that
/// previous output.
pub fn select_expansion_funding_utxo(
    utxos: &[Utxo],
    fee_rate_sat_vbyte: u64,
    previous_input_size: u64,
    outputs: &[TxOut],
) -> Result<FundingSelection, StakingError> {
    let mut usable: Vec<&Utxo> = utxos
        .iter()
        .filter(|u| ScriptType::classify(&u.script_pubkey).is_some())
        .collect();
    usable.sort_by(|a, b| {
        a.value
            .cmp(&b.value)
            .then_with(|| a.txid.cmp(&b.txid))
            .then_with(|| a.vout.cmp(&b.vout))
    });

    for utxo in usable {
        let size = previous_input_size + estimate_size(&[utxo], outputs);
        let mut fee = tx_fee(size, fee_rate_sat_vbyte)?;
        if utxo.value.saturating_sub(fee) > BTC_DUST_SAT {
            fee = add_fee(fee, size_fee(estimated_change_output_size(), fee_rate_sat_vbyte)?)?;
        }
        if utxo.value >= fee {
            debug!(txid = %utxo.txid, vout = utxo.vout, fee, "selected expansion funding UTXO");
            return Ok(FundingSelection {
                utxo: utxo.clone(),
                fee,
            });
        }
    }

    Err(StakingError::InsufficientFunds(
        "no single UTXO covers the staking expansion fee".into(),
    ))
}

fn add_fee(fee: u64, extra: u64) -> Result<u64, StakingError> {
    fee.checked_add(extra)
        .ok_or_else(|| StakingError::InvalidFeeOrRate("estimated fee overflows".into()))
}

fn required_sat(amount_sat: u64, fee: u64) -> Result<u64, StakingError> {
    amount_sat.checked_add(fee).ok_or_else(|| {
        StakingError::InsufficientFunds(format!(
            "amount {amount_sat} plus fee {fee} exceeds any spendable value"
        ))
    })
}
