//! Staking parameters published by the staking protocol, and the checks that
//! gate every transaction built against them.

use serde::{Deserialize, Serialize};

use crate::address::is_valid_no_coord_pk;
use crate::constants::{BTC_DUST_SAT, MAX_TIMELOCK};
use crate::error::StakingError;
use crate::utxo::Utxo;

/// Parameters governing slashing of a delegation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlashingParams {
    /// scriptPubKey receiving the slashed portion, hex encoded.
    pub slashing_pk_script_hex: String,
    /// Fraction of the stake burned, strictly between 0 and 1.
    pub slashing_rate: f64,
    pub min_slashing_tx_fee_sat: u64,
}

/// A version of the staking protocol parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingParams {
    /// Covenant committee x-only public keys, hex encoded.
    pub covenant_no_coord_pks: Vec<String>,
    pub covenant_quorum: u32,
    /// Relative timelock of the unbonding output, in blocks.
    pub unbonding_time: u32,
    pub unbonding_fee_sat: u64,
    pub max_staking_amount_sat: u64,
    pub min_staking_amount_sat: u64,
    pub max_staking_time_blocks: u32,
    pub min_staking_time_blocks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slashing: Option<SlashingParams>,
    #[serde(default)]
    pub btc_activation_height: u32,
}

impl StakingParams {
    /// Parse and validate parameters from JSON.
    pub fn from_json(json: &str) -> Result<Self, StakingError> {
        let params: Self = serde_json::from_str(json)
            .map_err(|e| StakingError::InvalidParams(format!("failed to parse params: {e}")))?;
        validate_params(&params)?;
        Ok(params)
    }

    /// Covenant keys decoded to raw bytes.
    pub fn covenant_pks(&self) -> Result<Vec<Vec<u8>>, StakingError> {
        self.covenant_no_coord_pks
            .iter()
            .map(|pk| {
                hex::decode(pk).map_err(|e| {
                    StakingError::InvalidParams(format!("invalid covenant public key {pk}: {e}"))
                })
            })
            .collect()
    }
}

/// Check a parameter set for internal consistency.
pub fn validate_params(params: &StakingParams) -> Result<(), StakingError> {
    if params.covenant_no_coord_pks.is_empty() {
        return Err(invalid("Could not find any covenant public keys"));
    }
    if params.covenant_quorum == 0 {
        return Err(invalid("Covenant quorum must be greater than 0"));
    }
    if params.covenant_no_coord_pks.len() < params.covenant_quorum as usize {
        return Err(invalid(
            "Covenant public keys must be greater than or equal to the quorum",
        ));
    }
    if !params
        .covenant_no_coord_pks
        .iter()
        .all(|pk| is_valid_no_coord_pk(pk))
    {
        return Err(invalid("Covenant public key should contains no coordinate"));
    }
    let mut unique = params.covenant_no_coord_pks.clone();
    unique.sort();
    unique.dedup();
    if unique.len() != params.covenant_no_coord_pks.len() {
        return Err(invalid("Covenant public keys must be unique"));
    }

    if params.unbonding_time == 0 || params.unbonding_time > u32::from(MAX_TIMELOCK) {
        return Err(invalid("Unbonding time must be between 1 and 65535"));
    }
    if params.unbonding_fee_sat == 0 {
        return Err(invalid("Unbonding fee must be greater than 0"));
    }

    if params.max_staking_amount_sat < params.min_staking_amount_sat {
        return Err(invalid(
            "Max staking amount must be greater or equal to min staking amount",
        ));
    }
    let min_unbondable = params
        .unbonding_fee_sat
        .checked_add(BTC_DUST_SAT)
        .ok_or_else(|| invalid("Unbonding fee is too large"))?;
    if params.min_staking_amount_sat < min_unbondable {
        return Err(invalid(
            "Min staking amount must be greater than unbonding fee plus dust",
        ));
    }

    if params.min_staking_time_blocks == 0 {
        return Err(invalid("Min staking time must be greater than 0"));
    }
    if params.max_staking_time_blocks < params.min_staking_time_blocks {
        return Err(invalid(
            "Max staking time must be greater or equal to min staking time",
        ));
    }
    if params.max_staking_time_blocks > u32::from(MAX_TIMELOCK) {
        return Err(invalid("Max staking time must not exceed 65535 blocks"));
    }

    if let Some(slashing) = &params.slashing {
        if !(slashing.slashing_rate > 0.0 && slashing.slashing_rate < 1.0) {
            return Err(invalid(
                "Slashing rate must be greater than 0 and less than 1",
            ));
        }
        if slashing.min_slashing_tx_fee_sat == 0 {
            return Err(invalid("Min slashing transaction fee must be greater than 0"));
        }
        if slashing.slashing_pk_script_hex.is_empty()
            || hex::decode(&slashing.slashing_pk_script_hex).is_err()
        {
            return Err(invalid("Slashing public key script is invalid"));
        }
    }
    Ok(())
}

/// Check that `staking_timelock` lies inside the allowed staking time range.
pub fn validate_staking_timelock(
    staking_timelock: u32,
    params: &StakingParams,
) -> Result<(), StakingError> {
    if staking_timelock < params.min_staking_time_blocks
        || staking_timelock > params.max_staking_time_blocks
    {
        return Err(StakingError::InvalidInput(
            "Staking transaction timelock is out of range".into(),
        ));
    }
    Ok(())
}

/// Check the caller-supplied inputs of a staking transaction.
pub fn validate_staking_tx_input_data(
    staking_amount_sat: u64,
    staking_timelock: u32,
    params: &StakingParams,
    input_utxos: &[Utxo],
    fee_rate: u64,
) -> Result<(), StakingError> {
    if staking_amount_sat < params.min_staking_amount_sat
        || staking_amount_sat > params.max_staking_amount_sat
    {
        return Err(StakingError::InvalidInput("Invalid staking amount".into()));
    }
    if staking_timelock < params.min_staking_time_blocks
        || staking_timelock > params.max_staking_time_blocks
    {
        return Err(StakingError::InvalidInput("Invalid timelock".into()));
    }
    if input_utxos.is_empty() {
        return Err(StakingError::InvalidInput("No input UTXOs provided".into()));
    }
    if fee_rate == 0 {
        return Err(StakingError::InvalidInput("Invalid fee rate".into()));
    }
    Ok(())
}

/// Check that enough of the previous covenant committee remains in the new
/// parameters to co-sign the spend of the previous staking output.
pub fn validate_staking_expansion_covenant_quorum(
    previous: &StakingParams,
    current: &StakingParams,
) -> Result<(), StakingError> {
    if previous.covenant_no_coord_pks.is_empty() || current.covenant_no_coord_pks.is_empty() {
        return Err(invalid("Covenant members cannot be empty"));
    }
    let remaining = previous
        .covenant_no_coord_pks
        .iter()
        .filter(|pk| {
            current
                .covenant_no_coord_pks
                .iter()
                .any(|c| c.eq_ignore_ascii_case(pk))
        })
        .count();
    let required = previous.covenant_quorum as usize;
    if remaining < required {
        return Err(StakingError::InvalidInput(format!(
            "Staking expansion failed: insufficient covenant quorum. Required: {required}, \
             Available: {remaining}. Too many covenant members were removed."
        )));
    }
    Ok(())
}

/// The parameter version active at `btc_height`: the one with the highest
/// activation height not above it.
pub fn params_for_btc_height(
    params: &[StakingParams],
    btc_height: u32,
) -> Result<&StakingParams, StakingError> {
    params
        .iter()
        .filter(|p| p.btc_activation_height <= btc_height)
        .max_by_key(|p| p.btc_activation_height)
        .ok_or_else(|| {
            StakingError::InvalidParams(format!("no staking params for BTC height {btc_height}"))
        })
}

fn invalid(msg: &str) -> StakingError {
    StakingError::InvalidParams(msg.to_string())
}
