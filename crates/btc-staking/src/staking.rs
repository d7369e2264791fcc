//! High-level entry point tying a staker, a finality provider and a parameter
//! version to the transaction builders.

use bitcoin::{Psbt, Transaction};
use serde::{Deserialize, Serialize};

use crate::address::{is_taproot, is_valid_no_coord_pk, validate_address};
use crate::constants::DATA_EMBED_TAG_LENGTH;
use crate::error::StakingError;
use crate::network::BtcNetwork;
use crate::params::{
    params_for_btc_height, validate_params, validate_staking_expansion_covenant_quorum,
    validate_staking_timelock, validate_staking_tx_input_data, SlashingParams, StakingParams,
};
use crate::psbt::{self, PsbtResult};
use crate::scripts::{StakingScriptData, StakingScripts};
use crate::taproot::{
    derive_slashing_output_info, derive_staking_output_info, find_matching_tx_output_index,
};
use crate::transaction::{self, StakingExpansionResult, TransactionResult};
use crate::utxo::Utxo;

/// The staker's funding address and x-only public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakerInfo {
    pub address: String,
    pub public_key_no_coord_hex: String,
}

/// Delegation choices of a single stake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingInputs {
    pub finality_provider_pks_no_coord_hex: Vec<String>,
    pub staking_amount_sat: u64,
    pub staking_timelock: u32,
}

/// The stake an expansion builds on: its transaction and the delegation
/// choices it was created with.
#[derive(Debug, Clone)]
pub struct PreviousStaking {
    pub staking_tx: Transaction,
    pub finality_provider_pks_no_coord_hex: Vec<String>,
    pub staking_timelock: u32,
}

/// A validated delegation: builds every transaction of its lifecycle.
#[derive(Debug, Clone)]
pub struct Staking {
    network: BtcNetwork,
    staker_info: StakerInfo,
    params: StakingParams,
    finality_provider_pks_no_coord_hex: Vec<String>,
    staking_timelock: u32,
    tag: Option<[u8; DATA_EMBED_TAG_LENGTH]>,
}

impl Staking {
    pub fn new(
        network: BtcNetwork,
        staker_info: StakerInfo,
        params: StakingParams,
        finality_provider_pks_no_coord_hex: Vec<String>,
        staking_timelock: u32,
    ) -> Result<Self, StakingError> {
        if !matches!(validate_address(&staker_info.address, network), Ok(true)) {
            return Err(StakingError::InvalidInput(
                "Invalid staker bitcoin address".into(),
            ));
        }
        if !is_valid_no_coord_pk(&staker_info.public_key_no_coord_hex) {
            return Err(StakingError::InvalidInput(
                "Invalid staker public key".into(),
            ));
        }
        if finality_provider_pks_no_coord_hex.is_empty()
            || !finality_provider_pks_no_coord_hex
                .iter()
                .all(|pk| is_valid_no_coord_pk(pk))
        {
            return Err(StakingError::InvalidInput(
                "Invalid finality providers public keys".into(),
            ));
        }
        validate_params(&params)?;
        validate_staking_timelock(staking_timelock, &params)?;

        Ok(Self {
            network,
            staker_info,
            params,
            finality_provider_pks_no_coord_hex,
            staking_timelock,
            tag: None,
        })
    }

    /// Make this an observable delegation: staking transactions carry the
    /// tagged OP_RETURN data-embed output.
    pub fn with_tag(mut self, tag: [u8; DATA_EMBED_TAG_LENGTH]) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn network(&self) -> BtcNetwork {
        self.network
    }

    pub fn staker_info(&self) -> &StakerInfo {
        &self.staker_info
    }

    pub fn params(&self) -> &StakingParams {
        &self.params
    }

    pub fn build_scripts(&self) -> Result<StakingScripts, StakingError> {
        let staker_key = decode_key(&self.staker_info.public_key_no_coord_hex)?;
        let fp_keys = self
            .finality_provider_pks_no_coord_hex
            .iter()
            .map(|pk| decode_key(pk))
            .collect::<Result<Vec<_>, _>>()?;
        let covenant_keys = self.params.covenant_pks()?;

        let mut data = StakingScriptData::new(
            &staker_key,
            &fp_keys,
            &covenant_keys,
            self.params.covenant_quorum,
            self.staking_timelock,
            self.params.unbonding_time,
        )?;
        if let Some(tag) = self.tag {
            data = data.with_tag(tag);
        }
        data.build_scripts()
    }

    /// Unsigned staking transaction paying change back to the staker address.
    pub fn create_staking_transaction(
        &self,
        staking_amount_sat: u64,
        input_utxos: &[Utxo],
        fee_rate: u64,
    ) -> Result<TransactionResult, StakingError> {
        validate_staking_tx_input_data(
            staking_amount_sat,
            self.staking_timelock,
            &self.params,
            input_utxos,
            fee_rate,
        )?;
        let scripts = self.build_scripts()?;
        transaction::staking_transaction(
            &scripts,
            staking_amount_sat,
            &self.staker_info.address,
            input_utxos,
            self.network,
            fee_rate,
            0,
        )
    }

    /// PSBT for a staking transaction previously built for this delegation.
    ///
    /// Taproot stakers get their x-only key as `tap_internal_key` on each input.
    pub fn to_staking_psbt(
        &self,
        staking_tx: &Transaction,
        input_utxos: &[Utxo],
    ) -> Result<Psbt, StakingError> {
        let scripts = self.build_scripts()?;
        let staking_output = derive_staking_output_info(&scripts, self.network)?;
        find_matching_tx_output_index(staking_tx, &staking_output.address)?;

        let staker_pk = self.taproot_staker_pk()?;
        psbt::staking_psbt(staking_tx, input_utxos, staker_pk.as_deref())
    }

    /// Expand `previous` into this delegation, funding the fee from one of
    /// `input_utxos`.
    ///
    /// `params_for_previous` are the parameters the previous stake was created
    /// under; enough of its covenant committee must remain in this
    /// delegation's parameters.
    pub fn create_staking_expansion_transaction(
        &self,
        staking_amount_sat: u64,
        input_utxos: &[Utxo],
        fee_rate: u64,
        params_for_previous: &StakingParams,
        previous: &PreviousStaking,
    ) -> Result<StakingExpansionResult, StakingError> {
        validate_staking_tx_input_data(
            staking_amount_sat,
            self.staking_timelock,
            &self.params,
            input_utxos,
            fee_rate,
        )?;
        validate_staking_expansion_covenant_quorum(params_for_previous, &self.params)?;
        let previous_scripts = self.previous_scripts(params_for_previous, previous)?;
        transaction::staking_expansion_transaction(
            &self.build_scripts()?,
            staking_amount_sat,
            &self.staker_info.address,
            input_utxos,
            self.network,
            fee_rate,
            &previous.staking_tx,
            &previous_scripts,
        )
    }

    /// PSBT for an expansion transaction built by
    /// [`create_staking_expansion_transaction`](Self::create_staking_expansion_transaction).
    pub fn to_staking_expansion_psbt(
        &self,
        expansion_tx: &Transaction,
        input_utxos: &[Utxo],
        params_for_previous: &StakingParams,
        previous: &PreviousStaking,
    ) -> Result<Psbt, StakingError> {
        let previous_scripts = self.previous_scripts(params_for_previous, previous)?;
        let index = self.staking_output_index(&previous_scripts, &previous.staking_tx)?;
        let staker_pk = self.taproot_staker_pk()?;
        psbt::staking_expansion_psbt(
            self.network,
            expansion_tx,
            &previous.staking_tx,
            index,
            input_utxos,
            &previous_scripts,
            staker_pk.as_deref(),
        )
    }

    /// Unbonding transaction paying the parameter-set unbonding fee.
    pub fn create_unbonding_transaction(
        &self,
        staking_tx: &Transaction,
    ) -> Result<TransactionResult, StakingError> {
        let scripts = self.build_scripts()?;
        let index = self.staking_output_index(&scripts, staking_tx)?;
        transaction::unbonding_transaction(
            &scripts,
            staking_tx,
            self.params.unbonding_fee_sat,
            self.network,
            index,
        )
    }

    pub fn to_unbonding_psbt(
        &self,
        unbonding_tx: &Transaction,
        staking_tx: &Transaction,
    ) -> Result<Psbt, StakingError> {
        psbt::unbonding_psbt(&self.build_scripts()?, unbonding_tx, staking_tx, self.network)
    }

    /// Withdraw from an unbonding transaction once the unbonding time passed.
    pub fn create_withdraw_early_unbonded_transaction(
        &self,
        early_unbonded_tx: &Transaction,
        fee_rate: u64,
    ) -> Result<PsbtResult, StakingError> {
        transaction::withdraw_early_unbonded_transaction(
            &self.build_scripts()?,
            early_unbonded_tx,
            &self.staker_info.address,
            self.network,
            fee_rate,
        )
    }

    /// Withdraw a staking output whose staking timelock has expired.
    pub fn create_withdraw_staking_expired_psbt(
        &self,
        staking_tx: &Transaction,
        fee_rate: u64,
    ) -> Result<PsbtResult, StakingError> {
        let scripts = self.build_scripts()?;
        let index = self.staking_output_index(&scripts, staking_tx)?;
        transaction::withdraw_timelock_unbonded_transaction(
            &scripts,
            staking_tx,
            &self.staker_info.address,
            self.network,
            fee_rate,
            index,
        )
    }

    pub fn create_staking_output_slashing_psbt(
        &self,
        staking_tx: &Transaction,
    ) -> Result<PsbtResult, StakingError> {
        let slashing = self.slashing_params()?;
        let scripts = self.build_scripts()?;
        let index = self.staking_output_index(&scripts, staking_tx)?;
        transaction::slash_timelock_unbonded_transaction(
            &scripts,
            staking_tx,
            &slashing.slashing_pk_script_hex,
            slashing.slashing_rate,
            slashing.min_slashing_tx_fee_sat,
            self.network,
            index,
        )
    }

    pub fn create_unbonding_output_slashing_psbt(
        &self,
        unbonding_tx: &Transaction,
    ) -> Result<PsbtResult, StakingError> {
        let slashing = self.slashing_params()?;
        transaction::slash_early_unbonded_transaction(
            &self.build_scripts()?,
            unbonding_tx,
            &slashing.slashing_pk_script_hex,
            slashing.slashing_rate,
            slashing.min_slashing_tx_fee_sat,
            self.network,
        )
    }

    /// Withdraw the staker's change output of a slashing transaction.
    pub fn create_withdraw_slashing_psbt(
        &self,
        slashing_tx: &Transaction,
        fee_rate: u64,
    ) -> Result<PsbtResult, StakingError> {
        let scripts = self.build_scripts()?;
        let slashing_output = derive_slashing_output_info(&scripts, self.network)?;
        let index = find_matching_tx_output_index(slashing_tx, &slashing_output.address)?;
        transaction::withdraw_slashing_transaction(
            &scripts,
            slashing_tx,
            &self.staker_info.address,
            self.network,
            fee_rate,
            index,
        )
    }

    fn staking_output_index(
        &self,
        scripts: &StakingScripts,
        staking_tx: &Transaction,
    ) -> Result<usize, StakingError> {
        let staking_output = derive_staking_output_info(scripts, self.network)?;
        find_matching_tx_output_index(staking_tx, &staking_output.address)
    }

    fn previous_scripts(
        &self,
        params_for_previous: &StakingParams,
        previous: &PreviousStaking,
    ) -> Result<StakingScripts, StakingError> {
        Staking::new(
            self.network,
            self.staker_info.clone(),
            params_for_previous.clone(),
            previous.finality_provider_pks_no_coord_hex.clone(),
            previous.staking_timelock,
        )?
        .build_scripts()
    }

    fn taproot_staker_pk(&self) -> Result<Option<Vec<u8>>, StakingError> {
        if is_taproot(&self.staker_info.address, self.network) {
            decode_key(&self.staker_info.public_key_no_coord_hex).map(Some)
        } else {
            Ok(None)
        }
    }

    fn slashing_params(&self) -> Result<&SlashingParams, StakingError> {
        self.params
            .slashing
            .as_ref()
            .ok_or_else(|| StakingError::InvalidParams("Slashing parameters are missing".into()))
    }
}

/// Fee of the staking transaction `staking_input` would produce under the
/// parameter version active at `btc_tip_height`.
pub fn estimate_btc_staking_fee(
    network: BtcNetwork,
    params_versions: &[StakingParams],
    btc_tip_height: u32,
    staker_info: &StakerInfo,
    staking_input: &StakingInputs,
    input_utxos: &[Utxo],
    fee_rate: u64,
) -> Result<u64, StakingError> {
    if btc_tip_height == 0 {
        return Err(StakingError::InvalidInput("BTC tip height cannot be 0".into()));
    }
    let params = params_for_btc_height(params_versions, btc_tip_height)?;
    let staking = Staking::new(
        network,
        staker_info.clone(),
        params.clone(),
        staking_input.finality_provider_pks_no_coord_hex.clone(),
        staking_input.staking_timelock,
    )?;
    staking
        .create_staking_transaction(staking_input.staking_amount_sat, input_utxos, fee_rate)
        .map(|result| result.fee)
}

fn decode_key(pk_hex: &str) -> Result<Vec<u8>, StakingError> {
    hex::decode(pk_hex).map_err(|e| StakingError::InvalidPublicKey(format!("invalid hex: {e}")))
}
