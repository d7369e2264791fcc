use thiserror::Error;

/// Staking construction errors.
///
/// Every failure is a synchronous validation failure surfaced to the caller;
/// nothing is retried or recovered inside the crate.
#[derive(Debug, Error)]
pub enum StakingError {
    #[error("invalid script data: {0}")]
    InvalidScriptData(String),

    #[error("missing required value: {0}")]
    MissingRequiredValue(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("invalid fee or fee rate: {0}")]
    InvalidFeeOrRate(String),

    #[error("slashing rate must be between 0 and 1, got {0}")]
    InvalidSlashingRate(f64),

    #[error("dust limit violation: {0}")]
    DustLimitViolation(String),

    #[error("not enough funds to cover the fee: {0}")]
    NotEnoughFundsForFee(String),

    #[error("invalid output index: {0}")]
    InvalidIndex(String),

    #[error("invalid lock height {0}: must be a block height below 500000000")]
    InvalidLockHeight(u32),

    #[error("Unsupported script type: {0}")]
    UnsupportedScriptType(String),

    #[error("Missing rawTxHex for {0} input")]
    MissingRawTxHex(&'static str),

    #[error("Missing redeemScript for P2SH input")]
    MissingRedeemScript,

    #[error("Missing witnessScript for P2WSH input")]
    MissingWitnessScript,

    #[error("input UTXO not found for {txid}:{vout}")]
    InputUtxoNotFound { txid: String, vout: u32 },

    #[error("Not enough covenant signatures. Required: {required}, got: {got}")]
    NotEnoughCovenantSignatures { required: usize, got: usize },

    #[error("Not enough valid covenant signatures. Required: {required}, got: {got}")]
    NotEnoughValidCovenantSignatures { required: usize, got: usize },

    #[error("matching output not found: {0}")]
    MatchingOutputNotFound(String),

    #[error("invalid staking params: {0}")]
    InvalidParams(String),

    #[error("invalid staking input: {0}")]
    InvalidInput(String),

    #[error("transaction build error: {0}")]
    TransactionBuildError(String),
}
