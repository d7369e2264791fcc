//! Bitcoin covenant-staking transaction engine.
//!
//! Builds the taproot script trees of a staking delegation and every
//! transaction of its lifecycle: staking, unbonding, slashing and withdrawal.
//! Inputs are selected from caller-supplied UTXOs, PSBT input metadata is
//! filled per script type, and covenant committee signatures are assembled
//! into script-path witnesses. Nothing here signs, broadcasts or touches the
//! network.

pub mod address;
pub mod constants;
pub mod context;
pub mod error;
pub mod fee;
pub mod network;
pub mod params;
pub mod psbt;
pub mod script_type;
pub mod scripts;
pub mod staking;
pub mod taproot;
pub mod transaction;
pub mod utxo;
pub mod witness;

pub use error::StakingError;
pub use network::BtcNetwork;
pub use params::{SlashingParams, StakingParams};
pub use scripts::{StakingScriptData, StakingScripts};
pub use staking::{PreviousStaking, StakerInfo, Staking, StakingInputs};
pub use utxo::Utxo;
