use bitcoin::address::{Address, AddressType, NetworkUnchecked};
use bitcoin::secp256k1::XOnlyPublicKey;

use crate::constants::NO_COORD_PK_BYTE_LENGTH;
use crate::error::StakingError;
use crate::network::BtcNetwork;

/// Parse an address string and require it to belong to `network`.
///
/// Supports P2PKH, P2SH, P2WPKH, P2WSH, and P2TR address formats.
pub fn parse_address(address: &str, network: BtcNetwork) -> Result<Address, StakingError> {
    address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| StakingError::InvalidAddress(format!("failed to parse address: {e}")))?
        .require_network(network.to_bitcoin_network())
        .map_err(|e| StakingError::InvalidAddress(format!("address wrong network: {e}")))
}

/// Validate a Bitcoin address string for the given network.
///
/// Returns `true` if the address is valid for the specified network,
/// `false` if it is valid but for a different network.
pub fn validate_address(address: &str, network: BtcNetwork) -> Result<bool, StakingError> {
    let parsed = address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| StakingError::InvalidAddress(format!("failed to parse address: {e}")))?;

    Ok(parsed.is_valid_for_network(network.to_bitcoin_network()))
}

/// Whether `address` is a taproot (P2TR) address on `network`.
pub fn is_taproot(address: &str, network: BtcNetwork) -> bool {
    parse_address(address, network)
        .map(|a| a.address_type() == Some(AddressType::P2tr))
        .unwrap_or(false)
}

/// Decode a hex x-only public key and check that it lies on the curve.
pub fn parse_no_coord_pk(pk_hex: &str) -> Result<[u8; 32], StakingError> {
    let bytes = hex::decode(pk_hex)
        .map_err(|e| StakingError::InvalidPublicKey(format!("invalid hex: {e}")))?;
    if bytes.len() != NO_COORD_PK_BYTE_LENGTH {
        return Err(StakingError::InvalidPublicKey(format!(
            "expected {NO_COORD_PK_BYTE_LENGTH} bytes, got {}",
            bytes.len()
        )));
    }
    let key = XOnlyPublicKey::from_slice(&bytes)
        .map_err(|e| StakingError::InvalidPublicKey(format!("not a valid x-only key: {e}")))?;
    Ok(key.serialize())
}

/// Boolean form of [`parse_no_coord_pk`].
pub fn is_valid_no_coord_pk(pk_hex: &str) -> bool {
    parse_no_coord_pk(pk_hex).is_ok()
}
