//! Protocol and relay-policy constants shared by the builders.

use bitcoin::Sequence;

/// Minimum output value accepted by relay policy (in sats).
pub const BTC_DUST_SAT: u64 = 546;

/// Length of an x-only (no coordinate) public key.
pub const NO_COORD_PK_BYTE_LENGTH: usize = 32;

/// Largest relative timelock expressible in a CSV block count.
pub const MAX_TIMELOCK: u16 = u16::MAX;

/// Locktimes at or above this value are interpreted as unix timestamps (BIP-65).
pub const BTC_LOCKTIME_HEIGHT_TIME_CUTOFF: u32 = 500_000_000;

/// Sequence used on every input that must not be replaceable.
pub const NON_RBF_SEQUENCE: Sequence = Sequence::MAX;

/// Unspendable taproot internal key (BIP-341 `H`, the hash of the generator point).
pub const UNSPENDABLE_INTERNAL_KEY: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a, 0x5e,
    0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80, 0x3a, 0xc0,
];

/// Version byte of the observable-staking OP_RETURN payload.
pub const DATA_EMBED_VERSION: u8 = 0;

/// Length of the observable-staking tag.
pub const DATA_EMBED_TAG_LENGTH: usize = 4;
