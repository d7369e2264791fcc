//! Staking script construction.
//!
//! Every staking output commits to a small, fixed set of tapscript leaves built
//! from the staker key, the finality provider key and the covenant committee.
//! Script bytes depend only on the inputs, so independent co-signers derive the
//! same tree and address without coordinating.

use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CHECKSIGADD, OP_CHECKSIGVERIFY, OP_CSV, OP_NUMEQUAL, OP_NUMEQUALVERIFY,
    OP_PUSHNUM_1, OP_PUSHNUM_16, OP_RETURN,
};
use bitcoin::script::{read_scriptint, Builder, Instruction, PushBytesBuf};
use bitcoin::{Script, ScriptBuf};

use crate::constants::{
    DATA_EMBED_TAG_LENGTH, DATA_EMBED_VERSION, MAX_TIMELOCK, NO_COORD_PK_BYTE_LENGTH,
};
use crate::error::StakingError;

/// An x-only public key as it appears in tapscript.
pub type NoCoordPk = [u8; NO_COORD_PK_BYTE_LENGTH];

/// The full set of scripts a staking delegation is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakingScripts {
    pub timelock_script: ScriptBuf,
    pub unbonding_script: ScriptBuf,
    pub slashing_script: ScriptBuf,
    pub unbonding_timelock_script: ScriptBuf,
    /// Present only for observable staking.
    pub data_embed_script: Option<ScriptBuf>,
}

/// Validated inputs for building [`StakingScripts`].
#[derive(Debug, Clone)]
pub struct StakingScriptData {
    staker_key: NoCoordPk,
    finality_provider_keys: Vec<NoCoordPk>,
    covenant_keys: Vec<NoCoordPk>,
    covenant_quorum: u32,
    staking_timelock: u32,
    unbonding_time: u32,
    tag: Option<[u8; DATA_EMBED_TAG_LENGTH]>,
}

impl StakingScriptData {
    /// Validate raw key material and timelocks.
    ///
    /// Zero timelocks, a zero quorum or empty key sets fail with
    /// `MissingRequiredValue`; wrong key lengths, duplicates, an oversized
    /// quorum or out-of-range timelocks fail with `InvalidScriptData`.
    pub fn new(
        staker_key: &[u8],
        finality_provider_keys: &[Vec<u8>],
        covenant_keys: &[Vec<u8>],
        covenant_quorum: u32,
        staking_timelock: u32,
        unbonding_time: u32,
    ) -> Result<Self, StakingError> {
        if staker_key.is_empty()
            || finality_provider_keys.is_empty()
            || covenant_keys.is_empty()
            || covenant_quorum == 0
            || staking_timelock == 0
            || unbonding_time == 0
        {
            return Err(StakingError::MissingRequiredValue(
                "missing required input values".into(),
            ));
        }

        let data = Self {
            staker_key: to_key(staker_key, "staker")?,
            finality_provider_keys: finality_provider_keys
                .iter()
                .map(|k| to_key(k, "finality provider"))
                .collect::<Result<_, _>>()?,
            covenant_keys: covenant_keys
                .iter()
                .map(|k| to_key(k, "covenant"))
                .collect::<Result<_, _>>()?,
            covenant_quorum,
            staking_timelock,
            unbonding_time,
            tag: None,
        };
        data.validate()?;
        Ok(data)
    }

    /// Attach an observable-staking tag, enabling the OP_RETURN data-embed script.
    pub fn with_tag(mut self, tag: [u8; DATA_EMBED_TAG_LENGTH]) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Check key uniqueness, the covenant quorum and both timelocks.
    pub fn validate(&self) -> Result<(), StakingError> {
        let mut all_keys: Vec<&NoCoordPk> = std::iter::once(&self.staker_key)
            .chain(&self.finality_provider_keys)
            .chain(&self.covenant_keys)
            .collect();
        let total = all_keys.len();
        all_keys.sort();
        all_keys.dedup();
        if all_keys.len() != total {
            return Err(StakingError::InvalidScriptData(
                "duplicate keys provided".into(),
            ));
        }

        if self.covenant_quorum == 0 {
            return Err(StakingError::MissingRequiredValue(
                "covenant quorum must be greater than 0".into(),
            ));
        }
        if self.covenant_quorum as usize > self.covenant_keys.len() {
            return Err(StakingError::InvalidScriptData(format!(
                "covenant quorum {} exceeds covenant set size {}",
                self.covenant_quorum,
                self.covenant_keys.len()
            )));
        }

        check_timelock(self.staking_timelock, "staking timelock")?;
        check_timelock(self.unbonding_time, "unbonding time")?;
        Ok(())
    }

    /// `<stakerPk> OP_CHECKSIGVERIFY <stakingTimelock> OP_CHECKSEQUENCEVERIFY`
    pub fn build_staking_timelock_script(&self) -> ScriptBuf {
        build_timelock_script(&self.staker_key, self.staking_timelock as u16)
    }

    /// `<stakerPk> OP_CHECKSIGVERIFY <unbondingTime> OP_CHECKSEQUENCEVERIFY`
    pub fn build_unbonding_timelock_script(&self) -> ScriptBuf {
        build_timelock_script(&self.staker_key, self.unbonding_time as u16)
    }

    /// Staker signature plus a covenant quorum.
    pub fn build_unbonding_script(&self) -> Result<ScriptBuf, StakingError> {
        let builder = push_single_key(Builder::new(), &self.staker_key, true);
        let builder = push_multi_key(builder, &self.covenant_keys, self.covenant_quorum, false)?;
        Ok(builder.into_script())
    }

    /// Staker signature, finality provider signature and a covenant quorum.
    pub fn build_slashing_script(&self) -> Result<ScriptBuf, StakingError> {
        let fp_key = self.single_finality_provider()?;
        let builder = push_single_key(Builder::new(), &self.staker_key, true);
        let builder = push_single_key(builder, fp_key, true);
        let builder = push_multi_key(builder, &self.covenant_keys, self.covenant_quorum, false)?;
        Ok(builder.into_script())
    }

    /// `OP_RETURN <tag ‖ version ‖ stakerPk ‖ fpPk ‖ stakingTimelock (big endian)>`
    ///
    /// Only available when a tag was attached with [`Self::with_tag`].
    pub fn build_data_embed_script(&self) -> Result<ScriptBuf, StakingError> {
        let tag = self.tag.ok_or_else(|| {
            StakingError::MissingRequiredValue("data embed script requires a tag".into())
        })?;
        let fp_key = self.single_finality_provider()?;

        let mut payload =
            Vec::with_capacity(DATA_EMBED_TAG_LENGTH + 1 + 2 * NO_COORD_PK_BYTE_LENGTH + 2);
        payload.extend_from_slice(&tag);
        payload.push(DATA_EMBED_VERSION);
        payload.extend_from_slice(&self.staker_key);
        payload.extend_from_slice(fp_key);
        payload.extend_from_slice(&(self.staking_timelock as u16).to_be_bytes());

        let payload = PushBytesBuf::try_from(payload)
            .map_err(|e| StakingError::InvalidScriptData(format!("data embed payload: {e}")))?;
        Ok(Builder::new()
            .push_opcode(OP_RETURN)
            .push_slice(payload)
            .into_script())
    }

    /// Build every script of the delegation.
    pub fn build_scripts(&self) -> Result<StakingScripts, StakingError> {
        let data_embed_script = match self.tag {
            Some(_) => Some(self.build_data_embed_script()?),
            None => None,
        };
        Ok(StakingScripts {
            timelock_script: self.build_staking_timelock_script(),
            unbonding_script: self.build_unbonding_script()?,
            slashing_script: self.build_slashing_script()?,
            unbonding_timelock_script: self.build_unbonding_timelock_script(),
            data_embed_script,
        })
    }

    fn single_finality_provider(&self) -> Result<&NoCoordPk, StakingError> {
        match self.finality_provider_keys.as_slice() {
            [key] => Ok(key),
            _ => Err(StakingError::InvalidScriptData(
                "Only a single finality provider key is supported".into(),
            )),
        }
    }
}

/// `<pk> OP_CHECKSIGVERIFY <timelock> OP_CHECKSEQUENCEVERIFY`
pub fn build_timelock_script(key: &NoCoordPk, timelock: u16) -> ScriptBuf {
    Builder::new()
        .push_slice(key)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_int(i64::from(timelock))
        .push_opcode(OP_CSV)
        .into_script()
}

/// Read the relative timelock back out of a timelock script.
///
/// Small values are encoded as `OP_1..OP_16`, larger ones as a minimal
/// script number push.
pub fn decode_timelock(script: &Script) -> Result<u16, StakingError> {
    let instruction = script
        .instructions()
        .nth(2)
        .ok_or_else(|| StakingError::InvalidScriptData("timelock script is too short".into()))?
        .map_err(|e| StakingError::InvalidScriptData(format!("timelock script is not valid: {e}")))?;

    let value = match instruction {
        Instruction::Op(op) => {
            let code = op.to_u8();
            if !(OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&code) {
                return Err(StakingError::InvalidScriptData(format!(
                    "unexpected opcode {op} in timelock position"
                )));
            }
            i64::from(code - OP_PUSHNUM_1.to_u8() + 1)
        }
        Instruction::PushBytes(bytes) => read_scriptint(bytes.as_bytes())
            .map_err(|e| StakingError::InvalidScriptData(format!("invalid timelock: {e}")))?,
    };

    u16::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| StakingError::InvalidScriptData(format!("timelock {value} out of range")))
}

fn to_key(bytes: &[u8], role: &str) -> Result<NoCoordPk, StakingError> {
    NoCoordPk::try_from(bytes).map_err(|_| {
        StakingError::InvalidScriptData(format!(
            "{role} key must be {NO_COORD_PK_BYTE_LENGTH} bytes, got {}",
            bytes.len()
        ))
    })
}

fn check_timelock(value: u32, what: &str) -> Result<(), StakingError> {
    if value == 0 {
        return Err(StakingError::MissingRequiredValue(format!(
            "{what} must be greater than 0"
        )));
    }
    if value > u32::from(MAX_TIMELOCK) {
        return Err(StakingError::InvalidScriptData(format!(
            "{what} {value} exceeds {MAX_TIMELOCK}"
        )));
    }
    Ok(())
}

fn push_single_key(builder: Builder, key: &NoCoordPk, with_verify: bool) -> Builder {
    builder.push_slice(key).push_opcode(if with_verify {
        OP_CHECKSIGVERIFY
    } else {
        OP_CHECKSIG
    })
}

/// k-of-n threshold over `keys` using `OP_CHECKSIGADD`.
///
/// Keys are sorted ascending by their raw bytes so the result does not depend
/// on the order the caller supplied them in.
fn push_multi_key(
    builder: Builder,
    keys: &[NoCoordPk],
    threshold: u32,
    with_verify: bool,
) -> Result<Builder, StakingError> {
    if keys.is_empty() {
        return Err(StakingError::MissingRequiredValue("no keys provided".into()));
    }
    if threshold as usize > keys.len() {
        return Err(StakingError::InvalidScriptData(
            "required number of valid signers is greater than number of provided keys".into(),
        ));
    }
    if keys.len() == 1 {
        return Ok(push_single_key(builder, &keys[0], with_verify));
    }

    let mut sorted = keys.to_vec();
    sorted.sort();
    if sorted.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(StakingError::InvalidScriptData(
            "duplicate keys provided".into(),
        ));
    }

    let mut builder = builder.push_slice(sorted[0]).push_opcode(OP_CHECKSIG);
    for key in &sorted[1..] {
        builder = builder.push_slice(key).push_opcode(OP_CHECKSIGADD);
    }
    Ok(builder
        .push_int(i64::from(threshold))
        .push_opcode(if with_verify {
            OP_NUMEQUALVERIFY
        } else {
            OP_NUMEQUAL
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::opcodes::Opcode;

    fn key(byte: u8) -> Vec<u8> {
        vec![byte; 32]
    }

    fn data(covenants: &[Vec<u8>], quorum: u32) -> StakingScriptData {
        StakingScriptData::new(&key(0x01), &[key(0x02)], covenants, quorum, 150, 101).unwrap()
    }

    fn decompile(script: &Script) -> Vec<Instruction<'_>> {
        script.instructions().collect::<Result<_, _>>().unwrap()
    }

    fn op(instruction: &Instruction<'_>) -> Opcode {
        match instruction {
            Instruction::Op(op) => *op,
            other => panic!("expected opcode, got {other:?}"),
        }
    }

    fn push(instruction: &Instruction<'_>) -> Vec<u8> {
        match instruction {
            Instruction::PushBytes(bytes) => bytes.as_bytes().to_vec(),
            other => panic!("expected push, got {other:?}"),
        }
    }

    #[test]
    fn timelock_script_with_max_timelock() {
        let staker = [0x11; 32];
        let script = build_timelock_script(&staker, 65535);
        let ins = decompile(&script);
        assert_eq!(ins.len(), 4);
        assert_eq!(push(&ins[0]), staker.to_vec());
        assert_eq!(op(&ins[1]), OP_CHECKSIGVERIFY);
        // Minimal script number: 0xffff needs a trailing sign byte.
        assert_eq!(push(&ins[2]), vec![0xff, 0xff, 0x00]);
        assert_eq!(op(&ins[3]), OP_CSV);
    }

    #[test]
    fn small_timelock_uses_pushnum() {
        let script = build_timelock_script(&[0x11; 32], 16);
        let ins = decompile(&script);
        assert_eq!(op(&ins[2]), OP_PUSHNUM_16);
    }

    #[test]
    fn decode_timelock_round_trips_small_and_large() {
        for timelock in [1u16, 7, 16, 17, 150, 255, 256, 65535] {
            let script = build_timelock_script(&[0x11; 32], timelock);
            assert_eq!(decode_timelock(&script).unwrap(), timelock);
        }
    }

    #[test]
    fn decode_timelock_rejects_short_script() {
        let script = Builder::new().push_opcode(OP_CHECKSIG).into_script();
        assert!(decode_timelock(&script).is_err());
    }

    #[test]
    fn covenant_keys_are_sorted_in_unbonding_script() {
        let ascending = data(&[key(0x10), key(0x20), key(0x30)], 2);
        let shuffled = data(&[key(0x30), key(0x10), key(0x20)], 2);
        let a = ascending.build_unbonding_script().unwrap();
        let b = shuffled.build_unbonding_script().unwrap();
        assert_eq!(a, b);

        let ins = decompile(&a);
        assert_eq!(push(&ins[0]), key(0x01));
        assert_eq!(op(&ins[1]), OP_CHECKSIGVERIFY);
        assert_eq!(push(&ins[2]), key(0x10));
        assert_eq!(op(&ins[3]), OP_CHECKSIG);
        assert_eq!(push(&ins[4]), key(0x20));
        assert_eq!(op(&ins[5]), OP_CHECKSIGADD);
        assert_eq!(push(&ins[6]), key(0x30));
        assert_eq!(op(&ins[7]), OP_CHECKSIGADD);
        assert_eq!(op(&ins[8]).to_u8(), OP_PUSHNUM_1.to_u8() + 1);
        assert_eq!(op(&ins[9]), OP_NUMEQUAL);
        assert_eq!(ins.len(), 10);
    }

    #[test]
    fn slashing_script_layout() {
        let d = data(&[key(0x30), key(0x20)], 1);
        let script = d.build_slashing_script().unwrap();
        let ins = decompile(&script);
        assert_eq!(push(&ins[0]), key(0x01));
        assert_eq!(op(&ins[1]), OP_CHECKSIGVERIFY);
        assert_eq!(push(&ins[2]), key(0x02));
        assert_eq!(op(&ins[3]), OP_CHECKSIGVERIFY);
        assert_eq!(push(&ins[4]), key(0x20));
        assert_eq!(op(&ins[5]), OP_CHECKSIG);
        assert_eq!(push(&ins[6]), key(0x30));
        assert_eq!(op(&ins[7]), OP_CHECKSIGADD);
        assert_eq!(op(&ins[8]), OP_PUSHNUM_1);
        assert_eq!(op(&ins[9]), OP_NUMEQUAL);
    }

    #[test]
    fn single_covenant_collapses_to_checksig() {
        let d = data(&[key(0x30)], 1);
        let script = d.build_unbonding_script().unwrap();
        let ins = decompile(&script);
        assert_eq!(ins.len(), 4);
        assert_eq!(push(&ins[2]), key(0x30));
        assert_eq!(op(&ins[3]), OP_CHECKSIG);
    }

    #[test]
    fn multiple_finality_providers_rejected_for_slashing() {
        let d = StakingScriptData::new(
            &key(0x01),
            &[key(0x02), key(0x03)],
            &[key(0x10)],
            1,
            150,
            101,
        )
        .unwrap();
        let err = d.build_slashing_script().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid script data: Only a single finality provider key is supported"
        );
    }

    #[test]
    fn data_embed_script_layout() {
        let d = data(&[key(0x10)], 1).with_tag(*b"bbt4");
        let script = d.build_data_embed_script().unwrap();
        let ins = decompile(&script);
        assert_eq!(op(&ins[0]), OP_RETURN);
        let payload = push(&ins[1]);
        assert_eq!(payload.len(), 71);
        assert_eq!(&payload[..4], b"bbt4");
        assert_eq!(payload[4], 0x00);
        assert_eq!(&payload[5..37], key(0x01).as_slice());
        assert_eq!(&payload[37..69], key(0x02).as_slice());
        assert_eq!(&payload[69..], &150u16.to_be_bytes());
    }

    #[test]
    fn data_embed_requires_tag() {
        let d = data(&[key(0x10)], 1);
        assert!(matches!(
            d.build_data_embed_script(),
            Err(StakingError::MissingRequiredValue(_))
        ));
        assert!(d.build_scripts().unwrap().data_embed_script.is_none());
    }

    #[test]
    fn build_scripts_is_deterministic() {
        let a = data(&[key(0x10), key(0x20)], 2).build_scripts().unwrap();
        let b = data(&[key(0x20), key(0x10)], 2).build_scripts().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_wrong_key_length() {
        let result =
            StakingScriptData::new(&[0x01; 33], &[key(0x02)], &[key(0x10)], 1, 150, 101);
        assert!(matches!(result, Err(StakingError::InvalidScriptData(_))));
    }

    #[test]
    fn rejects_staker_key_in_covenant_set() {
        let result = StakingScriptData::new(&key(0x01), &[key(0x02)], &[key(0x01)], 1, 150, 101);
        assert!(matches!(result, Err(StakingError::InvalidScriptData(_))));
    }

    #[test]
    fn rejects_finality_provider_in_covenant_set() {
        let result =
            StakingScriptData::new(&key(0x01), &[key(0x02)], &[key(0x02), key(0x03)], 1, 150, 101);
        assert!(matches!(result, Err(StakingError::InvalidScriptData(_))));
    }

    #[test]
    fn rejects_quorum_above_committee_size() {
        let result = StakingScriptData::new(&key(0x01), &[key(0x02)], &[key(0x10)], 2, 150, 101);
        assert!(matches!(result, Err(StakingError::InvalidScriptData(_))));
    }

    #[test]
    fn rejects_zero_values_as_missing() {
        let zero_quorum =
            StakingScriptData::new(&key(0x01), &[key(0x02)], &[key(0x10)], 0, 150, 101);
        assert!(matches!(
            zero_quorum,
            Err(StakingError::MissingRequiredValue(_))
        ));
        let zero_timelock =
            StakingScriptData::new(&key(0x01), &[key(0x02)], &[key(0x10)], 1, 0, 101);
        assert!(matches!(
            zero_timelock,
            Err(StakingError::MissingRequiredValue(_))
        ));
    }

    #[test]
    fn rejects_timelock_above_u16() {
        let result =
            StakingScriptData::new(&key(0x01), &[key(0x02)], &[key(0x10)], 1, 65536, 101);
        assert!(matches!(result, Err(StakingError::InvalidScriptData(_))));
        let result =
            StakingScriptData::new(&key(0x01), &[key(0x02)], &[key(0x10)], 1, 150, 70000);
        assert!(matches!(result, Err(StakingError::InvalidScriptData(_))));
    }
}
