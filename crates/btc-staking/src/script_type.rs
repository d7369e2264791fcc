use bitcoin::Script;

/// Standard output script kinds the staking builders know how to spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptType {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
}

impl ScriptType {
    /// Classify a raw `scriptPubKey`. Returns `None` for anything non-standard.
    pub fn classify(script_pubkey: &[u8]) -> Option<Self> {
        let script = Script::from_bytes(script_pubkey);
        if script.is_p2pkh() {
            Some(ScriptType::P2pkh)
        } else if script.is_p2sh() {
            Some(ScriptType::P2sh)
        } else if script.is_p2wpkh() {
            Some(ScriptType::P2wpkh)
        } else if script.is_p2wsh() {
            Some(ScriptType::P2wsh)
        } else if script.is_p2tr() {
            Some(ScriptType::P2tr)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptType::P2pkh => write!(f, "P2PKH"),
            ScriptType::P2sh => write!(f, "P2SH"),
            ScriptType::P2wpkh => write!(f, "P2WPKH"),
            ScriptType::P2wsh => write!(f, "P2WSH"),
            ScriptType::P2tr => write!(f, "P2TR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(hex_str: &str) -> Vec<u8> {
        hex::decode(hex_str).unwrap()
    }

    #[test]
    fn classifies_p2pkh() {
        let spk = script(&format!("76a914{}88ac", "11".repeat(20)));
        assert_eq!(ScriptType::classify(&spk), Some(ScriptType::P2pkh));
    }

    #[test]
    fn classifies_p2sh() {
        let spk = script(&format!("a914{}87", "22".repeat(20)));
        assert_eq!(ScriptType::classify(&spk), Some(ScriptType::P2sh));
    }

    #[test]
    fn classifies_p2wpkh() {
        let spk = script(&format!("0014{}", "33".repeat(20)));
        assert_eq!(ScriptType::classify(&spk), Some(ScriptType::P2wpkh));
    }

    #[test]
    fn classifies_p2wsh() {
        let spk = script(&format!("0020{}", "44".repeat(32)));
        assert_eq!(ScriptType::classify(&spk), Some(ScriptType::P2wsh));
    }

    #[test]
    fn classifies_p2tr() {
        let spk = script(&format!("5120{}", "55".repeat(32)));
        assert_eq!(ScriptType::classify(&spk), Some(ScriptType::P2tr));
    }

    #[test]
    fn op_return_is_unclassified() {
        let spk = script("6a0401020304");
        assert_eq!(ScriptType::classify(&spk), None);
    }

    #[test]
    fn garbage_is_unclassified() {
        assert_eq!(ScriptType::classify(&[0xaa; 22]), None);
        assert_eq!(ScriptType::classify(&[]), None);
    }
}
