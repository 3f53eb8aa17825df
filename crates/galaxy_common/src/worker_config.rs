//! Typed worker configuration as persisted to `configN.json`.

use serde::{Deserialize, Serialize};

/// Attack/defence timing, all values in the worker's own time units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingBlock {
    pub start_attack_time: u64,
    pub stop_attack_time: u64,
    pub attack_interval_time: u64,
    pub start_defence_time: u64,
    pub stop_defence_time: u64,
    pub defence_interval_time: u64,
}

impl TimingBlock {
    /// Field names in declaration order, as they appear in the persisted record
    pub const FIELDS: [&'static str; 6] = [
        "startAttackTime",
        "stopAttackTime",
        "attackIntervalTime",
        "startDefenceTime",
        "stopDefenceTime",
        "defenceIntervalTime",
    ];

    pub fn values(&self) -> [u64; 6] {
        [
            self.start_attack_time,
            self.stop_attack_time,
            self.attack_interval_time,
            self.start_defence_time,
            self.stop_defence_time,
            self.defence_interval_time,
        ]
    }

    pub fn from_values(values: [u64; 6]) -> Self {
        let [start_attack_time, stop_attack_time, attack_interval_time, start_defence_time, stop_defence_time, defence_interval_time] =
            values;
        Self {
            start_attack_time,
            stop_attack_time,
            attack_interval_time,
            start_defence_time,
            stop_defence_time,
            defence_interval_time,
        }
    }

    /// Windows where stop precedes start; tolerated but worth a warning
    pub fn inverted_windows(&self) -> Vec<&'static str> {
        let mut inverted = Vec::new();
        if self.stop_attack_time < self.start_attack_time {
            inverted.push("attack");
        }
        if self.stop_defence_time < self.start_defence_time {
            inverted.push("defence");
        }
        inverted
    }
}

/// Timing for the second credential, persisted with an `RC2` prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryTiming {
    #[serde(rename = "RC2startAttackTime")]
    pub start_attack_time: u64,
    #[serde(rename = "RC2stopAttackTime")]
    pub stop_attack_time: u64,
    #[serde(rename = "RC2attackIntervalTime")]
    pub attack_interval_time: u64,
    #[serde(rename = "RC2startDefenceTime")]
    pub start_defence_time: u64,
    #[serde(rename = "RC2stopDefenceTime")]
    pub stop_defence_time: u64,
    #[serde(rename = "RC2defenceIntervalTime")]
    pub defence_interval_time: u64,
}

impl SecondaryTiming {
    pub const PREFIX: &'static str = "RC2";

    pub fn block(&self) -> TimingBlock {
        TimingBlock {
            start_attack_time: self.start_attack_time,
            stop_attack_time: self.stop_attack_time,
            attack_interval_time: self.attack_interval_time,
            start_defence_time: self.start_defence_time,
            stop_defence_time: self.stop_defence_time,
            defence_interval_time: self.defence_interval_time,
        }
    }
}

impl From<TimingBlock> for SecondaryTiming {
    fn from(block: TimingBlock) -> Self {
        Self {
            start_attack_time: block.start_attack_time,
            stop_attack_time: block.stop_attack_time,
            attack_interval_time: block.attack_interval_time,
            start_defence_time: block.start_defence_time,
            stop_defence_time: block.stop_defence_time,
            defence_interval_time: block.defence_interval_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toggles {
    pub stand_on_enemy: bool,
    pub action_on_enemy: bool,
    pub ai_chat_toggle: bool,
    pub ai_pilot_toggle: bool,
    pub kick_all_toggle: bool,
    #[serde(rename = "dualRCToggle")]
    pub dual_rc_toggle: bool,
}

impl Toggles {
    pub const FIELDS: [&'static str; 6] = [
        "standOnEnemy",
        "actionOnEnemy",
        "aiChatToggle",
        "aiPilotToggle",
        "kickAllToggle",
        "dualRCToggle",
    ];
}

/// Validated configuration for one slot.
///
/// `secondary_timing` is present iff `toggles.dual_rc_toggle` is set;
/// [`WorkerConfig::new`] derives the toggle from the block. `last_updated` is
/// stamped in milliseconds by the writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    #[serde(rename = "RC1")]
    pub rc1: String,
    #[serde(rename = "RC2")]
    pub rc2: String,
    #[serde(flatten)]
    pub timing: TimingBlock,
    pub planet_name: String,
    pub rival: Vec<String>,
    pub blacklist: Vec<String>,
    pub whitelist: Vec<String>,
    #[serde(flatten)]
    pub toggles: Toggles,
    #[serde(flatten)]
    pub secondary_timing: Option<SecondaryTiming>,
    #[serde(default)]
    pub last_updated: i64,
}

/// Credentials and name lists of a worker config
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub rc1: String,
    pub rc2: String,
    pub planet_name: String,
    pub rival: Vec<String>,
    pub blacklist: Vec<String>,
    pub whitelist: Vec<String>,
}

impl WorkerConfig {
    /// Build a config. The dual toggle follows `secondary`: a secondary
    /// block turns it on, its absence turns it off, whatever `toggles` says.
    pub fn new(
        identity: Identity,
        timing: TimingBlock,
        mut toggles: Toggles,
        secondary: Option<TimingBlock>,
    ) -> Self {
        toggles.dual_rc_toggle = secondary.is_some();

        Self {
            rc1: identity.rc1,
            rc2: identity.rc2,
            timing,
            planet_name: identity.planet_name,
            rival: identity.rival,
            blacklist: identity.blacklist,
            whitelist: identity.whitelist,
            toggles,
            secondary_timing: secondary.map(SecondaryTiming::from),
            last_updated: 0,
        }
    }

    /// Copy with the write timestamp embedded
    pub fn stamped(mut self, last_updated: i64) -> Self {
        self.last_updated = last_updated;
        self
    }

    pub fn is_dual(&self) -> bool {
        self.toggles.dual_rc_toggle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample(dual: bool) -> WorkerConfig {
        let timing = TimingBlock::from_values([1, 2, 3, 4, 5, 6]);
        let toggles = Toggles {
            dual_rc_toggle: dual,
            ..Toggles::default()
        };
        let identity = Identity {
            rc1: "alpha".to_string(),
            rc2: "beta".to_string(),
            planet_name: "Vega".to_string(),
            ..Identity::default()
        };
        WorkerConfig::new(identity, timing, toggles, dual.then_some(timing))
    }

    #[test]
    fn test_single_rc_omits_secondary_block() {
        let config = sample(false);
        assert!(config.secondary_timing.is_none());

        let json: Value = serde_json::to_value(&config).unwrap();
        let obj = json.as_object().unwrap();
        assert!(obj.keys().all(|k| !k.starts_with("RC2") || k == "RC2"));
        assert_eq!(obj["startAttackTime"], 1);
        assert_eq!(obj["dualRCToggle"], false);
        assert_eq!(obj["planetName"], "Vega");
    }

    #[test]
    fn test_dual_rc_writes_twelve_timing_fields() {
        let json: Value = serde_json::to_value(sample(true)).unwrap();
        let obj = json.as_object().unwrap();
        for field in TimingBlock::FIELDS {
            assert!(obj.contains_key(field), "missing {}", field);
            assert!(obj.contains_key(&format!("RC2{}", field)), "missing RC2{}", field);
        }
        assert!(obj.contains_key("RC1"));
        assert!(obj.contains_key("RC2"));
    }

    #[test]
    fn test_round_trip_keeps_secondary_presence() {
        for dual in [false, true] {
            let config = sample(dual).stamped(1_700_000_000_000);
            let text = serde_json::to_string(&config).unwrap();
            let parsed: WorkerConfig = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed, config);
        }
    }

    #[test]
    fn test_dual_toggle_follows_secondary_block() {
        let timing = TimingBlock::from_values([1, 2, 3, 4, 5, 6]);
        let claims_dual = Toggles {
            dual_rc_toggle: true,
            ..Toggles::default()
        };
        let config = WorkerConfig::new(Identity::default(), timing, claims_dual, None);
        assert!(!config.is_dual());
        assert!(config.secondary_timing.is_none());

        let config = WorkerConfig::new(Identity::default(), timing, Toggles::default(), Some(timing));
        assert!(config.is_dual());
        assert_eq!(config.secondary_timing.map(|t| t.block()), Some(timing));
    }

    #[test]
    fn test_inverted_windows() {
        let timing = TimingBlock::from_values([10, 5, 1, 1, 2, 1]);
        assert_eq!(timing.inverted_windows(), vec!["attack"]);
    }
}
