//! Projection of loosely-typed form input onto a strict [`WorkerConfig`].
//!
//! Form keys carry the slot id as a suffix (`startAttackTime3`,
//! `PlanetName3`, `RC2startAttackTime3`). All permissive coercion lives here;
//! nothing past this module sees strings standing in for numbers or booleans.

use crate::error::InvalidConfig;
use crate::slot::Slot;
use crate::worker_config::{Identity, SecondaryTiming, TimingBlock, Toggles, WorkerConfig};
use serde_json::{Map, Value};

/// Flat JSON object as posted by the control panel
pub type FormInput = Map<String, Value>;

/// Permissive boolean coercion.
///
/// Native booleans pass through; strings are true iff their trimmed,
/// lowercased form is one of `true`, `1`, `yes`, `on`; everything else uses
/// its truthiness (non-zero numbers, non-empty containers).
pub fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Normalize a list field: a sequence, or one comma-separated string.
/// Tokens are trimmed and empty tokens dropped; order is preserved.
pub fn parse_list(field: &str, value: &Value) -> Result<Vec<String>, InvalidConfig> {
    let tokens = match value {
        Value::Null => Vec::new(),
        Value::String(s) => s.split(',').map(|t| t.trim().to_string()).collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.trim().to_string()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(InvalidConfig::malformed(
                    field,
                    format!("list entries must be strings, got {}", type_name(other)),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(InvalidConfig::malformed(
                field,
                format!("expected a list or comma-separated string, got {}", type_name(other)),
            ))
        }
    };

    Ok(tokens.into_iter().filter(|t| !t.is_empty()).collect())
}

fn parse_integer(field: &str, value: &Value) -> Result<u64, InvalidConfig> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                return Ok(v);
            }
            if n.as_i64().is_some() {
                return Err(InvalidConfig::malformed(field, "must not be negative"));
            }
            match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(f as u64),
                _ => Err(InvalidConfig::malformed(
                    field,
                    format!("expected a non-negative integer, got {}", n),
                )),
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(v) = trimmed.parse::<u64>() {
                Ok(v)
            } else if trimmed.parse::<i64>().is_ok() {
                Err(InvalidConfig::malformed(field, "must not be negative"))
            } else {
                Err(InvalidConfig::malformed(
                    field,
                    format!("'{}' is not an integer", s),
                ))
            }
        }
        other => Err(InvalidConfig::malformed(
            field,
            format!("expected an integer, got {}", type_name(other)),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Slot-scoped view over the raw form
struct FormReader<'a> {
    slot: Slot,
    input: &'a FormInput,
}

impl<'a> FormReader<'a> {
    fn key(&self, name: &str) -> String {
        format!("{}{}", name, self.slot)
    }

    fn required(&self, name: &str) -> Result<(String, &'a Value), InvalidConfig> {
        let key = self.key(name);
        match self.input.get(&key) {
            Some(Value::Null) | None => Err(InvalidConfig::missing(key)),
            Some(value) => Ok((key, value)),
        }
    }

    fn text(&self, name: &str) -> Result<String, InvalidConfig> {
        let (key, value) = self.required(name)?;
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(InvalidConfig::malformed(
                key,
                format!("expected a string, got {}", type_name(other)),
            )),
        }
    }

    fn integer(&self, name: &str) -> Result<u64, InvalidConfig> {
        let (key, value) = self.required(name)?;
        parse_integer(&key, value)
    }

    fn flag(&self, name: &str) -> bool {
        self.input.get(&self.key(name)).map(coerce_bool).unwrap_or(false)
    }

    fn list(&self, name: &str) -> Result<Vec<String>, InvalidConfig> {
        let key = self.key(name);
        match self.input.get(&key) {
            Some(value) => parse_list(&key, value),
            None => Ok(Vec::new()),
        }
    }

    fn timing(&self, prefix: &str) -> Result<TimingBlock, InvalidConfig> {
        let mut values = [0u64; 6];
        for (slot_value, field) in values.iter_mut().zip(TimingBlock::FIELDS) {
            *slot_value = self.integer(&format!("{}{}", prefix, field))?;
        }
        Ok(TimingBlock::from_values(values))
    }
}

/// Validate a form for one slot.
///
/// Credentials and planet name are required, the primary timing block is
/// required, lists and toggles default to empty/false. With `dualRCToggle`
/// on, every `RC2`-prefixed timing field is required and a missing one is
/// reported by name; with it off the secondary block is never read.
pub fn validate_form(slot: Slot, input: &FormInput) -> Result<WorkerConfig, InvalidConfig> {
    let form = FormReader { slot, input };

    let identity = Identity {
        rc1: form.text("RC1")?,
        rc2: form.text("RC2")?,
        planet_name: form.text("PlanetName")?,
        rival: form.list("Rival")?,
        blacklist: form.list("Blacklist")?,
        whitelist: form.list("Whitelist")?,
    };

    let timing = form.timing("")?;

    let toggles = Toggles {
        stand_on_enemy: form.flag("standOnEnemy"),
        action_on_enemy: form.flag("actionOnEnemy"),
        ai_chat_toggle: form.flag("aiChatToggle"),
        ai_pilot_toggle: form.flag("aiPilotToggle"),
        kick_all_toggle: form.flag("kickAllToggle"),
        dual_rc_toggle: form.flag("dualRCToggle"),
    };

    let secondary = if toggles.dual_rc_toggle {
        Some(form.timing(SecondaryTiming::PREFIX)?)
    } else {
        None
    };

    Ok(WorkerConfig::new(identity, timing, toggles, secondary))
}
