//! Validator Tests
//!
//! Projection of slot-suffixed form input onto typed worker configs,
//! including the conditional secondary timing block.

use galaxy_common::{validate_form, FormInput, InvalidConfig, Slot, TimingBlock};
use serde_json::{json, Value};

// ============================================================================
// Helpers
// ============================================================================

fn slot(id: i64) -> Slot {
    Slot::new(id).unwrap()
}

/// Complete single-credential form for a slot
fn base_form(id: u8) -> FormInput {
    let mut form = json!({
        format!("RC1{id}"): "first-code",
        format!("RC2{id}"): "second-code",
        format!("startAttackTime{id}"): 100,
        format!("stopAttackTime{id}"): "200",
        format!("attackIntervalTime{id}"): 5,
        format!("startDefenceTime{id}"): 300,
        format!("stopDefenceTime{id}"): 400,
        format!("defenceIntervalTime{id}"): " 7 ",
        format!("PlanetName{id}"): "Andromeda",
        format!("Rival{id}"): "alpha, beta,gamma",
        format!("Blacklist{id}"): ["spam", " eggs "],
        format!("standOnEnemy{id}"): "yes",
        format!("actionOnEnemy{id}"): false,
        format!("aiChatToggle{id}"): "0",
        format!("dualRCToggle{id}"): "false",
    });
    form.as_object_mut().unwrap().clone()
}

fn with_secondary(mut form: FormInput, id: u8) -> FormInput {
    form.insert(format!("dualRCToggle{id}"), json!("On"));
    for (i, field) in TimingBlock::FIELDS.iter().enumerate() {
        form.insert(format!("RC2{field}{id}"), json!(1000 + i as u64));
    }
    form
}

// ============================================================================
// Primary fields
// ============================================================================

#[test]
fn test_valid_form_projects_all_fields() {
    let config = validate_form(slot(1), &base_form(1)).unwrap();

    assert_eq!(config.rc1, "first-code");
    assert_eq!(config.rc2, "second-code");
    assert_eq!(config.timing.values(), [100, 200, 5, 300, 400, 7]);
    assert_eq!(config.planet_name, "Andromeda");
    assert_eq!(config.rival, vec!["alpha", "beta", "gamma"]);
    assert_eq!(config.blacklist, vec!["spam", "eggs"]);
    assert!(config.whitelist.is_empty());
    assert!(config.toggles.stand_on_enemy);
    assert!(!config.toggles.action_on_enemy);
    assert!(!config.toggles.ai_chat_toggle);
    assert!(!config.toggles.kick_all_toggle);
    assert!(!config.is_dual());
    assert!(config.secondary_timing.is_none());
}

#[test]
fn test_keys_for_other_slots_are_ignored() {
    // A slot-4 form posted to slot 2 is missing every slot-2 key
    let err = validate_form(slot(2), &base_form(4)).unwrap_err();
    assert_eq!(err, InvalidConfig::missing("RC12"));
}

#[test]
fn test_non_integer_timing_names_field() {
    let mut form = base_form(1);
    form.insert("attackIntervalTime1".to_string(), json!("soon"));

    let err = validate_form(slot(1), &form).unwrap_err();
    assert_eq!(err.field(), "attackIntervalTime1");
    assert!(matches!(err, InvalidConfig::Malformed { .. }));
}

#[test]
fn test_negative_timing_rejected() {
    let mut form = base_form(1);
    form.insert("startDefenceTime1".to_string(), json!(-3));

    let err = validate_form(slot(1), &form).unwrap_err();
    assert_eq!(err.field(), "startDefenceTime1");
}

#[test]
fn test_missing_primary_timing_names_field() {
    let mut form = base_form(5);
    form.remove("stopDefenceTime5");

    let err = validate_form(slot(5), &form).unwrap_err();
    assert_eq!(err, InvalidConfig::missing("stopDefenceTime5"));
}

#[test]
fn test_null_counts_as_missing() {
    let mut form = base_form(1);
    form.insert("PlanetName1".to_string(), Value::Null);

    let err = validate_form(slot(1), &form).unwrap_err();
    assert_eq!(err, InvalidConfig::missing("PlanetName1"));
}

// ============================================================================
// Secondary timing block
// ============================================================================

#[test]
fn test_dual_rc_reads_secondary_block() {
    let form = with_secondary(base_form(3), 3);
    let config = validate_form(slot(3), &form).unwrap();

    assert!(config.is_dual());
    let secondary = config.secondary_timing.expect("secondary block present");
    assert_eq!(secondary.block().values(), [1000, 1001, 1002, 1003, 1004, 1005]);
}

#[test]
fn test_dual_rc_missing_secondary_field_is_rejected() {
    let mut form = with_secondary(base_form(3), 3);
    form.remove("RC2stopDefenceTime3");

    let err = validate_form(slot(3), &form).unwrap_err();
    assert_eq!(err, InvalidConfig::missing("RC2stopDefenceTime3"));

    // Deterministic: same input, same error
    assert_eq!(validate_form(slot(3), &form).unwrap_err(), err);
}

#[test]
fn test_single_rc_ignores_stray_secondary_fields() {
    let mut form = with_secondary(base_form(3), 3);
    form.insert("dualRCToggle3".to_string(), json!("no"));
    form.insert("RC2startAttackTime3".to_string(), json!("garbage"));

    let config = validate_form(slot(3), &form).unwrap();
    assert!(config.secondary_timing.is_none());

    let persisted = serde_json::to_value(&config).unwrap();
    for field in TimingBlock::FIELDS {
        assert!(persisted.get(format!("RC2{field}")).is_none());
    }
}
