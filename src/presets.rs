//! The four built-in scripts and their default keybinds.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::engine::ScriptDefinition;
use crate::error::{MkrError, Result};
use crate::key::Binding;
use crate::sequence::{OutputAction, Sequence};
use crate::trigger::TriggerPolicy;

pub const SPAM_MACRO: &str = "spam_macro";
pub const AUTO_PULLOUT: &str = "auto_pullout";
pub const AUTO_PICKUP: &str = "auto_pickup";
pub const WALL_TAKE: &str = "wall_take";

pub const BUILTIN_IDS: [&str; 4] = [SPAM_MACRO, AUTO_PULLOUT, AUTO_PICKUP, WALL_TAKE];

const DEFAULT_KEYBINDS: [(&str, &str); 8] = [
    ("edit_key", "g"),
    ("secondary_edit_key", "v"),
    ("toggle_button", "t"),
    ("weapon_slot", "2"),
    ("pickup_key", "e"),
    ("pickup_trigger", "f"),
    ("wall_button", "p"),
    ("wall_trigger", "r"),
];

pub fn default_keybinds() -> BTreeMap<String, String> {
    DEFAULT_KEYBINDS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn keybind(keybinds: &BTreeMap<String, String>, name: &str) -> Result<Binding> {
    let raw = keybinds
        .get(name)
        .ok_or_else(|| MkrError::config_validation(format!("missing keybind '{name}'")))?;
    Binding::parse(raw)
}

/// Hold `toggle` to alternate edit and secondary-edit taps.
pub fn spam_macro(edit: Binding, secondary: Binding, toggle: Binding) -> ScriptDefinition {
    let running = format!("Running (Hold {toggle})");
    let sequence = Sequence::new(vec![
        OutputAction::tap(edit, ms(10)),
        OutputAction::tap(secondary, ms(10)),
    ])
    .with_cycle_gap(ms(1));

    ScriptDefinition::new(
        SPAM_MACRO,
        "Spam Macro",
        TriggerPolicy::ToggleHold,
        vec![toggle],
        sequence,
    )
    .with_description("Alternates edit and secondary edit while the toggle key is held")
    .with_labels(None, Some(running))
}

/// Release the edit key to switch to `slot`.
pub fn auto_pullout(edit: Binding, slot: Binding) -> ScriptDefinition {
    let sequence = Sequence::new(vec![OutputAction::tap(slot, ms(10)).with_before(ms(100))]);

    ScriptDefinition::new(
        AUTO_PULLOUT,
        "Auto Pullout",
        TriggerPolicy::HoldRelease,
        vec![edit],
        sequence,
    )
    .with_description("Selects the weapon slot when the edit key is released")
    .with_labels(Some("Edit held - waiting for release".to_string()), None)
}

/// Spam `pickup` while `trigger` (key or mouse button) is held.
pub fn auto_pickup(pickup: Binding, trigger: Binding) -> ScriptDefinition {
    let running = format!("Spamming {pickup}");
    let sequence = Sequence::new(vec![OutputAction::tap(pickup, ms(5)).with_after(ms(10))]);

    ScriptDefinition::new(
        AUTO_PICKUP,
        "Auto Pickup",
        TriggerPolicy::HoldSpam,
        vec![trigger],
        sequence,
    )
    .with_description("Spams the pickup key while the trigger is held")
    .with_labels(None, Some(running))
}

/// Click, place a wall, click again on each press of `trigger`.
pub fn wall_take(wall: Binding, trigger: Binding) -> ScriptDefinition {
    let click = Binding::mouse_left();
    let sequence = Sequence::new(vec![
        OutputAction::tap(click.clone(), ms(200)),
        OutputAction::tap(wall, ms(50)),
        OutputAction::tap(click, ms(100)),
    ]);

    ScriptDefinition::new(
        WALL_TAKE,
        "Wall Take",
        TriggerPolicy::Press,
        vec![trigger],
        sequence,
    )
    .with_description("Runs the wall placement sequence on each trigger press")
    .with_labels(None, Some("Executing sequence...".to_string()))
}

/// All built-in scripts bound from `keybinds`.
pub fn builtin(keybinds: &BTreeMap<String, String>) -> Result<Vec<ScriptDefinition>> {
    let edit = keybind(keybinds, "edit_key")?;
    Ok(vec![
        spam_macro(
            edit.clone(),
            keybind(keybinds, "secondary_edit_key")?,
            keybind(keybinds, "toggle_button")?,
        ),
        auto_pullout(edit, keybind(keybinds, "weapon_slot")?),
        auto_pickup(
            keybind(keybinds, "pickup_key")?,
            keybind(keybinds, "pickup_trigger")?,
        ),
        wall_take(
            keybind(keybinds, "wall_button")?,
            keybind(keybinds, "wall_trigger")?,
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::MOUSE_LEFT;
    use crate::sequence::ActionKind;

    #[test]
    fn test_builtin_defaults() {
        let scripts = builtin(&default_keybinds()).unwrap();
        let ids: Vec<_> = scripts.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, BUILTIN_IDS);

        let spam = &scripts[0];
        assert_eq!(spam.policy, TriggerPolicy::ToggleHold);
        assert_eq!(spam.bindings[0].as_str(), "t");
        assert_eq!(spam.sequence.primitive_count(), 4);
        assert_eq!(spam.sequence.duration(), ms(20));
        assert_eq!(spam.sequence.cycle_gap, ms(1));

        let wall = &scripts[3];
        assert_eq!(wall.sequence.steps[0].key.as_str(), MOUSE_LEFT);
        assert_eq!(wall.sequence.steps[0].hold, ms(200));
        assert!(scripts.iter().all(|s| s.validate().is_ok()));
    }

    #[test]
    fn test_pullout_waits_before_slot() {
        let script = auto_pullout(Binding::parse("g").unwrap(), Binding::parse("2").unwrap());
        let step = &script.sequence.steps[0];
        assert_eq!(step.action, ActionKind::Tap);
        assert_eq!(step.before, ms(100));
        assert_eq!(step.key.as_str(), "2");
    }

    #[test]
    fn test_missing_keybind() {
        let mut keybinds = default_keybinds();
        keybinds.remove("wall_trigger");
        assert!(matches!(
            builtin(&keybinds),
            Err(MkrError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_mouse_pickup_trigger() {
        let mut keybinds = default_keybinds();
        keybinds.insert("pickup_trigger".to_string(), "Button.right".to_string());
        let scripts = builtin(&keybinds).unwrap();
        assert!(scripts[2].bindings[0].is_mouse());
    }
}
