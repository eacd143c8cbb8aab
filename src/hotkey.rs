use std::{fmt::Display, str::FromStr};

use itertools::Itertools;
use log::{debug, trace};
use rdev::{EventType, Key};
use serde::{Deserialize, Serialize};

use crate::error::{Error, MacroResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ToggleRecord,
    TogglePlay,
    Save,
    Load,
    StopPlayback,
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::ToggleRecord => write!(f, "record"),
            Action::TogglePlay => write!(f, "play"),
            Action::Save => write!(f, "save"),
            Action::Load => write!(f, "load"),
            Action::StopPlayback => write!(f, "stop playback"),
        }
    }
}

/// Held modifiers followed by a trigger key, written `ControlLeft+F8`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyCombo {
    pub modifiers: Vec<Key>,
    pub key: Key,
}

impl KeyCombo {
    pub fn single(key: Key) -> Self {
        Self {
            modifiers: Vec::new(),
            key,
        }
    }

    pub fn with_modifiers(modifiers: impl IntoIterator<Item = Key>, key: Key) -> Self {
        Self {
            modifiers: modifiers.into_iter().collect(),
            key,
        }
    }

    pub fn is_triggered_by(&self, key: Key, held: &HeldKeys) -> bool {
        self.key == key && self.modifiers.iter().all(|modifier| held.contains(*modifier))
    }
}

fn key_name(key: Key) -> String {
    match serde_json::to_value(key) {
        Ok(serde_json::Value::String(name)) => name,
        _ => format!("{key:?}"),
    }
}

fn parse_key(name: &str) -> MacroResult<Key> {
    if let Some(code) = name
        .strip_prefix("Unknown(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return code
            .parse()
            .map(Key::Unknown)
            .map_err(|_| Error::Config(format!("invalid key code in \"{name}\"")));
    }
    serde_json::from_value(serde_json::Value::String(name.to_owned()))
        .map_err(|_| Error::Config(format!("unknown key \"{name}\"")))
}

impl Display for KeyCombo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let combo = self
            .modifiers
            .iter()
            .chain(std::iter::once(&self.key))
            .map(|key| key_name(*key))
            .join("+");
        write!(f, "{combo}")
    }
}

impl FromStr for KeyCombo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut keys = s
            .split('+')
            .map(str::trim)
            .map(|name| {
                if name.is_empty() {
                    Err(Error::Config(format!("empty key in combo \"{s}\"")))
                } else {
                    parse_key(name)
                }
            })
            .collect::<MacroResult<Vec<_>>>()?;
        let key = keys
            .pop()
            .ok_or_else(|| Error::Config("empty key combo".into()))?;
        Ok(Self {
            modifiers: keys,
            key,
        })
    }
}

impl TryFrom<String> for KeyCombo {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyCombo> for String {
    fn from(combo: KeyCombo) -> Self {
        combo.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyBindings {
    pub record: KeyCombo,
    pub play: KeyCombo,
    pub save: KeyCombo,
    pub load: KeyCombo,
    pub stop_playback: KeyCombo,
}

impl Default for HotkeyBindings {
    fn default() -> Self {
        Self {
            record: KeyCombo::single(Key::F3),
            play: KeyCombo::single(Key::F7),
            save: KeyCombo::single(Key::F4),
            load: KeyCombo::single(Key::F6),
            stop_playback: KeyCombo::single(Key::Escape),
        }
    }
}

impl HotkeyBindings {
    pub fn iter(&self) -> impl Iterator<Item = (Action, &KeyCombo)> {
        [
            (Action::ToggleRecord, &self.record),
            (Action::TogglePlay, &self.play),
            (Action::Save, &self.save),
            (Action::Load, &self.load),
            (Action::StopPlayback, &self.stop_playback),
        ]
        .into_iter()
    }

    pub fn validate(&self) -> MacroResult<()> {
        let duplicates = self
            .iter()
            .map(|(_, combo)| combo.to_string())
            .duplicates()
            .collect_vec();
        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "hotkeys bound to more than one action: {}",
                duplicates.join(", ")
            )))
        }
    }

    /// Most specific binding fired by pressing `key` while `held` keys are down.
    pub fn triggered_by(&self, key: Key, held: &HeldKeys) -> Option<(Action, &KeyCombo)> {
        self.iter()
            .filter(|(_, combo)| combo.is_triggered_by(key, held))
            .max_by_key(|(_, combo)| combo.modifiers.len())
    }
}

/// Keys currently held down, in press order.
#[derive(Debug, Clone, Default)]
pub struct HeldKeys(Vec<Key>);

impl HeldKeys {
    /// Returns false for auto-repeat presses of an already held key.
    pub fn press(&mut self, key: Key) -> bool {
        if self.contains(key) {
            false
        } else {
            self.0.push(key);
            true
        }
    }

    pub fn release(&mut self, key: Key) {
        self.0.retain(|held| *held != key);
    }

    pub fn contains(&self, key: Key) -> bool {
        self.0.contains(&key)
    }
}

/// Turns global key notifications into application actions.
#[derive(Debug, Default)]
pub struct HotkeyDispatcher {
    bindings: HotkeyBindings,
    held: HeldKeys,
}

impl HotkeyDispatcher {
    pub fn new(bindings: HotkeyBindings) -> Self {
        Self {
            bindings,
            held: HeldKeys::default(),
        }
    }

    pub fn bindings(&self) -> &HotkeyBindings {
        &self.bindings
    }

    pub fn set_bindings(&mut self, bindings: HotkeyBindings) {
        debug!("Hotkeys: bindings set to {bindings:?}");
        self.bindings = bindings;
    }

    pub fn on_input(&mut self, event_type: &EventType) -> Option<Action> {
        match event_type {
            EventType::KeyPress(key) => {
                if !self.held.press(*key) {
                    return None;
                }
                let (action, _) = self.bindings.triggered_by(*key, &self.held)?;
                trace!("Hotkeys: {key:?} triggered {action}");
                Some(action)
            }
            EventType::KeyRelease(key) => {
                self.held.release(*key);
                None
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combos_round_trip_through_their_names() {
        let combo: KeyCombo = "ControlLeft + ShiftLeft+F8".parse().unwrap();
        assert_eq!(
            combo,
            KeyCombo::with_modifiers([Key::ControlLeft, Key::ShiftLeft], Key::F8)
        );
        assert_eq!(combo.to_string(), "ControlLeft+ShiftLeft+F8");
        assert_eq!(
            "Unknown(172)".parse::<KeyCombo>().unwrap(),
            KeyCombo::single(Key::Unknown(172))
        );

        assert!("NotAKey".parse::<KeyCombo>().is_err());
        assert!("F8+".parse::<KeyCombo>().is_err());
    }

    #[test]
    fn duplicate_bindings_are_rejected() {
        let mut bindings = HotkeyBindings::default();
        assert!(bindings.validate().is_ok());
        bindings.save = KeyCombo::single(Key::F3);
        let err = bindings.validate().unwrap_err();
        assert!(err.to_string().contains("F3"));
    }

    #[test]
    fn dispatcher_fires_on_press_edge_only() {
        let mut dispatcher = HotkeyDispatcher::default();
        assert_eq!(
            dispatcher.on_input(&EventType::KeyPress(Key::F3)),
            Some(Action::ToggleRecord)
        );
        // auto-repeat
        assert_eq!(dispatcher.on_input(&EventType::KeyPress(Key::F3)), None);
        assert_eq!(dispatcher.on_input(&EventType::KeyRelease(Key::F3)), None);
        assert_eq!(
            dispatcher.on_input(&EventType::KeyPress(Key::F3)),
            Some(Action::ToggleRecord)
        );
        assert_eq!(dispatcher.on_input(&EventType::KeyPress(Key::KeyA)), None);
    }

    #[test]
    fn dispatcher_requires_modifiers_and_prefers_specific_combos() {
        let bindings = HotkeyBindings {
            play: KeyCombo::with_modifiers([Key::ControlLeft], Key::F3),
            ..Default::default()
        };
        let mut dispatcher = HotkeyDispatcher::new(bindings);

        assert_eq!(
            dispatcher.on_input(&EventType::KeyPress(Key::F3)),
            Some(Action::ToggleRecord)
        );
        dispatcher.on_input(&EventType::KeyRelease(Key::F3));

        dispatcher.on_input(&EventType::KeyPress(Key::ControlLeft));
        assert_eq!(
            dispatcher.on_input(&EventType::KeyPress(Key::F3)),
            Some(Action::TogglePlay)
        );

        dispatcher.set_bindings(HotkeyBindings::default());
        assert_eq!(dispatcher.bindings(), &HotkeyBindings::default());
    }

    #[test]
    fn bindings_deserialize_with_defaults_for_missing_actions() {
        let bindings: HotkeyBindings =
            serde_json::from_str(r#"{ "record": "Alt+KeyR" }"#).unwrap();
        assert_eq!(
            bindings.record,
            KeyCombo::with_modifiers([Key::Alt], Key::KeyR)
        );
        assert_eq!(bindings.stop_playback, KeyCombo::single(Key::Escape));
    }
}
