//! Persisted macro documents.
//!
//! Version 2 is written; versions 1 and 2 are read. Loading is all-or-nothing:
//! any error leaves the caller with no recording at all.

use std::{
    fs,
    path::Path,
    time::{Duration, SystemTime},
};

use itertools::Itertools;
use log::{debug, info};
use rdev::{Button, Key};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{Error, MacroResult},
    global_event::{Event, EventKind, Point, Recording},
};

pub const CURRENT_VERSION: u64 = 2;
pub const SUPPORTED_VERSIONS: &[u64] = &[1, 2];
const LEGACY_NAME: &str = "untitled";

#[derive(Deserialize)]
struct Header {
    version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DocumentV2 {
    version: u64,
    name: String,
    created_at: SystemTime,
    duration_ns: u64,
    event_count: usize,
    events: Vec<EventV2>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EventV2 {
    offset_ns: u64,
    #[serde(flatten)]
    kind: KindV2,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum KindV2 {
    PointerMove {
        x: f64,
        y: f64,
    },
    ButtonDown {
        button: Button,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<f64>,
    },
    ButtonUp {
        button: Button,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<f64>,
    },
    ScrollDelta {
        dx: i64,
        dy: i64,
    },
    KeyDown {
        key: Key,
    },
    KeyUp {
        key: Key,
    },
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn split(position: Option<Point>) -> (Option<f64>, Option<f64>) {
    match position {
        Some(point) => (Some(point.x), Some(point.y)),
        None => (None, None),
    }
}

fn join(index: usize, x: Option<f64>, y: Option<f64>) -> MacroResult<Option<Point>> {
    match (x, y) {
        (Some(x), Some(y)) => Ok(Some(Point::new(x, y))),
        (None, None) => Ok(None),
        _ => Err(Error::MalformedInput(format!(
            "event {index}: button position needs both x and y"
        ))),
    }
}

impl From<&EventKind> for KindV2 {
    fn from(kind: &EventKind) -> Self {
        match *kind {
            EventKind::PointerMove(point) => KindV2::PointerMove {
                x: point.x,
                y: point.y,
            },
            EventKind::ButtonDown { button, position } => {
                let (x, y) = split(position);
                KindV2::ButtonDown { button, x, y }
            }
            EventKind::ButtonUp { button, position } => {
                let (x, y) = split(position);
                KindV2::ButtonUp { button, x, y }
            }
            EventKind::ScrollDelta { dx, dy } => KindV2::ScrollDelta { dx, dy },
            EventKind::KeyDown(key) => KindV2::KeyDown { key },
            EventKind::KeyUp(key) => KindV2::KeyUp { key },
        }
    }
}

impl KindV2 {
    fn into_kind(self, index: usize) -> MacroResult<EventKind> {
        Ok(match self {
            KindV2::PointerMove { x, y } => EventKind::PointerMove(Point::new(x, y)),
            KindV2::ButtonDown { button, x, y } => EventKind::ButtonDown {
                button,
                position: join(index, x, y)?,
            },
            KindV2::ButtonUp { button, x, y } => EventKind::ButtonUp {
                button,
                position: join(index, x, y)?,
            },
            KindV2::ScrollDelta { dx, dy } => EventKind::ScrollDelta { dx, dy },
            KindV2::KeyDown { key } => EventKind::KeyDown(key),
            KindV2::KeyUp { key } => EventKind::KeyUp(key),
        })
    }
}

fn check_offsets(events: &[Event]) -> MacroResult<()> {
    if let Some(first) = events.first() {
        if first.offset != Duration::ZERO {
            return Err(Error::MalformedInput(format!(
                "first event offset must be zero, got {:?}",
                first.offset
            )));
        }
    }
    if let Some((index, _)) = events
        .iter()
        .tuple_windows()
        .enumerate()
        .find(|(_, (previous, next))| next.offset < previous.offset)
    {
        return Err(Error::MalformedInput(format!(
            "event {} goes back in time",
            index + 1
        )));
    }
    Ok(())
}

fn check_coordinates(events: &[Event]) -> MacroResult<()> {
    match events.iter().position(|event| {
        event
            .kind
            .position()
            .is_some_and(|point| !point.x.is_finite() || !point.y.is_finite())
    }) {
        Some(index) => Err(Error::MalformedInput(format!(
            "event {index} has a non-finite coordinate"
        ))),
        None => Ok(()),
    }
}

pub fn to_value(recording: &Recording) -> MacroResult<Value> {
    check_coordinates(recording.events())?;
    let document = DocumentV2 {
        version: CURRENT_VERSION,
        name: recording.name().to_owned(),
        created_at: recording.created_at(),
        duration_ns: nanos(recording.duration()),
        event_count: recording.len(),
        events: recording
            .events()
            .iter()
            .map(|event| EventV2 {
                offset_ns: nanos(event.offset),
                kind: (&event.kind).into(),
            })
            .collect(),
    };
    serde_json::to_value(document).map_err(|e| Error::MalformedInput(e.to_string()))
}

pub fn from_value(value: Value) -> MacroResult<Recording> {
    let header = Header::deserialize(&value)
        .map_err(|e| Error::MalformedInput(format!("missing or invalid version: {e}")))?;
    let recording = match header.version {
        2 => from_v2(value)?,
        1 => legacy::from_v1(value)?,
        found => {
            return Err(Error::UnsupportedVersion {
                found,
                supported: SUPPORTED_VERSIONS,
            });
        }
    };
    check_offsets(recording.events())?;
    check_coordinates(recording.events())?;
    debug!(
        "Serializer: loaded v{} macro \"{}\" with {} events",
        header.version,
        recording.name(),
        recording.len()
    );
    Ok(recording)
}

fn from_v2(value: Value) -> MacroResult<Recording> {
    let document: DocumentV2 =
        serde_json::from_value(value).map_err(|e| Error::MalformedInput(e.to_string()))?;
    if document.event_count != document.events.len() {
        return Err(Error::MalformedInput(format!(
            "event_count is {} but {} events are present",
            document.event_count,
            document.events.len()
        )));
    }
    let events = document
        .events
        .into_iter()
        .enumerate()
        .map(|(index, event)| {
            Ok(Event::new(
                Duration::from_nanos(event.offset_ns),
                event.kind.into_kind(index)?,
            ))
        })
        .collect::<MacroResult<Vec<_>>>()?;
    let last_offset = events.last().map(|e| nanos(e.offset)).unwrap_or_default();
    if document.duration_ns != last_offset {
        return Err(Error::MalformedInput(format!(
            "duration_ns is {} but the last event is at {last_offset}",
            document.duration_ns
        )));
    }
    check_offsets(&events)?;
    Ok(Recording::new(document.name, document.created_at, events))
}

pub fn save(recording: &Recording) -> MacroResult<Vec<u8>> {
    serde_json::to_vec_pretty(&to_value(recording)?)
        .map_err(|e| Error::MalformedInput(e.to_string()))
}

pub fn load(bytes: &[u8]) -> MacroResult<Recording> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| Error::MalformedInput(e.to_string()))?;
    from_value(value)
}

pub fn save_to_path(recording: &Recording, path: impl AsRef<Path>) -> MacroResult<()> {
    let path = path.as_ref();
    let bytes = save(recording)?;
    fs::write(path, bytes)?;
    info!("Saved {} events to {}", recording.len(), path.display());
    Ok(())
}

pub fn load_from_path(path: impl AsRef<Path>) -> MacroResult<Recording> {
    let path = path.as_ref();
    let recording = load(&fs::read(path)?)?;
    info!("Loaded {} events from {}", recording.len(), path.display());
    Ok(recording)
}

/// Documents written by the first desktop releases: float-second stamps,
/// merged click events and `char:`/`key:` key names.
mod legacy {
    use super::*;

    #[derive(Deserialize)]
    struct DocumentV1 {
        events: Vec<EventV1>,
    }

    #[derive(Deserialize)]
    struct EventV1 {
        t: f64,
        kind: String,
        data: Value,
    }

    #[derive(Deserialize)]
    struct PointData {
        x: f64,
        y: f64,
    }

    #[derive(Deserialize)]
    struct ClickData {
        x: f64,
        y: f64,
        button: String,
        pressed: bool,
    }

    #[derive(Deserialize)]
    struct ScrollData {
        #[serde(default)]
        dx: i64,
        #[serde(default)]
        dy: i64,
    }

    #[derive(Deserialize)]
    struct KeyData {
        key: String,
    }

    fn data<T: serde::de::DeserializeOwned>(index: usize, data: Value) -> MacroResult<T> {
        serde_json::from_value(data)
            .map_err(|e| Error::MalformedInput(format!("event {index}: {e}")))
    }

    fn button(name: &str) -> Button {
        match name {
            "right" => Button::Right,
            "middle" => Button::Middle,
            _ => Button::Left,
        }
    }

    fn char_key(c: char) -> Option<Key> {
        let key = match c.to_ascii_lowercase() {
            'a' => Key::KeyA,
            'b' => Key::KeyB,
            'c' => Key::KeyC,
            'd' => Key::KeyD,
            'e' => Key::KeyE,
            'f' => Key::KeyF,
            'g' => Key::KeyG,
            'h' => Key::KeyH,
            'i' => Key::KeyI,
            'j' => Key::KeyJ,
            'k' => Key::KeyK,
            'l' => Key::KeyL,
            'm' => Key::KeyM,
            'n' => Key::KeyN,
            'o' => Key::KeyO,
            'p' => Key::KeyP,
            'q' => Key::KeyQ,
            'r' => Key::KeyR,
            's' => Key::KeyS,
            't' => Key::KeyT,
            'u' => Key::KeyU,
            'v' => Key::KeyV,
            'w' => Key::KeyW,
            'x' => Key::KeyX,
            'y' => Key::KeyY,
            'z' => Key::KeyZ,
            '0' => Key::Num0,
            '1' => Key::Num1,
            '2' => Key::Num2,
            '3' => Key::Num3,
            '4' => Key::Num4,
            '5' => Key::Num5,
            '6' => Key::Num6,
            '7' => Key::Num7,
            '8' => Key::Num8,
            '9' => Key::Num9,
            '-' => Key::Minus,
            '=' => Key::Equal,
            '[' => Key::LeftBracket,
            ']' => Key::RightBracket,
            ';' => Key::SemiColon,
            '\'' => Key::Quote,
            '\\' => Key::BackSlash,
            ',' => Key::Comma,
            '.' => Key::Dot,
            '/' => Key::Slash,
            '`' => Key::BackQuote,
            ' ' => Key::Space,
            // shifted symbols replay through their US-layout base key
            ')' => Key::Num0,
            '!' => Key::Num1,
            '@' => Key::Num2,
            '#' => Key::Num3,
            '$' => Key::Num4,
            '%' => Key::Num5,
            '^' => Key::Num6,
            '&' => Key::Num7,
            '*' => Key::Num8,
            '(' => Key::Num9,
            '_' => Key::Minus,
            '+' => Key::Equal,
            '{' => Key::LeftBracket,
            '}' => Key::RightBracket,
            ':' => Key::SemiColon,
            '"' => Key::Quote,
            '|' => Key::BackSlash,
            '<' => Key::Comma,
            '>' => Key::Dot,
            '?' => Key::Slash,
            '~' => Key::BackQuote,
            _ => return None,
        };
        Some(key)
    }

    fn named_key(name: &str) -> Option<Key> {
        // virtual-key-only keys are written as `<65>`
        if let Some(code) = name.strip_prefix('<').and_then(|rest| rest.strip_suffix('>')) {
            return code.parse().ok().map(Key::Unknown);
        }
        let name = name.strip_prefix("Key.").unwrap_or(name);
        let key = match name {
            "space" => Key::Space,
            "enter" => Key::Return,
            "esc" => Key::Escape,
            "tab" => Key::Tab,
            "backspace" => Key::Backspace,
            "delete" => Key::Delete,
            "insert" => Key::Insert,
            "home" => Key::Home,
            "end" => Key::End,
            "page_up" => Key::PageUp,
            "page_down" => Key::PageDown,
            "up" => Key::UpArrow,
            "down" => Key::DownArrow,
            "left" => Key::LeftArrow,
            "right" => Key::RightArrow,
            "caps_lock" => Key::CapsLock,
            "shift" | "shift_l" => Key::ShiftLeft,
            "shift_r" => Key::ShiftRight,
            "ctrl" | "ctrl_l" => Key::ControlLeft,
            "ctrl_r" => Key::ControlRight,
            "alt" | "alt_l" => Key::Alt,
            "alt_r" | "alt_gr" => Key::AltGr,
            "cmd" | "cmd_l" => Key::MetaLeft,
            "cmd_r" => Key::MetaRight,
            "f1" => Key::F1,
            "f2" => Key::F2,
            "f3" => Key::F3,
            "f4" => Key::F4,
            "f5" => Key::F5,
            "f6" => Key::F6,
            "f7" => Key::F7,
            "f8" => Key::F8,
            "f9" => Key::F9,
            "f10" => Key::F10,
            "f11" => Key::F11,
            "f12" => Key::F12,
            _ => return None,
        };
        Some(key)
    }

    fn key(index: usize, name: &str) -> MacroResult<Key> {
        let parsed = if let Some(rest) = name.strip_prefix("char:") {
            let mut chars = rest.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => char_key(c),
                _ => None,
            }
        } else {
            name.strip_prefix("key:").and_then(named_key)
        };
        parsed.ok_or_else(|| {
            Error::MalformedInput(format!("event {index}: unknown legacy key \"{name}\""))
        })
    }

    pub(super) fn from_v1(value: Value) -> MacroResult<Recording> {
        let document: DocumentV1 =
            serde_json::from_value(value).map_err(|e| Error::MalformedInput(e.to_string()))?;
        let origin = document.events.first().map(|event| event.t).unwrap_or(0.0);

        let events = document
            .events
            .into_iter()
            .enumerate()
            .map(|(index, event)| {
                let offset = Duration::try_from_secs_f64(event.t - origin).map_err(|_| {
                    Error::MalformedInput(format!("event {index}: invalid time {}", event.t))
                })?;
                let kind = match event.kind.as_str() {
                    "move" => {
                        let PointData { x, y } = data(index, event.data)?;
                        EventKind::PointerMove(Point::new(x, y))
                    }
                    "click" => {
                        let click: ClickData = data(index, event.data)?;
                        let position = Some(Point::new(click.x, click.y));
                        let button = button(&click.button);
                        if click.pressed {
                            EventKind::ButtonDown { button, position }
                        } else {
                            EventKind::ButtonUp { button, position }
                        }
                    }
                    "scroll" => {
                        let ScrollData { dx, dy } = data(index, event.data)?;
                        EventKind::ScrollDelta { dx, dy }
                    }
                    "kpress" => {
                        let KeyData { key: name } = data(index, event.data)?;
                        EventKind::KeyDown(key(index, &name)?)
                    }
                    "krelease" => {
                        let KeyData { key: name } = data(index, event.data)?;
                        EventKind::KeyUp(key(index, &name)?)
                    }
                    other => {
                        return Err(Error::MalformedInput(format!(
                            "event {index}: unknown event kind \"{other}\""
                        )));
                    }
                };
                Ok(Event::new(offset, kind))
            })
            .collect::<MacroResult<Vec<_>>>()?;

        check_offsets(&events)?;
        Ok(Recording::new(LEGACY_NAME, SystemTime::UNIX_EPOCH, events))
    }
}
