use std::{
    ops::Range,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};

pub mod activity;
pub mod listener;
pub mod player;
pub mod serializer;
pub mod throttle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind {
    PointerMove(Point),
    /// Position is the last pointer position seen before the press, if any.
    ButtonDown {
        button: rdev::Button,
        position: Option<Point>,
    },
    ButtonUp {
        button: rdev::Button,
        position: Option<Point>,
    },
    ScrollDelta {
        dx: i64,
        dy: i64,
    },
    KeyDown(rdev::Key),
    KeyUp(rdev::Key),
}

impl EventKind {
    pub fn position(&self) -> Option<Point> {
        match self {
            EventKind::PointerMove(point) => Some(*point),
            EventKind::ButtonDown { position, .. } | EventKind::ButtonUp { position, .. } => {
                *position
            }
            _ => None,
        }
    }

    pub fn with_position(self, point: Point) -> Self {
        match self {
            EventKind::PointerMove(_) => EventKind::PointerMove(point),
            EventKind::ButtonDown {
                button,
                position: Some(_),
            } => EventKind::ButtonDown {
                button,
                position: Some(point),
            },
            EventKind::ButtonUp {
                button,
                position: Some(_),
            } => EventKind::ButtonUp {
                button,
                position: Some(point),
            },
            other => other,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            EventKind::PointerMove(_)
                | EventKind::ButtonDown { .. }
                | EventKind::ButtonUp { .. }
                | EventKind::ScrollDelta { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    /// Elapsed time since the first event of the recording.
    pub offset: Duration,
    pub kind: EventKind,
}

impl Event {
    pub fn new(offset: Duration, kind: EventKind) -> Self {
        Self { offset, kind }
    }
}

/// Immutable, ordered sequence of events plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    name: String,
    created_at: SystemTime,
    events: Vec<Event>,
}

impl Recording {
    /// Offsets must already be non-decreasing.
    pub fn new(name: impl Into<String>, created_at: SystemTime, events: Vec<Event>) -> Self {
        debug_assert!(
            events.windows(2).all(|pair| pair[0].offset <= pair[1].offset),
            "recording offsets must be non-decreasing"
        );
        Self {
            name: name.into(),
            created_at,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn get(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.events
            .last()
            .map(|event| event.offset)
            .unwrap_or_default()
    }

    pub fn renamed(&self, name: impl Into<String>) -> Recording {
        Recording {
            name: name.into(),
            ..self.clone()
        }
    }

    /// New recording holding the events in `range`, rebased so the first offset is zero.
    pub fn trimmed(&self, range: Range<usize>) -> Recording {
        let end = range.end.min(self.events.len());
        let start = range.start.min(end);
        let selected = &self.events[start..end];
        let origin = selected
            .first()
            .map(|event| event.offset)
            .unwrap_or_default();
        Recording::new(
            self.name.clone(),
            self.created_at,
            selected
                .iter()
                .map(|event| Event::new(event.offset - origin, event.kind))
                .collect(),
        )
    }
}

/// Append-only buffer owned by the capture engine while a session runs.
#[derive(Debug)]
pub struct RecordingBuilder {
    name: String,
    created_at: SystemTime,
    events: Vec<Event>,
}

impl RecordingBuilder {
    pub fn new(name: impl Into<String>, created_at: SystemTime) -> Self {
        Self {
            name: name.into(),
            created_at,
            events: Vec::new(),
        }
    }

    pub fn push(&mut self, event: Event) {
        debug_assert!(
            self.events
                .last()
                .is_none_or(|last| last.offset <= event.offset),
            "appended event goes back in time"
        );
        self.events.push(event);
    }

    /// Freezes the buffer, shifting offsets so the first event sits at zero.
    pub fn finish(self) -> Recording {
        let origin = self
            .events
            .first()
            .map(|event| event.offset)
            .unwrap_or_default();
        let events = self
            .events
            .into_iter()
            .map(|event| Event::new(event.offset - origin, event.kind))
            .collect();
        Recording::new(self.name, self.created_at, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn sample() -> Recording {
        Recording::new(
            "sample",
            SystemTime::UNIX_EPOCH,
            vec![
                Event::new(ms(0), EventKind::PointerMove(Point::new(10.0, 10.0))),
                Event::new(ms(40), EventKind::KeyDown(rdev::Key::KeyA)),
                Event::new(ms(90), EventKind::KeyUp(rdev::Key::KeyA)),
                Event::new(ms(150), EventKind::ScrollDelta { dx: 0, dy: -1 }),
            ],
        )
    }

    #[test]
    fn metadata_follows_events() {
        let recording = sample();
        assert_eq!(recording.len(), 4);
        assert_eq!(recording.duration(), ms(150));
        assert_eq!(recording.get(1).map(|e| e.kind), Some(EventKind::KeyDown(rdev::Key::KeyA)));
        assert!(recording.get(4).is_none());

        let empty = Recording::new("empty", SystemTime::UNIX_EPOCH, Vec::new());
        assert!(empty.is_empty());
        assert_eq!(empty.duration(), Duration::ZERO);
    }

    #[test]
    fn trimming_rebases_offsets_and_leaves_original_alone() {
        let recording = sample();
        let trimmed = recording.trimmed(1..3);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed.events()[0].offset, Duration::ZERO);
        assert_eq!(trimmed.events()[1].offset, ms(50));
        assert_eq!(recording.len(), 4);

        assert!(recording.trimmed(10..20).is_empty());
    }

    #[test]
    fn builder_rebases_to_first_event() {
        let mut builder = RecordingBuilder::new("capture", SystemTime::UNIX_EPOCH);
        builder.push(Event::new(ms(30), EventKind::KeyDown(rdev::Key::Space)));
        builder.push(Event::new(ms(80), EventKind::KeyUp(rdev::Key::Space)));
        let recording = builder.finish();
        assert_eq!(recording.events()[0].offset, Duration::ZERO);
        assert_eq!(recording.duration(), ms(50));
        assert_eq!(recording.name(), "capture");
    }

    #[test]
    fn position_replacement_keeps_unknown_positions_unknown() {
        let click = EventKind::ButtonDown {
            button: rdev::Button::Left,
            position: None,
        };
        assert_eq!(click.with_position(Point::new(1.0, 1.0)), click);

        let moved = EventKind::PointerMove(Point::new(0.0, 0.0)).with_position(Point::new(3.0, 4.0));
        assert_eq!(moved.position(), Some(Point::new(3.0, 4.0)));
    }
}
