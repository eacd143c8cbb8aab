pub mod config;
pub mod error;
pub mod favorites;
pub mod global_event;
pub mod hotkey;
pub mod utils;

pub use config::Config;
pub use error::{Error, MacroResult};
pub use favorites::Favorites;
pub use global_event::{
    Event, EventKind, Point, Recording,
    activity::{Activity, ActivityKind},
    listener::Listener,
    player::{
        CancelSignal, Message, PlaybackOptions, PlaybackOutcome, Player, PlayerState,
        RdevSynthesizer, Synthesizer,
    },
};
pub use hotkey::{Action, HotkeyBindings, KeyCombo};
