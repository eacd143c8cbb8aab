use std::time::{Duration, Instant, SystemTime};

use log::{debug, error, info, trace, warn};
use rdev::{EventType, Key};
use smol::channel::{Receiver, Sender, unbounded};

use crate::{
    config::CaptureSettings,
    error::{Error, MacroResult},
    global_event::{
        Event, EventKind, Point, Recording, RecordingBuilder,
        activity::{Activity, ActivityGuard, ActivityKind},
        throttle::MoveThrottle,
    },
    hotkey::{Action, HeldKeys, HotkeyBindings, HotkeyDispatcher},
};

/// How long `Listener::spawn` waits for the OS hook to be refused before assuming it runs.
const LISTEN_PROBE: Duration = Duration::from_millis(200);

/// A global input notification, stamped with the monotonic clock on arrival.
#[derive(Debug, Clone, Copy)]
pub struct RawInput {
    pub at: Instant,
    pub event_type: EventType,
}

impl RawInput {
    pub fn new(at: Instant, event_type: EventType) -> Self {
        Self { at, event_type }
    }
}

#[derive(Debug)]
struct Session {
    started_at: Instant,
    last_offset: Duration,
    builder: RecordingBuilder,
}

/// Turns raw notifications into a recording. Owned by a single writer.
#[derive(Debug)]
pub struct CaptureEngine {
    settings: CaptureSettings,
    bindings: HotkeyBindings,
    held: HeldKeys,
    suppressed: Vec<Key>,
    last_position: Option<Point>,
    throttle: MoveThrottle,
    session: Option<Session>,
}

impl CaptureEngine {
    pub fn new(settings: CaptureSettings, bindings: HotkeyBindings) -> Self {
        Self {
            throttle: settings.throttle(),
            settings,
            bindings,
            held: HeldKeys::default(),
            suppressed: Vec::new(),
            last_position: None,
            session: None,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.session.is_some()
    }

    pub fn set_bindings(&mut self, bindings: HotkeyBindings) {
        self.bindings = bindings;
    }

    pub fn set_settings(&mut self, settings: CaptureSettings) {
        self.settings = settings;
    }

    pub fn start(&mut self, name: impl Into<String>, at: Instant) -> MacroResult<()> {
        if self.session.is_some() {
            return Err(Error::AlreadyActive(ActivityKind::Capture));
        }
        self.throttle = self.settings.throttle();
        self.session = Some(Session {
            started_at: at,
            last_offset: Duration::ZERO,
            builder: RecordingBuilder::new(name, SystemTime::now()),
        });
        info!("Capture: started with {:?}", self.settings);
        Ok(())
    }

    pub fn stop(&mut self) -> MacroResult<Recording> {
        let session = self.session.take().ok_or(Error::NotActive)?;
        let recording = session.builder.finish();
        info!(
            "Capture: stopped with {} events over {:?}",
            recording.len(),
            recording.duration()
        );
        Ok(recording)
    }

    /// Single intake point for raw notifications. Returns whether an event was appended.
    pub fn intake(&mut self, raw: RawInput) -> bool {
        let is_control = self.track_control_keys(&raw.event_type);
        if let EventType::MouseMove { x, y } = raw.event_type {
            self.last_position = Some(Point::new(x, y));
        }

        let Some(session) = &mut self.session else {
            return false;
        };
        if raw.at < session.started_at {
            trace!("Capture: dropping notification from before start");
            return false;
        }
        if is_control {
            trace!("Capture: excluding control key {:?}", raw.event_type);
            return false;
        }

        let offset = raw
            .at
            .duration_since(session.started_at)
            .max(session.last_offset);
        let kind = match raw.event_type {
            EventType::MouseMove { x, y } => {
                let position = Point::new(x, y);
                if !self.settings.track_mouse || !self.throttle.admit(offset, position) {
                    return false;
                }
                EventKind::PointerMove(position)
            }
            EventType::ButtonPress(button) => EventKind::ButtonDown {
                button,
                position: self.last_position,
            },
            EventType::ButtonRelease(button) => EventKind::ButtonUp {
                button,
                position: self.last_position,
            },
            EventType::Wheel { delta_x, delta_y } => EventKind::ScrollDelta {
                dx: delta_x,
                dy: delta_y,
            },
            EventType::KeyPress(key) => EventKind::KeyDown(key),
            EventType::KeyRelease(key) => EventKind::KeyUp(key),
        };
        let tracked = if kind.is_pointer() {
            self.settings.track_mouse
        } else {
            self.settings.track_keys
        };
        if !tracked {
            return false;
        }

        session.last_offset = offset;
        session.builder.push(Event::new(offset, kind));
        true
    }

    /// Keeps held-key state current and reports whether the notification belongs
    /// to a bound control combo. A trigger excluded on press stays excluded until released.
    fn track_control_keys(&mut self, event_type: &EventType) -> bool {
        match *event_type {
            EventType::KeyPress(key) => {
                if self.suppressed.contains(&key) {
                    return true;
                }
                if self.held.press(key) && self.bindings.triggered_by(key, &self.held).is_some() {
                    self.suppressed.push(key);
                    return true;
                }
                false
            }
            EventType::KeyRelease(key) => {
                self.held.release(key);
                let before = self.suppressed.len();
                self.suppressed.retain(|suppressed| *suppressed != key);
                self.suppressed.len() != before
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
pub enum Raw {
    Input(RawInput),
    ListenFailed(String),
}

pub enum Command {
    StartCapture {
        name: String,
        reply: oneshot::Sender<MacroResult<()>>,
    },
    StopCapture {
        reply: oneshot::Sender<MacroResult<Recording>>,
    },
    IsCapturing {
        reply: oneshot::Sender<MacroResult<bool>>,
    },
    UpdateBindings {
        bindings: HotkeyBindings,
        reply: oneshot::Sender<MacroResult<()>>,
    },
    UpdateSettings {
        settings: CaptureSettings,
        reply: oneshot::Sender<MacroResult<()>>,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::StartCapture { name, .. } => write!(f, "StartCapture({name:?})"),
            Command::StopCapture { .. } => write!(f, "StopCapture"),
            Command::IsCapturing { .. } => write!(f, "IsCapturing"),
            Command::UpdateBindings { bindings, .. } => write!(f, "UpdateBindings({bindings:?})"),
            Command::UpdateSettings { settings, .. } => write!(f, "UpdateSettings({settings:?})"),
        }
    }
}

enum Incoming {
    Raw(Option<Raw>),
    Command(Option<Command>),
}

struct Worker {
    engine: CaptureEngine,
    dispatcher: HotkeyDispatcher,
    activity: Activity,
    guard: Option<ActivityGuard>,
    failure: Option<String>,
    action_tx: Sender<Action>,
}

impl Worker {
    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartCapture { name, reply } => {
                let _ = reply.send(self.start_capture(name));
            }
            Command::StopCapture { reply } => {
                let result = self.engine.stop();
                self.guard = None;
                let _ = reply.send(result);
            }
            Command::IsCapturing { reply } => {
                let _ = reply.send(Ok(self.engine.is_capturing()));
            }
            Command::UpdateBindings { bindings, reply } => {
                self.dispatcher.set_bindings(bindings);
                self.engine.set_bindings(self.dispatcher.bindings().clone());
                let _ = reply.send(Ok(()));
            }
            Command::UpdateSettings { settings, reply } => {
                self.engine.set_settings(settings);
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn start_capture(&mut self, name: String) -> MacroResult<()> {
        if let Some(reason) = &self.failure {
            return Err(Error::PermissionDenied(reason.clone()));
        }
        let guard = self.activity.try_acquire(ActivityKind::Capture)?;
        self.engine.start(name, Instant::now())?;
        self.guard = Some(guard);
        Ok(())
    }

    fn on_input(&mut self, raw: RawInput) {
        if let Some(action) = self.dispatcher.on_input(&raw.event_type) {
            debug!("Listener: hotkey for {action}");
            if self.action_tx.try_send(action).is_err() {
                warn!("Listener: nobody is listening for {action}");
            }
        }
        self.engine.intake(raw);
    }

    async fn run(mut self, raw_rx: Receiver<Raw>, command_rx: Receiver<Command>) {
        let mut raw_open = true;
        loop {
            // Raw notifications are polled first so a stop never overtakes queued input.
            let incoming = if raw_open {
                smol::future::or(
                    async { Incoming::Raw(raw_rx.recv().await.ok()) },
                    async { Incoming::Command(command_rx.recv().await.ok()) },
                )
                .await
            } else {
                Incoming::Command(command_rx.recv().await.ok())
            };

            match incoming {
                Incoming::Raw(Some(Raw::Input(raw))) => self.on_input(raw),
                Incoming::Raw(Some(Raw::ListenFailed(reason))) => {
                    error!("Listener: OS input hook failed: {reason}");
                    self.failure = Some(reason);
                }
                Incoming::Raw(None) => {
                    warn!("Listener: raw input source closed");
                    raw_open = false;
                }
                Incoming::Command(Some(command)) => {
                    trace!("Listener command: {command:?}");
                    self.handle_command(command);
                }
                Incoming::Command(None) => {
                    info!("Listener: handle dropped, worker exiting");
                    return;
                }
            }
        }
    }
}

/// Handle to the global input listener and its capture worker.
#[derive(Debug)]
pub struct Listener {
    command_tx: Sender<Command>,
    action_rx: Receiver<Action>,
}

impl Listener {
    /// Installs the OS-wide input hook. Fails with `PermissionDenied` when the hook is refused.
    pub fn spawn(
        settings: CaptureSettings,
        bindings: HotkeyBindings,
        activity: Activity,
    ) -> MacroResult<Self> {
        let (raw_tx, raw_rx) = unbounded();
        let (probe_tx, probe_rx) = oneshot::channel::<String>();

        std::thread::Builder::new()
            .name("replaykey-listen".into())
            .spawn(move || {
                let callback_tx = raw_tx.clone();
                let result = rdev::listen(move |event| {
                    let raw = RawInput::new(Instant::now(), event.event_type);
                    let _ = callback_tx.try_send(Raw::Input(raw));
                });
                if let Err(err) = result {
                    let reason = format!("{err:?}");
                    let _ = probe_tx.send(reason.clone());
                    let _ = raw_tx.try_send(Raw::ListenFailed(reason));
                }
            })?;

        match probe_rx.recv_timeout(LISTEN_PROBE) {
            Ok(reason) => return Err(Error::PermissionDenied(reason)),
            Err(oneshot::RecvTimeoutError::Disconnected) => {
                return Err(Error::PermissionDenied(
                    "input hook exited immediately".into(),
                ));
            }
            Err(oneshot::RecvTimeoutError::Timeout) => {
                debug!("Listener: OS input hook installed");
            }
        }

        Self::with_source(raw_rx, settings, bindings, activity)
    }

    /// Runs the capture worker over any raw notification source.
    pub fn with_source(
        raw_rx: Receiver<Raw>,
        settings: CaptureSettings,
        bindings: HotkeyBindings,
        activity: Activity,
    ) -> MacroResult<Self> {
        bindings.validate()?;
        let (command_tx, command_rx) = unbounded();
        let (action_tx, action_rx) = unbounded();
        let worker = Worker {
            engine: CaptureEngine::new(settings, bindings.clone()),
            dispatcher: HotkeyDispatcher::new(bindings),
            activity,
            guard: None,
            failure: None,
            action_tx,
        };
        std::thread::Builder::new()
            .name("replaykey-capture".into())
            .spawn(move || smol::block_on(worker.run(raw_rx, command_rx)))?;
        Ok(Self {
            command_tx,
            action_rx,
        })
    }

    fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<MacroResult<T>>) -> Command,
    ) -> MacroResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send_blocking(command(reply_tx))
            .map_err(|_| Error::Disconnected)?;
        reply_rx.recv().map_err(|_| Error::Disconnected)?
    }

    pub fn start_capture(&self, name: impl Into<String>) -> MacroResult<()> {
        let name = name.into();
        self.request(|reply| Command::StartCapture { name, reply })
    }

    pub fn stop_capture(&self) -> MacroResult<Recording> {
        self.request(|reply| Command::StopCapture { reply })
    }

    pub fn is_capturing(&self) -> MacroResult<bool> {
        self.request(|reply| Command::IsCapturing { reply })
    }

    /// Rebinds hotkeys and the capture exclusion set together.
    pub fn update_bindings(&self, bindings: HotkeyBindings) -> MacroResult<()> {
        bindings.validate()?;
        self.request(|reply| Command::UpdateBindings { bindings, reply })
    }

    pub fn update_settings(&self, settings: CaptureSettings) -> MacroResult<()> {
        self.request(|reply| Command::UpdateSettings { settings, reply })
    }

    /// Hotkey triggers, in the order they were pressed.
    pub fn actions(&self) -> &Receiver<Action> {
        &self.action_rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::KeyCombo;
    use rdev::Button;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn engine() -> CaptureEngine {
        CaptureEngine::new(CaptureSettings::default(), HotkeyBindings::default())
    }

    #[test]
    fn offsets_are_monotonic_and_rebased() {
        let mut engine = engine();
        let start = Instant::now();
        engine.start("test", start).unwrap();
        let inputs = [
            (ms(20), EventType::KeyPress(Key::KeyA)),
            (ms(35), EventType::KeyRelease(Key::KeyA)),
            // delivered late with an older stamp
            (ms(30), EventType::KeyPress(Key::KeyB)),
            (ms(60), EventType::Wheel {
                delta_x: 0,
                delta_y: 2,
            }),
        ];
        for (at, event_type) in inputs {
            assert!(engine.intake(RawInput::new(start + at, event_type)));
        }
        let recording = engine.stop().unwrap();
        let offsets: Vec<_> = recording.events().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![ms(0), ms(15), ms(15), ms(40)]);
        assert!(offsets.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn pointer_burst_is_throttled_but_buttons_are_not() {
        let mut engine = engine();
        let start = Instant::now();
        engine.start("test", start).unwrap();
        for i in 0..20u64 {
            let step = (i % 2) as f64;
            engine.intake(RawInput::new(
                start + Duration::from_micros(i * 300),
                EventType::MouseMove {
                    x: 50.0 + step,
                    y: 50.0,
                },
            ));
        }
        assert!(engine.intake(RawInput::new(start + ms(7), EventType::ButtonPress(Button::Left))));
        assert!(engine.intake(RawInput::new(start + ms(8), EventType::ButtonRelease(Button::Left))));
        let recording = engine.stop().unwrap();

        let moves = recording
            .events()
            .iter()
            .filter(|e| matches!(e.kind, EventKind::PointerMove(_)))
            .count();
        assert_eq!(moves, 1);
        assert_eq!(
            recording.events()[1].kind,
            EventKind::ButtonDown {
                button: Button::Left,
                position: Some(Point::new(51.0, 50.0)),
            }
        );
    }

    #[test]
    fn control_keys_never_reach_the_recording() {
        let bindings = HotkeyBindings {
            play: KeyCombo::with_modifiers([Key::ControlLeft], Key::KeyP),
            ..Default::default()
        };
        let mut engine = CaptureEngine::new(CaptureSettings::default(), bindings);
        let start = Instant::now();

        // the record trigger is pressed before the session starts and released during it
        engine.intake(RawInput::new(start, EventType::KeyPress(Key::F3)));
        engine.start("test", start + ms(1)).unwrap();
        let inputs = [
            EventType::KeyRelease(Key::F3),
            EventType::KeyPress(Key::KeyP),
            EventType::KeyRelease(Key::KeyP),
            EventType::KeyPress(Key::ControlLeft),
            EventType::KeyPress(Key::KeyP),
            EventType::KeyPress(Key::KeyP),
            EventType::KeyRelease(Key::KeyP),
            EventType::KeyRelease(Key::ControlLeft),
            EventType::KeyPress(Key::Escape),
            EventType::KeyRelease(Key::Escape),
        ];
        for (i, event_type) in inputs.into_iter().enumerate() {
            engine.intake(RawInput::new(start + ms(2 + i as u64), event_type));
        }
        let recording = engine.stop().unwrap();
        let kinds: Vec<_> = recording.events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::KeyDown(Key::KeyP),
                EventKind::KeyUp(Key::KeyP),
                EventKind::KeyDown(Key::ControlLeft),
                EventKind::KeyUp(Key::ControlLeft),
            ]
        );
    }

    #[test]
    fn tracking_toggles_filter_kinds() {
        let settings = CaptureSettings {
            track_mouse: false,
            ..Default::default()
        };
        let mut engine = CaptureEngine::new(settings, HotkeyBindings::default());
        let start = Instant::now();
        engine.start("keys only", start).unwrap();
        assert!(!engine.intake(RawInput::new(start, EventType::MouseMove { x: 1.0, y: 1.0 })));
        assert!(!engine.intake(RawInput::new(start, EventType::ButtonPress(Button::Left))));
        assert!(!engine.intake(RawInput::new(start, EventType::Wheel {
            delta_x: 1,
            delta_y: 0
        })));
        assert!(engine.intake(RawInput::new(start, EventType::KeyPress(Key::KeyQ))));
        assert_eq!(engine.stop().unwrap().len(), 1);
    }

    #[test]
    fn session_lifecycle_errors() {
        let mut engine = engine();
        assert!(matches!(engine.stop(), Err(Error::NotActive)));
        let start = Instant::now();
        engine.start("a", start).unwrap();
        assert!(matches!(
            engine.start("b", start),
            Err(Error::AlreadyActive(ActivityKind::Capture))
        ));
        assert_eq!(engine.stop().unwrap().name(), "a");
        assert!(!engine.is_capturing());
    }

    #[test]
    fn notifications_outside_a_session_are_ignored() {
        let mut engine = engine();
        assert!(!engine.intake(RawInput::new(Instant::now(), EventType::KeyPress(Key::KeyA))));
        engine.start("late", Instant::now() + ms(50)).unwrap();
        assert!(!engine.intake(RawInput::new(Instant::now(), EventType::KeyPress(Key::KeyB))));
        assert!(engine.stop().unwrap().is_empty());
    }

    fn press(raw_tx: &Sender<Raw>, event_type: EventType) {
        raw_tx
            .send_blocking(Raw::Input(RawInput::new(Instant::now(), event_type)))
            .unwrap();
    }

    #[test]
    fn listener_worker_records_and_dispatches_hotkeys() {
        let (raw_tx, raw_rx) = unbounded();
        let activity = Activity::new();
        let listener = Listener::with_source(
            raw_rx,
            CaptureSettings::default(),
            HotkeyBindings::default(),
            activity.clone(),
        )
        .unwrap();

        listener.start_capture("worker").unwrap();
        assert!(listener.is_capturing().unwrap());
        assert_eq!(activity.current(), Some(ActivityKind::Capture));
        assert!(matches!(
            listener.start_capture("again"),
            Err(Error::AlreadyActive(ActivityKind::Capture))
        ));

        press(&raw_tx, EventType::KeyPress(Key::KeyH));
        press(&raw_tx, EventType::KeyRelease(Key::KeyH));
        press(&raw_tx, EventType::KeyPress(Key::F3));
        press(&raw_tx, EventType::KeyRelease(Key::F3));

        assert_eq!(
            listener.actions().recv_blocking().unwrap(),
            Action::ToggleRecord
        );
        let recording = listener.stop_capture().unwrap();
        assert_eq!(recording.name(), "worker");
        assert_eq!(
            recording.events().iter().map(|e| e.kind).collect::<Vec<_>>(),
            vec![EventKind::KeyDown(Key::KeyH), EventKind::KeyUp(Key::KeyH)]
        );
        assert_eq!(activity.current(), None);
        assert!(matches!(listener.stop_capture(), Err(Error::NotActive)));
    }

    #[test]
    fn listener_worker_follows_rebinding() {
        let (raw_tx, raw_rx) = unbounded();
        let listener = Listener::with_source(
            raw_rx,
            CaptureSettings::default(),
            HotkeyBindings::default(),
            Activity::new(),
        )
        .unwrap();
        let bindings = HotkeyBindings {
            record: KeyCombo::single(Key::F9),
            ..Default::default()
        };
        listener.update_bindings(bindings).unwrap();
        listener.start_capture("rebound").unwrap();

        press(&raw_tx, EventType::KeyPress(Key::F3));
        press(&raw_tx, EventType::KeyRelease(Key::F3));
        press(&raw_tx, EventType::KeyPress(Key::F9));
        press(&raw_tx, EventType::KeyRelease(Key::F9));

        assert_eq!(
            listener.actions().recv_blocking().unwrap(),
            Action::ToggleRecord
        );
        let recording = listener.stop_capture().unwrap();
        assert_eq!(
            recording.events().iter().map(|e| e.kind).collect::<Vec<_>>(),
            vec![EventKind::KeyDown(Key::F3), EventKind::KeyUp(Key::F3)]
        );

        let duplicate = HotkeyBindings {
            play: KeyCombo::single(Key::F9),
            record: KeyCombo::single(Key::F9),
            ..Default::default()
        };
        assert!(matches!(
            listener.update_bindings(duplicate),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn listener_worker_applies_tracking_changes_mid_session() {
        let (raw_tx, raw_rx) = unbounded();
        let listener = Listener::with_source(
            raw_rx,
            CaptureSettings::default(),
            HotkeyBindings::default(),
            Activity::new(),
        )
        .unwrap();
        listener.start_capture("toggled").unwrap();

        press(&raw_tx, EventType::MouseMove { x: 10.0, y: 10.0 });
        listener
            .update_settings(CaptureSettings {
                track_mouse: false,
                ..Default::default()
            })
            .unwrap();
        press(&raw_tx, EventType::MouseMove { x: 200.0, y: 200.0 });
        press(&raw_tx, EventType::ButtonPress(Button::Left));
        press(&raw_tx, EventType::KeyPress(Key::KeyH));
        press(&raw_tx, EventType::KeyPress(Key::F3));

        assert_eq!(
            listener.actions().recv_blocking().unwrap(),
            Action::ToggleRecord
        );
        let recording = listener.stop_capture().unwrap();
        assert_eq!(
            recording.events().iter().map(|e| e.kind).collect::<Vec<_>>(),
            vec![
                EventKind::PointerMove(Point::new(10.0, 10.0)),
                EventKind::KeyDown(Key::KeyH),
            ]
        );
    }

    #[test]
    fn listener_refuses_capture_while_playing_or_after_hook_failure() {
        let (raw_tx, raw_rx) = unbounded();
        let activity = Activity::new();
        let listener = Listener::with_source(
            raw_rx,
            CaptureSettings::default(),
            HotkeyBindings::default(),
            activity.clone(),
        )
        .unwrap();

        let playback = activity.try_acquire(ActivityKind::Playback).unwrap();
        assert!(matches!(
            listener.start_capture("blocked"),
            Err(Error::AlreadyActive(ActivityKind::Playback))
        ));
        drop(playback);

        raw_tx
            .send_blocking(Raw::ListenFailed("EventTapError".into()))
            .unwrap();
        // the failure is queued ahead of the command, so it is seen first
        assert!(matches!(
            listener.start_capture("denied"),
            Err(Error::PermissionDenied(reason)) if reason == "EventTapError"
        ));
    }
}
