use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use futures::channel::mpsc::UnboundedSender;
use log::{debug, error, info, trace, warn};
use rand::{SeedableRng, rngs::StdRng};
use rdev::EventType;
use smol::{
    Timer,
    channel::{Receiver, Sender, bounded},
};

use crate::{
    error::{Error, MacroResult},
    global_event::{
        EventKind, Point, Recording,
        activity::{Activity, ActivityKind},
    },
    utils::{DisplayBounds, DurationExt, SenderOption, jitter_point},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackOptions {
    pub speed: f64,
    /// Number of passes; zero repeats until cancelled.
    pub loops: u32,
    pub jitter_radius: f64,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            loops: 1,
            jitter_radius: 0.0,
        }
    }
}

impl PlaybackOptions {
    pub fn validate(&self) -> MacroResult<()> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(Error::InvalidSpeed(self.speed));
        }
        if !self.jitter_radius.is_finite() || self.jitter_radius < 0.0 {
            return Err(Error::InvalidJitter(self.jitter_radius));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    StateChanged(PlayerState),
    JustPlayed { pass: u32, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed { passes: u32, dispatched: usize },
    Stopped { passes: u32, dispatched: usize },
}

/// Cross-thread stop request. Setting it also wakes a pending inter-event wait.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
        while self.wake_rx.try_recv().is_ok() {}
    }

    async fn woken(&self) {
        let _ = self.wake_rx.recv().await;
    }
}

/// Sleeps until `deadline` (forever when `None`). Returns true if cancelled first.
async fn wait_until(deadline: Option<Instant>, cancel: &CancelSignal) -> bool {
    loop {
        if cancel.is_cancelled() {
            return true;
        }
        match deadline {
            Some(deadline) if Instant::now() >= deadline => return false,
            Some(deadline) => {
                let timed_out = smol::future::or(
                    async {
                        Timer::at(deadline).await;
                        true
                    },
                    async {
                        cancel.woken().await;
                        false
                    },
                )
                .await;
                if timed_out {
                    return cancel.is_cancelled();
                }
            }
            None => cancel.woken().await,
        }
    }
}

/// OS-facing side of playback.
pub trait Synthesizer {
    fn display_bounds(&self) -> Option<DisplayBounds>;

    fn dispatch(&mut self, kind: &EventKind) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct RdevSynthesizer {
    bounds: Option<DisplayBounds>,
    last_pointer: Option<Point>,
}

impl Default for RdevSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RdevSynthesizer {
    pub fn new() -> Self {
        let bounds = match rdev::display_size() {
            Ok((width, height)) => Some(DisplayBounds {
                width: width as f64,
                height: height as f64,
            }),
            Err(err) => {
                warn!("Player: display size unavailable, coordinates will not be clamped: {err:?}");
                None
            }
        };
        Self {
            bounds,
            last_pointer: None,
        }
    }

    fn move_to(&mut self, point: Point) -> EventType {
        self.last_pointer = Some(point);
        EventType::MouseMove {
            x: point.x,
            y: point.y,
        }
    }

    /// OS events for one recorded event. A positioned button only moves the
    /// pointer first when it is not already where the last event left it.
    fn os_events(&mut self, kind: &EventKind) -> Vec<EventType> {
        let mut events = Vec::with_capacity(2);
        match *kind {
            EventKind::PointerMove(point) => events.push(self.move_to(point)),
            EventKind::ButtonDown { button, position }
            | EventKind::ButtonUp { button, position } => {
                if let Some(point) = position.filter(|point| self.last_pointer != Some(*point)) {
                    events.push(self.move_to(point));
                }
                events.push(match kind {
                    EventKind::ButtonDown { .. } => EventType::ButtonPress(button),
                    _ => EventType::ButtonRelease(button),
                });
            }
            EventKind::ScrollDelta { dx, dy } => events.push(EventType::Wheel {
                delta_x: dx,
                delta_y: dy,
            }),
            EventKind::KeyDown(key) => events.push(EventType::KeyPress(key)),
            EventKind::KeyUp(key) => events.push(EventType::KeyRelease(key)),
        }
        events
    }
}

impl Synthesizer for RdevSynthesizer {
    fn display_bounds(&self) -> Option<DisplayBounds> {
        self.bounds
    }

    fn dispatch(&mut self, kind: &EventKind) -> Result<(), String> {
        for event_type in self.os_events(kind) {
            rdev::simulate(&event_type).map_err(|err| format!("{err:?}"))?;
        }
        Ok(())
    }
}

pub struct Player<S> {
    synthesizer: S,
    activity: Activity,
    rng: StdRng,
    state: PlayerState,
    progress: Option<UnboundedSender<Message>>,
}

impl<S: Synthesizer> Player<S> {
    pub fn new(synthesizer: S, activity: Activity) -> Self {
        Self {
            synthesizer,
            activity,
            rng: StdRng::from_entropy(),
            state: PlayerState::Idle,
            progress: None,
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_progress(mut self, progress: UnboundedSender<Message>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn synthesizer(&self) -> &S {
        &self.synthesizer
    }

    fn transition(&mut self, state: PlayerState) {
        info!("Player: {:?} -> {:?}", self.state, state);
        self.state = state;
        let _ = self.progress.try_send(Message::StateChanged(state));
    }

    fn jittered(&mut self, kind: EventKind, radius: f64, bounds: Option<DisplayBounds>) -> EventKind {
        match kind.position() {
            Some(point) => kind.with_position(jitter_point(&mut self.rng, point, radius, bounds)),
            None => kind,
        }
    }

    pub fn play_blocking(
        &mut self,
        recording: &Recording,
        options: &PlaybackOptions,
        cancel: &CancelSignal,
    ) -> MacroResult<PlaybackOutcome> {
        smol::block_on(self.play(recording, options, cancel))
    }

    pub async fn play(
        &mut self,
        recording: &Recording,
        options: &PlaybackOptions,
        cancel: &CancelSignal,
    ) -> MacroResult<PlaybackOutcome> {
        options.validate()?;
        let _guard = self.activity.try_acquire(ActivityKind::Playback)?;
        if recording.is_empty() {
            info!("Player: nothing to play");
            return Ok(PlaybackOutcome::Completed {
                passes: 0,
                dispatched: 0,
            });
        }

        self.transition(PlayerState::Playing);
        let result = self.perform_playback(recording, options, cancel).await;
        match &result {
            Ok(PlaybackOutcome::Stopped { .. }) => self.transition(PlayerState::Stopped),
            Ok(PlaybackOutcome::Completed { passes, dispatched }) => {
                info!("Player: playback done ({passes} passes, {dispatched} events)")
            }
            Err(err) => error!("Player: playback halted: {err}"),
        }
        self.transition(PlayerState::Idle);
        result
    }

    async fn perform_playback(
        &mut self,
        recording: &Recording,
        options: &PlaybackOptions,
        cancel: &CancelSignal,
    ) -> MacroResult<PlaybackOutcome> {
        let bounds = self.synthesizer.display_bounds();
        let origin = recording.events()[0].offset;
        let mut passes = 0;
        let mut dispatched = 0;

        while options.loops == 0 || passes < options.loops {
            // Deadlines hang off the pass start so per-event overhead never accumulates.
            let pass_start = Instant::now();
            for (index, event) in recording.events().iter().enumerate() {
                let delay = event.offset.saturating_sub(origin).scaled_by_speed(options.speed);
                if wait_until(pass_start.checked_add(delay), cancel).await {
                    info!("Player: cancelled before event {index} of pass {passes}");
                    return Ok(PlaybackOutcome::Stopped { passes, dispatched });
                }

                let kind = self.jittered(event.kind, options.jitter_radius, bounds);
                self.synthesizer
                    .dispatch(&kind)
                    .map_err(|reason| Error::SynthesisFailure {
                        index,
                        event: format!("{kind:?}"),
                        reason,
                    })?;
                dispatched += 1;
                trace!("Player: played {index} {kind:?}");
                let _ = self.progress.try_send(Message::JustPlayed {
                    pass: passes,
                    index,
                });
            }
            passes = passes.saturating_add(1);
            debug!("Player: pass {passes} finished");
        }

        Ok(PlaybackOutcome::Completed { passes, dispatched })
    }
}
