use std::time::Duration;

use easy_ext::ext;
use futures::channel::mpsc::{TrySendError, UnboundedSender};
use rand::Rng;

use crate::global_event::Point;

#[derive(Debug)]
pub enum SendError<T> {
    NoSender,
    InnerError(TrySendError<T>),
}

#[ext(SenderOption)]
impl<T> Option<UnboundedSender<T>> {
    pub fn try_send(&self, t: T) -> Result<(), SendError<T>> {
        if let Some(sender) = self {
            sender.unbounded_send(t).map_err(SendError::InnerError)
        } else {
            Err(SendError::NoSender)
        }
    }
}

#[ext(DurationExt)]
impl Duration {
    /// Divides by a positive speed factor, saturating instead of overflowing.
    pub fn scaled_by_speed(self, speed: f64) -> Duration {
        Duration::try_from_secs_f64(self.as_secs_f64() / speed).unwrap_or(Duration::MAX)
    }
}

/// Pixel extent of the active display; coordinates live in `[0, size - 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayBounds {
    pub width: f64,
    pub height: f64,
}

impl DisplayBounds {
    pub fn clamp(&self, point: Point) -> Point {
        Point::new(
            point.x.clamp(0.0, (self.width - 1.0).max(0.0)),
            point.y.clamp(0.0, (self.height - 1.0).max(0.0)),
        )
    }
}

/// Shifts x and y independently by up to `radius`, then clamps to `bounds`.
pub fn jitter_point<R: Rng + ?Sized>(
    rng: &mut R,
    point: Point,
    radius: f64,
    bounds: Option<DisplayBounds>,
) -> Point {
    let jittered = if radius > 0.0 {
        Point::new(
            point.x + rng.gen_range(-1.0..=1.0_f64) * radius,
            point.y + rng.gen_range(-1.0..=1.0_f64) * radius,
        )
    } else {
        point
    };
    match bounds {
        Some(bounds) => bounds.clamp(jittered),
        None => jittered,
    }
}
