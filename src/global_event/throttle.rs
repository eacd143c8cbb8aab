use std::time::Duration;

use crate::global_event::Point;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(15);
pub const DEFAULT_MIN_DISTANCE: f64 = 4.0;

/// Coalesces pointer-move samples. Only pointer moves go through here.
#[derive(Debug, Clone)]
pub struct MoveThrottle {
    min_interval: Duration,
    min_distance: f64,
    last_admitted: Option<(Duration, Point)>,
}

impl Default for MoveThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL, DEFAULT_MIN_DISTANCE)
    }
}

impl MoveThrottle {
    pub fn new(min_interval: Duration, min_distance: f64) -> Self {
        Self {
            min_interval,
            min_distance: min_distance.max(0.0),
            last_admitted: None,
        }
    }

    pub fn reset(&mut self) {
        self.last_admitted = None;
    }

    /// Admits the sample when enough time passed or the pointer moved far enough
    /// since the last admitted sample.
    pub fn admit(&mut self, offset: Duration, position: Point) -> bool {
        let admitted = match self.last_admitted {
            None => true,
            Some((last_offset, last_position)) => {
                offset.saturating_sub(last_offset) >= self.min_interval
                    || position.distance(&last_position) > self.min_distance
            }
        };
        if admitted {
            self.last_admitted = Some((offset, position));
        }
        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn burst_within_interval_and_distance_admits_one() {
        let mut throttle = MoveThrottle::default();
        let admitted = (0..50)
            .filter(|i| {
                let jiggle = (*i % 3) as f64;
                throttle.admit(
                    Duration::from_micros(*i as u64 * 200),
                    Point::new(100.0 + jiggle, 100.0 - jiggle),
                )
            })
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn elapsed_interval_admits_even_without_motion() {
        let mut throttle = MoveThrottle::default();
        assert!(throttle.admit(ms(0), Point::new(5.0, 5.0)));
        assert!(!throttle.admit(ms(14), Point::new(5.0, 5.0)));
        assert!(throttle.admit(ms(15), Point::new(5.0, 5.0)));
    }

    #[test]
    fn large_jump_is_admitted_before_interval() {
        let mut throttle = MoveThrottle::default();
        assert!(throttle.admit(ms(0), Point::new(0.0, 0.0)));
        assert!(!throttle.admit(ms(1), Point::new(3.0, 0.0)));
        assert!(throttle.admit(ms(2), Point::new(40.0, 0.0)));
        // distance is measured from the last admitted sample
        assert!(!throttle.admit(ms(3), Point::new(42.0, 1.0)));
    }

    #[test]
    fn reset_forgets_previous_session() {
        let mut throttle = MoveThrottle::default();
        assert!(throttle.admit(ms(100), Point::new(1.0, 1.0)));
        throttle.reset();
        assert!(throttle.admit(ms(0), Point::new(1.0, 1.0)));
    }
}
