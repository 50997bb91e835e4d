//! Shared millisecond clock and the local timeline.
//!
//! Both are plain values owned by the context handed to the controller;
//! nothing here is global.  Time advances with `tokio::time::Instant`, so
//! tests running on a paused runtime see a deterministic clock.

use std::sync::Mutex;

use tokio::time::Instant;

use crate::command::TimelineState;

/// Millisecond clock kept in step with the controller's.
#[derive(Debug)]
pub struct ControllerClock {
    anchor: Mutex<(Instant, u64)>,
}

impl ControllerClock {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(millis: u64) -> Self {
        Self {
            anchor: Mutex::new((Instant::now(), millis)),
        }
    }

    pub fn millis(&self) -> u64 {
        let (at, base) = *self.anchor.lock().unwrap_or_else(|e| e.into_inner());
        base + at.elapsed().as_millis() as u64
    }

    pub fn set_millis(&self, millis: u64) {
        *self.anchor.lock().unwrap_or_else(|e| e.into_inner()) = (Instant::now(), millis);
    }
}

impl Default for ControllerClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Local copy of the show timeline.
///
/// While running, the position moves with the clock; while paused it holds.
#[derive(Debug, Default)]
pub struct Timeline {
    inner: Mutex<TimelineState>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position at clock time `clock_ms`.
    pub fn millis_at(&self, clock_ms: u64) -> i32 {
        let state = *self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if state.paused {
            return state.millis;
        }
        let elapsed = clock_ms.saturating_sub(state.clock_ms).min(i32::MAX as u64) as i32;
        state.millis.saturating_add(elapsed)
    }

    pub fn state(&self) -> TimelineState {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, state: TimelineState) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn pause(&self, clock_ms: u64) {
        let millis = self.millis_at(clock_ms);
        self.set(TimelineState {
            clock_ms,
            millis,
            paused: true,
        });
    }

    pub fn unpause(&self, clock_ms: u64) {
        let millis = self.millis_at(clock_ms);
        self.set(TimelineState {
            clock_ms,
            millis,
            paused: false,
        });
    }

    /// Back to zero and paused.
    pub fn erase(&self) {
        self.set(TimelineState {
            clock_ms: 0,
            millis: 0,
            paused: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn clock_follows_runtime_time() {
        let clock = ControllerClock::starting_at(1_000);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(clock.millis(), 1_250);
        clock.set_millis(10);
        assert_eq!(clock.millis(), 10);
    }

    #[test]
    fn paused_timeline_holds_its_position() {
        let timeline = Timeline::new();
        timeline.set(TimelineState {
            clock_ms: 100,
            millis: 40,
            paused: false,
        });
        assert_eq!(timeline.millis_at(160), 100);
        timeline.pause(160);
        assert_eq!(timeline.millis_at(10_000), 100);
        timeline.unpause(10_000);
        assert_eq!(timeline.millis_at(10_005), 105);
    }

    #[test]
    fn erase_resets_to_paused_zero() {
        let timeline = Timeline::new();
        timeline.set(TimelineState {
            clock_ms: 5,
            millis: 999,
            paused: false,
        });
        timeline.erase();
        assert_eq!(timeline.state(), TimelineState { clock_ms: 0, millis: 0, paused: true });
    }
}
