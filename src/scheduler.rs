//! Obfuscation scheduler
//!
//! Keystroke and mouse dynamics identify users by inter-event timing alone.
//! The queue below breaks that channel: every user-visible event is held
//! back by a delay drawn uniformly from a bounded window, so what the
//! compositor observes is the event sequence with its timing re-randomized.
//!
//! Ordering is preserved by construction. The lower bound of each delay
//! window is the previous event's release time, so release timestamps are
//! monotone non-decreasing; a burst of rapid physical events gets spread
//! out, never compressed or reordered. The upper bound caps worst-case
//! latency at `max_delay_ms`.
//!
//! Motion is handled differently: it updates the internal cursor immediately
//! and the virtual pointer position is published on its own randomized
//! cadence ([`MotionCadence`]). A consequence is that the compositor can see
//! a motion before a still-delayed button that physically preceded it;
//! carrying motion through the queue would need events that capture full
//! motion state and would add the queue latency to the crosshair.

use std::collections::VecDeque;

use tracing::trace;

use crate::random::EntropySource;

/// Scroll hardware source, forwarded to the compositor verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollSource {
    /// Detented mouse wheel.
    Wheel,
    /// Touchpad two-finger scroll.
    Finger,
    /// Continuous device.
    Continuous,
}

/// Scroll direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAxis {
    /// Up/down.
    Vertical,
    /// Left/right.
    Horizontal,
}

/// A physical event deferred for later emission.
///
/// Codes are evdev codes; both libinput and the virtual-device protocols
/// speak them, so they pass through untranslated.
#[derive(Debug, Clone, PartialEq)]
pub enum ForwardAction {
    /// Pointer button press or release.
    Button {
        /// evdev button code (BTN_LEFT = 272, ...).
        code: u32,
        /// Pressed or released.
        pressed: bool,
    },
    /// Scroll step; a value of exactly 0.0 is an axis-stop.
    Scroll {
        /// Hardware source.
        source: ScrollSource,
        /// Direction.
        axis: ScrollAxis,
        /// Scroll distance; 0.0 terminates kinetic scrolling.
        value: f64,
    },
    /// Keyboard key press or release.
    Key {
        /// evdev keycode.
        code: u32,
        /// Pressed or released.
        pressed: bool,
    },
}

/// A queued action tagged with its release time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledAction {
    /// The deferred event.
    pub action: ForwardAction,
    /// Monotonic time at which it becomes visible, in ms.
    pub release_ms: u64,
}

/// FIFO delay queue with monotone non-decreasing release times.
#[derive(Debug)]
pub struct ObfuscationQueue {
    queue: VecDeque<ScheduledAction>,
    prev_release_ms: u64,
    max_delay_ms: u64,
}

impl ObfuscationQueue {
    /// Empty queue with the given latency ceiling.
    pub fn new(max_delay_ms: u64) -> Self {
        Self {
            queue: VecDeque::new(),
            prev_release_ms: 0,
            max_delay_ms,
        }
    }

    /// Assign a release time and enqueue. Returns the release time.
    ///
    /// The delay is drawn uniformly from
    /// `[clamp(prev_release - now, 0, max_delay), max_delay]`, inclusive.
    pub fn enqueue(
        &mut self,
        action: ForwardAction,
        now_ms: u64,
        entropy: &mut dyn EntropySource,
    ) -> u64 {
        let lower = self
            .prev_release_ms
            .saturating_sub(now_ms)
            .min(self.max_delay_ms);
        let delay = entropy.uniform(lower, self.max_delay_ms);
        let release_ms = now_ms + delay;
        trace!(?action, now_ms, delay, release_ms, "event deferred");
        self.queue.push_back(ScheduledAction { action, release_ms });
        self.prev_release_ms = release_ms;
        release_ms
    }

    /// Pop the head entry if its release time has arrived.
    ///
    /// Call in a loop each iteration to sweep everything due.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<ScheduledAction> {
        if self.queue.front()?.release_ms <= now_ms {
            self.queue.pop_front()
        } else {
            None
        }
    }

    /// Release time of the head entry.
    pub fn next_release(&self) -> Option<u64> {
        self.queue.front().map(|entry| entry.release_ms)
    }

    /// Number of events still held back.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is held back.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// The virtual pointer's publication schedule.
///
/// The position shown to the compositor is refreshed at uniformly random
/// intervals within the delay budget, decoupling the emitted motion cadence
/// from the user's hand.
#[derive(Debug)]
pub struct MotionCadence {
    next_move_ms: u64,
    max_delay_ms: u64,
}

impl MotionCadence {
    /// Cadence that fires immediately on first poll.
    pub fn new(max_delay_ms: u64) -> Self {
        Self {
            next_move_ms: 0,
            max_delay_ms,
        }
    }

    /// True when a virtual-pointer position refresh is due.
    pub fn due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_move_ms
    }

    /// Next scheduled refresh time.
    pub fn next_move(&self) -> u64 {
        self.next_move_ms
    }

    /// Draw the next refresh time from `[now, now + max_delay]`.
    pub fn resample(&mut self, now_ms: u64, entropy: &mut dyn EntropySource) {
        self.next_move_ms = now_ms + entropy.uniform(0, self.max_delay_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a scripted value per call, clamped into the requested range.
    struct Scripted {
        values: Vec<u64>,
        next: usize,
    }

    impl Scripted {
        fn new(values: &[u64]) -> Self {
            Self {
                values: values.to_vec(),
                next: 0,
            }
        }
    }

    impl EntropySource for Scripted {
        fn fill_bytes(&mut self, buf: &mut [u8]) {
            buf.fill(0);
        }

        fn uniform(&mut self, lo: u64, hi: u64) -> u64 {
            let value = self.values[self.next % self.values.len()];
            self.next += 1;
            value.clamp(lo, hi)
        }
    }

    fn key(code: u32, pressed: bool) -> ForwardAction {
        ForwardAction::Key { code, pressed }
    }

    #[test]
    fn key_pair_is_shifted_by_sampled_delay() {
        let mut queue = ObfuscationQueue::new(100);
        let mut entropy = Scripted::new(&[50]);

        assert_eq!(queue.enqueue(key(30, true), 0, &mut entropy), 50);
        assert_eq!(queue.enqueue(key(30, false), 10, &mut entropy), 60);

        assert!(queue.pop_due(49).is_none());
        let press = queue.pop_due(50).unwrap();
        assert_eq!(press.action, key(30, true));
        assert!(queue.pop_due(50).is_none());
        let release = queue.pop_due(60).unwrap();
        assert_eq!(release.action, key(30, false));
    }

    #[test]
    fn floor_lifts_bursts_to_previous_release() {
        let mut queue = ObfuscationQueue::new(100);
        let mut entropy = Scripted::new(&[100, 0, 0]);

        let r1 = queue.enqueue(ForwardAction::Button { code: 272, pressed: true }, 0, &mut entropy);
        let r2 = queue.enqueue(ForwardAction::Button { code: 272, pressed: false }, 1, &mut entropy);
        let r3 = queue.enqueue(ForwardAction::Button { code: 272, pressed: true }, 2, &mut entropy);

        assert_eq!((r1, r2, r3), (100, 100, 100));
    }

    #[test]
    fn release_times_are_monotone_for_any_sample() {
        let mut queue = ObfuscationQueue::new(100);
        // Adversarial samples: big, then repeatedly tiny
        let mut entropy = Scripted::new(&[90, 0, 3, 0, 77, 0]);
        let mut now = 0;
        let mut releases = Vec::new();
        for i in 0..20 {
            releases.push(queue.enqueue(key(i, true), now, &mut entropy));
            now += 2;
        }
        assert!(releases.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn delay_is_bounded_by_ceiling() {
        let mut queue = ObfuscationQueue::new(100);
        let mut entropy = Scripted::new(&[u64::MAX]);
        let release = queue.enqueue(key(1, true), 5, &mut entropy);
        assert_eq!(release, 105);
    }

    #[test]
    fn delay_is_never_negative() {
        let mut queue = ObfuscationQueue::new(100);
        let mut entropy = Scripted::new(&[0]);
        let release = queue.enqueue(key(1, true), 42, &mut entropy);
        assert!(release >= 42);
    }

    #[test]
    fn sweep_drains_in_insertion_order() {
        let mut queue = ObfuscationQueue::new(100);
        let mut entropy = Scripted::new(&[10]);
        for code in 0..5 {
            queue.enqueue(key(code, true), 0, &mut entropy);
        }
        let mut drained = Vec::new();
        while let Some(entry) = queue.pop_due(1000) {
            drained.push(entry.action);
        }
        assert_eq!(drained, (0..5).map(|c| key(c, true)).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn next_release_reports_head() {
        let mut queue = ObfuscationQueue::new(100);
        let mut entropy = Scripted::new(&[30, 60]);
        assert_eq!(queue.next_release(), None);
        queue.enqueue(key(1, true), 0, &mut entropy);
        queue.enqueue(key(1, false), 0, &mut entropy);
        assert_eq!(queue.next_release(), Some(30));
    }

    #[test]
    fn cadence_fires_then_waits() {
        let mut cadence = MotionCadence::new(100);
        let mut entropy = Scripted::new(&[40]);
        assert!(cadence.due(0));
        cadence.resample(10, &mut entropy);
        assert_eq!(cadence.next_move(), 50);
        assert!(!cadence.due(49));
        assert!(cadence.due(50));
    }
}
