//! Pipeline scenario tests
//!
//! Drives the pure engine components (queue, cursor, geometry) together with
//! a scripted entropy source and explicit clock values, the way the main
//! loop does.

use wl_cloak::cursor::CursorState;
use wl_cloak::geometry::{GapPolicy, GlobalSpace};
use wl_cloak::random::EntropySource;
use wl_cloak::scheduler::{ForwardAction, MotionCadence, ObfuscationQueue, ScrollAxis, ScrollSource};

/// Entropy source replaying a fixed script, clamped into the asked range.
struct ScriptedEntropy {
    values: Vec<u64>,
    next: usize,
}

impl ScriptedEntropy {
    fn new(values: &[u64]) -> Self {
        Self {
            values: values.to_vec(),
            next: 0,
        }
    }
}

impl EntropySource for ScriptedEntropy {
    fn fill_bytes(&mut self, buf: &mut [u8]) {
        buf.fill(0xAA);
    }

    fn uniform(&mut self, lo: u64, hi: u64) -> u64 {
        let value = self.values[self.next % self.values.len()];
        self.next += 1;
        value.clamp(lo, hi)
    }
}

fn space_with(outputs: &[(u32, i32, i32, i32, i32)]) -> GlobalSpace {
    let mut space = GlobalSpace::new();
    for &(name, x, y, w, h) in outputs {
        space.register_output(name);
        space.set_position(name, x, y);
        space.set_size(name, w, h);
        space.mark_done(name, GapPolicy::Strict).unwrap();
    }
    space
}

#[test]
fn single_output_typing_is_delayed_verbatim() {
    // A key press at t=0 and release at t=10, delays sampling to 50:
    // the compositor sees the pair at t=50 and t=60
    let mut queue = ObfuscationQueue::new(100);
    let mut entropy = ScriptedEntropy::new(&[50]);

    queue.enqueue(ForwardAction::Key { code: 30, pressed: true }, 0, &mut entropy);
    queue.enqueue(ForwardAction::Key { code: 30, pressed: false }, 10, &mut entropy);

    let mut emitted = Vec::new();
    for now in 0..=200u64 {
        while let Some(entry) = queue.pop_due(now) {
            emitted.push((now, entry.action));
        }
    }

    assert_eq!(
        emitted,
        vec![
            (50, ForwardAction::Key { code: 30, pressed: true }),
            (60, ForwardAction::Key { code: 30, pressed: false }),
        ]
    );
}

#[test]
fn back_pressure_lifts_later_events_to_the_floor() {
    // First click draws the whole budget; the next two must not release
    // before it even though their samples say "immediately"
    let mut queue = ObfuscationQueue::new(100);
    let mut entropy = ScriptedEntropy::new(&[100, 0, 0]);

    let releases: Vec<u64> = (0..3)
        .map(|i| {
            queue.enqueue(
                ForwardAction::Button { code: 272, pressed: i % 2 == 0 },
                i as u64,
                &mut entropy,
            )
        })
        .collect();
    assert_eq!(releases, vec![100, 100, 100]);

    let mut order = Vec::new();
    while let Some(entry) = queue.pop_due(100) {
        order.push(entry.action);
    }
    assert_eq!(
        order,
        vec![
            ForwardAction::Button { code: 272, pressed: true },
            ForwardAction::Button { code: 272, pressed: false },
            ForwardAction::Button { code: 272, pressed: true },
        ]
    );
}

#[test]
fn emission_order_matches_physical_order() {
    // Mixed event kinds with adversarial delay samples: the emitted
    // sub-sequence must equal the physical sub-sequence
    let physical = vec![
        ForwardAction::Key { code: 30, pressed: true },
        ForwardAction::Button { code: 272, pressed: true },
        ForwardAction::Scroll {
            source: ScrollSource::Wheel,
            axis: ScrollAxis::Vertical,
            value: 15.0,
        },
        ForwardAction::Button { code: 272, pressed: false },
        ForwardAction::Key { code: 30, pressed: false },
        ForwardAction::Scroll {
            source: ScrollSource::Finger,
            axis: ScrollAxis::Horizontal,
            value: 0.0,
        },
    ];

    let mut queue = ObfuscationQueue::new(100);
    let mut entropy = ScriptedEntropy::new(&[97, 3, 0, 55, 1, 88]);
    for (i, action) in physical.iter().enumerate() {
        queue.enqueue(action.clone(), i as u64, &mut entropy);
    }

    let mut emitted = Vec::new();
    let mut now = 0;
    while !queue.is_empty() {
        while let Some(entry) = queue.pop_due(now) {
            assert!(entry.release_ms <= now);
            emitted.push(entry.action);
        }
        now += 1;
    }
    assert_eq!(emitted, physical);
}

#[test]
fn release_times_stay_within_the_budget() {
    let mut queue = ObfuscationQueue::new(100);
    let mut entropy = ScriptedEntropy::new(&[0, 33, 100, 7, 99, 62]);
    let mut now = 5;
    for code in 0..50 {
        let release = queue.enqueue(ForwardAction::Key { code, pressed: true }, now, &mut entropy);
        assert!(release >= now, "release before enqueue time");
        assert!(release <= now + 100, "release beyond the delay ceiling");
        now += 3;
    }
}

#[test]
fn edge_glide_across_half_height_output() {
    // Left output 100x100 at (0,0); right output 100x50 at (100,50).
    // A straight move from (50,25) to (150,25) passes through the void
    // above the right output and must get stuck at the left edge.
    let space = space_with(&[(1, 0, 0, 100, 100), (2, 100, 50, 100, 50)]);
    let mut cursor = CursorState::new();
    cursor.apply_absolute(&space, 50.0, 25.0);
    assert_eq!((cursor.x, cursor.y), (50.0, 25.0));

    cursor.apply_relative(&space, 100.0, 0.0);
    assert_eq!((cursor.x, cursor.y), (99.0, 25.0));
    assert_eq!(cursor.local(&space).unwrap().output, 1);
}

#[test]
fn output_removal_snaps_cursor_to_survivor() {
    let mut space = space_with(&[(1, 0, 0, 1920, 1080), (2, 1920, 0, 1280, 720)]);
    let mut cursor = CursorState::new();
    cursor.apply_absolute(&space, 2500.0, 400.0);
    assert_eq!(cursor.local(&space).unwrap().output, 2);

    space.unregister_output(2);
    assert!(cursor.ensure_on_output(&space));
    let local = cursor.local(&space).unwrap();
    assert_eq!(local.output, 1);
    assert_eq!((local.x, local.y), (0, 0));
}

#[test]
fn virtual_cursor_cadence_is_decoupled_from_queue() {
    let mut cadence = MotionCadence::new(100);
    let mut queue = ObfuscationQueue::new(100);
    let mut entropy = ScriptedEntropy::new(&[70, 20]);

    // The queue sampling does not consume the cadence's draw and vice versa
    cadence.resample(0, &mut entropy);
    assert_eq!(cadence.next_move(), 70);
    let release = queue.enqueue(ForwardAction::Key { code: 1, pressed: true }, 0, &mut entropy);
    assert_eq!(release, 20);
    assert!(!cadence.due(69));
    assert!(cadence.due(70));
}

#[test]
fn poll_deadline_inputs_are_consistent() {
    // The main loop polls until min(next_release, next_move); verify the
    // two sources agree on who is earliest under scripted samples
    let mut cadence = MotionCadence::new(100);
    let mut queue = ObfuscationQueue::new(100);
    let mut entropy = ScriptedEntropy::new(&[40, 90]);

    cadence.resample(10, &mut entropy);
    queue.enqueue(ForwardAction::Button { code: 272, pressed: true }, 10, &mut entropy);

    let next_move = cadence.next_move();
    let next_release = queue.next_release().unwrap();
    assert_eq!(next_move, 50);
    assert_eq!(next_release, 100);
    assert_eq!(next_move.min(next_release), 50);
}
