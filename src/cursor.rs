//! Logical cursor and path-clamped motion
//!
//! The daemon owns the real cursor position; the compositor only ever sees
//! the virtual pointer. Motion is applied here immediately (the on-screen
//! crosshair must not lag), while the position the compositor sees is
//! emitted on the scheduler's randomized cadence.
//!
//! Multi-output layouts need not be rectangular, so a straight motion can
//! cross a pixel no output covers. The glide walk below keeps the cursor on
//! the covered union by sliding it along the edge instead: the offending
//! axis of motion is frozen and the walk continues in the orthogonal one.

use tracing::trace;

use crate::geometry::{GlobalSpace, LocalCoord};

/// Logical absolute cursor position in global-space pixels.
#[derive(Debug, Clone, Default)]
pub struct CursorState {
    /// Current position.
    pub x: f64,
    /// Current position.
    pub y: f64,
    /// Position before the most recent motion, start of the glide walk.
    pub prev_x: f64,
    /// Position before the most recent motion, start of the glide walk.
    pub prev_y: f64,
}

impl CursorState {
    /// Cursor at the global origin.
    pub fn new() -> Self {
        Self::default()
    }

    /// The output-local coordinate currently under the cursor.
    pub fn local(&self, space: &GlobalSpace) -> Option<LocalCoord> {
        space.abs_to_local(self.x.floor() as i32, self.y.floor() as i32)
    }

    /// The output-local coordinate under the pre-motion position.
    pub fn prev_local(&self, space: &GlobalSpace) -> Option<LocalCoord> {
        space.abs_to_local(self.prev_x.floor() as i32, self.prev_y.floor() as i32)
    }

    /// Apply an absolute motion already normalized to the global box.
    pub fn apply_absolute(&mut self, space: &GlobalSpace, abs_x: f64, abs_y: f64) {
        self.prev_x = self.x;
        self.prev_y = self.y;
        self.x = clamp_to_box(abs_x, space.global_width);
        self.y = clamp_to_box(abs_y, space.global_height);
        self.glide(space);
    }

    /// Apply a relative delta, clamped to the global bounding box.
    pub fn apply_relative(&mut self, space: &GlobalSpace, dx: f64, dy: f64) {
        self.prev_x = self.x;
        self.prev_y = self.y;
        self.x = clamp_to_box(self.x + dx, space.global_width);
        self.y = clamp_to_box(self.y + dy, space.global_height);
        self.glide(space);
    }

    /// Re-home the cursor if its position no longer lies on any output.
    ///
    /// Returns true when the cursor was moved.
    pub fn ensure_on_output(&mut self, space: &GlobalSpace) -> bool {
        if self.local(space).is_some() {
            return false;
        }
        let Some((x, y)) = space.any_origin() else {
            return false;
        };
        self.x = x as f64;
        self.y = y as f64;
        self.prev_x = self.x;
        self.prev_y = self.y;
        true
    }

    /// Clamp the freshly assigned position to the covered union by walking
    /// the pixel path from the previous position.
    fn glide(&mut self, space: &GlobalSpace) {
        let start = (self.prev_x.floor() as i32, self.prev_y.floor() as i32);
        let end = (self.x.floor() as i32, self.y.floor() as i32);

        if space.abs_to_local(start.0, start.1).is_none() {
            // The previous position is stale (an output vanished under it);
            // the caller re-homes via ensure_on_output before the next motion.
            return;
        }

        match walk(space, start, end) {
            WalkOutcome::Clean => {}
            WalkOutcome::Clamped(point) => {
                trace!(
                    from = ?start,
                    wanted = ?end,
                    got = ?point,
                    "cursor path clamped at output edge"
                );
                self.x = point.0 as f64;
                self.y = point.1 as f64;
            }
        }
    }
}

enum WalkOutcome {
    /// The whole straight path is covered; keep the fractional endpoint.
    Clean,
    /// The path left the union; terminate at this pixel.
    Clamped((i32, i32)),
}

const MAX_BACKOFFS: u32 = 4;

/// Rasterize the straight path from `start` to `end`, backing off one pixel
/// along the exiting axis whenever a step leaves the covered union.
///
/// A successful back-off freezes that axis of the endpoint, so each restart
/// strictly reduces the degrees of freedom: after two the walk is a straight
/// axis-aligned slide and termination is guaranteed.
fn walk(space: &GlobalSpace, mut start: (i32, i32), mut end: (i32, i32)) -> WalkOutcome {
    let mut last_valid = start;
    let mut backoffs = 0;
    let mut clean = true;

    'restart: loop {
        let (dx, dy) = (end.0 - start.0, end.1 - start.1);
        let steps = dx.abs().max(dy.abs());
        if steps == 0 {
            break;
        }

        let mut prev = start;
        for i in 1..=steps {
            let point = (
                start.0 + ((dx as f64) * (i as f64) / (steps as f64)).round() as i32,
                start.1 + ((dy as f64) * (i as f64) / (steps as f64)).round() as i32,
            );
            if space.abs_to_local(point.0, point.1).is_some() {
                last_valid = point;
                prev = point;
                continue;
            }

            clean = false;
            // Back off one pixel along each axis that advanced this step,
            // one axis at a time.
            let mut candidates = [None::<(Axis, (i32, i32))>; 2];
            if point.0 != prev.0 {
                candidates[0] = Some((Axis::X, (prev.0, point.1)));
            }
            if point.1 != prev.1 {
                candidates[1] = Some((Axis::Y, (point.0, prev.1)));
            }
            for (axis, candidate) in candidates.into_iter().flatten() {
                if backoffs >= MAX_BACKOFFS {
                    break 'restart;
                }
                backoffs += 1;
                if space.abs_to_local(candidate.0, candidate.1).is_some() {
                    last_valid = candidate;
                    start = candidate;
                    match axis {
                        Axis::X => end.0 = candidate.0,
                        Axis::Y => end.1 = candidate.1,
                    }
                    continue 'restart;
                }
            }
            break 'restart;
        }
        break;
    }

    if clean {
        WalkOutcome::Clean
    } else {
        WalkOutcome::Clamped(last_valid)
    }
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Y,
}

fn clamp_to_box(value: f64, extent: u32) -> f64 {
    value.clamp(0.0, (extent.max(1) - 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GapPolicy;

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

    fn cursor_at(x: f64, y: f64) -> CursorState {
        CursorState {
            x,
            y,
            prev_x: x,
            prev_y: y,
        }
    }

    #[test]
    fn relative_motion_clamps_to_box() {
        let space = space_with(&[(1, 0, 0, 100, 100)]);
        let mut cursor = cursor_at(50.0, 50.0);
        cursor.apply_relative(&space, 200.0, 200.0);
        assert_eq!((cursor.x, cursor.y), (99.0, 99.0));
    }

    #[test]
    fn relative_motion_clamps_to_origin() {
        let space = space_with(&[(1, 0, 0, 100, 100)]);
        let mut cursor = cursor_at(10.0, 10.0);
        cursor.apply_relative(&space, -50.0, -50.0);
        assert_eq!((cursor.x, cursor.y), (0.0, 0.0));
    }

    #[test]
    fn in_bounds_motion_keeps_fraction() {
        let space = space_with(&[(1, 0, 0, 100, 100)]);
        let mut cursor = cursor_at(10.0, 10.0);
        cursor.apply_relative(&space, 5.25, 3.5);
        assert_eq!((cursor.x, cursor.y), (15.25, 13.5));
        assert_eq!((cursor.prev_x, cursor.prev_y), (10.0, 10.0));
    }

    #[test]
    fn glide_stops_at_gap_edge() {
        // Right output is half height, leaving a void above it
        let space = space_with(&[(1, 0, 0, 100, 100), (2, 100, 50, 100, 50)]);
        let mut cursor = cursor_at(50.0, 25.0);
        cursor.apply_relative(&space, 100.0, 0.0);
        assert_eq!((cursor.x, cursor.y), (99.0, 25.0));
    }

    #[test]
    fn motion_below_gap_crosses_outputs() {
        let space = space_with(&[(1, 0, 0, 100, 100), (2, 100, 50, 100, 50)]);
        let mut cursor = cursor_at(50.0, 75.0);
        cursor.apply_relative(&space, 100.0, 0.0);
        assert_eq!((cursor.x, cursor.y), (150.0, 75.0));
    }

    #[test]
    fn diagonal_glide_slides_along_edge() {
        let space = space_with(&[(1, 0, 0, 100, 100), (2, 100, 50, 100, 50)]);
        let mut cursor = cursor_at(90.0, 40.0);
        // Aims into the void above the right output
        cursor.apply_relative(&space, 60.0, -20.0);
        let local = cursor.local(&space).expect("cursor must stay on an output");
        assert_eq!(local.output, 1);
    }

    #[test]
    fn absolute_motion_is_path_clamped() {
        let space = space_with(&[(1, 0, 0, 100, 100), (2, 100, 50, 100, 50)]);
        let mut cursor = cursor_at(50.0, 25.0);
        cursor.apply_absolute(&space, 150.0, 25.0);
        assert_eq!((cursor.x, cursor.y), (99.0, 25.0));
    }

    #[test]
    fn rasterized_path_never_leaves_union() {
        let space = space_with(&[(1, 0, 0, 100, 100), (2, 100, 50, 100, 50)]);
        for (sx, sy, dx, dy) in [
            (50.0, 25.0, 100.0, 0.0),
            (10.0, 10.0, 180.0, 80.0),
            (150.0, 75.0, -100.0, -70.0),
            (99.0, 99.0, 100.0, -98.0),
        ] {
            let mut cursor = cursor_at(sx, sy);
            cursor.apply_relative(&space, dx, dy);
            assert!(
                cursor.local(&space).is_some(),
                "cursor left the union from ({sx},{sy}) delta ({dx},{dy}): at ({}, {})",
                cursor.x,
                cursor.y
            );
        }
    }

    #[test]
    fn rehome_after_output_removal() {
        let mut space = space_with(&[(1, 0, 0, 100, 100), (2, 100, 0, 100, 100)]);
        let mut cursor = cursor_at(150.0, 50.0);
        space.unregister_output(2);
        assert!(cursor.ensure_on_output(&mut space));
        assert_eq!((cursor.x, cursor.y), (0.0, 0.0));
    }

    #[test]
    fn rehome_is_a_no_op_on_covered_position() {
        let space = space_with(&[(1, 0, 0, 100, 100)]);
        let mut cursor = cursor_at(40.0, 40.0);
        assert!(!cursor.ensure_on_output(&space));
        assert_eq!((cursor.x, cursor.y), (40.0, 40.0));
    }
}
