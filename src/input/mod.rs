//! Physical input: device grabbing and event classification
//!
//! Devices are opened through a libinput path-backend context whose
//! `open_restricted` grabs each evdev node exclusively (`EVIOCGRAB`), so the
//! compositor never sees the raw stream. Everything the compositor learns
//! about input goes through the virtual devices instead.
//!
//! Classification turns libinput events into the engine's action vocabulary:
//! motion applies to the internal cursor immediately, everything
//! user-visible is queued, device hotplug gets its configuration applied on
//! the spot.

use std::fs;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use input::event::keyboard::{KeyState, KeyboardEventTrait};
use input::event::pointer::{Axis, ButtonState, PointerScrollEvent};
use input::event::{DeviceEvent, Event, EventTrait, KeyboardEvent, PointerEvent};
use input::{Device, Libinput, LibinputInterface};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::scheduler::{ForwardAction, ScrollAxis, ScrollSource};

/// Input-layer errors. All of these abort startup.
#[derive(Error, Debug)]
pub enum InputError {
    /// The device directory could not be enumerated.
    #[error("could not open input device directory {path}: {source}")]
    DeviceDir {
        /// Directory that failed to open.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A device node could not be opened and grabbed.
    #[error("could not grab input device {0}")]
    GrabDevice(PathBuf),
}

nix::ioctl_write_ptr!(eviocgrab, b'E', 0x90, libc::c_int);

/// Opens device nodes for libinput and takes an exclusive grab on each.
struct GrabbingInterface;

impl LibinputInterface for GrabbingInterface {
    fn open_restricted(&mut self, path: &Path, flags: i32) -> Result<OwnedFd, i32> {
        let file = fs::OpenOptions::new()
            .custom_flags(flags)
            .read((flags & libc::O_RDWR != 0) || (flags & libc::O_WRONLY == 0))
            .write((flags & libc::O_RDWR != 0) || (flags & libc::O_WRONLY != 0))
            .open(path)
            .map_err(|err| {
                warn!(?path, %err, "failed to open input device");
                -err.raw_os_error().unwrap_or(libc::EINVAL)
            })?;
        let fd: OwnedFd = file.into();

        let grab: libc::c_int = 1;
        if let Err(err) = unsafe { eviocgrab(fd.as_raw_fd(), &grab) } {
            warn!(?path, %err, "failed to grab input device");
            return Err(-(err as i32));
        }
        debug!(?path, "input device grabbed");
        Ok(fd)
    }

    fn close_restricted(&mut self, fd: OwnedFd) {
        // Dropping releases the grab along with the descriptor
        drop(fd);
    }
}

/// Build a libinput context over every `event*` node in `device_dir`.
///
/// Every device is grabbed exclusively; failing to grab any one of them is
/// fatal, since an ungrabbed device would keep feeding the compositor
/// unobfuscated timings.
pub fn create_context(device_dir: &Path) -> Result<Libinput, InputError> {
    let mut context = Libinput::new_from_path(GrabbingInterface);

    let entries = fs::read_dir(device_dir).map_err(|source| InputError::DeviceDir {
        path: device_dir.to_owned(),
        source,
    })?;

    let mut grabbed = 0usize;
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_char_device() {
            continue;
        }
        if !entry.file_name().to_string_lossy().starts_with("event") {
            continue;
        }
        let path = entry.path();
        let Some(path_str) = path.to_str() else {
            continue;
        };
        if context.path_add_device(path_str).is_none() {
            return Err(InputError::GrabDevice(path));
        }
        grabbed += 1;
    }

    if grabbed == 0 {
        warn!(?device_dir, "no input devices found to grab");
    } else {
        info!(count = grabbed, "input devices grabbed");
    }
    Ok(context)
}

/// What the engine should do with one physical event.
pub enum PhysicalAction {
    /// Absolute motion, already transformed to global-space pixels.
    MotionAbsolute {
        /// Global x.
        x: f64,
        /// Global y.
        y: f64,
    },
    /// Relative motion in pixels.
    MotionRelative {
        /// Delta x.
        dx: f64,
        /// Delta y.
        dy: f64,
    },
    /// User-visible events to push through the obfuscation queue.
    Enqueue(Vec<ForwardAction>),
    /// A device appeared; apply device configuration immediately.
    ConfigureDevice(Device),
}

/// Map a libinput event onto the engine's action vocabulary.
///
/// Absolute coordinates are normalized against the global bounding box.
/// Events with no user-visible effect (device removal, touch, gestures)
/// yield `None` and are dropped.
pub fn classify(event: Event, global_width: u32, global_height: u32) -> Option<PhysicalAction> {
    match event {
        Event::Pointer(PointerEvent::MotionAbsolute(event)) => Some(PhysicalAction::MotionAbsolute {
            x: event.absolute_x_transformed(global_width),
            y: event.absolute_y_transformed(global_height),
        }),
        Event::Pointer(PointerEvent::Motion(event)) => Some(PhysicalAction::MotionRelative {
            dx: event.dx(),
            dy: event.dy(),
        }),
        Event::Pointer(PointerEvent::Button(event)) => {
            Some(PhysicalAction::Enqueue(vec![ForwardAction::Button {
                code: event.button(),
                pressed: event.button_state() == ButtonState::Pressed,
            }]))
        }
        Event::Pointer(PointerEvent::ScrollWheel(event)) => {
            Some(PhysicalAction::Enqueue(scroll_actions(&event, ScrollSource::Wheel)))
        }
        Event::Pointer(PointerEvent::ScrollFinger(event)) => {
            Some(PhysicalAction::Enqueue(scroll_actions(&event, ScrollSource::Finger)))
        }
        Event::Pointer(PointerEvent::ScrollContinuous(event)) => Some(PhysicalAction::Enqueue(
            scroll_actions(&event, ScrollSource::Continuous),
        )),
        Event::Keyboard(KeyboardEvent::Key(event)) => {
            Some(PhysicalAction::Enqueue(vec![ForwardAction::Key {
                code: event.key(),
                pressed: event.key_state() == KeyState::Pressed,
            }]))
        }
        Event::Device(DeviceEvent::Added(event)) => {
            Some(PhysicalAction::ConfigureDevice(event.device()))
        }
        _ => None,
    }
}

/// Per-axis scroll actions for one libinput scroll event.
fn scroll_actions(event: &impl PointerScrollEvent, source: ScrollSource) -> Vec<ForwardAction> {
    let mut actions = Vec::with_capacity(2);
    if event.has_axis(Axis::Vertical) {
        actions.push(ForwardAction::Scroll {
            source,
            axis: ScrollAxis::Vertical,
            value: event.scroll_value(Axis::Vertical),
        });
    }
    if event.has_axis(Axis::Horizontal) {
        actions.push(ForwardAction::Scroll {
            source,
            axis: ScrollAxis::Horizontal,
            value: event.scroll_value(Axis::Horizontal),
        });
    }
    actions
}

/// Apply device configuration to a freshly added device.
pub fn configure_device(device: &mut Device, tap_to_click: bool) {
    if tap_to_click && device.config_tap_finger_count() > 0 {
        let _ = device.config_tap_set_enabled(true);
        info!(name = device.name(), "tap-to-click enabled");
    }
}
