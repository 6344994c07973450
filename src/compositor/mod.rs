//! Virtual input devices and keymap tracking
//!
//! Thin wrappers over the two injection protocols:
//!
//! - `zwlr_virtual_pointer_v1` (wlr-virtual-pointer-unstable-v1), one
//!   instance per output so absolute motion lands in that output's
//!   coordinate space
//! - `zwp_virtual_keyboard_v1` (virtual-keyboard-unstable-v1), one global
//!   instance bound to the seat
//!
//! plus [`keyboard::KeymapTracker`], which mirrors the compositor-provided
//! keymap into the virtual keyboard and into a local XKB state used to
//! produce modifier snapshots for forwarded keys.

pub mod keyboard;
pub mod pointer;

pub use keyboard::{KeymapTracker, KeymapUpdate, ModifierSnapshot, VirtualKeyboard, EVDEV_XKB_OFFSET};
pub use pointer::VirtualPointer;
