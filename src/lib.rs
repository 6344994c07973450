//! # wl-cloak
//!
//! Anti-fingerprinting input obfuscation for wlroots compositors.
//!
//! Keystroke and mouse dynamics can identify a user from event timing alone.
//! wl-cloak sits between the physical input devices and the compositor:
//! it grabs every evdev device exclusively, drives its own cursor and
//! crosshair overlay, and re-emits events through virtual input devices with
//! randomized, bounded delays so the compositor (and anything listening
//! inside it) never observes the user's natural timing.
//!
//! # Architecture
//!
//! ```text
//! /dev/input/event*  ──grab──>  libinput  ──classify──┐
//!                                                     │ motion: immediate
//!                                   ┌─────────────────┴────────┐
//!                                   │                          │
//!                             CursorState                ObfuscationQueue
//!                       (edge-gliding clamp)          (randomized releases)
//!                                   │                          │
//!                      layer-shell crosshair          virtual pointer /
//!                      overlay (per output)           virtual keyboard
//!                                   └──────────┬───────────────┘
//!                                         compositor
//! ```
//!
//! The binary lives in `main.rs`; everything else is a library so the pure
//! engine components can be exercised by tests without a compositor.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Configuration file and knob definitions.
pub mod config;

/// Virtual input device wrappers and keymap mirroring.
pub mod compositor;

/// Logical cursor with path-clamped motion.
pub mod cursor;

/// The context object and main loop.
pub mod engine;

/// Output geometry and global-space queries.
pub mod geometry;

/// Physical device grabbing and event classification.
pub mod input;

/// Per-output crosshair overlay surfaces.
pub mod overlay;

/// Entropy sources.
pub mod random;

/// Obfuscation delay queue and virtual-cursor cadence.
pub mod scheduler;

/// Shared-memory files for overlay buffers.
pub mod shm;
