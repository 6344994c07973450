//! Virtual keyboard and keymap mirroring
//!
//! The virtual-keyboard protocol requires a keymap upload before any key
//! event. Rather than compiling a keymap of our own, the daemon forwards the
//! exact keymap the compositor hands the (never-focused) real keyboard, so
//! forwarded keys resolve to the same symbols the user configured.
//!
//! Compositors re-send the keymap on focus and layout changes, usually
//! byte-identical. [`KeymapTracker`] keeps the previous map's bytes and
//! skips the upload and recompilation when nothing changed.

use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use anyhow::{anyhow, Context, Result};
use memmap2::{Mmap, MmapOptions};
use wayland_client::protocol::wl_seat::WlSeat;
use wayland_client::{Dispatch, QueueHandle};
use wayland_protocols_misc::zwp_virtual_keyboard_v1::client::{
    zwp_virtual_keyboard_manager_v1::ZwpVirtualKeyboardManagerV1,
    zwp_virtual_keyboard_v1::ZwpVirtualKeyboardV1,
};
use xkbcommon::xkb;

/// XKB keycodes are evdev keycodes shifted by 8. A Linux convention old
/// enough that every toolkit hard-codes it, as do we.
pub const EVDEV_XKB_OFFSET: u32 = 8;

/// `wl_keyboard::keymap_format::xkb_v1` as the raw protocol value.
const KEYMAP_FORMAT_XKB_V1: u32 = 1;

/// Wrapper around the seat-wide `zwp_virtual_keyboard_v1` object.
#[derive(Debug)]
pub struct VirtualKeyboard {
    keyboard: ZwpVirtualKeyboardV1,
}

impl VirtualKeyboard {
    /// Create the virtual keyboard for a seat.
    ///
    /// A compositor that denies virtual-keyboard creation raises a protocol
    /// error on the next roundtrip, which aborts startup.
    pub fn new<D>(
        manager: &ZwpVirtualKeyboardManagerV1,
        seat: &WlSeat,
        qh: &QueueHandle<D>,
    ) -> Self
    where
        D: Dispatch<ZwpVirtualKeyboardV1, ()> + 'static,
    {
        let keyboard = manager.create_virtual_keyboard(seat, qh, ());
        Self { keyboard }
    }

    /// Upload an XKB v1 keymap from a readable fd.
    pub fn upload_keymap(&self, fd: BorrowedFd<'_>, size: u32) {
        self.keyboard.keymap(KEYMAP_FORMAT_XKB_V1, fd, size);
    }

    /// Publish a modifier state snapshot.
    pub fn modifiers(&self, snapshot: ModifierSnapshot) {
        self.keyboard.modifiers(
            snapshot.depressed,
            snapshot.latched,
            snapshot.locked,
            snapshot.group,
        );
    }

    /// Key press or release, evdev keycode.
    pub fn key(&self, time: u32, code: u32, pressed: bool) {
        self.keyboard.key(time, code, u32::from(pressed));
    }
}

impl Drop for VirtualKeyboard {
    fn drop(&mut self) {
        self.keyboard.destroy();
    }
}

/// Serialized XKB modifier and layout state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifierSnapshot {
    /// Held modifiers.
    pub depressed: u32,
    /// Latched (sticky) modifiers.
    pub latched: u32,
    /// Locked modifiers (caps lock, num lock).
    pub locked: u32,
    /// Effective layout group.
    pub group: u32,
}

struct CompiledKeymap {
    /// Keeps the fd alive so it can be re-sent to the virtual keyboard.
    file: File,
    bytes: Mmap,
    size: u32,
    /// Held for the lifetime of `state`.
    _keymap: xkb::Keymap,
    state: xkb::State,
}

/// Outcome of feeding a compositor keymap to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeymapUpdate {
    /// Byte-identical to the current map; nothing recompiled.
    Unchanged,
    /// New map compiled and installed; forward it to the virtual keyboard.
    Installed,
}

/// The last-seen keymap and its compiled XKB state.
pub struct KeymapTracker {
    context: xkb::Context,
    current: Option<CompiledKeymap>,
}

impl KeymapTracker {
    /// Tracker with no keymap installed.
    pub fn new() -> Self {
        Self {
            context: xkb::Context::new(xkb::CONTEXT_NO_FLAGS),
            current: None,
        }
    }

    /// A keymap has been installed; key forwarding is allowed.
    pub fn is_set(&self) -> bool {
        self.current.is_some()
    }

    /// The installed keymap's fd, for uploading to the virtual keyboard.
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.current.as_ref().map(|c| c.file.as_fd())
    }

    /// The installed keymap's size in bytes.
    pub fn size(&self) -> Option<u32> {
        self.current.as_ref().map(|c| c.size)
    }

    /// Ingest a keymap fd received from the compositor.
    ///
    /// Maps the fd, compares against the current bytes, and compiles a fresh
    /// XKB keymap and state only on change. The superseded mapping is
    /// released.
    pub fn refresh(&mut self, fd: OwnedFd, size: u32) -> Result<KeymapUpdate> {
        let file = File::from(fd);
        let bytes = unsafe { MmapOptions::new().len(size as usize).map(&file) }
            .context("failed to map compositor keymap")?;

        if let Some(current) = &self.current {
            if current.bytes[..] == bytes[..] {
                return Ok(KeymapUpdate::Unchanged);
            }
        }

        // The buffer is a NUL-terminated XKB source string
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        let source = std::str::from_utf8(&bytes[..end])
            .context("compositor keymap is not valid UTF-8")?;
        let keymap = xkb::Keymap::new_from_string(
            &self.context,
            source.to_owned(),
            xkb::KEYMAP_FORMAT_TEXT_V1,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .ok_or_else(|| anyhow!("failed to compile compositor keymap"))?;
        let state = xkb::State::new(&keymap);

        self.current = Some(CompiledKeymap {
            file,
            bytes,
            size,
            _keymap: keymap,
            state,
        });
        Ok(KeymapUpdate::Installed)
    }

    /// Serialize the modifier state preceding a forwarded key.
    pub fn modifier_snapshot(&self) -> Option<ModifierSnapshot> {
        let current = self.current.as_ref()?;
        Some(ModifierSnapshot {
            depressed: current.state.serialize_mods(xkb::STATE_MODS_DEPRESSED),
            latched: current.state.serialize_mods(xkb::STATE_MODS_LATCHED),
            locked: current.state.serialize_mods(xkb::STATE_MODS_LOCKED),
            group: current.state.serialize_layout(xkb::STATE_LAYOUT_EFFECTIVE),
        })
    }

    /// Feed a forwarded key into the local XKB state.
    pub fn note_key(&mut self, evdev_code: u32, pressed: bool) {
        let Some(current) = &mut self.current else {
            return;
        };
        let direction = if pressed {
            xkb::KeyDirection::Down
        } else {
            xkb::KeyDirection::Up
        };
        current
            .state
            .update_key((evdev_code + EVDEV_XKB_OFFSET).into(), direction);
    }
}

impl Default for KeymapTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
    use std::ffi::CStr;
    use std::io::Write;

    fn keymap_fd(contents: &[u8]) -> OwnedFd {
        let name = CStr::from_bytes_with_nul(b"keymap-test\0").unwrap();
        let fd = memfd_create(name, MemFdCreateFlag::MFD_CLOEXEC).unwrap();
        let mut file = File::from(fd);
        file.write_all(contents).unwrap();
        file.into()
    }

    fn system_keymap_bytes() -> Option<Vec<u8>> {
        // Compiles from system defaults; absent XKB data files in minimal
        // test environments are tolerated
        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        let keymap = xkb::Keymap::new_from_names(
            &context,
            "",
            "",
            "",
            "",
            None,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )?;
        let mut bytes = keymap.get_as_string(xkb::KEYMAP_FORMAT_TEXT_V1).into_bytes();
        bytes.push(0);
        Some(bytes)
    }

    #[test]
    fn identical_keymap_is_not_recompiled() {
        let Some(bytes) = system_keymap_bytes() else {
            eprintln!("no system XKB data, skipping");
            return;
        };
        let mut tracker = KeymapTracker::new();
        let size = bytes.len() as u32;

        let first = tracker.refresh(keymap_fd(&bytes), size).unwrap();
        assert_eq!(first, KeymapUpdate::Installed);
        assert!(tracker.is_set());

        let second = tracker.refresh(keymap_fd(&bytes), size).unwrap();
        assert_eq!(second, KeymapUpdate::Unchanged);
    }

    #[test]
    fn modifier_snapshot_tracks_keys() {
        let Some(bytes) = system_keymap_bytes() else {
            eprintln!("no system XKB data, skipping");
            return;
        };
        let mut tracker = KeymapTracker::new();
        tracker
            .refresh(keymap_fd(&bytes), bytes.len() as u32)
            .unwrap();

        let idle = tracker.modifier_snapshot().unwrap();
        assert_eq!(idle.depressed, 0);

        // KEY_LEFTSHIFT = 42
        tracker.note_key(42, true);
        let shifted = tracker.modifier_snapshot().unwrap();
        assert_ne!(shifted.depressed, 0);

        tracker.note_key(42, false);
        let released = tracker.modifier_snapshot().unwrap();
        assert_eq!(released.depressed, 0);
    }

    #[test]
    fn no_snapshot_before_keymap() {
        let tracker = KeymapTracker::new();
        assert!(!tracker.is_set());
        assert!(tracker.modifier_snapshot().is_none());
    }

    #[test]
    fn garbage_keymap_is_an_error() {
        let mut tracker = KeymapTracker::new();
        let bytes = b"not an xkb keymap\0";
        assert!(tracker.refresh(keymap_fd(bytes), bytes.len() as u32).is_err());
        assert!(!tracker.is_set());
    }
}
