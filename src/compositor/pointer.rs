//! Virtual pointer for the wlr-virtual-pointer protocol
//!
//! One virtual pointer is created per output, bound to that output, so that
//! `motion_absolute` coordinates are interpreted in the output's own space.
//! Button and axis codes are Linux evdev codes and pass through unchanged.

use wayland_client::protocol::wl_output::WlOutput;
use wayland_client::protocol::wl_pointer;
use wayland_client::protocol::wl_seat::WlSeat;
use wayland_client::{Dispatch, Proxy, QueueHandle};
use wayland_protocols_wlr::virtual_pointer::v1::client::{
    zwlr_virtual_pointer_manager_v1::ZwlrVirtualPointerManagerV1,
    zwlr_virtual_pointer_v1::ZwlrVirtualPointerV1,
};

use crate::scheduler::{ScrollAxis, ScrollSource};

/// Wrapper around one `zwlr_virtual_pointer_v1` object.
#[derive(Debug)]
pub struct VirtualPointer {
    pointer: ZwlrVirtualPointerV1,
}

impl VirtualPointer {
    /// Create a virtual pointer, bound to `output` when the manager supports
    /// per-output binding (protocol version 2).
    pub fn new<D>(
        manager: &ZwlrVirtualPointerManagerV1,
        seat: Option<&WlSeat>,
        output: &WlOutput,
        qh: &QueueHandle<D>,
    ) -> Self
    where
        D: Dispatch<ZwlrVirtualPointerV1, ()> + 'static,
    {
        let pointer = if manager.version() >= 2 {
            manager.create_virtual_pointer_with_output(seat, Some(output), qh, ())
        } else {
            manager.create_virtual_pointer(seat, qh, ())
        };
        Self { pointer }
    }

    /// Absolute motion within the `[0, x_extent] × [0, y_extent]` space.
    pub fn motion_absolute(&self, time: u32, x: u32, y: u32, x_extent: u32, y_extent: u32) {
        self.pointer.motion_absolute(time, x, y, x_extent, y_extent);
    }

    /// Button press or release, evdev button code.
    pub fn button(&self, time: u32, code: u32, pressed: bool) {
        let state = if pressed {
            wl_pointer::ButtonState::Pressed
        } else {
            wl_pointer::ButtonState::Released
        };
        self.pointer.button(time, code, state);
    }

    /// Scroll step; a value of exactly zero is emitted as an axis stop.
    pub fn scroll(&self, time: u32, axis: ScrollAxis, value: f64) {
        let axis = match axis {
            ScrollAxis::Vertical => wl_pointer::Axis::VerticalScroll,
            ScrollAxis::Horizontal => wl_pointer::Axis::HorizontalScroll,
        };
        if value == 0.0 {
            self.pointer.axis_stop(time, axis);
        } else {
            self.pointer.axis(time, axis, value);
        }
    }

    /// Declare where subsequent axis events come from.
    pub fn scroll_source(&self, source: ScrollSource) {
        let source = match source {
            ScrollSource::Wheel => wl_pointer::AxisSource::Wheel,
            ScrollSource::Finger => wl_pointer::AxisSource::Finger,
            ScrollSource::Continuous => wl_pointer::AxisSource::Continuous,
        };
        self.pointer.axis_source(source);
    }

    /// Conclude a logical group of pointer events.
    pub fn frame(&self) {
        self.pointer.frame();
    }
}

impl Drop for VirtualPointer {
    fn drop(&mut self) {
        self.pointer.destroy();
    }
}
