//! Wayland event dispatch
//!
//! Every protocol callback funnels into an [`Engine`] method; objects whose
//! events carry no information for us are delegated to no-ops.

use tracing::{debug, warn};
use wayland_client::globals::GlobalListContents;
use wayland_client::protocol::{
    wl_buffer, wl_compositor, wl_keyboard, wl_output, wl_region, wl_registry, wl_seat, wl_shm,
    wl_shm_pool, wl_surface,
};
use wayland_client::{delegate_noop, Connection, Dispatch, QueueHandle};
use wayland_protocols::xdg::xdg_output::zv1::client::{
    zxdg_output_manager_v1::ZxdgOutputManagerV1,
    zxdg_output_v1::{self, ZxdgOutputV1},
};
use wayland_protocols_misc::zwp_virtual_keyboard_v1::client::{
    zwp_virtual_keyboard_manager_v1::ZwpVirtualKeyboardManagerV1,
    zwp_virtual_keyboard_v1::ZwpVirtualKeyboardV1,
};
use wayland_protocols_wlr::layer_shell::v1::client::{
    zwlr_layer_shell_v1::ZwlrLayerShellV1,
    zwlr_layer_surface_v1::{self, ZwlrLayerSurfaceV1},
};
use wayland_protocols_wlr::virtual_pointer::v1::client::{
    zwlr_virtual_pointer_manager_v1::ZwlrVirtualPointerManagerV1,
    zwlr_virtual_pointer_v1::ZwlrVirtualPointerV1,
};

use super::Engine;

impl Dispatch<wl_registry::WlRegistry, GlobalListContents> for Engine {
    fn event(
        engine: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &GlobalListContents,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => {
                if interface == "wl_output" {
                    if let Err(err) = engine.add_output(registry, name, version) {
                        engine.fail(err);
                    }
                }
            }
            wl_registry::Event::GlobalRemove { name } => {
                engine.remove_output(name);
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_seat::WlSeat, ()> for Engine {
    fn event(
        engine: &mut Self,
        _: &wl_seat::WlSeat,
        event: wl_seat::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_seat::Event::Capabilities { capabilities } = event {
            engine.seat_capabilities(capabilities);
        }
    }
}

impl Dispatch<wl_keyboard::WlKeyboard, ()> for Engine {
    fn event(
        engine: &mut Self,
        _: &wl_keyboard::WlKeyboard,
        event: wl_keyboard::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        // Only the keymap matters; our surfaces never take keyboard focus,
        // so enter/leave/key/modifiers never carry anything actionable.
        if let wl_keyboard::Event::Keymap { format, fd, size } = event {
            engine.keyboard_keymap(format, fd, size);
        }
    }
}

impl Dispatch<wl_output::WlOutput, u32> for Engine {
    fn event(
        engine: &mut Self,
        _: &wl_output::WlOutput,
        event: wl_output::Event,
        name: &u32,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        // Geometry itself arrives through xdg-output; the wl_output done
        // event is the atomicity marker for the whole batch.
        if let wl_output::Event::Done = event {
            engine.output_done(*name);
        }
    }
}

impl Dispatch<ZxdgOutputV1, u32> for Engine {
    fn event(
        engine: &mut Self,
        _: &ZxdgOutputV1,
        event: zxdg_output_v1::Event,
        name: &u32,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            zxdg_output_v1::Event::LogicalPosition { x, y } => {
                engine.space.set_position(*name, x, y);
            }
            zxdg_output_v1::Event::LogicalSize { width, height } => {
                engine.space.set_size(*name, width, height);
            }
            _ => {}
        }
    }
}

impl Dispatch<ZwlrLayerSurfaceV1, ()> for Engine {
    fn event(
        engine: &mut Self,
        layer_surface: &ZwlrLayerSurfaceV1,
        event: zwlr_layer_surface_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_layer_surface_v1::Event::Configure {
                serial,
                width,
                height,
            } => {
                engine.layer_configure(layer_surface, serial, width, height);
            }
            zwlr_layer_surface_v1::Event::Closed => {
                // The output removal that caused this arrives separately
                debug!("layer surface closed by compositor");
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_buffer::WlBuffer, ()> for Engine {
    fn event(
        engine: &mut Self,
        buffer: &wl_buffer::WlBuffer,
        event: wl_buffer::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            engine.buffer_released(buffer);
        } else {
            warn!("unexpected wl_buffer event");
        }
    }
}

// Request-only objects
delegate_noop!(Engine: wl_compositor::WlCompositor);
delegate_noop!(Engine: wl_shm_pool::WlShmPool);
delegate_noop!(Engine: wl_region::WlRegion);
delegate_noop!(Engine: ZwlrLayerShellV1);
delegate_noop!(Engine: ZxdgOutputManagerV1);
delegate_noop!(Engine: ZwlrVirtualPointerManagerV1);
delegate_noop!(Engine: ZwpVirtualKeyboardManagerV1);
delegate_noop!(Engine: ZwlrVirtualPointerV1);
delegate_noop!(Engine: ZwpVirtualKeyboardV1);

// Events we have no use for (shm format advertisements, surface
// enter/leave notifications)
delegate_noop!(Engine: ignore wl_shm::WlShm);
delegate_noop!(Engine: ignore wl_surface::WlSurface);
