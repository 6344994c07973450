//! Per-output crosshair overlay surfaces
//!
//! Each output gets one layer-shell surface on the overlay layer, anchored
//! to all four edges so the compositor sizes it to the full output. The
//! surface carries an empty input region: the crosshair is visible but
//! click-through.
//!
//! Buffer discipline follows the shm sample loop: a `wl_buffer` is created
//! from the pool per submitted frame and destroyed when the compositor
//! releases it; `frame_released` gates the next submission so at most one
//! buffer is ever outstanding per layer.

pub mod canvas;

use std::fs::File;
use std::os::fd::AsFd;

use anyhow::{Context as _, Result};
use memmap2::MmapMut;
use tracing::{debug, trace};
use wayland_client::protocol::wl_buffer::WlBuffer;
use wayland_client::protocol::wl_compositor::WlCompositor;
use wayland_client::protocol::wl_output::WlOutput;
use wayland_client::protocol::wl_region::WlRegion;
use wayland_client::protocol::wl_shm::{Format, WlShm};
use wayland_client::protocol::wl_shm_pool::WlShmPool;
use wayland_client::protocol::wl_surface::WlSurface;
use wayland_client::{Dispatch, QueueHandle};
use wayland_protocols_wlr::layer_shell::v1::client::{
    zwlr_layer_shell_v1::{Layer as ShellLayer, ZwlrLayerShellV1},
    zwlr_layer_surface_v1::{Anchor, ZwlrLayerSurfaceV1},
};
use wayland_protocols_wlr::virtual_pointer::v1::client::zwlr_virtual_pointer_manager_v1::ZwlrVirtualPointerManagerV1;
use wayland_protocols_wlr::virtual_pointer::v1::client::zwlr_virtual_pointer_v1::ZwlrVirtualPointerV1;

use crate::compositor::VirtualPointer;
use crate::random::EntropySource;
use crate::shm::create_shm_file;
use canvas::Canvas;

/// Layer-shell namespace identifying our surfaces to the compositor.
const NAMESPACE: &str = "wl-cloak";

/// One output's overlay surface, pixel buffer and virtual pointer.
pub struct Layer {
    surface: WlSurface,
    layer_surface: ZwlrLayerSurfaceV1,
    pool: Option<WlShmPool>,
    buffer: Option<WlBuffer>,
    pixels: Option<MmapMut>,
    canvas: Option<Canvas>,
    /// Buffer width in pixels, valid once configured.
    pub width: u32,
    /// Buffer height in pixels, valid once configured.
    pub height: u32,
    stride: u32,
    crosshair_radius: i32,
    mapped: bool,
    /// The compositor acknowledged our surface and sent a size.
    pub configured: bool,
    /// The compositor has returned the last submitted buffer.
    pub frame_released: bool,
    /// The crosshair moved in, out or within this output since last draw.
    pub frame_pending: bool,
    /// Virtual pointer bound to this layer's output.
    pub virt_pointer: VirtualPointer,
}

impl Layer {
    /// Create the overlay surface and virtual pointer for an output.
    ///
    /// The surface is committed without a buffer; the compositor answers
    /// with a configure event carrying the output size.
    pub fn new<D>(
        compositor: &WlCompositor,
        layer_shell: &ZwlrLayerShellV1,
        pointer_manager: &ZwlrVirtualPointerManagerV1,
        output: &WlOutput,
        crosshair_radius: i32,
        qh: &QueueHandle<D>,
    ) -> Self
    where
        D: Dispatch<WlSurface, ()>
            + Dispatch<ZwlrLayerSurfaceV1, ()>
            + Dispatch<ZwlrVirtualPointerV1, ()>
            + 'static,
    {
        let surface = compositor.create_surface(qh, ());
        let layer_surface = layer_shell.get_layer_surface(
            &surface,
            Some(output),
            ShellLayer::Overlay,
            NAMESPACE.to_owned(),
            qh,
            (),
        );
        layer_surface.set_anchor(Anchor::Top | Anchor::Bottom | Anchor::Left | Anchor::Right);
        surface.commit();

        let virt_pointer = VirtualPointer::new(pointer_manager, None, output, qh);

        Self {
            surface,
            layer_surface,
            pool: None,
            buffer: None,
            pixels: None,
            canvas: None,
            width: 0,
            height: 0,
            stride: 0,
            crosshair_radius,
            mapped: false,
            configured: false,
            frame_released: true,
            frame_pending: true,
            virt_pointer,
        }
    }

    /// True when `layer_surface` is this layer's surface.
    pub fn owns_layer_surface(&self, layer_surface: &ZwlrLayerSurfaceV1) -> bool {
        &self.layer_surface == layer_surface
    }

    /// True when `buffer` is this layer's outstanding buffer.
    pub fn owns_buffer(&self, buffer: &WlBuffer) -> bool {
        self.buffer.as_ref() == Some(buffer)
    }

    /// Handle a layer-surface configure: allocate the pixel buffer, make the
    /// surface click-through and acknowledge.
    pub fn configure<D>(
        &mut self,
        compositor: &WlCompositor,
        shm: &WlShm,
        serial: u32,
        width: u32,
        height: u32,
        qh: &QueueHandle<D>,
        entropy: &mut dyn EntropySource,
    ) -> Result<()>
    where
        D: Dispatch<WlShmPool, ()> + Dispatch<WlRegion, ()> + 'static,
    {
        // Re-configure with a new size replaces the backing storage
        if let Some(pool) = self.pool.take() {
            pool.destroy();
        }
        self.pixels = None;
        self.canvas = None;
        self.mapped = false;

        self.width = width;
        self.height = height;
        self.stride = width * 4;
        let size = self.stride as usize * height as usize;

        let fd = create_shm_file(size, entropy)
            .context("failed to allocate overlay frame buffer")?;
        let file = File::from(fd);
        let mut pixels = unsafe { MmapMut::map_mut(&file) }
            .context("failed to map overlay frame buffer")?;
        let pool = shm.create_pool(file.as_fd(), size as i32, qh, ());

        let canvas = Canvas::new(width as i32, height as i32, self.crosshair_radius);
        canvas.clear(&mut pixels);

        // Empty input region: the overlay must never swallow clicks
        let region = compositor.create_region(qh, ());
        region.add(0, 0, 0, 0);
        self.surface.set_input_region(Some(&region));
        region.destroy();

        self.layer_surface.ack_configure(serial);

        self.pixels = Some(pixels);
        self.pool = Some(pool);
        self.canvas = Some(canvas);
        self.configured = true;
        self.frame_pending = true;
        debug!(width, height, "overlay layer configured");
        Ok(())
    }

    /// Submit a frame when one is pending and the previous buffer came back.
    ///
    /// `cursor` is the crosshair center in this output's local coordinates,
    /// or `None` when the cursor is elsewhere.
    pub fn draw<D>(&mut self, cursor: Option<(i32, i32)>, qh: &QueueHandle<D>)
    where
        D: Dispatch<WlBuffer, ()> + 'static,
    {
        if !self.frame_released || !self.configured || !self.frame_pending {
            return;
        }
        let (Some(pool), Some(pixels), Some(canvas)) =
            (&self.pool, self.pixels.as_deref_mut(), &mut self.canvas)
        else {
            return;
        };
        self.frame_pending = false;

        let plan = canvas.render(pixels, cursor);

        let buffer = pool.create_buffer(
            0,
            self.width as i32,
            self.height as i32,
            self.stride as i32,
            Format::Argb8888,
            qh,
            (),
        );
        self.surface.attach(Some(&buffer), 0, 0);
        if self.mapped {
            for rect in plan.damage() {
                self.surface
                    .damage_buffer(rect.x, rect.y, rect.width, rect.height);
            }
        } else {
            // First submission maps the surface; damage everything once
            self.surface.damage_buffer(0, 0, i32::MAX, i32::MAX);
            self.mapped = true;
        }
        self.surface.commit();
        trace!(?cursor, ?plan, "overlay frame committed");

        self.buffer = Some(buffer);
        self.frame_released = false;
    }

    /// The compositor released our buffer; free it and unblock drawing.
    pub fn buffer_released(&mut self, buffer: &WlBuffer) {
        if self.owns_buffer(buffer) {
            buffer.destroy();
            self.buffer = None;
            self.frame_released = true;
        }
    }
}

impl Drop for Layer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.destroy();
        }
        if let Some(pool) = self.pool.take() {
            pool.destroy();
        }
        self.layer_surface.destroy();
        self.surface.destroy();
        // MmapMut unmaps on drop; VirtualPointer destroys itself
    }
}
