//! The event pipeline
//!
//! [`Engine`] is the context object everything hangs off: bound globals,
//! output slots with their overlay layers, the coordinate model, the logical
//! cursor, the obfuscation queue and the keymap mirror. It is also the
//! dispatch state for every Wayland callback (see `dispatch`).
//!
//! [`run`] drives the single-threaded loop. Each iteration drains both event
//! sources without blocking, sweeps due releases out of the queue, redraws
//! pending overlays, publishes the virtual cursor when its cadence fires,
//! and then parks in one `poll(2)` over the display fd and the libinput fd
//! with a timeout derived from the earliest scheduled deadline.

mod dispatch;

use std::io::ErrorKind;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, info, warn};
use wayland_client::backend::WaylandError;
use wayland_client::globals::registry_queue_init;
use wayland_client::protocol::wl_buffer::WlBuffer;
use wayland_client::protocol::wl_compositor::WlCompositor;
use wayland_client::protocol::wl_keyboard::{KeymapFormat, WlKeyboard};
use wayland_client::protocol::wl_output::WlOutput;
use wayland_client::protocol::wl_registry::WlRegistry;
use wayland_client::protocol::wl_seat::{Capability, WlSeat};
use wayland_client::protocol::wl_shm::WlShm;
use wayland_client::{Connection, EventQueue, Proxy, QueueHandle, WEnum};
use wayland_protocols::xdg::xdg_output::zv1::client::zxdg_output_manager_v1::ZxdgOutputManagerV1;
use wayland_protocols::xdg::xdg_output::zv1::client::zxdg_output_v1::ZxdgOutputV1;
use wayland_protocols_misc::zwp_virtual_keyboard_v1::client::zwp_virtual_keyboard_manager_v1::ZwpVirtualKeyboardManagerV1;
use wayland_protocols_wlr::layer_shell::v1::client::zwlr_layer_shell_v1::ZwlrLayerShellV1;
use wayland_protocols_wlr::layer_shell::v1::client::zwlr_layer_surface_v1::ZwlrLayerSurfaceV1;
use wayland_protocols_wlr::virtual_pointer::v1::client::zwlr_virtual_pointer_manager_v1::ZwlrVirtualPointerManagerV1;

use crate::compositor::{KeymapTracker, KeymapUpdate, VirtualKeyboard, VirtualPointer};
use crate::config::{Config, MAX_DRAWABLE_LAYERS};
use crate::cursor::CursorState;
use crate::geometry::{GapPolicy, GlobalSpace};
use crate::input::{classify, configure_device, PhysicalAction};
use crate::overlay::Layer;
use crate::random::OsEntropy;
use crate::scheduler::{ForwardAction, MotionCadence, ObfuscationQueue};

/// One attached output: protocol objects plus the overlay layer.
struct OutputSlot {
    registry_name: u32,
    output: WlOutput,
    xdg_output: ZxdgOutputV1,
    layer: Layer,
}

/// Top-level daemon state and Wayland dispatch target.
pub struct Engine {
    qh: QueueHandle<Engine>,

    compositor: WlCompositor,
    shm: WlShm,
    layer_shell: ZwlrLayerShellV1,
    xdg_output_manager: ZxdgOutputManagerV1,
    pointer_manager: ZwlrVirtualPointerManagerV1,
    seat: WlSeat,
    keyboard: Option<WlKeyboard>,
    virt_keyboard: VirtualKeyboard,
    keymap: KeymapTracker,

    slots: Vec<OutputSlot>,
    space: GlobalSpace,
    cursor: CursorState,
    delay_queue: ObfuscationQueue,
    cadence: MotionCadence,
    entropy: OsEntropy,

    config: Config,
    started: Instant,
    fatal: Option<anyhow::Error>,
}

impl Engine {
    /// Connect to the compositor's capability set and create the virtual
    /// keyboard. Missing globals are fatal.
    pub fn new(conn: &Connection, config: Config) -> Result<(Self, EventQueue<Self>)> {
        let (globals, event_queue) =
            registry_queue_init::<Engine>(conn).context("failed to initialize Wayland registry")?;
        let qh = event_queue.handle();

        let compositor: WlCompositor = globals
            .bind(&qh, 4..=5, ())
            .context("compositor does not provide wl_compositor >= 4")?;
        let shm: WlShm = globals
            .bind(&qh, 1..=2, ())
            .context("compositor does not provide wl_shm")?;
        let layer_shell: ZwlrLayerShellV1 = globals
            .bind(&qh, 3..=4, ())
            .context("compositor does not provide zwlr_layer_shell_v1")?;
        let xdg_output_manager: ZxdgOutputManagerV1 = globals
            .bind(&qh, 1..=3, ())
            .context("compositor does not provide zxdg_output_manager_v1")?;
        let pointer_manager: ZwlrVirtualPointerManagerV1 = globals
            .bind(&qh, 1..=2, ())
            .context("compositor does not provide zwlr_virtual_pointer_manager_v1")?;
        let keyboard_manager: ZwpVirtualKeyboardManagerV1 = globals
            .bind(&qh, 1..=1, ())
            .context("compositor does not provide zwp_virtual_keyboard_manager_v1")?;
        let seat: WlSeat = globals
            .bind(&qh, 1..=9, ())
            .context("compositor does not provide a wl_seat")?;

        // An unauthorized creation surfaces as a protocol error on the
        // setup roundtrip and aborts startup
        let virt_keyboard = VirtualKeyboard::new(&keyboard_manager, &seat, &qh);

        let max_delay_ms = config.obfuscation.max_delay_ms;
        let mut engine = Engine {
            qh,
            compositor,
            shm,
            layer_shell,
            xdg_output_manager,
            pointer_manager,
            seat,
            keyboard: None,
            virt_keyboard,
            keymap: KeymapTracker::new(),
            slots: Vec::new(),
            space: GlobalSpace::new(),
            cursor: CursorState::new(),
            delay_queue: ObfuscationQueue::new(max_delay_ms),
            cadence: MotionCadence::new(max_delay_ms),
            entropy: OsEntropy,
            config,
            started: Instant::now(),
            fatal: None,
        };

        let initial_outputs: Vec<(u32, u32)> = globals.contents().with_list(|list| {
            list.iter()
                .filter(|global| global.interface == "wl_output")
                .map(|global| (global.name, global.version))
                .collect()
        });
        for (name, version) in initial_outputs {
            engine.add_output(globals.registry(), name, version)?;
        }

        Ok((engine, event_queue))
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Record a fatal condition for the main loop to surface.
    fn fail(&mut self, err: anyhow::Error) {
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
    }

    fn take_fatal(&mut self) -> Option<anyhow::Error> {
        self.fatal.take()
    }

    fn add_output(&mut self, registry: &WlRegistry, name: u32, version: u32) -> Result<()> {
        if self.slots.len() >= MAX_DRAWABLE_LAYERS {
            bail!("cannot handle more than {MAX_DRAWABLE_LAYERS} outputs at once");
        }
        let output: WlOutput = registry.bind(name, version.min(4), &self.qh, name);
        let xdg_output = self
            .xdg_output_manager
            .get_xdg_output(&output, &self.qh, name);
        let layer = Layer::new(
            &self.compositor,
            &self.layer_shell,
            &self.pointer_manager,
            &output,
            self.config.overlay.cursor_radius,
            &self.qh,
        );
        self.space.register_output(name);
        self.slots.push(OutputSlot {
            registry_name: name,
            output,
            xdg_output,
            layer,
        });
        info!(name, "output attached");
        Ok(())
    }

    fn remove_output(&mut self, name: u32) {
        let Some(index) = self
            .slots
            .iter()
            .position(|slot| slot.registry_name == name)
        else {
            return;
        };
        let slot = self.slots.remove(index);
        slot.xdg_output.destroy();
        if slot.output.version() >= 3 {
            slot.output.release();
        }
        drop(slot.layer);

        self.space.unregister_output(name);
        if self.cursor.ensure_on_output(&self.space) {
            debug!("cursor re-homed after output removal");
        }
        // The crosshair may have jumped to a surviving output
        if let Some(local) = self.cursor.local(&self.space) {
            if let Some(slot) = self.slot_mut(local.output) {
                slot.layer.frame_pending = true;
            }
        }
        info!(name, "output detached");
    }

    fn slot_mut(&mut self, name: u32) -> Option<&mut OutputSlot> {
        self.slots
            .iter_mut()
            .find(|slot| slot.registry_name == name)
    }

    fn output_done(&mut self, name: u32) {
        if let Err(err) = self.space.mark_done(name, GapPolicy::Strict) {
            self.fail(anyhow!(err).context("unsupported output layout"));
        }
    }

    fn seat_capabilities(&mut self, capabilities: WEnum<Capability>) {
        let WEnum::Value(caps) = capabilities else {
            return;
        };
        if caps.contains(Capability::Keyboard) {
            if self.keyboard.is_none() {
                self.keyboard = Some(self.seat.get_keyboard(&self.qh, ()));
            }
        } else {
            self.fail(anyhow!("seat has no keyboard capability"));
        }
    }

    fn keyboard_keymap(
        &mut self,
        format: WEnum<KeymapFormat>,
        fd: std::os::fd::OwnedFd,
        size: u32,
    ) {
        if format != WEnum::Value(KeymapFormat::XkbV1) {
            warn!(?format, "ignoring keymap in unknown format");
            return;
        }
        match self.keymap.refresh(fd, size) {
            Ok(KeymapUpdate::Installed) => {
                if let (Some(fd), Some(size)) = (self.keymap.fd(), self.keymap.size()) {
                    self.virt_keyboard.upload_keymap(fd, size);
                    debug!(size, "keymap mirrored to virtual keyboard");
                }
            }
            Ok(KeymapUpdate::Unchanged) => {
                debug!("identical keymap received, upload skipped");
            }
            Err(err) => self.fail(err.context("failed to mirror keymap")),
        }
    }

    fn layer_configure(
        &mut self,
        layer_surface: &ZwlrLayerSurfaceV1,
        serial: u32,
        width: u32,
        height: u32,
    ) {
        let cursor_local = self.cursor.local(&self.space);
        let Some(index) = self
            .slots
            .iter()
            .position(|slot| slot.layer.owns_layer_surface(layer_surface))
        else {
            return;
        };
        let slot = &mut self.slots[index];
        let result = slot.layer.configure(
            &self.compositor,
            &self.shm,
            serial,
            width,
            height,
            &self.qh,
            &mut self.entropy,
        );
        if let Err(err) = result {
            self.fail(err);
            return;
        }
        let name = self.slots[index].registry_name;
        let local = cursor_local
            .filter(|coord| coord.output == name)
            .map(|coord| (coord.x, coord.y));
        self.slots[index].layer.draw(local, &self.qh);
    }

    fn buffer_released(&mut self, buffer: &WlBuffer) {
        for slot in &mut self.slots {
            if slot.layer.owns_buffer(buffer) {
                slot.layer.buffer_released(buffer);
                return;
            }
        }
        // The owning layer is gone (output removal raced the release)
        buffer.destroy();
    }

    /// Classify and apply one physical input event.
    fn handle_physical_event(&mut self, event: input::event::Event, now_ms: u64) {
        match classify(event, self.space.global_width, self.space.global_height) {
            Some(PhysicalAction::MotionAbsolute { x, y }) => {
                self.cursor.apply_absolute(&self.space, x, y);
                self.after_motion();
            }
            Some(PhysicalAction::MotionRelative { dx, dy }) => {
                self.cursor.apply_relative(&self.space, dx, dy);
                self.after_motion();
            }
            Some(PhysicalAction::Enqueue(actions)) => {
                for action in actions {
                    self.delay_queue.enqueue(action, now_ms, &mut self.entropy);
                }
            }
            Some(PhysicalAction::ConfigureDevice(mut device)) => {
                configure_device(&mut device, self.config.input.tap_to_click);
            }
            None => {}
        }
    }

    /// Mark the layers the crosshair left and entered for redraw.
    fn after_motion(&mut self) {
        let prev = self.cursor.prev_local(&self.space);
        let current = self.cursor.local(&self.space);
        for coord in [prev, current].into_iter().flatten() {
            match self.slot_mut(coord.output) {
                Some(slot) => slot.layer.frame_pending = true,
                None => warn!(output = coord.output, "cursor position on unknown output"),
            }
        }
    }

    /// Emit every queued event whose release time has arrived.
    fn sweep(&mut self, now_ms: u64) {
        while let Some(entry) = self.delay_queue.pop_due(now_ms) {
            self.emit(entry.action, now_ms as u32);
        }
    }

    fn emit(&mut self, action: ForwardAction, time: u32) {
        match action {
            ForwardAction::Key { code, pressed } => {
                if !self.keymap.is_set() {
                    warn!(code, "key dropped: no keymap installed yet");
                    return;
                }
                let Some(snapshot) = self.keymap.modifier_snapshot() else {
                    return;
                };
                self.virt_keyboard.modifiers(snapshot);
                self.virt_keyboard.key(time, code, pressed);
                self.keymap.note_key(code, pressed);
            }
            ForwardAction::Button { code, pressed } => {
                if let Some(pointer) = self.pointer_under_cursor() {
                    pointer.button(time, code, pressed);
                    pointer.frame();
                }
            }
            ForwardAction::Scroll {
                source,
                axis,
                value,
            } => {
                if let Some(pointer) = self.pointer_under_cursor() {
                    pointer.scroll_source(source);
                    pointer.scroll(time, axis, value);
                    pointer.frame();
                }
            }
        }
    }

    /// The virtual pointer of the output under the cursor.
    ///
    /// TODO: events targeting a cursor position inside a multi-output gap
    /// have no pointer to go to and are dropped here; routing them through
    /// an unbound pointer would need compositor cooperation.
    fn pointer_under_cursor(&self) -> Option<&VirtualPointer> {
        let Some(local) = self.cursor.local(&self.space) else {
            debug!("pointer event dropped: cursor is not over any output");
            return None;
        };
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.registry_name == local.output);
        match slot {
            Some(slot) => Some(&slot.layer.virt_pointer),
            None => {
                warn!(output = local.output, "pointer event dropped: no layer for output");
                None
            }
        }
    }

    /// Publish the virtual cursor position when its cadence fires.
    fn publish_cursor(&mut self, now_ms: u64) {
        if !self.cadence.due(now_ms) {
            return;
        }
        if let Some(local) = self.cursor.local(&self.space) {
            if let Some(slot) = self
                .slots
                .iter()
                .find(|slot| slot.registry_name == local.output)
            {
                if slot.layer.configured {
                    slot.layer.virt_pointer.motion_absolute(
                        now_ms as u32,
                        local.x as u32,
                        local.y as u32,
                        slot.layer.width,
                        slot.layer.height,
                    );
                    slot.layer.virt_pointer.frame();
                }
            }
        }
        self.cadence.resample(now_ms, &mut self.entropy);
    }

    /// Redraw every layer with a pending frame.
    fn draw_pending(&mut self) {
        let cursor_local = self.cursor.local(&self.space);
        for slot in &mut self.slots {
            let local = cursor_local
                .filter(|coord| coord.output == slot.registry_name)
                .map(|coord| (coord.x, coord.y));
            slot.layer.draw(local, &self.qh);
        }
    }

    /// Timeout for the poll call, derived from the earliest deadline.
    fn poll_timeout_ms(&self, now_ms: u64) -> u64 {
        let next_move = self.cadence.next_move();
        match self.delay_queue.next_release() {
            Some(release) => release.min(next_move).saturating_sub(now_ms),
            None => next_move
                .saturating_sub(now_ms)
                .min(self.config.engine.poll_timeout_ms),
        }
    }
}

/// Connect, initialize and run the daemon until a fatal error.
pub fn run(config: Config) -> Result<()> {
    let conn = Connection::connect_to_env()
        .context("failed to connect to Wayland display (is WAYLAND_DISPLAY set?)")?;
    let (mut engine, mut event_queue) = Engine::new(&conn, config)?;

    // First roundtrip delivers seat capabilities and initial output
    // geometry; the second delivers the keymap and the layer configures
    // those triggered.
    event_queue
        .roundtrip(&mut engine)
        .context("Wayland setup roundtrip failed")?;
    event_queue
        .roundtrip(&mut engine)
        .context("Wayland setup roundtrip failed")?;
    if let Some(err) = engine.take_fatal() {
        return Err(err);
    }

    let mut libinput = crate::input::create_context(&engine.config.input.device_dir)?;
    let libinput_fd = libinput.as_raw_fd();
    let backend = conn.backend();

    info!("wl-cloak engaged; physical input is now obfuscated");

    loop {
        if let Some(err) = engine.take_fatal() {
            return Err(err);
        }

        event_queue
            .dispatch_pending(&mut engine)
            .context("Wayland dispatch failed")?;
        event_queue.flush().context("Wayland flush failed")?;

        libinput.dispatch().context("libinput dispatch failed")?;
        let now = engine.now_ms();
        for event in &mut libinput {
            engine.handle_physical_event(event, now);
        }

        engine.sweep(now);
        engine.draw_pending();
        engine.publish_cursor(now);
        event_queue.flush().context("Wayland flush failed")?;

        let read_guard = loop {
            match event_queue.prepare_read() {
                Some(guard) => break guard,
                None => {
                    event_queue
                        .dispatch_pending(&mut engine)
                        .context("Wayland dispatch failed")?;
                }
            }
        };

        let timeout = engine.poll_timeout_ms(engine.now_ms()).min(u16::MAX as u64) as u16;
        let wayland_fd = backend.poll_fd();
        let libinput_fd = unsafe { BorrowedFd::borrow_raw(libinput_fd) };
        let mut fds = [
            PollFd::new(wayland_fd, PollFlags::POLLIN),
            PollFd::new(libinput_fd, PollFlags::POLLIN),
        ];
        match poll(&mut fds, PollTimeout::from(timeout)) {
            Ok(_) => {}
            Err(Errno::EINTR) => {
                drop(read_guard);
                continue;
            }
            Err(err) => return Err(anyhow!(err).context("poll failed")),
        }
        let wayland_ready = fds[0]
            .revents()
            .is_some_and(|revents| revents.contains(PollFlags::POLLIN));
        drop(fds);

        if wayland_ready {
            match read_guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(err)) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => {
                    return Err(anyhow!(err).context("failed to read compositor events"))
                }
            }
        } else {
            // Dropping the guard cancels the prepared read
            drop(read_guard);
        }
        event_queue
            .dispatch_pending(&mut engine)
            .context("Wayland dispatch failed")?;
    }
}
