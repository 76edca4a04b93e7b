//! A std-only stand-in for the coprocessor's resident dispatch kernel and
//! its attached rasterizer.
//!
//! `gfxq` treats the kernel and rasterizer as black boxes (their machine
//! code and wire format are explicitly out of scope); this crate exists
//! purely so host-side tests and demos can exercise `gfxq::Engine` without
//! real hardware, the way `m4vga-fx-common` exists purely to support demos
//! and tests for `m4vga` rather than the driver itself.
//!
//! The kernel here is a single-threaded pump, not a real concurrent
//! consumer: `Kernel::step` advances one command at a time, and callers
//! interleave stepping with the host-side API rather than relying on a
//! background thread draining the rings. This sidesteps a real problem --
//! `gfxq::Engine` is deliberately not `Sync` beyond its ring/syncpoint/
//! highpri primitives, so a genuinely concurrent stand-in would need either
//! unsound `unsafe impl Sync` on state that was never meant to be shared, or
//! API surgery on the production crate to support it. A synchronous pump
//! models every semantic the spec actually tests (ordering, coalescing,
//! preemption, disassembly) without either.
//!
//! Because of this, tests must not call `Engine::wait`, `Engine::state_pointer`,
//! `Engine::detach_wait`, or `Engine::highpri_sync` directly -- nothing
//! would ever run the kernel while those spin. Use `Kernel::pump_wait` and
//! `Kernel::run_until_highpri_drained` instead, and `Engine::overlay_state_raw`
//! in place of `state_pointer`.

use std::collections::HashMap;

use gfxq::addr::{self, Addr};
use gfxq::attach::Frame;
use gfxq::command::{self, Internal};
use gfxq::config::MAX_COMMAND_WORDS;
use gfxq::rdp::Feeder;
use gfxq::validate::disasm::{self, CycleMode, ImageFormat, RasterOp};
use gfxq::validate::Validator;
use gfxq::Engine;

pub mod fixtures;

/// Which ring the kernel is currently consuming from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingSide {
    Normal,
    HighPri,
}

/// A frame of block-chunk execution: the kernel followed a CALL into chunk
/// `chunk_id` and has executed up through `pos` words of it.
#[derive(Clone, Copy, Debug)]
struct ChunkFrame {
    chunk_id: u32,
    pos: usize,
}

/// Result of one `Kernel::step`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepResult {
    /// A command was executed.
    Executed,
    /// The kernel's current ring has nothing published; there is nothing
    /// to do until the host writes more.
    Idle,
}

/// An overlay's kernel-side command implementation. Registered once per
/// overlay ID with `Kernel::register_overlay_handler`.
pub trait OverlayHandler {
    fn dispatch(
        &mut self,
        command_index: u8,
        payload: u32,
        args: &[u32],
        state: &'static [std::sync::atomic::AtomicU32],
        raster: &mut RasterSink<'_>,
    );
}

/// Kernel-tracked rasterizer context a fixup (spec §4.6) resolves against:
/// the current cycle mode and framebuffer bit depth. Deliberately separate
/// from `Validator`'s shadow state -- the spec only requires the Validator's
/// mirror for diagnostics, not for correctness, so real fixup resolution
/// must not depend on it.
#[derive(Clone, Copy, Debug, Default)]
pub struct RasterContext {
    cycle_mode: Option<CycleMode>,
    framebuffer_format: Option<ImageFormat>,
}

impl RasterContext {
    fn observe(&mut self, op: RasterOp) {
        match op {
            RasterOp::SetOtherModes { cycle } => self.cycle_mode = Some(cycle),
            RasterOp::SetColorImage { format, .. } => self.framebuffer_format = Some(format),
            _ => {}
        }
    }

    fn cycle_mode_u8(&self) -> u8 {
        self.cycle_mode.unwrap_or(CycleMode::Fill) as u8
    }

    fn framebuffer_depth_u8(&self) -> u8 {
        self.framebuffer_format.map(ImageFormat::bits_per_pixel).unwrap_or(16)
    }
}

/// The feeder and validator, bundled for an overlay handler that wants to
/// emit rasterizer words (spec §4.6, §4.8). Disjoint from `Engine` itself
/// only because getting `&mut Feeder` and `&mut Validator` out of `&mut
/// Engine` simultaneously needs a dedicated accessor
/// (`Engine::feeder_and_validator_mut`) -- two separate `&mut self` getters
/// can't express it.
pub struct RasterSink<'a> {
    feeder: &'a mut Feeder,
    validator: &'a mut Validator,
    ctx: &'a mut RasterContext,
}

impl<'a> RasterSink<'a> {
    /// Pushes `words` (one or more whole rasterizer commands, back to back)
    /// into the feeder's active buffer, dispatches the resulting range, and
    /// runs every word through the validator exactly as a real consumer
    /// decoding a freshly dispatched range would, updating the
    /// kernel-tracked `RasterContext` fixups resolve against.
    pub fn push_and_dispatch(&mut self, words: &[u32]) {
        let range = self.feeder.active_buffer().push(words);
        self.feeder.dispatch(range);
        let mut pos = range.start;
        while pos < range.end {
            let mut window = [0u32; 3];
            let buf = self.feeder.active_buffer().words();
            for (i, slot) in window.iter_mut().enumerate() {
                let at = pos + i as u32;
                if at < range.end && (at as usize) < buf.len() {
                    *slot = buf[at as usize].load(std::sync::atomic::Ordering::Relaxed);
                }
            }
            let (op, n) = disasm::decode(&window);
            self.ctx.observe(op);
            self.validator.observe(op);
            pos += n as u32;
        }
    }
}

/// A pump-style stand-in for the coprocessor's resident kernel.
///
/// Owns no ring or overlay state itself -- every call takes the `&mut
/// Engine` to drive, so nothing here aliases across calls (the kernel
/// doesn't hold a live borrow of the engine between steps).
pub struct Kernel {
    ring_side: RingSide,
    stack: Vec<ChunkFrame>,
    handlers: HashMap<u8, Box<dyn OverlayHandler>>,
    rast_ctx: RasterContext,
    /// Surface dimensions keyed by the opaque handle a `Frame` carries.
    /// `gfxq` deliberately doesn't track this (surface identity is opaque to
    /// that crate); the stand-in kernel needs it to resolve `attach`/
    /// `attach_clear`'s full-surface install into real rasterizer words.
    surfaces: HashMap<u32, (ImageFormat, u16, u16)>,
}

impl Kernel {
    pub fn new() -> Self {
        Kernel {
            ring_side: RingSide::Normal,
            stack: Vec::new(),
            handlers: HashMap::new(),
            rast_ctx: RasterContext::default(),
            surfaces: HashMap::new(),
        }
    }

    pub fn register_overlay_handler(&mut self, id: u8, handler: impl OverlayHandler + 'static) {
        self.handlers.insert(id, Box::new(handler));
    }

    /// Registers `handle`'s dimensions, so `attach`/`attach_clear` can be
    /// resolved into a concrete rasterizer install (spec §4.7).
    pub fn register_surface(&mut self, handle: u32, format: ImageFormat, width: u16, height: u16) {
        self.surfaces.insert(handle, (format, width, height));
    }

    fn ring<'e>(&self, engine: &'e Engine) -> &'e gfxq::ring::Ring {
        match self.ring_side {
            RingSide::Normal => engine.normal_ring(),
            RingSide::HighPri => engine.highpri_ring(),
        }
    }

    /// Executes exactly one command, from whichever ring or block chunk the
    /// kernel is currently positioned in. Preemption is checked only at a
    /// top-level ring boundary (stack empty, not mid-block): a stricter,
    /// still-compliant reading of "the kernel never interrupts mid-command"
    /// (spec §4.5).
    pub fn step(&mut self, engine: &mut Engine) -> StepResult {
        if self.stack.is_empty() && self.ring_side == RingSide::Normal {
            if engine.highpri_ring().peek_word0().is_some() {
                self.ring_side = RingSide::HighPri;
            }
        }

        let reading_chunk = self.stack.last().copied();
        let word0 = match reading_chunk {
            Some(frame) => engine.chunk_words(frame.chunk_id)[frame.pos],
            None => match self.ring(engine).peek_word0() {
                Some(w) => w,
                None => return StepResult::Idle,
            },
        };

        let overlay_id = command::overlay_id(word0);
        let idx = command::command_index(word0);
        let count = if overlay_id == command::INTERNAL_OVERLAY {
            Internal::from_index(idx)
                .unwrap_or_else(|| panic!("undecodable internal opcode {:#x}", idx))
                .word_count()
        } else {
            engine
                .overlay_command_size(overlay_id, idx)
                .unwrap_or_else(|| panic!("overlay {} command {} has no registered size", overlay_id, idx))
                as usize
        };

        let mut buf = [0u32; MAX_COMMAND_WORDS];
        match reading_chunk {
            Some(frame) => {
                let words = engine.chunk_words(frame.chunk_id);
                buf[..count].copy_from_slice(&words[frame.pos..frame.pos + count]);
                self.stack.last_mut().unwrap().pos += count;
            }
            None => {
                let ring = self.ring(engine);
                ring.read_command(count, &mut buf[..count]);
            }
        }

        if overlay_id == command::INTERNAL_OVERLAY {
            self.dispatch_internal(engine, Internal::from_index(idx).unwrap(), &buf[..count]);
        } else {
            self.dispatch_overlay(engine, overlay_id, idx, &buf[..count]);
        }
        StepResult::Executed
    }

    fn dispatch_internal(&mut self, engine: &mut Engine, op: Internal, words: &[u32]) {
        match op {
            Internal::Invalid => panic!("kernel read an INVALID marker as a real command"),
            Internal::Noop => {}
            Internal::Jump => match addr::decode(words[1]) {
                Addr::Chunk { chunk_id, word } => {
                    let frame = self
                        .stack
                        .last_mut()
                        .expect("JUMP to a chunk observed outside block execution");
                    frame.chunk_id = chunk_id;
                    frame.pos = word;
                }
                Addr::Ring { region, word, .. } => {
                    assert!(
                        self.stack.is_empty(),
                        "JUMP to a ring address observed while inside block execution"
                    );
                    self.ring(engine).follow_jump(region, word);
                }
            },
            Internal::Call => match addr::decode(words[1]) {
                Addr::Chunk { chunk_id, word } => {
                    assert!(self.stack.len() < 32, "block call stack overflow");
                    self.stack.push(ChunkFrame { chunk_id, pos: word });
                }
                Addr::Ring { .. } => panic!("CALL to a ring address is not supported"),
            },
            Internal::Ret => {
                self.stack.pop().expect("RET observed with an empty call stack");
            }
            Internal::Dma => {
                // The overlay code/data DMA path is a coprocessor-internal
                // concern (spec Non-goals); nothing observable depends on it
                // completing here.
            }
            Internal::WriteStatus => {
                engine.syncpoint_advance(words[1]);
            }
            Internal::SwapBuffers => {
                self.ring_side = match self.ring_side {
                    RingSide::Normal => RingSide::HighPri,
                    RingSide::HighPri => {
                        engine.highpri_note_processed();
                        RingSide::Normal
                    }
                };
            }
            Internal::TestWriteStatus => {
                // No status register to spin on in this stand-in; any wait
                // the kernel would perform here is trivially satisfied.
            }
            Internal::RdpDispatch => {
                // The static path (spec §4.3, §4.6): the host already wrote
                // the exact rasterizer words into the block's sibling
                // rasterizer chunk at record time; replay them verbatim.
                let (chunk_id, start, end) = match (addr::decode(words[1]), addr::decode(words[2])) {
                    (Addr::Chunk { chunk_id, word: start }, Addr::Chunk { chunk_id: c2, word: end }) => {
                        assert_eq!(chunk_id, c2, "RDP_DISPATCH spans two different rasterizer chunks");
                        (chunk_id, start, end)
                    }
                    _ => panic!("RDP_DISPATCH with non-chunk addresses"),
                };
                let raster_words = engine.rast_chunk_words(chunk_id)[start..end].to_vec();
                let (feeder, validator) = engine.feeder_and_validator_mut();
                let mut sink = RasterSink { feeder, validator, ctx: &mut self.rast_ctx };
                sink.push_and_dispatch(&raster_words);
            }
            Internal::RdpFixup => {
                let fixup_id = command::payload(words[0]) as u8;
                let (placeholder_start, placeholder_end) = (words[1], words[2]);
                let resolved = engine.resolve_fixup(
                    fixup_id,
                    self.rast_ctx.cycle_mode_u8(),
                    self.rast_ctx.framebuffer_depth_u8(),
                );
                if placeholder_start != addr::NONE {
                    let (chunk_id, start, end) = match (addr::decode(placeholder_start), addr::decode(placeholder_end)) {
                        (Addr::Chunk { chunk_id, word: start }, Addr::Chunk { chunk_id: c2, word: end }) => {
                            assert_eq!(chunk_id, c2, "RDP_FIXUP placeholder spans two different rasterizer chunks");
                            (chunk_id, start, end)
                        }
                        _ => panic!("RDP_FIXUP with a non-chunk placeholder address"),
                    };
                    assert_eq!(
                        resolved.len(),
                        end - start,
                        "fixup {} resolved to {} words, but {} were reserved",
                        fixup_id,
                        resolved.len(),
                        end - start
                    );
                    engine.rast_chunk_words_mut(chunk_id)[start..end].copy_from_slice(&resolved);
                }
                let (feeder, validator) = engine.feeder_and_validator_mut();
                let mut sink = RasterSink { feeder, validator, ctx: &mut self.rast_ctx };
                sink.push_and_dispatch(&resolved);
            }
            Internal::RdpWaitIdle => {}
            Internal::AttachInstall => {
                let frame = engine
                    .get_attached()
                    .expect("ATTACH_INSTALL observed with nothing attached");
                self.install_surface(engine, frame);
            }
            Internal::AttachClearFallback => {
                let frame = engine
                    .get_attached()
                    .expect("ATTACH_CLEAR_FALLBACK observed with nothing attached");
                self.clear_surface(engine, frame);
            }
        }
    }

    fn surface_dims(&self, handle: u32) -> (ImageFormat, u16, u16) {
        *self
            .surfaces
            .get(&handle)
            .unwrap_or_else(|| panic!("no surface registered for handle {}", handle))
    }

    fn install_surface(&mut self, engine: &mut Engine, frame: Frame) {
        let (format, width, height) = self.surface_dims(frame.color);
        let mut words = Vec::new();
        words.extend(disasm::encode(RasterOp::SetColorImage { format, width, height }));
        if frame.depth.is_some() {
            words.extend(disasm::encode(RasterOp::SetZImage));
        }
        words.extend(disasm::encode(RasterOp::SetScissor { x0: 0, y0: 0, x1: width, y1: height }));
        let (feeder, validator) = engine.feeder_and_validator_mut();
        let mut sink = RasterSink { feeder, validator, ctx: &mut self.rast_ctx };
        sink.push_and_dispatch(&words);
    }

    fn clear_surface(&mut self, engine: &mut Engine, frame: Frame) {
        let (format, width, height) = self.surface_dims(frame.color);
        let mut words = Vec::new();
        words.extend(disasm::encode(RasterOp::SetColorImage { format, width, height }));
        words.extend(disasm::encode(RasterOp::SetOtherModes { cycle: CycleMode::Fill }));
        words.extend(disasm::encode(RasterOp::SetFillColor { color: 0 }));
        words.extend(disasm::encode(RasterOp::SetScissor { x0: 0, y0: 0, x1: width, y1: height }));
        words.extend(disasm::encode(RasterOp::FillRect { x0: 0, y0: 0, x1: width, y1: height }));
        words.extend(disasm::encode(RasterOp::SyncFull));
        let (feeder, validator) = engine.feeder_and_validator_mut();
        let mut sink = RasterSink { feeder, validator, ctx: &mut self.rast_ctx };
        sink.push_and_dispatch(&words);
    }

    fn dispatch_overlay(&mut self, engine: &mut Engine, overlay_id: u8, idx: u8, words: &[u32]) {
        let payload = command::payload(words[0]);
        let state = engine.overlay_state_raw(overlay_id).unwrap_or(&[]);
        let (feeder, validator) = engine.feeder_and_validator_mut();
        let mut sink = RasterSink { feeder, validator, ctx: &mut self.rast_ctx };
        let handler = self
            .handlers
            .get_mut(&overlay_id)
            .unwrap_or_else(|| panic!("no kernel-side handler registered for overlay {}", overlay_id));
        handler.dispatch(idx, payload, &words[1..], state, &mut sink);
    }

    /// Steps until the current ring (and any open block execution) has
    /// nothing left to execute.
    pub fn run_until_idle(&mut self, engine: &mut Engine) {
        let mut steps = 0usize;
        loop {
            match self.step(engine) {
                StepResult::Idle => return,
                StepResult::Executed => {}
            }
            steps += 1;
            assert!(steps < 10_000_000, "kernel sim did not reach idle within a sane step budget");
        }
    }

    /// Steps until a high-priority segment that has already been submitted
    /// (`highpri_end` called) has been fully executed and the kernel has
    /// returned to the normal ring, without draining any further normal-ring
    /// backlog. Used to model "the kernel preempts, runs the segment, and
    /// comes back" without also asserting the whole normal queue drained.
    pub fn run_until_highpri_drained(&mut self, engine: &mut Engine) {
        let mut steps = 0usize;
        loop {
            if self.ring_side == RingSide::Normal
                && self.stack.is_empty()
                && engine.highpri_ring().peek_word0().is_none()
            {
                return;
            }
            match self.step(engine) {
                StepResult::Idle => return,
                StepResult::Executed => {}
            }
            steps += 1;
            assert!(steps < 10_000_000, "kernel sim did not drain the high-priority segment in time");
        }
    }

    /// Models `Engine::wait` for a synchronous harness: creates a
    /// syncpoint, runs the kernel to idle (so the WRITE_STATUS it implies
    /// actually gets executed), then waits on it -- which by then resolves
    /// immediately.
    pub fn pump_wait(&mut self, engine: &mut Engine) {
        let id = engine.syncpoint_create();
        self.run_until_idle(engine);
        engine.syncpoint_wait(id);
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
