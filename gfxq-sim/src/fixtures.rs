//! Small overlay handlers and a software rasterizer, shared between this
//! crate's own integration tests and the `counters` demo. Never used by
//! `gfxq` itself -- these exist purely to give a stand-in kernel something
//! concrete to dispatch, the way `m4vga-fx-common`'s demo scaffolding is
//! never linked into the driver.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use gfxq::overlay::OverlayDescriptor;
use gfxq::rdp::Fixup;
use gfxq::validate::disasm::{encode, CycleMode, ImageFormat, RasterOp};

use crate::{OverlayHandler, RasterSink};

/// Overlay command indices for [`CounterOverlay`].
pub const ADD_SMALL: u8 = 0;
pub const HIGH_SET: u8 = 1;

/// Two-word persistent state: `[normal_adds, last_high_value]`. One command
/// bumps the first word by one; the other stores its payload into the
/// second -- enough to exercise ordering, block replay, and high-priority
/// preemption without any rasterizer involvement.
pub struct CounterOverlay;

impl OverlayHandler for CounterOverlay {
    fn dispatch(
        &mut self,
        command_index: u8,
        payload: u32,
        _args: &[u32],
        state: &'static [AtomicU32],
        _raster: &mut RasterSink<'_>,
    ) {
        match command_index {
            ADD_SMALL => {
                state[0].fetch_add(1, Ordering::Relaxed);
            }
            HIGH_SET => {
                state[1].store(payload, Ordering::Relaxed);
            }
            _ => panic!("counter overlay has no command {}", command_index),
        }
    }
}

pub fn counter_descriptor() -> OverlayDescriptor {
    OverlayDescriptor {
        text_image: &[],
        data_image: &[0u8; 8],
        command_sizes: &[1, 1],
    }
}

/// One overlay command: fill the whole (preconfigured, square) color image
/// with a solid RGBA16 color. Emits the full SET_COLOR_IMAGE /
/// SET_OTHER_MODES / SET_FILL_COLOR / SET_SCISSOR / FILL_RECT / SYNC_FULL
/// sequence in one shot, as if it were a tiny microcode routine.
pub const FILL_SOLID: u8 = 0;

pub struct FillOverlay;

impl OverlayHandler for FillOverlay {
    fn dispatch(
        &mut self,
        command_index: u8,
        payload: u32,
        _args: &[u32],
        state: &'static [AtomicU32],
        raster: &mut RasterSink<'_>,
    ) {
        assert_eq!(command_index, FILL_SOLID, "fill overlay has no command {}", command_index);
        let width = state[0].load(Ordering::Relaxed) as u16;
        let height = state[1].load(Ordering::Relaxed) as u16;
        let color = payload;

        let mut words = Vec::new();
        words.extend(encode(RasterOp::SetColorImage { format: ImageFormat::Rgba16, width, height }));
        words.extend(encode(RasterOp::SetOtherModes { cycle: CycleMode::Fill }));
        words.extend(encode(RasterOp::SetFillColor { color }));
        words.extend(encode(RasterOp::SetScissor { x0: 0, y0: 0, x1: width, y1: height }));
        words.extend(encode(RasterOp::FillRect { x0: 0, y0: 0, x1: width, y1: height }));
        words.extend(encode(RasterOp::SyncFull));
        raster.push_and_dispatch(&words);
    }
}

pub fn fill_descriptor(width: u16, height: u16) -> OverlayDescriptor {
    let w = width.to_le_bytes();
    let h = height.to_le_bytes();
    let data: &'static [u8] = Box::leak(Box::new([w[0], w[1], 0, 0, h[0], h[1], 0, 0]));
    OverlayDescriptor {
        text_image: &[],
        data_image: data,
        command_sizes: &[1],
    }
}

/// Issues a FILL_RECT in copy mode on a 32-bpp color image without ever
/// setting a supporting cycle -- scenario spec.md §8's "crash diagnostic"
/// case, driven end to end through a kernel-side overlay instead of
/// exercising the validator directly.
pub const CRASH_COPY_MODE_ON_32BPP: u8 = 0;

pub struct CrashOverlay;

impl OverlayHandler for CrashOverlay {
    fn dispatch(
        &mut self,
        command_index: u8,
        _payload: u32,
        _args: &[u32],
        _state: &'static [AtomicU32],
        raster: &mut RasterSink<'_>,
    ) {
        assert_eq!(command_index, CRASH_COPY_MODE_ON_32BPP);
        let mut words = Vec::new();
        words.extend(encode(RasterOp::SetColorImage { format: ImageFormat::Rgba32, width: 32, height: 32 }));
        words.extend(encode(RasterOp::SetScissor { x0: 0, y0: 0, x1: 32, y1: 32 }));
        words.extend(encode(RasterOp::SetOtherModes { cycle: CycleMode::Copy }));
        words.extend(encode(RasterOp::FillRect { x0: 0, y0: 0, x1: 32, y1: 32 }));
        raster.push_and_dispatch(&words);
    }
}

pub fn crash_descriptor() -> OverlayDescriptor {
    OverlayDescriptor {
        text_image: &[],
        data_image: &[],
        command_sizes: &[1],
    }
}

/// A fixup (spec §4.6) whose resolved word depends on the cycle mode in
/// effect when it finally runs: fill mode gets `fill_color`, anything else
/// gets `other_color`. Models an overlay command recorded into a block
/// before the caller necessarily knows which cycle a later `SET_OTHER_MODES`
/// (possibly itself coalesced elsewhere in the block) will have left active.
pub struct FillColorByCycleModeFixup {
    pub fill_color: u32,
    pub other_color: u32,
}

impl Fixup for FillColorByCycleModeFixup {
    fn resolve(&self, cycle_mode: u8, _framebuffer_depth: u8) -> arrayvec::ArrayVec<[u32; 8]> {
        let color = if cycle_mode == CycleMode::Fill as u8 {
            self.fill_color
        } else {
            self.other_color
        };
        encode(RasterOp::SetFillColor { color }).into_iter().collect()
    }
}

/// Recording [`gfxq::validate::disasm::DisassemblyHook`] that appends every
/// disassembled op to a shared log, so a test can inspect the exact
/// sequence the validator saw (spec §8: disassembly-sequence check).
/// Wraps an `Rc<RefCell<_>>` rather than owning the `Vec` outright because
/// `Validator::register_hook` takes ownership of a `&'static mut dyn
/// DisassemblyHook` for the engine's lifetime -- a test needs its own
/// handle to read the log back afterwards.
#[derive(Clone, Default)]
pub struct OpLog(pub Rc<RefCell<Vec<RasterOp>>>);

impl gfxq::validate::disasm::DisassemblyHook for OpLog {
    fn on_command(&mut self, op: RasterOp) {
        self.0.borrow_mut().push(op);
    }
}

impl OpLog {
    pub fn ops(&self) -> Vec<RasterOp> {
        self.0.borrow().clone()
    }
}

/// A minimal software rasterizer: applies `SET_COLOR_IMAGE`, `SET_FILL_COLOR`,
/// `SET_SCISSOR` and `FILL_RECT` to an actual pixel buffer, so a test can
/// read back real framebuffer contents (spec §8, scenario 4) rather than
/// only shadow state.
#[derive(Clone, Default)]
pub struct SoftwareRasterizer(Rc<RefCell<Framebuffer>>);

#[derive(Default)]
struct Framebuffer {
    pixels: Vec<u16>,
    width: usize,
    height: usize,
    fill_color: u16,
    scissor: Option<(u16, u16, u16, u16)>,
}

impl gfxq::validate::disasm::DisassemblyHook for SoftwareRasterizer {
    fn on_command(&mut self, op: RasterOp) {
        let mut fb = self.0.borrow_mut();
        match op {
            RasterOp::SetColorImage { width, height, .. } => {
                fb.width = width as usize;
                fb.height = height as usize;
                fb.pixels = std::vec![0u16; fb.width * fb.height];
            }
            RasterOp::SetFillColor { color } => fb.fill_color = color as u16,
            RasterOp::SetScissor { x0, y0, x1, y1 } => fb.scissor = Some((x0, y0, x1, y1)),
            RasterOp::FillRect { x0, y0, x1, y1 } => {
                let (sx0, sy0, sx1, sy1) = fb.scissor.unwrap_or((0, 0, fb.width as u16, fb.height as u16));
                let x0 = x0.max(sx0) as usize;
                let y0 = y0.max(sy0) as usize;
                let x1 = (x1.min(sx1) as usize).min(fb.width);
                let y1 = (y1.min(sy1) as usize).min(fb.height);
                let color = fb.fill_color;
                let width = fb.width;
                for y in y0..y1 {
                    for x in x0..x1 {
                        fb.pixels[y * width + x] = color;
                    }
                }
            }
            _ => {}
        }
    }
}

impl SoftwareRasterizer {
    pub fn pixel(&self, x: usize, y: usize) -> u16 {
        let fb = self.0.borrow();
        fb.pixels[y * fb.width + x]
    }
}
