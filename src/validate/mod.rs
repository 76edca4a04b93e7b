//! Validator / Tracer (spec §4.8, §4.9): reconstructs a shadow of the
//! rasterizer's state from the emitted command stream and diagnoses illegal
//! configurations. Taps the rasterizer-bound stream; never sees the
//! engine's own command stream directly.

pub mod diag;
pub mod disasm;
pub mod shadow;

use arrayvec::ArrayVec;

use crate::config::Config;
use diag::{Diagnostic, Severity};
use disasm::{CombineSlot, CycleMode, DisassemblyHook, ImageFormat, RasterOp};
use shadow::ShadowState;

/// A recently-observed command-buffer range, kept so the validator can
/// recognize and skip re-disassembling a range it has already processed
/// (spec §4.8: "a small ring of recently observed command-buffer ranges").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SeenRange {
    start: u32,
    end: u32,
}

pub struct Validator {
    state: ShadowState,
    diagnostics: ArrayVec<[Diagnostic; 16]>,
    seen: ArrayVec<[SeenRange; 8]>,
    hooks: ArrayVec<[&'static mut dyn DisassemblyHook; 4]>,
    tile_overlap_margin: usize,
}

impl Validator {
    pub fn new(cfg: &Config) -> Self {
        Validator {
            state: ShadowState::new(),
            diagnostics: ArrayVec::new(),
            seen: ArrayVec::new(),
            hooks: ArrayVec::new(),
            tile_overlap_margin: cfg.tile_overlap_margin,
        }
    }

    pub fn register_hook(&mut self, hook: &'static mut dyn DisassemblyHook) {
        assert!(
            !self.hooks.is_full(),
            "validator hook table exhausted ({} registered)",
            self.hooks.len()
        );
        self.hooks.push(hook);
    }

    /// Whether `[start, end)` is the same range most recently observed
    /// (allows the caller to skip re-disassembling bytes it has already
    /// processed).
    pub fn already_seen(&mut self, start: u32, end: u32) -> bool {
        if self.seen.last() == Some(&SeenRange { start, end }) {
            return true;
        }
        if self.seen.is_full() {
            self.seen.remove(0);
        }
        self.seen.push(SeenRange { start, end });
        false
    }

    /// Read-only copy of current shadow state, for host-side diagnostics
    /// and tests (spec_full §6: "no production behavior depends on them").
    pub fn state_snapshot(&self) -> ShadowState {
        self.state
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    fn raise(&mut self, diag: Diagnostic) {
        if diag.severity == Severity::Crash {
            defmt::error!("validator crash diagnostic: {}", diag.message);
            // The library asserts to surface the bug immediately (spec §7).
            panic!("validator crash: {}", diag.message);
        }
        match diag.severity {
            Severity::Error => defmt::warn!("validator error: {}", diag.message),
            Severity::Warn => defmt::debug!("validator warn: {}", diag.message),
            Severity::Crash => unreachable!(),
        }
        if self.diagnostics.is_full() {
            self.diagnostics.remove(0);
        }
        self.diagnostics.push(diag);
    }

    /// Processes one decoded rasterizer command: updates shadow state,
    /// runs deferred re-validation for drawing commands, and calls every
    /// registered hook.
    pub fn observe(&mut self, op: RasterOp) {
        self.state.apply(op);
        self.validate_drawing_command(op);
        for hook in self.hooks.iter_mut() {
            hook.on_command(op);
        }
    }

    fn validate_drawing_command(&mut self, op: RasterOp) {
        match op {
            RasterOp::FillRect { .. } | RasterOp::TexRect { .. } => {
                if self.state.color_image.format.is_none() {
                    self.raise(Diagnostic::new(
                        Severity::Error,
                        "drawing command issued with no color image configured",
                        op,
                    ));
                }
                if self.state.scissor.is_none() {
                    self.raise(Diagnostic::new(
                        Severity::Error,
                        "drawing command issued with no scissor configured",
                        op,
                    ));
                }
                self.validate_mode_consistency(op);
                if let RasterOp::TexRect { tile, .. } = op {
                    self.validate_tile_reference(tile, op);
                }
            }
            _ => {}
        }
    }

    /// Confirms the current cycle mode is consistent with the combiner's
    /// referenced slots (spec §4.8: "no COMBINED in first cycle; no TEX1 in
    /// second cycle of 2-cycle") and flags hardware-impossible format
    /// combinations as crashes (spec §4.8: "copy mode on 32-bpp
    /// framebuffers").
    fn validate_mode_consistency(&mut self, op: RasterOp) {
        let cycle = match self.state.other_modes {
            Some(c) => c,
            None => {
                self.raise(Diagnostic::new(
                    Severity::Error,
                    "drawing command issued with no SET_OTHER_MODES configured",
                    op,
                ));
                return;
            }
        };
        if let Some((cycle0, cycle1)) = self.state.combine {
            if cycle0 == CombineSlot::Combined {
                self.raise(
                    Diagnostic::new(
                        Severity::Error,
                        "COMBINED referenced in first cycle of color combiner",
                        op,
                    )
                    .with_ref(RasterOp::SetCombine { cycle0, cycle1 }),
                );
            }
            if cycle != CycleMode::TwoCycle && cycle1 == CombineSlot::Tex1 {
                self.raise(
                    Diagnostic::new(
                        Severity::Error,
                        "TEX1 referenced outside 2-cycle mode",
                        op,
                    )
                    .with_ref(RasterOp::SetOtherModes { cycle }),
                );
            }
        }
        if cycle == CycleMode::Copy && self.state.color_image.format == Some(ImageFormat::Rgba32) {
            self.raise(
                Diagnostic::new(
                    Severity::Crash,
                    "copy mode is not supported on a 32-bpp color image",
                    op,
                )
                .with_ref(RasterOp::SetOtherModes { cycle }),
            );
        }
    }

    fn validate_tile_reference(&mut self, tile: u8, op: RasterOp) {
        let t = &self.state.tiles[tile as usize % shadow::TILE_COUNT];
        if t.format.is_none() {
            self.raise(Diagnostic::new(
                Severity::Error,
                "drawing command references a tile that was never SET_TILE'd",
                op,
            ));
        }
    }

    /// Whether two tiles' TMEM footprints overlap closely enough to warrant
    /// a warning, within `tile_overlap_margin` words (spec §9's "not a
    /// semantic contract" safety margin, spec_full §5).
    pub fn check_tile_overlap(&mut self, a: u8, b: u8) {
        let ta = self.state.tiles[a as usize % shadow::TILE_COUNT];
        let tb = self.state.tiles[b as usize % shadow::TILE_COUNT];
        if ta.format.is_none() || tb.format.is_none() {
            return;
        }
        let a_end = ta.tmem_addr as i32 + ta.pitch as i32;
        let b_end = tb.tmem_addr as i32 + tb.pitch as i32;
        let margin = self.tile_overlap_margin as i32;
        let overlaps = (ta.tmem_addr as i32) < b_end + margin && (tb.tmem_addr as i32) < a_end + margin;
        if overlaps {
            self.raise(Diagnostic::new(
                Severity::Warn,
                "tile storage regions overlap within the configured safety margin",
                RasterOp::SetTile {
                    tile: a,
                    format: ta.format.unwrap(),
                    tmem_addr: ta.tmem_addr,
                    pitch: ta.pitch,
                },
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn cfg() -> Config {
        Config::default()
    }

    #[test]
    fn fill_rect_with_no_color_image_raises_error() {
        let mut v = Validator::new(&cfg());
        v.observe(RasterOp::SetScissor { x0: 0, y0: 0, x1: 32, y1: 32 });
        v.observe(RasterOp::SetOtherModes { cycle: CycleMode::Fill });
        v.observe(RasterOp::FillRect { x0: 0, y0: 0, x1: 32, y1: 32 });
        assert!(v
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("no color image")));
    }

    #[test]
    #[should_panic(expected = "copy mode is not supported")]
    fn copy_mode_on_32bpp_is_a_crash() {
        let mut v = Validator::new(&cfg());
        v.observe(RasterOp::SetColorImage {
            format: ImageFormat::Rgba32,
            width: 32,
            height: 32,
        });
        v.observe(RasterOp::SetScissor { x0: 0, y0: 0, x1: 32, y1: 32 });
        v.observe(RasterOp::SetOtherModes { cycle: CycleMode::Copy });
        v.observe(RasterOp::FillRect { x0: 0, y0: 0, x1: 32, y1: 32 });
    }

    #[test]
    fn well_formed_fill_rect_raises_nothing() {
        let mut v = Validator::new(&cfg());
        v.observe(RasterOp::SetColorImage {
            format: ImageFormat::Rgba16,
            width: 32,
            height: 32,
        });
        v.observe(RasterOp::SetOtherModes { cycle: CycleMode::Fill });
        v.observe(RasterOp::SetFillColor { color: 0xffff });
        v.observe(RasterOp::SetScissor { x0: 0, y0: 0, x1: 32, y1: 32 });
        v.observe(RasterOp::FillRect { x0: 0, y0: 0, x1: 32, y1: 32 });
        assert!(v.diagnostics().is_empty());
    }

    #[test]
    fn already_seen_detects_repeated_range() {
        let mut v = Validator::new(&cfg());
        assert!(!v.already_seen(0, 16));
        assert!(v.already_seen(0, 16));
        assert!(!v.already_seen(16, 32));
    }
}
