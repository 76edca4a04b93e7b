//! Rasterizer command disassembly.
//!
//! The wire encoding of real rasterizer commands is bit-exact to the
//! target hardware and explicitly out of scope (spec §6: "the Validator's
//! disassembly tables constitute the authoritative reference"). What
//! follows is this crate's own flat encoding, used only by the validator
//! and the `gfxq-sim` stand-in -- it has no contract with any external
//! wire format.

use arrayvec::ArrayVec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum CycleMode {
    Fill,
    Copy,
    OneCycle,
    TwoCycle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum ImageFormat {
    Rgba16,
    Rgba32,
    Ia8,
    I8,
}

impl ImageFormat {
    pub fn bits_per_pixel(self) -> u8 {
        match self {
            ImageFormat::Rgba16 => 16,
            ImageFormat::Rgba32 => 32,
            ImageFormat::Ia8 | ImageFormat::I8 => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum CombineSlot {
    Combined,
    Tex0,
    Tex1,
    Shade,
    Constant,
}

/// A decoded rasterizer command. Every variant carries its fields by
/// value, so a `Diagnostic` can cross-reference one without borrowing the
/// original command stream (spec §4.9, Design Notes §9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum RasterOp {
    SetColorImage {
        format: ImageFormat,
        width: u16,
        height: u16,
    },
    SetZImage,
    SetTextureImage {
        format: ImageFormat,
        width: u16,
    },
    SetOtherModes {
        cycle: CycleMode,
    },
    SetCombine {
        cycle0: CombineSlot,
        cycle1: CombineSlot,
    },
    SetTile {
        tile: u8,
        format: ImageFormat,
        tmem_addr: u16,
        pitch: u16,
    },
    LoadTile {
        tile: u8,
        s0: u16,
        t0: u16,
        s1: u16,
        t1: u16,
    },
    SetScissor {
        x0: u16,
        y0: u16,
        x1: u16,
        y1: u16,
    },
    SetFillColor {
        color: u32,
    },
    FillRect {
        x0: u16,
        y0: u16,
        x1: u16,
        y1: u16,
    },
    TexRect {
        tile: u8,
        x0: u16,
        y0: u16,
        x1: u16,
        y1: u16,
    },
    SyncFull,
    SyncPipe,
    SyncTile,
    SyncLoad,
}

impl RasterOp {
    /// Word count of this op's own encoding, including its tag word.
    pub fn word_count(self) -> usize {
        match self {
            RasterOp::SetColorImage { .. }
            | RasterOp::SetTextureImage { .. }
            | RasterOp::SetTile { .. }
            | RasterOp::SetScissor { .. }
            | RasterOp::FillRect { .. } => 2,
            RasterOp::LoadTile { .. } | RasterOp::TexRect { .. } => 3,
            RasterOp::SetZImage
            | RasterOp::SetOtherModes { .. }
            | RasterOp::SetCombine { .. }
            | RasterOp::SetFillColor { .. }
            | RasterOp::SyncFull
            | RasterOp::SyncPipe
            | RasterOp::SyncTile
            | RasterOp::SyncLoad => 1,
        }
    }
}

const TAG_SET_COLOR_IMAGE: u8 = 0x01;
const TAG_SET_Z_IMAGE: u8 = 0x02;
const TAG_SET_TEXTURE_IMAGE: u8 = 0x03;
const TAG_SET_OTHER_MODES: u8 = 0x04;
const TAG_SET_COMBINE: u8 = 0x05;
const TAG_SET_TILE: u8 = 0x06;
const TAG_LOAD_TILE: u8 = 0x07;
const TAG_SET_SCISSOR: u8 = 0x08;
const TAG_SET_FILL_COLOR: u8 = 0x09;
const TAG_FILL_RECT: u8 = 0x0a;
const TAG_TEX_RECT: u8 = 0x0b;
const TAG_SYNC_FULL: u8 = 0x0c;
const TAG_SYNC_PIPE: u8 = 0x0d;
const TAG_SYNC_TILE: u8 = 0x0e;
const TAG_SYNC_LOAD: u8 = 0x0f;

fn format_from_bits(bits: u8) -> ImageFormat {
    match bits & 0x3 {
        0 => ImageFormat::Rgba16,
        1 => ImageFormat::Rgba32,
        2 => ImageFormat::Ia8,
        _ => ImageFormat::I8,
    }
}

fn format_to_bits(fmt: ImageFormat) -> u8 {
    match fmt {
        ImageFormat::Rgba16 => 0,
        ImageFormat::Rgba32 => 1,
        ImageFormat::Ia8 => 2,
        ImageFormat::I8 => 3,
    }
}

/// Decodes one rasterizer command starting at `words[0]`. Returns the
/// decoded op and the number of words it consumed.
pub fn decode(words: &[u32]) -> (RasterOp, usize) {
    let tag = (words[0] >> 24) as u8;
    let op = match tag {
        TAG_SET_COLOR_IMAGE => RasterOp::SetColorImage {
            format: format_from_bits(words[0] as u8),
            width: (words[1] >> 16) as u16,
            height: words[1] as u16,
        },
        TAG_SET_Z_IMAGE => RasterOp::SetZImage,
        TAG_SET_TEXTURE_IMAGE => RasterOp::SetTextureImage {
            format: format_from_bits(words[0] as u8),
            width: words[1] as u16,
        },
        TAG_SET_OTHER_MODES => RasterOp::SetOtherModes {
            cycle: match words[0] & 0x3 {
                0 => CycleMode::Fill,
                1 => CycleMode::Copy,
                2 => CycleMode::OneCycle,
                _ => CycleMode::TwoCycle,
            },
        },
        TAG_SET_COMBINE => RasterOp::SetCombine {
            cycle0: combine_slot((words[0] >> 4) as u8 & 0x7),
            cycle1: combine_slot(words[0] as u8 & 0x7),
        },
        TAG_SET_TILE => RasterOp::SetTile {
            tile: (words[0] & 0x7) as u8,
            format: format_from_bits((words[0] >> 3) as u8),
            tmem_addr: (words[1] >> 16) as u16,
            pitch: words[1] as u16,
        },
        TAG_LOAD_TILE => RasterOp::LoadTile {
            tile: (words[0] & 0x7) as u8,
            s0: (words[1] >> 16) as u16,
            t0: words[1] as u16,
            s1: (words[2] >> 16) as u16,
            t1: words[2] as u16,
        },
        TAG_SET_SCISSOR => RasterOp::SetScissor {
            x0: (words[0] & 0xfff) as u16,
            y0: ((words[0] >> 12) & 0xfff) as u16,
            x1: (words[1] >> 16) as u16,
            y1: words[1] as u16,
        },
        TAG_SET_FILL_COLOR => RasterOp::SetFillColor { color: words[0] & 0x00ff_ffff },
        TAG_FILL_RECT => RasterOp::FillRect {
            x0: (words[0] & 0xfff) as u16,
            y0: ((words[0] >> 12) & 0xfff) as u16,
            x1: (words[1] >> 16) as u16,
            y1: words[1] as u16,
        },
        TAG_TEX_RECT => RasterOp::TexRect {
            tile: (words[0] & 0x7) as u8,
            x0: (words[0] >> 3 & 0xfff) as u16,
            y0: (words[2]) as u16,
            x1: (words[1] >> 16) as u16,
            y1: words[1] as u16,
        },
        TAG_SYNC_FULL => RasterOp::SyncFull,
        TAG_SYNC_PIPE => RasterOp::SyncPipe,
        TAG_SYNC_TILE => RasterOp::SyncTile,
        TAG_SYNC_LOAD => RasterOp::SyncLoad,
        _ => panic!("undecodable rasterizer tag {:#x}", tag),
    };
    (op, op.word_count())
}

fn combine_slot(bits: u8) -> CombineSlot {
    match bits {
        0 => CombineSlot::Combined,
        1 => CombineSlot::Tex0,
        2 => CombineSlot::Tex1,
        3 => CombineSlot::Shade,
        _ => CombineSlot::Constant,
    }
}

/// Re-encodes `op` to its word form. Used by tests to check the round-trip
/// property spec.md §8 requires ("disassembling a rasterizer command and
/// re-encoding the decoded fields yields the identical binary").
pub fn encode(op: RasterOp) -> ArrayVec<[u32; 3]> {
    let mut out = ArrayVec::new();
    match op {
        RasterOp::SetColorImage { format, width, height } => {
            out.push((u32::from(TAG_SET_COLOR_IMAGE) << 24) | u32::from(format_to_bits(format)));
            out.push((u32::from(width) << 16) | u32::from(height));
        }
        RasterOp::SetZImage => out.push(u32::from(TAG_SET_Z_IMAGE) << 24),
        RasterOp::SetTextureImage { format, width } => {
            out.push((u32::from(TAG_SET_TEXTURE_IMAGE) << 24) | u32::from(format_to_bits(format)));
            out.push(u32::from(width));
        }
        RasterOp::SetOtherModes { cycle } => {
            let bits = match cycle {
                CycleMode::Fill => 0,
                CycleMode::Copy => 1,
                CycleMode::OneCycle => 2,
                CycleMode::TwoCycle => 3,
            };
            out.push((u32::from(TAG_SET_OTHER_MODES) << 24) | bits);
        }
        RasterOp::SetCombine { cycle0, cycle1 } => {
            out.push(
                (u32::from(TAG_SET_COMBINE) << 24)
                    | (combine_bits(cycle0) << 4)
                    | combine_bits(cycle1),
            );
        }
        RasterOp::SetTile { tile, format, tmem_addr, pitch } => {
            out.push(
                (u32::from(TAG_SET_TILE) << 24)
                    | (u32::from(format_to_bits(format)) << 3)
                    | u32::from(tile),
            );
            out.push((u32::from(tmem_addr) << 16) | u32::from(pitch));
        }
        RasterOp::LoadTile { tile, s0, t0, s1, t1 } => {
            out.push((u32::from(TAG_LOAD_TILE) << 24) | u32::from(tile));
            out.push((u32::from(s0) << 16) | u32::from(t0));
            out.push((u32::from(s1) << 16) | u32::from(t1));
        }
        RasterOp::SetScissor { x0, y0, x1, y1 } => {
            out.push(
                (u32::from(TAG_SET_SCISSOR) << 24) | (u32::from(y0) << 12) | u32::from(x0),
            );
            out.push((u32::from(x1) << 16) | u32::from(y1));
        }
        RasterOp::SetFillColor { color } => {
            out.push((u32::from(TAG_SET_FILL_COLOR) << 24) | (color & 0x00ff_ffff));
        }
        RasterOp::FillRect { x0, y0, x1, y1 } => {
            out.push((u32::from(TAG_FILL_RECT) << 24) | (u32::from(y0) << 12) | u32::from(x0));
            out.push((u32::from(x1) << 16) | u32::from(y1));
        }
        RasterOp::TexRect { tile, x0, y0, x1, y1 } => {
            out.push((u32::from(TAG_TEX_RECT) << 24) | (u32::from(x0) << 3) | u32::from(tile));
            out.push((u32::from(x1) << 16) | u32::from(y1));
            out.push(u32::from(y0));
        }
        RasterOp::SyncFull => out.push(u32::from(TAG_SYNC_FULL) << 24),
        RasterOp::SyncPipe => out.push(u32::from(TAG_SYNC_PIPE) << 24),
        RasterOp::SyncTile => out.push(u32::from(TAG_SYNC_TILE) << 24),
        RasterOp::SyncLoad => out.push(u32::from(TAG_SYNC_LOAD) << 24),
    }
    out
}

fn combine_bits(slot: CombineSlot) -> u32 {
    match slot {
        CombineSlot::Combined => 0,
        CombineSlot::Tex0 => 1,
        CombineSlot::Tex1 => 2,
        CombineSlot::Shade => 3,
        CombineSlot::Constant => 4,
    }
}

/// External observer of each disassembled command, e.g. a textual logger or
/// a GUI inspector (spec §4.8: "a hook mechanism so external tools can
/// inspect each disassembled command"). The validator calls every
/// registered hook after updating shadow state for a command.
pub trait DisassemblyHook {
    fn on_command(&mut self, op: RasterOp);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_rect_round_trips() {
        let op = RasterOp::FillRect { x0: 1, y0: 2, x1: 32, y1: 32 };
        let words = encode(op);
        let (decoded, n) = decode(&words);
        assert_eq!(decoded, op);
        assert_eq!(n, words.len());
    }

    #[test]
    fn set_other_modes_round_trips_every_cycle() {
        for cycle in [CycleMode::Fill, CycleMode::Copy, CycleMode::OneCycle, CycleMode::TwoCycle] {
            let op = RasterOp::SetOtherModes { cycle };
            let words = encode(op);
            let (decoded, _) = decode(&words);
            assert_eq!(decoded, op);
        }
    }

    #[test]
    fn tex_rect_round_trips_including_y0() {
        let op = RasterOp::TexRect { tile: 3, x0: 10, y0: 400, x1: 20, y1: 30 };
        let words = encode(op);
        let (decoded, n) = decode(&words);
        assert_eq!(decoded, op);
        assert_eq!(n, words.len());
    }

    #[test]
    fn load_tile_round_trips_full_extent() {
        let op = RasterOp::LoadTile { tile: 2, s0: 1, t0: 2, s1: 99, t1: 4 };
        let words = encode(op);
        let (decoded, n) = decode(&words);
        assert_eq!(decoded, op);
        assert_eq!(n, words.len());
    }
}
