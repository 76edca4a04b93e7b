//! Validator shadow state (spec §4.8, Design Notes §9: "model each domain
//! as its own structure and have the dispatch function update exactly one
//! structure per input opcode").

use super::disasm::{CombineSlot, CycleMode, ImageFormat, RasterOp};

pub const TILE_COUNT: usize = 8;

#[derive(Clone, Copy, Debug, Default)]
pub struct TileDescriptor {
    pub format: Option<ImageFormat>,
    pub tmem_addr: u16,
    pub pitch: u16,
    pub loaded_extent: Option<(u16, u16, u16, u16)>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ImageState {
    pub format: Option<ImageFormat>,
    pub width: u16,
    pub height: u16,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ShadowState {
    pub other_modes: Option<CycleMode>,
    pub combine: Option<(CombineSlot, CombineSlot)>,
    pub tiles: [TileDescriptor; TILE_COUNT],
    pub color_image: ImageState,
    pub z_image: ImageState,
    pub texture_image: ImageState,
    pub scissor: Option<(u16, u16, u16, u16)>,
    /// Bit `i` set means tile `i` has an in-flight LOAD_TILE not yet
    /// cleared by a SYNC_TILE/SYNC_LOAD.
    pub tile_busy: u8,
    pub pipe_busy: bool,
    pub tmem_busy: bool,
}

impl ShadowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one decoded command's effect on shadow state. Does not
    /// itself raise diagnostics -- that is `Validator::observe`'s job,
    /// which calls this first and then inspects the updated state.
    pub fn apply(&mut self, op: RasterOp) {
        match op {
            RasterOp::SetColorImage { format, width, height } => {
                self.color_image = ImageState { format: Some(format), width, height };
            }
            RasterOp::SetZImage => {
                self.z_image.format = Some(ImageFormat::Rgba16);
            }
            RasterOp::SetTextureImage { format, width } => {
                self.texture_image = ImageState { format: Some(format), width, height: 0 };
            }
            RasterOp::SetOtherModes { cycle } => {
                self.other_modes = Some(cycle);
            }
            RasterOp::SetCombine { cycle0, cycle1 } => {
                self.combine = Some((cycle0, cycle1));
            }
            RasterOp::SetTile { tile, format, tmem_addr, pitch } => {
                let t = &mut self.tiles[tile as usize % TILE_COUNT];
                t.format = Some(format);
                t.tmem_addr = tmem_addr;
                t.pitch = pitch;
                t.loaded_extent = None;
            }
            RasterOp::LoadTile { tile, s0, t0, s1, t1 } => {
                let idx = tile as usize % TILE_COUNT;
                self.tiles[idx].loaded_extent = Some((s0, t0, s1, t1));
                self.tile_busy |= 1 << idx;
                self.tmem_busy = true;
            }
            RasterOp::SetScissor { x0, y0, x1, y1 } => {
                self.scissor = Some((x0, y0, x1, y1));
            }
            RasterOp::SetFillColor { .. } => {}
            RasterOp::FillRect { .. } | RasterOp::TexRect { .. } => {
                self.pipe_busy = true;
            }
            RasterOp::SyncFull => {
                self.pipe_busy = false;
                self.tile_busy = 0;
                self.tmem_busy = false;
            }
            RasterOp::SyncPipe => self.pipe_busy = false,
            RasterOp::SyncTile => self.tile_busy = 0,
            RasterOp::SyncLoad => self.tmem_busy = false,
        }
    }
}
