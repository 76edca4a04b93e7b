//! Command word layout (spec §6).
//!
//! ```text
//! bits 31..28  overlay_id   (0 = internal)
//! bits 27..24  command_index
//! bits 23..0   caller-chosen first-word payload
//! ```

/// Overlay ID reserved for the engine's own internal opcodes.
pub const INTERNAL_OVERLAY: u8 = 0;

#[inline]
pub fn pack_word0(overlay_id: u8, command_index: u8, payload: u32) -> u32 {
    debug_assert!(overlay_id < 16, "overlay id {} out of range", overlay_id);
    debug_assert!(command_index < 16, "command index {} out of range", command_index);
    debug_assert!(
        payload & !0x00ff_ffff == 0,
        "first-word payload {:#x} uses reserved bits",
        payload
    );
    ((overlay_id as u32) << 28) | ((command_index as u32) << 24) | (payload & 0x00ff_ffff)
}

#[inline]
pub fn overlay_id(word0: u32) -> u8 {
    (word0 >> 28) as u8 & 0xf
}

#[inline]
pub fn command_index(word0: u32) -> u8 {
    (word0 >> 24) as u8 & 0xf
}

#[inline]
pub fn payload(word0: u32) -> u32 {
    word0 & 0x00ff_ffff
}

/// Internal (overlay 0) command indices, per spec §6.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Internal {
    Invalid = 0x0,
    Noop = 0x1,
    Jump = 0x2,
    Call = 0x3,
    Ret = 0x4,
    Dma = 0x5,
    WriteStatus = 0x6,
    SwapBuffers = 0x7,
    TestWriteStatus = 0x8,
    RdpDispatch = 0x9,
    RdpWaitIdle = 0xa,
    /// A dynamic rasterizer command whose real encoding depends on
    /// kernel-tracked context not known at record time (spec §4.6). Word 0's
    /// payload carries a fixup id; word 1/word 2 carry the optional static
    /// placeholder's `[start, end)` addresses (`addr::NONE` if this fixup
    /// was recorded outside a block).
    RdpFixup = 0xb,
    /// Installs the currently attached frame's color image, Z image, and
    /// scissor on the rasterizer (spec §4.7). Carries no words of its own;
    /// the kernel reads the attached frame straight off the engine.
    AttachInstall = 0xc,
    /// Performs the fallback fill-rectangle clear for a Z buffer whose size
    /// isn't DMA-alignment-friendly (spec §4.7).
    AttachClearFallback = 0xd,
}

impl Internal {
    pub fn from_index(index: u8) -> Option<Self> {
        Some(match index {
            0x0 => Internal::Invalid,
            0x1 => Internal::Noop,
            0x2 => Internal::Jump,
            0x3 => Internal::Call,
            0x4 => Internal::Ret,
            0x5 => Internal::Dma,
            0x6 => Internal::WriteStatus,
            0x7 => Internal::SwapBuffers,
            0x8 => Internal::TestWriteStatus,
            0x9 => Internal::RdpDispatch,
            0xa => Internal::RdpWaitIdle,
            0xb => Internal::RdpFixup,
            0xc => Internal::AttachInstall,
            0xd => Internal::AttachClearFallback,
            _ => return None,
        })
    }

    /// Total word count of this internal command, word 0 included.
    pub fn word_count(self) -> usize {
        match self {
            Internal::Invalid | Internal::Noop | Internal::Ret
            | Internal::SwapBuffers | Internal::RdpWaitIdle
            | Internal::AttachInstall | Internal::AttachClearFallback => 1,
            Internal::Jump | Internal::Call | Internal::WriteStatus => 2,
            Internal::TestWriteStatus | Internal::RdpDispatch | Internal::RdpFixup => 3,
            Internal::Dma => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let w = pack_word0(5, 3, 0x1234);
        assert_eq!(overlay_id(w), 5);
        assert_eq!(command_index(w), 3);
        assert_eq!(payload(w), 0x1234);
    }

    #[test]
    fn internal_word_counts_are_known() {
        assert_eq!(Internal::Noop.word_count(), 1);
        assert_eq!(Internal::Jump.word_count(), 2);
        assert_eq!(Internal::Dma.word_count(), 4);
    }
}
