//! Attachment Stack (spec §4.7): a bounded LIFO of render targets.

use arrayvec::ArrayVec;

/// A bound pair of surfaces: a color image and an optional depth image.
/// Surface identity is opaque to this crate (display/file-loading surface
/// management is a Non-goal); callers pass whatever host-side handle type
/// they use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub color: u32,
    pub depth: Option<u32>,
}

/// Whether a Z-buffer clear can use the coprocessor's fast DMA fill path
/// (spec §4.7: "when the buffer size is a supported aligned multiple") or
/// must fall back to a rasterizer fill-rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZClearMethod {
    FastDmaFill,
    FallbackFillRect,
}

/// Decides the clear method for a depth buffer of `depth_bytes`, aligned
/// DMA fill requiring a multiple of `dma_alignment` bytes.
pub fn z_clear_method(depth_bytes: u32, dma_alignment: u32) -> ZClearMethod {
    if depth_bytes % dma_alignment == 0 {
        ZClearMethod::FastDmaFill
    } else {
        ZClearMethod::FallbackFillRect
    }
}

/// Bounded depth-4 stack of render targets (spec §4.7).
pub struct AttachStack {
    stack: ArrayVec<[Frame; 4]>,
}

impl AttachStack {
    pub fn new() -> Self {
        AttachStack {
            stack: ArrayVec::new(),
        }
    }

    /// Pushes `frame`. The caller (`Engine::attach`) is responsible for
    /// actually installing the rasterizer's color image, Z image, and
    /// scissor on the full surface; this only tracks the LIFO bookkeeping.
    pub fn attach(&mut self, frame: Frame) {
        assert!(
            !self.stack.is_full(),
            "attachment stack depth {} exceeded",
            self.stack.capacity()
        );
        self.stack.push(frame);
    }

    /// Like `attach`, but additionally decides whether the new target's Z
    /// buffer (if any) should be cleared via fast DMA fill or a fallback
    /// fill-rectangle, given its byte size and the coprocessor's DMA
    /// alignment. Returns `None` if `frame` has no depth buffer to clear.
    /// The caller (`Engine::attach_clear`) performs the actual install and
    /// clear; this only tracks bookkeeping and picks the method.
    pub fn attach_clear(&mut self, frame: Frame, depth_bytes: u32, dma_alignment: u32) -> Option<ZClearMethod> {
        self.attach(frame);
        frame.depth.map(|_| z_clear_method(depth_bytes, dma_alignment))
    }

    /// Pops the current target, restoring the prior pair (if any).
    pub fn detach(&mut self) -> Option<Frame> {
        self.stack.pop()
    }

    pub fn is_attached(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn get_attached(&self) -> Option<Frame> {
        self.stack.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

impl Default for AttachStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_detach_restores_prior_frame() {
        let mut stack = AttachStack::new();
        let a = Frame { color: 1, depth: None };
        let b = Frame { color: 2, depth: Some(9) };
        stack.attach(a);
        stack.attach(b);
        assert_eq!(stack.get_attached(), Some(b));
        assert_eq!(stack.detach(), Some(b));
        assert_eq!(stack.get_attached(), Some(a));
    }

    #[test]
    #[should_panic(expected = "exceeded")]
    fn attach_beyond_depth_four_panics() {
        let mut stack = AttachStack::new();
        for i in 0..5 {
            stack.attach(Frame { color: i, depth: None });
        }
    }

    #[test]
    fn z_clear_method_depends_on_alignment() {
        assert_eq!(z_clear_method(256, 64), ZClearMethod::FastDmaFill);
        assert_eq!(z_clear_method(100, 64), ZClearMethod::FallbackFillRect);
    }

    #[test]
    fn attach_clear_with_no_depth_buffer_needs_no_clear() {
        let mut stack = AttachStack::new();
        let method = stack.attach_clear(Frame { color: 1, depth: None }, 256, 64);
        assert_eq!(method, None);
        assert!(stack.is_attached());
    }

    #[test]
    fn attach_clear_picks_method_from_depth_buffer_size() {
        let mut stack = AttachStack::new();
        let method = stack.attach_clear(Frame { color: 1, depth: Some(2) }, 100, 64);
        assert_eq!(method, Some(ZClearMethod::FallbackFillRect));
    }
}
