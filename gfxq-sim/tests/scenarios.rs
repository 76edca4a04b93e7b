//! End-to-end coverage driving `gfxq::Engine` through the stand-in kernel in
//! `gfxq_sim`, the way the teacher's `fx/*` demo crates exercise `m4vga` end
//! to end rather than only unit-testing its pieces.

use core::mem::MaybeUninit;
use std::sync::atomic::Ordering;

use gfxq::arena::Arena;
use gfxq::config::Config;
use gfxq::Engine;
use gfxq_sim::fixtures::{
    counter_descriptor, crash_descriptor, fill_descriptor, CounterOverlay, CrashOverlay,
    FillColorByCycleModeFixup, FillOverlay, OpLog, SoftwareRasterizer, ADD_SMALL,
    CRASH_COPY_MODE_ON_32BPP, FILL_SOLID, HIGH_SET,
};
use gfxq_sim::Kernel;

fn backing(bytes: usize) -> &'static mut [MaybeUninit<u8>] {
    let v = vec![MaybeUninit::uninit(); bytes].into_boxed_slice();
    Box::leak(v)
}

fn engine_with(cfg: Config) -> Engine {
    Engine::new(cfg, Arena::new(backing(4 * 1024 * 1024)))
}

fn big_ring_config() -> Config {
    Config {
        normal_region_words: 2048,
        highpri_region_words: 256,
        ..Default::default()
    }
}

#[test]
fn thousand_adds_then_wait_reaches_expected_count() {
    let mut engine = engine_with(big_ring_config());
    let id = engine.register_overlay(&counter_descriptor()).unwrap();
    let mut kernel = Kernel::new();
    kernel.register_overlay_handler(id, CounterOverlay);

    for _ in 0..1024 {
        engine.write(id, ADD_SMALL, 0, &[]);
    }
    kernel.pump_wait(&mut engine);

    let state = engine.overlay_state_raw(id).unwrap();
    assert_eq!(state[0].load(Ordering::Relaxed), 1024);
}

#[test]
fn block_replayed_four_times_quadruples_the_recorded_count() {
    let mut engine = engine_with(big_ring_config());
    let id = engine.register_overlay(&counter_descriptor()).unwrap();
    let mut kernel = Kernel::new();
    kernel.register_overlay_handler(id, CounterOverlay);

    engine.block_begin();
    for _ in 0..512 {
        engine.write(id, ADD_SMALL, 0, &[]);
    }
    let block = engine.block_end();

    for _ in 0..4 {
        engine.block_run(block);
    }
    kernel.pump_wait(&mut engine);

    let state = engine.overlay_state_raw(id).unwrap();
    assert_eq!(state[0].load(Ordering::Relaxed), 2048);

    engine.block_free(block);
}

#[test]
fn highpri_segment_preempts_a_long_running_normal_backlog() {
    let mut engine = engine_with(big_ring_config());
    let id = engine.register_overlay(&counter_descriptor()).unwrap();
    let mut kernel = Kernel::new();
    kernel.register_overlay_handler(id, CounterOverlay);

    for _ in 0..1024 {
        engine.write(id, ADD_SMALL, 0, &[]);
    }
    // Advance partway through the normal backlog before the high-priority
    // segment shows up, modeling "1024 long-running commands in flight".
    for _ in 0..50 {
        kernel.step(&mut engine);
    }

    engine.highpri_begin();
    engine.write(id, HIGH_SET, 123, &[]);
    engine.highpri_end();
    kernel.run_until_highpri_drained(&mut engine);
    engine.highpri_sync();

    let state = engine.overlay_state_raw(id).unwrap();
    assert_eq!(state[1].load(Ordering::Relaxed), 123);
    assert!(
        state[0].load(Ordering::Relaxed) < 1024,
        "high-priority segment should have run well before the normal backlog drained"
    );
}

#[test]
fn fill_rect_writes_white_into_every_pixel() {
    let mut engine = engine_with(Config::default());
    let id = engine.register_overlay(&fill_descriptor(32, 32)).unwrap();
    let mut kernel = Kernel::new();
    kernel.register_overlay_handler(id, FillOverlay);

    let rasterizer = SoftwareRasterizer::default();
    engine
        .validator_mut()
        .register_hook(Box::leak(Box::new(rasterizer.clone())));

    engine.write(id, FILL_SOLID, 0xFFFF, &[]);
    kernel.run_until_idle(&mut engine);

    for y in 0..32 {
        for x in 0..32 {
            assert_eq!(rasterizer.pixel(x, y), 0xFFFF, "pixel ({}, {})", x, y);
        }
    }
}

#[test]
fn fill_sequence_disassembles_to_the_expected_op_sequence() {
    use gfxq::validate::disasm::{CycleMode, ImageFormat, RasterOp};

    let mut engine = engine_with(Config::default());
    let id = engine.register_overlay(&fill_descriptor(32, 32)).unwrap();
    let mut kernel = Kernel::new();
    kernel.register_overlay_handler(id, FillOverlay);

    let log = OpLog::default();
    engine
        .validator_mut()
        .register_hook(Box::leak(Box::new(log.clone())));

    engine.write(id, FILL_SOLID, 0xFFFF, &[]);
    kernel.run_until_idle(&mut engine);

    assert_eq!(
        log.ops(),
        vec![
            RasterOp::SetColorImage { format: ImageFormat::Rgba16, width: 32, height: 32 },
            RasterOp::SetOtherModes { cycle: CycleMode::Fill },
            RasterOp::SetFillColor { color: 0xFFFF },
            RasterOp::SetScissor { x0: 0, y0: 0, x1: 32, y1: 32 },
            RasterOp::FillRect { x0: 0, y0: 0, x1: 32, y1: 32 },
            RasterOp::SyncFull,
        ]
    );
}

#[test]
fn block_mode_replays_static_dispatches_and_resolves_a_fixup_against_recorded_context() {
    use gfxq::validate::disasm::{encode, CycleMode, ImageFormat, RasterOp};

    static FIXUP: FillColorByCycleModeFixup = FillColorByCycleModeFixup {
        fill_color: 0x1111,
        other_color: 0x2222,
    };

    let mut engine = engine_with(Config::default());
    let fixup_id = engine.register_fixup(&FIXUP);

    let rasterizer = SoftwareRasterizer::default();
    engine
        .validator_mut()
        .register_hook(Box::leak(Box::new(rasterizer.clone())));
    let log = OpLog::default();
    engine
        .validator_mut()
        .register_hook(Box::leak(Box::new(log.clone())));

    engine.block_begin();
    // Two contiguous static writes -- these are expected to coalesce into a
    // single RDP_DISPATCH (covered directly in block.rs's own tests, which
    // have access to the chunk internals this crate's tests don't).
    engine.write_rdp_static(&encode(RasterOp::SetColorImage {
        format: ImageFormat::Rgba16,
        width: 4,
        height: 4,
    }));
    engine.write_rdp_static(&encode(RasterOp::SetOtherModes { cycle: CycleMode::Fill }));
    // The fixup reservation breaks coalescing: its resolved fill color
    // depends on the cycle mode the two writes above just established.
    engine.write_rdp_fixup(fixup_id, 1);
    engine.write_rdp_static(&encode(RasterOp::SetScissor { x0: 0, y0: 0, x1: 4, y1: 4 }));
    engine.write_rdp_static(&encode(RasterOp::FillRect { x0: 0, y0: 0, x1: 4, y1: 4 }));
    engine.write_rdp_static(&encode(RasterOp::SyncFull));
    let block = engine.block_end();

    engine.block_run(block);
    let mut kernel = Kernel::new();
    kernel.run_until_idle(&mut engine);

    assert_eq!(
        log.ops(),
        vec![
            RasterOp::SetColorImage { format: ImageFormat::Rgba16, width: 4, height: 4 },
            RasterOp::SetOtherModes { cycle: CycleMode::Fill },
            RasterOp::SetFillColor { color: 0x1111 },
            RasterOp::SetScissor { x0: 0, y0: 0, x1: 4, y1: 4 },
            RasterOp::FillRect { x0: 0, y0: 0, x1: 4, y1: 4 },
            RasterOp::SyncFull,
        ]
    );
    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(rasterizer.pixel(x, y), 0x1111, "pixel ({}, {})", x, y);
        }
    }

    engine.block_free(block);
}

#[test]
fn copy_mode_on_a_32bpp_color_image_raises_a_crash_diagnostic() {
    let mut engine = engine_with(Config::default());
    let id = engine.register_overlay(&crash_descriptor()).unwrap();
    let mut kernel = Kernel::new();
    kernel.register_overlay_handler(id, CrashOverlay);

    engine.write(id, CRASH_COPY_MODE_ON_32BPP, 0, &[]);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        kernel.run_until_idle(&mut engine);
    }));
    assert!(result.is_err(), "copy mode on a 32bpp image should raise a crash-class diagnostic");
}
