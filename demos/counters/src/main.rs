//! Runnable demonstration of `gfxq::Engine` driven by the `gfxq-sim`
//! stand-in kernel, playing the role of the teacher's `m4demos` binaries: a
//! non-interactive, non-CLI program that exercises the library end to end
//! and prints what happened, rather than a product surface.

use core::mem::MaybeUninit;
use std::sync::atomic::Ordering;

use gfxq::arena::Arena;
use gfxq::config::Config;
use gfxq::Engine;
use gfxq_sim::fixtures::{counter_descriptor, CounterOverlay, ADD_SMALL, HIGH_SET};
use gfxq_sim::Kernel;

fn backing(bytes: usize) -> &'static mut [MaybeUninit<u8>] {
    let v = vec![MaybeUninit::uninit(); bytes].into_boxed_slice();
    Box::leak(v)
}

fn main() {
    let cfg = Config {
        normal_region_words: 2048,
        highpri_region_words: 256,
        ..Default::default()
    };
    let mut engine = Engine::new(cfg, Arena::new(backing(4 * 1024 * 1024)));
    let id = engine.register_overlay(&counter_descriptor()).unwrap();
    let mut kernel = Kernel::new();
    kernel.register_overlay_handler(id, CounterOverlay);

    for _ in 0..1024 {
        engine.write(id, ADD_SMALL, 0, &[]);
    }
    kernel.pump_wait(&mut engine);
    let after_normal = engine.overlay_state_raw(id).unwrap()[0].load(Ordering::Relaxed);
    println!("1024 queued adds -> counter reads {}", after_normal);

    engine.block_begin();
    for _ in 0..512 {
        engine.write(id, ADD_SMALL, 0, &[]);
    }
    let block = engine.block_end();
    for _ in 0..4 {
        engine.block_run(block);
    }
    kernel.pump_wait(&mut engine);
    let after_block = engine.overlay_state_raw(id).unwrap()[0].load(Ordering::Relaxed);
    println!("512-command block replayed 4x -> counter reads {}", after_block);
    engine.block_free(block);

    for _ in 0..1024 {
        engine.write(id, ADD_SMALL, 0, &[]);
    }
    for _ in 0..50 {
        kernel.step(&mut engine);
    }
    engine.highpri_begin();
    engine.write(id, HIGH_SET, 123, &[]);
    engine.highpri_end();
    kernel.run_until_highpri_drained(&mut engine);
    engine.highpri_sync();
    let state = engine.overlay_state_raw(id).unwrap();
    println!(
        "high-priority segment ran ahead of the normal backlog -> high-priority={}, normal={}",
        state[1].load(Ordering::Relaxed),
        state[0].load(Ordering::Relaxed),
    );
}
