// tests/gpu_engine.rs: The wgpu compute engine against the CPU reference.
//
// All tests need a GPU adapter (software adapters are accepted):
//   cargo test --test gpu_engine -- --ignored

mod common;

use common::{assert_top_left_tiles, pixel_at, pixelate_once};
use obscura::compute::{pixelate_frame, ComputeEngine, FrameProcessor, OutputImage, SlotState};
use obscura::core::config::{DeviceConfig, EngineConfig, Pattern};
use obscura::core::error::{FrameError, GpuError};
use obscura::core::types::{Frame, Resolution};
use obscura::gpu::{DeviceContext, MemoryProperties};
use obscura::source::synthetic::render_pattern;
use std::sync::Arc;

fn context() -> Arc<DeviceContext> {
    let config = DeviceConfig {
        allow_software_adapter: true,
        ..DeviceConfig::default()
    };
    Arc::new(DeviceContext::initialize(&config).expect("GPU device"))
}

fn engine_with(ctx: Arc<DeviceContext>, width: u32, height: u32, slots: usize) -> ComputeEngine {
    let config = EngineConfig {
        width,
        height,
        slots,
        ..EngineConfig::default()
    };
    ComputeEngine::new(ctx, &config).expect("engine")
}

fn engine(width: u32, height: u32) -> ComputeEngine {
    engine_with(context(), width, height, 2)
}

// ===== Initialization =====

#[test]
#[ignore = "requires a GPU adapter"]
fn images_have_exactly_the_requested_resolution() {
    let ctx = context();
    for (w, h) in [(1, 1), (17, 5), (64, 64), (640, 480)] {
        let engine = engine_with(Arc::clone(&ctx), w, h, 2);
        assert_eq!(engine.resolution(), Resolution::new(w, h));
        for slot in 0..engine.slot_count() {
            let res = engine.slot_resources(slot).unwrap();
            assert_eq!((res.input.texture.width(), res.input.texture.height()), (w, h));
            assert_eq!((res.output.texture.width(), res.output.texture.height()), (w, h));
            assert_eq!(engine.slot_state(slot), Some(SlotState::Idle));
        }
    }
}

#[test]
#[ignore = "requires a GPU adapter"]
fn oversized_resolution_fails_startup() {
    let ctx = context();
    let too_big = ctx.limits().max_texture_dimension_2d + 1;
    let config = EngineConfig {
        width: too_big,
        height: 16,
        ..EngineConfig::default()
    };
    assert!(matches!(
        ComputeEngine::new(ctx, &config),
        Err(GpuError::UnsupportedResolution { .. })
    ));
}

#[test]
#[ignore = "requires a GPU adapter"]
fn memory_types_resolve_for_every_resource() {
    let ctx = context();
    let table = ctx.memory_types();
    let device_local = ctx
        .resolve_memory_type(u32::MAX, MemoryProperties::DEVICE_LOCAL)
        .unwrap();
    assert!(table.get(device_local).is_some());
    assert!(matches!(
        ctx.resolve_memory_type(0, MemoryProperties::DEVICE_LOCAL),
        Err(GpuError::NoCompatibleMemoryType { .. })
    ));
}

// ===== Transform =====

#[test]
#[ignore = "requires a GPU adapter"]
fn modular_frame_block_8_matches_reference() {
    let res = Resolution::new(64, 64);
    let mut engine = engine(64, 64);
    let input = render_pattern(Pattern::Modular, res);

    let out = pixelate_once(&mut engine, &input, 8);
    assert_top_left_tiles(&input, &out, 8);
    assert_eq!(out, pixelate_frame(&input, 8));
    assert_eq!(pixel_at(&out, res, 23, 47), [16, 40, 56, 255]);
}

#[test]
#[ignore = "requires a GPU adapter"]
fn gradient_round_trip_is_exact() {
    let res = Resolution::new(200, 120);
    let mut engine = engine(200, 120);
    let input = render_pattern(Pattern::Gradient, res);
    assert_eq!(pixelate_once(&mut engine, &input, 1), input.data);
}

#[test]
#[ignore = "requires a GPU adapter"]
fn odd_sizes_and_blocks_match_reference() {
    let res = Resolution::new(103, 37);
    let mut engine = engine(103, 37);
    let input = render_pattern(Pattern::Modular, res);
    for block in [1, 2, 5, 16, 40, 200] {
        assert_eq!(
            pixelate_once(&mut engine, &input, block),
            pixelate_frame(&input, block),
            "block {block}"
        );
    }
}

#[test]
#[ignore = "requires a GPU adapter"]
fn strided_upload_matches_packed() {
    let res = Resolution::new(33, 9);
    let packed = render_pattern(Pattern::Gradient, res);
    let stride = 33 * 4 + 20;
    let mut data = vec![0x5A; stride * 9];
    for y in 0..9 {
        data[y * stride..y * stride + 132].copy_from_slice(&packed.data[y * 132..(y + 1) * 132]);
    }
    let strided = Frame::with_stride(33, 9, stride as u32, data);

    let mut engine = engine(33, 9);
    assert_eq!(pixelate_once(&mut engine, &strided, 3), pixelate_frame(&packed, 3));
}

// ===== Slots and errors =====

#[test]
#[ignore = "requires a GPU adapter"]
fn size_mismatch_leaves_engine_idle() {
    let mut engine = engine(64, 64);
    let frame = Frame::packed(64, 64, vec![0; 64 * 64 * 4 + 4]);
    let err = engine.process_frame(&frame, 8).unwrap_err();
    assert!(matches!(err, FrameError::SizeMismatch { .. }));
    assert!(engine.is_idle());

    let good = render_pattern(Pattern::Modular, Resolution::new(64, 64));
    let out = pixelate_once(&mut engine, &good, 8);
    assert_top_left_tiles(&good, &out, 8);
}

#[test]
#[ignore = "requires a GPU adapter"]
fn two_slots_overlap_without_clobbering() {
    let res = Resolution::new(48, 48);
    let mut engine = engine(48, 48);
    let a = render_pattern(Pattern::Modular, res);
    let b = render_pattern(Pattern::Gradient, res);

    let ta = engine.process_frame(&a, 4).unwrap();
    let tb = engine.process_frame(&b, 6).unwrap();
    assert_ne!(ta.slot, tb.slot);

    engine.wait(tb).unwrap();
    engine.wait(ta).unwrap();
    let out_a = engine.output(ta).unwrap().host_pixels().unwrap().to_vec();
    let out_b = engine.output(tb).unwrap().host_pixels().unwrap().to_vec();
    assert_eq!(out_a, pixelate_frame(&a, 4));
    assert_eq!(out_b, pixelate_frame(&b, 6));
    engine.release(ta).unwrap();
    engine.release(tb).unwrap();
    assert_eq!(engine.stats().submitted, 2);
}

#[test]
#[ignore = "requires a GPU adapter"]
fn reset_invalidates_tickets() {
    let res = Resolution::new(32, 32);
    let mut engine = engine(32, 32);
    let frame = render_pattern(Pattern::Modular, res);

    let ticket = engine.process_frame(&frame, 2).unwrap();
    engine.reset().unwrap();
    assert!(engine.is_idle());
    assert!(matches!(
        engine.wait(ticket),
        Err(FrameError::StaleTicket { .. })
    ));

    let out = pixelate_once(&mut engine, &frame, 2);
    assert_eq!(out, pixelate_frame(&frame, 2));
}

#[test]
#[ignore = "requires a GPU adapter"]
fn fence_timeout_resets_engine_and_next_frame_succeeds() {
    // A zero fence timeout gives up after one poll, so a large frame is
    // reported as a hang long before the GPU finishes it.
    let res = Resolution::new(1920, 1080);
    let config = EngineConfig {
        width: res.width,
        height: res.height,
        slots: 2,
        fence_timeout_ms: 0,
        readback: false,
        ..EngineConfig::default()
    };
    let mut engine = ComputeEngine::new(context(), &config).expect("engine");
    let frame = render_pattern(Pattern::Gradient, res);

    let mut hung = None;
    for _ in 0..16 {
        let ticket = engine.process_frame(&frame, 8).unwrap();
        match engine.wait(ticket) {
            Ok(()) => engine.release(ticket).unwrap(),
            Err(err) => {
                hung = Some((ticket, err));
                break;
            }
        }
    }
    let (stale, err) = hung.expect("a zero fence timeout never reported a hang");
    assert!(matches!(err, FrameError::DeviceHang { .. }));
    assert!(err.is_recoverable());
    assert!(engine.is_idle());
    assert_eq!(engine.stats().resets, 1);
    assert!(matches!(engine.release(stale), Err(FrameError::StaleTicket { .. })));

    // Give the GPU time to finish so the single poll of the next wait sees
    // the fence signaled.
    let next = engine.process_frame(&frame, 8).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(500));
    engine.wait(next).unwrap();
    assert!(matches!(engine.output(next).unwrap(), OutputImage::Device(_)));
    engine.release(next).unwrap();
    assert!(engine.is_idle());
}

#[test]
#[ignore = "requires a GPU adapter"]
fn without_readback_output_stays_on_device() {
    let config = EngineConfig {
        width: 16,
        height: 16,
        readback: false,
        ..EngineConfig::default()
    };
    let mut engine = ComputeEngine::new(context(), &config).unwrap();
    let frame = render_pattern(Pattern::Gradient, Resolution::new(16, 16));

    let ticket = engine.process_frame(&frame, 4).unwrap();
    engine.wait(ticket).unwrap();
    match engine.output(ticket).unwrap() {
        OutputImage::Device(image) => assert_eq!(image.resolution, Resolution::new(16, 16)),
        OutputImage::Host { .. } => panic!("expected a device image"),
    }
    engine.release(ticket).unwrap();
}
