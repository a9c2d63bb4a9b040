// tests/common/mod.rs: helpers shared by the CPU and GPU integration tests.

#![allow(dead_code)]

use obscura::compute::{FrameProcessor, OutputImage};
use obscura::core::types::{Frame, Resolution};

/// Push one frame through `processor` and return the host pixels.
pub fn pixelate_once<P: FrameProcessor + ?Sized>(processor: &mut P, frame: &Frame, block: u32) -> Vec<u8> {
    let ticket = processor.process_frame(frame, block).unwrap();
    processor.wait(ticket).unwrap();
    let pixels = match processor.output(ticket).unwrap() {
        OutputImage::Host { pixels, .. } => pixels.to_vec(),
        OutputImage::Device(_) => panic!("processor has readback disabled"),
    };
    processor.release(ticket).unwrap();
    pixels
}

/// RGBA of pixel (x, y) in a tightly packed buffer.
pub fn pixel_at(pixels: &[u8], resolution: Resolution, x: u32, y: u32) -> [u8; 4] {
    let i = ((y * resolution.width + x) * 4) as usize;
    [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
}

/// Check that every aligned block is one colour, equal to the input's
/// top-left pixel of that block.
pub fn assert_top_left_tiles(input: &Frame, output: &[u8], block: u32) {
    let resolution = input.resolution();
    assert_eq!(output.len(), resolution.frame_bytes());
    for y in 0..resolution.height {
        for x in 0..resolution.width {
            let expected = input.pixel((x / block) * block, (y / block) * block);
            assert_eq!(
                pixel_at(output, resolution, x, y),
                expected,
                "pixel ({x}, {y}) with block {block}"
            );
        }
    }
}
