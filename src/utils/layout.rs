//! Channel layout conversion between stored samples and convolution inputs.
//!
//! Samples are stored height × width × channels; the convolution layers work
//! on channels × height × width planes.

use crate::data::ImageShape;

/// Reorder a batch of HWC images into CHW planes.
pub fn hwc_to_chw(input: &[f32], shape: ImageShape, batch_size: usize) -> Vec<f32> {
    let (h, w, c) = (shape.height, shape.width, shape.channels);
    let per_image = shape.len();
    let mut output = vec![0.0f32; per_image * batch_size];

    for b in 0..batch_size {
        let base = b * per_image;
        for y in 0..h {
            for x in 0..w {
                for ch in 0..c {
                    output[base + ch * h * w + y * w + x] = input[base + (y * w + x) * c + ch];
                }
            }
        }
    }
    output
}

/// Reorder a batch of CHW planes back into HWC images.
pub fn chw_to_hwc(input: &[f32], shape: ImageShape, batch_size: usize) -> Vec<f32> {
    let (h, w, c) = (shape.height, shape.width, shape.channels);
    let per_image = shape.len();
    let mut output = vec![0.0f32; per_image * batch_size];

    for b in 0..batch_size {
        let base = b * per_image;
        for ch in 0..c {
            for y in 0..h {
                for x in 0..w {
                    output[base + (y * w + x) * c + ch] = input[base + ch * h * w + y * w + x];
                }
            }
        }
    }
    output
}
