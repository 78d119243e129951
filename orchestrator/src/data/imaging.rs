use std::path::Path;

use image::{Rgb, RgbImage, imageops::FilterType};
use machine_learning::MlErr;
use ndarray::{Array3, ArrayView3};

use crate::{configs::IMAGE_CHANNELS, error::Result};

/// Decodes the image at `path`, resizes it to `size` squared and maps it to `[-1, 1]`.
///
/// # Returns
/// A `[size, size, 3]` image.
pub fn load_image(path: &Path, size: usize) -> Result<Array3<f32>> {
    let side = size as u32;
    let img = image::open(path)?.to_rgb8();
    let img = image::imageops::resize(&img, side, side, FilterType::Triangle);

    Ok(Array3::from_shape_fn((size, size, IMAGE_CHANNELS), |(y, x, c)| {
        f32::from(img.get_pixel(x as u32, y as u32)[c]) / 127.5 - 1.
    }))
}

/// Maps a `[h, w, 3]` image in `[-1, 1]` back to 8 bit RGB, clamping out of range values.
pub fn to_rgb(image: ArrayView3<f32>) -> Result<RgbImage> {
    let (h, w, c) = image.dim();
    if c != IMAGE_CHANNELS {
        return Err(MlErr::ShapeMismatch {
            what: "rgb image",
            got: vec![h, w, c],
            expected: vec![h, w, IMAGE_CHANNELS],
        }
        .into());
    }

    Ok(RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([
            quantize(image[[y, x, 0]]),
            quantize(image[[y, x, 1]]),
            quantize(image[[y, x, 2]]),
        ])
    }))
}

/// Writes `image` to `path`, the format follows the extension.
pub fn save_image(path: &Path, image: ArrayView3<f32>) -> Result<()> {
    to_rgb(image)?.save(path)?;
    Ok(())
}

fn quantize(value: f32) -> u8 {
    ((value.clamp(-1., 1.) + 1.) * 127.5).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_covers_the_full_range() {
        assert_eq!(quantize(-1.), 0);
        assert_eq!(quantize(1.), 255);
        assert_eq!(quantize(7.), 255);
        assert_eq!(quantize(-3.), 0);
    }

    #[test]
    fn images_survive_a_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");

        let image = Array3::from_shape_fn((4, 4, 3), |(y, x, c)| {
            [-1., 0., 1.][(y + x + c) % 3]
        });
        save_image(&path, image.view()).unwrap();

        let loaded = load_image(&path, 4).unwrap();
        assert_eq!(loaded.dim(), (4, 4, 3));
        loaded
            .iter()
            .zip(image.iter())
            .for_each(|(a, b)| assert!((a - b).abs() < 0.01));
    }

    #[test]
    fn rejects_non_rgb_images() {
        let image = Array3::<f32>::zeros((2, 2, 1));
        assert!(to_rgb(image.view()).is_err());
    }
}
