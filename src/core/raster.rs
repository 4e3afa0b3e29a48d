//! Raster images, scalar maps and boolean masks.
//!
//! All pixel math in the crate happens on [`Raster`] values: row-major RGB in
//! [0,1] stored as `Vector3<f32>`. Conversion to 8-bit images only happens at
//! the I/O boundary (saving PNGs, decoding fetched images).
//!
//! Resizing goes through the `image` crate's Catmull-Rom (bicubic) filter on
//! `f32` buffers and the result is clamped back into [0,1], since bicubic
//! kernels overshoot near hard edges.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, Rgb32FImage, RgbImage};
use nalgebra::Vector3;

/// An RGB image with `f32` channels in [0,1].
#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<Vector3<f32>>,
}

impl Raster {
    /// A raster where every pixel has the same color.
    pub fn filled(width: u32, height: u32, color: Vector3<f32>) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; (width as usize) * (height as usize)],
        }
    }

    /// Build a raster from row-major pixels.
    ///
    /// Panics if `pixels.len() != width * height`.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<Vector3<f32>>) -> Self {
        assert_eq!(pixels.len(), (width as usize) * (height as usize));
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> Vector3<f32>) -> Self {
        let mut pixels = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Convert any decoded image (8/16-bit, alpha, grayscale) to RGB in [0,1].
    pub fn from_dynamic(img: &DynamicImage) -> Self {
        let rgb = img.to_rgb32f();
        Self::from_rgb32f(&rgb)
    }

    pub fn from_rgb8(img: &RgbImage) -> Self {
        Self::from_fn(img.width(), img.height(), |x, y| {
            let p = img.get_pixel(x, y);
            Vector3::new(
                p[0] as f32 / 255.0,
                p[1] as f32 / 255.0,
                p[2] as f32 / 255.0,
            )
        })
    }

    fn from_rgb32f(img: &Rgb32FImage) -> Self {
        Self::from_fn(img.width(), img.height(), |x, y| {
            let p = img.get_pixel(x, y);
            Vector3::new(
                p[0].clamp(0.0, 1.0),
                p[1].clamp(0.0, 1.0),
                p[2].clamp(0.0, 1.0),
            )
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[Vector3<f32>] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [Vector3<f32>] {
        &mut self.pixels
    }

    pub fn into_pixels(self) -> Vec<Vector3<f32>> {
        self.pixels
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Vector3<f32> {
        self.pixels[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: Vector3<f32>) {
        let i = self.index(x, y);
        self.pixels[i] = value;
    }

    /// Quantize to 8-bit RGB for saving.
    pub fn to_rgb8(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let p = self.get(x, y);
            Rgb([to_u8(p.x), to_u8(p.y), to_u8(p.z)])
        })
    }

    pub fn to_rgb32f(&self) -> Rgb32FImage {
        ImageBuffer::from_fn(self.width, self.height, |x, y| {
            let p = self.get(x, y);
            Rgb([p.x, p.y, p.z])
        })
    }

    /// Bicubic resize. Returns a clone when the size already matches.
    pub fn resize(&self, width: u32, height: u32) -> Raster {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let resized = imageops::resize(&self.to_rgb32f(), width, height, FilterType::CatmullRom);
        Self::from_rgb32f(&resized)
    }

    /// Copy out the `width × height` window whose top-left corner is `(x, y)`.
    ///
    /// The window is clipped to the raster bounds.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Raster {
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        let width = width.min(self.width - x).max(1);
        let height = height.min(self.height - y).max(1);
        Self::from_fn(width, height, |cx, cy| self.get(x + cx, y + cy))
    }

    /// Rec. 601 luma per pixel.
    pub fn luminance(&self) -> Vec<f32> {
        self.pixels.iter().map(|p| luminance(*p)).collect()
    }

    /// Replace every pixel selected by `mask` with the matching pixel of `source`.
    ///
    /// Panics if the three sizes disagree.
    pub fn copy_masked_from(&mut self, source: &Raster, mask: &Mask) {
        assert_eq!((self.width, self.height), (source.width, source.height));
        assert_eq!((self.width, self.height), (mask.width(), mask.height()));
        for (i, selected) in mask.as_slice().iter().enumerate() {
            if *selected {
                self.pixels[i] = source.pixels[i];
            }
        }
    }

    /// Mean absolute channel difference after resizing both rasters to `side × side`.
    pub fn mean_abs_difference(&self, other: &Raster, side: u32) -> f32 {
        let a = self.resize(side, side);
        let b = other.resize(side, side);
        let n = (a.len() * 3).max(1) as f32;
        let total: f32 = a
            .pixels
            .iter()
            .zip(b.pixels.iter())
            .map(|(p, q)| {
                let d = p - q;
                d.x.abs() + d.y.abs() + d.z.abs()
            })
            .sum();
        total / n
    }
}

#[inline]
pub fn luminance(rgb: Vector3<f32>) -> f32 {
    0.299 * rgb.x + 0.587 * rgb.y + 0.114 * rgb.z
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// A single-channel `f32` map (attention / saliency scores).
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl ScalarMap {
    pub fn from_values(width: u32, height: u32, values: Vec<f32>) -> Self {
        assert_eq!(values.len(), (width as usize) * (height as usize));
        Self {
            width,
            height,
            values,
        }
    }

    pub fn from_luma8(img: &GrayImage) -> Self {
        let values = img.pixels().map(|p| p[0] as f32 / 255.0).collect();
        Self::from_values(img.width(), img.height(), values)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[(y as usize) * (self.width as usize) + (x as usize)]
    }

    /// Bicubic resize, clamped into the range of the source values.
    pub fn resize(&self, width: u32, height: u32) -> ScalarMap {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let (lo, hi) = self
            .values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let src: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_fn(self.width, self.height, |x, y| Luma([self.get(x, y)]));
        let resized = imageops::resize(&src, width, height, FilterType::CatmullRom);
        let values = resized.pixels().map(|p| p[0].clamp(lo, hi)).collect();
        Self::from_values(width, height, values)
    }

    /// Pixels strictly above `threshold`.
    pub fn threshold(&self, threshold: f32) -> Mask {
        Mask::from_vec(
            self.width,
            self.height,
            self.values.iter().map(|&v| v > threshold).collect(),
        )
    }

    /// Grayscale visualization (values clamped into [0,1]).
    pub fn to_rgb8(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let v = to_u8(self.get(x, y));
            Rgb([v, v, v])
        })
    }
}

/// A boolean per-pixel selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; (width as usize) * (height as usize)],
        }
    }

    pub fn from_vec(width: u32, height: u32, data: Vec<bool>) -> Self {
        assert_eq!(data.len(), (width as usize) * (height as usize));
        Self {
            width,
            height,
            data,
        }
    }

    /// Pixels brighter than mid-gray are selected.
    pub fn from_luma8(img: &GrayImage) -> Self {
        let data = img.pixels().map(|p| p[0] > 127).collect();
        Self::from_vec(img.width(), img.height(), data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[(y as usize) * (self.width as usize) + (x as usize)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let i = (y as usize) * (self.width as usize) + (x as usize);
        self.data[i] = value;
    }

    /// Number of selected pixels.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&b| b).count()
    }

    pub fn inverted(&self) -> Mask {
        Mask::from_vec(self.width, self.height, self.data.iter().map(|b| !b).collect())
    }

    /// Logical OR with another mask of the same size.
    pub fn union_with(&mut self, other: &Mask) {
        assert_eq!((self.width, self.height), (other.width, other.height));
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a |= *b;
        }
    }

    pub fn resize_nearest(&self, width: u32, height: u32) -> Mask {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = Mask::new(width, height);
        for y in 0..height {
            let sy = ((y as u64 * self.height as u64) / height as u64) as u32;
            for x in 0..width {
                let sx = ((x as u64 * self.width as u64) / width as u64) as u32;
                out.set(x, y, self.get(sx, sy));
            }
        }
        out
    }

    /// Selected pixels become 254, the rest 0.
    pub fn to_rgb8(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let v = if self.get(x, y) { 254 } else { 0 };
            Rgb([v, v, v])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_resize_same_size_is_identity() {
        let r = Raster::from_fn(5, 4, |x, y| Vector3::new(x as f32 / 5.0, y as f32 / 4.0, 0.5));
        assert_eq!(r.resize(5, 4), r);
    }

    #[test]
    fn test_resize_flat_color_stays_flat() {
        let r = Raster::filled(16, 8, Vector3::new(0.2, 0.4, 0.6));
        let big = r.resize(64, 32);
        assert_eq!(big.width(), 64);
        assert_eq!(big.height(), 32);
        for p in big.pixels() {
            assert_relative_eq!(p.x, 0.2, epsilon = 1e-4);
            assert_relative_eq!(p.y, 0.4, epsilon = 1e-4);
            assert_relative_eq!(p.z, 0.6, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_crop_clips_to_bounds() {
        let r = Raster::from_fn(10, 10, |x, y| Vector3::new(x as f32, y as f32, 0.0) / 10.0);
        let c = r.crop(8, 7, 5, 5);
        assert_eq!((c.width(), c.height()), (2, 3));
        assert_eq!(c.get(0, 0), r.get(8, 7));
    }

    #[test]
    fn test_mean_abs_difference_black_white() {
        let black = Raster::filled(8, 8, Vector3::zeros());
        let white = Raster::filled(8, 8, Vector3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(black.mean_abs_difference(&white, 16), 1.0, epsilon = 1e-5);
        assert_relative_eq!(black.mean_abs_difference(&black, 16), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_copy_masked_from() {
        let mut dst = Raster::filled(2, 1, Vector3::zeros());
        let src = Raster::filled(2, 1, Vector3::new(1.0, 1.0, 1.0));
        let mask = Mask::from_vec(2, 1, vec![false, true]);
        dst.copy_masked_from(&src, &mask);
        assert_eq!(dst.get(0, 0), Vector3::zeros());
        assert_eq!(dst.get(1, 0), Vector3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_scalar_map_threshold_is_strict() {
        let m = ScalarMap::from_values(3, 1, vec![0.1, 0.25, 0.3]);
        let mask = m.threshold(0.25);
        assert_eq!(mask.as_slice(), &[false, false, true]);
    }

    #[test]
    fn test_mask_resize_nearest_keeps_blocks() {
        let m = Mask::from_vec(2, 1, vec![true, false]);
        let big = m.resize_nearest(4, 2);
        assert_eq!(big.count(), 4);
        assert!(big.get(0, 1) && big.get(1, 1));
        assert!(!big.get(2, 0) && !big.get(3, 1));
    }
}
