//! Paint palettes and color utilities.
//!
//! A [`Palette`] is the discrete set of paint colors a physical painting can
//! be made with. It is either given on the command line (`r,g,b.r,g,b...`
//! in 0-255 units) or extracted from the target image by k-means.
//!
//! The HSV helpers back the background color jitter.

use crate::core::raster::Raster;
use nalgebra::Vector3;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PaletteError {
    #[error("palette is empty")]
    Empty,

    #[error("invalid palette entry `{0}` (expected `r,g,b` with values in 0..=255)")]
    InvalidEntry(String),
}

/// An ordered set of RGB colors in [0,1].
#[derive(Clone, Debug, PartialEq)]
pub struct Palette {
    colors: Vec<Vector3<f32>>,
}

impl Palette {
    pub fn new(colors: Vec<Vector3<f32>>) -> Result<Self, PaletteError> {
        if colors.is_empty() {
            return Err(PaletteError::Empty);
        }
        Ok(Self { colors })
    }

    /// Parse `"209,0,0.241,212,69.39,94,195"`: colors separated by `.`,
    /// channels by `,`, values in 0-255.
    pub fn parse(list: &str) -> Result<Self, PaletteError> {
        let mut colors = Vec::new();
        for entry in list.split('.').map(str::trim).filter(|e| !e.is_empty()) {
            let channels: Vec<f32> = entry
                .split(',')
                .map(|c| c.trim().parse::<f32>())
                .collect::<Result<_, _>>()
                .map_err(|_| PaletteError::InvalidEntry(entry.to_string()))?;
            if channels.len() != 3 || channels.iter().any(|c| !(0.0..=255.0).contains(c)) {
                return Err(PaletteError::InvalidEntry(entry.to_string()));
            }
            colors.push(Vector3::new(channels[0], channels[1], channels[2]) / 255.0);
        }
        Self::new(colors)
    }

    /// Extract `n_colors` dominant colors with k-means (k-means++ seeding,
    /// fixed iteration budget). Deterministic for a given RNG state.
    pub fn from_image<R: Rng + ?Sized>(image: &Raster, n_colors: usize, rng: &mut R) -> Result<Self, PaletteError> {
        let points = image.pixels();
        if points.is_empty() || n_colors == 0 {
            return Err(PaletteError::Empty);
        }
        let k = n_colors.min(points.len());
        let mut centers = kmeans_plus_plus_init(points, k, rng);
        let mut assignment = vec![0usize; points.len()];

        for _ in 0..KMEANS_ITERS {
            let mut changed = false;
            for (i, p) in points.iter().enumerate() {
                let best = nearest_index(&centers, p);
                if assignment[i] != best {
                    assignment[i] = best;
                    changed = true;
                }
            }

            let mut sums = vec![Vector3::<f32>::zeros(); k];
            let mut counts = vec![0usize; k];
            for (p, &a) in points.iter().zip(assignment.iter()) {
                sums[a] += *p;
                counts[a] += 1;
            }
            for c in 0..k {
                // Empty clusters keep their previous center.
                if counts[c] > 0 {
                    centers[c] = sums[c] / counts[c] as f32;
                }
            }

            if !changed {
                break;
            }
        }

        Self::new(centers)
    }

    pub fn colors(&self) -> &[Vector3<f32>] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Closest palette color (Euclidean RGB).
    pub fn nearest(&self, color: &Vector3<f32>) -> Vector3<f32> {
        self.colors[nearest_index(&self.colors, color)]
    }
}

const KMEANS_ITERS: usize = 20;

fn nearest_index(centers: &[Vector3<f32>], p: &Vector3<f32>) -> usize {
    let mut best = 0;
    let mut best_d = f32::INFINITY;
    for (i, c) in centers.iter().enumerate() {
        let d = (c - p).norm_squared();
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

fn kmeans_plus_plus_init<R: Rng + ?Sized>(points: &[Vector3<f32>], k: usize, rng: &mut R) -> Vec<Vector3<f32>> {
    let mut centers = Vec::with_capacity(k);
    centers.push(points[rng.gen_range(0..points.len())]);
    let mut dist: Vec<f32> = points.iter().map(|p| (p - centers[0]).norm_squared()).collect();

    while centers.len() < k {
        let total: f32 = dist.iter().sum();
        let next = if total <= f32::EPSILON {
            // All remaining points coincide with a center.
            points[rng.gen_range(0..points.len())]
        } else {
            let mut target = rng.gen_range(0.0..total);
            let mut chosen = points.len() - 1;
            for (i, d) in dist.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            points[chosen]
        };
        for (d, p) in dist.iter_mut().zip(points.iter()) {
            *d = d.min((p - next).norm_squared());
        }
        centers.push(next);
    }
    centers
}

/// Coarse color bucket used to group strokes of similar color.
///
/// `bin_size` is in 0-255 units.
pub fn color_bucket(color: &Vector3<f32>, bin_size: f32) -> (i32, i32, i32) {
    let b = bin_size.max(1.0);
    let q = |v: f32| ((v.clamp(0.0, 1.0) * 255.0) / b).floor() as i32;
    (q(color.x), q(color.y), q(color.z))
}

/// RGB in [0,1] to HSV with hue in [0,1) turns.
pub fn rgb_to_hsv(rgb: Vector3<f32>) -> Vector3<f32> {
    let (r, g, b) = (rgb.x, rgb.y, rgb.z);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta <= 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let saturation = if max <= 0.0 { 0.0 } else { delta / max };
    Vector3::new(hue, saturation, max)
}

/// HSV (hue in turns) back to RGB in [0,1].
pub fn hsv_to_rgb(hsv: Vector3<f32>) -> Vector3<f32> {
    let h = hsv.x.rem_euclid(1.0) * 6.0;
    let s = hsv.y.clamp(0.0, 1.0);
    let v = hsv.z.clamp(0.0, 1.0);
    let c = v * s;
    let x = c * (1.0 - ((h % 2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    Vector3::new(r + m, g + m, b + m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse_palette() {
        let p = Palette::parse("209,0,0.241,212,69.39,94,195").unwrap();
        assert_eq!(p.len(), 3);
        assert_relative_eq!(p.colors()[0].x, 209.0 / 255.0, epsilon = 1e-6);
        assert_relative_eq!(p.colors()[2].z, 195.0 / 255.0, epsilon = 1e-6);
    }

    #[test]
    fn test_parse_palette_rejects_bad_entries() {
        assert!(matches!(Palette::parse("1,2"), Err(PaletteError::InvalidEntry(_))));
        assert!(matches!(Palette::parse("1,2,300"), Err(PaletteError::InvalidEntry(_))));
        assert_eq!(Palette::parse(""), Err(PaletteError::Empty));
    }

    #[test]
    fn test_kmeans_finds_two_flat_colors() {
        let red = Vector3::new(1.0, 0.0, 0.0);
        let blue = Vector3::new(0.0, 0.0, 1.0);
        let img = Raster::from_fn(16, 16, |x, _| if x < 8 { red } else { blue });
        let mut rng = StdRng::seed_from_u64(7);
        let p = Palette::from_image(&img, 2, &mut rng).unwrap();
        assert_eq!(p.len(), 2);
        assert_relative_eq!(p.nearest(&Vector3::new(0.9, 0.1, 0.0)), red, epsilon = 1e-5);
        assert_relative_eq!(p.nearest(&Vector3::new(0.1, 0.0, 0.8)), blue, epsilon = 1e-5);
    }

    #[test]
    fn test_color_bucket_groups_close_colors() {
        let a = color_bucket(&Vector3::new(0.50, 0.10, 0.90), 64.0);
        let b = color_bucket(&Vector3::new(0.52, 0.12, 0.88), 64.0);
        let c = color_bucket(&Vector3::new(0.05, 0.10, 0.90), 64.0);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hsv_roundtrip() {
        for rgb in [
            Vector3::new(0.8, 0.2, 0.1),
            Vector3::new(0.1, 0.7, 0.3),
            Vector3::new(0.2, 0.3, 0.9),
            Vector3::new(0.5, 0.5, 0.5),
        ] {
            let back = hsv_to_rgb(rgb_to_hsv(rgb));
            assert_relative_eq!(back, rgb, epsilon = 1e-5);
        }
    }
}
