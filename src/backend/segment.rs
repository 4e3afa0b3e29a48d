//! Image segmentation into disjoint region masks.

use crate::backend::{BackendError, CommandLine};
use crate::core::color::color_bucket;
use crate::core::{Mask, Raster};
use image::{ImageBuffer, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;

#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub mask: Mask,
    /// Number of selected pixels in `mask`.
    pub area: usize,
}

impl Segment {
    pub fn from_mask(mask: Mask) -> Self {
        let area = mask.count();
        Self { mask, area }
    }
}

pub trait SegmentationBackend {
    fn segment(&self, image: &Raster) -> Result<Vec<Segment>, BackendError>;
}

/// Runs `<cmd> <image.png> <out_dir>` and reads every PNG the command wrote
/// into `out_dir` (sorted by file name) as one binary mask.
pub struct CommandSegmenter {
    pub cmd: CommandLine,
}

impl CommandSegmenter {
    pub fn new(cmd: CommandLine) -> Self {
        Self { cmd }
    }
}

impl SegmentationBackend for CommandSegmenter {
    fn segment(&self, image: &Raster) -> Result<Vec<Segment>, BackendError> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("image.png");
        let out_dir = dir.path().join("masks");
        fs::create_dir(&out_dir)?;
        image.to_rgb8().save(&input)?;

        self.cmd.run(&[input.as_os_str(), out_dir.as_os_str()])?;

        let mut paths: Vec<_> = fs::read_dir(&out_dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        paths.retain(|p| p.extension() == Some(OsStr::new("png")));
        paths.sort();

        let mut segments = Vec::with_capacity(paths.len());
        for path in paths {
            let luma = image::open(&path)?.to_luma8();
            let segment = Segment::from_mask(Mask::from_luma8(&luma));
            if segment.area > 0 {
                segments.push(segment);
            }
        }
        log::debug!("segmenter returned {} masks", segments.len());
        Ok(segments)
    }
}

/// Built-in segmenter: 4-connected regions of equal quantized color.
///
/// Regions smaller than `min_area_fraction` of the image are discarded.
#[derive(Clone, Debug)]
pub struct ColorRegionSegmenter {
    /// Quantization bucket width in 0-255 units.
    pub bin_size: f32,
    pub min_area_fraction: f32,
}

impl Default for ColorRegionSegmenter {
    fn default() -> Self {
        Self {
            bin_size: 64.0,
            min_area_fraction: 0.01,
        }
    }
}

impl ColorRegionSegmenter {
    /// Color-bucket ids, starting at 1 so that 0 never matches a region.
    fn labels(&self, image: &Raster) -> Result<ImageBuffer<Luma<u32>, Vec<u32>>, BackendError> {
        let mut ids: HashMap<(i32, i32, i32), u32> = HashMap::new();
        let data = image
            .pixels()
            .iter()
            .map(|p| {
                let next = ids.len() as u32 + 1;
                *ids.entry(color_bucket(p, self.bin_size)).or_insert(next)
            })
            .collect();
        ImageBuffer::from_raw(image.width(), image.height(), data)
            .ok_or_else(|| BackendError::InvalidOutput("label image size mismatch".to_string()))
    }
}

impl SegmentationBackend for ColorRegionSegmenter {
    fn segment(&self, image: &Raster) -> Result<Vec<Segment>, BackendError> {
        let (width, height) = (image.width(), image.height());
        let min_area = ((width * height) as f32 * self.min_area_fraction).ceil() as usize;

        let components = connected_components(&self.labels(image)?, Connectivity::Four, Luma([0u32]));
        let n_components = components.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;

        let mut masks = vec![Vec::new(); n_components];
        for (i, p) in components.pixels().enumerate() {
            if let Some(component) = (p[0] as usize).checked_sub(1) {
                masks[component].push(i);
            }
        }

        let segments = masks
            .into_iter()
            .filter(|pixels| pixels.len() >= min_area.max(1))
            .map(|pixels| {
                let mut data = vec![false; image.len()];
                for idx in &pixels {
                    data[*idx] = true;
                }
                Segment {
                    mask: Mask::from_vec(width, height, data),
                    area: pixels.len(),
                }
            })
            .collect();
        Ok(segments)
    }
}
