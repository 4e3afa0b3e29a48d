use super::{RemovalContext, RemovalError};
use crate::backend::{Segment, SegmentationBackend};
use crate::core::{Mask, Raster};
use crate::render::AlphaMode;
use image::{Rgba, RgbaImage};
use rand::seq::SliceRandom;
use rand::Rng;

/// Overlay alpha of each segment in the diagnostic visualization.
const OVERLAY_ALPHA: f32 = 0.35;

/// How many of `n` segments get reverted: none for zero, otherwise about
/// half, at least one and at most all but one (one when `n == 1`).
pub fn objects_to_remove(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        (n / 2).min(n - 1).max(1)
    }
}

/// Color-coded view of `segments` over transparent white, largest first so
/// smaller regions stay visible on top.
pub fn object_overlay<R: Rng + ?Sized>(segments: &[Segment], width: u32, height: u32, rng: &mut R) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 0]));
    let mut order: Vec<&Segment> = segments.iter().collect();
    order.sort_by(|a, b| b.area.cmp(&a.area));

    let alpha = (OVERLAY_ALPHA * 255.0).round() as u8;
    for segment in order {
        let color = Rgba([rng.gen(), rng.gen(), rng.gen(), alpha]);
        for (i, selected) in segment.mask.as_slice().iter().enumerate() {
            if *selected {
                let (x, y) = (i as u32 % width, i as u32 / width);
                img.put_pixel(x, y, color);
            }
        }
    }
    img
}

/// Segment the opaque final render and revert a random subset of segments
/// to background.
///
/// Returns the start canvas, the overlay visualization and the mask of
/// reverted pixels.
pub fn remove_objects<R: Rng + ?Sized>(
    ctx: &RemovalContext<'_>,
    segmenter: &dyn SegmentationBackend,
    scale: u32,
    rng: &mut R,
) -> Result<(Raster, RgbaImage, Mask), RemovalError> {
    let (h, w) = (ctx.height * scale, ctx.width * scale);
    let mut start = ctx.painting.render(h, w, AlphaMode::Opaque);

    let mut segments: Vec<Segment> = segmenter
        .segment(&start)?
        .into_iter()
        .map(|s| {
            if (s.mask.width(), s.mask.height()) == (w, h) {
                s
            } else {
                Segment::from_mask(s.mask.resize_nearest(w, h))
            }
        })
        .collect();

    let overlay = object_overlay(&segments, w, h, rng);
    segments.shuffle(rng);

    let mut removed = Mask::new(w, h);
    for segment in segments.iter().take(objects_to_remove(segments.len())) {
        removed.union_with(&segment.mask);
    }
    let background = ctx.painting.background_at(h, w);
    start.copy_masked_from(&background, &removed);

    log::debug!(
        "reverted {} of {} segments ({} px)",
        objects_to_remove(segments.len()),
        segments.len(),
        removed.count()
    );
    Ok((start, overlay, removed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_objects_to_remove_bounds() {
        assert_eq!(objects_to_remove(0), 0);
        assert_eq!(objects_to_remove(1), 1);
        assert_eq!(objects_to_remove(2), 1);
        assert_eq!(objects_to_remove(3), 1);
        assert_eq!(objects_to_remove(9), 4);
        for n in 2..200 {
            let k = objects_to_remove(n);
            assert!(k >= 1 && k <= n - 1);
        }
    }

    #[test]
    fn test_overlay_covers_only_segments() {
        let mut mask = Mask::new(4, 4);
        mask.set(1, 1, true);
        mask.set(2, 1, true);
        let segments = vec![Segment::from_mask(mask)];
        let mut rng = StdRng::seed_from_u64(0);
        let img = object_overlay(&segments, 4, 4, &mut rng);

        assert_eq!(img.get_pixel(0, 0), &Rgba([255, 255, 255, 0]));
        assert_eq!(img.get_pixel(1, 1)[3], 89);
        assert_eq!(img.get_pixel(1, 1), img.get_pixel(2, 1));
    }
}
