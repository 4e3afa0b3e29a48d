//! PNG saving and image loading at the I/O boundary.

use crate::core::Raster;
use image::{DynamicImage, ImageResult};
use std::fs;
use std::path::Path;

fn ensure_parent(path: &Path) -> ImageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Save as 8-bit RGB; the format follows the file extension.
pub fn save_raster(raster: &Raster, path: &Path) -> ImageResult<()> {
    ensure_parent(path)?;
    raster.to_rgb8().save(path)
}

pub fn save_image(image: &DynamicImage, path: &Path) -> ImageResult<()> {
    ensure_parent(path)?;
    image.save(path)
}

pub fn load_raster(path: &Path) -> ImageResult<Raster> {
    Ok(Raster::from_dynamic(&image::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_save_then_load_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0").join("id0_start.png");
        let r = Raster::filled(5, 3, Vector3::new(1.0, 0.0, 1.0));
        save_raster(&r, &path).unwrap();

        let back = load_raster(&path).unwrap();
        assert_eq!(back, r);
    }
}
