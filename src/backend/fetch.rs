//! Image retrieval for dataset records.

use crate::backend::BackendError;
use crate::core::Raster;
use reqwest::blocking::Client;
use std::path::Path;
use std::time::Duration;

pub trait ImageFetcher {
    /// Fetch and decode the image at `url`. Any failure means the datum is unavailable.
    fn fetch(&self, url: &str) -> Result<Raster, BackendError>;
}

/// Blocking HTTP fetcher with a bounded timeout. `file://` URLs and plain
/// paths are read from disk.
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str) -> Result<Raster, BackendError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            let path = url.strip_prefix("file://").unwrap_or(url);
            let img = image::open(Path::new(path))?;
            return Ok(Raster::from_dynamic(&img));
        }

        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes()?;
        let img = image::load_from_memory(&bytes)?;
        Ok(Raster::from_dynamic(&img))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_fetch_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        RgbImage::from_pixel(4, 3, Rgb([255, 0, 0])).save(&path).unwrap();

        let fetcher = HttpImageFetcher::new(Duration::from_secs(1)).unwrap();
        let url = format!("file://{}", path.display());
        let raster = fetcher.fetch(&url).unwrap();
        assert_eq!((raster.width(), raster.height()), (4, 3));
        assert_eq!(raster.get(0, 0).x, 1.0);
    }

    #[test]
    fn test_missing_file_is_error() {
        let fetcher = HttpImageFetcher::new(Duration::from_secs(1)).unwrap();
        assert!(fetcher.fetch("/definitely/not/here.png").is_err());
    }
}
