//! Output I/O: the record index, the sharded file layout and image saving.

pub mod image_io;
pub mod layout;
pub mod store;

pub use image_io::{load_raster, save_image, save_raster};
pub use layout::OutputLayout;
pub use store::{DataRecord, DataStore, StoreError};
