//! Sparse block store: the storage engine behind every non-pipe device

mod device;
mod file;
mod segment;

pub use device::{Device, Geometry};
pub use file::DeviceFile;
