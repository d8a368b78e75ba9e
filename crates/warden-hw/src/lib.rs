//! warden-hw: V4L2 camera capture for the warden frame-source contract.
//!
//! Negotiates YUYV/GREY/Y16 with the driver, converts every frame to
//! 8-bit gray, flags dark frames and optionally applies CLAHE.

pub mod camera;
pub mod pixel;

pub use camera::{Camera, CameraConfig, CameraError, DeviceInfo};
pub use pixel::{Clahe, PixelFormat};
