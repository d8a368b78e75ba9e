//! V4L2 camera capture via the `v4l` crate.

use crate::pixel::{self, Clahe, PixelFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;
use warden_core::{CaptureError, FrameSource, RawFrame};

const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error(transparent)]
    Pixel(#[from] pixel::PixelError),
}

impl From<CameraError> for CaptureError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::DeviceBusy => CaptureError::Busy,
            CameraError::DeviceNotFound(_)
            | CameraError::FormatNegotiationFailed(_)
            | CameraError::StreamingNotSupported => CaptureError::Unavailable(e.to_string()),
            CameraError::CaptureFailed(_) | CameraError::Pixel(_) => {
                CaptureError::ReadFailed(e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    /// Requested resolution; the driver may negotiate something else.
    pub width: u32,
    pub height: u32,
    /// Frames discarded right after streaming starts while exposure settles.
    pub warmup_frames: u32,
    pub clahe: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            warmup_frames: 4,
            clahe: false,
        }
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

// Field order matters: the stream must be dropped before the device.
struct ActiveDevice {
    stream: MmapStream<'static>,
    _device: Device,
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// V4L2 camera as a [`FrameSource`].
///
/// The device node is opened, negotiated and put into streaming mode by
/// `open`, and released again by `close`.
pub struct Camera {
    config: CameraConfig,
    clahe: Clahe,
    active: Option<ActiveDevice>,
}

impl Camera {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            clahe: Clahe::default(),
            active: None,
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Negotiated `(width, height, format)` while open.
    pub fn negotiated(&self) -> Option<(u32, u32, PixelFormat)> {
        self.active.as_ref().map(|a| (a.width, a.height, a.format))
    }

    fn start(&self) -> Result<ActiveDevice, CameraError> {
        let path = self.config.device.as_str();
        if !Path::new(path).exists() {
            return Err(CameraError::DeviceNotFound(path.to_string()));
        }

        let device = Device::with_path(path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("busy") || msg.contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(device = path, driver = %caps.driver, card = %caps.card, "opened camera");

        // Ask for YUYV; IR sensors commonly answer with GREY or Y16 instead.
        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let format = PixelFormat::from_fourcc(&negotiated.fourcc.repr).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format {:?} (need YUYV, GREY or Y16)",
                negotiated.fourcc
            ))
        })?;
        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            format = ?format,
            "negotiated format"
        );

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        Ok(ActiveDevice {
            stream,
            _device: device,
            width: negotiated.width,
            height: negotiated.height,
            format,
        })
    }

    fn read(&mut self) -> Result<RawFrame, CameraError> {
        let clahe = self.config.clahe.then_some(self.clahe);
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| CameraError::CaptureFailed("camera is not open".into()))?;

        let (buf, meta) = active
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let mut gray = active.format.to_gray(buf, active.width, active.height)?;

        let is_dark = pixel::is_dark(&gray);
        if is_dark {
            tracing::debug!(seq = sequence, "dark frame");
        } else if let Some(clahe) = clahe {
            clahe.apply(&mut gray, active.width, active.height);
        }

        let mut frame = RawFrame::gray(gray, active.width, active.height, sequence);
        frame.is_dark = is_dark;
        Ok(frame)
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card.clone(),
                        driver: caps.driver.clone(),
                        bus: caps.bus.clone(),
                    })
            })
            .collect()
    }
}

impl FrameSource for Camera {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::Busy);
        }
        self.active = Some(self.start()?);

        // Failing mid-warmup must not leave the device held.
        if let Err(e) = (0..self.config.warmup_frames).try_for_each(|_| self.read().map(drop)) {
            self.active = None;
            return Err(e.into());
        }
        tracing::debug!(warmup = self.config.warmup_frames, "camera streaming");
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RawFrame, CaptureError> {
        if self.active.is_none() {
            return Err(CaptureError::NotOpen);
        }
        Ok(self.read()?)
    }

    fn close(&mut self) {
        if self.active.take().is_some() {
            tracing::info!(device = %self.config.device, "camera released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_unavailable() {
        let mut camera = Camera::new(CameraConfig {
            device: "/dev/warden-does-not-exist".into(),
            ..Default::default()
        });
        assert!(matches!(camera.open(), Err(CaptureError::Unavailable(_))));
        assert!(camera.negotiated().is_none());
    }

    #[test]
    fn test_next_frame_requires_open() {
        let mut camera = Camera::new(CameraConfig::default());
        assert!(matches!(camera.next_frame(), Err(CaptureError::NotOpen)));
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(CaptureError::from(CameraError::DeviceBusy), CaptureError::Busy));
        assert!(matches!(
            CaptureError::from(CameraError::CaptureFailed("x".into())),
            CaptureError::ReadFailed(_)
        ));
    }
}
