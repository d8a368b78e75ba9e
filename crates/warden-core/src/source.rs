//! Frame source contract and scoped device acquisition.

use crate::frame::RawFrame;
use image::DynamicImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    #[error("capture device busy")]
    Busy,
    #[error("frame read failed: {0}")]
    ReadFailed(String),
    #[error("frame source is not open")]
    NotOpen,
    #[error("frame source exhausted")]
    EndOfStream,
}

/// A device that yields frames on demand.
///
/// `open` acquires the device exclusively and `close` releases it.
/// Callers should not drive these directly; wrap the source in a
/// [`ScopedSource`] so the device is released on every exit path.
pub trait FrameSource {
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Block until the next frame is available or the device fails.
    fn next_frame(&mut self) -> Result<RawFrame, CaptureError>;

    fn close(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self) -> Result<(), CaptureError> {
        (**self).open()
    }

    fn next_frame(&mut self) -> Result<RawFrame, CaptureError> {
        (**self).next_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Owns an opened [`FrameSource`] and closes it exactly once, either on
/// [`release`](Self::release) or on drop.
pub struct ScopedSource<S: FrameSource> {
    inner: S,
    open: bool,
}

impl<S: FrameSource> ScopedSource<S> {
    pub fn acquire(mut inner: S) -> Result<Self, CaptureError> {
        inner.open()?;
        tracing::debug!("frame source acquired");
        Ok(Self { inner, open: true })
    }

    pub fn next_frame(&mut self) -> Result<RawFrame, CaptureError> {
        if !self.open {
            return Err(CaptureError::NotOpen);
        }
        self.inner.next_frame()
    }

    pub fn release(mut self) {
        self.close_once();
    }

    fn close_once(&mut self) {
        if self.open {
            self.open = false;
            self.inner.close();
            tracing::debug!("frame source released");
        }
    }
}

impl<S: FrameSource> Drop for ScopedSource<S> {
    fn drop(&mut self) {
        self.close_once();
    }
}

/// Replays a fixed list of still images as frames.
///
/// Files are decoded lazily in `next_frame`; a decode failure is a
/// `ReadFailed` capture error. After the last image the source reports
/// `EndOfStream`.
pub struct StillSource {
    pending: VecDeque<Still>,
    sequence: u32,
    open: bool,
}

enum Still {
    File(PathBuf),
    Image(DynamicImage),
}

impl StillSource {
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self::from_stills(paths.into_iter().map(|p| Still::File(p.as_ref().to_path_buf())))
    }

    pub fn from_images<I>(images: I) -> Self
    where
        I: IntoIterator<Item = DynamicImage>,
    {
        Self::from_stills(images.into_iter().map(Still::Image))
    }

    fn from_stills(stills: impl Iterator<Item = Still>) -> Self {
        Self {
            pending: stills.collect(),
            sequence: 0,
            open: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for StillSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.open {
            return Err(CaptureError::Busy);
        }
        self.open = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RawFrame, CaptureError> {
        if !self.open {
            return Err(CaptureError::NotOpen);
        }
        let still = self.pending.pop_front().ok_or(CaptureError::EndOfStream)?;
        let image = match still {
            Still::Image(image) => image,
            Still::File(path) => image::open(&path).map_err(|e| {
                CaptureError::ReadFailed(format!("{}: {e}", path.display()))
            })?,
        };
        let frame = RawFrame::from_image(&image, self.sequence);
        self.sequence += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        self.open = false;
    }
}
