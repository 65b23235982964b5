//! Camera collaboration surface.
//!
//! A concrete OpenCV-backed (or V4L2, or any other hardware) capture is
//! deliberately not part of this crate; [`CameraAdapter`] is the trait the
//! scheduler drives, and [`FrameBus`] is the per-pass cache of
//! colorspace-converted variants built on top of it.

mod frame_bus;

pub use frame_bus::FrameBus;

use crate::errors::Result;
use crate::image::{ColorSpace, Image};

/// Properties a camera reports; used by the scheduler to size output
/// buffers and by the Api façade's `get_resolution` verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraProperties {
    pub width: u32,
    pub height: u32,
    pub colorspace: ColorSpace,
}

/// Opaque collaborator exposing open/close/grab/get_frame/get_properties.
/// Owned by a refcounted singleton acquired via `acquire()`/`release()`;
/// the camera closes when the refcount hits zero.
pub trait CameraAdapter: Send {
    /// Opens the underlying device. Idempotent if already open.
    fn open(&mut self) -> Result<()>;

    /// Closes the underlying device. Idempotent if already closed.
    fn close(&mut self) -> Result<()>;

    /// Blocks until the next frame is available internally (the grabber
    /// thread is internal to the adapter implementation).
    fn grab(&mut self) -> Result<()>;

    /// Returns the most recently grabbed frame.
    fn get_frame(&mut self) -> Result<Image<'static>>;

    fn get_properties(&self) -> CameraProperties;

    /// Requests a new capture resolution. Takes effect from the next `grab`.
    fn configure(&mut self, width: u32, height: u32) -> Result<()>;
}

/// Refcounted handle around a [`CameraAdapter`]; the camera opens on the
/// first `acquire` and closes when the last handle is released.
pub struct CameraHandle {
    adapter: Box<dyn CameraAdapter>,
    refcount: usize,
}

impl CameraHandle {
    #[must_use]
    pub fn new(adapter: Box<dyn CameraAdapter>) -> Self {
        Self {
            adapter,
            refcount: 0,
        }
    }

    pub fn acquire(&mut self) -> Result<()> {
        if self.refcount == 0 {
            self.adapter.open()?;
        }
        self.refcount += 1;
        Ok(())
    }

    pub fn release(&mut self) -> Result<()> {
        if self.refcount == 0 {
            return Ok(());
        }
        self.refcount -= 1;
        if self.refcount == 0 {
            self.adapter.close()?;
        }
        Ok(())
    }

    pub fn grab(&mut self) -> Result<()> {
        self.adapter.grab()
    }

    pub fn get_frame(&mut self) -> Result<Image<'static>> {
        self.adapter.get_frame()
    }

    #[must_use]
    pub fn get_properties(&self) -> CameraProperties {
        self.adapter.get_properties()
    }

    pub fn configure(&mut self, width: u32, height: u32) -> Result<()> {
        self.adapter.configure(width, height)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    //! A deterministic in-process camera used by tests and integration
    //! fixtures — there is no real OpenCV capture or hardware in this
    //! workspace.

    use super::{CameraAdapter, CameraProperties};
    use crate::errors::Result;
    use crate::image::{ColorSpace, Image, ImageHeader};

    pub struct FakeCamera {
        width: u32,
        height: u32,
        colorspace: ColorSpace,
        frame_data: Vec<u8>,
        timestamp_us: u64,
        open: bool,
    }

    impl FakeCamera {
        #[must_use]
        pub fn new(width: u32, height: u32, colorspace: ColorSpace, frame_data: Vec<u8>) -> Self {
            Self {
                width,
                height,
                colorspace,
                frame_data,
                timestamp_us: 0,
                open: false,
            }
        }

        /// Replaces the frame delivered by the next `grab`/`get_frame`.
        pub fn set_frame(&mut self, frame_data: Vec<u8>) {
            self.frame_data = frame_data;
        }
    }

    impl CameraAdapter for FakeCamera {
        fn open(&mut self) -> Result<()> {
            self.open = true;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }

        fn grab(&mut self) -> Result<()> {
            self.timestamp_us += 1;
            Ok(())
        }

        fn get_frame(&mut self) -> Result<Image<'static>> {
            let header = ImageHeader::new(self.width, self.height, self.colorspace, self.timestamp_us);
            Ok(Image::owned(header, self.frame_data.clone()))
        }

        fn get_properties(&self) -> CameraProperties {
            CameraProperties {
                width: self.width,
                height: self.height,
                colorspace: self.colorspace,
            }
        }

        fn configure(&mut self, width: u32, height: u32) -> Result<()> {
            self.width = width;
            self.height = height;
            let byte_count = self
                .colorspace
                .expected_byte_count(width, height)
                .unwrap_or(self.frame_data.len());
            self.frame_data.resize(byte_count, 0);
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::FakeCamera;
        use crate::camera::CameraHandle;
        use crate::image::ColorSpace;

        #[test]
        fn acquire_release_opens_and_closes_once() {
            let cam = FakeCamera::new(2, 2, ColorSpace::Bgr888, vec![0; 12]);
            let mut handle = CameraHandle::new(Box::new(cam));
            handle.acquire().unwrap();
            handle.acquire().unwrap();
            handle.release().unwrap();
            assert!(handle.release().is_ok());
        }
    }
}
