use opencv::{core::Mat, prelude::*, videoio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(opencv::Error),
    #[error("Camera device {0} is unavailable")]
    DeviceUnavailable(i32),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for CameraError {
    fn from(err: opencv::Error) -> Self {
        CameraError::OpenCvError(err)
    }
}

#[derive(Debug)]
pub struct Camera {
    capture: videoio::VideoCapture,
}

impl Camera {
    pub fn open(index: i32) -> Result<Self, CameraError> {
        let capture = videoio::VideoCapture::new(index, videoio::CAP_ANY)
            .map_err(CameraError::OpenCameraFailed)?;
        if !capture.is_opened().map_err(CameraError::OpenCameraFailed)? {
            return Err(CameraError::DeviceUnavailable(index));
        }
        Ok(Self { capture })
    }

    /// Reads the next frame. `Ok(None)` means the device yielded an empty or
    /// unreadable frame and the stream should be treated as ended.
    pub fn read_frame(&mut self) -> Result<Option<Mat>, CameraError> {
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .map_err(CameraError::ReadFrameFailed)?;
        if !grabbed || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }

    pub fn release(&mut self) -> Result<(), CameraError> {
        self.capture.release().map_err(CameraError::from)
    }
}
