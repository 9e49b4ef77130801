use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;

use crate::pipeline::{Frame, FrameSource};

pub fn requested_format(resolution: Option<(u32, u32)>, fps: u32) -> RequestedFormat<'static> {
    // QR modules resolve fine at 720p and the recognizer is cheaper on smaller frames.
    let (w, h) = resolution.unwrap_or((1280, 720));
    let fmt_type = RequestedFormatType::Closest(CameraFormat::new(
        Resolution::new(w, h),
        FrameFormat::MJPEG,
        fps,
    ));
    RequestedFormat::new::<RgbFormat>(fmt_type)
}

/// A camera bound as the pipeline's video input. The stream is opened and
/// closed separately so a bound camera can be paused between scans.
pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
    streaming: bool,
}

impl WebcamCapture {
    /// Bind the device without starting the stream. Errors carry text meant
    /// for the user.
    pub fn bind(device_index: u32, resolution: Option<(u32, u32)>, fps: u32) -> anyhow::Result<Self> {
        let format = requested_format(resolution, fps);
        let camera = Camera::new(CameraIndex::Index(device_index), format).map_err(|e| match e {
            nokhwa::NokhwaError::OpenDeviceError(ref s, _) => {
                anyhow::anyhow!("Cannot open camera /dev/video{}: {}", device_index, s)
            }
            _ => match resolution {
                Some((w, h)) => anyhow::anyhow!(
                    "Failed to open camera /dev/video{} at {}x{}: {}",
                    device_index,
                    w,
                    h,
                    e
                ),
                None => anyhow::anyhow!("Failed to open camera /dev/video{}: {}", device_index, e),
            },
        })?;

        let cam_format = camera.camera_format();
        Ok(WebcamCapture {
            width: cam_format.resolution().width_x,
            height: cam_format.resolution().height_y,
            camera,
            streaming: false,
        })
    }
}

impl FrameSource for WebcamCapture {
    fn open_stream(&mut self) -> anyhow::Result<()> {
        if self.streaming {
            return Ok(());
        }
        self.camera
            .open_stream()
            .map_err(|e| anyhow::anyhow!("Failed to start camera stream: {}", e))?;
        // Format can be renegotiated on stream open
        let cam_format = self.camera.camera_format();
        self.width = cam_format.resolution().width_x;
        self.height = cam_format.resolution().height_y;
        self.streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) {
        if self.streaming {
            let _ = self.camera.stop_stream();
            self.streaming = false;
        }
    }

    /// Capture a single frame, decoded to RGB24
    fn capture_frame(&mut self) -> anyhow::Result<Frame> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| anyhow::anyhow!("Frame capture failed: {}", e))?;

        let image = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| anyhow::anyhow!("Frame decode failed: {}", e))?;

        Ok(Frame {
            width: image.width(),
            height: image.height(),
            rgb: image.into_raw(),
        })
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
