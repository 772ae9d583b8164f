use anyhow::{bail, Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Preferred capture size. Matches the scan UI's video constraints; the
/// driver may still hand back something else.
pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    /// Open a capture device, asking for 640x480 RGB and falling back to
    /// YUYV, then to whatever format the driver insists on.
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).context("open camera device")?;
        let mut fmt = dev.format().context("query camera format")?;

        for fourcc in [b"RGB3", b"YUYV"] {
            let wanted = Format::new(FRAME_WIDTH, FRAME_HEIGHT, FourCC::new(fourcc));
            if let Ok(actual) = dev.set_format(&wanted) {
                fmt = actual;
                if fmt.fourcc == FourCC::new(fourcc) {
                    break;
                }
            }
        }

        log::info!(
            "camera format: {}x{} {:?}",
            fmt.width,
            fmt.height,
            fmt.fourcc
        );

        let stream =
            Stream::with_buffers(&dev, Type::VideoCapture, 4).context("start capture stream")?;
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pull the next frame and convert it to RGB.
    pub fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("read camera frame")?;
        log::debug!(
            "frame seq={:?} fourcc={:?} len={}",
            meta.sequence,
            self.fourcc,
            data.len()
        );

        let mut rgb = match self.fourcc {
            f if f == FourCC::new(b"RGB3") => data.to_vec(),
            f if f == FourCC::new(b"YUYV") => yuyv_to_rgb(self.width, self.height, data)?,
            f if f == FourCC::new(b"GREY") => grey_to_rgb(self.width, self.height, data)?,
            other => bail!("unsupported pixel format {:?}", other),
        };

        let expected = (self.width * self.height * 3) as usize;
        if rgb.len() < expected {
            bail!(
                "short frame buffer: got {} bytes, expected {}",
                rgb.len(),
                expected
            );
        }
        rgb.truncate(expected);

        RgbImage::from_raw(self.width, self.height, rgb)
            .context("assemble frame image buffer")
    }
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        bail!("short YUYV buffer: {} < {}", data.len(), expected);
    }

    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for quad in data[..expected].chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for &y in &[quad[0], quad[2]] {
            let y = y as f32;
            out.push(to_u8(y + 1.402 * v));
            out.push(to_u8(y - 0.344136 * u - 0.714136 * v));
            out.push(to_u8(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        bail!("short GREY buffer: {} < {}", data.len(), expected);
    }

    let mut out = Vec::with_capacity(expected * 3);
    for &y in &data[..expected] {
        out.extend_from_slice(&[y, y, y]);
    }
    Ok(out)
}

fn to_u8(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}
