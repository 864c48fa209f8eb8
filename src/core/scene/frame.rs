use crate::core::error::FrameError;
use serde::Serialize;
use std::time::Duration;

/// 像素布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelFormat {
    Rgba,
    Rgb,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgba => 4,
            PixelFormat::Rgb => 3,
        }
    }
}

/// 采集到的一帧画面
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    data: Vec<u8>,
    pub timestamp: Duration,
    pub frame_number: u64,
}

impl Frame {
    /// RGBA 帧（采集端默认格式）
    pub fn new(
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp_ms: u64,
        frame_number: u64,
    ) -> Result<Self, FrameError> {
        Self::with_format(
            width,
            height,
            PixelFormat::Rgba,
            data,
            timestamp_ms,
            frame_number,
        )
    }

    pub fn with_format(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
        timestamp_ms: u64,
        frame_number: u64,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimension { width, height });
        }

        let expected = width as usize * height as usize * format.channels();
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            format,
            data,
            timestamp: Duration::from_millis(timestamp_ms),
            frame_number,
        })
    }

    /// 解码 JPEG/PNG/BMP 截图（例如标签页截图）
    pub fn from_encoded(
        bytes: &[u8],
        timestamp_ms: u64,
        frame_number: u64,
    ) -> Result<Self, FrameError> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::new(width, height, rgba.into_raw(), timestamp_ms, frame_number)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn same_dimensions(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let channels = self.format.channels();
        let idx = (y as usize * self.width as usize + x as usize) * channels;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    /// 按像素线性序号取值
    #[inline]
    pub fn pixel_at(&self, index: usize) -> [u8; 3] {
        let idx = index * self.format.channels();
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    #[inline]
    pub fn luminance(&self, x: u32, y: u32) -> f32 {
        let [r, g, b] = self.pixel(x, y);
        r as f32 * 0.299 + g as f32 * 0.587 + b as f32 * 0.114
    }

    pub fn to_rgb(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Rgb => self.data.clone(),
            PixelFormat::Rgba => {
                let mut rgb = Vec::with_capacity(self.pixel_count() * 3);
                for chunk in self.data.chunks_exact(4) {
                    rgb.push(chunk[0]);
                    rgb.push(chunk[1]);
                    rgb.push(chunk[2]);
                }
                rgb
            }
        }
    }

    pub fn resize_to(&self, target_width: u32, target_height: u32) -> Result<Frame, FrameError> {
        let resize_err = || FrameError::Resize {
            width: self.width,
            height: self.height,
        };

        let data = match self.format {
            PixelFormat::Rgba => {
                let img = image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
                    .ok_or_else(resize_err)?;
                image::imageops::resize(
                    &img,
                    target_width,
                    target_height,
                    image::imageops::FilterType::Triangle,
                )
                .into_raw()
            }
            PixelFormat::Rgb => {
                let img = image::RgbImage::from_raw(self.width, self.height, self.data.clone())
                    .ok_or_else(resize_err)?;
                image::imageops::resize(
                    &img,
                    target_width,
                    target_height,
                    image::imageops::FilterType::Triangle,
                )
                .into_raw()
            }
        };

        Ok(Frame {
            width: target_width,
            height: target_height,
            format: self.format,
            data,
            timestamp: self.timestamp,
            frame_number: self.frame_number,
        })
    }
}
