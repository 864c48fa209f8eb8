use crate::core::error::FrameError;
use crate::core::scene::frame::Frame;

pub const TARGET_WIDTH: u32 = 224;
pub const TARGET_HEIGHT: u32 = 224;

/// NHWC 输入张量（batch = 1, C = 3），数值保持 0-255 原始范围
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: [usize; 4],
}

impl Tensor {
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn height(&self) -> usize {
        self.shape[1]
    }

    pub fn width(&self) -> usize {
        self.shape[2]
    }

    /// (y, x) 处的 RGB
    pub fn pixel(&self, x: usize, y: usize) -> [f32; 3] {
        let idx = (y * self.width() + x) * 3;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }
}

/// 缩放到模型输入尺寸并转换为 float 张量（不做均值/方差归一化）
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    width: u32,
    height: u32,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self::with_size(TARGET_WIDTH, TARGET_HEIGHT)
    }

    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.height as usize, self.width as usize, 3]
    }

    pub fn preprocess(&self, frame: &Frame) -> Result<Tensor, FrameError> {
        let resized = if frame.width == self.width && frame.height == self.height {
            frame.clone()
        } else {
            frame.resize_to(self.width, self.height)?
        };

        let data: Vec<f32> = resized.to_rgb().into_iter().map(f32::from).collect();

        Ok(Tensor {
            data,
            shape: self.input_shape(),
        })
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}
