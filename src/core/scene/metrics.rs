//! 帧间特征：分块运动、中心区域运动、颜色直方图、边缘图
//!
//! 所有特征都只依赖当前帧与上一个已处理帧，同样的输入总是得到同样的浮点结果。

use super::frame::Frame;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const HISTOGRAM_BINS: usize = 8;
const HISTOGRAM_CHANNELS: usize = 3;
const BIN_WIDTH: u8 = 32;

fn max_rgb_distance() -> f32 {
    (3.0f32 * 255.0 * 255.0).sqrt()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// 运动分块边长（像素）
    pub block_size: u32,
    /// 块内采样步长
    pub block_sample_stride: u32,
    /// 直方图按像素序号的采样步长
    pub histogram_sample_stride: usize,
    /// 边缘网格步长
    pub edge_grid_stride: u32,
    /// 亮度梯度二值化阈值
    pub edge_threshold: f32,
    /// 中心区域占宽高的比例
    pub center_fraction: f32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            block_size: 32,
            block_sample_stride: 4,
            histogram_sample_stride: 20,
            edge_grid_stride: 4,
            edge_threshold: 20.0,
            center_fraction: 0.4,
        }
    }
}

/// 每通道 8 桶、按采样数归一化的 RGB 直方图
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColorHistogram {
    channels: [[f32; HISTOGRAM_BINS]; HISTOGRAM_CHANNELS],
}

impl ColorHistogram {
    pub fn from_frame(frame: &Frame, sample_stride: usize) -> Self {
        let mut counts = [[0u32; HISTOGRAM_BINS]; HISTOGRAM_CHANNELS];
        let mut samples = 0u32;

        for index in (0..frame.pixel_count()).step_by(sample_stride.max(1)) {
            let rgb = frame.pixel_at(index);
            for (channel, &value) in rgb.iter().enumerate() {
                counts[channel][(value / BIN_WIDTH) as usize] += 1;
            }
            samples += 1;
        }

        let mut channels = [[0f32; HISTOGRAM_BINS]; HISTOGRAM_CHANNELS];
        if samples > 0 {
            for (dst, src) in channels.iter_mut().zip(counts.iter()) {
                for (d, &c) in dst.iter_mut().zip(src.iter()) {
                    *d = c as f32 / samples as f32;
                }
            }
        }

        Self { channels }
    }

    pub fn channel(&self, channel: usize) -> &[f32; HISTOGRAM_BINS] {
        &self.channels[channel]
    }

    /// 逐通道卡方距离
    pub fn chi_square(&self, other: &ColorHistogram) -> [f32; HISTOGRAM_CHANNELS] {
        let mut result = [0f32; HISTOGRAM_CHANNELS];
        for (c, out) in result.iter_mut().enumerate() {
            *out = self.channels[c]
                .iter()
                .zip(other.channels[c].iter())
                .filter(|(a, b)| *a + *b > 0.0)
                .map(|(a, b)| (a - b).powi(2) / (a + b))
                .sum();
        }
        result
    }

    /// 三通道卡方之和除以通道数，截断到 [0, 1]
    pub fn distance(&self, other: &ColorHistogram) -> f32 {
        let sum: f32 = self.chi_square(other).iter().sum();
        (sum / HISTOGRAM_CHANNELS as f32).clamp(0.0, 1.0)
    }
}

/// 降采样网格上的二值边缘图
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeMap {
    cols: usize,
    rows: usize,
    bits: Vec<u64>,
}

impl EdgeMap {
    pub fn from_frame(frame: &Frame, grid_stride: u32, threshold: f32) -> Self {
        let stride = grid_stride.max(1);
        let cols = frame.width.div_ceil(stride) as usize;
        let rows = frame.height.div_ceil(stride) as usize;
        let mut map = Self {
            cols,
            rows,
            bits: vec![0u64; (cols * rows).div_ceil(64)],
        };

        for row in 0..rows {
            let y = row as u32 * stride;
            for col in 0..cols {
                let x = col as u32 * stride;
                let here = frame.luminance(x, y);
                let gx = if x + 1 < frame.width {
                    frame.luminance(x + 1, y) - here
                } else {
                    0.0
                };
                let gy = if y + 1 < frame.height {
                    frame.luminance(x, y + 1) - here
                } else {
                    0.0
                };

                if (gx * gx + gy * gy).sqrt() > threshold {
                    map.set(row * cols + col);
                }
            }
        }

        map
    }

    fn set(&mut self, cell: usize) {
        self.bits[cell / 64] |= 1u64 << (cell % 64);
    }

    pub fn get(&self, col: usize, row: usize) -> bool {
        let cell = row * self.cols + col;
        self.bits[cell / 64] & (1u64 << (cell % 64)) != 0
    }

    pub fn cell_count(&self) -> usize {
        self.cols * self.rows
    }

    pub fn grid(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    pub fn edge_count(&self) -> u32 {
        self.bits.iter().map(|w| w.count_ones()).sum()
    }

    /// 边缘标记不同的格子比例（归一化汉明距离）
    pub fn difference(&self, other: &EdgeMap) -> f32 {
        if self.grid() != other.grid() {
            return 1.0;
        }
        if self.cell_count() == 0 {
            return 0.0;
        }
        let differing: u32 = self
            .bits
            .iter()
            .zip(other.bits.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        differing as f32 / self.cell_count() as f32
    }
}

/// 当前帧相对基线的比较特征
#[derive(Debug, Clone)]
pub struct FrameMetrics {
    pub motion_score: f32,
    pub center_score: f32,
    pub color_score: f32,
    pub edge_score: f32,
    /// 当前帧的直方图，帧被处理后成为新基线
    pub histogram: ColorHistogram,
    /// 当前帧的边缘图，帧被处理后成为新基线
    pub edge_map: EdgeMap,
}

impl FrameMetrics {
    /// 只有分数、没有直方图/边缘图的指标，用于调参和检查阈值
    pub fn from_scores(motion: f32, center: f32, color: f32, edge: f32) -> Self {
        Self {
            motion_score: motion,
            center_score: center,
            color_score: color,
            edge_score: edge,
            histogram: ColorHistogram::default(),
            edge_map: EdgeMap::default(),
        }
    }
}

/// 上一个已处理帧及其特征
#[derive(Debug, Clone)]
pub struct FrameBaseline {
    frame: Frame,
    histogram: ColorHistogram,
    edge_map: EdgeMap,
}

impl FrameBaseline {
    pub fn new(frame: Frame, config: &MetricsConfig) -> Self {
        let histogram = ColorHistogram::from_frame(&frame, config.histogram_sample_stride);
        let edge_map = EdgeMap::from_frame(&frame, config.edge_grid_stride, config.edge_threshold);
        Self {
            frame,
            histogram,
            edge_map,
        }
    }

    /// 复用比较时已经算好的直方图和边缘图
    pub fn from_metrics(frame: Frame, metrics: FrameMetrics) -> Self {
        Self {
            frame,
            histogram: metrics.histogram,
            edge_map: metrics.edge_map,
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn histogram(&self) -> &ColorHistogram {
        &self.histogram
    }

    pub fn edge_map(&self) -> &EdgeMap {
        &self.edge_map
    }
}

#[derive(Debug, Clone)]
pub enum Comparison {
    /// 会话首帧，没有可比较的基线
    NoBaseline,
    /// 尺寸变化（例如中途缩放窗口），基线作废
    DimensionMismatch {
        baseline: (u32, u32),
        current: (u32, u32),
    },
    Metrics(FrameMetrics),
}

pub fn compute_metrics(
    current: &Frame,
    previous: Option<&FrameBaseline>,
    config: &MetricsConfig,
) -> Comparison {
    let Some(previous) = previous else {
        return Comparison::NoBaseline;
    };

    if !current.same_dimensions(&previous.frame) {
        return Comparison::DimensionMismatch {
            baseline: (previous.frame.width, previous.frame.height),
            current: (current.width, current.height),
        };
    }

    let blocks = block_motions(current, &previous.frame, config);
    let motion_score = mean_motion(blocks.iter());
    let center_score = center_motion(&blocks).unwrap_or(motion_score);

    let histogram = ColorHistogram::from_frame(current, config.histogram_sample_stride);
    let color_score = histogram.distance(&previous.histogram);

    let edge_map = EdgeMap::from_frame(current, config.edge_grid_stride, config.edge_threshold);
    let edge_score = edge_map.difference(&previous.edge_map);

    Comparison::Metrics(FrameMetrics {
        motion_score,
        center_score,
        color_score,
        edge_score,
        histogram,
        edge_map,
    })
}

#[derive(Debug, Clone, Copy)]
struct BlockMotion {
    motion: f32,
    inside_center: bool,
    touches_center: bool,
}

#[derive(Debug, Clone, Copy)]
struct CenterRegion {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
}

impl CenterRegion {
    fn new(width: u32, height: u32, fraction: f32) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        let margin_x = width as f32 * (1.0 - fraction) / 2.0;
        let margin_y = height as f32 * (1.0 - fraction) / 2.0;
        Self {
            x0: margin_x,
            y0: margin_y,
            x1: width as f32 - margin_x,
            y1: height as f32 - margin_y,
        }
    }

    fn contains(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> bool {
        x0 as f32 >= self.x0 && y0 as f32 >= self.y0 && x1 as f32 <= self.x1 && y1 as f32 <= self.y1
    }

    fn intersects(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> bool {
        (x0 as f32) < self.x1 && (x1 as f32) > self.x0 && (y0 as f32) < self.y1 && (y1 as f32) > self.y0
    }
}

fn block_motions(current: &Frame, previous: &Frame, config: &MetricsConfig) -> Vec<BlockMotion> {
    let block = config.block_size.max(1);
    let stride = config.block_sample_stride.max(1);
    let cols = current.width.div_ceil(block);
    let rows = current.height.div_ceil(block);
    let region = CenterRegion::new(current.width, current.height, config.center_fraction);
    let max_distance = max_rgb_distance();

    // 按块序号收集后再归约，保证结果与线程调度无关
    (0..cols * rows)
        .into_par_iter()
        .map(|i| {
            let x0 = (i % cols) * block;
            let y0 = (i / cols) * block;
            let x1 = (x0 + block).min(current.width);
            let y1 = (y0 + block).min(current.height);

            let a = block_average(current, x0, y0, x1, y1, stride);
            let b = block_average(previous, x0, y0, x1, y1, stride);
            let distance = ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt();

            BlockMotion {
                motion: (distance / max_distance).clamp(0.0, 1.0),
                inside_center: region.contains(x0, y0, x1, y1),
                touches_center: region.intersects(x0, y0, x1, y1),
            }
        })
        .collect()
}

fn block_average(frame: &Frame, x0: u32, y0: u32, x1: u32, y1: u32, stride: u32) -> [f32; 3] {
    let mut sum = [0u64; 3];
    let mut count = 0u64;

    for y in (y0..y1).step_by(stride as usize) {
        for x in (x0..x1).step_by(stride as usize) {
            let [r, g, b] = frame.pixel(x, y);
            sum[0] += r as u64;
            sum[1] += g as u64;
            sum[2] += b as u64;
            count += 1;
        }
    }

    if count == 0 {
        return [0.0; 3];
    }
    [
        sum[0] as f32 / count as f32,
        sum[1] as f32 / count as f32,
        sum[2] as f32 / count as f32,
    ]
}

fn mean_motion<'a>(blocks: impl Iterator<Item = &'a BlockMotion>) -> f32 {
    let mut sum = 0f32;
    let mut count = 0usize;
    for b in blocks {
        sum += b.motion;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

fn center_motion(blocks: &[BlockMotion]) -> Option<f32> {
    if blocks.iter().any(|b| b.inside_center) {
        return Some(mean_motion(blocks.iter().filter(|b| b.inside_center)));
    }
    // 帧太小时没有完整落在中心区域的块
    if blocks.iter().any(|b| b.touches_center) {
        return Some(mean_motion(blocks.iter().filter(|b| b.touches_center)));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scene::frame::PixelFormat;

    fn solid_frame(width: u32, height: u32, value: u8) -> Frame {
        let mut data = vec![value; (width * height * 4) as usize];
        for alpha in data.iter_mut().skip(3).step_by(4) {
            *alpha = 255;
        }
        Frame::new(width, height, data, 0, 0).unwrap()
    }

    fn frame_with(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Frame {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = f(x, y);
                data.extend_from_slice(&[v, v, v, 255]);
            }
        }
        Frame::new(width, height, data, 0, 0).unwrap()
    }

    fn metrics_between(current: &Frame, previous: Frame) -> FrameMetrics {
        let config = MetricsConfig::default();
        let baseline = FrameBaseline::new(previous, &config);
        match compute_metrics(current, Some(&baseline), &config) {
            Comparison::Metrics(m) => m,
            other => panic!("expected metrics, got {:?}", other),
        }
    }

    #[test]
    fn test_no_baseline() {
        let frame = solid_frame(64, 64, 10);
        assert!(matches!(
            compute_metrics(&frame, None, &MetricsConfig::default()),
            Comparison::NoBaseline
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let config = MetricsConfig::default();
        let baseline = FrameBaseline::new(solid_frame(64, 64, 10), &config);
        let frame = solid_frame(128, 64, 10);

        match compute_metrics(&frame, Some(&baseline), &config) {
            Comparison::DimensionMismatch { baseline, current } => {
                assert_eq!(baseline, (64, 64));
                assert_eq!(current, (128, 64));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_identical_frames_score_zero() {
        let frame = frame_with(96, 64, |x, y| ((x * 7 + y * 3) % 256) as u8);
        let m = metrics_between(&frame, frame.clone());

        assert_eq!(m.motion_score, 0.0);
        assert_eq!(m.center_score, 0.0);
        assert_eq!(m.color_score, 0.0);
        assert_eq!(m.edge_score, 0.0);
    }

    #[test]
    fn test_black_to_white() {
        let m = metrics_between(&solid_frame(64, 64, 255), solid_frame(64, 64, 0));

        assert!((m.motion_score - 1.0).abs() < 1e-5);
        assert!((m.center_score - 1.0).abs() < 1e-5);
        // 每通道卡方为 2，总和除以 3 后截断到 1
        assert_eq!(m.color_score, 1.0);
        assert_eq!(m.edge_score, 0.0);
    }

    #[test]
    fn test_center_region_emphasis() {
        // 160x160、32px 分块：只有 (2,2) 这一块完整落在中心 40% 区域 [48, 112]
        let previous = solid_frame(160, 160, 0);
        let current = frame_with(160, 160, |x, y| {
            if (64..96).contains(&x) && (64..96).contains(&y) {
                255
            } else {
                0
            }
        });
        let m = metrics_between(&current, previous);

        assert!((m.center_score - 1.0).abs() < 1e-5);
        assert!((m.motion_score - 1.0 / 25.0).abs() < 1e-5);
    }

    #[test]
    fn test_center_fallback_on_small_frames() {
        // 16x16 只有一个块，无法完整落入中心区域，退化为相交块
        let m = metrics_between(&solid_frame(16, 16, 255), solid_frame(16, 16, 0));
        assert!((m.center_score - m.motion_score).abs() < 1e-6);
    }

    #[test]
    fn test_edge_map_difference() {
        // x=4 的格点右邻 x=5 跨越明暗边界，4 行共 4 个边缘格
        let striped = frame_with(16, 16, |x, _| if x < 5 { 0 } else { 255 });
        let flat = solid_frame(16, 16, 0);

        let edges = EdgeMap::from_frame(&striped, 4, 20.0);
        assert_eq!(edges.grid(), (4, 4));
        assert_eq!(edges.edge_count(), 4);
        assert!(edges.get(1, 0));
        assert!(!edges.get(0, 0));

        let m = metrics_between(&striped, flat);
        assert!((m.edge_score - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_histogram_normalized() {
        let frame = frame_with(40, 10, |x, _| if x < 20 { 10 } else { 250 });
        let hist = ColorHistogram::from_frame(&frame, 20);

        for c in 0..3 {
            let total: f32 = hist.channel(c).iter().sum();
            assert!((total - 1.0).abs() < 1e-6);
        }
        assert!((hist.channel(0)[0] - 0.5).abs() < 1e-6);
        assert!((hist.channel(0)[7] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_metrics_deterministic() {
        let a = frame_with(200, 120, |x, y| ((x * 13 + y * 29) % 251) as u8);
        let b = frame_with(200, 120, |x, y| ((x * 17 + y * 5) % 241) as u8);

        let first = metrics_between(&a, b.clone());
        let second = metrics_between(&a, b);

        assert_eq!(first.motion_score.to_bits(), second.motion_score.to_bits());
        assert_eq!(first.center_score.to_bits(), second.center_score.to_bits());
        assert_eq!(first.color_score.to_bits(), second.color_score.to_bits());
        assert_eq!(first.edge_score.to_bits(), second.edge_score.to_bits());
        assert_eq!(first.edge_map, second.edge_map);
    }

    #[test]
    fn test_rgb_frames_match_rgba() {
        let rgba_prev = solid_frame(64, 64, 0);
        let rgba_cur = frame_with(64, 64, |x, _| if x < 32 { 0 } else { 200 });
        let rgb_prev = Frame::with_format(64, 64, PixelFormat::Rgb, rgba_prev.to_rgb(), 0, 0).unwrap();
        let rgb_cur = Frame::with_format(64, 64, PixelFormat::Rgb, rgba_cur.to_rgb(), 0, 0).unwrap();

        let a = metrics_between(&rgba_cur, rgba_prev);
        let b = metrics_between(&rgb_cur, rgb_prev);

        assert_eq!(a.motion_score, b.motion_score);
        assert_eq!(a.color_score, b.color_score);
        assert_eq!(a.edge_score, b.edge_score);
    }
}
