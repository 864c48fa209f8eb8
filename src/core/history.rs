use std::collections::VecDeque;

/// 定长 FIFO 历史缓冲：先插入，超出容量时丢弃最旧的一项
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    /// 容量为 0 时按 1 处理，至少保留最新的一项
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Copy> BoundedHistory<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().copied().collect()
    }

    /// 最近 n 项（按时间顺序）
    pub fn recent(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).copied().collect()
    }
}

impl BoundedHistory<f32> {
    pub fn mean(&self) -> f32 {
        mean(&self.to_vec())
    }

    pub fn variance(&self) -> f32 {
        variance(&self.to_vec())
    }
}

impl BoundedHistory<bool> {
    /// 为 true 的比例；空历史返回 None
    pub fn true_ratio(&self) -> Option<f32> {
        if self.items.is_empty() {
            return None;
        }
        let hits = self.items.iter().filter(|&&v| v).count();
        Some(hits as f32 / self.items.len() as f32)
    }
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// 总体方差；少于两个样本时为 0
pub fn variance(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|&v| (v - m).powi(2)).sum::<f32>() / values.len() as f32
}
