//! 自适应阈值：按 (错误类型, 上下文) 维护自动修正所需的最低置信度
//!
//! 学习率随样本数减小：`rate = 0.1 × (1 + 5 / max(n, 5))`。滚动成功率 > 0.8 时阈值向上限靠拢，
//! < 0.6 时向下限靠拢。每累计 `recompute_interval` 个样本，按样本数加权重算该错误类型的基准阈值。
//! 所有阈值始终截断在 `[min, max]`（默认 0.3..=0.9）。

use std::collections::{HashMap, VecDeque};

use crate::config::ThresholdSection;
use crate::correction::ErrorKind;

#[derive(Debug, Clone, PartialEq)]
pub struct ContextThreshold {
    pub threshold: f64,
    pub success_rate: f64,
    pub sample_size: u64,
}

#[derive(Debug, Clone)]
pub struct ThresholdData {
    pub base_threshold: f64,
    pub contexts: HashMap<String, ContextThreshold>,
    /// 最近的 (上下文, 是否成功)，长度受 history_limit 限制
    pub history: VecDeque<(String, bool)>,
    pub total_samples: u64,
}

impl ThresholdData {
    fn new(base_threshold: f64) -> Self {
        Self {
            base_threshold,
            contexts: HashMap::new(),
            history: VecDeque::new(),
            total_samples: 0,
        }
    }

    /// 某上下文在历史窗口内的成功率
    fn rolling_success_rate(&self, context: &str) -> f64 {
        let (hits, total) = self
            .history
            .iter()
            .filter(|(c, _)| c == context)
            .fold((0u64, 0u64), |(h, t), (_, ok)| (h + u64::from(*ok), t + 1));
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// 阈值管理器；由调用方持有并注入到 AutoCorrectEngine
#[derive(Debug)]
pub struct ThresholdManager {
    config: ThresholdSection,
    data: HashMap<ErrorKind, ThresholdData>,
}

impl ThresholdManager {
    pub fn new(config: ThresholdSection) -> Self {
        Self {
            config,
            data: HashMap::new(),
        }
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.config.min, self.config.max)
    }

    /// 学习率：样本越少越大
    pub fn learning_rate(sample_size: u64) -> f64 {
        0.1 * (1.0 + 5.0 / sample_size.max(5) as f64)
    }

    pub fn get_threshold(&self, kind: ErrorKind, context: &str) -> f64 {
        let value = match self.data.get(&kind) {
            Some(data) => data
                .contexts
                .get(context)
                .map(|c| c.threshold)
                .unwrap_or(data.base_threshold),
            None => self.config.default,
        };
        self.clamp(value)
    }

    pub fn base_threshold(&self, kind: ErrorKind) -> f64 {
        self.clamp(
            self.data
                .get(&kind)
                .map(|d| d.base_threshold)
                .unwrap_or(self.config.default),
        )
    }

    pub fn data(&self, kind: ErrorKind) -> Option<&ThresholdData> {
        self.data.get(&kind)
    }

    pub fn adjust_threshold(&mut self, kind: ErrorKind, context: &str, success: bool) {
        let (min, max) = (self.config.min, self.config.max);
        let default = self.clamp(self.config.default);
        let history_limit = self.config.history_limit.max(1);
        let interval = self.config.recompute_interval.max(1);

        let data = self.data.entry(kind).or_insert_with(|| ThresholdData::new(default));
        data.history.push_back((context.to_string(), success));
        while data.history.len() > history_limit {
            data.history.pop_front();
        }
        let success_rate = data.rolling_success_rate(context);

        let base = data.base_threshold;
        let entry = data
            .contexts
            .entry(context.to_string())
            .or_insert_with(|| ContextThreshold {
                threshold: base,
                success_rate: 0.0,
                sample_size: 0,
            });
        entry.sample_size += 1;
        entry.success_rate = success_rate;

        let rate = Self::learning_rate(entry.sample_size);
        let current = entry.threshold;
        let next = if success_rate > 0.8 {
            current + rate * (max - current)
        } else if success_rate < 0.6 {
            current - rate * (current - min)
        } else {
            current
        };
        entry.threshold = next.clamp(min, max);
        tracing::debug!(
            "Threshold {}/{}: {:.3} -> {:.3} (success rate {:.2}, n={})",
            kind,
            context,
            current,
            entry.threshold,
            success_rate,
            entry.sample_size
        );

        data.total_samples += 1;
        if data.total_samples % interval == 0 {
            let (weighted, weights) = data
                .contexts
                .values()
                .fold((0.0, 0.0), |(w, n), c| {
                    (w + c.threshold * c.sample_size as f64, n + c.sample_size as f64)
                });
            if weights > 0.0 {
                data.base_threshold = (weighted / weights).clamp(min, max);
                tracing::info!(
                    "Recomputed base threshold for {} errors: {:.3}",
                    kind,
                    data.base_threshold
                );
            }
        }
    }
}
