//! 批次统计：成功率、平均耗时、平均尝试次数、吞吐量、错误分布、剩余时间估算

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::info;

use crate::core::ErrorClass;

/// 单个请求的统计记录
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub id: usize,
    pub success: bool,
    pub duration: Duration,
    pub attempts: u32,
    pub class: Option<ErrorClass>,
}

#[derive(Debug, Default)]
pub struct BatchStats {
    started: Option<Instant>,
    finished: Option<Instant>,
    records: Vec<RequestRecord>,
}

/// 人类可读的时长：秒 / 分钟 / 小时
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.1}s")
    } else if secs < 3600.0 {
        format!("{:.1} min", secs / 60.0)
    } else {
        format!("{:.1} h", secs / 3600.0)
    }
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
        self.finished = None;
    }

    pub fn finish(&mut self) {
        self.finished = Some(Instant::now());
    }

    pub fn add(&mut self, record: RequestRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[RequestRecord] {
        &self.records
    }

    pub fn elapsed(&self) -> Duration {
        match (self.started, self.finished) {
            (Some(s), Some(f)) => f.duration_since(s),
            (Some(s), None) => s.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.success).count()
    }

    /// 百分比
    pub fn success_rate(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        self.succeeded() as f64 / self.records.len() as f64 * 100.0
    }

    pub fn average_duration(&self) -> Duration {
        if self.records.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.records.iter().map(|r| r.duration).sum();
        total / self.records.len() as u32
    }

    pub fn average_attempts(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let total: u32 = self.records.iter().map(|r| r.attempts).sum();
        f64::from(total) / self.records.len() as f64
    }

    /// 给定总耗时下的每分钟请求数
    pub fn requests_per_minute(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.records.len() as f64 / secs * 60.0
    }

    /// 失败请求按分类计数，次数多的在前
    pub fn error_breakdown(&self) -> Vec<(ErrorClass, usize)> {
        let mut counts: BTreeMap<ErrorClass, usize> = BTreeMap::new();
        for class in self.records.iter().filter(|r| !r.success).filter_map(|r| r.class) {
            *counts.entry(class).or_default() += 1;
        }
        let mut out: Vec<_> = counts.into_iter().collect();
        out.sort_by(|a, b| b.1.cmp(&a.1));
        out
    }

    pub fn fastest(&self) -> Option<&RequestRecord> {
        self.records.iter().min_by_key(|r| r.duration)
    }

    pub fn slowest(&self) -> Option<&RequestRecord> {
        self.records.iter().max_by_key(|r| r.duration)
    }

    pub fn estimate_remaining(&self, pending: usize) -> Option<Duration> {
        let avg = self.average_duration();
        (!avg.is_zero()).then(|| avg * pending as u32)
    }

    pub fn log_progress(&self, done: usize, total: usize) {
        let percent = if total == 0 { 100.0 } else { done as f64 / total as f64 * 100.0 };
        let eta = self
            .estimate_remaining(total.saturating_sub(done))
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string());
        info!(done, total, percent = format!("{percent:.1}%"), eta = %eta, "progress");
    }

    pub fn log_summary(&self) {
        let elapsed = self.elapsed();
        info!(
            total = self.records.len(),
            succeeded = self.succeeded(),
            failed = self.records.len() - self.succeeded(),
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = %format_duration(elapsed),
            avg_duration = %format_duration(self.average_duration()),
            avg_attempts = format!("{:.2}", self.average_attempts()),
            per_minute = format!("{:.2}", self.requests_per_minute(elapsed)),
            "batch summary"
        );
        for (class, count) in self.error_breakdown() {
            info!(%class, count, "errors by class");
        }
        if let (Some(fast), Some(slow)) = (self.fastest(), self.slowest()) {
            info!(
                fastest_row = fast.id,
                fastest = %format_duration(fast.duration),
                slowest_row = slow.id,
                slowest = %format_duration(slow.duration),
                "request durations"
            );
        }
    }
}
