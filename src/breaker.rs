use crate::r#const::retry_breaker;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// 熔断器拒绝信号
#[derive(Debug, PartialEq, Eq)]
pub enum BreakerError {
    // 当前不允许再发起重试
    NotAllowed,
}

impl fmt::Display for BreakerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "retry breaker: request not allowed")
    }
}

impl std::error::Error for BreakerError {}

// 滑动窗口分桶
//
// epoch 为 0 表示从未写入；计数通过原子操作累加，过期桶在写入时惰性重置
struct Bucket {
    epoch: AtomicU64,
    total: AtomicU64,
    success: AtomicU64,
}

/// 重试熔断器
///
/// SRE 自适应限流：按滑动窗口统计重试的成功率，
/// 以 `(total - k * success) / (total + 1)` 的概率拒绝新的重试，
/// 其中 `k = 1 / success_ratio`。窗口内请求数低于下限时不熔断。
///
/// 只约束第二次及之后的尝试，首次尝试既不经过也不反馈熔断器。
pub struct RetryBreaker {
    buckets: Vec<Bucket>,
    bucket_ms: u64,
    k: f64,
    request_min: u64,
    origin: Instant,
}

impl RetryBreaker {
    /// 创建一个新的熔断器
    pub fn new(success_ratio: f64, request_min: u64, window: Duration, buckets: usize) -> Self {
        let buckets_vec = (0..buckets.max(1))
            .map(|_| Bucket {
                epoch: AtomicU64::new(0),
                total: AtomicU64::new(0),
                success: AtomicU64::new(0),
            })
            .collect();

        Self {
            buckets: buckets_vec,
            bucket_ms: (window.as_millis() as u64 / buckets.max(1) as u64).max(1),
            k: 1.0 / success_ratio,
            request_min,
            origin: Instant::now(),
        }
    }

    /// 检查当前是否允许发起一次重试
    pub fn allow(&self) -> Result<(), BreakerError> {
        let (total, success) = self.window_counts();
        if total < self.request_min {
            return Ok(());
        }

        let drop_ratio = (total as f64 - self.k * success as f64) / (total + 1) as f64;
        if drop_ratio <= 0.0 {
            return Ok(());
        }

        if rand::random::<f64>() < drop_ratio {
            debug!(
                "Retry breaker rejected request, total: {}, success: {}, drop_ratio: {:.3}",
                total, success, drop_ratio
            );
            return Err(BreakerError::NotAllowed);
        }

        Ok(())
    }

    /// 记录一次成功的重试
    pub fn mark_success(&self) {
        let bucket = self.rotate_current();
        bucket.total.fetch_add(1, Ordering::Relaxed);
        bucket.success.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次失败的重试
    pub fn mark_failed(&self) {
        let bucket = self.rotate_current();
        bucket.total.fetch_add(1, Ordering::Relaxed);
    }

    // 当前时间所属的 epoch，从 1 开始，0 保留为未写入标记
    #[inline(always)]
    fn current_epoch(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64 / self.bucket_ms + 1
    }

    // 取当前桶并在跨越窗口时重置过期计数
    fn rotate_current(&self) -> &Bucket {
        let epoch = self.current_epoch();
        let bucket = &self.buckets[(epoch % self.buckets.len() as u64) as usize];

        loop {
            let seen = bucket.epoch.load(Ordering::Acquire);
            if seen == epoch {
                break;
            }
            if bucket
                .epoch
                .compare_exchange(seen, epoch, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                bucket.total.store(0, Ordering::Relaxed);
                bucket.success.store(0, Ordering::Relaxed);
                break;
            }
        }

        bucket
    }

    // 统计窗口内的总数与成功数
    fn window_counts(&self) -> (u64, u64) {
        let now = self.current_epoch();
        let len = self.buckets.len() as u64;
        let mut total = 0;
        let mut success = 0;

        for bucket in &self.buckets {
            let epoch = bucket.epoch.load(Ordering::Acquire);
            if epoch != 0 && now - epoch < len {
                total += bucket.total.load(Ordering::Relaxed);
                success += bucket.success.load(Ordering::Relaxed);
            }
        }

        (total, success)
    }
}

impl Default for RetryBreaker {
    fn default() -> Self {
        Self::new(
            retry_breaker::SUCCESS_RATIO,
            retry_breaker::REQUEST_MIN,
            Duration::from_millis(retry_breaker::WINDOW_MS),
            retry_breaker::BUCKETS,
        )
    }
}

/// 进程级重试熔断器，所有端点处理器共享
pub static RETRY_BREAKER: Lazy<RetryBreaker> = Lazy::new(RetryBreaker::default);
