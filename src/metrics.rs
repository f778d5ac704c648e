use crate::r#const::DURATION_BUCKETS;
use once_cell::sync::Lazy;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

// 网关指标
//
// 指标名称与标签顺序是对外契约的一部分，不可调整
pub struct Metrics {
    registry: Registry,
    // 按状态码统计的请求总数
    requests_code_total: CounterVec,
    // 请求耗时
    requests_duration_seconds: HistogramVec,
    // 发送到客户端的字节数
    requests_tx_bytes: CounterVec,
    // 从客户端接收的字节数
    requests_rx_bytes: CounterVec,
    // 重试结果计数
    requests_retry_state: CounterVec,
}

impl Metrics {
    // 创建新的指标收集器
    fn new() -> Self {
        let registry = Registry::new();

        // 请求总数
        let requests_code_total = CounterVec::new(
            Opts::new(
                "go_gateway_requests_code_total",
                "The total number of processed requests",
            ),
            &["protocol", "method", "path", "code", "service", "basePath"],
        )
        .unwrap();

        // 请求耗时
        let requests_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "go_gateway_requests_duration_seconds",
                "Requests duration(sec).",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["protocol", "method", "path", "service", "basePath"],
        )
        .unwrap();

        // 发送字节数
        let requests_tx_bytes = CounterVec::new(
            Opts::new("go_gateway_requests_tx_bytes", "Total sent connection bytes"),
            &["protocol", "method", "path", "service", "basePath"],
        )
        .unwrap();

        // 接收字节数
        let requests_rx_bytes = CounterVec::new(
            Opts::new(
                "go_gateway_requests_rx_bytes",
                "Total received connection bytes",
            ),
            &["protocol", "method", "path", "service", "basePath"],
        )
        .unwrap();

        // 重试结果计数
        let requests_retry_state = CounterVec::new(
            Opts::new("go_gateway_requests_retry_state", "Total request retries"),
            &[
                "protocol", "method", "path", "service", "basePath", "success",
            ],
        )
        .unwrap();

        // 注册指标
        registry
            .register(Box::new(requests_code_total.clone()))
            .unwrap();
        registry
            .register(Box::new(requests_duration_seconds.clone()))
            .unwrap();
        registry
            .register(Box::new(requests_tx_bytes.clone()))
            .unwrap();
        registry
            .register(Box::new(requests_rx_bytes.clone()))
            .unwrap();
        registry
            .register(Box::new(requests_retry_state.clone()))
            .unwrap();

        Self {
            registry,
            requests_code_total,
            requests_duration_seconds,
            requests_tx_bytes,
            requests_rx_bytes,
            requests_retry_state,
        }
    }

    // 获取注册表
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // 请求总数
    pub fn requests_code_total(&self) -> &CounterVec {
        &self.requests_code_total
    }

    // 请求耗时
    pub fn requests_duration_seconds(&self) -> &HistogramVec {
        &self.requests_duration_seconds
    }

    // 发送字节数
    pub fn requests_tx_bytes(&self) -> &CounterVec {
        &self.requests_tx_bytes
    }

    // 接收字节数
    pub fn requests_rx_bytes(&self) -> &CounterVec {
        &self.requests_rx_bytes
    }

    // 重试结果计数
    pub fn requests_retry_state(&self) -> &CounterVec {
        &self.requests_retry_state
    }
}

// 全局指标实例
pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);
