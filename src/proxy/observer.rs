use crate::config::EndpointConfig;
use crate::error::AppError;
use crate::metrics::METRICS;
use http::Method;
use std::sync::Arc;
use std::time::Duration;

// 单端点的指标观察者
//
// 持有端点标签束，供并发请求共享只读使用
pub trait Observer: Send + Sync {
    // 终态请求事件
    fn handle_request(&self, method: &Method, status_code: u16, err: Option<&AppError>);
    // 重试事件，state 取值 "true" / "false" / "breaker"
    fn handle_retry(&self, method: &Method, state: &str);
    // 发送到客户端的字节数
    fn handle_sent_bytes(&self, method: &Method, bytes: u64);
    // 从客户端接收的字节数
    fn handle_received_bytes(&self, method: &Method, bytes: u64);
    // 请求耗时
    fn handle_latency(&self, method: &Method, latency: Duration);
}

// 观察者工厂，端点构建时调用一次
pub trait Observable: Send + Sync {
    fn observe(&self, endpoint: &EndpointConfig) -> Arc<dyn Observer>;
}

// 端点标签束
struct MetricsLabels {
    protocol: &'static str,
    path: String,
    service: String,
    base_path: String,
}

// 默认观察者工厂，写入全局 prometheus 指标
#[derive(Default)]
pub struct MetricsObservable;

impl Observable for MetricsObservable {
    fn observe(&self, endpoint: &EndpointConfig) -> Arc<dyn Observer> {
        Arc::new(MetricsObserver {
            labels: MetricsLabels {
                protocol: endpoint.protocol.as_str(),
                path: endpoint.path.clone(),
                service: endpoint.service.clone(),
                base_path: endpoint.base_path.clone(),
            },
        })
    }
}

struct MetricsObserver {
    labels: MetricsLabels,
}

impl Observer for MetricsObserver {
    fn handle_request(&self, method: &Method, status_code: u16, _err: Option<&AppError>) {
        METRICS
            .requests_code_total()
            .with_label_values(&[
                self.labels.protocol,
                method.as_str(),
                &self.labels.path,
                &status_code.to_string(),
                &self.labels.service,
                &self.labels.base_path,
            ])
            .inc();
    }

    fn handle_retry(&self, method: &Method, state: &str) {
        METRICS
            .requests_retry_state()
            .with_label_values(&[
                self.labels.protocol,
                method.as_str(),
                &self.labels.path,
                &self.labels.service,
                &self.labels.base_path,
                state,
            ])
            .inc();
    }

    fn handle_sent_bytes(&self, method: &Method, bytes: u64) {
        METRICS
            .requests_tx_bytes()
            .with_label_values(&[
                self.labels.protocol,
                method.as_str(),
                &self.labels.path,
                &self.labels.service,
                &self.labels.base_path,
            ])
            .inc_by(bytes as f64);
    }

    fn handle_received_bytes(&self, method: &Method, bytes: u64) {
        METRICS
            .requests_rx_bytes()
            .with_label_values(&[
                self.labels.protocol,
                method.as_str(),
                &self.labels.path,
                &self.labels.service,
                &self.labels.base_path,
            ])
            .inc_by(bytes as f64);
    }

    fn handle_latency(&self, method: &Method, latency: Duration) {
        METRICS
            .requests_duration_seconds()
            .with_label_values(&[
                self.labels.protocol,
                method.as_str(),
                &self.labels.path,
                &self.labels.service,
                &self.labels.base_path,
            ])
            .observe(latency.as_secs_f64());
    }
}
