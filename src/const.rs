// 应用常量定义

//
// 配置参数限制常量
//

// 应用关闭等待时间限制
pub mod shutdown_timeout {
    // 默认值
    pub const DEFAULT: u64 = 30;
    // 最小值
    pub const MIN: u64 = 1;
    // 最大值
    pub const MAX: u64 = 120;
}

// 重试策略限制
pub mod retry_limits {
    // 最小尝试次数
    pub const MIN_ATTEMPTS: u32 = 1;
    // 最大尝试次数
    pub const MAX_ATTEMPTS: u32 = 100;
    // 默认尝试次数（1 表示不重试）
    pub const DEFAULT_ATTEMPTS: u32 = 1;
    // 默认整体超时（毫秒）
    pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
}

// 重试熔断器参数（SRE 自适应限流）
pub mod retry_breaker {
    // 成功率阈值
    pub const SUCCESS_RATIO: f64 = 0.8;
    // 窗口内最小请求数，低于该值不熔断
    pub const REQUEST_MIN: u64 = 10;
    // 滑动窗口长度（毫秒）
    pub const WINDOW_MS: u64 = 3_000;
    // 窗口分桶数量
    pub const BUCKETS: usize = 10;
}

// 路由表退役参数
pub mod router_drain {
    // 旧路由表关闭前的等待时间（秒）
    pub const GRACE_PERIOD_SECS: u64 = 120;
}

// HTTP客户端配置限制
pub mod http_client_limits {
    // 默认连接超时（秒）
    pub const DEFAULT_CONNECT_TIMEOUT: u64 = 60;
    // 默认请求超时（秒）
    pub const DEFAULT_REQUEST_TIMEOUT: u64 = 120;
    // 默认空闲超时（秒）
    pub const DEFAULT_IDLE_TIMEOUT: u64 = 60;
    // 默认keepalive时间（秒）
    pub const DEFAULT_KEEPALIVE: u32 = 30;
}

// 权重配置限制
pub mod weight_limits {
    // 最小权重值
    pub const MIN_WEIGHT: u32 = 1;
    // 最大权重值
    pub const MAX_WEIGHT: u32 = 65535;
}

// 恐慌处理参数
pub mod panic_limits {
    // 堆栈捕获上限（64 KiB）
    pub const MAX_STACK_BYTES: usize = 64 << 10;
}

// HTTP 头部常量
pub mod http_headers {
    // 内容类型头部
    pub const CONTENT_TYPE: &str = "content-type";
    // 传输编码头部
    pub const TRANSFER_ENCODING: &str = "transfer-encoding";
    // 内容长度头部
    pub const CONTENT_LENGTH: &str = "content-length";
    // 转发链头部
    pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

    // gRPC 专用头部
    pub mod grpc {
        pub const CONTENT_TYPE: &str = "application/grpc";
        pub const STATUS: &str = "grpc-status";
        pub const MESSAGE: &str = "grpc-message";
    }

    // 内容类型值
    pub mod content_types {
        // 事件流内容类型
        pub const EVENT_STREAM: &str = "text/event-stream";
    }

    // 传输编码值
    pub mod transfer_encodings {
        // 分块传输编码
        pub const CHUNKED: &str = "chunked";
    }
}

//
// 指标标签常量
//

// 重试结果标签
pub mod retry_state_labels {
    // 重试成功
    pub const SUCCESS: &str = "true";
    // 重试失败
    pub const FAILED: &str = "false";
    // 被熔断器拒绝
    pub const BREAKER: &str = "breaker";
}

// 协议标签
pub mod protocol_labels {
    pub const HTTP: &str = "HTTP";
    pub const GRPC: &str = "GRPC";
}

// 未匹配请求的合成路径标签
pub mod synthetic_paths {
    pub const NOT_FOUND: &str = "/404";
    pub const METHOD_NOT_ALLOWED: &str = "/405";
}

// 请求耗时直方图分桶（秒）
pub const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

// 负载均衡策略标签
pub mod balance_strategy_labels {
    // 轮询
    pub const ROUND_ROBIN: &str = "roundrobin";
    // 加权轮询
    pub const WEIGHTED_ROUND_ROBIN: &str = "weighted_roundrobin";
    // 随机
    pub const RANDOM: &str = "random";
}
