use crate::r#const::shutdown_timeout;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

// apigate - HTTP/gRPC API 网关
#[derive(Parser, Debug, Clone)]
#[command(
    name = "apigated",
    author,
    version,
    about = "An HTTP/gRPC API gateway: matches incoming requests to configured endpoints, \nruns a middleware chain over an upstream transport, and relays the response.\n\n\
             Key Features:\n\
             - Endpoint Routing: Match by path, method and optional host, with hot reconfiguration and drain-on-reload.\n\
             - Bounded Retries: Per-endpoint retry policies (attempts, per-try/overall timeouts, status/header conditions).\n\
             - Retry Circuit Breaker: Process-wide SRE breaker that caps retry storms under sustained backend failure.\n\
             - Streaming Passthrough: gRPC, WebSocket and SSE bodies relayed frame by frame with lifecycle tracking.\n\
             - Load Balancing: Round-robin, weighted round-robin and random node selection with completion feedback.\n\
             - Observability: Prometheus request/retry/latency/byte metrics and a route-table debug endpoint."
)]
pub struct Args {
    // 配置文件路径
    #[clap(
        short,
        long,
        value_name = "FILE",
        default_value = "config.yaml",
        help = "Path to the configuration file"
    )]
    pub config: PathBuf,

    // 是否开启调试模式
    #[clap(
        short,
        long,
        action = ArgAction::SetTrue,
        help = "Enable debug mode"
    )]
    pub debug: bool,

    // 是否仅测试配置文件
    #[clap(
        short = 't',
        long = "test",
        action = ArgAction::SetTrue,
        help = "Test configuration file for validity and exit"
    )]
    pub test_config: bool,

    // 优雅关闭超时时间（秒）
    #[clap(
        long = "shutdown-timeout",
        value_name = "SECONDS",
        default_value_t = shutdown_timeout::DEFAULT,
        help = "Maximum time in seconds to wait for complete shutdown"
    )]
    pub shutdown_timeout: u64,
}

impl Args {
    // 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    // 验证参数
    pub fn validation(&self) -> Result<(), String> {
        // 验证关闭超时时间
        if self.shutdown_timeout < shutdown_timeout::MIN
            || self.shutdown_timeout > shutdown_timeout::MAX
        {
            return Err(format!(
                "Shutdown timeout must be between {} and {} seconds",
                shutdown_timeout::MIN,
                shutdown_timeout::MAX
            ));
        }

        Ok(())
    }
}
