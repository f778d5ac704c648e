pub mod simple;
pub use simple::{RandomSelector, RoundRobinSelector, WeightedRoundRobinSelector};

use crate::config::{BackendConfig, BalanceStrategy};
use crate::error::AppError;
use async_trait::async_trait;
use http::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// 服务发现节点
#[derive(Debug)]
pub struct Node {
    // 节点基础 URL
    pub url: String,
    // 节点权重
    pub weight: u32,
}

// 节点运行期统计，由 DoneFunc 反馈驱动
#[derive(Debug, Default)]
pub struct NodeStats {
    // 成功次数
    successes: AtomicU64,
    // 失败次数
    failures: AtomicU64,
}

impl NodeStats {
    #[inline(always)]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// 托管节点，封装节点及其统计
#[derive(Debug, Clone)]
pub struct ManagedNode {
    // 节点
    pub node: Arc<Node>,
    // 运行期统计
    pub stats: Arc<NodeStats>,
}

impl ManagedNode {
    fn new(backend: &BackendConfig) -> Self {
        Self {
            node: Arc::new(Node {
                url: backend.url.trim_end_matches('/').to_string(),
                weight: backend.weight,
            }),
            stats: Arc::new(NodeStats::default()),
        }
    }
}

// 请求终态反馈，必须恰好回报一次
#[derive(Debug, Default)]
pub struct DoneInfo {
    // 传输或复制错误
    pub err: Option<String>,
    // 成功时的响应元数据（gRPC 为 trailer，HTTP 为响应头）
    pub reply_md: Option<HeaderMap>,
}

// 单节点的终态回调
pub type DoneFunc = Box<dyn FnOnce(DoneInfo) + Send + Sync>;

// 一次节点选择结果
pub struct Selection {
    // 选中的节点
    pub node: Arc<Node>,
    // 终态回调，用于负载均衡反馈
    pub done: DoneFunc,
}

// 负载均衡选择器特性
#[async_trait]
pub trait Selector: Send + Sync {
    // 选择一个节点
    async fn select(&self) -> Result<Selection, AppError>;

    // 获取选择器类型字符串标识
    fn strategy(&self) -> &'static str;
}

// 基于统计反馈构造选择结果
pub(crate) fn make_selection(managed: &ManagedNode) -> Selection {
    let stats = managed.stats.clone();
    Selection {
        node: managed.node.clone(),
        done: Box::new(move |info: DoneInfo| {
            if info.err.is_some() {
                stats.failures.fetch_add(1, Ordering::Relaxed);
            } else {
                stats.successes.fetch_add(1, Ordering::Relaxed);
            }
        }),
    }
}

// 创建负载均衡选择器
pub fn create_selector(
    strategy: BalanceStrategy,
    backends: &[BackendConfig],
) -> Arc<dyn Selector> {
    let nodes: Vec<ManagedNode> = backends.iter().map(ManagedNode::new).collect();

    match strategy {
        BalanceStrategy::RoundRobin => Arc::new(RoundRobinSelector::new(nodes)),
        BalanceStrategy::WeightedRoundRobin => Arc::new(WeightedRoundRobinSelector::new(nodes)),
        BalanceStrategy::Random => Arc::new(RandomSelector::new(nodes)),
    }
}
