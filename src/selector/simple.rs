use super::{make_selection, ManagedNode, Selection, Selector};
use crate::error::AppError;
use crate::r#const::balance_strategy_labels;
use async_trait::async_trait;
use rand::{seq::SliceRandom, thread_rng};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

// 轮询选择器
pub struct RoundRobinSelector {
    // 节点列表
    nodes: Vec<ManagedNode>,
    // 当前索引（原子操作）
    current: AtomicUsize,
}

impl RoundRobinSelector {
    // 创建新的轮询选择器
    pub fn new(nodes: Vec<ManagedNode>) -> Self {
        Self {
            nodes,
            current: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Selector for RoundRobinSelector {
    async fn select(&self) -> Result<Selection, AppError> {
        if self.nodes.is_empty() {
            return Err(AppError::NoUpstreamAvailable);
        }

        let index = self.current.fetch_add(1, Ordering::SeqCst) % self.nodes.len();
        let managed = &self.nodes[index];

        debug!(
            "RoundRobinSelector selected node: {}, index: {}",
            managed.node.url, index
        );

        Ok(make_selection(managed))
    }

    fn strategy(&self) -> &'static str {
        balance_strategy_labels::ROUND_ROBIN
    }
}

// 加权轮询选择器
pub struct WeightedRoundRobinSelector {
    // 节点列表，按权重复制
    nodes: Vec<ManagedNode>,
    // 当前索引（原子操作）
    current: AtomicUsize,
}

impl WeightedRoundRobinSelector {
    // 创建新的加权轮询选择器
    pub fn new(nodes: Vec<ManagedNode>) -> Self {
        // 预先计算所需的容量以避免重新分配
        let total_capacity = nodes.iter().map(|n| n.node.weight as usize).sum();
        let mut weighted_nodes = Vec::with_capacity(total_capacity);

        // 根据权重复制节点
        for node in nodes {
            let weight = node.node.weight.max(1);
            for _ in 0..weight {
                weighted_nodes.push(node.clone());
            }
        }

        Self {
            nodes: weighted_nodes,
            current: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Selector for WeightedRoundRobinSelector {
    async fn select(&self) -> Result<Selection, AppError> {
        if self.nodes.is_empty() {
            return Err(AppError::NoUpstreamAvailable);
        }

        let index = self.current.fetch_add(1, Ordering::SeqCst) % self.nodes.len();
        let managed = &self.nodes[index];

        debug!(
            "WeightedRoundRobinSelector selected node: {}, index: {}",
            managed.node.url, index
        );

        Ok(make_selection(managed))
    }

    fn strategy(&self) -> &'static str {
        balance_strategy_labels::WEIGHTED_ROUND_ROBIN
    }
}

// 随机选择器
pub struct RandomSelector {
    // 节点列表
    nodes: Vec<ManagedNode>,
}

impl RandomSelector {
    // 创建新的随机选择器
    pub fn new(nodes: Vec<ManagedNode>) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl Selector for RandomSelector {
    async fn select(&self) -> Result<Selection, AppError> {
        let managed = self
            .nodes
            .choose(&mut thread_rng())
            .ok_or(AppError::NoUpstreamAvailable)?;

        debug!("RandomSelector selected node: {}", managed.node.url);

        Ok(make_selection(managed))
    }

    fn strategy(&self) -> &'static str {
        balance_strategy_labels::RANDOM
    }
}
