//! Order splitting: partition a parent's volume into child requests.
//!
//! Splitting only ever applies to `New` orders, and only when the
//! configured strategy is active and the parent exceeds the per-child
//! volume cap. Each child inherits the parent's security, side, market,
//! price, and timing; traded, fee, and broker fields start from zero.

use crate::order::request::{OrderId, OrderRequest, OrderType, Volume};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How to partition a parent order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SplitStrategy {
    /// Never split.
    #[default]
    None,
    /// Carve fixed-size chunks of `max_child_volume`.
    FixedSize,
    /// Reserved; currently behaves as `FixedSize`.
    Iceberg,
    /// Fixed child count with evenly distributed volume.
    Twap,
}

/// Splitter configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Active strategy.
    pub strategy: SplitStrategy,
    /// Per-child volume cap; zero disables splitting.
    pub max_child_volume: Volume,
    /// Minimum child volume; undersized tails merge into the previous
    /// child.
    pub min_child_volume: Volume,
    /// Maximum number of children per parent.
    pub max_child_count: u32,
    /// Reserved: pacing interval for timed strategies.
    pub interval_ms: u32,
    /// Reserved: volume randomization factor.
    pub randomize_factor: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig {
            strategy: SplitStrategy::None,
            max_child_volume: 0,
            min_child_volume: 100,
            max_child_count: 100,
            interval_ms: 0,
            randomize_factor: 0.0,
        }
    }
}

/// Why a split produced no children.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    /// The configured strategy cannot be executed.
    #[error("unsupported split strategy")]
    UnsupportedStrategy,
    /// Parent volume would require more children than allowed.
    #[error("child count exceeds max_child_count")]
    TooManyChildren,
    /// Configuration prevents producing any child.
    #[error("split configuration is unusable: {0}")]
    BadConfig(&'static str),
    /// The id generator returned zero.
    #[error("generated child order id is zero")]
    ZeroChildId,
}

fn make_child_request(parent: &OrderRequest, child_id: OrderId, child_volume: Volume) -> OrderRequest {
    let mut child = *parent;
    child.internal_order_id = child_id;
    child.volume_entrust = child_volume;
    child.volume_remain = child_volume;
    child.volume_traded = 0;
    child.dvalue_traded = 0;
    child.dprice_traded = 0;
    child.dfee_estimate = 0;
    child.dfee_executed = 0;
    child.md_time_traded_first = 0;
    child.md_time_traded_latest = 0;
    child.md_time_broker_response = 0;
    child.md_time_market_response = 0;
    child.broker_order_id.set_u64(0);
    child.orig_internal_order_id = 0;
    child
}

/// Strategy-driven order splitter. Child ids come from the caller-supplied
/// generator so that split children share the book's id sequence.
#[derive(Debug, Clone)]
pub struct OrderSplitter {
    config: SplitConfig,
}

impl OrderSplitter {
    /// Splitter with the given configuration.
    pub fn new(config: SplitConfig) -> Self {
        OrderSplitter { config }
    }

    /// Current configuration.
    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// Replace the configuration.
    pub fn update_config(&mut self, config: SplitConfig) {
        self.config = config;
    }

    /// Whether `order` should be split under the current configuration.
    pub fn should_split(&self, order: &OrderRequest) -> bool {
        order.order_type == OrderType::New
            && self.config.strategy != SplitStrategy::None
            && self.config.max_child_volume > 0
            && order.volume_entrust > self.config.max_child_volume
    }

    /// Partition `parent` into child requests. A parent that does not need
    /// splitting yields an empty vector.
    pub fn split(
        &self,
        parent: &OrderRequest,
        next_id: &mut dyn FnMut() -> OrderId,
    ) -> Result<Vec<OrderRequest>, SplitError> {
        if !self.should_split(parent) {
            return Ok(Vec::new());
        }

        match self.config.strategy {
            SplitStrategy::FixedSize | SplitStrategy::Iceberg => {
                self.split_fixed_size(parent, next_id)
            }
            SplitStrategy::Twap => self.split_twap(parent, next_id),
            SplitStrategy::None => Err(SplitError::UnsupportedStrategy),
        }
    }

    fn split_fixed_size(
        &self,
        parent: &OrderRequest,
        next_id: &mut dyn FnMut() -> OrderId,
    ) -> Result<Vec<OrderRequest>, SplitError> {
        if self.config.max_child_volume == 0 {
            return Err(SplitError::BadConfig("max_child_volume is zero"));
        }

        let mut children: Vec<OrderRequest> = Vec::new();
        let mut remaining = parent.volume_entrust;

        while remaining > 0 {
            if children.len() >= self.config.max_child_count as usize {
                return Err(SplitError::TooManyChildren);
            }

            let child_volume = remaining.min(self.config.max_child_volume);

            // An undersized tail merges into the previous child so no
            // child falls below the minimum.
            let is_tail = child_volume == remaining;
            if is_tail
                && self.config.min_child_volume > 0
                && child_volume < self.config.min_child_volume
                && !children.is_empty()
            {
                let last = children.last_mut().unwrap();
                last.volume_entrust += child_volume;
                last.volume_remain += child_volume;
                break;
            }

            let child_id = next_id();
            if child_id == 0 {
                return Err(SplitError::ZeroChildId);
            }

            children.push(make_child_request(parent, child_id, child_volume));
            remaining -= child_volume;
        }

        Ok(children)
    }

    fn split_twap(
        &self,
        parent: &OrderRequest,
        next_id: &mut dyn FnMut() -> OrderId,
    ) -> Result<Vec<OrderRequest>, SplitError> {
        if self.config.max_child_count == 0 {
            return Err(SplitError::BadConfig("max_child_count is zero"));
        }
        let total_volume = parent.volume_entrust;
        if total_volume == 0 {
            return Err(SplitError::BadConfig("parent volume is zero"));
        }

        let mut target = self.config.max_child_volume;
        if target == 0 {
            target = self.config.min_child_volume.max(1);
        }

        let child_count = (total_volume.div_ceil(target))
            .max(1)
            .min(u64::from(self.config.max_child_count)) as usize;

        let base = total_volume / child_count as u64;
        let mut remainder = total_volume % child_count as u64;

        let mut children = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            let mut child_volume = base;
            if remainder > 0 {
                child_volume += 1;
                remainder -= 1;
            }
            if child_volume == 0 {
                continue;
            }

            let child_id = next_id();
            if child_id == 0 {
                return Err(SplitError::ZeroChildId);
            }
            children.push(make_child_request(parent, child_id, child_volume));
        }

        if children.is_empty() {
            return Err(SplitError::BadConfig("twap split produced no children"));
        }
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::request::{Market, TradeSide};

    fn make_parent(volume: Volume) -> OrderRequest {
        let mut parent = OrderRequest::new();
        parent.init_new(
            "000001",
            "SZ.000001".into(),
            9000,
            TradeSide::Buy,
            Market::Sz,
            volume,
            1000,
            93_000_000,
        );
        parent
    }

    fn id_gen(start: OrderId) -> impl FnMut() -> OrderId {
        let mut next = start;
        move || {
            let id = next;
            next += 1;
            id
        }
    }

    fn config(strategy: SplitStrategy, max_child: Volume) -> SplitConfig {
        SplitConfig {
            strategy,
            max_child_volume: max_child,
            min_child_volume: 1,
            max_child_count: 16,
            ..SplitConfig::default()
        }
    }

    #[test]
    fn none_strategy_never_splits() {
        let splitter = OrderSplitter::new(SplitConfig::default());
        let parent = make_parent(1_000_000);
        assert!(!splitter.should_split(&parent));
        let mut gen_ = id_gen(1);
        assert_eq!(splitter.split(&parent, &mut gen_).unwrap(), Vec::new());
    }

    #[test]
    fn small_orders_pass_through() {
        let splitter = OrderSplitter::new(config(SplitStrategy::FixedSize, 100));
        assert!(!splitter.should_split(&make_parent(100)));
        assert!(splitter.should_split(&make_parent(101)));
    }

    #[test]
    fn cancel_orders_never_split() {
        let splitter = OrderSplitter::new(config(SplitStrategy::FixedSize, 100));
        let mut cancel = OrderRequest::new();
        cancel.init_cancel(9001, 93_000_000, 9000);
        assert!(!splitter.should_split(&cancel));
    }

    #[test]
    fn fixed_size_carves_even_chunks() {
        let splitter = OrderSplitter::new(config(SplitStrategy::FixedSize, 100));
        let mut gen_ = id_gen(100);
        let children = splitter.split(&make_parent(300), &mut gen_).unwrap();
        assert_eq!(children.len(), 3);
        for child in &children {
            assert_eq!(child.volume_entrust, 100);
            assert_eq!(child.volume_remain, 100);
            assert_eq!(child.volume_traded, 0);
            assert_eq!(child.broker_order_id.as_u64(), 0);
            assert_eq!(child.security_id, "000001");
            assert_eq!(child.dprice_entrust, 1000);
        }
        let ids: Vec<_> = children.iter().map(|c| c.internal_order_id).collect();
        assert_eq!(ids, vec![100, 101, 102]);
    }

    #[test]
    fn fixed_size_merges_undersized_tail() {
        let mut cfg = config(SplitStrategy::FixedSize, 100);
        cfg.min_child_volume = 50;
        let splitter = OrderSplitter::new(cfg);
        let mut gen_ = id_gen(1);
        let children = splitter.split(&make_parent(210), &mut gen_).unwrap();
        let volumes: Vec<_> = children.iter().map(|c| c.volume_entrust).collect();
        assert_eq!(volumes, vec![100, 110]);
    }

    #[test]
    fn fixed_size_respects_max_child_count() {
        let mut cfg = config(SplitStrategy::FixedSize, 10);
        cfg.max_child_count = 4;
        let splitter = OrderSplitter::new(cfg);
        let mut gen_ = id_gen(1);
        assert_eq!(
            splitter.split(&make_parent(100), &mut gen_),
            Err(SplitError::TooManyChildren)
        );
    }

    #[test]
    fn twap_distributes_remainder_to_leading_children() {
        let splitter = OrderSplitter::new(config(SplitStrategy::Twap, 100));
        let mut gen_ = id_gen(1);
        let children = splitter.split(&make_parent(250), &mut gen_).unwrap();
        let volumes: Vec<_> = children.iter().map(|c| c.volume_entrust).collect();
        assert_eq!(volumes, vec![84, 83, 83]);
        assert_eq!(volumes.iter().sum::<u64>(), 250);
    }

    #[test]
    fn twap_caps_child_count() {
        let mut cfg = config(SplitStrategy::Twap, 1);
        cfg.max_child_count = 4;
        let splitter = OrderSplitter::new(cfg);
        let mut gen_ = id_gen(1);
        let children = splitter.split(&make_parent(100), &mut gen_).unwrap();
        assert_eq!(children.len(), 4);
        assert_eq!(
            children.iter().map(|c| c.volume_entrust).sum::<u64>(),
            100
        );
    }

    #[test]
    fn split_volumes_are_idempotent() {
        let splitter = OrderSplitter::new(config(SplitStrategy::FixedSize, 100));
        let parent = make_parent(777);
        let mut gen_a = id_gen(1);
        let mut gen_b = id_gen(5000);
        let first: Vec<_> = splitter
            .split(&parent, &mut gen_a)
            .unwrap()
            .iter()
            .map(|c| c.volume_entrust)
            .collect();
        let second: Vec<_> = splitter
            .split(&parent, &mut gen_b)
            .unwrap()
            .iter()
            .map(|c| c.volume_entrust)
            .collect();
        assert_eq!(first, second);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn fixed_size_conserves_volume(
                volume in 1u64..100_000,
                max_child in 1u64..5_000,
                min_child in 0u64..200,
            ) {
                let cfg = SplitConfig {
                    strategy: SplitStrategy::FixedSize,
                    max_child_volume: max_child,
                    min_child_volume: min_child,
                    max_child_count: u32::MAX,
                    ..SplitConfig::default()
                };
                let splitter = OrderSplitter::new(cfg);
                let parent = make_parent(volume);
                let mut gen_ = id_gen(1);
                if let Ok(children) = splitter.split(&parent, &mut gen_) {
                    if splitter.should_split(&parent) {
                        let total: u64 = children.iter().map(|c| c.volume_entrust).sum();
                        prop_assert_eq!(total, volume);
                        prop_assert!(children.iter().all(|c| c.volume_entrust > 0));
                    } else {
                        prop_assert!(children.is_empty());
                    }
                }
            }

            #[test]
            fn twap_conserves_volume(
                volume in 1u64..100_000,
                max_child in 1u64..5_000,
            ) {
                let cfg = SplitConfig {
                    strategy: SplitStrategy::Twap,
                    max_child_volume: max_child,
                    min_child_volume: 1,
                    max_child_count: 64,
                    ..SplitConfig::default()
                };
                let splitter = OrderSplitter::new(cfg);
                let parent = make_parent(volume);
                let mut gen_ = id_gen(1);
                if splitter.should_split(&parent) {
                    let children = splitter.split(&parent, &mut gen_).unwrap();
                    let total: u64 = children.iter().map(|c| c.volume_entrust).sum();
                    prop_assert_eq!(total, volume);
                }
            }
        }
    }
}
