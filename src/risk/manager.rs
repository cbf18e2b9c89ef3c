//! The risk pipeline: ordered rules with fail-fast composition.

use crate::common::now_ns;
use crate::order::{DPrice, DValue, InternalSecurityId, OrderRequest, Volume};
use crate::portfolio::PositionManager;
use crate::risk::rules::{RiskCheckResult, RiskResult, RiskRule};
use serde::{Deserialize, Serialize};

/// Risk configuration. Defaults mirror a conservative live setup: fund,
/// position, price-limit, and duplicate checks on; caps disabled at zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Per-order value cap in cents; zero disables.
    pub max_order_value: DValue,
    /// Per-order volume cap; zero disables.
    pub max_order_volume: Volume,
    /// Reserved: daily turnover cap.
    pub max_daily_turnover: DValue,
    /// Orders-per-second cap; zero disables.
    pub max_orders_per_second: u32,
    /// Whether the price-limit rule is installed.
    pub enable_price_limit_check: bool,
    /// Whether the duplicate-order rule is installed.
    pub enable_duplicate_check: bool,
    /// Whether the fund-check rule is installed.
    pub enable_fund_check: bool,
    /// Whether the position-check rule is installed.
    pub enable_position_check: bool,
    /// Duplicate-order window in nanoseconds.
    pub duplicate_window_ns: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            max_order_value: 0,
            max_order_volume: 0,
            max_daily_turnover: 0,
            max_orders_per_second: 0,
            enable_price_limit_check: true,
            enable_duplicate_check: true,
            enable_fund_check: true,
            enable_position_check: true,
            duplicate_window_ns: RiskRule::DEFAULT_DUPLICATE_WINDOW_NS,
        }
    }
}

/// Pipeline counters, bucketed by rejection reason.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskStats {
    /// Orders checked.
    pub total_checks: u64,
    /// Orders passed.
    pub passed: u64,
    /// Orders rejected (any reason).
    pub rejected: u64,
    /// Rejections by insufficient fund.
    pub rejected_fund: u64,
    /// Rejections by insufficient position.
    pub rejected_position: u64,
    /// Rejections by price limits.
    pub rejected_price: u64,
    /// Rejections by the value cap.
    pub rejected_value: u64,
    /// Rejections by the volume cap.
    pub rejected_volume: u64,
    /// Rejections by the duplicate rule.
    pub rejected_duplicate: u64,
    /// Rejections by rate limiting (and anything unclassified).
    pub rejected_rate_limit: u64,
    /// Last check time, wall-clock nanoseconds.
    pub last_check_time_ns: u64,
}

/// Callback invoked after every check with the order and its decision.
pub type PostCheckCallback = Box<dyn Fn(&OrderRequest, &RiskCheckResult) + Send>;

/// Ordered rule pipeline with short-circuit evaluation: rules run in
/// insertion order and the first rejection decides the outcome.
pub struct RiskManager {
    config: RiskConfig,
    rules: Vec<RiskRule>,
    stats: RiskStats,
    post_check: Option<PostCheckCallback>,
}

impl RiskManager {
    /// Manager with the default rule set derived from `config`.
    pub fn new(config: RiskConfig) -> Self {
        let mut manager = RiskManager {
            config,
            rules: Vec::new(),
            stats: RiskStats::default(),
            post_check: None,
        };
        manager.initialize_default_rules();
        manager
    }

    fn initialize_default_rules(&mut self) {
        self.rules.clear();

        if self.config.enable_fund_check {
            self.add_rule(RiskRule::fund_check());
        }
        if self.config.enable_position_check {
            self.add_rule(RiskRule::position_check());
        }
        if self.config.max_order_value > 0 {
            self.add_rule(RiskRule::max_order_value(self.config.max_order_value));
        }
        if self.config.max_order_volume > 0 {
            self.add_rule(RiskRule::max_order_volume(self.config.max_order_volume));
        }
        if self.config.enable_price_limit_check {
            self.add_rule(RiskRule::price_limit());
        }
        if self.config.enable_duplicate_check {
            self.add_rule(RiskRule::duplicate_order(self.config.duplicate_window_ns));
        }
        if self.config.max_orders_per_second > 0 {
            self.add_rule(RiskRule::rate_limit(self.config.max_orders_per_second));
        }
    }

    /// Run `order` through the pipeline. Evaluation order is insertion
    /// order; the first rejection short-circuits.
    pub fn check_order(
        &mut self,
        order: &OrderRequest,
        positions: &PositionManager,
    ) -> RiskCheckResult {
        let mut result = RiskCheckResult::pass();

        for rule in &mut self.rules {
            if !rule.enabled() {
                continue;
            }
            result = rule.check(order, positions);
            if !result.passed() {
                break;
            }
        }

        self.update_stats(&result);
        if let Some(callback) = &self.post_check {
            callback(order, &result);
        }
        result
    }

    /// Check a batch, one result per order.
    pub fn check_orders(
        &mut self,
        orders: &[OrderRequest],
        positions: &PositionManager,
    ) -> Vec<RiskCheckResult> {
        orders
            .iter()
            .map(|order| self.check_order(order, positions))
            .collect()
    }

    /// Install a post-check callback.
    pub fn set_post_check_callback(&mut self, callback: PostCheckCallback) {
        self.post_check = Some(callback);
    }

    /// Append a rule to the pipeline.
    pub fn add_rule(&mut self, rule: RiskRule) {
        self.rules.push(rule);
    }

    /// Remove the first rule with the given name.
    pub fn remove_rule(&mut self, name: &str) -> bool {
        let Some(index) = self.rules.iter().position(|rule| rule.name() == name) else {
            return false;
        };
        self.rules.remove(index);
        true
    }

    /// Enable or disable a rule by name.
    pub fn enable_rule(&mut self, name: &str, enabled: bool) -> bool {
        let Some(rule) = self.get_rule_mut(name) else {
            return false;
        };
        rule.set_enabled(enabled);
        true
    }

    /// Look up a rule by name.
    pub fn get_rule(&self, name: &str) -> Option<&RiskRule> {
        self.rules.iter().find(|rule| rule.name() == name)
    }

    /// Mutable lookup by name.
    pub fn get_rule_mut(&mut self, name: &str) -> Option<&mut RiskRule> {
        self.rules.iter_mut().find(|rule| rule.name() == name)
    }

    /// Load a price band for a security into the price-limit rule.
    pub fn update_price_limits(
        &mut self,
        security_id: InternalSecurityId,
        limit_up: DPrice,
        limit_down: DPrice,
    ) {
        if let Some(rule) = self.get_rule_mut("price_limit") {
            rule.set_price_limits(security_id, limit_up, limit_down);
        }
    }

    /// Drop all price bands.
    pub fn clear_price_limits(&mut self) {
        if let Some(rule) = self.get_rule_mut("price_limit") {
            rule.clear_price_limits();
        }
    }

    /// Replace the configuration and rebuild the default rule set.
    pub fn update_config(&mut self, config: RiskConfig) {
        self.config = config;
        self.initialize_default_rules();
    }

    /// Configuration in effect.
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Pipeline counters.
    pub fn stats(&self) -> &RiskStats {
        &self.stats
    }

    /// Reset the counters.
    pub fn reset_stats(&mut self) {
        self.stats = RiskStats::default();
    }

    /// Names of installed rules, in evaluation order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    fn update_stats(&mut self, result: &RiskCheckResult) {
        self.stats.total_checks += 1;
        self.stats.last_check_time_ns = now_ns();

        if result.passed() {
            self.stats.passed += 1;
            return;
        }

        self.stats.rejected += 1;
        match result.code {
            RiskResult::RejectInsufficientFund => self.stats.rejected_fund += 1,
            RiskResult::RejectInsufficientPosition => self.stats.rejected_position += 1,
            RiskResult::RejectPriceOutOfRange => self.stats.rejected_price += 1,
            RiskResult::RejectExceedMaxOrderValue => self.stats.rejected_value += 1,
            RiskResult::RejectExceedMaxOrderVolume => self.stats.rejected_volume += 1,
            RiskResult::RejectDuplicateOrder => self.stats.rejected_duplicate += 1,
            _ => self.stats.rejected_rate_limit += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Market, TradeSide};
    use crate::shm::{PositionsHeader, PositionsShmLayout};

    fn boxed_layout() -> Box<PositionsShmLayout> {
        // SAFETY: all-zero bytes are a valid (uninitialized) table.
        let mut layout: Box<PositionsShmLayout> = unsafe { Box::new_zeroed().assume_init() };
        layout.header.magic = PositionsHeader::MAGIC;
        layout.header.version = PositionsHeader::VERSION;
        layout.header.header_size = std::mem::size_of::<PositionsHeader>() as u32;
        layout.header.total_size = std::mem::size_of::<PositionsShmLayout>() as u32;
        layout.header.capacity = crate::shm::MAX_POSITIONS as u32;
        layout
    }

    fn make_buy(id: u32, volume: u64, price: u64) -> OrderRequest {
        let mut order = OrderRequest::new();
        order.init_new(
            "000001",
            "SZ.000001".into(),
            id,
            TradeSide::Buy,
            Market::Sz,
            volume,
            price,
            93_000_000,
        );
        order
    }

    fn make_sell(id: u32, volume: u64, price: u64) -> OrderRequest {
        let mut order = OrderRequest::new();
        order.init_new(
            "000001",
            "SZ.000001".into(),
            id,
            TradeSide::Sell,
            Market::Sz,
            volume,
            price,
            93_000_000,
        );
        order
    }

    #[test]
    fn default_pipeline_order_matches_config() {
        let manager = RiskManager::new(RiskConfig {
            max_order_value: 1,
            max_order_volume: 1,
            max_orders_per_second: 1,
            ..RiskConfig::default()
        });
        assert_eq!(
            manager.rule_names(),
            vec![
                "fund_check",
                "position_check",
                "max_order_value",
                "max_order_volume",
                "price_limit",
                "duplicate_order",
                "rate_limit",
            ]
        );
    }

    #[test]
    fn fund_check_uses_wide_multiplication() {
        let layout = boxed_layout();
        let mut positions = PositionManager::new(&layout);
        assert!(positions.initialize());
        let mut manager = RiskManager::new(RiskConfig::default());

        // 200_000 * 1000 = 2e11 > 1e8: must reject, and must not wrap.
        let order = make_buy(1, 200_000, 1000);
        let result = manager.check_order(&order, &positions);
        assert_eq!(result.code, RiskResult::RejectInsufficientFund);

        // A near-overflow product still evaluates correctly in 128 bits.
        let order = make_buy(2, u64::MAX, u64::MAX);
        let result = manager.check_order(&order, &positions);
        assert_eq!(result.code, RiskResult::RejectInsufficientFund);

        let order = make_buy(3, 100, 1000);
        assert!(manager.check_order(&order, &positions).passed());
    }

    #[test]
    fn position_check_rejects_oversells() {
        let layout = boxed_layout();
        let mut positions = PositionManager::new(&layout);
        assert!(positions.initialize());
        let key = positions.add_security("000001", "PAB", Market::Sz).unwrap();
        {
            let row = &layout.positions[crate::portfolio::FIRST_SECURITY_POSITION_INDEX];
            row.lock().volume_available_t0 = 100;
        }
        let _ = key;

        let mut manager = RiskManager::new(RiskConfig::default());
        let result = manager.check_order(&make_sell(1, 150, 1000), &positions);
        assert_eq!(result.code, RiskResult::RejectInsufficientPosition);
        assert!(manager.check_order(&make_sell(2, 100, 1000), &positions).passed());
    }

    #[test]
    fn value_and_volume_caps() {
        let layout = boxed_layout();
        let mut positions = PositionManager::new(&layout);
        assert!(positions.initialize());

        let mut manager = RiskManager::new(RiskConfig {
            max_order_value: 50_000,
            max_order_volume: 1_000,
            ..RiskConfig::default()
        });

        let result = manager.check_order(&make_buy(1, 100, 1000), &positions);
        assert_eq!(result.code, RiskResult::RejectExceedMaxOrderValue);

        let result = manager.check_order(&make_buy(2, 2_000, 1), &positions);
        assert_eq!(result.code, RiskResult::RejectExceedMaxOrderVolume);

        assert!(manager.check_order(&make_buy(3, 10, 100), &positions).passed());
    }

    #[test]
    fn price_limits_band_orders() {
        let layout = boxed_layout();
        let mut positions = PositionManager::new(&layout);
        assert!(positions.initialize());

        let mut manager = RiskManager::new(RiskConfig::default());
        manager.update_price_limits("SZ.000001".into(), 1_100, 900);

        let result = manager.check_order(&make_buy(1, 10, 1_200), &positions);
        assert_eq!(result.code, RiskResult::RejectPriceOutOfRange);
        let result = manager.check_order(&make_buy(2, 10, 800), &positions);
        assert_eq!(result.code, RiskResult::RejectPriceOutOfRange);
        assert!(manager.check_order(&make_buy(3, 10, 1_000), &positions).passed());

        manager.clear_price_limits();
        assert!(manager.check_order(&make_buy(4, 10, 1_200), &positions).passed());
    }

    #[test]
    fn duplicate_ids_reject_within_window() {
        let layout = boxed_layout();
        let mut positions = PositionManager::new(&layout);
        assert!(positions.initialize());

        let mut manager = RiskManager::new(RiskConfig::default());
        assert!(manager.check_order(&make_buy(42, 10, 100), &positions).passed());

        let result = manager.check_order(&make_buy(42, 10, 100), &positions);
        assert_eq!(result.code, RiskResult::RejectDuplicateOrder);

        // A fresh id with identical terms passes.
        assert!(manager.check_order(&make_buy(43, 10, 100), &positions).passed());
    }

    #[test]
    fn rate_limit_caps_orders_per_second() {
        let layout = boxed_layout();
        let mut positions = PositionManager::new(&layout);
        assert!(positions.initialize());

        let mut manager = RiskManager::new(RiskConfig {
            max_orders_per_second: 3,
            enable_duplicate_check: false,
            ..RiskConfig::default()
        });

        for id in 1..=3 {
            assert!(manager.check_order(&make_buy(id, 1, 1), &positions).passed());
        }
        let result = manager.check_order(&make_buy(4, 1, 1), &positions);
        assert_eq!(result.code, RiskResult::RejectUnknown);
    }

    #[test]
    fn first_rejection_short_circuits() {
        let layout = boxed_layout();
        let mut positions = PositionManager::new(&layout);
        assert!(positions.initialize());

        // Both fund and volume caps would reject; fund_check runs first.
        let mut manager = RiskManager::new(RiskConfig {
            max_order_volume: 1,
            ..RiskConfig::default()
        });
        let order = make_buy(1, 200_000, 100_000);
        let result = manager.check_order(&order, &positions);
        assert_eq!(result.code, RiskResult::RejectInsufficientFund);
        assert_eq!(manager.stats().rejected_fund, 1);
        assert_eq!(manager.stats().rejected_volume, 0);
    }

    #[test]
    fn cancels_skip_every_rule() {
        let layout = boxed_layout();
        let mut positions = PositionManager::new(&layout);
        assert!(positions.initialize());

        let mut manager = RiskManager::new(RiskConfig {
            max_order_value: 1,
            max_order_volume: 1,
            max_orders_per_second: 1,
            ..RiskConfig::default()
        });
        let mut cancel = OrderRequest::new();
        cancel.init_cancel(77, 93_000_000, 42);
        assert!(manager.check_order(&cancel, &positions).passed());
        assert!(manager.check_order(&cancel, &positions).passed());
    }

    #[test]
    fn stats_track_outcomes() {
        let layout = boxed_layout();
        let mut positions = PositionManager::new(&layout);
        assert!(positions.initialize());

        let mut manager = RiskManager::new(RiskConfig::default());
        assert!(manager.check_order(&make_buy(1, 10, 100), &positions).passed());
        let _ = manager.check_order(&make_buy(1, 10, 100), &positions);

        let stats = manager.stats();
        assert_eq!(stats.total_checks, 2);
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.rejected_duplicate, 1);

        manager.reset_stats();
        assert_eq!(manager.stats().total_checks, 0);
    }

    #[test]
    fn rule_lifecycle_operations() {
        let mut manager = RiskManager::new(RiskConfig::default());
        assert!(manager.get_rule("fund_check").is_some());
        assert!(manager.enable_rule("fund_check", false));
        assert!(!manager.get_rule("fund_check").unwrap().enabled());
        assert!(manager.remove_rule("fund_check"));
        assert!(manager.get_rule("fund_check").is_none());
        assert!(!manager.remove_rule("fund_check"));
        assert!(!manager.enable_rule("no_such_rule", true));
    }

    #[test]
    fn disabled_fund_check_passes_oversized_buys() {
        let layout = boxed_layout();
        let mut positions = PositionManager::new(&layout);
        assert!(positions.initialize());

        let mut manager = RiskManager::new(RiskConfig::default());
        assert!(manager.enable_rule("fund_check", false));
        assert!(
            manager
                .check_order(&make_buy(1, u64::MAX, 1000), &positions)
                .passed()
        );
    }

    #[test]
    fn post_check_callback_sees_every_decision() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU64, Ordering};

        let layout = boxed_layout();
        let mut positions = PositionManager::new(&layout);
        assert!(positions.initialize());

        let seen = Arc::new(AtomicU64::new(0));
        let seen_cb = Arc::clone(&seen);
        let mut manager = RiskManager::new(RiskConfig::default());
        manager.set_post_check_callback(Box::new(move |_, _| {
            seen_cb.fetch_add(1, Ordering::Relaxed);
        }));

        let _ = manager.check_order(&make_buy(1, 10, 100), &positions);
        let _ = manager.check_order(&make_buy(1, 10, 100), &positions);
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }
}
