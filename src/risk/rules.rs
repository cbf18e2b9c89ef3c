//! Pre-trade risk rules.
//!
//! Each rule is a pure check `(order, positions) → pass | reject`. Rules
//! are a closed sum type dispatched through [`RiskRule::check`]; the
//! pipeline in [`crate::risk::RiskManager`] composes them in insertion
//! order with fail-fast semantics.

use crate::common::now_ns;
use crate::order::{DPrice, DValue, InternalSecurityId, OrderRequest, OrderType, TradeSide, Volume};
use crate::portfolio::PositionManager;
use std::collections::HashMap;

/// Outcome code of a risk check. Byte values are stable.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskResult {
    /// Order may proceed.
    Pass = 0,
    /// Buy value exceeds available fund.
    RejectInsufficientFund = 1,
    /// Sell volume exceeds sellable position.
    RejectInsufficientPosition = 2,
    /// Price outside the security's limit band.
    RejectPriceOutOfRange = 3,
    /// Order value above the configured cap.
    RejectExceedMaxOrderValue = 4,
    /// Order volume above the configured cap.
    RejectExceedMaxOrderVolume = 5,
    /// Same order fingerprint seen within the duplicate window.
    RejectDuplicateOrder = 6,
    /// Any other rejection (rate limiting included).
    RejectUnknown = 0xFF,
}

/// Result of running an order through a rule or the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskCheckResult {
    /// Outcome code.
    pub code: RiskResult,
    /// Human-readable reason.
    pub message: String,
}

impl RiskCheckResult {
    /// A passing result.
    pub fn pass() -> Self {
        RiskCheckResult {
            code: RiskResult::Pass,
            message: "pass".to_string(),
        }
    }

    /// A rejection with the given code and reason.
    pub fn reject(code: RiskResult, message: impl Into<String>) -> Self {
        RiskCheckResult {
            code,
            message: message.into(),
        }
    }

    /// Whether the order may proceed.
    pub fn passed(&self) -> bool {
        self.code == RiskResult::Pass
    }
}

fn is_new_order(order: &OrderRequest) -> bool {
    order.order_type == OrderType::New
}

fn order_fingerprint(order: &OrderRequest) -> u64 {
    u64::from(order.internal_order_id)
}

const SECOND_NS: u64 = 1_000_000_000;

/// One risk rule with its state. Variants are fixed; dispatch is a match,
/// not a vtable.
#[derive(Debug, Clone)]
pub enum RiskRule {
    /// Buy orders must fit in available fund.
    FundCheck {
        /// Whether the rule runs.
        enabled: bool,
    },
    /// Sell orders must fit in sellable position (`t0 + t1`).
    PositionCheck {
        /// Whether the rule runs.
        enabled: bool,
    },
    /// Per-order value cap; zero disables.
    MaxOrderValue {
        /// Whether the rule runs.
        enabled: bool,
        /// The cap in cents.
        max_value: DValue,
    },
    /// Per-order volume cap; zero disables.
    MaxOrderVolume {
        /// Whether the rule runs.
        enabled: bool,
        /// The cap in shares.
        max_volume: Volume,
    },
    /// Price must sit inside `[limit_down, limit_up]` per security.
    PriceLimit {
        /// Whether the rule runs.
        enabled: bool,
        /// `security → (limit_up, limit_down)`; zero bounds are open.
        limits: HashMap<InternalSecurityId, (DPrice, DPrice)>,
    },
    /// Same fingerprint within the window rejects.
    DuplicateOrder {
        /// Whether the rule runs.
        enabled: bool,
        /// Window in nanoseconds.
        window_ns: u64,
        /// `fingerprint → last seen` history.
        recent: HashMap<u64, u64>,
    },
    /// Orders per one-second window are capped.
    RateLimit {
        /// Whether the rule runs.
        enabled: bool,
        /// The cap; zero disables.
        max_per_second: u32,
        /// Start of the current window.
        window_start_ns: u64,
        /// Orders seen in the current window.
        count: u32,
    },
}

impl RiskRule {
    /// Default duplicate window: 100 ms.
    pub const DEFAULT_DUPLICATE_WINDOW_NS: u64 = 100_000_000;

    /// A fund-check rule.
    pub fn fund_check() -> Self {
        RiskRule::FundCheck { enabled: true }
    }

    /// A position-check rule.
    pub fn position_check() -> Self {
        RiskRule::PositionCheck { enabled: true }
    }

    /// A value-cap rule.
    pub fn max_order_value(max_value: DValue) -> Self {
        RiskRule::MaxOrderValue {
            enabled: true,
            max_value,
        }
    }

    /// A volume-cap rule.
    pub fn max_order_volume(max_volume: Volume) -> Self {
        RiskRule::MaxOrderVolume {
            enabled: true,
            max_volume,
        }
    }

    /// A price-limit rule with no bands loaded.
    pub fn price_limit() -> Self {
        RiskRule::PriceLimit {
            enabled: true,
            limits: HashMap::new(),
        }
    }

    /// A duplicate-order rule with the given window.
    pub fn duplicate_order(window_ns: u64) -> Self {
        RiskRule::DuplicateOrder {
            enabled: true,
            window_ns,
            recent: HashMap::new(),
        }
    }

    /// A rate-limit rule.
    pub fn rate_limit(max_per_second: u32) -> Self {
        RiskRule::RateLimit {
            enabled: true,
            max_per_second,
            window_start_ns: 0,
            count: 0,
        }
    }

    /// Stable rule name, used for lifecycle operations.
    pub fn name(&self) -> &'static str {
        match self {
            RiskRule::FundCheck { .. } => "fund_check",
            RiskRule::PositionCheck { .. } => "position_check",
            RiskRule::MaxOrderValue { .. } => "max_order_value",
            RiskRule::MaxOrderVolume { .. } => "max_order_volume",
            RiskRule::PriceLimit { .. } => "price_limit",
            RiskRule::DuplicateOrder { .. } => "duplicate_order",
            RiskRule::RateLimit { .. } => "rate_limit",
        }
    }

    /// Whether the rule participates in the pipeline.
    pub fn enabled(&self) -> bool {
        match self {
            RiskRule::FundCheck { enabled }
            | RiskRule::PositionCheck { enabled }
            | RiskRule::MaxOrderValue { enabled, .. }
            | RiskRule::MaxOrderVolume { enabled, .. }
            | RiskRule::PriceLimit { enabled, .. }
            | RiskRule::DuplicateOrder { enabled, .. }
            | RiskRule::RateLimit { enabled, .. } => *enabled,
        }
    }

    /// Enable or disable the rule in place.
    pub fn set_enabled(&mut self, value: bool) {
        match self {
            RiskRule::FundCheck { enabled }
            | RiskRule::PositionCheck { enabled }
            | RiskRule::MaxOrderValue { enabled, .. }
            | RiskRule::MaxOrderVolume { enabled, .. }
            | RiskRule::PriceLimit { enabled, .. }
            | RiskRule::DuplicateOrder { enabled, .. }
            | RiskRule::RateLimit { enabled, .. } => *enabled = value,
        }
    }

    /// Run the rule against one order.
    pub fn check(&mut self, order: &OrderRequest, positions: &PositionManager) -> RiskCheckResult {
        if !self.enabled() {
            return RiskCheckResult::pass();
        }

        match self {
            RiskRule::FundCheck { .. } => {
                if !is_new_order(order) || order.trade_side != TradeSide::Buy {
                    return RiskCheckResult::pass();
                }
                let available = positions.available_fund();
                // 128-bit product: volume * price cannot overflow u64 math.
                let required =
                    u128::from(order.volume_entrust) * u128::from(order.dprice_entrust);
                if required > u128::from(available) {
                    return RiskCheckResult::reject(
                        RiskResult::RejectInsufficientFund,
                        "insufficient available fund",
                    );
                }
                RiskCheckResult::pass()
            }

            RiskRule::PositionCheck { .. } => {
                if !is_new_order(order) || order.trade_side != TradeSide::Sell {
                    return RiskCheckResult::pass();
                }
                let sellable = positions.sellable_volume(&order.internal_security_id);
                if sellable < order.volume_entrust {
                    return RiskCheckResult::reject(
                        RiskResult::RejectInsufficientPosition,
                        "insufficient sellable position",
                    );
                }
                RiskCheckResult::pass()
            }

            RiskRule::MaxOrderValue { max_value, .. } => {
                if !is_new_order(order) || *max_value == 0 {
                    return RiskCheckResult::pass();
                }
                let value = u128::from(order.volume_entrust) * u128::from(order.dprice_entrust);
                if value > u128::from(*max_value) {
                    return RiskCheckResult::reject(
                        RiskResult::RejectExceedMaxOrderValue,
                        "order value exceeds limit",
                    );
                }
                RiskCheckResult::pass()
            }

            RiskRule::MaxOrderVolume { max_volume, .. } => {
                if !is_new_order(order) || *max_volume == 0 {
                    return RiskCheckResult::pass();
                }
                if order.volume_entrust > *max_volume {
                    return RiskCheckResult::reject(
                        RiskResult::RejectExceedMaxOrderVolume,
                        "order volume exceeds limit",
                    );
                }
                RiskCheckResult::pass()
            }

            RiskRule::PriceLimit { limits, .. } => {
                if !is_new_order(order) {
                    return RiskCheckResult::pass();
                }
                let Some(&(limit_up, limit_down)) = limits.get(&order.internal_security_id)
                else {
                    return RiskCheckResult::pass();
                };
                if (limit_up != 0 && order.dprice_entrust > limit_up)
                    || (limit_down != 0 && order.dprice_entrust < limit_down)
                {
                    return RiskCheckResult::reject(
                        RiskResult::RejectPriceOutOfRange,
                        "price is out of limit range",
                    );
                }
                RiskCheckResult::pass()
            }

            RiskRule::DuplicateOrder {
                window_ns, recent, ..
            } => {
                if !is_new_order(order) {
                    return RiskCheckResult::pass();
                }
                let now = now_ns();
                let key = order_fingerprint(order);
                if let Some(&seen) = recent.get(&key) {
                    if now >= seen && now - seen <= *window_ns {
                        return RiskCheckResult::reject(
                            RiskResult::RejectDuplicateOrder,
                            "duplicate order within time window",
                        );
                    }
                }
                recent.insert(key, now);
                RiskCheckResult::pass()
            }

            RiskRule::RateLimit {
                max_per_second,
                window_start_ns,
                count,
                ..
            } => {
                if !is_new_order(order) || *max_per_second == 0 {
                    return RiskCheckResult::pass();
                }
                let now = now_ns();
                if *window_start_ns == 0
                    || now < *window_start_ns
                    || now - *window_start_ns >= SECOND_NS
                {
                    *window_start_ns = now;
                    *count = 0;
                }
                *count += 1;
                if *count > *max_per_second {
                    return RiskCheckResult::reject(
                        RiskResult::RejectUnknown,
                        "order rate exceeds limit",
                    );
                }
                RiskCheckResult::pass()
            }
        }
    }

    /// Load a price band for a security. No-op on other rule kinds.
    pub fn set_price_limits(
        &mut self,
        security_id: InternalSecurityId,
        limit_up: DPrice,
        limit_down: DPrice,
    ) {
        if let RiskRule::PriceLimit { limits, .. } = self {
            limits.insert(security_id, (limit_up, limit_down));
        }
    }

    /// Drop all price bands. No-op on other rule kinds.
    pub fn clear_price_limits(&mut self) {
        if let RiskRule::PriceLimit { limits, .. } = self {
            limits.clear();
        }
    }

    /// Remember an order in the duplicate history without checking it.
    /// No-op on other rule kinds.
    pub fn record_order(&mut self, order: &OrderRequest) {
        if let RiskRule::DuplicateOrder { recent, .. } = self {
            recent.insert(order_fingerprint(order), now_ns());
        }
    }

    /// Forget duplicate-order history. No-op on other rule kinds.
    pub fn clear_history(&mut self) {
        if let RiskRule::DuplicateOrder { recent, .. } = self {
            recent.clear();
        }
    }

    /// Reset the rate-limit window. No-op on other rule kinds.
    pub fn reset_counter(&mut self) {
        if let RiskRule::RateLimit {
            window_start_ns,
            count,
            ..
        } = self
        {
            *window_start_ns = 0;
            *count = 0;
        }
    }
}
