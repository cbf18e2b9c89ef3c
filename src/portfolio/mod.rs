//! Fund and position state: shared rows plus the account-side manager.

mod manager;
mod position;

pub use manager::{DEFAULT_INITIAL_FUND, PositionManager, build_internal_security_id};
pub use position::{
    FIRST_SECURITY_POSITION_INDEX, FUND_POSITION_ID, FUND_POSITION_INDEX, FundInfo, Position,
    PositionData, PositionGuard, load_fund_info, store_fund_info,
};
