// 8.0.2: result types and errors for engine operations.

use crate::config::ConfigError;
use crate::custody::CustodyError;
use crate::math::MathError;
use crate::position::LedgerError;
use crate::price_feed::PriceFeedError;
use crate::sorted::SortedListError;
use crate::stability_pool::StabilityPoolError;
use crate::token::TokenError;
use crate::types::{Amount, OwnerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenResult {
    pub owner: OwnerId,
    pub coll: Amount,
    /// Composite debt: requested amount + borrowing fee + gas reserve.
    pub debt: Amount,
    pub borrowing_fee: Amount,
    pub stake: Amount,
    pub icr: Amount,
    pub nicr: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustResult {
    pub owner: OwnerId,
    pub coll: Amount,
    pub debt: Amount,
    pub stake: Amount,
    pub borrowing_fee: Amount,
    pub icr: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseResult {
    pub owner: OwnerId,
    pub coll_returned: Amount,
    pub debt_repaid: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationResult {
    pub owner: OwnerId,
    pub coll: Amount,
    pub debt: Amount,
    pub coll_gas_compensation: Amount,
    pub debt_gas_compensation: Amount,
    pub debt_offset: Amount,
    pub coll_to_pool: Amount,
    pub debt_redistributed: Amount,
    pub coll_redistributed: Amount,
    pub coll_surplus: Amount,
    pub recovery_mode: bool,
}

/// Sums over every position liquidated in one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiquidationTotals {
    pub liquidated: Vec<LiquidationResult>,
    pub total_coll: Amount,
    pub total_debt: Amount,
    pub total_coll_gas_compensation: Amount,
    pub total_debt_gas_compensation: Amount,
    pub total_debt_offset: Amount,
    pub total_coll_to_pool: Amount,
    pub total_debt_redistributed: Amount,
    pub total_coll_redistributed: Amount,
    pub total_coll_surplus: Amount,
}

impl LiquidationTotals {
    pub(super) fn add(&mut self, single: LiquidationResult) {
        self.total_coll += single.coll;
        self.total_debt += single.debt;
        self.total_coll_gas_compensation += single.coll_gas_compensation;
        self.total_debt_gas_compensation += single.debt_gas_compensation;
        self.total_debt_offset += single.debt_offset;
        self.total_coll_to_pool += single.coll_to_pool;
        self.total_debt_redistributed += single.debt_redistributed;
        self.total_coll_redistributed += single.coll_redistributed;
        self.total_coll_surplus += single.coll_surplus;
        self.liquidated.push(single);
    }

    pub fn count(&self) -> usize {
        self.liquidated.len()
    }
}

/// Outcome of a redemption.
///
/// System debt falls by `redeemed` plus the gas reserve of every position in
/// `closed`: a position redeemed down to its reserve is closed and the reserve
/// held by the gas pool is burned along with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionResult {
    pub attempted: Amount,
    /// Debt tokens actually burned. may be less than attempted.
    pub redeemed: Amount,
    pub coll_drawn: Amount,
    pub fee: Amount,
    pub coll_sent: Amount,
    pub base_rate: Amount,
    /// Positions closed by the walk. each also burned its gas reserve.
    pub closed: Vec<OwnerId>,
    pub partially_redeemed: Option<OwnerId>,
    /// Set when the last position was left untouched because the hint no longer matched.
    pub cancelled_partial: Option<OwnerId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositResult {
    pub depositor: OwnerId,
    pub deposit: Amount,
    pub collateral_gain: Amount,
    pub debt_loss: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawResult {
    pub depositor: OwnerId,
    /// Clamped to the compounded deposit.
    pub withdrawn: Amount,
    pub remaining: Amount,
    pub collateral_gain: Amount,
    pub debt_loss: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid max fee percentage {max_fee}")]
    InvalidMaxFeePercentage { max_fee: Amount },

    #[error("Fee fraction {fee_fraction} exceeds max {max_fee}")]
    FeeExceedsMaximum { fee_fraction: Amount, max_fee: Amount },

    #[error("Fee would take all drawn collateral")]
    FeeEatsAllCollateral,

    #[error("Net debt {net_debt} below minimum {minimum}")]
    NetDebtBelowMinimum { net_debt: Amount, minimum: Amount },

    #[error("ICR {icr} below MCR {mcr}")]
    IcrBelowMcr { icr: Amount, mcr: Amount },

    #[error("ICR {icr} below CCR {ccr}")]
    IcrBelowCcr { icr: Amount, ccr: Amount },

    #[error("TCR {tcr} below CCR {ccr}")]
    TcrBelowCcr { tcr: Amount, ccr: Amount },

    #[error("TCR {tcr} below MCR {mcr}")]
    TcrBelowMcr { tcr: Amount, mcr: Amount },

    #[error("ICR would fall from {old} to {new} in recovery mode")]
    IcrDecreasedInRecoveryMode { old: Amount, new: Amount },

    #[error("TCR would fall from {old} to {new} in recovery mode")]
    TcrDecreasedInRecoveryMode { old: Amount, new: Amount },

    #[error("Collateral withdrawal not permitted in recovery mode")]
    CollWithdrawalInRecoveryMode,

    #[error("Operation not permitted in recovery mode")]
    NotPermittedInRecoveryMode,

    #[error("Cannot deposit and withdraw collateral at once")]
    BothCollDepositAndWithdrawal,

    #[error("Adjustment changes nothing")]
    ZeroAdjustment,

    #[error("Debt change must be nonzero")]
    ZeroDebtChange,

    #[error("Repayment {requested} exceeds repayable {repayable}")]
    RepaymentExceedsDebt { requested: Amount, repayable: Amount },

    #[error("Amount must be nonzero")]
    ZeroAmount,

    #[error("Nothing to liquidate")]
    NothingToLiquidate,

    #[error("Liquidation list is empty")]
    EmptyLiquidationList,

    #[error("Unable to redeem any amount")]
    UnableToRedeem,

    #[error("Withdrawal blocked while a position sits below MCR")]
    UndercollateralizedPositionExists,

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Sorted list error: {0}")]
    SortedList(#[from] SortedListError),

    #[error("Stability pool error: {0}")]
    StabilityPool(#[from] StabilityPoolError),

    #[error("Custody error: {0}")]
    Custody(#[from] CustodyError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Math error: {0}")]
    Math(#[from] MathError),

    #[error("Price feed error: {0}")]
    PriceFeed(#[from] PriceFeedError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}
