// 8.0: core ledger engine. coordinates position operations, the stability pool,
// liquidations, redemptions and the fee state against one oracle price per call.
// deterministic and event-driven with no external I/O.

mod borrowing;
mod config;
mod core;
mod liquidations;
mod queries;
mod redemptions;
mod results;
mod stability;

pub use borrowing::{Hints, PositionAdjustment};
pub use config::EngineConfig;
pub use core::Engine;
pub use queries::SystemSummary;
pub use redemptions::RedemptionRequest;
pub use results::{
    AdjustResult, CloseResult, DepositResult, EngineError, LiquidationResult, LiquidationTotals, OpenResult,
    RedemptionResult, WithdrawResult,
};
