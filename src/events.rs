// 11.0: every state change produces an event. used for audit trails and replaying what
// happened to a position. amounts are 1e18 fixed point, same as the ledger.

use serde::{Deserialize, Serialize};

use crate::position::PositionStatus;
use crate::types::{Amount, Holder, OwnerId, Price, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Position events
    PositionOpened(PositionOpenedEvent),
    PositionAdjusted(PositionAdjustedEvent),
    PositionClosed(PositionClosedEvent),

    // Liquidation events
    Liquidation(LiquidationEvent),
    Redistribution(RedistributionEvent),
    StabilityOffset(StabilityOffsetEvent),

    // Redemption events
    Redemption(RedemptionEvent),
    PartialRedemptionCancelled(PartialRedemptionCancelledEvent),
    BaseRateUpdated(BaseRateUpdatedEvent),

    // Stability pool events
    DepositChanged(DepositChangedEvent),
    CollateralGainPaid(CollateralGainPaidEvent),

    // Custody events
    SurplusClaimed(SurplusClaimedEvent),

    // Price events
    PriceUpdated(PriceUpdatedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    pub owner: OwnerId,
    pub coll: Amount,
    pub debt: Amount,
    pub stake: Amount,
    pub borrowing_fee: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionAdjustedEvent {
    pub owner: OwnerId,
    pub coll: Amount,
    pub debt: Amount,
    pub stake: Amount,
    pub borrowing_fee: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub owner: OwnerId,
    pub status: PositionStatus,
    pub coll_returned: Amount,
    pub debt_repaid: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub owner: OwnerId,
    pub liquidator: Holder,
    pub coll: Amount,
    pub debt: Amount,
    pub coll_gas_compensation: Amount,
    pub debt_gas_compensation: Amount,
    pub coll_surplus: Amount,
    pub recovery_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedistributionEvent {
    pub coll: Amount,
    pub debt: Amount,
    pub l_coll: Amount,
    pub l_debt: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityOffsetEvent {
    pub debt: Amount,
    pub coll: Amount,
    pub p: Amount,
    pub scale: u64,
    pub epoch: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionEvent {
    pub redeemer: OwnerId,
    pub attempted: Amount,
    pub redeemed: Amount,
    pub coll_sent: Amount,
    pub fee: Amount,
    pub price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialRedemptionCancelledEvent {
    pub owner: OwnerId,
    pub hint_nicr: Amount,
    pub fresh_nicr: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseRateUpdatedEvent {
    pub base_rate: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositChangedEvent {
    pub depositor: OwnerId,
    pub new_deposit: Amount,
    pub debt_loss: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralGainPaidEvent {
    pub depositor: OwnerId,
    pub coll: Amount,
    pub to_position: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurplusClaimedEvent {
    pub owner: OwnerId,
    pub coll: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdatedEvent {
    pub price: Price,
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::PositionOpened(_) => "position_opened",
            EventPayload::PositionAdjusted(_) => "position_adjusted",
            EventPayload::PositionClosed(_) => "position_closed",
            EventPayload::Liquidation(_) => "liquidation",
            EventPayload::Redistribution(_) => "redistribution",
            EventPayload::StabilityOffset(_) => "stability_offset",
            EventPayload::Redemption(_) => "redemption",
            EventPayload::PartialRedemptionCancelled(_) => "partial_redemption_cancelled",
            EventPayload::BaseRateUpdated(_) => "base_rate_updated",
            EventPayload::DepositChanged(_) => "deposit_changed",
            EventPayload::CollateralGainPaid(_) => "collateral_gain_paid",
            EventPayload::SurplusClaimed(_) => "surplus_claimed",
            EventPayload::PriceUpdated(_) => "price_updated",
        }
    }
}
