// 8.0 engine/core.rs: main engine. owns the ledger, the index, the pool, every vault and the token.
// components expose narrow pub(crate) writes; only the engine holds them mutably.

use super::config::EngineConfig;
use super::results::EngineError;
use crate::config::ProtocolParams;
use crate::custody::{CollateralVault, Custody};
use crate::events::{Event, EventId, EventPayload, PriceUpdatedEvent};
use crate::fees::FeeState;
use crate::math::{self, compute_cr, MathError};
use crate::position::PositionLedger;
use crate::price_feed::{ManualPriceFeed, PriceFeed};
use crate::sorted::SortedPositions;
use crate::stability_pool::StabilityPool;
use crate::token::DebtToken;
use crate::types::{Amount, OwnerId, Price, Timestamp};

/** 8.1: main engine struct. all state lives here */
#[derive(Debug)]
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) params: ProtocolParams,
    pub(super) ledger: PositionLedger,
    pub(super) sorted: SortedPositions,
    pub(super) pool: StabilityPool,
    pub(super) custody: Custody,
    pub(super) token: DebtToken,
    pub(super) fees: FeeState,
    pub(super) price_feed: Box<dyn PriceFeed>,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) current_time: Timestamp,
}

/// Signed change to a collateral or debt total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Change {
    Increase(Amount),
    Decrease(Amount),
}

impl Change {
    pub(super) fn apply(self, base: Amount, context: &'static str) -> Result<Amount, MathError> {
        match self {
            Change::Increase(amount) => math::checked_add(base, amount, context),
            Change::Decrease(amount) => math::checked_sub(base, amount, context),
        }
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_price_feed(config, Box::new(ManualPriceFeed::new()))
    }

    pub fn with_price_feed(config: EngineConfig, price_feed: Box<dyn PriceFeed>) -> Result<Self, EngineError> {
        let params = config.protocol.to_params()?;
        let current_time = Timestamp::from_millis(0);
        Ok(Self {
            config,
            params,
            ledger: PositionLedger::new(),
            sorted: SortedPositions::new(params.max_positions),
            pool: StabilityPool::new(),
            custody: Custody::new(),
            token: DebtToken::new(),
            fees: FeeState::new(current_time),
            price_feed,
            events: Vec::new(),
            next_event_id: 1,
            current_time,
        })
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = Timestamp::from_millis(self.current_time.as_millis() + millis);
    }

    pub fn set_price(&mut self, price: Price) -> Result<(), EngineError> {
        self.price_feed.push_price(price, self.current_time)?;
        self.emit_event(EventPayload::PriceUpdated(PriceUpdatedEvent { price }));
        Ok(())
    }

    // every price-dependent entrypoint reads the feed exactly once
    pub fn fetch_price(&mut self) -> Result<Price, EngineError> {
        Ok(self.price_feed.fetch_price()?)
    }

    // plain wallet-to-wallet debt token transfer
    pub fn transfer_debt(&mut self, from: OwnerId, to: OwnerId, amount: Amount) -> Result<(), EngineError> {
        Ok(self.token.send(from, to, amount)?)
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    // 8.2: system totals. active + default, pending rewards included.
    pub fn entire_system_coll(&self) -> Amount {
        self.custody.active().collateral() + self.custody.default_pool().collateral()
    }

    pub fn entire_system_debt(&self) -> Amount {
        self.custody.active().debt() + self.custody.default_pool().debt()
    }

    pub fn tcr(&self, price: Price) -> Result<Amount, EngineError> {
        Ok(compute_cr(self.entire_system_coll(), self.entire_system_debt(), price)?)
    }

    pub fn check_recovery_mode(&self, price: Price) -> Result<bool, EngineError> {
        Ok(self.tcr(price)? < self.params.ccr)
    }

    // TCR as it would be after a position changes by the given amounts
    pub(super) fn new_tcr(&self, coll: Change, debt: Change, price: Price) -> Result<Amount, EngineError> {
        let total_coll = coll.apply(self.entire_system_coll(), "new tcr coll")?;
        let total_debt = debt.apply(self.entire_system_debt(), "new tcr debt")?;
        Ok(compute_cr(total_coll, total_debt, price)?)
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;

        if self.config.verbose {
            tracing::info!(id = event.id.0, kind = event.payload.name(), payload = ?event.payload, "event");
        } else {
            tracing::debug!(id = event.id.0, kind = event.payload.name(), "event");
        }

        self.events.push(event);

        if self.events.len() > self.config.max_events {
            let drain_count = self.events.len() - self.config.max_events;
            self.events.drain(0..drain_count);
        }
    }
}
