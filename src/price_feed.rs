// Price Feed Integration
//
// The engine only needs the latest collateral price in debt-asset units. Where it comes
// from (an oracle network, an aggregator, a test script) is behind the PriceFeed trait.
// Staleness handling is left to the feed implementation.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Debug;

use crate::types::{Price, Timestamp};

/// Errors a price source can report
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceFeedError {
    #[error("no price available")]
    NoPriceAvailable,

    #[error("price update at {at:?} is older than the last one")]
    OutOfOrder { at: Timestamp },
}

/// A single recorded price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub price: Price,
    pub timestamp: Timestamp,
}

pub trait PriceFeed: Debug {
    /// Latest price. Called once at the start of every price-dependent operation.
    fn fetch_price(&mut self) -> Result<Price, PriceFeedError>;

    /// Record a new price.
    fn push_price(&mut self, price: Price, timestamp: Timestamp) -> Result<(), PriceFeedError>;
}

/// Feed driven by explicit pushes. Used by the simulator and the tests.
#[derive(Debug, Clone)]
pub struct ManualPriceFeed {
    history: VecDeque<PriceUpdate>,
    /// Maximum history kept
    max_history: usize,
}

impl Default for ManualPriceFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualPriceFeed {
    pub fn new() -> Self {
        Self {
            history: VecDeque::new(),
            max_history: 100,
        }
    }

    pub fn with_price(price: Price) -> Self {
        let mut feed = Self::new();
        feed.history.push_back(PriceUpdate {
            price,
            timestamp: Timestamp::from_millis(0),
        });
        feed
    }

    pub fn last_update(&self) -> Option<&PriceUpdate> {
        self.history.back()
    }

    pub fn history(&self) -> impl Iterator<Item = &PriceUpdate> {
        self.history.iter()
    }
}

impl PriceFeed for ManualPriceFeed {
    fn fetch_price(&mut self) -> Result<Price, PriceFeedError> {
        self.history
            .back()
            .map(|u| u.price)
            .ok_or(PriceFeedError::NoPriceAvailable)
    }

    fn push_price(&mut self, price: Price, timestamp: Timestamp) -> Result<(), PriceFeedError> {
        if let Some(last) = self.history.back() {
            if timestamp < last.timestamp {
                return Err(PriceFeedError::OutOfOrder { at: timestamp });
            }
        }
        self.history.push_back(PriceUpdate { price, timestamp });
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_feed_has_no_price() {
        let mut feed = ManualPriceFeed::new();
        assert_eq!(feed.fetch_price(), Err(PriceFeedError::NoPriceAvailable));
    }

    #[test]
    fn test_latest_push_wins() {
        let mut feed = ManualPriceFeed::with_price(Price::from_units(200));
        feed.push_price(Price::from_units(150), Timestamp::from_millis(10)).unwrap();
        assert_eq!(feed.fetch_price().unwrap(), Price::from_units(150));
        assert_eq!(feed.history().count(), 2);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut feed = ManualPriceFeed::new();
        feed.push_price(Price::from_units(100), Timestamp::from_millis(50)).unwrap();
        let err = feed.push_price(Price::from_units(90), Timestamp::from_millis(40)).unwrap_err();
        assert_eq!(err, PriceFeedError::OutOfOrder { at: Timestamp::from_millis(40) });
        assert_eq!(feed.fetch_price().unwrap(), Price::from_units(100));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut feed = ManualPriceFeed::new();
        for i in 0..150 {
            feed.push_price(Price::from_units(100 + i), Timestamp::from_millis(i as i64)).unwrap();
        }
        assert_eq!(feed.history().count(), 100);
        assert_eq!(feed.last_update().unwrap().price, Price::from_units(249));
    }
}
