// 6.0 fees.rs: one base rate drives both borrowing and redemption fees.
// redemptions push it up in proportion to the share of supply redeemed, time decays it back
// toward zero with a 12 hour half-life. borrowing only ever decays it.

use serde::{Deserialize, Serialize};

use crate::config::ProtocolParams;
use crate::math::{dec_pow, mul_div, MathError};
use crate::types::{Amount, Price, Timestamp, DECIMAL_PRECISION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeState {
    base_rate: Amount,
    last_fee_operation_time: Timestamp,
}

impl FeeState {
    pub fn new(now: Timestamp) -> Self {
        Self {
            base_rate: 0,
            last_fee_operation_time: now,
        }
    }

    pub fn base_rate(&self) -> Amount {
        self.base_rate
    }

    pub fn last_fee_operation_time(&self) -> Timestamp {
        self.last_fee_operation_time
    }

    pub fn decayed_base_rate(&self, params: &ProtocolParams, now: Timestamp) -> Result<Amount, MathError> {
        let minutes = self.last_fee_operation_time.minutes_until(&now);
        let factor = dec_pow(params.minute_decay_factor, minutes)?;
        mul_div(self.base_rate, factor, DECIMAL_PRECISION)
    }

    // 6.1: base rate after redeeming `coll_drawn` at `price`, capped at 100%
    pub fn redemption_base_rate(
        &self,
        params: &ProtocolParams,
        now: Timestamp,
        coll_drawn: Amount,
        price: Price,
        total_supply: Amount,
    ) -> Result<Amount, MathError> {
        let decayed = self.decayed_base_rate(params, now)?;
        if total_supply == 0 {
            return Err(MathError::DivisionByZero("redeemed fraction"));
        }
        let redeemed_fraction = mul_div(coll_drawn, price.value(), total_supply)?;
        let increase = redeemed_fraction / params.beta;
        Ok(decayed.saturating_add(increase).min(DECIMAL_PRECISION))
    }

    pub(crate) fn set_base_rate(&mut self, base_rate: Amount, now: Timestamp) {
        self.base_rate = base_rate;
        self.touch(now);
    }

    // the clock only moves once a full minute passed, so rapid operations cannot stall decay
    fn touch(&mut self, now: Timestamp) {
        if self.last_fee_operation_time.minutes_until(&now) >= 1 {
            self.last_fee_operation_time = now;
        }
    }
}

pub fn redemption_rate(params: &ProtocolParams, base_rate: Amount) -> Amount {
    params
        .redemption_fee_floor
        .saturating_add(base_rate)
        .min(DECIMAL_PRECISION)
}

pub fn borrowing_rate(params: &ProtocolParams, base_rate: Amount) -> Amount {
    params
        .borrowing_fee_floor
        .saturating_add(base_rate)
        .min(params.max_borrowing_fee)
}

pub fn redemption_fee(params: &ProtocolParams, base_rate: Amount, coll_drawn: Amount) -> Result<Amount, MathError> {
    mul_div(redemption_rate(params, base_rate), coll_drawn, DECIMAL_PRECISION)
}

pub fn borrowing_fee(params: &ProtocolParams, base_rate: Amount, debt: Amount) -> Result<Amount, MathError> {
    mul_div(borrowing_rate(params, base_rate), debt, DECIMAL_PRECISION)
}

/// Fee as a fraction of `amount`, 1e18 = 100%.
pub fn fee_fraction(fee: Amount, amount: Amount) -> Result<Amount, MathError> {
    mul_div(fee, DECIMAL_PRECISION, amount)
}
