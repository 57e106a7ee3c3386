// 7.0 config.rs: protocol settings in one place. thresholds, reserves, fee curve, capacity.
// authored as human decimals, converted once into 1e18 fixed point for the engine.
// 7.1 presets: mainnet is the reference parameter set, testnet drops the borrowing fee floor.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{Amount, DECIMAL_PRECISION};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    // Minimum collateral ratio for a single position (1.1 = 110%)
    pub mcr: Decimal,
    // System ratio under which recovery mode starts
    pub ccr: Decimal,
    // Flat debt reserve minted to the gas pool on open, paid to liquidators
    pub gas_compensation: Decimal,
    // Smallest debt a position may carry, reserve excluded
    pub min_net_debt: Decimal,
    // Liquidators also get coll / divisor
    pub coll_gas_compensation_divisor: u32,
    pub borrowing_fee_floor: Decimal,
    pub max_borrowing_fee: Decimal,
    pub redemption_fee_floor: Decimal,
    // Divides the redeemed supply fraction before it is added to the base rate
    pub beta: u32,
    // Per-minute base rate decay
    pub minute_decay_factor: Decimal,
    // Capacity of the sorted index
    pub max_positions: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl ProtocolConfig {
    pub fn mainnet() -> Self {
        Self {
            mcr: dec!(1.1),
            ccr: dec!(1.5),
            gas_compensation: dec!(200),
            min_net_debt: dec!(1800),
            coll_gas_compensation_divisor: 200, // 0.5%
            borrowing_fee_floor: dec!(0.005),
            max_borrowing_fee: dec!(0.05),
            redemption_fee_floor: dec!(0.005),
            beta: 2,
            minute_decay_factor: dec!(0.999037758833783), // 12h half-life
            max_positions: 1_000_000,
        }
    }

    // no borrowing fee floor, so opened debt is exactly what was asked for until a redemption
    pub fn testnet() -> Self {
        Self {
            borrowing_fee_floor: Decimal::ZERO,
            ..Self::mainnet()
        }
    }

    // small positions and a small index for randomized and load tests
    pub fn stress() -> Self {
        Self {
            gas_compensation: dec!(10),
            min_net_debt: dec!(90),
            borrowing_fee_floor: Decimal::ZERO,
            max_positions: 10_000,
            ..Self::mainnet()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mcr <= Decimal::ONE {
            return Err(ConfigError::InvalidThresholds {
                reason: "MCR must be above 100%".to_string(),
            });
        }
        if self.ccr <= self.mcr {
            return Err(ConfigError::InvalidThresholds {
                reason: "CCR must be above MCR".to_string(),
            });
        }

        if self.gas_compensation < Decimal::ZERO || self.min_net_debt <= Decimal::ZERO {
            return Err(ConfigError::InvalidDebtLimits {
                reason: "reserve must be non-negative and minimum net debt positive".to_string(),
            });
        }
        if self.coll_gas_compensation_divisor == 0 {
            return Err(ConfigError::InvalidDebtLimits {
                reason: "collateral gas compensation divisor must be positive".to_string(),
            });
        }

        let unit = Decimal::ZERO..=Decimal::ONE;
        if !unit.contains(&self.borrowing_fee_floor)
            || !unit.contains(&self.max_borrowing_fee)
            || !unit.contains(&self.redemption_fee_floor)
        {
            return Err(ConfigError::InvalidFees {
                reason: "fee rates must be between 0 and 1".to_string(),
            });
        }
        if self.max_borrowing_fee < self.borrowing_fee_floor {
            return Err(ConfigError::InvalidFees {
                reason: "max borrowing fee below its floor".to_string(),
            });
        }
        if self.beta == 0 {
            return Err(ConfigError::InvalidFees {
                reason: "beta must be positive".to_string(),
            });
        }
        if self.minute_decay_factor <= Decimal::ZERO || self.minute_decay_factor > Decimal::ONE {
            return Err(ConfigError::InvalidFees {
                reason: "decay factor must be in (0, 1]".to_string(),
            });
        }

        if self.max_positions == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(())
    }

    pub fn to_params(&self) -> Result<ProtocolParams, ConfigError> {
        self.validate()?;
        Ok(ProtocolParams {
            mcr: to_fixed(self.mcr, "mcr")?,
            ccr: to_fixed(self.ccr, "ccr")?,
            gas_compensation: to_fixed(self.gas_compensation, "gas_compensation")?,
            min_net_debt: to_fixed(self.min_net_debt, "min_net_debt")?,
            coll_gas_compensation_divisor: Amount::from(self.coll_gas_compensation_divisor),
            borrowing_fee_floor: to_fixed(self.borrowing_fee_floor, "borrowing_fee_floor")?,
            max_borrowing_fee: to_fixed(self.max_borrowing_fee, "max_borrowing_fee")?,
            redemption_fee_floor: to_fixed(self.redemption_fee_floor, "redemption_fee_floor")?,
            beta: Amount::from(self.beta),
            minute_decay_factor: to_fixed(self.minute_decay_factor, "minute_decay_factor")?,
            max_positions: self.max_positions,
        })
    }
}

fn to_fixed(value: Decimal, field: &'static str) -> Result<Amount, ConfigError> {
    (value * Decimal::from(DECIMAL_PRECISION as u64))
        .trunc()
        .to_u128()
        .ok_or(ConfigError::OutOfRange { field })
}

/** 7.2: the same settings in 1e18 fixed point, what the engine actually reads */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    pub mcr: Amount,
    pub ccr: Amount,
    pub gas_compensation: Amount,
    pub min_net_debt: Amount,
    pub coll_gas_compensation_divisor: Amount,
    pub borrowing_fee_floor: Amount,
    pub max_borrowing_fee: Amount,
    pub redemption_fee_floor: Amount,
    pub beta: Amount,
    pub minute_decay_factor: Amount,
    pub max_positions: usize,
}

impl ProtocolParams {
    /// Net debt plus the gas reserve.
    pub fn composite_debt(&self, net_debt: Amount) -> Amount {
        net_debt.saturating_add(self.gas_compensation)
    }

    pub fn net_debt(&self, debt: Amount) -> Amount {
        debt.saturating_sub(self.gas_compensation)
    }

    pub fn coll_gas_compensation(&self, coll: Amount) -> Amount {
        coll / self.coll_gas_compensation_divisor
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid thresholds: {reason}")]
    InvalidThresholds { reason: String },

    #[error("invalid debt limits: {reason}")]
    InvalidDebtLimits { reason: String },

    #[error("invalid fees: {reason}")]
    InvalidFees { reason: String },

    #[error("max positions must be positive")]
    InvalidCapacity,

    #[error("{field} does not fit fixed point")]
    OutOfRange { field: &'static str },
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Stress,
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn config(&self) -> ProtocolConfig {
        match self {
            Environment::Stress => ProtocolConfig::stress(),
            Environment::Testnet => ProtocolConfig::testnet(),
            Environment::Mainnet => ProtocolConfig::mainnet(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::units;

    #[test]
    fn test_presets_valid() {
        assert!(Environment::Stress.config().validate().is_ok());
        assert!(Environment::Testnet.config().validate().is_ok());
        assert!(Environment::Mainnet.config().validate().is_ok());
    }

    #[test]
    fn test_mainnet_params() {
        let params = ProtocolConfig::mainnet().to_params().unwrap();
        assert_eq!(params.mcr, 1_100_000_000_000_000_000);
        assert_eq!(params.ccr, 1_500_000_000_000_000_000);
        assert_eq!(params.gas_compensation, units(200));
        assert_eq!(params.min_net_debt, units(1800));
        assert_eq!(params.borrowing_fee_floor, DECIMAL_PRECISION / 200);
        assert_eq!(params.minute_decay_factor, 999_037_758_833_783_000);
        assert_eq!(params.composite_debt(units(1800)), units(2000));
        assert_eq!(params.coll_gas_compensation(units(21)), 105_000_000_000_000_000);
    }

    #[test]
    fn test_testnet_has_no_borrowing_floor() {
        let params = ProtocolConfig::testnet().to_params().unwrap();
        assert_eq!(params.borrowing_fee_floor, 0);
        assert_eq!(params.mcr, ProtocolConfig::mainnet().to_params().unwrap().mcr);
    }

    #[test]
    fn test_invalid_thresholds() {
        let mut config = ProtocolConfig::mainnet();
        config.ccr = dec!(1.05);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThresholds { .. })));

        let mut config = ProtocolConfig::mainnet();
        config.mcr = Decimal::ONE;
        assert!(matches!(config.to_params(), Err(ConfigError::InvalidThresholds { .. })));
    }

    #[test]
    fn test_invalid_fees() {
        let mut config = ProtocolConfig::mainnet();
        config.max_borrowing_fee = dec!(0.001);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFees { .. })));

        let mut config = ProtocolConfig::mainnet();
        config.minute_decay_factor = dec!(1.01);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFees { .. })));
    }

    #[test]
    fn test_config_serialization() {
        let config = ProtocolConfig::stress();
        let json = serde_json::to_string(&config).unwrap();
        let back: ProtocolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.min_net_debt, config.min_net_debt);
        assert_eq!(back.to_params().unwrap(), config.to_params().unwrap());
    }
}
