// cdp-core: collateralized debt position engine.
// ledger-first architecture: positions, stakes and pool accumulators are the source of truth.
// all computation is deterministic 1e18 fixed point with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: OwnerId, Holder, Price, Amount, Timestamp
//   2.x  math.rs: fixed-point mul/div, decay power, CR and NICR
//   3.x  position.rs: position ledger, stakes, redistribution accumulators
//   4.x  sorted.rs: positions ordered by nominal ratio, hinted insert
//   4.5  hints.rs: approximate insert hints, redemption hints
//   5.x  stability_pool.rs: P/S deposit accounting, offsets
//   6.x  fees.rs: base rate, borrowing and redemption fees
//   7.x  config.rs: thresholds, reserves, fee curve, env presets
//   8.x  engine/: core engine: positions, liquidations, redemptions, pool
//   9.x  price_feed.rs: oracle price source (mocked)
//   9.1  token.rs: debt token balances
//   9.2  custody.rs: collateral vaults (mocked)
//   11.x events.rs: state transition events for audit

// core ledger modules
pub mod engine;
pub mod events;
pub mod math;
pub mod position;
pub mod types;

// ordering and pricing
pub mod fees;
pub mod hints;
pub mod sorted;
pub mod stability_pool;

// integration modules
pub mod config;
pub mod custody;
pub mod price_feed;
pub mod token;

// re exports for convenience
pub use engine::*;
pub use events::*;
pub use position::*;
pub use types::*;
pub use config::{ConfigError, Environment, ProtocolConfig, ProtocolParams};
pub use custody::{CollateralVault, Custody, CustodyError};
pub use fees::FeeState;
pub use hints::{ApproxHint, RedemptionHints};
pub use math::MathError;
pub use price_feed::{ManualPriceFeed, PriceFeed, PriceFeedError, PriceUpdate};
pub use sorted::{NominalRatio, SortedListError, SortedPositions};
pub use stability_pool::{StabilityPool, StabilityPoolError};
pub use token::{DebtToken, TokenError};
