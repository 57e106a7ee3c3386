//! CDP Ledger Simulation.
//!
//! Walks the engine through its lifecycle: borrowing, pool deposits,
//! liquidations with offset and redistribution, recovery mode and redemptions.

use cdp_core::*;
use tracing_subscriber::EnvFilter;

const MAX_FEE: Amount = DECIMAL_PRECISION / 20;
const KEEPER: OwnerId = OwnerId(999);

fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let started = Timestamp::now();
    println!("CDP Ledger Engine Simulation");
    println!("Single Collateral, Pooled Liquidations, Full Lifecycle\n");

    scenario_1_borrowing()?;
    scenario_2_redistribution()?;
    scenario_3_stability_pool_offset()?;
    scenario_4_recovery_mode()?;
    scenario_5_redemption()?;
    scenario_6_stress_test()?;

    let elapsed = Timestamp::now().as_millis() - started.as_millis();
    println!("\nAll simulations completed successfully in {}ms.", elapsed);
    Ok(())
}

fn testnet_engine(price: u64) -> Result<Engine, EngineError> {
    let mut engine = Engine::new(EngineConfig::with_protocol(ProtocolConfig::testnet()))?;
    engine.set_price(Price::from_units(price))?;
    Ok(engine)
}

fn open(engine: &mut Engine, owner: u64, coll: u64, debt: u64) -> Result<OpenResult, EngineError> {
    engine.open_position(OwnerId(owner), units(coll), units(debt), MAX_FEE, Hints::default())
}

/// Open, adjust and close with the mainnet fee curve.
fn scenario_1_borrowing() -> Result<(), EngineError> {
    println!("Scenario 1: Borrowing Lifecycle\n");

    let mut engine = Engine::new(EngineConfig::default())?;
    engine.set_price(Price::from_units(2000))?;
    let (alice, bob) = (OwnerId(1), OwnerId(2));

    let opened = engine.open_position(alice, units(5), units(4000), MAX_FEE, Hints::default())?;
    println!("  Alice locks 5 ETH and borrows 4,000 @ $2,000");
    println!(
        "  Debt: {} (fee {}), ICR: {}",
        format_amount(opened.debt),
        format_amount(opened.borrowing_fee),
        format_amount(opened.icr)
    );

    engine.open_position(bob, units(10), units(5000), MAX_FEE, Hints::default())?;
    let adjusted = engine.add_collateral(alice, units(1), Hints::default())?;
    println!("  Alice adds 1 ETH, ICR: {}", format_amount(adjusted.icr));

    let adjusted = engine.repay_debt(alice, units(1000), Hints::default())?;
    println!("  Alice repays 1,000, debt now {}", format_amount(adjusted.debt));

    engine.transfer_debt(bob, alice, units(1000))?;
    let closed = engine.close_position(alice)?;
    println!(
        "  Alice closes: {} ETH returned, {} repaid\n",
        format_amount(closed.coll_returned),
        format_amount(closed.debt_repaid)
    );
    Ok(())
}

/// Liquidation with an empty pool spreads the position across remaining stakes.
fn scenario_2_redistribution() -> Result<(), EngineError> {
    println!("Scenario 2: Redistribution\n");

    let mut engine = testnet_engine(200)?;
    open(&mut engine, 1, 40, 1800)?;
    open(&mut engine, 2, 21, 1800)?;
    open(&mut engine, 3, 60, 1800)?;
    println!("  Three positions at 400%, 210% and 600%");

    engine.set_price(Price::from_units(100))?;
    let result = engine.liquidate(KEEPER, OwnerId(2))?;
    println!(
        "  Price halves, owner#2 liquidated: {} debt and {} ETH redistributed",
        format_amount(result.debt_redistributed),
        format_amount(result.coll_redistributed)
    );

    for owner in [OwnerId(1), OwnerId(3)] {
        let entire = engine.entire_debt_and_coll(owner)?;
        println!(
            "    {}: pending {} debt / {} ETH",
            owner,
            format_amount(entire.pending_debt),
            format_amount(entire.pending_coll)
        );
    }
    println!(
        "  Keeper received {} ETH and {} in gas compensation\n",
        format_amount(engine.collateral_balance(Holder::User(KEEPER))),
        format_amount(engine.debt_balance(Holder::User(KEEPER)))
    );
    Ok(())
}

/// Pool deposits absorb the liquidated debt and earn the collateral.
fn scenario_3_stability_pool_offset() -> Result<(), EngineError> {
    println!("Scenario 3: Stability Pool Offset\n");

    let mut engine = testnet_engine(200)?;
    open(&mut engine, 1, 40, 1800)?;
    open(&mut engine, 2, 21, 1800)?;
    open(&mut engine, 3, 60, 1800)?;

    engine.provide_to_stability_pool(OwnerId(1), units(1000))?;
    engine.provide_to_stability_pool(OwnerId(3), units(1500))?;
    println!("  Deposits: 1,000 from owner#1, 1,500 from owner#3");

    engine.set_price(Price::from_units(100))?;
    let result = engine.liquidate(KEEPER, OwnerId(2))?;
    println!(
        "  owner#2 liquidated: {} offset, {} ETH to the pool",
        format_amount(result.debt_offset),
        format_amount(result.coll_to_pool)
    );

    for depositor in [OwnerId(1), OwnerId(3)] {
        let compounded = engine.stability_pool().compounded_deposit(depositor)?;
        let gain = engine.stability_pool().collateral_gain(depositor)?;
        println!(
            "    {}: deposit {}, gain {} ETH",
            depositor,
            format_amount(compounded),
            format_amount(gain)
        );
    }

    let moved = engine.withdraw_collateral_gain_to_position(OwnerId(3), Hints::default())?;
    println!("  owner#3 moves the gain into the position, coll now {} ETH\n", format_amount(moved.coll));
    Ok(())
}

/// Below the critical ratio, positions under TCR become liquidatable at a capped loss.
fn scenario_4_recovery_mode() -> Result<(), EngineError> {
    println!("Scenario 4: Recovery Mode\n");

    let mut engine = testnet_engine(200)?;
    open(&mut engine, 1, 30, 1800)?;
    open(&mut engine, 2, 16, 1800)?;
    open(&mut engine, 3, 20, 2800)?;
    engine.provide_to_stability_pool(OwnerId(3), units(2500))?;

    let price = Price::from_units(150);
    engine.set_price(price)?;
    let summary = engine.summary(price)?;
    println!(
        "  Price drops to $150, TCR {} (recovery mode: {})",
        format_amount(summary.tcr),
        summary.recovery_mode
    );

    let result = engine.liquidate(KEEPER, OwnerId(2))?;
    println!(
        "  owner#2 at 120% liquidated, capped at MCR: surplus {} ETH",
        format_amount(result.coll_surplus)
    );
    let claimed = engine.claim_collateral(OwnerId(2))?;
    println!("  owner#2 claims {} ETH\n", format_amount(claimed));
    Ok(())
}

/// Debt tokens swapped for collateral, riskiest positions first.
fn scenario_5_redemption() -> Result<(), EngineError> {
    println!("Scenario 5: Redemption\n");

    let mut engine = testnet_engine(200)?;
    open(&mut engine, 1, 50, 1800)?;
    open(&mut engine, 2, 40, 3000)?;
    open(&mut engine, 3, 24, 1800)?;
    engine.transfer_debt(OwnerId(2), OwnerId(1), units(500))?;

    let price = engine.fetch_price()?;
    let hints = engine.get_redemption_hints(units(2300), price, 0)?;
    let target = engine.get_approx_hint(hints.partial_nicr, 50, 42)?;
    let (upper, lower) = engine.find_insert_position(hints.partial_nicr, target.hint, target.hint)?;

    let request = RedemptionRequest::new(units(2300), DECIMAL_PRECISION)
        .with_hints(&hints)
        .with_partial_hints(upper, lower);
    let result = engine.redeem_collateral(OwnerId(1), request)?;

    println!("  owner#1 redeems 2,300");
    println!(
        "  Drew {} ETH, fee {} ETH, closed {:?}, partial {:?}",
        format_amount(result.coll_drawn),
        format_amount(result.fee),
        result.closed,
        result.partially_redeemed
    );
    println!("  Base rate now {}\n", format_amount(result.base_rate));
    Ok(())
}

/// Many positions, a crash and a liquidation sweep.
fn scenario_6_stress_test() -> Result<(), EngineError> {
    println!("Scenario 6: Stress Test\n");

    let mut engine = Engine::new(EngineConfig::with_protocol(ProtocolConfig::stress()))?;
    engine.set_price(Price::from_units(100))?;

    let n = 500u64;
    // safest first so the system ratio never dips under CCR while opening.
    // ratios between 125% and 375%
    for i in (1..=n).rev() {
        let coll = units(2) + units(4) * u128::from(i) / u128::from(n);
        engine.open_position(OwnerId(i), coll, units(150), MAX_FEE, Hints::default())?;
    }
    for i in (1..=n).step_by(5) {
        engine.provide_to_stability_pool(OwnerId(i), units(100))?;
    }

    let price = Price::from_units(70);
    engine.set_price(price)?;
    let before = engine.summary(price)?;
    println!(
        "  {} positions, TCR {} after a 30% crash",
        before.positions,
        format_amount(before.tcr)
    );

    let totals = engine.liquidate_positions(KEEPER, 200)?;
    let after = engine.summary(price)?;
    println!(
        "  Liquidated {} positions: {} debt offset, {} redistributed",
        totals.count(),
        format_amount(totals.total_debt_offset),
        format_amount(totals.total_debt_redistributed)
    );
    println!(
        "  {} positions remain, TCR {}, pool {}",
        after.positions,
        format_amount(after.tcr),
        format_amount(after.stability_deposits)
    );
    Ok(())
}
