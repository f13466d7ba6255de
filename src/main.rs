//! Margin account simulation.
//!
//! Runs the account lifecycle against the in-memory cluster: load, account
//! creation, streaming, order submission with clipping and dedup, a decoded
//! rejection, and full teardown.

use anyhow::Result;
use margin_core::sim::{InMemoryChain, SimExchange, SimTokenProgram};
use margin_core::*;
use rust_decimal_macros::dec;
use solana_sdk::signature::Keypair;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct World {
    chain: Arc<InMemoryChain>,
    engine: Arc<Engine>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("Margin Account Simulation");
    println!("One owner, one SOL/USDC market, in-memory cluster\n");

    let world = setup()?;
    scenario_1_load_and_create(&world).await?;
    scenario_2_orders(&world).await?;
    scenario_3_rejection(&world).await?;
    scenario_4_teardown(&world).await?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn setup() -> Result<World> {
    let chain = Arc::new(InMemoryChain::new());
    let sol = Pubkey::new_unique();
    let usdc = Pubkey::new_unique();
    let meta = SimExchange.new_market(sol, usdc, MarketLots::new(100_000_000, 100, 9, 6)?);
    chain.list_market(&meta);

    let config = AccountConfig {
        tokens: vec![
            TokenConfig {
                symbol: "SOL".to_string(),
                mint: sol,
                decimals: 9,
                precision: 3,
                min_amount: dec!(0),
                max_amount: dec!(100),
            },
            TokenConfig {
                symbol: "USDC".to_string(),
                mint: usdc,
                decimals: 6,
                precision: 2,
                min_amount: dec!(0),
                max_amount: dec!(10000),
            },
        ],
        markets: vec![MarketConfig {
            symbol: "SOL/USDC".to_string(),
            address: meta.address,
            base: "SOL".to_string(),
            quote: "USDC".to_string(),
            protocol: SimExchange::NAME.to_string(),
        }],
        owner_keypair: None,
        payer_keypair: None,
    };
    config.validate()?;

    let engine = Engine::new(
        EngineConfig::default(),
        config,
        Collaborators {
            connection: chain.clone(),
            protocols: ProtocolRegistry::new().with(Arc::new(SimExchange)),
            token_program: Arc::new(SimTokenProgram),
        },
        Signers::single(Keypair::new()),
    );
    Ok(World { chain, engine })
}

/// Load an empty account, fund the payer, create token and open-orders accounts.
async fn scenario_1_load_and_create(world: &World) -> Result<()> {
    println!("Scenario 1: Load and Create Accounts\n");
    let engine = &world.engine;

    engine.load().await?;
    engine.airdrop("SOL", dec!(2)).await?;
    println!("  Payer airdropped 2 SOL");

    let created = engine.create_token_accounts().await?;
    for (symbol, address) in &created {
        println!("  Created {symbol} token account {address}");
    }
    let open_orders = engine.create_open_orders().await?;
    println!("  Created {} open orders account(s)", open_orders.len());

    engine.airdrop("SOL", dec!(1)).await?;
    engine.airdrop("USDC", dec!(1000)).await?;
    engine.refresh_balances().await?;

    print_balances(engine)?;
    Ok(())
}

/// Stream balances, place a bid and an ask, then watch dedup and clipping.
async fn scenario_2_orders(world: &World) -> Result<()> {
    println!("\nScenario 2: Orders, Clipping and Dedup\n");
    let engine = &world.engine;
    engine.listen().await?;
    println!("  State: {}", engine.state());

    let market = engine
        .account()
        .market("SOL/USDC")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("market not loaded"))?;
    let sol_wallet = market.base.token_account();
    if let Some(wallet) = sol_wallet {
        world.chain.request_airdrop(&wallet, 3_000_000_000).await?;
    }
    engine.refresh_balances().await?;

    let report = engine
        .send_orders(vec![
            DesiredOrder::limit("SOL/USDC", Side::Bid, dec!(20), dec!(10)),
            DesiredOrder::limit("SOL/USDC", Side::Ask, dec!(25), dec!(5)),
        ])?
        .wait()
        .await;
    for order in &report.submitted {
        println!(
            "  Placed {} {} lots @ {} lots (asked for {})",
            order.side, order.base_lots, order.price_lots, order.requested_base_lots
        );
    }

    engine.print_open_orders().await?;
    let again = engine
        .send_orders(vec![DesiredOrder::limit("SOL/USDC", Side::Bid, dec!(20), dec!(1))])?
        .wait()
        .await;
    for (order, reason) in &again.skipped {
        println!("  Skipped {} @ {}: {reason}", order.side, order.price);
    }

    for line in engine.print_open_orders().await? {
        println!("  Resting {} @ {} ({})", line.side, line.price, line.order_id);
    }
    Ok(())
}

/// An order the exchange rejects. The engine records the decoded code and carries on.
async fn scenario_3_rejection(world: &World) -> Result<()> {
    println!("\nScenario 3: Decoded Rejection\n");
    let engine = &world.engine;
    world.chain.reject_next_with_code(34);
    let report = engine
        .send_orders(vec![DesiredOrder::limit("SOL/USDC", Side::Bid, dec!(19), dec!(1))])?
        .wait()
        .await;
    if let Some(rejection) = &report.rejection {
        println!("  Rejected: code {:?} -> {:?}", rejection.code, rejection.error);
    }
    println!("  Still {}", engine.state());
    Ok(())
}

/// Cancel, settle, close open orders, close empty token accounts.
async fn scenario_4_teardown(world: &World) -> Result<()> {
    println!("\nScenario 4: Teardown\n");
    let engine = &world.engine;
    engine.close_margin_account().await?;
    for event in engine.events() {
        if let EventPayload::LifecycleStepCompleted(step) = event.payload {
            println!("  {:?}: {} instruction(s)", step.step, step.instructions);
        }
    }
    println!("  State: {}", engine.state());
    println!(
        "  Payer {} holds {} lamports",
        engine.payer(),
        world.chain.lamports(&engine.payer())
    );
    Ok(())
}

fn print_balances(engine: &Engine) -> Result<()> {
    for line in engine.print_balance()? {
        println!("  {:<12} {:>14}", line.symbol, line.amount);
    }
    Ok(())
}
