//! Account lifecycle tests against the in-memory cluster.

use margin_core::sim::{InMemoryChain, SimExchange, SimInstruction, SimTokenProgram};
use margin_core::*;
use rust_decimal_macros::dec;
use solana_sdk::account::Account as ChainAccount;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use std::sync::Arc;
use std::time::Duration;

const MARKET: &str = "ABC/XYZ";
const PAYER_LAMPORTS: u64 = 10_000_000_000;

struct Fixture {
    chain: Arc<InMemoryChain>,
    engine: Arc<Engine>,
    owner: Pubkey,
    base_mint: Pubkey,
    quote_mint: Pubkey,
}

/// Unit lots, zero decimals. `None` balances mean no token account yet.
fn fixture(base: Option<u64>, quote: Option<u64>) -> Fixture {
    fixture_with_lots(MarketLots::new(1, 1, 0, 0).unwrap(), base, quote)
}

fn fixture_with_lots(lots: MarketLots, base: Option<u64>, quote: Option<u64>) -> Fixture {
    fixture_with_markets(lots, base, quote, Vec::new())
}

// `extra` markets are configured but never listed on chain
fn fixture_with_markets(
    lots: MarketLots,
    base: Option<u64>,
    quote: Option<u64>,
    extra: Vec<MarketConfig>,
) -> Fixture {
    let chain = Arc::new(InMemoryChain::new());
    let keypair = Keypair::new();
    let owner = keypair.pubkey();
    chain.set_account(
        owner,
        ChainAccount::new(PAYER_LAMPORTS, 0, &solana_sdk::system_program::id()),
    );

    let base_mint = Pubkey::new_unique();
    let quote_mint = Pubkey::new_unique();
    let meta = SimExchange.new_market(base_mint, quote_mint, lots);
    chain.list_market(&meta);
    if let Some(amount) = base {
        chain.create_token_account(&owner, &base_mint, amount);
    }
    if let Some(amount) = quote {
        chain.create_token_account(&owner, &quote_mint, amount);
    }

    let token = |symbol: &str, mint: Pubkey, decimals: u8| TokenConfig {
        symbol: symbol.to_string(),
        mint,
        decimals,
        precision: 2,
        min_amount: dec!(0),
        max_amount: dec!(0),
    };
    let config = AccountConfig {
        tokens: vec![
            token("ABC", base_mint, lots.base_decimals()),
            token("XYZ", quote_mint, lots.quote_decimals()),
        ],
        markets: std::iter::once(MarketConfig {
            symbol: MARKET.to_string(),
            address: meta.address,
            base: "ABC".to_string(),
            quote: "XYZ".to_string(),
            protocol: SimExchange::NAME.to_string(),
        })
        .chain(extra)
        .collect(),
        owner_keypair: None,
        payer_keypair: None,
    };

    let engine = Engine::new(
        EngineConfig::default(),
        config,
        Collaborators {
            connection: chain.clone(),
            protocols: ProtocolRegistry::new().with(Arc::new(SimExchange)),
            token_program: Arc::new(SimTokenProgram),
        },
        Signers::single(keypair),
    );
    Fixture {
        chain,
        engine,
        owner,
        base_mint,
        quote_mint,
    }
}

fn market(engine: &Engine) -> Arc<MarketView> {
    engine.account().market(MARKET).cloned().expect("market loaded")
}

fn kind(ix: &SimInstruction) -> &'static str {
    match ix {
        SimInstruction::CreateOpenOrders { .. } => "create_open_orders",
        SimInstruction::PlaceOrder { .. } => "place",
        SimInstruction::CancelOrder { .. } => "cancel",
        SimInstruction::SettleFunds { .. } => "settle",
        SimInstruction::CloseOpenOrders { .. } => "close_open_orders",
        SimInstruction::CreateTokenAccount { .. } => "create_token_account",
        SimInstruction::CloseTokenAccount { .. } => "close_token_account",
    }
}

// instruction kinds of each confirmed transaction after the first `skip`
fn confirmed_kinds(chain: &InMemoryChain, skip: usize) -> Vec<Vec<&'static str>> {
    chain
        .transactions()
        .into_iter()
        .skip(skip)
        .filter(|tx| tx.is_confirmed())
        .map(|tx| tx.instructions.iter().map(kind).collect())
        .collect()
}

fn lifecycle_steps(engine: &Engine) -> Vec<(LifecycleStep, usize)> {
    engine
        .events()
        .into_iter()
        .filter_map(|e| match e.payload {
            EventPayload::LifecycleStepCompleted(step) => Some((step.step, step.instructions)),
            _ => None,
        })
        .collect()
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

async fn send(engine: &Arc<Engine>, orders: Vec<DesiredOrder>) -> SendReport {
    engine.send_orders(orders).unwrap().wait().await
}

#[tokio::test]
async fn load_picks_up_existing_accounts() {
    let f = fixture(Some(250), Some(1_000));
    assert_eq!(f.engine.state(), AccountState::Unloaded);
    f.engine.load().await.unwrap();
    assert_eq!(f.engine.state(), AccountState::Loaded);

    let account = f.engine.account();
    let base = account.position("ABC").unwrap();
    assert_eq!(base.balance(), 250);
    assert_eq!(base.mint, f.base_mint);
    assert_eq!(
        base.token_account(),
        Some(SimTokenProgram.associated_address(&f.owner, &f.base_mint))
    );
    assert_eq!(account.position("XYZ").unwrap().balance(), 1_000);
    assert_eq!(f.engine.payer_balance(), PAYER_LAMPORTS);

    let market = market(&f.engine);
    assert!(market.open_orders().is_none());
    assert_eq!(market.bids(), Some(Vec::new()));
}

#[tokio::test]
async fn load_tolerates_unlisted_market() {
    let pending = MarketConfig {
        symbol: "XYZ/ABC".to_string(),
        address: Pubkey::new_unique(),
        base: "XYZ".to_string(),
        quote: "ABC".to_string(),
        protocol: SimExchange::NAME.to_string(),
    };
    let f = fixture_with_markets(MarketLots::new(1, 1, 0, 0).unwrap(), Some(100), Some(100), vec![pending]);
    f.engine.load().await.unwrap();
    assert_eq!(f.engine.state(), AccountState::Loaded);

    let account = f.engine.account();
    assert!(account.market(MARKET).is_some());
    assert!(account.market("XYZ/ABC").is_none());
    assert!(account.unlisted.contains("XYZ/ABC"));

    f.engine.create_open_orders().await.unwrap();
    let report = send(
        &f.engine,
        vec![
            DesiredOrder::limit("XYZ/ABC", Side::Bid, dec!(1), dec!(1)),
            DesiredOrder::limit(MARKET, Side::Bid, dec!(1), dec!(1)),
        ],
    )
    .await;
    assert_eq!(report.skipped_for(&SkipReason::UnknownMarket), 1);
    assert_eq!(report.submitted.len(), 1);
    assert!(report.is_confirmed());
}

#[tokio::test]
async fn load_twice_is_rejected() {
    let f = fixture(Some(1), Some(1));
    f.engine.load().await.unwrap();
    let err = f.engine.load().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Account(AccountError::InvalidState { operation: "load", state: AccountState::Loaded })
    ));
}

#[tokio::test]
async fn listen_rejected_while_unloaded() {
    let f = fixture(None, None);
    let err = f.engine.listen().await.unwrap_err();
    assert_eq!(err.to_string(), "Account error: Cannot listen while unloaded");
    assert!(f.engine.send_orders(Vec::new()).is_err());
    assert_eq!(f.engine.state(), AccountState::Unloaded);
}

#[tokio::test]
async fn bulk_creation_rejected_while_listening() {
    let f = fixture(Some(0), Some(0));
    f.engine.load().await.unwrap();
    f.engine.listen().await.unwrap();
    assert_eq!(f.engine.state(), AccountState::Listening);

    let err = f.engine.create_open_orders().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Account(AccountError::InvalidState { state: AccountState::Listening, .. })
    ));
    assert!(f.engine.create_token_accounts().await.is_err());
    assert!(f.engine.listen().await.is_err());
}

#[tokio::test]
async fn creates_missing_accounts_in_one_transaction_each() {
    let f = fixture(None, None);
    f.engine.load().await.unwrap();
    let before = f.chain.transactions().len();

    let created = f.engine.create_token_accounts().await.unwrap();
    assert_eq!(created.len(), 2);
    let open_orders = f.engine.create_open_orders().await.unwrap();
    assert_eq!(open_orders.len(), 1);

    assert_eq!(
        confirmed_kinds(&f.chain, before),
        vec![
            vec!["create_token_account", "create_token_account"],
            vec!["create_open_orders"],
        ]
    );
    assert_eq!(market(&f.engine).open_orders_address(), Some(open_orders[0]));

    // nothing left to create
    assert!(f.engine.create_token_accounts().await.unwrap().is_empty());
    assert!(f.engine.create_open_orders().await.unwrap().is_empty());
    assert_eq!(f.chain.transactions().len(), before + 2);
}

#[tokio::test]
async fn open_orders_created_on_first_order() {
    let f = fixture(Some(0), Some(1_000));
    f.engine.load().await.unwrap();
    let report = send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(5))]).await;
    assert!(report.is_confirmed());
    assert_eq!(report.submitted.len(), 1);
    assert!(market(&f.engine).open_orders_address().is_some());
    assert_eq!(
        confirmed_kinds(&f.chain, 0),
        vec![vec!["create_open_orders"], vec!["place"]]
    );
}

#[tokio::test]
async fn open_orders_created_while_listening_follow_pushes() {
    let f = fixture(Some(0), Some(1_000));
    f.engine.load().await.unwrap();
    f.engine.listen().await.unwrap();
    let view = market(&f.engine);
    assert!(view.open_orders_address().is_none());

    let report = send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(7), dec!(3))]).await;
    assert!(report.is_confirmed());
    assert!(view.open_orders_address().is_some());
    // no refresh: only the new subscription can deliver the resting order
    assert!(eventually(|| view.has_resting_price(7)).await);
}

#[tokio::test]
async fn sell_clipped_to_wallet_balance() {
    let f = fixture(Some(250), Some(0));
    f.engine.load().await.unwrap();
    f.engine.create_open_orders().await.unwrap();

    let report = send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Ask, dec!(10), dec!(300))]).await;
    assert!(report.is_confirmed());
    let placed = &report.submitted[0];
    assert_eq!(placed.requested_base_lots, 300);
    assert_eq!(placed.base_lots, 250);

    let clipped = f.engine.events().into_iter().any(|e| {
        matches!(
            e.payload,
            EventPayload::OrderClipped(OrderClippedEvent { base_lots: 250, requested_base_lots: 300, .. })
        )
    });
    assert!(clipped);

    let wallet = market(&f.engine).base.token_account().unwrap();
    assert_eq!(f.chain.token_balance(&wallet), Some(0));
}

#[tokio::test]
async fn buy_clipped_to_quote_balance() {
    let f = fixture(Some(0), Some(1_000));
    f.engine.load().await.unwrap();
    let report = send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(300))]).await;
    assert_eq!(report.submitted[0].base_lots, 100);
    assert_eq!(report.submitted[0].native_quote, 1_000);
}

#[tokio::test]
async fn orders_in_one_batch_share_the_balance() {
    let f = fixture(Some(0), Some(1_000));
    f.engine.load().await.unwrap();
    let report = send(
        &f.engine,
        vec![
            DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(60)),
            DesiredOrder::limit(MARKET, Side::Bid, dec!(9), dec!(60)),
            DesiredOrder::limit(MARKET, Side::Bid, dec!(8), dec!(60)),
        ],
    )
    .await;
    assert!(report.is_confirmed());
    let spent: u64 = report.submitted.iter().map(|o| o.native_quote).sum();
    assert!(spent <= 1_000);
    assert_eq!(report.submitted[0].base_lots, 60);
    assert_eq!(report.submitted[1].base_lots, 44);
    assert_eq!(report.skipped_for(&SkipReason::NothingAfterClip), 1);
}

#[tokio::test]
async fn invalid_and_unknown_orders_are_skipped() {
    let f = fixture(Some(100), Some(100));
    f.engine.load().await.unwrap();
    let report = send(
        &f.engine,
        vec![
            DesiredOrder::limit(MARKET, Side::Bid, dec!(0), dec!(1)),
            DesiredOrder::limit(MARKET, Side::Bid, dec!(1), dec!(-1)),
            DesiredOrder::limit("NOPE/XYZ", Side::Ask, dec!(1), dec!(1)),
        ],
    )
    .await;
    assert!(report.submitted.is_empty());
    assert!(report.signature.is_none());
    assert_eq!(
        report.skipped.iter().map(|(_, r)| r.clone()).collect::<Vec<_>>(),
        vec![
            SkipReason::NonPositivePrice,
            SkipReason::NonPositiveSize,
            SkipReason::UnknownMarket
        ]
    );
    // nothing was sent
    assert!(f.chain.transactions().is_empty());
}

#[tokio::test]
async fn missing_wallet_skips_order() {
    let f = fixture(None, Some(1_000));
    f.engine.load().await.unwrap();
    f.engine.create_open_orders().await.unwrap();
    let report = send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Ask, dec!(10), dec!(1))]).await;
    assert_eq!(report.skipped_for(&SkipReason::NoTokenAccount), 1);
}

#[tokio::test]
async fn resting_price_level_skipped_after_refresh() {
    let f = fixture(Some(0), Some(10_000));
    f.engine.load().await.unwrap();
    f.engine.create_open_orders().await.unwrap();

    let first = send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(5))]).await;
    assert!(first.is_confirmed());

    let view = market(&f.engine);
    let status = view.load(f.chain.as_ref()).await.unwrap();
    assert!(status.market && status.bids && status.asks && status.event_queue);
    assert_eq!(view.best_bid(), Some(PriceLevel { price_lots: 10, size_lots: 5 }));
    assert_eq!(view.best_ask(), None);

    let listed = f.engine.print_open_orders().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].price, dec!(10));
    assert_eq!(listed[0].side, Side::Bid);

    let second = send(
        &f.engine,
        vec![
            DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(5)),
            DesiredOrder::limit(MARKET, Side::Bid, dec!(9), dec!(5)),
        ],
    )
    .await;
    assert_eq!(
        second.skipped_for(&SkipReason::PriceLevelResting { price_lots: 10 }),
        1
    );
    assert_eq!(second.submitted.len(), 1);
    assert_eq!(second.submitted[0].price_lots, 9);
}

#[tokio::test]
async fn resting_price_level_skipped_after_push() {
    let f = fixture(Some(0), Some(10_000));
    f.engine.load().await.unwrap();
    f.engine.create_open_orders().await.unwrap();
    f.engine.listen().await.unwrap();

    send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(12), dec!(5))]).await;
    let view = market(&f.engine);
    assert!(eventually(|| view.has_resting_price(12)).await);
    assert!(eventually(|| view.best_bid().map(|l| l.price_lots) == Some(12)).await);

    let again = send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(12), dec!(1))]).await;
    assert!(again.submitted.is_empty());
    assert_eq!(again.skipped_for(&SkipReason::PriceLevelResting { price_lots: 12 }), 1);
}

#[tokio::test]
async fn balance_follows_pushes_while_listening() {
    let f = fixture(Some(0), Some(500));
    f.engine.load().await.unwrap();
    f.engine.listen().await.unwrap();
    let view = market(&f.engine);
    let wallet = view.quote.token_account().unwrap();

    f.chain.request_airdrop(&wallet, 250).await.unwrap();
    assert!(eventually(|| view.quote.balance() == 750).await);

    f.chain.request_airdrop(&f.owner, 1_000).await.unwrap();
    let engine = f.engine.clone();
    assert!(eventually(|| engine.payer_balance() == PAYER_LAMPORTS + 1_000).await);
}

#[tokio::test]
async fn second_submission_for_busy_market_is_skipped() {
    let f = fixture(Some(0), Some(10_000));
    f.engine.load().await.unwrap();
    f.engine.create_open_orders().await.unwrap();
    f.chain.set_confirm_delay(Some(Duration::from_millis(50)));

    let first = f
        .engine
        .send_orders(vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(1))])
        .unwrap();
    assert!(f.engine.is_in_flight(MARKET));
    let second = f
        .engine
        .send_orders(vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(11), dec!(1))])
        .unwrap();

    let second = second.wait().await;
    assert_eq!(second.skipped_for(&SkipReason::MarketBusy), 1);
    assert!(second.signature.is_none());

    let first = first.wait().await;
    assert!(first.is_confirmed());
    assert!(!f.engine.is_in_flight(MARKET));

    // released once the first one finished
    f.chain.set_confirm_delay(None);
    let third = send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(11), dec!(1))]).await;
    assert!(third.is_confirmed());
}

#[tokio::test]
async fn rejection_is_decoded_and_not_fatal() {
    let f = fixture(Some(0), Some(1_000));
    f.engine.load().await.unwrap();
    f.engine.create_open_orders().await.unwrap();

    f.chain.reject_next_with_code(34);
    let report = send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(5))]).await;
    let rejection = report.rejection.expect("rejected");
    assert_eq!(rejection.code, Some(34));
    assert_eq!(rejection.error, Some(DexErrorCode::InsufficientFunds));
    assert!(report.signature.is_none());
    assert_eq!(f.engine.state(), AccountState::Loaded);

    let recorded = f.engine.events().into_iter().any(|e| {
        matches!(
            e.payload,
            EventPayload::TransactionRejected(TransactionRejectedEvent {
                error: Some(DexErrorCode::InsufficientFunds),
                ..
            })
        )
    });
    assert!(recorded);

    // no retry was attempted, and the next call goes through
    assert_eq!(f.chain.transactions().iter().filter(|t| !t.is_confirmed()).count(), 1);
    let retry = send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(5))]).await;
    assert!(retry.is_confirmed());
}

#[tokio::test]
async fn self_trade_rejection_comes_from_the_exchange() {
    let f = fixture(Some(100), Some(1_000));
    f.engine.load().await.unwrap();
    f.engine.create_open_orders().await.unwrap();
    send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(5))]).await;

    let report = send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Ask, dec!(9), dec!(5))]).await;
    assert_eq!(
        report.rejection.and_then(|r| r.error),
        Some(DexErrorCode::WouldSelfTrade)
    );
}

#[tokio::test]
async fn cancel_orders_refreshes_then_cancels_everything() {
    let f = fixture(Some(100), Some(1_000));
    f.engine.load().await.unwrap();
    f.engine.create_open_orders().await.unwrap();
    send(
        &f.engine,
        vec![
            DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(5)),
            DesiredOrder::limit(MARKET, Side::Ask, dec!(20), dec!(5)),
        ],
    )
    .await;

    // snapshot is stale: not listening and never refreshed
    assert!(!market(&f.engine).has_resting_price(10));
    let report = f.engine.cancel_orders().await.unwrap();
    assert_eq!(report.canceled, 2);
    assert!(report.signature.is_some());
    assert!(f.engine.print_open_orders().await.unwrap().is_empty());

    let record = market(&f.engine).open_orders().unwrap();
    assert_eq!(record.quote_free, 50);
    assert_eq!(record.base_free, 5);

    assert_eq!(f.engine.settle_funds().await.unwrap(), 1);
    f.engine.refresh_balances().await.unwrap();
    let account = f.engine.account();
    assert_eq!(account.position("XYZ").unwrap().balance(), 1_000);
    assert_eq!(account.position("ABC").unwrap().balance(), 100);
}

#[tokio::test]
async fn cancel_failure_is_reported_not_returned() {
    let f = fixture(Some(100), Some(1_000));
    f.engine.load().await.unwrap();
    f.engine.create_open_orders().await.unwrap();
    send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(5))]).await;

    f.chain.reject_next_with_code(59);
    let report = f.engine.cancel_orders().await.unwrap();
    assert_eq!(report.canceled, 0);
    assert_eq!(
        report.rejection.and_then(|r| r.error),
        Some(DexErrorCode::OrderNotFound)
    );
}

#[tokio::test]
async fn teardown_runs_steps_in_order() {
    let f = fixture(Some(0), Some(1_000));
    f.engine.load().await.unwrap();
    f.engine.create_open_orders().await.unwrap();
    f.engine.listen().await.unwrap();
    send(
        &f.engine,
        vec![
            DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(5)),
            DesiredOrder::limit(MARKET, Side::Bid, dec!(11), dec!(5)),
        ],
    )
    .await;
    let before = f.chain.transactions().len();

    f.engine.close_margin_account().await.unwrap();
    assert_eq!(f.engine.state(), AccountState::Unloaded);
    assert!(f.engine.account().markets.is_empty());

    assert_eq!(
        confirmed_kinds(&f.chain, before),
        vec![
            vec!["cancel", "cancel"],
            vec!["settle"],
            vec!["close_open_orders"],
            vec!["close_token_account"],
        ]
    );
    assert_eq!(
        lifecycle_steps(&f.engine),
        vec![
            (LifecycleStep::CancelOrders, 2),
            (LifecycleStep::SettleFunds, 1),
            (LifecycleStep::CloseOpenOrders, 1),
            (LifecycleStep::CloseTokenAccounts, 1),
        ]
    );

    // funded quote wallet survives, empty base wallet is gone
    let base_wallet = SimTokenProgram.associated_address(&f.owner, &f.base_mint);
    let quote_wallet = SimTokenProgram.associated_address(&f.owner, &f.quote_mint);
    assert!(f.chain.account(&base_wallet).is_none());
    assert_eq!(f.chain.token_balance(&quote_wallet), Some(1_000));

    // and the account can be loaded again
    f.engine.load().await.unwrap();
    assert!(market(&f.engine).open_orders().is_none());
}

#[tokio::test]
async fn teardown_with_nothing_to_do_still_completes_every_step() {
    let f = fixture(Some(5), Some(5));
    f.engine.load().await.unwrap();
    f.engine.close_margin_account().await.unwrap();

    assert!(f.chain.transactions().is_empty());
    assert_eq!(
        lifecycle_steps(&f.engine),
        vec![
            (LifecycleStep::CancelOrders, 0),
            (LifecycleStep::SettleFunds, 0),
            (LifecycleStep::CloseOpenOrders, 0),
            (LifecycleStep::CloseTokenAccounts, 0),
        ]
    );
    assert_eq!(f.engine.state(), AccountState::Unloaded);
}

#[tokio::test]
async fn failed_teardown_step_keeps_state() {
    let f = fixture(Some(0), Some(1_000));
    f.engine.load().await.unwrap();
    f.engine.create_open_orders().await.unwrap();
    send(&f.engine, vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(5))]).await;

    f.chain.reject_next_with_code(59);
    assert!(f.engine.close_margin_account().await.is_err());
    assert_eq!(f.engine.state(), AccountState::Loaded);
    assert!(lifecycle_steps(&f.engine).is_empty());
    assert!(market(&f.engine).open_orders_address().is_some());
}

#[tokio::test]
async fn teardown_waits_for_in_flight_submission() {
    let f = fixture(Some(0), Some(1_000));
    f.engine.load().await.unwrap();
    f.engine.create_open_orders().await.unwrap();
    f.chain.set_confirm_delay(Some(Duration::from_millis(50)));

    let pending = f
        .engine
        .send_orders(vec![DesiredOrder::limit(MARKET, Side::Bid, dec!(10), dec!(5))])
        .unwrap();
    let err = f.engine.close_margin_account().await.unwrap_err();
    assert!(matches!(err, EngineError::SubmissionInFlight(ref m) if m == MARKET));
    assert_eq!(f.engine.state(), AccountState::Loaded);
    assert!(lifecycle_steps(&f.engine).is_empty());

    assert!(pending.wait().await.is_confirmed());
    f.chain.set_confirm_delay(None);
    f.engine.close_margin_account().await.unwrap();
    assert_eq!(f.engine.state(), AccountState::Unloaded);
    assert!(!f.engine.is_in_flight(MARKET));
}

#[tokio::test]
async fn airdrop_native_and_token() {
    let f = fixture(Some(0), Some(0));
    f.engine.load().await.unwrap();

    f.engine.airdrop("SOL", dec!(1.5)).await.unwrap();
    assert_eq!(f.chain.lamports(&f.owner), PAYER_LAMPORTS + 1_500_000_000);

    f.engine.airdrop("XYZ", dec!(40)).await.unwrap();
    let wallet = SimTokenProgram.associated_address(&f.owner, &f.quote_mint);
    assert_eq!(f.chain.token_balance(&wallet), Some(40));

    assert!(matches!(
        f.engine.airdrop("NOPE", dec!(1)).await,
        Err(EngineError::Account(AccountError::UnknownSymbol(_)))
    ));
}

#[tokio::test]
async fn balances_report_human_units_and_limits() {
    let lots = MarketLots::new(100_000_000, 100, 9, 6).unwrap();
    let f = fixture_with_lots(lots, Some(1_234_567_891), Some(25_500_000));
    f.engine.load().await.unwrap();
    f.engine.set_limits("ABC", dec!(1), dec!(10)).unwrap();

    let lines = f.engine.print_balance().unwrap();
    let abc = lines.iter().find(|l| l.symbol == "ABC").unwrap();
    assert_eq!(abc.native, 1_234_567_891);
    assert_eq!(abc.amount, dec!(1.23));
    assert_eq!(abc.limits.max_amount, dec!(10));
    let xyz = lines.iter().find(|l| l.symbol == "XYZ").unwrap();
    assert_eq!(xyz.amount, dec!(25.5));
    let payer = lines.last().unwrap();
    assert_eq!(payer.native, PAYER_LAMPORTS);
    assert_eq!(payer.amount, dec!(10));
}

#[tokio::test]
async fn mint_mismatch_fails_load() {
    let f = fixture(None, None);
    let other = SimExchange.new_market(Pubkey::new_unique(), f.quote_mint, MarketLots::new(1, 1, 0, 0).unwrap());
    f.chain.list_market(&other);

    let mut config = AccountConfig::default();
    config.tokens = vec![
        TokenConfig {
            symbol: "ABC".to_string(),
            mint: f.base_mint,
            decimals: 0,
            precision: 0,
            min_amount: dec!(0),
            max_amount: dec!(0),
        },
        TokenConfig {
            symbol: "XYZ".to_string(),
            mint: f.quote_mint,
            decimals: 0,
            precision: 0,
            min_amount: dec!(0),
            max_amount: dec!(0),
        },
    ];
    config.markets = vec![MarketConfig {
        symbol: "BAD".to_string(),
        address: other.address,
        base: "ABC".to_string(),
        quote: "XYZ".to_string(),
        protocol: SimExchange::NAME.to_string(),
    }];
    let engine = Engine::new(
        EngineConfig::default(),
        config,
        Collaborators {
            connection: f.chain.clone(),
            protocols: ProtocolRegistry::new().with(Arc::new(SimExchange)),
            token_program: Arc::new(SimTokenProgram),
        },
        Signers::single(Keypair::new()),
    );
    assert!(matches!(
        engine.load().await,
        Err(EngineError::MintMismatch { .. })
    ));
    assert_eq!(engine.state(), AccountState::Unloaded);
}
