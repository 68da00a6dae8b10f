use std::sync::Arc;

use dotenvy::dotenv;
use teloxide::Bot;
use tokio::sync::{RwLock, broadcast};
use tracing::{error, info};

use common::actors::ActorType;
use common::config::BotConfig;
use common::logger;
use common::models::BASE_CURRENCY;
use executor::actors::{SignalMonitorActor, Supervisor};
use executor::services::telegram_service::run_dispatcher;
use executor::services::{MonitorSwitch, SignalMonitor, TelegramNotifier, TraderDesk, TradingEngine};
use market_data::{CandleSource, CoinbaseClient, PriceOracle};
use storage::db::connect_ledger;
use strategy::{IndicatorScanner, StrategyRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    logger::setup_logger();

    let cfg = BotConfig::from_env()?;
    info!("Virtual trader starting with {} ledger", cfg.database.kind());

    let ledger = connect_ledger(&cfg.database).await?;
    if ledger.seed_base_currency(BASE_CURRENCY, cfg.initial_balance).await? {
        info!("Seeded {} {}", cfg.initial_balance, BASE_CURRENCY);
    }

    let coinbase = Arc::new(CoinbaseClient::new(
        &cfg.coinbase_api_url,
        &cfg.coinbase_exchange_url,
    )?);
    let oracle: Arc<dyn PriceOracle> = coinbase.clone();
    let candles: Arc<dyn CandleSource> = coinbase;

    let registry = Arc::new(RwLock::new(StrategyRegistry::with_defaults(&cfg.strategy_assets)));
    let engine = Arc::new(TradingEngine::new(ledger.clone(), cfg.sizing.into()));

    let (notify_tx, _) = broadcast::channel::<String>(100);
    let monitor = Arc::new(
        SignalMonitor::new(
            registry.clone(),
            Arc::new(IndicatorScanner::new(candles)),
            oracle.clone(),
            engine.clone(),
            ledger.clone(),
            MonitorSwitch::new(true),
        )
        .with_notifier(notify_tx.clone()),
    );

    let bot = Bot::new(&cfg.telegram_token);
    let mut supervisor = Supervisor::new();

    let monitor_for_actor = monitor.clone();
    let tick = cfg.monitor_tick;
    supervisor.register_actor(
        ActorType::SignalMonitorActor,
        Box::new(move || Box::new(SignalMonitorActor::new(monitor_for_actor.clone(), tick))),
    );

    match cfg.telegram_chat_id {
        Some(chat_id) => {
            let bot_for_notifier = bot.clone();
            let tx_for_notifier = notify_tx.clone();
            supervisor.register_actor(
                ActorType::NotifierActor,
                Box::new(move || {
                    Box::new(TelegramNotifier::new(
                        bot_for_notifier.clone(),
                        chat_id,
                        tx_for_notifier.subscribe(),
                    ))
                }),
            );
        }
        None => info!("TELEGRAM_CHAT_ID not set, trade notifications are off"),
    }

    let desk = Arc::new(TraderDesk::new(ledger, engine, oracle, registry, monitor));

    tokio::select! {
        _ = supervisor.start() => error!("Supervisor exited"),
        _ = run_dispatcher(bot, desk) => info!("Telegram dispatcher stopped"),
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
    }
    Ok(())
}
