use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use crate::actors::{Actor, ActorType, ControlMessage};
use crate::services::trader_desk::TraderDesk;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "🤖 Virtual Trader commands:")]
pub enum Command {
    #[command(description = "show this text.")]
    Help,
    #[command(description = "view your current portfolio.")]
    Portfolio,
    #[command(description = "balance of one coin: /balance <coin>")]
    Balance(String),
    #[command(description = "transaction history: /history [coin] [limit]")]
    History(String),
    #[command(description = "buy with USD: /buy <coin> <usd_amount>")]
    Buy(String),
    #[command(description = "sell for USD: /sell <coin> <amount>")]
    Sell(String),
    #[command(description = "track a coin: /addcoin <strategy> <coin>")]
    AddCoin(String),
    #[command(description = "stop tracking a coin: /removecoin <strategy> <coin>")]
    RemoveCoin(String),
    #[command(description = "signal history: /signals [strategy] [coin] [limit]")]
    Signals(String),
    #[command(description = "test a manual signal: /signal <coin> <Low|Medium|Strong> [BUY|SELL]")]
    Signal(String),
    #[command(description = "monitor and scanner status.")]
    Status,
    #[command(description = "start the signal monitor.")]
    StartMonitor,
    #[command(description = "stop the signal monitor.")]
    StopMonitor,
}

/// Relays notification text to one chat.
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
    rx: broadcast::Receiver<String>,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, chat_id: i64, rx: broadcast::Receiver<String>) -> Self {
        Self {
            bot,
            chat_id: ChatId(chat_id),
            rx,
        }
    }
}

#[async_trait]
impl Actor for TelegramNotifier {
    fn name(&self) -> ActorType {
        ActorType::NotifierActor
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let heartbeat_handle = self.spawn_heartbeat(supervisor_tx.clone());
        info!("Starting Telegram Notification Service");

        loop {
            match self.rx.recv().await {
                Ok(msg) => {
                    if let Err(e) = self.bot.send_message(self.chat_id, msg).await {
                        error!("Failed to send Telegram message: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    error!("Telegram service lagged behind. Missed {} messages.", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Telegram notification channel closed. Stopping service.");
                    heartbeat_handle.abort();
                    supervisor_tx
                        .send(ControlMessage::Shutdown(self.name()))
                        .await?;
                    return Ok(());
                }
            }
        }
    }
}

/// Answers chat commands until the bot is stopped.
pub async fn run_dispatcher(bot: Bot, desk: Arc<TraderDesk>) {
    info!("Starting Telegram command dispatcher");
    let handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(answer);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![desk])
        .build()
        .dispatch()
        .await;
}

async fn answer(bot: Bot, msg: Message, cmd: Command, desk: Arc<TraderDesk>) -> ResponseResult<()> {
    let requester = msg
        .from
        .as_ref()
        .map(|user| user.id.0.to_string())
        .unwrap_or_else(|| msg.chat.id.0.to_string());

    let reply = desk.handle(cmd, &requester).await;
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}
