use std::sync::Arc;

use futures::FutureExt;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use simple_telegram_bot::tg;

/// Echoes every text message back to the chat it came from, until Ctrl-C.
#[tokio::main]
async fn main() -> tg::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = tg::BotConfig::from_env()?;
    info!(config = ?config, "loaded config");

    let bot = Arc::new(tg::Bot::from_config(config)?);
    let me = bot.me().await?;
    info!(id = me.id, username = ?me.username, "authenticated as {}", me.first_name);

    bot.set_message_handler(|bot, message| {
        async move {
            let Some(text) = message.text else {
                return;
            };
            if let Err(e) = bot.send_message(&text, None).await {
                warn!(error = %e, chat_id = message.chat.id, "echo failed");
            }
        }
        .boxed()
    });

    let stopper = Arc::clone(&bot);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    bot.run().await
}
