//! Long-polling bot built on top of [`Client`].
//!
//! The loop fetches updates with `getUpdates`, hands every message to the
//! registered handler in `update_id` order and advances its cursor past each
//! one. Handlers run inline on the loop's task: a slow handler holds back
//! the next poll, which keeps delivery ordered without an internal queue.

use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::BotConfig;
use super::Client;
use super::Error;
use super::Message;
use super::ReqwestTransport;
use super::Result;
use super::Transport;
use super::Update;
use super::User;

/// Lifecycle of the poll loop. `Stopped` and `Failed` are final.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
    Failed,
}

/// A message handler. It gets the bot back so it can reply or stop the
/// loop.
pub type Handler<S> = Arc<dyn for<'a> Fn(&'a Bot<S>, Message) -> BoxFuture<'a, ()> + Send + Sync>;

/// Chat ids are never zero, so zero marks an unset chat target.
const NO_CHAT: i64 = 0;

pub struct Bot<S> {
    client: Client<S>,
    chat_id: AtomicI64,
    handler: Mutex<Option<Handler<S>>>,
    cursor: Mutex<Option<i64>>,
    state: Mutex<LoopState>,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks the loop stopped if the `run()` future is dropped mid-poll.
struct RunGuard<'a> {
    state: &'a Mutex<LoopState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        if *state == LoopState::Running {
            warn!("run future dropped, bot stopped");
            *state = LoopState::Stopped;
        }
    }
}

impl Bot<ReqwestTransport> {
    pub fn from_config(config: BotConfig) -> Result<Bot<ReqwestTransport>> {
        Ok(Bot::new(Client::from_config(config)?))
    }
}

impl<S> Bot<S>
where
    S: Transport,
{
    pub fn new(client: Client<S>) -> Bot<S> {
        Bot {
            client,
            chat_id: AtomicI64::new(NO_CHAT),
            handler: Mutex::new(None),
            cursor: Mutex::new(None),
            state: Mutex::new(LoopState::Idle),
            cancel: CancellationToken::new(),
        }
    }

    pub fn client(&self) -> &Client<S> {
        &self.client
    }

    /// Basic information about the bot itself.
    pub async fn me(&self) -> Result<User> {
        self.client.get_me().await
    }

    /// Sets the chat that [`send_message`](Bot::send_message) targets when
    /// no chat id is given.
    pub fn set_chat_id(&self, chat_id: i64) {
        self.chat_id.store(chat_id, Ordering::SeqCst);
    }

    /// The current chat target: the last explicitly set chat, or the chat
    /// of the most recent inbound message.
    pub fn chat_id(&self) -> Option<i64> {
        match self.chat_id.load(Ordering::SeqCst) {
            NO_CHAT => None,
            id => Some(id),
        }
    }

    /// Sends `text` to `chat_id`, or to the current chat target when
    /// `chat_id` is `None`. An explicit chat id leaves the target untouched.
    pub async fn send_message(&self, text: &str, chat_id: Option<i64>) -> Result<Message> {
        let target = chat_id.or_else(|| self.chat_id()).ok_or(Error::NoChatTarget)?;
        self.client.send_message(text, target).await
    }

    /// Registers the function invoked for every inbound message, replacing
    /// any previous one.
    ///
    /// ```no_run
    /// # use futures::FutureExt;
    /// # use simple_telegram_bot::tg::{Bot, BotConfig};
    /// # fn demo() -> simple_telegram_bot::tg::Result<()> {
    /// let bot = Bot::from_config(BotConfig::new("123:abc"))?;
    /// bot.set_message_handler(|bot, message| {
    ///     async move {
    ///         if message.text.as_deref() == Some("Hello") {
    ///             let _ = bot.send_message("Hi!", None).await;
    ///         }
    ///     }
    ///     .boxed()
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn set_message_handler<F>(&self, handler: F)
    where
        F: for<'a> Fn(&'a Bot<S>, Message) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        *lock(&self.handler) = Some(Arc::new(handler));
    }

    pub fn state(&self) -> LoopState {
        *lock(&self.state)
    }

    /// The next update id the loop will ask for, if any update has been
    /// consumed yet.
    pub fn cursor(&self) -> Option<i64> {
        *lock(&self.cursor)
    }

    /// Asks the loop to stop. An in-flight poll or backoff is abandoned
    /// right away. Called from a handler, the rest of the current batch is
    /// still delivered and no further poll is issued.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        match *state {
            LoopState::Idle | LoopState::Running => {
                info!("stopping bot");
                *state = LoopState::Stopped;
                self.cancel.cancel();
            }
            LoopState::Stopped | LoopState::Failed => {
                debug!(state = ?*state, "stop requested on finished bot");
            }
        }
    }

    /// Polls for messages until [`stop`](Bot::stop) is called or polling
    /// fails for good. Returns the error that ended the loop.
    ///
    /// Calling this on a bot that is already running or finished logs a
    /// warning and returns immediately. A panicking handler leaves the bot
    /// `Failed` and the panic propagates to the caller.
    pub async fn run(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if *state != LoopState::Idle {
                warn!(state = ?*state, "bot already started, ignoring run");
                return Ok(());
            }
            *state = LoopState::Running;
        }

        let _guard = RunGuard { state: &self.state };

        info!(
            poll_timeout = ?self.client.config().poll_timeout,
            max_retries = self.client.config().retry.max_retries,
            "waiting for messages"
        );
        let result = match AssertUnwindSafe(self.poll()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                *lock(&self.state) = LoopState::Failed;
                error!("message handler panicked, bot failed");
                panic::resume_unwind(panic);
            }
        };

        let mut state = lock(&self.state);
        match &result {
            Ok(()) => {
                *state = LoopState::Stopped;
                info!("bot stopped");
            }
            // A stop that raced the final failed poll still wins.
            Err(e) if self.cancel.is_cancelled() => {
                *state = LoopState::Stopped;
                warn!(error = %e, "bot stopped while polling failed");
            }
            Err(e) => {
                *state = LoopState::Failed;
                error!(error = %e, "bot failed");
            }
        }
        result
    }

    fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    async fn poll(&self) -> Result<()> {
        let config = self.client.config();
        let mut failures: u32 = 0;

        while self.is_running() {
            let offset = self.cursor();

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                fetched = self.client.get_updates(offset, config.poll_timeout) => fetched,
            };

            let response = match fetched {
                Ok(response) => {
                    failures = 0;
                    response
                }
                Err(e) if e.is_retryable() && failures < config.retry.max_retries => {
                    failures += 1;
                    let delay = config
                        .retry
                        .backoff(failures)
                        .max(e.retry_after().unwrap_or_default());
                    warn!(
                        error = %e,
                        attempt = failures,
                        max_retries = config.retry.max_retries,
                        "poll failed, retrying in {:?}",
                        delay
                    );

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !response.ok {
                debug!(description = ?response.description, "getUpdates not ok");
                continue;
            }

            let updates = response.result.unwrap_or_default();
            if updates.is_empty() {
                continue;
            }

            self.dispatch(updates).await;
        }

        Ok(())
    }

    /// Delivers a batch in ascending `update_id` order, skipping anything
    /// below the cursor.
    async fn dispatch(&self, mut updates: Vec<Update>) {
        updates.sort_by_key(|update| update.update_id);
        debug!(count = updates.len(), "received updates");

        for update in updates {
            let update_id = update.update_id;
            if self.cursor().is_some_and(|cursor| update_id < cursor) {
                debug!(update_id, "skipping already delivered update");
                continue;
            }

            if let Some(message) = update.message {
                self.chat_id.store(message.chat.id, Ordering::SeqCst);

                let handler = lock(&self.handler).clone();
                match handler {
                    Some(handler) => handler(self, message).await,
                    None => debug!(update_id, "no message handler set"),
                }
            } else {
                debug!(update_id, "update carries no message");
            }

            *lock(&self.cursor) = Some(update_id.saturating_add(1));
        }
    }
}
