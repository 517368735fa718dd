//! Streaming chat exchange.
//!
//! One exchange replies with a placeholder card, consumes the backend's
//! fragment stream on a spawned task, patches the card on a fixed cadence,
//! and finishes with exactly one final patch. Three things can end it: the
//! stream closing cleanly, the stream failing (error or panic), or no
//! fragment arriving before the no-content timeout.

use crate::channels::cards::{self, TopicPhase};
use crate::channels::MessagingPlatform;
use crate::config::StreamConfig;
use crate::providers::{ChatMessage, ModelBackend};
use crate::session::SessionStore;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TIMEOUT_NOTICE: &str = "Request timeout";
const FAILURE_NOTICE: &str = "Chat failed";

/// Terminal state of a streaming exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Stream closed cleanly with a non-empty answer.
    Success(String),
    /// Backend error, panic, or a stream that closed without any text.
    Failure(String),
    /// No fragment arrived within the no-content window.
    Timeout,
}

impl ExchangeOutcome {
    fn final_text(&self) -> &str {
        match self {
            Self::Success(answer) => answer,
            Self::Failure(_) => FAILURE_NOTICE,
            Self::Timeout => TIMEOUT_NOTICE,
        }
    }
}

/// The single card an exchange renders into.
struct ExchangeCard {
    platform: Arc<dyn MessagingPlatform>,
    /// Message being answered; overflow cards reply to it.
    msg_id: String,
    card_id: String,
    new_topic: bool,
    finalized: AtomicBool,
}

impl ExchangeCard {
    fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    async fn update(&self, text: &str) {
        if self.is_finalized() {
            return;
        }
        let card = cards::topic_card(TopicPhase::Updating, self.new_topic, Some(text));
        if let Err(e) = self.platform.patch_card(&self.card_id, &card).await {
            tracing::debug!("Streaming card update failed: {e:#}");
        }
    }

    /// Render the terminal card. Only the first call patches; text beyond
    /// one card's capacity follows as extra reply cards.
    async fn finalize(&self, text: &str) -> bool {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return false;
        }
        let rendered = cards::answer_cards(TopicPhase::Final, self.new_topic, text);
        let Some((first, overflow)) = rendered.split_first() else {
            return true;
        };
        if let Err(e) = self.platform.patch_card(&self.card_id, first).await {
            tracing::warn!("Streaming final card update failed: {e:#}");
        }
        for card in overflow {
            if let Err(e) = self.platform.reply_card(&self.msg_id, card).await {
                tracing::warn!("Failed to send answer continuation for {}: {e:#}", self.msg_id);
            }
        }
        true
    }
}

/// Periodically patch the card with the accumulated answer until `stop` fires.
fn spawn_card_updater(
    card: Arc<ExchangeCard>,
    answer: Arc<Mutex<String>>,
    period: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut rendered_len = 0;

        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                _ = interval.tick() => {
                    let snapshot = answer.lock().clone();
                    if snapshot.is_empty() || snapshot.len() == rendered_len {
                        continue;
                    }
                    rendered_len = snapshot.len();
                    card.update(&snapshot).await;
                }
            }
        }
    })
}

/// Pull fragments from the backend and forward them in emission order.
fn spawn_fragment_pump(
    backend: Arc<dyn ModelBackend>,
    messages: Vec<ChatMessage>,
    temperature: f64,
    tx: mpsc::Sender<String>,
) -> JoinHandle<Result<(), String>> {
    tokio::spawn(async move {
        let mut stream = backend.stream_chat(&messages, temperature);
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    if tx.send(fragment).await.is_err() {
                        // Receiver gone: the exchange already timed out.
                        return Ok(());
                    }
                }
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(())
    })
}

/// Runs streaming exchanges against one platform and backend.
pub struct StreamingExchange {
    platform: Arc<dyn MessagingPlatform>,
    backend: Arc<dyn ModelBackend>,
    sessions: Arc<SessionStore>,
    update_interval: Duration,
    no_content_timeout: Duration,
}

impl StreamingExchange {
    pub fn new(
        platform: Arc<dyn MessagingPlatform>,
        backend: Arc<dyn ModelBackend>,
        sessions: Arc<SessionStore>,
        config: &StreamConfig,
    ) -> Self {
        Self {
            platform,
            backend,
            sessions,
            // tokio intervals reject a zero period
            update_interval: config.update_interval().max(Duration::from_millis(1)),
            no_content_timeout: config.no_content_timeout(),
        }
    }

    /// Answer `user_turn` given the session's `prior` history.
    ///
    /// On success the user turn and the answer are appended to the session;
    /// any other outcome leaves the session untouched.
    pub async fn run(
        &self,
        session_id: &str,
        msg_id: &str,
        prior: Vec<ChatMessage>,
        user_turn: ChatMessage,
        temperature: f64,
    ) -> ExchangeOutcome {
        let mut messages = prior;
        messages.push(user_turn.clone());
        let new_topic = messages.len() <= 3;

        let placeholder = cards::topic_card(TopicPhase::Processing, new_topic, None);
        let card_id = match self.platform.reply_card(msg_id, &placeholder).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Failed to send processing card for {msg_id}: {e:#}");
                return ExchangeOutcome::Failure(format!("placeholder card failed: {e}"));
            }
        };

        let card = Arc::new(ExchangeCard {
            platform: Arc::clone(&self.platform),
            msg_id: msg_id.to_string(),
            card_id,
            new_topic,
            finalized: AtomicBool::new(false),
        });
        let answer = Arc::new(Mutex::new(String::new()));
        let stop_updates = CancellationToken::new();
        let updater = spawn_card_updater(
            Arc::clone(&card),
            Arc::clone(&answer),
            self.update_interval,
            stop_updates.clone(),
        );

        let (tx, mut rx) = mpsc::channel::<String>(100);
        let pump = spawn_fragment_pump(Arc::clone(&self.backend), messages, temperature, tx);

        let no_content = tokio::time::sleep(self.no_content_timeout);
        tokio::pin!(no_content);
        let mut waiting_for_content = true;

        let timed_out = loop {
            tokio::select! {
                biased;
                fragment = rx.recv() => match fragment {
                    Some(fragment) => {
                        waiting_for_content = false;
                        answer.lock().push_str(&fragment);
                    }
                    None => break false,
                },
                () = &mut no_content, if waiting_for_content => break true,
            }
        };

        let outcome = if timed_out {
            // The pump keeps running detached; its result is discarded.
            drop(rx);
            ExchangeOutcome::Timeout
        } else {
            match pump.await {
                Ok(Ok(())) => {
                    let text = std::mem::take(&mut *answer.lock());
                    if text.trim().is_empty() {
                        ExchangeOutcome::Failure("stream closed without content".into())
                    } else {
                        ExchangeOutcome::Success(text)
                    }
                }
                Ok(Err(e)) => ExchangeOutcome::Failure(e),
                Err(join) if join.is_panic() => {
                    ExchangeOutcome::Failure("streaming task panicked".into())
                }
                Err(join) => ExchangeOutcome::Failure(join.to_string()),
            }
        };

        stop_updates.cancel();
        if let Err(e) = updater.await {
            tracing::error!("Streaming card updater crashed: {e}");
        }
        card.finalize(outcome.final_text()).await;

        match &outcome {
            ExchangeOutcome::Success(text) => {
                self.sessions
                    .append_messages(session_id, [user_turn, ChatMessage::assistant(text.clone())]);
                tracing::info!(session_id, msg_id, chars = text.chars().count(), "Streaming exchange completed");
            }
            ExchangeOutcome::Failure(reason) => {
                tracing::warn!(session_id, msg_id, "Streaming exchange failed: {reason}");
            }
            ExchangeOutcome::Timeout => {
                tracing::warn!(session_id, msg_id, "Streaming exchange timed out without content");
            }
        }

        outcome
    }
}
