//! Notification fan-out: bounded-concurrency delivery to the recipient set
//! with a single jittered retry per transient failure.

pub mod format;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::warn;

use crate::config::OUTBOUND_TIMEOUT_SECS;
use crate::error::Result;
pub use format::Message;

/// Chat-bot transport. Fire-and-forget at the pipeline level, but errors
/// surface so the fan-out can count successes and retry transients.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(&self, recipient_id: &str, message: &Message) -> Result<()>;
}

/// Deliver `message` to every recipient, at most `concurrency` sends in
/// flight. Returns the number of recipients that accepted the message —
/// the caller treats ≥ 1 as a successful fan-out.
pub async fn fan_out<N: Notifier>(
    notifier: Arc<N>,
    recipients: Vec<String>,
    message: Arc<Message>,
    concurrency: usize,
) -> usize {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for chat_id in recipients {
        let semaphore = Arc::clone(&semaphore);
        let notifier = Arc::clone(&notifier);
        let message = Arc::clone(&message);
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return false;
            };
            send_with_retry(notifier.as_ref(), &chat_id, &message).await
        });
    }

    let mut accepted = 0;
    while let Some(joined) = tasks.join_next().await {
        if matches!(joined, Ok(true)) {
            accepted += 1;
        }
    }
    accepted
}

/// One attempt plus one jittered retry on transient failure. Permanent
/// rejections (bad chat id, blocked bot) are not retried.
async fn send_with_retry<N: Notifier>(notifier: &N, chat_id: &str, message: &Message) -> bool {
    let deadline = Duration::from_secs(OUTBOUND_TIMEOUT_SECS);

    match timeout(deadline, notifier.send(chat_id, message)).await {
        Ok(Ok(())) => return true,
        Ok(Err(e)) if !e.is_transient() => {
            warn!(chat_id, "notification permanently rejected: {e}");
            return false;
        }
        Ok(Err(e)) => warn!(chat_id, "notification send failed, retrying once: {e}"),
        Err(_) => warn!(chat_id, "notification send timed out, retrying once"),
    }

    let jitter_ms = 250 + (rand::random::<f64>() * 500.0) as u64;
    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

    match timeout(deadline, notifier.send(chat_id, message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(chat_id, "notification retry failed, deferring to next cycle: {e}");
            false
        }
        Err(_) => {
            warn!(chat_id, "notification retry timed out, deferring to next cycle");
            false
        }
    }
}
