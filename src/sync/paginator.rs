use super::source::{FetchedMessage, HistorySource};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Upstream page size limit; pages are requested newest first.
pub const PAGE_SIZE: u8 = 100;

/// Fixed-interval gate between successive upstream requests. A courtesy
/// toward the platform's rate limiter, not an adaptive backoff.
pub struct RequestPacer {
    delay: Duration,
}

impl RequestPacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub async fn wait(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Collects every in-scope message of one channel or thread by walking the
/// `before` cursor from the newest page backwards.
///
/// With a cutoff set, messages created at or before it are filtered out and
/// pagination stops at the first page that is entirely at or before it. A
/// fetch error ends the walk early with whatever was accumulated; a partial
/// page set is preferable to aborting the surrounding sync.
pub async fn fetch_channel_history(
    source: &dyn HistorySource,
    pacer: &RequestPacer,
    channel_id: &str,
    cutoff: Option<DateTime<Utc>>,
) -> Vec<FetchedMessage> {
    let mut collected = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut last_id: Option<String> = None;

    loop {
        let page = match source
            .messages_before(channel_id, last_id.as_deref(), PAGE_SIZE)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    "History fetch for channel {} failed after {} messages, keeping partial result: {}",
                    channel_id,
                    collected.len(),
                    e
                );
                return collected;
            }
        };

        if page.is_empty() {
            break;
        }

        for message in &page {
            let in_scope = cutoff.map_or(true, |c| message.created_at > c);
            if in_scope && seen.insert(message.id.clone()) {
                collected.push(message.clone());
            }
        }
        debug!(
            "Fetched {} messages so far from channel {}",
            collected.len(),
            channel_id
        );

        // Pages run newest to oldest, so once a whole page sits at or before
        // the cutoff everything further back is out of scope too.
        if let Some(c) = cutoff {
            if page.iter().all(|m| m.created_at <= c) {
                break;
            }
        }

        last_id = page.last().map(|m| m.id.clone());

        if page.len() < PAGE_SIZE as usize {
            break;
        }
        pacer.wait().await;
    }

    collected
}
