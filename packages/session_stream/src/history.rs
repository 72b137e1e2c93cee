//! Cache-first conversation history.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::cache::SessionMessageCache;
use crate::config::CacheConfig;
use crate::error::Error;
use crate::store::SessionMessages;
use crate::types::{Message, SessionId};

/// Fetches a conversation's messages from the persistence layer.
#[async_trait]
pub trait MessageFetcher: Send + Sync {
    async fn fetch_messages(&self, session: &SessionId) -> anyhow::Result<Vec<Message>>;
}

pub struct HistoryLoader {
    fetcher: Arc<dyn MessageFetcher>,
    cache: Mutex<SessionMessageCache>,
}

impl HistoryLoader {
    pub fn new(fetcher: Arc<dyn MessageFetcher>, config: CacheConfig) -> Self {
        Self {
            fetcher,
            cache: Mutex::new(SessionMessageCache::new(config)),
        }
    }

    /// Cached history when fresh, otherwise a fetch that refills the cache.
    pub async fn load(&self, session: &SessionId) -> Result<Vec<Message>, Error> {
        let cached = self.cache().get(session).map(<[Message]>::to_vec);
        if let Some(messages) = cached {
            debug!(session = %session, count = messages.len(), "history served from cache");
            return Ok(messages);
        }
        self.refresh(session).await
    }

    /// Fetch regardless of the cache and store the result.
    pub async fn refresh(&self, session: &SessionId) -> Result<Vec<Message>, Error> {
        let messages = match self.fetcher.fetch_messages(session).await {
            Ok(messages) => messages,
            Err(err) => {
                warn!(session = %session, error = %err, "history fetch failed");
                return Err(Error::Fetch {
                    session: session.clone(),
                    reason: format!("{err:#}"),
                });
            }
        };
        debug!(session = %session, count = messages.len(), "history fetched");
        self.cache().set(session.clone(), messages.clone());
        Ok(messages)
    }

    /// Load `session` and replace the contents of `target` with it.
    pub async fn load_into(&self, session: &SessionId, target: &SessionMessages) -> Result<usize, Error> {
        let messages = self.load(session).await?;
        let count = messages.len();
        target.hydrate(messages);
        Ok(count)
    }

    pub fn invalidate(&self, session: &SessionId) -> bool {
        self.cache().invalidate(session)
    }

    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    pub fn cached_sessions(&self) -> usize {
        self.cache().len()
    }

    fn cache(&self) -> MutexGuard<'_, SessionMessageCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRole;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MessageFetcher for CountingFetcher {
        async fn fetch_messages(&self, session: &SessionId) -> anyhow::Result<Vec<Message>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("connection reset").context("GET /messages"));
            }
            Ok(vec![Message::new(
                format!("{session}-{call}"),
                MessageRole::Assistant,
                "hello",
            )])
        }
    }

    fn loader(fetcher: Arc<CountingFetcher>) -> HistoryLoader {
        HistoryLoader::new(
            fetcher,
            CacheConfig {
                ttl: Duration::from_secs(60),
                max_entries: 4,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn second_load_hits_cache_until_expiry() {
        let fetcher = Arc::new(CountingFetcher::default());
        let loader = loader(fetcher.clone());
        let session = SessionId::from("s1");

        let first = loader.load(&session).await.unwrap();
        let second = loader.load(&session).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let third = loader.load(&session).await.unwrap();
        assert_eq!(third[0].id, "s1-1");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_bypasses_cache() {
        let fetcher = Arc::new(CountingFetcher::default());
        let loader = loader(fetcher.clone());
        let session = SessionId::from("s1");

        loader.load(&session).await.unwrap();
        let refreshed = loader.refresh(&session).await.unwrap();
        assert_eq!(refreshed[0].id, "s1-1");
        assert_eq!(loader.load(&session).await.unwrap()[0].id, "s1-1");
    }

    #[tokio::test]
    async fn fetch_errors_carry_context() {
        let fetcher = Arc::new(CountingFetcher {
            fail: true,
            ..Default::default()
        });
        let loader = loader(fetcher);

        let err = loader.load(&SessionId::from("s1")).await.unwrap_err();
        assert_eq!(err.error_code(), "fetch_failed");
        assert!(err.to_string().contains("GET /messages: connection reset"));
        assert_eq!(loader.cached_sessions(), 0);
    }

    #[tokio::test]
    async fn load_into_hydrates_store() {
        let loader = loader(Arc::new(CountingFetcher::default()));
        let messages = SessionMessages::new();
        messages.hydrate(vec![Message::new("stale", MessageRole::User, "old")]);

        let count = loader
            .load_into(&SessionId::from("s2"), &messages)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(messages.snapshot()[0].id, "s2-0");
        assert!(loader.invalidate(&SessionId::from("s2")));
    }
}
