//! Fallback dispatcher: one random pick, at most one random retry

use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::LlmError;

use super::registry::{EligiblePool, PoolEntry};
use super::settings::DEFAULT_TIMEOUT_SECS;
use super::types::GenerationResult;

/// Dispatches a prompt across an [`EligiblePool`]
#[derive(Debug, Clone)]
pub struct Dispatcher {
    /// Deadline for each individual provider invocation
    deadline: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

impl Dispatcher {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Invoke a uniformly random pool member. On failure, invoke one random member among the
    /// rest. If that also fails, or nothing else is eligible, the first error is returned.
    pub async fn dispatch(
        &self,
        pool: &EligiblePool,
        prompt: &str,
    ) -> Result<GenerationResult, LlmError> {
        let entries = pool.entries();
        let selected = &entries[pick(entries.len())];
        info!(
            "Selected provider {} ({})",
            selected.id(),
            selected.source()
        );

        let first_error = match self.attempt(selected, prompt).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };
        warn!(
            "Provider {} ({}) failed: {}",
            selected.id(),
            selected.source(),
            first_error
        );

        let backups = pool.without(selected.id());
        if backups.is_empty() {
            debug!("No backup provider available");
            return Err(first_error);
        }

        let backup = backups[pick(backups.len())];
        info!(
            "Falling back from {} to {} ({})",
            selected.id(),
            backup.id(),
            backup.source()
        );

        match self.attempt(backup, prompt).await {
            Ok(result) => {
                info!("Request succeeded on fallback provider {}", backup.id());
                Ok(result)
            }
            Err(e) => {
                warn!(
                    "Fallback provider {} ({}) failed: {}",
                    backup.id(),
                    backup.source(),
                    e
                );
                Err(first_error)
            }
        }
    }

    /// One invocation under the deadline; an elapsed deadline is a status-less backend failure
    async fn attempt(
        &self,
        entry: &PoolEntry,
        prompt: &str,
    ) -> Result<GenerationResult, LlmError> {
        debug!(
            "Trying provider {} (model {}, {})",
            entry.id(),
            entry.provider().model(),
            entry.source()
        );
        match tokio::time::timeout(self.deadline, entry.invoke(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Backend {
                provider: entry.id(),
                status: None,
                detail: format!("deadline of {:?} exceeded", self.deadline),
            }),
        }
    }
}

/// Uniform index in `0..len`; `len` is never zero for a pool
fn pick(len: usize) -> usize {
    rand::thread_rng().gen_range(0..len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use super::super::types::{LlmProvider, ProviderId};

    type CallLog = Arc<Mutex<Vec<ProviderId>>>;

    enum Behaviour {
        Succeed,
        FailWith(u16),
        Hang,
    }

    /// Fake provider recording every call into a shared log
    struct FakeProvider {
        id: ProviderId,
        behaviour: Behaviour,
        calls: CallLog,
    }

    #[async_trait]
    impl LlmProvider for FakeProvider {
        fn id(&self) -> ProviderId {
            self.id
        }
        fn model(&self) -> &str {
            "fake-model"
        }
        async fn generate(
            &self,
            _prompt: &str,
            _credential: Option<&str>,
        ) -> Result<GenerationResult, LlmError> {
            self.calls.lock().unwrap().push(self.id);
            match self.behaviour {
                Behaviour::Succeed => Ok(GenerationResult {
                    text: format!("from {}", self.id),
                    model: self.id.to_string(),
                }),
                Behaviour::FailWith(status) => Err(LlmError::Backend {
                    provider: self.id,
                    status: Some(status),
                    detail: "boom".to_string(),
                }),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    unreachable!("deadline should have fired")
                }
            }
        }
    }

    fn pool(spec: Vec<(ProviderId, Behaviour)>) -> (EligiblePool, CallLog) {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let entries = spec
            .into_iter()
            .map(|(id, behaviour)| {
                PoolEntry::new(
                    Arc::new(FakeProvider {
                        id,
                        behaviour,
                        calls: calls.clone(),
                    }),
                    None,
                )
            })
            .collect();
        (EligiblePool::new(entries).unwrap(), calls)
    }

    fn calls(log: &CallLog) -> Vec<ProviderId> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_single_provider_success() {
        let (pool, log) = pool(vec![(ProviderId::Qwen, Behaviour::Succeed)]);
        let result = Dispatcher::default().dispatch(&pool, "hi").await.unwrap();
        assert_eq!(result.text, "from qwen");
        assert_eq!(calls(&log), vec![ProviderId::Qwen]);
    }

    #[tokio::test]
    async fn test_single_failing_provider_is_not_retried() {
        let (pool, log) = pool(vec![(ProviderId::Relay, Behaviour::FailWith(500))]);
        let err = Dispatcher::default().dispatch(&pool, "hi").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.provider(), Some(ProviderId::Relay));
        assert_eq!(calls(&log), vec![ProviderId::Relay]);
    }

    #[tokio::test]
    async fn test_two_failures_surface_first_error() {
        for _ in 0..20 {
            let (pool, log) = pool(vec![
                (ProviderId::DeepSeek, Behaviour::FailWith(502)),
                (ProviderId::Zhipu, Behaviour::FailWith(401)),
            ]);
            let err = Dispatcher::default().dispatch(&pool, "hi").await.unwrap_err();
            let log = calls(&log);
            assert_eq!(log.len(), 2);
            assert_ne!(log[0], log[1]);
            assert_eq!(err.provider(), Some(log[0]));
        }
    }

    #[tokio::test]
    async fn test_exactly_one_retry_with_larger_pool() {
        for _ in 0..20 {
            let (pool, log) = pool(vec![
                (ProviderId::Gemini, Behaviour::FailWith(500)),
                (ProviderId::Qwen, Behaviour::FailWith(500)),
                (ProviderId::OpenAi, Behaviour::FailWith(500)),
                (ProviderId::Zhipu, Behaviour::FailWith(500)),
            ]);
            assert!(Dispatcher::default().dispatch(&pool, "hi").await.is_err());
            let log = calls(&log);
            assert_eq!(log.len(), 2);
            assert_ne!(log[0], log[1]);
        }
    }

    #[tokio::test]
    async fn test_fallback_recovers_from_failure() {
        for _ in 0..20 {
            let (pool, log) = pool(vec![
                (ProviderId::DeepSeek, Behaviour::FailWith(503)),
                (ProviderId::OpenAi, Behaviour::Succeed),
            ]);
            let result = Dispatcher::default().dispatch(&pool, "hi").await.unwrap();
            assert_eq!(result.text, "from openai");
            let log = calls(&log);
            assert_eq!(log.last(), Some(&ProviderId::OpenAi));
            assert!(log.len() <= 2);
        }
    }

    #[tokio::test]
    async fn test_deadline_is_backend_error_without_status() {
        let (pool, log) = pool(vec![(ProviderId::Gemini, Behaviour::Hang)]);
        let err = Dispatcher::new(Duration::from_millis(50))
            .dispatch(&pool, "hi")
            .await
            .unwrap_err();
        match err {
            LlmError::Backend {
                provider, status, ..
            } => {
                assert_eq!(provider, ProviderId::Gemini);
                assert_eq!(status, None);
            }
            other => panic!("expected backend error, got {other:?}"),
        }
        assert_eq!(calls(&log), vec![ProviderId::Gemini]);
    }

    #[tokio::test]
    async fn test_deadline_triggers_fallback() {
        let (pool, _log) = pool(vec![
            (ProviderId::Relay, Behaviour::Hang),
            (ProviderId::Zhipu, Behaviour::Succeed),
        ]);
        let result = Dispatcher::new(Duration::from_millis(50))
            .dispatch(&pool, "hi")
            .await
            .unwrap();
        assert_eq!(result.text, "from zhipu");
    }

    #[tokio::test]
    async fn test_selection_spreads_across_pool() {
        let (pool, log) = pool(vec![
            (ProviderId::Gemini, Behaviour::Succeed),
            (ProviderId::Qwen, Behaviour::Succeed),
            (ProviderId::Zhipu, Behaviour::Succeed),
        ]);
        let dispatcher = Dispatcher::default();
        for _ in 0..200 {
            dispatcher.dispatch(&pool, "hi").await.unwrap();
        }
        let seen: HashSet<ProviderId> = calls(&log).into_iter().collect();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_pick_in_range() {
        for len in 1..10 {
            assert!(pick(len) < len);
        }
    }
}
