// ── Onboarding gate ──
//
// Card-present eligibility check for the merchant site. Mandatory
// before every connection and payment attempt; skipping it is a
// correctness bug, not an optimization opportunity.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::CoreError;

/// Why the site cannot accept card-present payments yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotReadyReason {
    /// The payments plugin is missing or inactive on the site.
    PluginNotSetUp,
    /// The processor account exists but is still being reviewed.
    AccountUnderReview,
    /// The processor account has overdue verification requirements.
    AccountOverdueRequirements,
    /// The store country has no card-present support.
    CountryNotSupported,
    /// Card-present payments are disabled in store settings.
    PaymentsDisabled,
}

/// Readiness of the merchant site for card-present payments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(NotReadyReason),
}

/// What the presentation layer renders while the site is not ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingViewModel {
    pub reason: NotReadyReason,
    /// Settings page where the merchant can resolve the block.
    pub admin_url: Option<Url>,
}

/// The external eligibility service (network or configuration backed).
#[async_trait]
pub trait ReadinessProvider: Send + Sync {
    async fn check_readiness(&self) -> Result<Readiness, CoreError>;
}

/// Caching gate over a [`ReadinessProvider`].
///
/// A `Ready` result is cached for the process lifetime; not-ready
/// results are re-queried on [`refresh_if_necessary`](Self::refresh_if_necessary)
/// so the merchant can complete onboarding and proceed without
/// restarting. Waiters observe the cache through a watch channel.
pub struct OnboardingGate {
    provider: Arc<dyn ReadinessProvider>,
    cache: watch::Sender<Option<Readiness>>,
}

impl OnboardingGate {
    pub fn new(provider: Arc<dyn ReadinessProvider>) -> Self {
        let (cache, _) = watch::channel(None);
        Self { provider, cache }
    }

    /// Current readiness, querying the provider on a cold or
    /// not-ready cache.
    pub async fn check_readiness(&self) -> Result<Readiness, CoreError> {
        let cached = self.cache.borrow().clone();
        match cached {
            Some(Readiness::Ready) => Ok(Readiness::Ready),
            _ => self.query().await,
        }
    }

    /// Re-query the provider unless already known ready.
    pub async fn refresh_if_necessary(&self) -> Result<(), CoreError> {
        if matches!(*self.cache.borrow(), Some(Readiness::Ready)) {
            return Ok(());
        }
        self.query().await?;
        Ok(())
    }

    /// Subscribe to readiness changes (`None` until first checked).
    pub fn readiness_changed(&self) -> watch::Receiver<Option<Readiness>> {
        self.cache.subscribe()
    }

    /// Suspend until the site becomes ready or the session is
    /// cancelled. Returns `false` on cancellation.
    pub(crate) async fn wait_until_ready(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.cache.subscribe();
        loop {
            if matches!(*rx.borrow_and_update(), Some(Readiness::Ready)) {
                return true;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    async fn query(&self) -> Result<Readiness, CoreError> {
        let readiness = self.provider.check_readiness().await?;
        debug!(?readiness, "readiness checked");
        self.cache.send_replace(Some(readiness.clone()));
        Ok(readiness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        readiness: std::sync::Mutex<Readiness>,
    }

    impl CountingProvider {
        fn new(readiness: Readiness) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                readiness: std::sync::Mutex::new(readiness),
            })
        }

        fn set(&self, readiness: Readiness) {
            *self.readiness.lock().expect("lock") = readiness;
        }
    }

    #[async_trait]
    impl ReadinessProvider for CountingProvider {
        async fn check_readiness(&self) -> Result<Readiness, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.readiness.lock().expect("lock").clone())
        }
    }

    #[tokio::test]
    async fn ready_result_is_cached() {
        let provider = CountingProvider::new(Readiness::Ready);
        let gate = OnboardingGate::new(Arc::clone(&provider) as Arc<dyn ReadinessProvider>);

        assert_eq!(gate.check_readiness().await.unwrap(), Readiness::Ready);
        assert_eq!(gate.check_readiness().await.unwrap(), Readiness::Ready);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_ready_is_requeried_on_refresh() {
        let provider = CountingProvider::new(Readiness::NotReady(NotReadyReason::PluginNotSetUp));
        let gate = OnboardingGate::new(Arc::clone(&provider) as Arc<dyn ReadinessProvider>);

        assert!(matches!(
            gate.check_readiness().await.unwrap(),
            Readiness::NotReady(_)
        ));

        provider.set(Readiness::Ready);
        gate.refresh_if_necessary().await.unwrap();
        assert_eq!(gate.check_readiness().await.unwrap(), Readiness::Ready);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn waiters_resume_when_readiness_flips() {
        let provider = CountingProvider::new(Readiness::NotReady(NotReadyReason::PaymentsDisabled));
        let gate = Arc::new(OnboardingGate::new(
            Arc::clone(&provider) as Arc<dyn ReadinessProvider>
        ));
        gate.check_readiness().await.unwrap();

        let cancel = CancellationToken::new();
        let waiter = {
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.wait_until_ready(&cancel).await })
        };
        tokio::task::yield_now().await;

        provider.set(Readiness::Ready);
        gate.refresh_if_necessary().await.unwrap();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_waiters_return_false() {
        let provider = CountingProvider::new(Readiness::NotReady(NotReadyReason::PaymentsDisabled));
        let gate = Arc::new(OnboardingGate::new(
            Arc::clone(&provider) as Arc<dyn ReadinessProvider>
        ));
        gate.check_readiness().await.unwrap();

        let cancel = CancellationToken::new();
        let waiter = {
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.wait_until_ready(&cancel).await })
        };
        tokio::task::yield_now().await;

        cancel.cancel();
        assert!(!waiter.await.unwrap());
    }
}
