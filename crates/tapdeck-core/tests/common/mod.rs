//! Shared harness for the orchestration integration tests.
//!
//! Builds a [`CardPaymentService`] over the scriptable simulated reader
//! service and provides helpers for consuming the lossless event feed.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;

use tapdeck_core::{
    CardPaymentService, CoreError, CurrencySettings, InMemoryKnownReaderStore, KnownReaderStore,
    NoopAnalyticsSink, Order, PaymentEvent, PaymentsConfig, Readiness, ReadinessProvider,
};
use tapdeck_hw::sim::SimulatedReaderService;
use tapdeck_hw::{Reader, ReaderKind};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

// ── Readiness stub ───────────────────────────────────────────────────

pub struct StubReadiness {
    state: Mutex<Readiness>,
}

impl StubReadiness {
    pub fn ready() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Readiness::Ready),
        })
    }

    pub fn not_ready(reason: tapdeck_core::NotReadyReason) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Readiness::NotReady(reason)),
        })
    }

    pub fn set(&self, readiness: Readiness) {
        *self.state.lock().expect("lock") = readiness;
    }
}

#[async_trait]
impl ReadinessProvider for StubReadiness {
    async fn check_readiness(&self) -> Result<Readiness, CoreError> {
        Ok(self.state.lock().expect("lock").clone())
    }
}

// ── Service builders ─────────────────────────────────────────────────

pub fn service_over(sim: Arc<SimulatedReaderService>) -> CardPaymentService {
    service_with(sim, StubReadiness::ready(), Arc::new(InMemoryKnownReaderStore::new()))
}

pub fn service_with(
    sim: Arc<SimulatedReaderService>,
    readiness: Arc<StubReadiness>,
    known_readers: Arc<dyn KnownReaderStore>,
) -> CardPaymentService {
    CardPaymentService::new(
        sim,
        readiness,
        known_readers,
        Arc::new(NoopAnalyticsSink),
        PaymentsConfig::new(42, CurrencySettings::usd()),
    )
}

// ── Fixtures ─────────────────────────────────────────────────────────

pub fn bluetooth_reader(id: &str) -> Reader {
    Reader::new(id, ReaderKind::BluetoothExternal).with_battery(0.8)
}

pub fn built_in_reader() -> Reader {
    Reader::new("built-in", ReaderKind::BuiltIn)
}

pub fn order() -> Order {
    Order {
        id: 1067,
        number: "1067".into(),
        total: dec!(12.50),
        currency: "usd".into(),
    }
}

// ── Event feed helpers ───────────────────────────────────────────────

/// Receive events until one matches, returning it. Panics after a
/// timeout so a broken flow fails the test instead of hanging it.
pub async fn wait_for(
    feed: &mut broadcast::Receiver<PaymentEvent>,
    description: &str,
    mut matches: impl FnMut(&PaymentEvent) -> bool,
) -> PaymentEvent {
    let fut = async {
        loop {
            let event = feed.recv().await.expect("event feed closed");
            if matches(&event) {
                return event;
            }
        }
    };
    match tokio::time::timeout(EVENT_TIMEOUT, fut).await {
        Ok(event) => event,
        Err(_) => panic!("timed out waiting for {description}"),
    }
}

/// Drain every event currently queued on the feed.
pub fn drain(feed: &mut broadcast::Receiver<PaymentEvent>) -> Vec<PaymentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = feed.try_recv() {
        events.push(event);
    }
    events
}
