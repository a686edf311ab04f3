//! Card-present payment orchestration engine.
//!
//! Discovers, connects to, and drives a physical card reader through
//! the lifecycle of a single payment or reader-management operation,
//! exposing one ordered event stream a presentation layer can render
//! without knowing device-protocol details:
//!
//! - **[`CardPaymentService`]** — the façade and only entry point:
//!   [`connect_reader`](CardPaymentService::connect_reader),
//!   [`collect_payment`](CardPaymentService::collect_payment),
//!   [`cancel_payment`](CardPaymentService::cancel_payment),
//!   [`disconnect_reader`](CardPaymentService::disconnect_reader).
//!   Owns the single in-flight session invariant and the authoritative
//!   [`ConnectionStatus`].
//!
//! - **[`PaymentEventStream`]** — replay-latest subscription to
//!   [`PaymentEvent`]s. Every alert carries the handles needed to
//!   retry or cancel that specific step, so the UI never reaches back
//!   into device code.
//!
//! - **[`retry::classify`]** — the pure, total retry classifier mapping
//!   every device error to a [`RetryApproach`].
//!
//! - **Collaborator traits** — [`ReadinessProvider`] (onboarding),
//!   [`KnownReaderStore`] (reader persistence), [`AnalyticsSink`]
//!   (fire-and-forget events); the device itself is a
//!   [`tapdeck_hw::CardReaderService`].

pub mod analytics;
pub mod config;
pub mod currency;
pub mod error;
pub mod events;
pub mod known_readers;
pub mod model;
pub mod onboarding;
pub mod retry;

mod connection;
mod payment;
mod preflight;
mod service;

// ── Primary re-exports ──────────────────────────────────────────────
pub use analytics::{AnalyticsEvent, AnalyticsSink, NoopAnalyticsSink, TracingAnalyticsSink};
pub use config::{CurrencySettings, PaymentsConfig};
pub use error::CoreError;
pub use events::{
    ActionHandle, AlertDetail, PaymentEvent, PaymentEventStream, PaymentRetryAction,
    SelectReaderHandle,
};
pub use known_readers::{InMemoryKnownReaderStore, JsonFileKnownReaderStore, KnownReaderStore};
pub use model::{
    CancellationSource, ConnectionResult, ConnectionStatus, Order, PaymentOutcome, SessionKind,
};
pub use onboarding::{
    NotReadyReason, OnboardingGate, OnboardingViewModel, Readiness, ReadinessProvider,
};
pub use retry::RetryApproach;
pub use service::CardPaymentService;

// Re-export the hardware-facing types callers interact with.
pub use tapdeck_hw::{
    CardInputMethods, DeviceError, DiscoveryMethod, PaymentReceipt, Reader, ReaderId, ReaderKind,
    ServiceError,
};
