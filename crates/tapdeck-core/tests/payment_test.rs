//! Integration tests for the payment session: validation, collection,
//! capture, cancellation, the single-session invariant, and the
//! onboarding gate.

mod common;

use std::sync::Arc;

use common::{
    StubReadiness, bluetooth_reader, drain, order, service_over, service_with, wait_for,
};
use rust_decimal_macros::dec;
use tapdeck_core::{
    AlertDetail, CoreError, InMemoryKnownReaderStore, NotReadyReason, Order, PaymentEvent,
    PaymentOutcome, PaymentRetryAction, Readiness,
};
use tapdeck_hw::sim::{CaptureScript, CollectScript, ConnectScript, SimulatedReaderService};
use tapdeck_hw::{CardInputMethods, DeviceError, DiscoveryMethod, UpdateKind};

fn await_card() -> CollectScript {
    CollectScript::AwaitCard {
        input_methods: CardInputMethods::TAP | CardInputMethods::INSERT,
        messages: vec![],
    }
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test]
async fn payment_completes_end_to_end() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .build();
    let service = service_over(sim);
    let mut feed = service.events();

    let outcome = service
        .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
        .await
        .unwrap();

    let PaymentOutcome::Success(receipt) = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(receipt.amount, dec!(12.50));

    let events = drain(&mut feed);
    for expected in ["validating", "preparing", "tap", "processing", "success"] {
        let found = events.iter().any(|e| match (expected, e.alert()) {
            ("validating", Some(AlertDetail::ValidatingOrder)) => true,
            ("preparing", Some(AlertDetail::PreparingForPayment)) => true,
            ("tap", Some(AlertDetail::TapSwipeOrInsertCard { .. })) => true,
            ("processing", Some(AlertDetail::Processing)) => true,
            ("success", Some(AlertDetail::PaymentSuccess { .. })) => true,
            _ => false,
        });
        assert!(found, "missing {expected} in {events:?}");
    }

    // Acknowledging success clears the stream to idle.
    let success = events
        .iter()
        .find_map(|e| match e.alert() {
            Some(AlertDetail::PaymentSuccess { done }) => Some(done.clone()),
            _ => None,
        })
        .expect("success alert");
    success.invoke();
    wait_for(&mut feed, "idle after acknowledgement", PaymentEvent::is_idle).await;
}

#[tokio::test]
async fn reported_input_methods_reach_the_alert() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .on_collect(CollectScript::Approve {
            input_methods: CardInputMethods::TAP,
        })
        .build();
    let service = service_over(sim);
    let mut feed = service.events();

    let task = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
                .await
        })
    };

    let alert = wait_for(&mut feed, "tap alert", |e| {
        matches!(e.alert(), Some(AlertDetail::TapSwipeOrInsertCard { .. }))
    })
    .await;
    let Some(AlertDetail::TapSwipeOrInsertCard { input_methods, .. }) = alert.alert() else {
        unreachable!();
    };
    assert!(input_methods.contains(CardInputMethods::TAP));
    assert!(!input_methods.contains(CardInputMethods::SWIPE));

    assert!(matches!(
        task.await.unwrap().unwrap(),
        PaymentOutcome::Success(_)
    ));
}

// ── Setup errors ────────────────────────────────────────────────────

#[tokio::test]
async fn zero_total_fails_fast_without_hardware() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .build();
    let service = service_over(sim);
    let mut feed = service.events();

    let bad_order = Order {
        total: dec!(0),
        ..order()
    };
    let error = service
        .collect_payment(&bad_order, DiscoveryMethod::BluetoothScan)
        .await
        .unwrap_err();
    assert!(matches!(error, CoreError::InvalidAmount { .. }));

    let events = drain(&mut feed);
    assert!(
        !events
            .iter()
            .any(|e| matches!(e.alert(), Some(AlertDetail::PreparingForPayment))),
        "validation failure must not reach the hardware phase"
    );
}

#[tokio::test]
async fn mismatched_currency_is_rejected() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .build();
    let service = service_over(sim);

    let bad_order = Order {
        currency: "eur".into(),
        ..order()
    };
    let error = service
        .collect_payment(&bad_order, DiscoveryMethod::BluetoothScan)
        .await
        .unwrap_err();
    assert!(matches!(error, CoreError::UnsupportedCurrency { .. }));
}

// ── Scenario D: already-paid capture is a success ───────────────────

#[tokio::test]
async fn order_already_paid_resolves_as_success() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .on_capture(CaptureScript::Fail(DeviceError::OrderAlreadyPaid))
        .build();
    let service = service_over(sim);
    let mut feed = service.events();

    let outcome = service
        .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
        .await
        .unwrap();
    assert!(matches!(outcome, PaymentOutcome::Success(_)));

    let events = drain(&mut feed);
    assert!(
        events
            .iter()
            .any(|e| matches!(e.alert(), Some(AlertDetail::PaymentSuccess { .. }))),
        "already-paid must publish success"
    );
    assert!(
        !events.iter().any(|e| matches!(
            e.alert(),
            Some(AlertDetail::PaymentError { .. } | AlertDetail::PaymentCaptureError { .. })
        )),
        "already-paid must not publish an error"
    );
}

// ── Capture errors ──────────────────────────────────────────────────

#[tokio::test]
async fn capture_server_error_retries_capture_only() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .on_capture(CaptureScript::Fail(DeviceError::ProcessorApiError))
        .build();
    let service = service_over(sim);
    let mut feed = service.events();
    // Second receiver keeps the full history for the final assertion.
    let mut history = service.events();

    let task = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
                .await
        })
    };

    let alert = wait_for(&mut feed, "capture error alert", |e| {
        matches!(e.alert(), Some(AlertDetail::PaymentCaptureError { .. }))
    })
    .await;
    let Some(AlertDetail::PaymentCaptureError { retry_capture, .. }) = alert.alert() else {
        unreachable!();
    };
    retry_capture.invoke();

    let outcome = task.await.unwrap().unwrap();
    assert!(matches!(outcome, PaymentOutcome::Success(_)));

    // The retry re-ran capture, not collection.
    let tap_alerts = drain(&mut history)
        .iter()
        .filter(|e| matches!(e.alert(), Some(AlertDetail::TapSwipeOrInsertCard { .. })))
        .count();
    assert_eq!(tap_alerts, 1, "capture retry must not restart collection");
}

#[tokio::test]
async fn dismissed_capture_error_propagates() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .on_capture(CaptureScript::Fail(DeviceError::ProcessorApiError))
        .build();
    let service = service_over(sim);
    let mut feed = service.events();

    let task = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
                .await
        })
    };

    let alert = wait_for(&mut feed, "capture error alert", |e| {
        matches!(e.alert(), Some(AlertDetail::PaymentCaptureError { .. }))
    })
    .await;
    let Some(AlertDetail::PaymentCaptureError { dismiss, .. }) = alert.alert() else {
        unreachable!();
    };
    dismiss.invoke();

    let error = task.await.unwrap().unwrap_err();
    assert!(matches!(error, CoreError::PaymentCapture { .. }));
}

// ── Collection errors ───────────────────────────────────────────────

#[tokio::test]
async fn declined_card_offers_another_payment_method() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .on_collect(CollectScript::Fail {
            input_methods: CardInputMethods::all(),
            error: DeviceError::PaymentDeclinedByReader,
        })
        .build();
    let service = service_over(sim);
    let mut feed = service.events();

    let task = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
                .await
        })
    };

    let alert = wait_for(&mut feed, "payment error alert", |e| {
        matches!(e.alert(), Some(AlertDetail::PaymentError { .. }))
    })
    .await;
    let Some(AlertDetail::PaymentError { retry, .. }) = alert.alert() else {
        unreachable!();
    };
    let PaymentRetryAction::TryAnotherPaymentMethod { retry } = retry else {
        panic!("declines must offer another payment method, got {retry:?}");
    };
    retry.invoke();

    // Second collection takes the default approve path.
    assert!(matches!(
        task.await.unwrap().unwrap(),
        PaymentOutcome::Success(_)
    ));
}

#[tokio::test]
async fn non_retryable_collection_error_propagates_after_dismissal() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .on_collect(CollectScript::Fail {
            input_methods: CardInputMethods::all(),
            error: DeviceError::ReaderSessionExpired,
        })
        .build();
    let service = service_over(sim);
    let mut feed = service.events();

    let task = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
                .await
        })
    };

    let alert = wait_for(&mut feed, "non-retryable payment error", |e| {
        matches!(e.alert(), Some(AlertDetail::PaymentErrorNonRetryable { .. }))
    })
    .await;
    let Some(AlertDetail::PaymentErrorNonRetryable { dismiss, .. }) = alert.alert() else {
        unreachable!();
    };
    dismiss.invoke();

    assert!(matches!(
        task.await.unwrap().unwrap_err(),
        CoreError::Payment { .. }
    ));
}

// ── Scenario E: cancellation during waiting-for-input ───────────────

#[tokio::test]
async fn cancel_during_waiting_for_input_resolves_to_cancellation_then_idle() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .on_collect(await_card())
        .build();
    let service = service_over(sim);
    let mut feed = service.events();

    let task = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
                .await
        })
    };

    wait_for(&mut feed, "tap alert", |e| {
        matches!(e.alert(), Some(AlertDetail::TapSwipeOrInsertCard { .. }))
    })
    .await;
    service.cancel_payment().await;

    let outcome = task.await.unwrap().unwrap();
    assert!(matches!(outcome, PaymentOutcome::Cancellation));
    wait_for(&mut feed, "idle after cancellation", PaymentEvent::is_idle).await;
}

#[tokio::test]
async fn tap_alert_cancel_handle_cancels_the_payment() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .on_collect(await_card())
        .build();
    let service = service_over(sim);
    let mut feed = service.events();

    let task = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
                .await
        })
    };

    let alert = wait_for(&mut feed, "tap alert", |e| {
        matches!(e.alert(), Some(AlertDetail::TapSwipeOrInsertCard { .. }))
    })
    .await;
    let Some(AlertDetail::TapSwipeOrInsertCard { cancel, .. }) = alert.alert() else {
        unreachable!();
    };
    cancel.invoke();

    assert!(matches!(
        task.await.unwrap().unwrap(),
        PaymentOutcome::Cancellation
    ));
}

// ── Single in-flight session invariant ──────────────────────────────

#[tokio::test]
async fn starting_a_new_payment_cancels_the_previous_one_first() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .on_collect(await_card())
        .build();
    let service = service_over(sim);
    let mut feed = service.events();

    let first = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
                .await
        })
    };
    wait_for(&mut feed, "first tap alert", |e| {
        matches!(e.alert(), Some(AlertDetail::TapSwipeOrInsertCard { .. }))
    })
    .await;

    let second = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
                .await
        })
    };

    // The first call resolves to cancellation, and its idle lands on
    // the feed before the second session's first event.
    let first_outcome = first.await.unwrap().unwrap();
    assert!(matches!(first_outcome, PaymentOutcome::Cancellation));

    let mut saw_idle = false;
    let event = wait_for(&mut feed, "second session start", |e| {
        matches!(e, PaymentEvent::Idle)
            || matches!(e.alert(), Some(AlertDetail::ValidatingOrder))
    })
    .await;
    if event.is_idle() {
        saw_idle = true;
        wait_for(&mut feed, "second validating alert", |e| {
            matches!(e.alert(), Some(AlertDetail::ValidatingOrder))
        })
        .await;
    }
    assert!(
        saw_idle,
        "previous session must complete (idle) before the new one emits"
    );

    let second_outcome = second.await.unwrap().unwrap();
    assert!(matches!(second_outcome, PaymentOutcome::Success(_)));
}

#[tokio::test]
async fn disconnect_reader_cancels_an_in_flight_payment() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .on_collect(await_card())
        .build();
    let service = service_over(sim);
    let mut feed = service.events();

    let task = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
                .await
        })
    };
    wait_for(&mut feed, "tap alert", |e| {
        matches!(e.alert(), Some(AlertDetail::TapSwipeOrInsertCard { .. }))
    })
    .await;

    service.disconnect_reader().await;

    assert!(matches!(
        task.await.unwrap().unwrap(),
        PaymentOutcome::Cancellation
    ));
}

// ── Onboarding gate ─────────────────────────────────────────────────

#[tokio::test]
async fn payment_waits_for_onboarding_to_become_ready() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .build();
    let readiness = StubReadiness::not_ready(NotReadyReason::PluginNotSetUp);
    let service = service_with(
        sim,
        Arc::clone(&readiness),
        Arc::new(InMemoryKnownReaderStore::new()),
    );
    let mut feed = service.events();

    let task = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
                .await
        })
    };

    let event = wait_for(&mut feed, "onboarding screen", |e| {
        matches!(e, PaymentEvent::ShowOnboarding(_))
    })
    .await;
    let PaymentEvent::ShowOnboarding(view_model) = event else {
        unreachable!();
    };
    assert_eq!(view_model.reason, NotReadyReason::PluginNotSetUp);

    readiness.set(Readiness::Ready);
    service.refresh_onboarding().await.unwrap();

    assert!(matches!(
        task.await.unwrap().unwrap(),
        PaymentOutcome::Success(_)
    ));
}

#[tokio::test]
async fn cancelling_while_blocked_on_onboarding_resolves_to_cancellation() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .build();
    let readiness = StubReadiness::not_ready(NotReadyReason::PaymentsDisabled);
    let service = service_with(
        sim,
        readiness,
        Arc::new(InMemoryKnownReaderStore::new()),
    );
    let mut feed = service.events();

    let task = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
                .await
        })
    };
    wait_for(&mut feed, "onboarding screen", |e| {
        matches!(e, PaymentEvent::ShowOnboarding(_))
    })
    .await;

    service.cancel_payment().await;
    assert!(matches!(
        task.await.unwrap().unwrap(),
        PaymentOutcome::Cancellation
    ));
}

// ── Optional update queueing ────────────────────────────────────────

#[tokio::test]
async fn payment_queues_behind_an_optional_software_update() {
    let sim = SimulatedReaderService::builder()
        .discover_readers(vec![bluetooth_reader("CHB1")])
        .on_connect(ConnectScript::SucceedAfterUpdate {
            kind: UpdateKind::Optional,
        })
        .build();
    let service = service_over(Arc::clone(&sim));
    let mut feed = service.events();

    let task = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .collect_payment(&order(), DiscoveryMethod::BluetoothScan)
                .await
        })
    };

    // Give the session time to reach the queueing point, then confirm
    // collection has not started.
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
    assert!(
        !drain(&mut feed)
            .iter()
            .any(|e| matches!(e.alert(), Some(AlertDetail::TapSwipeOrInsertCard { .. }))),
        "payment must wait for the optional update"
    );

    sim.complete_update();
    assert!(matches!(
        task.await.unwrap().unwrap(),
        PaymentOutcome::Success(_)
    ));
}
