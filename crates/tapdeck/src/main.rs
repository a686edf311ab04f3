//! Demo binary: wires the payment engine to the simulated reader
//! service and narrates the event stream while a connection or payment
//! runs.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use rust_decimal::Decimal;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tapdeck_core::{
    AlertDetail, CardPaymentService, ConnectionResult, CoreError, CurrencySettings,
    InMemoryKnownReaderStore, Order, PaymentEvent, PaymentOutcome, PaymentsConfig, Readiness,
    ReadinessProvider, TracingAnalyticsSink,
};
use tapdeck_hw::sim::SimulatedReaderService;
use tapdeck_hw::{Reader, ReaderKind};

use cli::{Cli, Command, MethodArg};

/// Demo sites are always eligible.
struct AlwaysReady;

#[async_trait]
impl ReadinessProvider for AlwaysReady {
    async fn check_readiness(&self) -> Result<Readiness, CoreError> {
        Ok(Readiness::Ready)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Connect { method, readers } => run_connect(method, readers).await,
        Command::Pay {
            total,
            method,
            readers,
        } => run_pay(total, method, readers).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn build_service(method: MethodArg, readers: u8) -> CardPaymentService {
    let kind = match method {
        MethodArg::Bluetooth => ReaderKind::BluetoothExternal,
        MethodArg::BuiltIn => ReaderKind::BuiltIn,
    };
    let discovered = (1..=readers.max(1))
        .map(|n| Reader::new(format!("SIM-{n:03}"), kind).with_battery(0.65))
        .collect();
    let sim = SimulatedReaderService::builder()
        .discover_readers(discovered)
        .build();

    CardPaymentService::new(
        sim,
        Arc::new(AlwaysReady),
        Arc::new(InMemoryKnownReaderStore::new()),
        Arc::new(TracingAnalyticsSink),
        PaymentsConfig::new(1, CurrencySettings::usd()),
    )
}

/// Print the event feed and auto-answer the prompts a human would tap:
/// picks the first reader from a list and acknowledges success.
fn spawn_narrator(service: &CardPaymentService) -> tokio::task::JoinHandle<()> {
    let mut feed = service.events();
    tokio::spawn(async move {
        while let Ok(event) = feed.recv().await {
            match &event {
                PaymentEvent::Idle => println!("  · idle"),
                PaymentEvent::ShowOnboarding(vm) => {
                    println!("  ! onboarding required: {:?}", vm.reason);
                }
                PaymentEvent::ShowReaderList {
                    reader_ids, select, ..
                } => {
                    println!("  ? several readers found: {reader_ids:?}");
                    if let Some(first) = reader_ids.first() {
                        println!("  → selecting {first}");
                        select.select(first.clone());
                    }
                }
                PaymentEvent::ShowAlert(alert) => narrate_alert(alert),
            }
        }
        debug!("event feed closed");
    })
}

fn narrate_alert(alert: &AlertDetail) {
    match alert {
        AlertDetail::ScanningForReaders { .. } => println!("  … scanning for readers"),
        AlertDetail::FoundReader { name } => println!("  ✓ found reader {name}"),
        AlertDetail::ConnectingToReader => println!("  … connecting"),
        AlertDetail::ConnectionSuccess { done } => {
            println!("  ✓ reader connected");
            done.invoke();
        }
        AlertDetail::UpdateProgress { progress, .. } => {
            println!("  … installing reader update ({:.0}%)", progress * 100.0);
        }
        AlertDetail::ValidatingOrder => println!("  … validating order"),
        AlertDetail::PreparingForPayment => println!("  … preparing reader"),
        AlertDetail::TapSwipeOrInsertCard { .. } => println!("  ? tap, swipe, or insert card"),
        AlertDetail::DisplayReaderMessage { message } => println!("  reader: {message}"),
        AlertDetail::Processing => println!("  … processing"),
        AlertDetail::PaymentSuccess { done } => {
            println!("  ✓ payment approved");
            done.invoke();
        }
        other => println!("  ! {other:?}"),
    }
}

/// Let the narrator print everything already on the feed, then stop it.
async fn drain_narrator(narrator: tokio::task::JoinHandle<()>) {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    narrator.abort();
}

async fn run_connect(method: MethodArg, readers: u8) -> Result<(), CoreError> {
    let service = build_service(method, readers);
    let narrator = spawn_narrator(&service);

    let result = service.connect_reader(method.into()).await?;
    drain_narrator(narrator).await;

    match result {
        ConnectionResult::Connected(reader) => {
            println!(
                "Connected to {} (battery {})",
                reader.id,
                reader
                    .battery_level
                    .map_or_else(|| "unknown".to_owned(), |b| format!("{:.0}%", b * 100.0)),
            );
            Ok(())
        }
        ConnectionResult::Canceled(source) => {
            println!("Connection canceled ({source})");
            Ok(())
        }
    }
}

async fn run_pay(total: Decimal, method: MethodArg, readers: u8) -> Result<(), CoreError> {
    let service = build_service(method, readers);
    let narrator = spawn_narrator(&service);

    let order = Order {
        id: 1,
        number: "1".into(),
        total,
        currency: "usd".into(),
    };
    let outcome = service.collect_payment(&order, method.into()).await?;
    drain_narrator(narrator).await;

    match outcome {
        PaymentOutcome::Success(receipt) => {
            println!(
                "Payment captured: {} {} (ref {})",
                receipt.amount, receipt.currency, receipt.reference
            );
            Ok(())
        }
        PaymentOutcome::Cancellation => {
            println!("Payment canceled");
            Ok(())
        }
    }
}
