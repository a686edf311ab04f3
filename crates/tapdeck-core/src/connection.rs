// ── Reader connection controller ──
//
// Discovery → select → connect state machine, one instance per
// discovery method. Publishes alerts for every decision point and
// routes the merchant's responses back in through an action channel.
//
// States: idle → discovering → (found one | found many) → connecting
// → connected, with cancelled/failed reachable from every non-terminal
// state. A single eligible reader auto-advances to connecting; a known
// reader auto-advances at most once per attempt.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use tapdeck_hw::{
    CardReaderService, DeviceError, DiscoveryEvent, DiscoveryMethod, Reader, ReaderId,
    ServiceError, SoftwareUpdateEvent, UpdateKind,
};

use crate::analytics::{AnalyticsEvent, AnalyticsSink};
use crate::error::CoreError;
use crate::events::{ActionHandle, AlertDetail, EventBus, PaymentEvent, SelectReaderHandle};
use crate::known_readers::KnownReaderStore;
use crate::model::{CancellationSource, ConnectionResult};
use crate::retry::{RetryApproach, classify};

/// Merchant responses routed back from alert handles.
#[derive(Debug, Clone)]
enum UserAction {
    CancelSearch(CancellationSource),
    /// Restart discovery from scratch.
    RetrySearch,
    SelectReader(ReaderId),
    /// Dismiss an update-failure alert and keep searching.
    BackToSearch,
    /// Dismiss a terminal failure alert; the error propagates.
    CloseFailure,
}

/// Tracks the update in flight while a connect call is suspended.
#[derive(Default)]
struct UpdateBridge {
    required: bool,
    cancel: Option<CancellationToken>,
}

/// Outcome of one discovery-and-connect pass.
enum Flow {
    Connected(Reader),
    Canceled(CancellationSource),
    /// Restart discovery (retry handles, interrupted updates).
    Restart,
    Failed(CoreError),
}

pub(crate) struct ReaderConnectionController {
    method: DiscoveryMethod,
    port: Arc<dyn CardReaderService>,
    known_readers: Arc<dyn KnownReaderStore>,
    bus: EventBus,
    analytics: Arc<dyn AnalyticsSink>,
    store_admin_url: Option<Url>,
}

impl ReaderConnectionController {
    pub(crate) fn new(
        method: DiscoveryMethod,
        port: Arc<dyn CardReaderService>,
        known_readers: Arc<dyn KnownReaderStore>,
        bus: EventBus,
        analytics: Arc<dyn AnalyticsSink>,
        store_admin_url: Option<Url>,
    ) -> Self {
        Self {
            method,
            port,
            known_readers,
            bus,
            analytics,
            store_admin_url,
        }
    }

    /// Run the full state machine until a reader is connected, the
    /// merchant cancels, or a terminal failure is acknowledged.
    ///
    /// `announce_success` publishes the `ConnectionSuccess` alert on
    /// completion; payment flows pass `false` and move straight on to
    /// their own alerts.
    pub(crate) async fn attempt_connection(
        &self,
        cancel: &CancellationToken,
        announce_success: bool,
    ) -> Result<ConnectionResult, CoreError> {
        loop {
            let flow = self.run_attempt(cancel, announce_success).await;
            // The scan keeps running while connecting, so every exit
            // path stops it explicitly.
            let _ = self.port.cancel_discovery().await;
            match flow {
                Flow::Connected(reader) => return Ok(ConnectionResult::Connected(reader)),
                Flow::Canceled(source) => {
                    debug!(%source, "connection attempt cancelled");
                    self.bus.idle();
                    return Ok(ConnectionResult::Canceled(source));
                }
                Flow::Restart => {}
                Flow::Failed(error) => {
                    self.bus.idle();
                    return Err(error);
                }
            }
        }
    }

    async fn run_attempt(&self, cancel: &CancellationToken, announce_success: bool) -> Flow {
        let (action_tx, mut action_rx) = mpsc::unbounded_channel();
        // Subscribe before connect so a fast update cannot outrun us.
        let update_rx = self.port.software_update_events();
        let known = self.known_readers.known_reader();

        self.bus.alert(AlertDetail::ScanningForReaders {
            cancel: self.action(
                &action_tx,
                UserAction::CancelSearch(CancellationSource::SearchingForReader),
            ),
        });
        self.track(AnalyticsEvent::ReaderDiscoveryStarted);

        let mut discovery_rx = match self.port.start_discovery(self.method).await {
            Ok(rx) => rx,
            Err(error) => {
                return self
                    .discovery_failed(error, &action_tx, &mut action_rx, cancel)
                    .await;
            }
        };

        let mut found: Vec<Reader> = Vec::new();
        let mut list_mode = false;
        let mut auto_advanced = false;
        let mut discovery_open = true;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Flow::Canceled(CancellationSource::Session),
                action = action_rx.recv() => match action {
                    Some(UserAction::CancelSearch(source)) => return Flow::Canceled(source),
                    Some(UserAction::SelectReader(id)) => {
                        let Some(candidate) = found.iter().find(|r| r.id == id).cloned() else {
                            warn!(reader = %id, "selected reader is no longer visible");
                            continue;
                        };
                        return self
                            .connect_candidate(
                                candidate,
                                update_rx,
                                &action_tx,
                                &mut action_rx,
                                cancel,
                                announce_success,
                            )
                            .await;
                    }
                    Some(_) | None => {}
                },
                event = discovery_rx.recv(), if discovery_open => match event {
                    Some(DiscoveryEvent::ReadersChanged(readers)) => {
                        found = Self::dedup_eligible(readers, self.method);

                        // A previously-paired reader connects without
                        // any selection UI -- but only once, to avoid
                        // loops when it has connectivity issues.
                        if !auto_advanced {
                            if let Some(known_id) = &known {
                                if let Some(candidate) =
                                    found.iter().find(|r| &r.id == known_id).cloned()
                                {
                                    auto_advanced = true;
                                    debug!(reader = %candidate.id, "known reader found, auto-connecting");
                                    return self
                                        .connect_candidate(
                                            candidate,
                                            update_rx,
                                            &action_tx,
                                            &mut action_rx,
                                            cancel,
                                            announce_success,
                                        )
                                        .await;
                                }
                            }
                        }

                        if found.len() > 1 {
                            list_mode = true;
                        }
                        if list_mode {
                            // Stay in list mode even if the count drops
                            // back to one; flip-flopping the UI between
                            // list and single prompt is worse.
                            if !found.is_empty() {
                                self.publish_reader_list(&found, &action_tx);
                            }
                        } else if let Some(candidate) = found.first().cloned() {
                            // Single eligible reader: skip selection.
                            self.bus.alert(AlertDetail::FoundReader {
                                name: candidate.display_name.clone(),
                            });
                            return self
                                .connect_candidate(
                                    candidate,
                                    update_rx,
                                    &action_tx,
                                    &mut action_rx,
                                    cancel,
                                    announce_success,
                                )
                                .await;
                        }
                    }
                    Some(DiscoveryEvent::Failed(error)) => {
                        return self
                            .discovery_failed(error, &action_tx, &mut action_rx, cancel)
                            .await;
                    }
                    None => discovery_open = false,
                },
            }
        }
    }

    fn dedup_eligible(readers: Vec<Reader>, method: DiscoveryMethod) -> Vec<Reader> {
        let mut seen = HashSet::new();
        readers
            .into_iter()
            .filter(|r| r.kind == method.reader_kind())
            .filter(|r| seen.insert(r.id.clone()))
            .collect()
    }

    fn publish_reader_list(&self, found: &[Reader], action_tx: &mpsc::UnboundedSender<UserAction>) {
        let reader_ids: Vec<ReaderId> = found.iter().map(|r| r.id.clone()).collect();
        let select = {
            let tx = action_tx.clone();
            SelectReaderHandle::new(move |id| {
                let _ = tx.send(UserAction::SelectReader(id));
            })
        };
        let cancel = self.action(
            action_tx,
            UserAction::CancelSearch(CancellationSource::FoundSeveralReaders),
        );
        self.bus.publish(PaymentEvent::ShowReaderList {
            reader_ids,
            select,
            cancel,
        });
    }

    // ── Connect phase ────────────────────────────────────────────────

    async fn connect_candidate(
        &self,
        candidate: Reader,
        mut update_rx: broadcast::Receiver<SoftwareUpdateEvent>,
        action_tx: &mpsc::UnboundedSender<UserAction>,
        action_rx: &mut mpsc::UnboundedReceiver<UserAction>,
        cancel: &CancellationToken,
        announce_success: bool,
    ) -> Flow {
        self.bus.alert(AlertDetail::ConnectingToReader);

        let connect_fut = self.port.connect(&candidate);
        tokio::pin!(connect_fut);
        let mut update = UpdateBridge::default();

        let result = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    // Best-effort abort; the status stays disconnected.
                    let _ = self.port.disconnect().await;
                    return Flow::Canceled(CancellationSource::Session);
                }
                action = action_rx.recv() => match action {
                    Some(UserAction::CancelSearch(source)) => return Flow::Canceled(source),
                    Some(_) | None => {}
                },
                event = update_rx.recv() => {
                    self.handle_update_event(event, &mut update);
                }
                result = &mut connect_fut => break result,
            }
        };

        match result {
            Ok(reader) => {
                self.known_readers.remember(&reader.id);
                self.analytics.track(
                    AnalyticsEvent::ReaderConnectionSuccess,
                    json!({
                        "reader_id": reader.id.as_str(),
                        "battery_level": reader.battery_level,
                    }),
                );
                info!(reader = %reader.id, "reader connected");
                if announce_success {
                    let bus = self.bus.clone();
                    self.bus.alert(AlertDetail::ConnectionSuccess {
                        done: ActionHandle::new(move || bus.idle()),
                    });
                }
                Flow::Connected(reader)
            }
            Err(error) => {
                self.track(AnalyticsEvent::ReaderConnectionFailed);
                warn!(error = %error, "reader connection failed");
                self.connection_failed(error, action_tx, action_rx, cancel)
                    .await
            }
        }
    }

    fn handle_update_event(
        &self,
        event: Result<SoftwareUpdateEvent, broadcast::error::RecvError>,
        bridge: &mut UpdateBridge,
    ) {
        match event {
            Ok(SoftwareUpdateEvent::Started { kind, cancel }) => {
                bridge.required = kind == UpdateKind::Mandatory;
                bridge.cancel = Some(cancel.clone());
                self.track(AnalyticsEvent::ReaderSoftwareUpdateStarted);
                self.bus.alert(AlertDetail::UpdateProgress {
                    required: bridge.required,
                    progress: 0.0,
                    cancel: Some(ActionHandle::new(move || cancel.cancel())),
                });
            }
            Ok(SoftwareUpdateEvent::Installing { kind, progress }) => {
                // Near completion the installation can no longer be
                // interrupted safely.
                let cancel_handle = if progress < 0.995 {
                    bridge.cancel.clone().map(|token| {
                        ActionHandle::new(move || token.cancel())
                    })
                } else {
                    bridge.cancel = None;
                    None
                };
                self.bus.alert(AlertDetail::UpdateProgress {
                    required: kind == UpdateKind::Mandatory,
                    progress,
                    cancel: cancel_handle,
                });
            }
            Ok(SoftwareUpdateEvent::Completed) => {
                bridge.cancel = None;
                self.track(AnalyticsEvent::ReaderSoftwareUpdateCompleted);
                self.bus.alert(AlertDetail::UpdateProgress {
                    required: bridge.required,
                    progress: 1.0,
                    cancel: None,
                });
            }
            // Failures surface through the connect result.
            Ok(SoftwareUpdateEvent::Failed(_)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "software update events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {}
        }
    }

    // ── Failure routing ──────────────────────────────────────────────

    async fn connection_failed(
        &self,
        error: ServiceError,
        action_tx: &mpsc::UnboundedSender<UserAction>,
        action_rx: &mut mpsc::UnboundedReceiver<UserAction>,
        cancel: &CancellationToken,
    ) -> Flow {
        if let ServiceError::SoftwareUpdate {
            source,
            battery_level,
        } = &error
        {
            if source.is_software_update_error() {
                return self
                    .update_failed(&error, source, *battery_level, action_tx, action_rx, cancel)
                    .await;
            }
        }

        let retry = self.action(action_tx, UserAction::RetrySearch);
        let cancel_search = self.action(
            action_tx,
            UserAction::CancelSearch(CancellationSource::ConnectionError),
        );

        match error.device_error() {
            // Remediation alerts: the merchant must fix store settings
            // before any retry can succeed.
            DeviceError::IncompleteStoreAddress => {
                self.bus.alert(AlertDetail::ConnectingFailedUpdateAddress {
                    admin_url: self.store_admin_url.clone(),
                    retry,
                    cancel: cancel_search,
                });
            }
            DeviceError::InvalidPostalCode => {
                self.bus
                    .alert(AlertDetail::ConnectingFailedUpdatePostalCode {
                        retry,
                        cancel: cancel_search,
                    });
            }
            DeviceError::BluetoothConnectionFailedBatteryCriticallyLow => {
                self.bus.alert(AlertDetail::ConnectingFailedChargeReader {
                    retry,
                    cancel: cancel_search,
                });
            }
            _ => match classify(&error) {
                RetryApproach::DontRetry => {
                    self.bus.alert(AlertDetail::ConnectingFailedNonRetryable {
                        message: error.to_string(),
                        close: self.action(action_tx, UserAction::CloseFailure),
                    });
                    return match self.wait_action(action_rx, cancel).await {
                        UserAction::CancelSearch(source) => Flow::Canceled(source),
                        _ => Flow::Failed(CoreError::Connection { source: error }),
                    };
                }
                RetryApproach::TryAgain | RetryApproach::TryAnotherPaymentMethod => {
                    self.bus.alert(AlertDetail::ConnectingFailed {
                        message: error.to_string(),
                        retry,
                        cancel: cancel_search,
                    });
                }
            },
        }

        match self.wait_action(action_rx, cancel).await {
            UserAction::CancelSearch(source) => Flow::Canceled(source),
            _ => Flow::Restart,
        }
    }

    async fn update_failed(
        &self,
        error: &ServiceError,
        source: &DeviceError,
        battery_level: Option<f32>,
        action_tx: &mpsc::UnboundedSender<UserAction>,
        action_rx: &mut mpsc::UnboundedReceiver<UserAction>,
        cancel: &CancellationToken,
    ) -> Flow {
        self.track(AnalyticsEvent::ReaderSoftwareUpdateFailed);

        match source {
            // The merchant interrupted the update; keep searching, no
            // error alert.
            DeviceError::ReaderSoftwareUpdateFailedInterrupted => Flow::Restart,
            DeviceError::ReaderSoftwareUpdateFailedBatteryLow => {
                self.bus.alert(AlertDetail::UpdateFailedLowBattery {
                    battery_level,
                    close: self.action(action_tx, UserAction::BackToSearch),
                });
                match self.wait_action(action_rx, cancel).await {
                    UserAction::CancelSearch(src) => Flow::Canceled(src),
                    _ => Flow::Restart,
                }
            }
            _ => match classify(error) {
                RetryApproach::DontRetry => {
                    self.bus.alert(AlertDetail::UpdateFailedNonRetryable {
                        close: self.action(action_tx, UserAction::CloseFailure),
                    });
                    match self.wait_action(action_rx, cancel).await {
                        UserAction::CancelSearch(src) => Flow::Canceled(src),
                        _ => Flow::Failed(CoreError::Connection {
                            source: error.clone(),
                        }),
                    }
                }
                RetryApproach::TryAgain | RetryApproach::TryAnotherPaymentMethod => {
                    self.bus.alert(AlertDetail::UpdateFailed {
                        retry: Some(self.action(action_tx, UserAction::RetrySearch)),
                        close: self.action(action_tx, UserAction::BackToSearch),
                    });
                    match self.wait_action(action_rx, cancel).await {
                        UserAction::CancelSearch(src) => Flow::Canceled(src),
                        _ => Flow::Restart,
                    }
                }
            },
        }
    }

    async fn discovery_failed(
        &self,
        error: ServiceError,
        action_tx: &mpsc::UnboundedSender<UserAction>,
        action_rx: &mut mpsc::UnboundedReceiver<UserAction>,
        cancel: &CancellationToken,
    ) -> Flow {
        self.track(AnalyticsEvent::ReaderDiscoveryFailed);
        warn!(error = %error, "reader discovery failed");

        let close = self.action(action_tx, UserAction::CloseFailure);
        let alert = match error.device_error() {
            DeviceError::BluetoothDisabled
            | DeviceError::BluetoothError
            | DeviceError::BluetoothLowEnergyUnsupported => AlertDetail::BluetoothRequired {
                message: error.to_string(),
                close,
            },
            _ => AlertDetail::ScanningFailed {
                message: error.to_string(),
                close,
            },
        };
        self.bus.alert(alert);

        match self.wait_action(action_rx, cancel).await {
            UserAction::CancelSearch(source) => Flow::Canceled(source),
            _ => Flow::Failed(CoreError::Discovery { source: error }),
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    async fn wait_action(
        &self,
        action_rx: &mut mpsc::UnboundedReceiver<UserAction>,
        cancel: &CancellationToken,
    ) -> UserAction {
        tokio::select! {
            biased;
            () = cancel.cancelled() => UserAction::CancelSearch(CancellationSource::Session),
            action = action_rx.recv() => {
                action.unwrap_or(UserAction::CancelSearch(CancellationSource::Session))
            }
        }
    }

    fn action(&self, tx: &mpsc::UnboundedSender<UserAction>, action: UserAction) -> ActionHandle {
        let tx = tx.clone();
        ActionHandle::new(move || {
            let _ = tx.send(action.clone());
        })
    }

    fn track(&self, event: AnalyticsEvent) {
        self.analytics.track(
            event,
            json!({ "discovery_method": format!("{:?}", self.method) }),
        );
    }
}
