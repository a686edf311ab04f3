// ── Connection preflight ──
//
// Decides whether a new connection attempt is needed or an existing
// connection can be reused. A reader of the wrong kind is disconnected
// before the matching controller runs.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tapdeck_hw::{CardReaderService, DiscoveryMethod};

use crate::connection::ReaderConnectionController;
use crate::error::CoreError;
use crate::model::{ConnectionResult, ConnectionStatus};
use crate::service::StatusHandle;

pub(crate) struct PreflightController {
    port: Arc<dyn CardReaderService>,
    status: StatusHandle,
    bluetooth: ReaderConnectionController,
    built_in: ReaderConnectionController,
}

impl PreflightController {
    pub(crate) fn new(
        port: Arc<dyn CardReaderService>,
        status: StatusHandle,
        bluetooth: ReaderConnectionController,
        built_in: ReaderConnectionController,
    ) -> Self {
        Self {
            port,
            status,
            bluetooth,
            built_in,
        }
    }

    /// Ensure a reader matching `method` is connected.
    ///
    /// A matching connection is reused without touching the hardware; a
    /// mismatched one is disconnected first. Single-flight per façade —
    /// the façade's session slot serializes callers.
    pub(crate) async fn attempt_connection(
        &self,
        method: DiscoveryMethod,
        cancel: &CancellationToken,
        announce_success: bool,
    ) -> Result<ConnectionResult, CoreError> {
        if let ConnectionStatus::Connected(reader) = self.status.current() {
            if reader.kind == method.reader_kind() {
                debug!(reader = %reader.id, "reusing connected reader");
                return Ok(ConnectionResult::Connected(reader));
            }
            // Wrong kind attached: disconnect it before searching for
            // the right one.
            debug!(
                connected = ?reader.kind,
                requested = ?method.reader_kind(),
                "disconnecting mismatched reader"
            );
            self.status.set(ConnectionStatus::Disconnecting);
            if let Err(error) = self.port.disconnect().await {
                warn!(error = %error, "disconnecting mismatched reader failed");
            }
            self.status.set(ConnectionStatus::Disconnected);
        }

        let controller = match method {
            DiscoveryMethod::BluetoothScan => &self.bluetooth,
            DiscoveryMethod::BuiltIn => &self.built_in,
        };
        let result = controller.attempt_connection(cancel, announce_success).await?;
        if let ConnectionResult::Connected(reader) = &result {
            self.status.set(ConnectionStatus::Connected(reader.clone()));
        }
        Ok(result)
    }
}
