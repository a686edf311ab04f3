//! Reader software update progress stream.
//!
//! Readers check for firmware updates during connection. The service
//! reports progress through a [`tokio::sync::broadcast`] channel so the
//! orchestration layer can subscribe *before* starting a connection
//! attempt and never miss the `Started` event.

use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;

/// Whether the connection can complete without the update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Connection is blocked until the update finishes.
    Mandatory,
    /// The caller may proceed while the update installs.
    Optional,
}

/// One step of a reader software update.
#[derive(Debug, Clone)]
pub enum SoftwareUpdateEvent {
    /// An update has begun. The token cancels the installation;
    /// mandatory updates near completion ignore it.
    Started {
        kind: UpdateKind,
        cancel: CancellationToken,
    },
    /// Installation progress, 0.0–1.0.
    Installing { kind: UpdateKind, progress: f32 },
    /// The update finished installing.
    Completed,
    /// The update failed. Battery level travels with the error inside
    /// [`ServiceError::SoftwareUpdate`].
    Failed(ServiceError),
}

impl SoftwareUpdateEvent {
    /// True once this event means no update is in flight any more.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}
