//! Push-button authentication transactions.
//!
//! At most one transaction is pending at any time. A second request
//! pre-empts the first, which is reported failed to its requester. The
//! state machine itself is synchronous; the RPC layer turns the returned
//! values into `PushButtonAuthFinished` notifications and the token issue
//! happens in the user store when the physical button is pressed.

use tracing::{debug, warn};

use otto_types::PairingTransactionId;

/// A pending push-button transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushButtonTransaction {
    pub transaction_id: PairingTransactionId,
    pub device_name: String,
}

/// The terminal report for a transaction that did not produce a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushButtonFailure {
    pub transaction_id: PairingTransactionId,
}

#[derive(Default)]
pub struct PushButtonManager {
    pending: Option<PushButtonTransaction>,
}

impl PushButtonManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&PushButtonTransaction> {
        self.pending.as_ref()
    }

    /// Start a transaction. If one is already pending it is pre-empted and
    /// returned as a failure to deliver to its requester.
    pub fn request(
        &mut self,
        device_name: impl Into<String>,
    ) -> (PairingTransactionId, Option<PushButtonFailure>) {
        let preempted = self.pending.take().map(|tx| {
            warn!(
                transaction_id = %tx.transaction_id,
                device_name = %tx.device_name,
                "Push-button authentication already in progress, cancelling"
            );
            PushButtonFailure {
                transaction_id: tx.transaction_id,
            }
        });

        let transaction_id = PairingTransactionId::new();
        let device_name = device_name.into();
        debug!(%transaction_id, %device_name, "Starting push-button authentication");
        self.pending = Some(PushButtonTransaction {
            transaction_id,
            device_name,
        });
        (transaction_id, preempted)
    }

    /// The physical button was pressed: the pending transaction (if any)
    /// finishes successfully and the caller issues its token.
    pub fn press(&mut self) -> Option<PushButtonTransaction> {
        match self.pending.take() {
            Some(tx) => {
                debug!(transaction_id = %tx.transaction_id, "Push-button auth succeeded");
                Some(tx)
            }
            None => {
                debug!("Push button pressed with no transaction waiting for it");
                None
            }
        }
    }

    /// Cancel a specific transaction, e.g. because its requester
    /// disconnected. Other ids are ignored.
    pub fn cancel(&mut self, transaction_id: PairingTransactionId) -> Option<PushButtonFailure> {
        match &self.pending {
            Some(tx) if tx.transaction_id == transaction_id => {
                self.pending = None;
                Some(PushButtonFailure { transaction_id })
            }
            Some(tx) => {
                warn!(
                    %transaction_id,
                    pending = %tx.transaction_id,
                    "Push-button transaction not in progress, cannot cancel"
                );
                None
            }
            None => None,
        }
    }
}
