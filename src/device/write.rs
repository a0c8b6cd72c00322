//! Serialized GATT procedures.
//!
//! The armband firmware does not tolerate overlapping GATT procedures, so every attribute write
//! (and the firmware version read) goes through a capacity-1 gate. A procedure registers a
//! single-use responder keyed by its connection, sends exactly one command and then waits for the
//! ingestion path to resolve the responder, for its deadline, or for the connection to drop.

use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use log::{debug, warn};
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::device::bgapi::{Command, MAX_ARRAY_LEN};
use crate::device::transport::Transport;
use crate::device::types::{ConnectionHandle, WriteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Procedure {
    Write,
    Read,
}

struct PendingProcedure {
    id: u64,
    connection: ConnectionHandle,
    attribute: u16,
    procedure: Procedure,
    responder: oneshot::Sender<WriteOutcome>,
}

impl PendingProcedure {
    fn resolve(self, outcome: WriteOutcome) {
        debug!("{:?} of attribute {:#06x} on connection {}: {}", self.procedure, self.attribute, self.connection, outcome);
        // the caller may already be gone (dropped future); nothing left to notify then
        let _ = self.responder.send(outcome);
    }
}

pub struct AttributeWriteCoordinator {
    transport: Arc<dyn Transport>,
    gate: tokio::sync::Mutex<()>,
    pending: Mutex<Option<PendingProcedure>>,
    next_id: AtomicU64,
}

/// Tears down the pending registration when a procedure ends, whichever way it ends. Dropping the
/// future returned by `write`/`read` is the only way to cancel a procedure and goes through here
/// too.
struct Registration<'a> {
    coordinator: &'a AttributeWriteCoordinator,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut pending = self.coordinator.lock_pending();
        if pending.as_ref().map(|p| p.id) == Some(self.id) {
            *pending = None;
        }
    }
}

impl AttributeWriteCoordinator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        AttributeWriteCoordinator {
            transport,
            gate: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingProcedure>> {
        self.pending.lock().expect("Failed to lock pending procedure")
    }

    /// Write `payload` to `attribute` and wait for the dongle to report completion.
    /// Payloads longer than a BGAPI byte array can hold are not sent and resolve as `Aborted`.
    pub async fn write(&self, connection: ConnectionHandle, attribute: u16, payload: &[u8], deadline: Duration) -> WriteOutcome {
        if payload.len() > MAX_ARRAY_LEN {
            warn!("Refusing to write {} bytes to attribute {:#06x}: at most {} fit in a packet", payload.len(), attribute, MAX_ARRAY_LEN);
            return WriteOutcome::Aborted;
        }

        let command = Command::AttributeWrite {
            connection,
            attribute,
            payload: payload.to_vec(),
        };

        self.run(connection, attribute, Procedure::Write, command, deadline).await
    }

    /// Request the value of `attribute`. The value itself arrives as a regular attribute value
    /// event; this only reports whether the read went through.
    pub async fn read(&self, connection: ConnectionHandle, attribute: u16, deadline: Duration) -> WriteOutcome {
        let command = Command::ReadByHandle { connection, attribute };
        self.run(connection, attribute, Procedure::Read, command, deadline).await
    }

    async fn run(&self, connection: ConnectionHandle, attribute: u16, procedure: Procedure, command: Command, deadline: Duration) -> WriteOutcome {
        let _gate = self.gate.lock().await;

        let (responder, receiver) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.lock_pending() = Some(PendingProcedure {
            id,
            connection,
            attribute,
            procedure,
            responder,
        });
        // declared after the gate guard so the registration is gone before the gate reopens
        let _registration = Registration { coordinator: self, id };

        if let Err(err) = self.transport.send_command(&command.encode()) {
            warn!("Failed to send {:?} of attribute {:#06x}: {}", procedure, attribute, err);
            return WriteOutcome::Aborted;
        }

        match timeout(deadline, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => WriteOutcome::Aborted,
            Err(_) => {
                warn!("{:?} of attribute {:#06x} on connection {} took too long", procedure, attribute, connection);
                WriteOutcome::TimedOut
            },
        }
    }

    /// Resolve the pending procedure from a procedure completed event. Returns whether a procedure
    /// was waiting for it.
    pub fn on_procedure_completed(&self, connection: ConnectionHandle, status: u16) -> bool {
        let mut pending = self.lock_pending();

        match pending.take() {
            Some(procedure) if procedure.connection == connection => {
                procedure.resolve(WriteOutcome::from_status(status));
                true
            },
            other => {
                *pending = other;
                debug!("Ignoring procedure completed on connection {} with status {:#06x}: nothing pending", connection, status);
                false
            },
        }
    }

    /// A read completes with the attribute value itself.
    pub fn on_attribute_value(&self, connection: ConnectionHandle, attribute: u16) -> bool {
        let mut pending = self.lock_pending();

        match pending.take() {
            Some(procedure) if procedure.procedure == Procedure::Read
                && procedure.connection == connection
                && procedure.attribute == attribute => {
                procedure.resolve(WriteOutcome::Success);
                true
            },
            other => {
                *pending = other;
                false
            },
        }
    }

    /// Abort the procedure pending on `connection`, if any. Called when the link drops.
    pub fn abort_connection(&self, connection: ConnectionHandle) -> bool {
        let mut pending = self.lock_pending();

        match pending.take() {
            Some(procedure) if procedure.connection == connection => {
                procedure.resolve(WriteOutcome::Aborted);
                true
            },
            other => {
                *pending = other;
                false
            },
        }
    }

    pub fn has_pending(&self) -> bool {
        self.lock_pending().is_some()
    }
}
