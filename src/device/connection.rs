//! Device lifecycle.
//!
//! ```text
//! Idle --start_scan--> Scanning --connect--> Connecting --link up--> Connected
//! Connected --subscribe--> SubscriptionInFlight --all writes succeeded--> Streaming
//! Streaming --disconnect--> Disconnecting --link down--> Disconnected --start_scan--> Scanning
//! any state --link down--> Disconnected
//! ```
//!
//! Caller-facing operations suspend only the calling task: they send their command and then wait
//! on the session watch channel, which the ingestion path updates as events arrive.

use std::sync::Arc;
use std::time::Duration;
use indexmap::IndexMap;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::types::DriverConfig;
use crate::device::bgapi::{advertises_service, Command, DISCOVER_GENERIC};
use crate::device::constants::{COMMAND_HANDLE, CONNECTION_FLAG_CONNECTED, DEVICE_SETTINGS, EMG_CCCD_HANDLE, ENABLE_NOTIFICATIONS, FIRMWARE_VERSION_HANDLE, IMU_CCCD_HANDLE, MYO_SERVICE_UUID};
use crate::device::transport::Transport;
use crate::device::types::{ConnectionHandle, ConnectionState, DeviceAddress, DiscoveredDevice, SubscriptionStep, WriteOutcome};
use crate::device::write::AttributeWriteCoordinator;
use crate::error::{ConnectionError, SubscriptionError};

/// Inputs of the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StartScan,
    StopScan,
    Connect,
    LinkUp,
    /// The connect attempt was refused or timed out.
    ConnectFailed,
    Subscribe,
    SubscriptionSucceeded,
    SubscriptionFailed,
    Disconnect,
    LinkDown,
}

/// The transition table. `None` means the input is not valid in `state`.
pub fn next_state(state: ConnectionState, transition: Transition) -> Option<ConnectionState> {
    use ConnectionState::*;

    match (state, transition) {
        (_, Transition::LinkDown) => Some(Disconnected),
        (Idle | Scanning | Disconnected, Transition::StartScan) => Some(Scanning),
        (Scanning, Transition::StopScan) => Some(Idle),
        (Scanning, Transition::Connect) => Some(Connecting),
        (Connecting, Transition::LinkUp) => Some(Connected),
        (Connecting, Transition::ConnectFailed) => Some(Idle),
        (Connected, Transition::Subscribe) => Some(SubscriptionInFlight),
        (SubscriptionInFlight, Transition::SubscriptionSucceeded) => Some(Streaming),
        (SubscriptionInFlight, Transition::SubscriptionFailed) => Some(Connected),
        (Connected | SubscriptionInFlight | Streaming, Transition::Disconnect) => Some(Disconnecting),
        _ => None,
    }
}

#[derive(Debug)]
struct Session {
    state: ConnectionState,
    connection: Option<ConnectionHandle>,
    target: Option<DeviceAddress>,
    /// Flags of the connection status that refused the last connect attempt.
    refused: Option<u8>,
    discovered: IndexMap<DeviceAddress, DiscoveredDevice>,
    /// Cancelled when the current link starts closing or goes down.
    link: CancellationToken,
}

impl Session {
    fn new() -> Self {
        Session {
            state: ConnectionState::Idle,
            connection: None,
            target: None,
            refused: None,
            discovered: IndexMap::new(),
            link: CancellationToken::new(),
        }
    }
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    writes: Arc<AttributeWriteCoordinator>,
    config: DriverConfig,
    session: watch::Sender<Session>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, writes: Arc<AttributeWriteCoordinator>, config: DriverConfig) -> Self {
        let (session, _) = watch::channel(Session::new());

        ConnectionManager {
            transport,
            writes,
            config,
            session,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.session.borrow().state
    }

    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.session.borrow().connection
    }

    /// Devices seen during the current scan, in the order they were first seen.
    pub fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.session.borrow().discovered.values().cloned().collect()
    }

    /// The only place the lifecycle state changes. `on_enter` runs on the session with the
    /// previous state once the transition is known to be valid. Returns the previous state.
    fn advance<F>(&self, transition: Transition, operation: &'static str, on_enter: F) -> Result<ConnectionState, ConnectionError>
    where
        F: FnOnce(&mut Session, ConnectionState),
    {
        let mut result = Ok(ConnectionState::Idle);

        self.session.send_if_modified(|session| {
            let previous = session.state;

            match next_state(previous, transition) {
                Some(next) => {
                    if next != previous {
                        info!("Connection state {} -> {} ({:?})", previous, next, transition);
                    }
                    session.state = next;
                    on_enter(session, previous);
                    result = Ok(previous);
                    true
                },
                None => {
                    result = Err(ConnectionError::InvalidState { operation, state: previous });
                    false
                },
            }
        });

        result
    }

    fn send(&self, command: Command) -> Result<(), ConnectionError> {
        debug!("Sending {:?}", command);
        self.transport.send_command(&command.encode())?;
        Ok(())
    }

    /// Wait until `condition` holds for the session, or `deadline` elapses.
    async fn wait_for<F, T>(&self, deadline: Duration, operation: &'static str, condition: F) -> Result<T, ConnectionError>
    where
        F: Fn(&Session) -> Option<T>,
    {
        let mut receiver = self.session.subscribe();

        let waited = timeout(deadline, async {
            let session = receiver.wait_for(|session| condition(session).is_some()).await;
            session.ok().and_then(|session| condition(&session))
        }).await;

        match waited {
            Ok(Some(value)) => Ok(value),
            // the sender lives as long as self, so the channel can not close while waiting
            Ok(None) => Err(ConnectionError::Disconnected),
            Err(_) => Err(ConnectionError::TimedOut { operation }),
        }
    }

    pub fn start_scan(&self) -> Result<(), ConnectionError> {
        self.advance(Transition::StartScan, "start scanning", |session, previous| {
            if previous != ConnectionState::Scanning {
                session.discovered.clear();
                session.target = None;
            }
        })?;

        let scan = self.config.scan;
        let result = self.send(Command::SetScanParameters {
            interval: scan.interval,
            window: scan.window,
            active: scan.active,
        }).and_then(|_| self.send(Command::Discover { mode: DISCOVER_GENERIC }));

        if let Err(err) = result {
            warn!("Failed to start scanning: {}", err);
            let _ = self.advance(Transition::StopScan, "stop scanning", |_, _| {});
            return Err(err);
        }

        Ok(())
    }

    pub fn stop_scan(&self) -> Result<(), ConnectionError> {
        self.advance(Transition::StopScan, "stop scanning", |_, _| {})?;
        self.send(Command::EndProcedure)
    }

    /// Record a scan response. Returns the device if this is the first time it is seen during the
    /// current scan.
    pub fn on_device_found(&self, address: DeviceAddress, rssi: i8, advertisement: &[u8]) -> Option<DiscoveredDevice> {
        let mut found = None;

        self.session.send_if_modified(|session| {
            if session.state != ConnectionState::Scanning {
                debug!("Ignoring scan response from {} while {}", address, session.state);
                return false;
            }

            if session.discovered.contains_key(&address) {
                return false;
            }

            let device = DiscoveredDevice {
                address,
                rssi,
                is_myo: advertises_service(advertisement, &MYO_SERVICE_UUID),
            };
            info!("Found device {} (rssi {}, myo: {})", address, rssi, device.is_myo);
            session.discovered.insert(address, device.clone());
            found = Some(device);
            true
        });

        found
    }

    /// Wait until `address` shows up in a scan response. Resolves immediately if it already did
    /// during the current scan; fails if scanning stops first.
    pub async fn wait_for_device(&self, address: DeviceAddress, deadline: Duration) -> Result<DiscoveredDevice, ConnectionError> {
        let outcome = self.wait_for(deadline, "discover device", |session| {
            match session.discovered.get(&address) {
                Some(device) => Some(Ok(device.clone())),
                None if session.state != ConnectionState::Scanning => Some(Err(session.state)),
                None => None,
            }
        }).await?;

        outcome.map_err(|state| ConnectionError::InvalidState { operation: "discover device", state })
    }

    pub async fn connect(&self, address: DeviceAddress) -> Result<ConnectionHandle, ConnectionError> {
        self.advance(Transition::Connect, "connect", |session, _| {
            session.target = Some(address);
            session.refused = None;
            session.connection = None;
        })?;

        info!("Connecting to {}...", address);
        let parameters = self.config.connect;
        // the dongle refuses to connect while discovery is running
        let result = self.send(Command::EndProcedure).and_then(|_| self.send(Command::ConnectDirect {
            address,
            address_type: parameters.address_type,
            interval_min: parameters.interval_min,
            interval_max: parameters.interval_max,
            timeout: parameters.timeout,
            latency: parameters.latency,
        }));

        if let Err(err) = result {
            warn!("Connecting to {} failed: {}", address, err);
            let _ = self.advance(Transition::ConnectFailed, "connect", |_, _| {});
            return Err(err);
        }

        let waited = self.wait_for(self.config.connect_timeout(), "connect", |session| {
            match session.state {
                ConnectionState::Connecting => None,
                state => Some((state, session.connection, session.refused)),
            }
        }).await;

        match waited {
            Ok((ConnectionState::Connected, Some(connection), _)) => Ok(connection),
            Ok((_, _, Some(flags))) => Err(ConnectionError::Rejected { address, flags }),
            Ok((ConnectionState::Disconnected, _, _)) => Err(ConnectionError::Disconnected),
            Ok((state, _, _)) => Err(ConnectionError::InvalidState { operation: "connect", state }),
            Err(err) => {
                warn!("Connecting to {} took too long", address);
                if let Err(err) = self.send(Command::EndProcedure) {
                    warn!("Failed to cancel connect procedure: {}", err);
                }
                let _ = self.advance(Transition::ConnectFailed, "connect", |_, _| {});
                Err(err)
            },
        }
    }

    /// Record a connection status event. Returns whether it established a new connection.
    pub fn on_connected(&self, connection: ConnectionHandle, address: DeviceAddress, flags: u8) -> bool {
        let state = self.state();

        if state != ConnectionState::Connecting {
            // parameter updates and encryption changes report the status again
            debug!("Connection status for {} (flags {:#04x}) while {}", connection, flags, state);
            return false;
        }

        if flags & CONNECTION_FLAG_CONNECTED == 0 {
            warn!("Connection to {} refused (flags {:#04x})", address, flags);
            let _ = self.advance(Transition::ConnectFailed, "connect", |session, _| {
                session.refused = Some(flags);
            });
            return false;
        }

        let target = self.session.borrow().target;
        if target.is_some() && target != Some(address) {
            warn!("Connected to {} while connecting to {:?}", address, target);
        }

        self.advance(Transition::LinkUp, "connect", |session, _| {
            session.connection = Some(connection);
            session.link = CancellationToken::new();
        }).is_ok()
    }

    /// Returns false if the link went down or is being closed.
    async fn inter_write_delay(&self, link: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = link.cancelled() => false,
            _ = sleep(self.config.inter_write_delay()) => true,
        }
    }

    /// Enable EMG and IMU notifications and configure the device, one write at a time.
    pub async fn subscribe(&self) -> Result<(), SubscriptionError> {
        let (connection, link) = {
            let mut link = None;
            self.advance(Transition::Subscribe, "subscribe", |session, _| {
                link = session.connection.map(|connection| (connection, session.link.clone()));
            }).map_err(|_| SubscriptionError::InvalidState { state: self.state() })?;

            match link {
                Some(link) => link,
                None => {
                    let _ = self.advance(Transition::SubscriptionFailed, "subscribe", |_, _| {});
                    return Err(SubscriptionError::InvalidState { state: self.state() });
                },
            }
        };

        let steps: [(SubscriptionStep, u16, &[u8]); 3] = [
            (SubscriptionStep::EnableEmg, EMG_CCCD_HANDLE, &ENABLE_NOTIFICATIONS),
            (SubscriptionStep::EnableImu, IMU_CCCD_HANDLE, &ENABLE_NOTIFICATIONS),
            (SubscriptionStep::DeviceSettings, COMMAND_HANDLE, &DEVICE_SETTINGS),
        ];
        let mut completed = Vec::new();

        for (step, attribute, payload) in steps {
            let outcome = if self.inter_write_delay(&link).await {
                self.writes.write(connection, attribute, payload, self.config.write_timeout()).await
            } else {
                WriteOutcome::Aborted
            };

            if !outcome.is_success() {
                warn!("Subscription aborted, failed to {}: {}", step, outcome);
                // after a link loss the state is already Disconnected and stays that way
                let _ = self.advance(Transition::SubscriptionFailed, "subscribe", |_, _| {});
                return Err(SubscriptionError::WriteFailed { step, outcome, completed });
            }

            debug!("Subscription step done: {}", step);
            completed.push(step);
        }

        self.advance(Transition::SubscriptionSucceeded, "subscribe", |_, _| {})
            .map_err(|_| SubscriptionError::InvalidState { state: self.state() })?;

        info!("Streaming from connection {}", connection);
        Ok(())
    }

    /// Read the firmware version characteristic. The decoded version is published to the firmware
    /// observer when the value arrives.
    pub async fn request_firmware_version(&self) -> Result<WriteOutcome, ConnectionError> {
        let (state, connection) = {
            let session = self.session.borrow();
            (session.state, session.connection)
        };

        let connection = match (state, connection) {
            (ConnectionState::Connected | ConnectionState::SubscriptionInFlight | ConnectionState::Streaming, Some(connection)) => connection,
            _ => return Err(ConnectionError::InvalidState { operation: "read firmware version", state }),
        };

        info!("Requesting firmware version...");
        Ok(self.writes.read(connection, FIRMWARE_VERSION_HANDLE, self.config.read_timeout()).await)
    }

    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let mut connection = None;
        self.advance(Transition::Disconnect, "disconnect", |session, _| {
            connection = session.connection;
            // a subscription in progress must not write to a closing link
            session.link.cancel();
        })?;

        let connection = match connection {
            Some(connection) => connection,
            None => {
                self.link_down(None);
                return Ok(());
            },
        };

        if let Err(err) = self.send(Command::Disconnect { connection }) {
            warn!("Failed to send disconnect: {}", err);
            self.link_down(Some(connection));
            return Err(err);
        }

        let waited = self.wait_for(self.config.disconnect_timeout(), "disconnect", |session| {
            match session.state {
                ConnectionState::Disconnecting => None,
                state => Some(state),
            }
        }).await;

        if let Err(err) = waited {
            warn!("Disconnecting took too long, dropping connection {}", connection);
            self.link_down(Some(connection));
            return Err(err);
        }

        Ok(())
    }

    fn link_down(&self, connection: Option<ConnectionHandle>) {
        let _ = self.advance(Transition::LinkDown, "drop connection", |session, _| {
            session.connection = None;
            session.link.cancel();
        });

        if let Some(connection) = connection {
            if self.writes.abort_connection(connection) {
                info!("Aborted pending procedure on connection {}", connection);
            }
        }
    }

    /// A dongle reset drops every link without reporting it.
    pub fn on_dongle_reset(&self) {
        if self.state() == ConnectionState::Idle {
            return;
        }

        let connection = self.connection();
        info!("Dongle reset, dropping connection {:?}", connection);
        self.link_down(connection);
    }

    /// Record a disconnected event. Returns false if it concerns a connection other than ours.
    pub fn on_disconnected(&self, connection: ConnectionHandle, reason: u16) -> bool {
        let current = self.connection();
        if current.is_some() && current != Some(connection) {
            debug!("Ignoring disconnect of connection {} (current {:?})", connection, current);
            return false;
        }

        info!("Connection {} closed (reason {:#06x})", connection, reason);
        self.link_down(Some(connection));
        true
    }
}
