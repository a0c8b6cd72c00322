//! The single ingestion point for everything the dongle reports.
//!
//! Events must be dispatched in wire arrival order from one task or thread. Dispatch never blocks:
//! it updates the connection state, resolves pending GATT procedures, decodes sensor frames and
//! calls the registered observers inline.

use std::sync::{Arc, RwLock};
use log::{debug, warn};

use crate::classifier::PoseClassifier;
use crate::device::bgapi::parse_event;
use crate::device::codec::{decode_emg, decode_firmware_version, decode_imu};
use crate::device::connection::ConnectionManager;
use crate::device::constants::{EMG_DATA_HANDLE, FIRMWARE_VERSION_HANDLE, IMU_DATA_HANDLE};
use crate::device::types::{ConnectionHandle, DeviceAddress, DiscoveredDevice, EmgSample, FirmwareVersion, ImuSample, Pose, TransportEvent};
use crate::device::write::AttributeWriteCoordinator;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A single callback slot. Registering replaces the previous callback.
pub struct Observer<T> {
    callback: RwLock<Option<Callback<T>>>,
}

impl<T> Observer<T> {
    fn new() -> Self {
        Observer { callback: RwLock::new(None) }
    }

    fn set<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        *self.callback.write().expect("Failed to lock observer") = Some(Arc::new(callback));
    }

    fn clear(&self) {
        *self.callback.write().expect("Failed to lock observer") = None;
    }

    fn notify(&self, value: &T) {
        // called without the lock held, so a callback may register observers itself
        let callback = self.callback.read().expect("Failed to lock observer").clone();
        if let Some(callback) = callback {
            callback(value);
        }
    }
}

pub struct EventRouter {
    manager: Arc<ConnectionManager>,
    writes: Arc<AttributeWriteCoordinator>,
    classifier: Arc<PoseClassifier>,
    device_found: Observer<DiscoveredDevice>,
    connected: Observer<(ConnectionHandle, DeviceAddress)>,
    disconnected: Observer<(ConnectionHandle, u16)>,
    firmware_version: Observer<FirmwareVersion>,
    imu_sample: Observer<ImuSample>,
    emg_sample: Observer<EmgSample>,
    pose: Observer<Pose>,
}

impl EventRouter {
    pub fn new(manager: Arc<ConnectionManager>, writes: Arc<AttributeWriteCoordinator>, classifier: Arc<PoseClassifier>) -> Self {
        EventRouter {
            manager,
            writes,
            classifier,
            device_found: Observer::new(),
            connected: Observer::new(),
            disconnected: Observer::new(),
            firmware_version: Observer::new(),
            imu_sample: Observer::new(),
            emg_sample: Observer::new(),
            pose: Observer::new(),
        }
    }

    pub fn on_device_found<F: Fn(&DiscoveredDevice) + Send + Sync + 'static>(&self, callback: F) {
        self.device_found.set(callback);
    }

    pub fn on_connected<F: Fn(&(ConnectionHandle, DeviceAddress)) + Send + Sync + 'static>(&self, callback: F) {
        self.connected.set(callback);
    }

    /// Called with the connection and the disconnect reason code.
    pub fn on_disconnected<F: Fn(&(ConnectionHandle, u16)) + Send + Sync + 'static>(&self, callback: F) {
        self.disconnected.set(callback);
    }

    pub fn on_firmware_version<F: Fn(&FirmwareVersion) + Send + Sync + 'static>(&self, callback: F) {
        self.firmware_version.set(callback);
    }

    pub fn on_imu_sample<F: Fn(&ImuSample) + Send + Sync + 'static>(&self, callback: F) {
        self.imu_sample.set(callback);
    }

    pub fn on_emg_sample<F: Fn(&EmgSample) + Send + Sync + 'static>(&self, callback: F) {
        self.emg_sample.set(callback);
    }

    /// Only recognized poses are reported.
    pub fn on_pose<F: Fn(&Pose) + Send + Sync + 'static>(&self, callback: F) {
        self.pose.set(callback);
    }

    pub fn clear_observers(&self) {
        self.device_found.clear();
        self.connected.clear();
        self.disconnected.clear();
        self.firmware_version.clear();
        self.imu_sample.clear();
        self.emg_sample.clear();
        self.pose.clear();
    }

    /// Parse a raw BGAPI packet and dispatch it. Malformed packets are logged and dropped.
    pub fn dispatch_packet(&self, packet: &[u8]) {
        match parse_event(packet) {
            Ok(event) => self.dispatch(event),
            Err(err) => warn!("Dropping malformed packet {:02x?}: {}", packet, err),
        }
    }

    pub fn dispatch(&self, event: TransportEvent) {
        match event {
            TransportEvent::DeviceDiscovered { address, rssi, advertisement } => {
                if let Some(device) = self.manager.on_device_found(address, rssi, &advertisement) {
                    self.device_found.notify(&device);
                }
            },
            TransportEvent::Connected { connection, address, flags } => {
                if self.manager.on_connected(connection, address, flags) {
                    self.connected.notify(&(connection, address));
                }
            },
            TransportEvent::Disconnected { connection, reason } => {
                if self.manager.on_disconnected(connection, reason) {
                    self.disconnected.notify(&(connection, reason));
                }
            },
            TransportEvent::WriteCompleted { connection, status, attribute } => {
                if !self.writes.on_procedure_completed(connection, status) {
                    debug!("Unmatched procedure completed for attribute {:#06x} on connection {}", attribute, connection);
                }
            },
            TransportEvent::AttributeValue { connection, attribute, payload } => {
                self.dispatch_attribute_value(connection, attribute, &payload);
            },
            TransportEvent::Ignored { class, method } => {
                debug!("Ignoring packet {}/{}", class, method);
            },
        }
    }

    fn dispatch_attribute_value(&self, connection: ConnectionHandle, attribute: u16, payload: &[u8]) {
        if self.manager.connection() != Some(connection) {
            debug!("Ignoring value of attribute {:#06x} from connection {}", attribute, connection);
            return;
        }

        match attribute {
            EMG_DATA_HANDLE => match decode_emg(payload) {
                Ok(sample) => {
                    self.emg_sample.notify(&sample);

                    let pose = self.classifier.classify(&sample);
                    if pose.is_known() {
                        self.pose.notify(&pose);
                    }
                },
                Err(err) => warn!("Dropping EMG frame: {}", err),
            },
            IMU_DATA_HANDLE => match decode_imu(payload) {
                Ok(sample) => self.imu_sample.notify(&sample),
                Err(err) => warn!("Dropping IMU frame: {}", err),
            },
            FIRMWARE_VERSION_HANDLE => match decode_firmware_version(payload) {
                Ok(version) => {
                    debug!("Firmware version {}", version);
                    self.firmware_version.notify(&version);
                },
                Err(err) => warn!("Dropping firmware version: {}", err),
            },
            _ => debug!("Ignoring value of attribute {:#06x}", attribute),
        }

        // a pending read completes with its value, after observers have seen it
        self.writes.on_attribute_value(connection, attribute);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::classifier::training::TrainingSet;
    use crate::config::types::DriverConfig;
    use crate::device::bgapi::encode_event;
    use crate::device::transport::fake::FakeTransport;
    use crate::device::types::{ConnectionState, WriteOutcome};

    const ADDRESS: DeviceAddress = DeviceAddress::new([0xc3, 0x69, 0x40, 0xb1, 0x5d, 0xf6]);
    const CONNECTION: ConnectionHandle = ConnectionHandle(0);

    struct Fixture {
        transport: Arc<FakeTransport>,
        writes: Arc<AttributeWriteCoordinator>,
        manager: Arc<ConnectionManager>,
        router: Arc<EventRouter>,
    }

    fn setup() -> Fixture {
        let transport = FakeTransport::new();
        let writes = Arc::new(AttributeWriteCoordinator::new(transport.clone()));
        let manager = Arc::new(ConnectionManager::new(transport.clone(), writes.clone(), DriverConfig::default()));
        let classifier = Arc::new(PoseClassifier::new(TrainingSet::bundled().unwrap(), 10));
        let router = Arc::new(EventRouter::new(manager.clone(), writes.clone(), classifier));
        Fixture { transport, writes, manager, router }
    }

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |value: &T| sink.lock().unwrap().push(value.clone()))
    }

    async fn connect(fixture: &Fixture) {
        fixture.manager.start_scan().unwrap();
        let manager = fixture.manager.clone();
        let handle = tokio::spawn(async move { manager.connect(ADDRESS).await });
        while fixture.manager.state() != ConnectionState::Connecting || fixture.transport.sent_count() < 4 {
            tokio::task::yield_now().await;
        }

        fixture.router.dispatch(TransportEvent::Connected { connection: CONNECTION, address: ADDRESS, flags: 0x05 });
        handle.await.unwrap().unwrap();
    }

    fn emg_payload(channels: [i16; 8]) -> Vec<u8> {
        channels.iter().flat_map(|channel| channel.to_le_bytes()).collect()
    }

    #[tokio::test]
    async fn test_device_found_once_per_scan() {
        let fixture = setup();
        let (seen, callback) = recorder::<DiscoveredDevice>();
        fixture.router.on_device_found(callback);
        fixture.manager.start_scan().unwrap();

        for rssi in [-60, -59, -61] {
            fixture.router.dispatch(TransportEvent::DeviceDiscovered { address: ADDRESS, rssi, advertisement: Vec::new() });
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].address, ADDRESS);
        assert_eq!(seen[0].rssi, -60);
    }

    #[tokio::test]
    async fn test_emg_frame_reaches_sample_and_pose_observers() {
        let fixture = setup();
        let (samples, on_sample) = recorder::<EmgSample>();
        let (poses, on_pose) = recorder::<Pose>();
        fixture.router.on_emg_sample(on_sample);
        fixture.router.on_pose(on_pose);
        connect(&fixture).await;

        let (pose, fist) = TrainingSet::bundled().unwrap().samples()[0];
        assert_eq!(pose, Pose::Fist);
        fixture.router.dispatch(TransportEvent::AttributeValue {
            connection: CONNECTION,
            attribute: EMG_DATA_HANDLE,
            payload: emg_payload(fist.0),
        });

        assert_eq!(*samples.lock().unwrap(), vec![fist]);
        assert_eq!(*poses.lock().unwrap(), vec![Pose::Fist]);
    }

    #[tokio::test]
    async fn test_unknown_pose_is_not_published() {
        let transport = FakeTransport::new();
        let writes = Arc::new(AttributeWriteCoordinator::new(transport.clone()));
        let manager = Arc::new(ConnectionManager::new(transport.clone(), writes.clone(), DriverConfig::default()));
        // nothing to vote with, so every frame classifies as unknown
        let classifier = Arc::new(PoseClassifier::new(TrainingSet::default(), 10));
        let router = Arc::new(EventRouter::new(manager.clone(), writes.clone(), classifier));
        let fixture = Fixture { transport, writes, manager, router };

        let (samples, on_sample) = recorder::<EmgSample>();
        let (poses, on_pose) = recorder::<Pose>();
        fixture.router.on_emg_sample(on_sample);
        fixture.router.on_pose(on_pose);
        connect(&fixture).await;

        fixture.router.dispatch(TransportEvent::AttributeValue {
            connection: CONNECTION,
            attribute: EMG_DATA_HANDLE,
            payload: emg_payload([1, 2, 3, 4, 5, 6, 7, 8]),
        });

        assert_eq!(samples.lock().unwrap().len(), 1);
        assert!(poses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let fixture = setup();
        let (samples, on_sample) = recorder::<EmgSample>();
        let (imu, on_imu) = recorder::<ImuSample>();
        fixture.router.on_emg_sample(on_sample);
        fixture.router.on_imu_sample(on_imu);
        connect(&fixture).await;

        fixture.router.dispatch(TransportEvent::AttributeValue { connection: CONNECTION, attribute: EMG_DATA_HANDLE, payload: vec![0; 15] });
        fixture.router.dispatch(TransportEvent::AttributeValue { connection: CONNECTION, attribute: IMU_DATA_HANDLE, payload: vec![0; 13] });
        fixture.router.dispatch_packet(&[0x80, 0x05, 4]);
        fixture.router.dispatch(TransportEvent::AttributeValue { connection: CONNECTION, attribute: IMU_DATA_HANDLE, payload: vec![0; 12] });

        assert!(samples.lock().unwrap().is_empty());
        assert_eq!(imu.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_values_from_other_connections_are_ignored() {
        let fixture = setup();
        let (samples, on_sample) = recorder::<EmgSample>();
        fixture.router.on_emg_sample(on_sample);
        connect(&fixture).await;

        fixture.router.dispatch(TransportEvent::AttributeValue {
            connection: ConnectionHandle(2),
            attribute: EMG_DATA_HANDLE,
            payload: emg_payload([0; 8]),
        });
        assert!(samples.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connected_and_disconnected_observers() {
        let fixture = setup();
        let (connected, on_connected) = recorder::<(ConnectionHandle, DeviceAddress)>();
        let (disconnected, on_disconnected) = recorder::<(ConnectionHandle, u16)>();
        fixture.router.on_connected(on_connected);
        fixture.router.on_disconnected(on_disconnected);
        connect(&fixture).await;

        // a repeated status for an established link is not a new connection
        fixture.router.dispatch(TransportEvent::Connected { connection: CONNECTION, address: ADDRESS, flags: 0x07 });
        fixture.router.dispatch(TransportEvent::Disconnected { connection: ConnectionHandle(3), reason: 0x0208 });
        fixture.router.dispatch(TransportEvent::Disconnected { connection: CONNECTION, reason: 0x0208 });

        assert_eq!(*connected.lock().unwrap(), vec![(CONNECTION, ADDRESS)]);
        assert_eq!(*disconnected.lock().unwrap(), vec![(CONNECTION, 0x0208)]);
        assert_eq!(fixture.manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_firmware_read_publishes_version() {
        let fixture = setup();
        let (versions, on_version) = recorder::<FirmwareVersion>();
        fixture.router.on_firmware_version(on_version);
        connect(&fixture).await;

        let manager = fixture.manager.clone();
        let handle = tokio::spawn(async move { manager.request_firmware_version().await });
        while !fixture.writes.has_pending() {
            tokio::task::yield_now().await;
        }

        fixture.router.dispatch_packet(&encode_event(4, 5, &[0, 0x17, 0x00, 0, 4, 1, 5, 3, 2]));
        assert_eq!(handle.await.unwrap().unwrap(), WriteOutcome::Success);
        assert_eq!(versions.lock().unwrap()[0].to_string(), "1.5.3.2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_completion_is_routed() {
        let fixture = setup();
        connect(&fixture).await;

        let writes = fixture.writes.clone();
        let handle = tokio::spawn(async move { writes.write(CONNECTION, 0x28, &[1, 0], Duration::from_secs(2)).await });
        while !fixture.writes.has_pending() {
            tokio::task::yield_now().await;
        }

        fixture.router.dispatch_packet(&encode_event(4, 1, &[0, 0x00, 0x00, 0x28, 0x00]));
        assert_eq!(handle.await.unwrap(), WriteOutcome::Success);
    }

    #[tokio::test]
    async fn test_ignored_events_do_not_disturb_dispatch() {
        let fixture = setup();
        let (seen, callback) = recorder::<DiscoveredDevice>();
        fixture.router.on_device_found(callback);
        fixture.manager.start_scan().unwrap();

        fixture.router.dispatch(TransportEvent::Ignored { class: 0, method: 0 });
        fixture.router.dispatch_packet(&[0x00, 0x02, 6, 2, 0, 0]);
        fixture.router.dispatch(TransportEvent::DeviceDiscovered { address: ADDRESS, rssi: -50, advertisement: Vec::new() });

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let fixture = setup();
        let (first, on_first) = recorder::<DiscoveredDevice>();
        let (second, on_second) = recorder::<DiscoveredDevice>();
        fixture.router.on_device_found(on_first);
        fixture.router.on_device_found(on_second);
        fixture.manager.start_scan().unwrap();

        fixture.router.dispatch(TransportEvent::DeviceDiscovered { address: ADDRESS, rssi: -50, advertisement: Vec::new() });
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);

        fixture.router.clear_observers();
        fixture.router.dispatch(TransportEvent::DeviceDiscovered { address: DeviceAddress::new([1, 2, 3, 4, 5, 6]), rssi: -50, advertisement: Vec::new() });
        assert_eq!(second.lock().unwrap().len(), 1);
    }
}
