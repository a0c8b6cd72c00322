use std::sync::{Arc, Mutex, Weak};

use myo_armband::Driver;
use myo_armband::classifier::training::TrainingSet;
use myo_armband::config::types::DriverConfig;
use myo_armband::device::bgapi::{encode_event, packet_id, Command};
use myo_armband::device::constants::{COMMAND_HANDLE, EMG_CCCD_HANDLE, EMG_DATA_HANDLE, IMU_CCCD_HANDLE, IMU_DATA_HANDLE, MYO_SERVICE_UUID};
use myo_armband::device::router::EventRouter;
use myo_armband::device::transport::Transport;
use myo_armband::device::types::{ConnectionHandle, ConnectionState, DeviceAddress, DiscoveredDevice, FirmwareVersion, ImuSample, Pose, SubscriptionStep, WriteOutcome};
use myo_armband::error::{SubscriptionError, TransportError};

const ADDRESS: DeviceAddress = DeviceAddress::new([0xc3, 0x69, 0x40, 0xb1, 0x5d, 0xf6]);
const CONNECTION: u8 = 0;

/// Answers commands the way a BLED112 talking to an armband would, by feeding reply events back
/// into the router.
#[derive(Default)]
struct SimulatedArmband {
    router: Mutex<Weak<EventRouter>>,
    sent: Mutex<Vec<Vec<u8>>>,
    /// Attribute whose writes fail with "write not permitted".
    failing_attribute: Option<u16>,
}

impl SimulatedArmband {
    fn attach(&self, router: &Arc<EventRouter>) {
        *self.router.lock().unwrap() = Arc::downgrade(router);
    }

    fn attribute_writes(&self) -> Vec<u16> {
        self.sent.lock().unwrap()
            .iter()
            .filter(|command| packet_id(command) == Some((4, 5)))
            .map(|command| u16::from_le_bytes([command[5], command[6]]))
            .collect()
    }

    fn reply_to(&self, command: &[u8]) -> Option<Vec<u8>> {
        match packet_id(command)? {
            (6, 2) => Some(scan_response(-55)),
            (6, 3) => {
                let mut payload = vec![CONNECTION, 0x05];
                payload.extend_from_slice(&ADDRESS.to_wire());
                payload.extend_from_slice(&[1, 0x06, 0x00, 0x64, 0x00, 0x00, 0x00, 0xff]);
                Some(encode_event(3, 0, &payload))
            },
            (4, 5) => {
                let attribute = u16::from_le_bytes([command[5], command[6]]);
                let status: u16 = if self.failing_attribute == Some(attribute) { 0x0403 } else { 0 };
                let mut payload = vec![command[4]];
                payload.extend_from_slice(&status.to_le_bytes());
                payload.extend_from_slice(&attribute.to_le_bytes());
                Some(encode_event(4, 1, &payload))
            },
            (4, 4) => Some(encode_event(4, 5, &[command[4], command[5], command[6], 0, 8, 1, 5, 3, 2, 0, 0, 2, 0])),
            (3, 0) => Some(encode_event(3, 4, &[command[4], 0x16, 0x02])),
            _ => None,
        }
    }
}

impl Transport for SimulatedArmband {
    fn send_command(&self, command: &[u8]) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(command.to_vec());

        let reply = self.reply_to(command);
        let router = self.router.lock().unwrap().upgrade();
        if let (Some(reply), Some(router)) = (reply, router) {
            router.dispatch_packet(&reply);
        }
        Ok(())
    }
}

fn scan_response(rssi: i8) -> Vec<u8> {
    let mut uuid = *MYO_SERVICE_UUID.as_bytes();
    uuid.reverse();
    let mut advertisement = vec![0x02, 0x01, 0x06, 17, 0x07];
    advertisement.extend_from_slice(&uuid);

    let mut payload = vec![rssi as u8, 0];
    payload.extend_from_slice(&ADDRESS.to_wire());
    payload.extend_from_slice(&[1, 0xff, advertisement.len() as u8]);
    payload.extend_from_slice(&advertisement);
    encode_event(6, 0, &payload)
}

fn notification(attribute: u16, values: &[i16]) -> Vec<u8> {
    let data: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();
    let mut payload = vec![CONNECTION];
    payload.extend_from_slice(&attribute.to_le_bytes());
    payload.push(1);
    payload.push(data.len() as u8);
    payload.extend_from_slice(&data);
    encode_event(4, 5, &payload)
}

fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |value: &T| sink.lock().unwrap().push(value.clone()))
}

async fn setup(armband: SimulatedArmband) -> (Arc<SimulatedArmband>, Driver) {
    let armband = Arc::new(armband);
    let driver = Driver::new(armband.clone(), DriverConfig::default()).await.unwrap();
    armband.attach(&driver.router());
    (armband, driver)
}

#[tokio::test(start_paused = true)]
async fn test_full_session() {
    let (armband, driver) = setup(SimulatedArmband::default()).await;
    let router = driver.router();
    let connection = driver.connection();

    let (devices, on_device) = recorder::<DiscoveredDevice>();
    let (versions, on_version) = recorder::<FirmwareVersion>();
    let (poses, on_pose) = recorder::<Pose>();
    let (imu, on_imu) = recorder::<ImuSample>();
    let (disconnects, on_disconnect) = recorder::<(ConnectionHandle, u16)>();
    router.on_device_found(on_device);
    router.on_firmware_version(on_version);
    router.on_pose(on_pose);
    router.on_imu_sample(on_imu);
    router.on_disconnected(on_disconnect);

    driver.start().unwrap();
    connection.start_scan().unwrap();
    let device = connection.wait_for_device(ADDRESS, std::time::Duration::from_secs(1)).await.unwrap();
    assert!(device.is_myo);
    assert_eq!(device.rssi, -55);
    assert_eq!(*devices.lock().unwrap(), vec![device]);

    let handle = connection.connect(ADDRESS).await.unwrap();
    assert_eq!(handle, ConnectionHandle(CONNECTION));
    assert_eq!(connection.state(), ConnectionState::Connected);

    assert_eq!(connection.request_firmware_version().await.unwrap(), WriteOutcome::Success);
    assert_eq!(versions.lock().unwrap()[0].to_string(), "1.5.3.2");

    connection.subscribe().await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Streaming);
    assert_eq!(armband.attribute_writes(), vec![EMG_CCCD_HANDLE, IMU_CCCD_HANDLE, COMMAND_HANDLE]);

    let training = TrainingSet::bundled().unwrap();
    let (pose, spread) = training.samples().iter().find(|(pose, _)| *pose == Pose::Spread).copied().unwrap();
    router.dispatch_packet(&notification(EMG_DATA_HANDLE, spread.channels()));
    router.dispatch_packet(&notification(IMU_DATA_HANDLE, &[1, 2, 3, -4, -5, -6]));
    assert_eq!(*poses.lock().unwrap(), vec![pose]);
    assert_eq!(imu.lock().unwrap()[0].accelerometer, [-4, -5, -6]);

    connection.disconnect().await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(*disconnects.lock().unwrap(), vec![(ConnectionHandle(CONNECTION), 0x0216)]);
    assert!(armband.sent.lock().unwrap().contains(&Command::Disconnect { connection: handle }.encode()));

    // a new scan reports the device again
    connection.start_scan().unwrap();
    assert_eq!(devices.lock().unwrap().len(), 2);

    driver.reset().unwrap();
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(armband.sent.lock().unwrap().last().unwrap(), &Command::SystemReset { boot_in_dfu: false }.encode());
}

#[tokio::test(start_paused = true)]
async fn test_failed_subscription_write_stays_connected() {
    let (armband, driver) = setup(SimulatedArmband {
        failing_attribute: Some(IMU_CCCD_HANDLE),
        ..SimulatedArmband::default()
    }).await;
    let connection = driver.connection();

    connection.start_scan().unwrap();
    connection.connect(ADDRESS).await.unwrap();

    match connection.subscribe().await {
        Err(SubscriptionError::WriteFailed { step, outcome, completed }) => {
            assert_eq!(step, SubscriptionStep::EnableImu);
            assert_eq!(outcome, WriteOutcome::Failed(0x0403));
            assert_eq!(completed, vec![SubscriptionStep::EnableEmg]);
        },
        other => panic!("unexpected result {:?}", other),
    }

    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(armband.attribute_writes(), vec![EMG_CCCD_HANDLE, IMU_CCCD_HANDLE]);
}

#[tokio::test]
async fn test_repeated_scan_responses_report_device_once() {
    let (_armband, driver) = setup(SimulatedArmband::default()).await;
    let router = driver.router();
    let (devices, on_device) = recorder::<DiscoveredDevice>();
    router.on_device_found(on_device);

    driver.connection().start_scan().unwrap();
    router.dispatch_packet(&scan_response(-60));
    router.dispatch_packet(&scan_response(-48));

    assert_eq!(devices.lock().unwrap().len(), 1);
    assert_eq!(driver.connection().discovered_devices().len(), 1);
}

#[tokio::test]
async fn test_notifications_before_connecting_are_dropped() {
    let (_armband, driver) = setup(SimulatedArmband::default()).await;
    let router = driver.router();
    let (poses, on_pose) = recorder::<Pose>();
    router.on_pose(on_pose);

    router.dispatch_packet(&notification(EMG_DATA_HANDLE, &[0; 8]));
    router.dispatch_packet(&[0x80, 0x10, 4, 5, 0]);

    assert!(poses.lock().unwrap().is_empty());
    assert_eq!(driver.connection().state(), ConnectionState::Idle);
}
