use uuid::Uuid;

/**
 * GATT handle of the firmware version characteristic (read).
 */
pub const FIRMWARE_VERSION_HANDLE: u16 = 0x17;

/**
 * GATT handle of the command characteristic. Device settings are written here.
 */
pub const COMMAND_HANDLE: u16 = 0x19;

/**
 * GATT handle on which IMU frames are notified.
 */
pub const IMU_DATA_HANDLE: u16 = 0x1C;

/**
 * Client characteristic configuration descriptor for the IMU data characteristic.
 */
pub const IMU_CCCD_HANDLE: u16 = 0x1D;

/**
 * GATT handle on which EMG frames are notified.
 */
pub const EMG_DATA_HANDLE: u16 = 0x27;

/**
 * Client characteristic configuration descriptor for the EMG data characteristic.
 */
pub const EMG_CCCD_HANDLE: u16 = 0x28;

pub const ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];

/**
 * Set mode command: raw EMG streaming, IMU on, on-board classifier on.
 */
pub const DEVICE_SETTINGS: [u8; 5] = [0x01, 0x03, 0x02, 0x01, 0x01];

/**
 * Minimum delay (milliseconds) between two consecutive attribute writes. The firmware drops
 * writes that arrive faster than this.
 */
pub const INTER_WRITE_DELAY: u64 = 250;

/**
 * How long (milliseconds) an attribute write may take before it is considered lost.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) an attribute read may take.
 */
pub const READ_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) a direct connect may take.
 */
pub const CONNECT_DEADLINE: u64 = 15000;

/**
 * How long (milliseconds) waiting for the disconnected event may take.
 */
pub const DISCONNECT_DEADLINE: u64 = 2000;

/**
 * Number of neighbours consulted by the pose classifier.
 */
pub const CLASSIFIER_K: usize = 10;

/**
 * The Myo control service. Armbands advertise it in their scan response.
 */
pub const MYO_SERVICE_UUID: Uuid = Uuid::from_u128(0xd5060001_a904_deb9_4748_2c7f4a124842);

/**
 * Connection status flag set by the dongle when the link is up.
 */
pub const CONNECTION_FLAG_CONNECTED: u8 = 0x01;
