//! Decoding of attribute values notified by the armband.

use crate::device::types::{EmgSample, FirmwareVersion, ImuSample, EMG_CHANNELS};
use crate::error::DecodeError;

pub const EMG_FRAME_LEN: usize = EMG_CHANNELS * 2;
pub const IMU_FRAME_LEN: usize = 6 * 2;
pub const FIRMWARE_VERSION_LEN: usize = 4;

fn expect_len(bytes: &[u8], expected: usize) -> Result<(), DecodeError> {
    if bytes.len() != expected {
        return Err(DecodeError::BadLength { expected, actual: bytes.len() });
    }
    Ok(())
}

/// Reassemble `low | high << 8` and reinterpret as two's complement, so raw 0x7FFF is 32767 and
/// raw 0x8000 is -32768.
fn read_signed(bytes: &[u8], index: usize) -> i16 {
    i16::from_le_bytes([bytes[index * 2], bytes[index * 2 + 1]])
}

/// Decode an EMG frame: exactly 16 bytes, eight little-endian signed channel readings.
pub fn decode_emg(bytes: &[u8]) -> Result<EmgSample, DecodeError> {
    expect_len(bytes, EMG_FRAME_LEN)?;

    let mut channels = [0i16; EMG_CHANNELS];
    for (index, channel) in channels.iter_mut().enumerate() {
        *channel = read_signed(bytes, index);
    }

    Ok(EmgSample(channels))
}

/// Decode an IMU frame: exactly 12 bytes, three gyroscope then three accelerometer readings.
pub fn decode_imu(bytes: &[u8]) -> Result<ImuSample, DecodeError> {
    expect_len(bytes, IMU_FRAME_LEN)?;

    Ok(ImuSample {
        gyroscope: [read_signed(bytes, 0), read_signed(bytes, 1), read_signed(bytes, 2)],
        accelerometer: [read_signed(bytes, 3), read_signed(bytes, 4), read_signed(bytes, 5)],
    })
}

/// Decode the firmware version characteristic. The first four bytes are major, minor, patch and
/// build; trailing bytes (the hardware revision on newer firmware) are ignored.
pub fn decode_firmware_version(bytes: &[u8]) -> Result<FirmwareVersion, DecodeError> {
    if bytes.len() < FIRMWARE_VERSION_LEN {
        return Err(DecodeError::BadLength { expected: FIRMWARE_VERSION_LEN, actual: bytes.len() });
    }

    Ok(FirmwareVersion {
        major: bytes[0],
        minor: bytes[1],
        patch: bytes[2],
        build: bytes[3],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_emg_sign_boundary() {
        let mut bytes = [0u8; 16];
        bytes[0..2].copy_from_slice(&[0xFF, 0x7F]);
        bytes[2..4].copy_from_slice(&[0x00, 0x80]);
        bytes[4..6].copy_from_slice(&[0xFF, 0xFF]);
        bytes[6..8].copy_from_slice(&[0x01, 0x00]);
        bytes[8..10].copy_from_slice(&[0x00, 0x01]);

        let sample = decode_emg(&bytes).unwrap();
        assert_eq!(sample.channels(), &[32767, -32768, -1, 1, 256, 0, 0, 0]);
    }

    #[test]
    fn test_decode_emg_matches_reassembly_rule() {
        let bytes: Vec<u8> = (0..16u8).map(|i| i.wrapping_mul(37).wrapping_add(11)).collect();
        let sample = decode_emg(&bytes).unwrap();

        for (index, value) in sample.channels().iter().enumerate() {
            let raw = bytes[index * 2] as i32 | (bytes[index * 2 + 1] as i32) << 8;
            let expected = if raw >= 32768 { raw - 65536 } else { raw };
            assert_eq!(*value as i32, expected);
        }
    }

    #[test]
    fn test_decode_emg_bad_length() {
        for len in [0, 1, 15, 17, 32] {
            let bytes = vec![0u8; len];
            assert_eq!(decode_emg(&bytes), Err(DecodeError::BadLength { expected: 16, actual: len }));
        }
    }

    #[test]
    fn test_decode_imu() {
        let bytes = [
            0x10, 0x00, 0xF0, 0xFF, 0x00, 0x80,
            0xFF, 0x7F, 0x00, 0x00, 0x34, 0x12,
        ];

        let sample = decode_imu(&bytes).unwrap();
        assert_eq!(sample.gyroscope, [16, -16, -32768]);
        assert_eq!(sample.accelerometer, [32767, 0, 0x1234]);
    }

    #[test]
    fn test_decode_imu_bad_length() {
        assert_eq!(decode_imu(&[0u8; 11]), Err(DecodeError::BadLength { expected: 12, actual: 11 }));
        assert_eq!(decode_imu(&[0u8; 16]), Err(DecodeError::BadLength { expected: 12, actual: 16 }));
    }

    #[test]
    fn test_decode_firmware_version() {
        let version = decode_firmware_version(&[1, 5, 200, 178]).unwrap();
        assert_eq!(version.to_string(), "1.5.200.178");

        let version = decode_firmware_version(&[1, 2, 3, 4, 0, 0, 2, 0]).unwrap();
        assert_eq!(version.to_string(), "1.2.3.4");

        assert_eq!(decode_firmware_version(&[1, 2, 3]), Err(DecodeError::BadLength { expected: 4, actual: 3 }));
    }
}
