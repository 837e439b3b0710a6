//! Wire formats spoken by the headset: camera bulk commands, composite frame
//! segment/footer layout, firmware HID reports and the packed IMU report.
//!
//! Nothing here relies on struct layout; every message is marshalled field by
//! field in explicit little-endian byte order.

use crate::types::{Timestamp, IMU_SAMPLES_PER_FRAME};

/// Shared magic word, little-endian "Dlo+" on the wire.
pub const MAGIC: u32 = 0x2b6f6c44;

// -- Camera bulk-OUT commands --

pub const START_STOP_COMMAND_SIZE: usize = 12;
pub const SET_EXP_GAIN_COMMAND_SIZE: usize = 18;

/// Build the camera start/stop command.
/// Layout: magic u32 | 0x0c u32 | (0x81 start / 0x82 stop) u16 | reserved u16.
pub fn build_start_stop_command(start: bool) -> [u8; START_STOP_COMMAND_SIZE] {
    let mut buf = [0u8; START_STOP_COMMAND_SIZE];
    buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&0x0cu32.to_le_bytes());
    let word2: u16 = if start { 0x81 } else { 0x82 };
    buf[8..10].copy_from_slice(&word2.to_le_bytes());
    buf
}

/// Build the per-camera exposure/gain command.
/// Layout: magic u32 | 0x12 u32 | 0x80 u16 | camera_type | exposure | gain |
/// camera_type (repeated), all u16 little-endian.
pub fn build_exp_gain_command(
    camera_type: u16,
    exposure: u16,
    gain: u16,
) -> [u8; SET_EXP_GAIN_COMMAND_SIZE] {
    let mut buf = [0u8; SET_EXP_GAIN_COMMAND_SIZE];
    buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&0x12u32.to_le_bytes());
    buf[8..10].copy_from_slice(&0x80u16.to_le_bytes());
    buf[10..12].copy_from_slice(&camera_type.to_le_bytes());
    buf[12..14].copy_from_slice(&exposure.to_le_bytes());
    buf[14..16].copy_from_slice(&gain.to_le_bytes());
    buf[16..18].copy_from_slice(&camera_type.to_le_bytes());
    buf
}

// -- Composite frame geometry --

/// Size of the header at the start of every segment.
pub const SEGMENT_HEADER_SIZE: usize = 0x20;
/// Bytes of the footer that carry meaning; the composite ends right after.
pub const FRAME_FOOTER_SIZE: usize = 26;

pub const FRAME_TYPE_ROOM: u16 = 0;
pub const FRAME_TYPE_CONTROLLER: u16 = 2;

/// Header at the start of each segment of a composite frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub magic: u32,
    /// Common among all segments of one composite; increments per frame.
    pub frame_number: u32,
    /// Equals the segment's index within the composite.
    pub segment_number: u32,
}

impl SegmentHeader {
    /// Decode from the first [`SEGMENT_HEADER_SIZE`] bytes of a segment.
    /// The five trailing reserved words are ignored.
    ///
    /// # Panics
    /// Panics if `bytes` is shorter than [`SEGMENT_HEADER_SIZE`].
    pub fn parse(bytes: &[u8]) -> SegmentHeader {
        assert!(bytes.len() >= SEGMENT_HEADER_SIZE);
        SegmentHeader {
            magic: read_u32(bytes, 0),
            frame_number: read_u32(bytes, 4),
            segment_number: read_u32(bytes, 8),
        }
    }
}

/// Trailer of a composite frame, found at the device profile's footer
/// offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFooter {
    pub timestamp: u64,
    pub sync_timestamp: u64,
    pub usb_frame_number: u32,
    pub magic: u32,
    pub frame_type: u16,
}

impl FrameFooter {
    /// # Panics
    /// Panics if `bytes` is shorter than [`FRAME_FOOTER_SIZE`].
    pub fn parse(bytes: &[u8]) -> FrameFooter {
        assert!(bytes.len() >= FRAME_FOOTER_SIZE);
        FrameFooter {
            timestamp: read_u64(bytes, 0),
            sync_timestamp: read_u64(bytes, 8),
            usb_frame_number: read_u32(bytes, 16),
            magic: read_u32(bytes, 20),
            frame_type: read_u16(bytes, 24),
        }
    }
}

// -- Firmware command channel (HID report 0x02) --

pub const FW_REPORT_ID: u8 = 0x02;
pub const FW_REPORT_SIZE: usize = 64;
/// Capacity of the data field after report id and command bytes.
pub const FW_REPORT_DATA_SIZE: usize = 0x3E;

pub mod fw_cmd {
    pub const START_CALIBRATION_READ: u8 = 0x04;
    pub const START_DEVICE_INFO_READ: u8 = 0x06;
    pub const IMU_INIT: u8 = 0x07;
    pub const ACK_DATA_RECEIVED: u8 = 0x08;
    pub const IMU_STOP: u8 = 0x0b;
    pub const RESET_DEVICE: u8 = 0x0c;
    pub const START_FLASH_LOG_READ: u8 = 0x0d;
    pub const ERASE_FLASH_LOG: u8 = 0x0e;
}

/// Transmitter state byte of an inbound firmware payload report.
pub mod fw_payload_state {
    pub const DATA_READ_START: u8 = 0;
    pub const DATA_READ_PAYLOAD: u8 = 1;
    pub const DATA_READ_END: u8 = 2;
}

/// Build a 64-byte firmware command report.
/// Layout: report_id 0x02 | command u8 | data, zero padded.
///
/// # Panics
/// Panics if `data` exceeds [`FW_REPORT_DATA_SIZE`].
pub fn build_fw_command(command: u8, data: &[u8]) -> [u8; FW_REPORT_SIZE] {
    assert!(data.len() <= FW_REPORT_DATA_SIZE, "firmware command data too long");
    let mut buf = [0u8; FW_REPORT_SIZE];
    buf[0] = FW_REPORT_ID;
    buf[1] = command;
    buf[2..2 + data.len()].copy_from_slice(data);
    buf
}

// -- Host command channel (feature report 0x16) --

pub const COMMAND_REPORT_ID: u8 = 0x16;
pub const COMMAND_REPORT_SIZE: usize = 64;

/// Build the 64-byte feature-report command (id 0x16). Only the command id
/// byte is understood; the remaining fields stay zero.
pub fn build_hid_command(command_id: u8) -> [u8; COMMAND_REPORT_SIZE] {
    let mut buf = [0u8; COMMAND_REPORT_SIZE];
    buf[0] = COMMAND_REPORT_ID;
    buf[1] = command_id;
    buf
}

// -- IMU report (HID report 0x01) --

pub const IMU_REPORT_ID: u8 = 0x01;
pub const IMU_REPORT_SIZE: usize = 381;

pub(crate) const IMU_TEMPERATURE_OFFSET: usize = 0x001;
pub(crate) const IMU_GYRO_TIMESTAMP_OFFSET: usize = 0x009;
pub(crate) const IMU_GYRO_OFFSET: usize = 0x029;
pub(crate) const IMU_ACCEL_TIMESTAMP_OFFSET: usize = 0x0E9;
pub(crate) const IMU_ACCEL_OFFSET: usize = 0x109;
pub(crate) const IMU_MAGNETO_TIMESTAMP_OFFSET: usize = 0x139;
pub(crate) const IMU_MAGNETO_OFFSET: usize = 0x159;
pub(crate) const IMU_USB_FRAME_OFFSET: usize = 0x171;
pub(crate) const IMU_MAGIC_OFFSET: usize = 0x179;

pub(crate) const IMU_GYRO_READINGS: usize = 32;

/// Raw integer view of one IMU report, prior to unit scaling.
/// Axis arrays are indexed `[axis][reading]` as on the wire.
#[derive(Debug, Clone)]
pub struct RawImuReport {
    pub temperature: [u16; IMU_SAMPLES_PER_FRAME],
    /// Timestamp of the *last* gyro reading of each accelerometer period.
    pub gyro_timestamp: [Timestamp; IMU_SAMPLES_PER_FRAME],
    pub gyro: [[i16; IMU_GYRO_READINGS]; 3],
    pub accel_timestamp: [Timestamp; IMU_SAMPLES_PER_FRAME],
    pub accel: [[i32; IMU_SAMPLES_PER_FRAME]; 3],
    /// Zero means the corresponding magnetometer sample is absent.
    pub magneto_timestamp: [u64; IMU_SAMPLES_PER_FRAME],
    pub magneto: [[i16; IMU_SAMPLES_PER_FRAME]; 3],
    pub usb_frame_number: u32,
}

/// Reasons an IMU report failed to parse. Both are log-and-drop conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportError {
    WrongSize(usize),
    BadMagic(u32),
}

/// Decode an IMU report, including the leading report id byte.
pub fn parse_imu_report(report: &[u8]) -> Result<RawImuReport, ReportError> {
    if report.len() != IMU_REPORT_SIZE {
        return Err(ReportError::WrongSize(report.len()));
    }

    let magic = read_u32(report, IMU_MAGIC_OFFSET);
    if magic != MAGIC {
        return Err(ReportError::BadMagic(magic));
    }

    let mut raw = RawImuReport {
        temperature: [0; IMU_SAMPLES_PER_FRAME],
        gyro_timestamp: [Timestamp::default(); IMU_SAMPLES_PER_FRAME],
        gyro: [[0; IMU_GYRO_READINGS]; 3],
        accel_timestamp: [Timestamp::default(); IMU_SAMPLES_PER_FRAME],
        accel: [[0; IMU_SAMPLES_PER_FRAME]; 3],
        magneto_timestamp: [0; IMU_SAMPLES_PER_FRAME],
        magneto: [[0; IMU_SAMPLES_PER_FRAME]; 3],
        usb_frame_number: read_u32(report, IMU_USB_FRAME_OFFSET),
    };

    for i in 0..IMU_SAMPLES_PER_FRAME {
        raw.temperature[i] = read_u16(report, IMU_TEMPERATURE_OFFSET + 2 * i);
        raw.gyro_timestamp[i] =
            Timestamp::from_ticks(read_u64(report, IMU_GYRO_TIMESTAMP_OFFSET + 8 * i) as i64);
        raw.accel_timestamp[i] =
            Timestamp::from_ticks(read_u64(report, IMU_ACCEL_TIMESTAMP_OFFSET + 8 * i) as i64);
        raw.magneto_timestamp[i] = read_u64(report, IMU_MAGNETO_TIMESTAMP_OFFSET + 8 * i);
    }

    for axis in 0..3 {
        for j in 0..IMU_GYRO_READINGS {
            raw.gyro[axis][j] =
                read_u16(report, IMU_GYRO_OFFSET + 2 * (axis * IMU_GYRO_READINGS + j)) as i16;
        }
        for i in 0..IMU_SAMPLES_PER_FRAME {
            raw.accel[axis][i] =
                read_u32(report, IMU_ACCEL_OFFSET + 4 * (axis * IMU_SAMPLES_PER_FRAME + i)) as i32;
            raw.magneto[axis][i] =
                read_u16(report, IMU_MAGNETO_OFFSET + 2 * (axis * IMU_SAMPLES_PER_FRAME + i)) as i16;
        }
    }

    Ok(raw)
}

// -- Firmware log report (HID report 0x03) --

pub const FW_LOG_REPORT_ID: u8 = 0x03;
pub const FW_LOG_REPORT_SIZE: usize = 509;
pub const FW_LOG_MAX_COUNT: usize = 8;
pub const FW_LOG_MAX_MSG: usize = 56;

#[derive(Debug, Clone)]
pub struct FwLogEntry {
    pub time: u32,
    pub count: u16,
    pub level: u8,
    pub msg: String,
}

/// Decode a firmware log report into its entries. The entry list is
/// terminated by the first empty message.
pub fn parse_fw_log_report(report: &[u8]) -> Result<Vec<FwLogEntry>, ReportError> {
    if report.len() != FW_LOG_REPORT_SIZE {
        return Err(ReportError::WrongSize(report.len()));
    }
    let magic = read_u32(report, 1);
    if magic != MAGIC {
        return Err(ReportError::BadMagic(magic));
    }

    const ENTRY_SIZE: usize = 4 + 2 + 1 + FW_LOG_MAX_MSG;
    let mut entries = Vec::new();
    for i in 0..FW_LOG_MAX_COUNT {
        let base = 5 + i * ENTRY_SIZE;
        let msg = &report[base + 7..base + 7 + FW_LOG_MAX_MSG];
        if msg[0] == 0 {
            break;
        }
        let end = msg.iter().position(|&b| b == 0).unwrap_or(FW_LOG_MAX_MSG);
        entries.push(FwLogEntry {
            time: read_u32(report, base),
            count: read_u16(report, base + 4),
            level: report[base + 6],
            msg: String::from_utf8_lossy(&msg[..end]).into_owned(),
        });
    }
    Ok(entries)
}

// -- Mystery reports, logged and discarded --

pub const WICED_REPORT_ID: u8 = 0x05;
pub const WICED_REPORT_SIZE: usize = 509;
/// Capacity of the wiced report's message field, including its terminator.
pub const WICED_MAX_DEBUG_PRINT_SIZE: usize = 503;
pub const MC_EVENT_REPORT_ID: u8 = 0x17;
pub const MC_EVENT_REPORT_SIZE: usize = 7;

// -- Vendor HID feature reports (display wake) --

pub const VENDOR_REPORT_50_ID: u8 = 0x50;
pub const VENDOR_REPORT_50_SIZE: usize = 64;
pub const VENDOR_REPORT_9_ID: u8 = 0x09;
pub const VENDOR_REPORT_9_SIZE: usize = 64;
pub const VENDOR_REPORT_8_ID: u8 = 0x08;
pub const VENDOR_REPORT_8_SIZE: usize = 64;
pub const VENDOR_REPORT_6_ID: u8 = 0x06;
pub const VENDOR_REPORT_6_SIZE: usize = 2;
pub const VENDOR_REPORT_4_ID: u8 = 0x04;
pub const VENDOR_REPORT_4_SIZE: usize = 2;
pub const VENDOR_INTERRUPT_5_ID: u8 = 0x05;
pub const VENDOR_INTERRUPT_5_SIZE: usize = 33;
pub const VENDOR_INTERRUPT_1_ID: u8 = 0x01;
pub const VENDOR_INTERRUPT_1_SIZE: usize = 4;

// -- Little-endian field readers --

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}
