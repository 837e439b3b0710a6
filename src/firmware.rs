//! Firmware command channel of the Oasis HID device (report id 0x02), plus
//! the ancillary report readers that only log what the device tells us.
//!
//! Commands are fire-and-forget or acknowledged by the next inbound 0x02
//! report. Larger payloads (factory calibration, device info, flash log) are
//! downloaded through a start/chunk/end handshake with one ACK per received
//! report, driven entirely by the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};

use crate::calibration_key::CALIBRATION_KEY;
use crate::hid::{HidRouter, HidWriter, ReportReader, ReportSource};
use crate::imu::{ImuFrameHandle, ImuReportReader};
use crate::protocol::{self, fw_cmd, fw_payload_state};
use crate::subscribers::SubscriberList;
use crate::{Result, WmrError};

/// Default wait for a command acknowledgement.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound on a whole payload download.
const PAYLOAD_TIMEOUT: Duration = Duration::from_secs(1);

/// Payload kinds the firmware can stream back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    DeviceInfo,
    Calibration,
    FlashLog,
}

impl PayloadType {
    fn start_command(self) -> u8 {
        match self {
            PayloadType::DeviceInfo => fw_cmd::START_DEVICE_INFO_READ,
            PayloadType::Calibration => fw_cmd::START_CALIBRATION_READ,
            PayloadType::FlashLog => fw_cmd::START_FLASH_LOG_READ,
        }
    }

    /// Type byte echoed in DATA_READ_START. The device uses the same value
    /// for calibration and flash log.
    fn wire_value(self) -> u8 {
        match self {
            PayloadType::DeviceInfo => 0,
            PayloadType::Calibration => 1,
            PayloadType::FlashLog => 1,
        }
    }
}

/// Firmware protocol engine. Owns the HID demux of the Oasis device and the
/// IMU decoder that rides on it.
pub struct OasisHid {
    writer: Arc<dyn HidWriter>,
    router: HidRouter,
    imu_subscribers: Arc<SubscriberList<ImuFrameHandle>>,
    imu_reader: Mutex<Option<Arc<ImuReportReader>>>,
    _fw_log_reader: Arc<FwLogReader>,
    _command_reader: Arc<CommandReportReader>,
    _wiced_reader: Arc<WicedReader>,
    _mc_event_reader: Arc<McEventReader>,
}

impl OasisHid {
    /// Build the engine over an open HID connection. Sends a gratuitous IMU
    /// stop so a stream left running by a previous process is quiesced.
    pub(crate) fn new(
        source: impl ReportSource + 'static,
        writer: Arc<dyn HidWriter>,
    ) -> Result<OasisHid> {
        let router = HidRouter::new(source);

        let fw_log_reader = Arc::new(FwLogReader);
        router.register_reader(
            protocol::FW_LOG_REPORT_ID,
            &(Arc::clone(&fw_log_reader) as Arc<dyn ReportReader>),
        );
        let command_reader = Arc::new(CommandReportReader);
        router.register_reader(
            protocol::COMMAND_REPORT_ID,
            &(Arc::clone(&command_reader) as Arc<dyn ReportReader>),
        );
        let wiced_reader = Arc::new(WicedReader);
        router.register_reader(
            protocol::WICED_REPORT_ID,
            &(Arc::clone(&wiced_reader) as Arc<dyn ReportReader>),
        );
        let mc_event_reader = Arc::new(McEventReader);
        router.register_reader(
            protocol::MC_EVENT_REPORT_ID,
            &(Arc::clone(&mc_event_reader) as Arc<dyn ReportReader>),
        );

        let oasis = OasisHid {
            writer,
            router,
            imu_subscribers: Arc::new(SubscriberList::new()),
            imu_reader: Mutex::new(None),
            _fw_log_reader: fw_log_reader,
            _command_reader: command_reader,
            _wiced_reader: wiced_reader,
            _mc_event_reader: mc_event_reader,
        };

        oasis.write_command_await_ack(fw_cmd::IMU_STOP, &[], ACK_TIMEOUT)?;
        Ok(oasis)
    }

    /// Start the inertial stream: installs the IMU decoder for report 0x01
    /// and asks the firmware to begin reporting.
    pub fn start_imu(&self) -> Result<()> {
        let mut slot = self.imu_reader.lock().unwrap();
        let reader = Arc::new(ImuReportReader::new(Arc::clone(&self.imu_subscribers)));
        self.router.register_reader(
            protocol::IMU_REPORT_ID,
            &(Arc::clone(&reader) as Arc<dyn ReportReader>),
        );
        self.write_command_await_ack(fw_cmd::IMU_INIT, &[], ACK_TIMEOUT)?;
        *slot = Some(reader);
        Ok(())
    }

    /// Stop the inertial stream and drop the decoder.
    pub fn stop_imu(&self) -> Result<()> {
        self.write_command_await_ack(fw_cmd::IMU_STOP, &[], ACK_TIMEOUT)?;
        if self.imu_reader.lock().unwrap().take().is_some() {
            self.router.deregister_reader(protocol::IMU_REPORT_ID);
        }
        Ok(())
    }

    /// Subscribe to decoded IMU frames. The callback runs on the HID read
    /// worker and is retained while it returns `true`.
    pub fn register_imu_frame_callback(
        &self,
        callback: impl FnMut(&ImuFrameHandle) -> bool + Send + 'static,
    ) {
        self.imu_subscribers.register(callback);
    }

    /// Download and de-obfuscate the factory calibration blob, yielding its
    /// JSON text.
    pub fn read_calibration(&self) -> Result<String> {
        let payload = self.read_firmware_payload(PayloadType::Calibration)?;

        if payload.len() < 2 {
            return Err(WmrError::Protocol(
                "calibration blob shorter than its header size field".into(),
            ));
        }
        let header_size = protocol::read_u16(&payload, 0) as usize;
        let json_offset = header_size + 2;
        if payload.len() < json_offset {
            return Err(WmrError::Protocol(
                "calibration blob shorter than its header".into(),
            ));
        }

        unscramble_calibration(&payload[json_offset..])
    }

    /// Download the device information payload. Its field layout is not
    /// understood, so it stays an opaque byte string.
    pub fn read_device_info(&self) -> Result<Vec<u8>> {
        self.read_firmware_payload(PayloadType::DeviceInfo)
    }

    /// Download the firmware's persistent flash log.
    pub fn read_flash_log(&self) -> Result<Vec<u8>> {
        self.read_firmware_payload(PayloadType::FlashLog)
    }

    /// Erase the firmware's persistent flash log.
    pub fn erase_flash_log(&self) -> Result<()> {
        self.write_command_await_ack(fw_cmd::ERASE_FLASH_LOG, &[], ACK_TIMEOUT)
    }

    /// Ask the firmware to reset the device. The device drops off the bus, so
    /// no acknowledgement is awaited.
    pub fn reset_device(&self) -> Result<()> {
        self.write_command(fw_cmd::RESET_DEVICE, &[])
    }

    /// Send a command through the 0x16 feature report channel.
    pub fn write_hid_command(&self, command_id: u8) -> Result<()> {
        self.writer
            .set_feature_report(&protocol::build_hid_command(command_id))
    }

    /// Fire-and-forget firmware command.
    pub fn write_command(&self, command: u8, data: &[u8]) -> Result<()> {
        self.writer
            .write_report(&protocol::build_fw_command(command, data))
    }

    /// Send a firmware command and wait for the device's acknowledgement
    /// report. The ack reader is installed before the write so a fast reply
    /// cannot be missed.
    pub fn write_command_await_ack(
        &self,
        command: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let (done, ack) = bounded(1);
        let reader = Arc::new(AckReader {
            done,
            fired: AtomicBool::new(false),
        });
        self.router.register_reader(
            protocol::FW_REPORT_ID,
            &(Arc::clone(&reader) as Arc<dyn ReportReader>),
        );

        self.write_command(command, data)?;

        ack.recv_timeout(timeout).map_err(|_| WmrError::Timeout)
    }

    fn read_firmware_payload(&self, payload_type: PayloadType) -> Result<Vec<u8>> {
        let (done, result) = bounded(1);
        let reader = Arc::new(FwPayloadReader {
            writer: Arc::clone(&self.writer),
            payload_type,
            progress: Mutex::new(PayloadProgress::default()),
            done,
            finished: AtomicBool::new(false),
        });
        self.router.register_reader(
            protocol::FW_REPORT_ID,
            &(Arc::clone(&reader) as Arc<dyn ReportReader>),
        );

        self.write_command(payload_type.start_command(), &[])?;

        result
            .recv_timeout(PAYLOAD_TIMEOUT)
            .map_err(|_| WmrError::Timeout)?
    }
}

impl Drop for OasisHid {
    fn drop(&mut self) {
        // Leave the firmware quiet for the next user of the device.
        let _ = self.write_command_await_ack(fw_cmd::IMU_STOP, &[], ACK_TIMEOUT);
    }
}

/// XOR the scrambled region of the calibration blob back into JSON text.
///
/// Credit to Max Thomas, who worked the masking out for OpenHMD
/// (OpenHMD/OpenHMD#179).
fn unscramble_calibration(scrambled: &[u8]) -> Result<String> {
    let json: Vec<u8> = scrambled
        .iter()
        .enumerate()
        .map(|(i, &b)| b ^ CALIBRATION_KEY[i % CALIBRATION_KEY.len()])
        .collect();
    String::from_utf8(json)
        .map_err(|_| WmrError::Protocol("unscrambled calibration is not UTF-8".into()))
}

// -- One-shot acknowledgement reader --

struct AckReader {
    done: Sender<()>,
    fired: AtomicBool,
}

impl ReportReader for AckReader {
    fn update(&self, _report: &[u8]) {
        self.fired.store(true, Ordering::Release);
        let _ = self.done.try_send(());
    }

    fn finished(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

// -- Payload download reader --

#[derive(Default)]
struct PayloadProgress {
    started: bool,
    expected: usize,
    buf: Vec<u8>,
}

/// Three-state reader driven by the device:
/// `AwaitStart --start--> Receiving --end--> Done`, with any violation or
/// transport failure terminal. Resolves exactly one result through `done`.
struct FwPayloadReader {
    writer: Arc<dyn HidWriter>,
    payload_type: PayloadType,
    progress: Mutex<PayloadProgress>,
    done: Sender<Result<Vec<u8>>>,
    finished: AtomicBool,
}

impl FwPayloadReader {
    fn ack(&self) -> Result<()> {
        self.writer
            .write_report(&protocol::build_fw_command(fw_cmd::ACK_DATA_RECEIVED, &[]))
    }

    fn process(&self, report: &[u8]) -> Result<Option<Vec<u8>>> {
        if report.len() < 2 {
            return Err(WmrError::Protocol("firmware report too short".into()));
        }

        let mut progress = self.progress.lock().unwrap();
        match report[1] {
            fw_payload_state::DATA_READ_START => {
                if progress.started {
                    return Err(WmrError::Protocol("repeated DATA_READ_START".into()));
                }
                progress.started = true;

                if report.len() < 7 {
                    return Err(WmrError::Protocol("DATA_READ_START report too short".into()));
                }
                if report[2] != self.payload_type.wire_value() {
                    return Err(WmrError::Protocol(
                        "DATA_READ_START indicates wrong payload type".into(),
                    ));
                }

                // Bytes 3-6: payload size, big-endian.
                progress.expected =
                    u32::from_be_bytes(report[3..7].try_into().unwrap()) as usize;
                let expected = progress.expected;
                progress.buf.reserve(expected);

                drop(progress);
                self.ack()?;
                Ok(None)
            }

            fw_payload_state::DATA_READ_PAYLOAD => {
                if !progress.started {
                    return Err(WmrError::Protocol(
                        "DATA_READ_PAYLOAD came before DATA_READ_START".into(),
                    ));
                }
                if report.len() < 3 {
                    return Err(WmrError::Protocol(
                        "DATA_READ_PAYLOAD report too short".into(),
                    ));
                }

                let chunk_size = report[2] as usize;
                if chunk_size + 3 > report.len() {
                    return Err(WmrError::Protocol(
                        "chunk size larger than remainder of report".into(),
                    ));
                }
                if progress.buf.len() + chunk_size > progress.expected {
                    return Err(WmrError::Protocol(
                        "chunk would overflow announced payload size".into(),
                    ));
                }

                progress.buf.extend_from_slice(&report[3..3 + chunk_size]);

                drop(progress);
                self.ack()?;
                Ok(None)
            }

            fw_payload_state::DATA_READ_END => {
                if !progress.started {
                    return Err(WmrError::Protocol(
                        "DATA_READ_END came before DATA_READ_START".into(),
                    ));
                }
                if progress.buf.len() != progress.expected {
                    return Err(WmrError::Protocol(
                        "DATA_READ_END before payload complete".into(),
                    ));
                }

                // DATA_READ_END is not acknowledged.
                Ok(Some(std::mem::take(&mut progress.buf)))
            }

            other => Err(WmrError::Protocol(format!(
                "unknown payload transmitter state {other}"
            ))),
        }
    }
}

impl ReportReader for FwPayloadReader {
    fn update(&self, report: &[u8]) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        match self.process(report) {
            Ok(None) => {}
            Ok(Some(payload)) => {
                self.finished.store(true, Ordering::Release);
                let _ = self.done.try_send(Ok(payload));
            }
            Err(e) => {
                self.finished.store(true, Ordering::Release);
                let _ = self.done.try_send(Err(e));
            }
        }
    }

    fn finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

// -- Ancillary readers: log what the device says, act on nothing --

struct FwLogReader;

impl ReportReader for FwLogReader {
    fn update(&self, report: &[u8]) {
        match protocol::parse_fw_log_report(report) {
            Ok(entries) => {
                for entry in entries {
                    log::debug!(
                        "[fw log] [time={} level={}] {}",
                        entry.time,
                        entry.level,
                        entry.msg
                    );
                }
            }
            Err(protocol::ReportError::WrongSize(size)) => {
                log::warn!("firmware log report has wrong size ({size})");
            }
            Err(protocol::ReportError::BadMagic(magic)) => {
                log::warn!("firmware log report has bad magic ({magic:08x})");
            }
        }
    }
}

struct CommandReportReader;

impl ReportReader for CommandReportReader {
    fn update(&self, report: &[u8]) {
        if report.len() != protocol::COMMAND_REPORT_SIZE {
            log::warn!("command report has wrong size ({})", report.len());
        } else if report[1] != 8 && report[1] != 9 {
            log::warn!("command report has unexpected command_id {}", report[1]);
        } else {
            log::info!(
                "[command report] [command_id={:#x}] {:02x?}",
                report[1],
                &report[2..16]
            );
        }
    }
}

struct WicedReader;

impl ReportReader for WicedReader {
    fn update(&self, report: &[u8]) {
        if report.len() != protocol::WICED_REPORT_SIZE {
            log::warn!("wiced report has wrong size ({})", report.len());
            return;
        }
        let hci_group = report[3];
        if hci_group != 2 {
            return;
        }
        let size = protocol::read_u16(report, 4) as usize;
        // The message field holds at most 503 bytes including its terminator.
        if size + 1 > protocol::WICED_MAX_DEBUG_PRINT_SIZE {
            log::warn!("wiced report has invalid size field ({size})");
            return;
        }
        log::info!(
            "[wiced] [hci_group={hci_group}] {}",
            String::from_utf8_lossy(&report[6..6 + size])
        );
    }
}

struct McEventReader;

impl ReportReader for McEventReader {
    fn update(&self, report: &[u8]) {
        if report.len() != protocol::MC_EVENT_REPORT_SIZE {
            log::warn!("MC event report has wrong size ({})", report.len());
        } else {
            log::info!("[mc event] {:02x?}", &report[1..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::testing::{ScriptedSource, ScriptedWriter};
    use crate::protocol::{FW_REPORT_ID, IMU_REPORT_ID, IMU_REPORT_SIZE, MAGIC};

    fn ack_report() -> Vec<u8> {
        vec![FW_REPORT_ID, 0]
    }

    /// OasisHid over a scripted transport whose writer script decides the
    /// device's replies.
    fn scripted_oasis(
        script: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    ) -> (OasisHid, Arc<ScriptedWriter>) {
        let (inject, rx) = crossbeam_channel::unbounded();
        let writer = Arc::new(ScriptedWriter::new(inject));
        *writer.on_write.lock().unwrap() = Some(Box::new(script));
        let oasis = OasisHid::new(
            ScriptedSource { rx },
            Arc::clone(&writer) as Arc<dyn HidWriter>,
        )
        .unwrap();
        (oasis, writer)
    }

    /// Acks every awaited command; used where the test focuses elsewhere.
    fn ack_everything(report: &[u8]) -> Vec<Vec<u8>> {
        match report[1] {
            fw_cmd::IMU_STOP | fw_cmd::IMU_INIT | fw_cmd::ERASE_FLASH_LOG => vec![ack_report()],
            _ => vec![],
        }
    }

    fn start_report(payload_type: PayloadType, total: u32) -> Vec<u8> {
        let mut report = vec![FW_REPORT_ID, fw_payload_state::DATA_READ_START];
        report.push(payload_type.wire_value());
        report.extend_from_slice(&total.to_be_bytes());
        report
    }

    fn chunk_report(chunk: &[u8]) -> Vec<u8> {
        let mut report = vec![
            FW_REPORT_ID,
            fw_payload_state::DATA_READ_PAYLOAD,
            chunk.len() as u8,
        ];
        report.extend_from_slice(chunk);
        report
    }

    fn end_report() -> Vec<u8> {
        vec![FW_REPORT_ID, fw_payload_state::DATA_READ_END]
    }

    fn scramble(plain: &[u8]) -> Vec<u8> {
        plain
            .iter()
            .enumerate()
            .map(|(i, &b)| b ^ CALIBRATION_KEY[i % CALIBRATION_KEY.len()])
            .collect()
    }

    #[test]
    fn unscramble_round_trips_through_the_key() {
        let json = br#"{"CalibrationInformation":{}}"#;
        let scrambled = scramble(json);
        assert_ne!(&scrambled, json);
        assert_eq!(
            unscramble_calibration(&scrambled).unwrap().as_bytes(),
            json
        );
    }

    #[test]
    fn calibration_download_acks_every_report_but_end() {
        let json = br#"{"CalibrationInformation":{"Cameras":[]}}"#.to_vec();
        // Blob: header_size=4, 4 header bytes, then the scrambled JSON.
        let mut blob = vec![4u8, 0, 0xde, 0xad, 0xbe, 0xef];
        blob.extend_from_slice(&scramble(&json));

        let chunks: Vec<Vec<u8>> = blob.chunks(16).map(<[u8]>::to_vec).collect();
        let n_chunks = chunks.len();
        let total = blob.len() as u32;

        let mut pending = chunks.into_iter().chain(std::iter::once(Vec::new()));
        let (oasis, writer) = scripted_oasis(move |report| match report[1] {
            fw_cmd::IMU_STOP => vec![ack_report()],
            fw_cmd::START_CALIBRATION_READ => {
                vec![start_report(PayloadType::Calibration, total)]
            }
            fw_cmd::ACK_DATA_RECEIVED => match pending.next() {
                Some(chunk) if !chunk.is_empty() => vec![chunk_report(&chunk)],
                Some(_) => vec![end_report()],
                None => vec![],
            },
            _ => vec![],
        });

        let decoded = oasis.read_calibration().unwrap();
        assert_eq!(decoded.as_bytes(), &json[..]);

        // One ACK for the start report and one per chunk; none for end.
        let acks = writer
            .writes()
            .iter()
            .filter(|w| w[0] == FW_REPORT_ID && w[1] == fw_cmd::ACK_DATA_RECEIVED)
            .count();
        assert_eq!(acks, 1 + n_chunks);
        drop(oasis);
    }

    #[test]
    fn payload_download_times_out_without_replies() {
        let (oasis, _writer) = scripted_oasis(|report| match report[1] {
            fw_cmd::IMU_STOP => vec![ack_report()],
            _ => vec![],
        });
        assert!(matches!(
            oasis.read_device_info(),
            Err(WmrError::Timeout)
        ));
    }

    #[test]
    fn await_ack_times_out_when_device_is_silent() {
        let (oasis, _writer) = scripted_oasis(|report| match report[1] {
            fw_cmd::IMU_STOP => vec![ack_report()],
            _ => vec![],
        });
        assert!(matches!(
            oasis.write_command_await_ack(fw_cmd::IMU_INIT, &[], Duration::from_millis(50)),
            Err(WmrError::Timeout)
        ));
    }

    #[test]
    fn imu_reports_flow_once_started() {
        let (oasis, writer) = scripted_oasis(ack_everything);
        let frames = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count = Arc::clone(&frames);
        oasis.register_imu_frame_callback(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            true
        });
        oasis.start_imu().unwrap();

        // 25 reports push the decoder past its 100-sample warm-up.
        for n in 0..25i64 {
            let mut report = vec![0u8; IMU_REPORT_SIZE];
            report[0] = IMU_REPORT_ID;
            report[0x179..0x17D].copy_from_slice(&MAGIC.to_le_bytes());
            for i in 0..4 {
                let t = ((10_000 + (n * 4 + i) * 10_000) as u64).to_le_bytes();
                report[0x0E9 + 8 * i as usize..0x0E9 + 8 * i as usize + 8].copy_from_slice(&t);
                report[0x009 + 8 * i as usize..0x009 + 8 * i as usize + 8].copy_from_slice(&t);
            }
            writer.inject.send(report).unwrap();
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while frames.load(Ordering::SeqCst) == 0 {
            assert!(std::time::Instant::now() < deadline, "no IMU frame arrived");
            std::thread::sleep(Duration::from_millis(1));
        }
        oasis.stop_imu().unwrap();
    }

    // Violations drive the payload reader directly; no demux needed.

    fn bare_reader(payload_type: PayloadType) -> (FwPayloadReader, crossbeam_channel::Receiver<Result<Vec<u8>>>) {
        let (inject, _rx) = crossbeam_channel::unbounded();
        let (done, result) = bounded(1);
        (
            FwPayloadReader {
                writer: Arc::new(ScriptedWriter::new(inject)),
                payload_type,
                progress: Mutex::new(PayloadProgress::default()),
                done,
                finished: AtomicBool::new(false),
            },
            result,
        )
    }

    #[test]
    fn chunk_before_start_is_fatal() {
        let (reader, result) = bare_reader(PayloadType::Calibration);
        reader.update(&chunk_report(&[1, 2, 3]));
        assert!(matches!(result.try_recv().unwrap(), Err(WmrError::Protocol(_))));
        assert!(ReportReader::finished(&reader));
    }

    #[test]
    fn duplicate_start_is_fatal() {
        let (reader, result) = bare_reader(PayloadType::Calibration);
        reader.update(&start_report(PayloadType::Calibration, 8));
        reader.update(&start_report(PayloadType::Calibration, 8));
        assert!(matches!(result.try_recv().unwrap(), Err(WmrError::Protocol(_))));
    }

    #[test]
    fn wrong_payload_type_echo_is_fatal() {
        let (reader, result) = bare_reader(PayloadType::DeviceInfo);
        reader.update(&start_report(PayloadType::Calibration, 8));
        assert!(matches!(result.try_recv().unwrap(), Err(WmrError::Protocol(_))));
    }

    #[test]
    fn oversized_chunk_is_fatal() {
        let (reader, result) = bare_reader(PayloadType::Calibration);
        reader.update(&start_report(PayloadType::Calibration, 4));
        reader.update(&chunk_report(&[0; 5]));
        assert!(matches!(result.try_recv().unwrap(), Err(WmrError::Protocol(_))));
    }

    #[test]
    fn early_end_is_fatal() {
        let (reader, result) = bare_reader(PayloadType::Calibration);
        reader.update(&start_report(PayloadType::Calibration, 4));
        reader.update(&chunk_report(&[0; 2]));
        reader.update(&end_report());
        assert!(matches!(result.try_recv().unwrap(), Err(WmrError::Protocol(_))));
    }

    #[test]
    fn complete_download_resolves_with_payload() {
        let (reader, result) = bare_reader(PayloadType::FlashLog);
        reader.update(&start_report(PayloadType::FlashLog, 4));
        reader.update(&chunk_report(&[1, 2]));
        reader.update(&chunk_report(&[3, 4]));
        reader.update(&end_report());
        assert_eq!(result.try_recv().unwrap().unwrap(), vec![1, 2, 3, 4]);
    }
}
