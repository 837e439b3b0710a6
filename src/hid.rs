//! HID transport capability and the input report demultiplexer.
//!
//! The demultiplexer owns a blocking read worker. Every inbound report is
//! keyed by its first byte (the report id) and handed to the reader
//! registered for that id; the demux holds only weak references, so a
//! reader's lifetime is bounded by whoever is awaiting it, never by the
//! demux itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use hidapi::{HidApi, HidDevice};

use crate::{Result, WmrError};

/// Largest report any registered reader expects (the 509-byte firmware log
/// report is the current maximum).
pub const MAX_REPORT_SIZE: usize = 512;

/// Read-loop timeout; also the demux's maximum shutdown latency.
pub const READ_LOOP_TIMEOUT: Duration = Duration::from_millis(100);

/// Outbound half of a HID connection.
pub trait HidWriter: Send + Sync {
    /// Write an output report. Short writes are transport errors.
    fn write_report(&self, report: &[u8]) -> Result<()>;

    /// Send a feature report. Short transfers are transport errors.
    fn set_feature_report(&self, report: &[u8]) -> Result<()>;

    /// Fetch a feature report of `len` bytes (including the report id byte).
    fn get_feature_report(&self, report_id: u8, len: usize) -> Result<Vec<u8>>;
}

/// Inbound half of a HID connection, owned by the demux read worker.
pub trait ReportSource: Send {
    /// Blocking read with timeout. Returns 0 when the timeout elapsed.
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

/// Consumer of inbound reports for a single report id.
///
/// State mutation happens behind `&self`; implementors guard their state
/// internally since updates arrive on the demux worker thread.
pub trait ReportReader: Send + Sync {
    fn update(&self, report: &[u8]);

    /// A reader that declares itself finished after an update is
    /// deregistered automatically.
    fn finished(&self) -> bool {
        false
    }
}

// -- hidapi-backed transport --

pub struct HidapiWriter {
    device: Mutex<HidDevice>,
}

impl HidWriter for HidapiWriter {
    fn write_report(&self, report: &[u8]) -> Result<()> {
        let written = self.device.lock().unwrap().write(report)?;
        if written != report.len() {
            return Err(WmrError::Transport(format!(
                "short HID write ({written} of {})",
                report.len()
            )));
        }
        Ok(())
    }

    fn set_feature_report(&self, report: &[u8]) -> Result<()> {
        self.device.lock().unwrap().send_feature_report(report)?;
        Ok(())
    }

    fn get_feature_report(&self, report_id: u8, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        buf[0] = report_id;
        let read = self.device.lock().unwrap().get_feature_report(&mut buf)?;
        if read != len {
            return Err(WmrError::Transport(format!(
                "short feature report read ({read} of {len})"
            )));
        }
        Ok(buf)
    }
}

pub struct HidapiSource {
    device: HidDevice,
}

impl ReportSource for HidapiSource {
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        Ok(self.device.read_timeout(buf, timeout.as_millis() as i32)?)
    }
}

/// Open a `(vid, pid, serial)` HID device twice: one handle is dedicated to
/// the demux read worker, the other serves writes and feature reports. The
/// kernel delivers input reports to each open handle independently, so reads
/// and writes never contend on one handle.
pub fn open_hid_pair(
    api: &HidApi,
    vid: u16,
    pid: u16,
    serial: Option<&str>,
) -> Result<(HidapiSource, HidapiWriter)> {
    let info = api
        .device_list()
        .find(|d| {
            d.vendor_id() == vid
                && d.product_id() == pid
                && serial.map_or(true, |s| d.serial_number() == Some(s))
        })
        .ok_or(WmrError::DeviceNotFound {
            vid,
            pid,
            matched: 0,
        })?;

    let source = api.open_path(info.path())?;
    let writer = api.open_path(info.path())?;
    Ok((
        HidapiSource { device: source },
        HidapiWriter {
            device: Mutex::new(writer),
        },
    ))
}

// -- Demultiplexer --

#[derive(Default)]
struct ReaderTable {
    slots: Mutex<HashMap<u8, Weak<dyn ReportReader>>>,
}

impl ReaderTable {
    fn lookup(&self, report_id: u8) -> Option<Arc<dyn ReportReader>> {
        self.slots
            .lock()
            .unwrap()
            .get(&report_id)
            .and_then(Weak::upgrade)
    }

    fn deregister(&self, report_id: u8) {
        self.slots.lock().unwrap().remove(&report_id);
    }
}

/// Demultiplexer over one HID connection. Owns the read worker; joined on
/// drop within one read timeout.
pub struct HidRouter {
    readers: Arc<ReaderTable>,
    stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl HidRouter {
    pub fn new(source: impl ReportSource + 'static) -> HidRouter {
        let readers = Arc::new(ReaderTable::default());
        let stop = Arc::new(AtomicBool::new(false));

        let table = Arc::clone(&readers);
        let stop_flag = Arc::clone(&stop);
        let worker = std::thread::Builder::new()
            .name("wmr-hid-read".into())
            .spawn(move || read_loop(source, table, stop_flag))
            .expect("failed to spawn HID read worker");

        HidRouter {
            readers,
            stop,
            worker: Some(worker),
        }
    }

    /// Install `reader` for `report_id`.
    ///
    /// # Panics
    /// Panics if a live reader is already registered for this id; replacing
    /// one without deregistering first is a programming error. A reader whose
    /// owner has dropped it does not count.
    pub fn register_reader(&self, report_id: u8, reader: &Arc<dyn ReportReader>) {
        let mut slots = self.readers.slots.lock().unwrap();
        if let Some(existing) = slots.get(&report_id) {
            assert!(
                existing.upgrade().is_none(),
                "report reader already registered for id {report_id:#04x}"
            );
        }
        slots.insert(report_id, Arc::downgrade(reader));
    }

    /// Remove the reader for `report_id`, if any.
    pub fn deregister_reader(&self, report_id: u8) {
        self.readers.deregister(report_id);
    }
}

impl Drop for HidRouter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn read_loop(mut source: impl ReportSource, table: Arc<ReaderTable>, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; MAX_REPORT_SIZE];

    log::trace!("HID read worker started");
    while !stop.load(Ordering::Acquire) {
        let len = match source.read_report(&mut buf, READ_LOOP_TIMEOUT) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) => {
                log::error!("HID read failed: {e}");
                break;
            }
        };

        // Resolve the reader under the table lock, but run it without the
        // lock: readers may re-enter the demux to deregister themselves.
        let report_id = buf[0];
        let Some(reader) = table.lookup(report_id) else {
            continue;
        };
        reader.update(&buf[..len]);
        if reader.finished() {
            table.deregister(report_id);
        }
    }
    log::trace!("HID read worker exiting");
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedSource;
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct CountingReader {
        updates: AtomicUsize,
        one_shot: bool,
    }

    impl ReportReader for CountingReader {
        fn update(&self, _report: &[u8]) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }

        fn finished(&self) -> bool {
            self.one_shot && self.updates.load(Ordering::SeqCst) > 0
        }
    }

    fn wait_for(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for demux");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn dispatches_by_report_id_exactly_once() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let router = HidRouter::new(ScriptedSource { rx });

        let reader = Arc::new(CountingReader {
            updates: AtomicUsize::new(0),
            one_shot: false,
        });
        router.register_reader(0x42, &(Arc::clone(&reader) as Arc<dyn ReportReader>));

        tx.send(vec![0x41, 1, 2]).unwrap(); // no reader: discarded
        tx.send(vec![0x42, 3, 4]).unwrap();
        wait_for(|| reader.updates.load(Ordering::SeqCst) == 1);

        tx.send(vec![0x42, 5]).unwrap();
        wait_for(|| reader.updates.load(Ordering::SeqCst) == 2);
        drop(router);
    }

    #[test]
    fn one_shot_reader_is_auto_deregistered() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let router = HidRouter::new(ScriptedSource { rx });

        let reader = Arc::new(CountingReader {
            updates: AtomicUsize::new(0),
            one_shot: true,
        });
        router.register_reader(0x02, &(Arc::clone(&reader) as Arc<dyn ReportReader>));

        tx.send(vec![0x02, 0]).unwrap();
        wait_for(|| reader.updates.load(Ordering::SeqCst) == 1);

        // Deregistered after the first report; further reports are discarded.
        tx.send(vec![0x02, 1]).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(reader.updates.load(Ordering::SeqCst), 1);
        drop(router);
    }

    #[test]
    fn dead_reader_slot_may_be_reused() {
        let (_tx, rx) = crossbeam_channel::unbounded();
        let router = HidRouter::new(ScriptedSource { rx });

        let first = Arc::new(CountingReader {
            updates: AtomicUsize::new(0),
            one_shot: false,
        });
        router.register_reader(0x02, &(Arc::clone(&first) as Arc<dyn ReportReader>));
        drop(first);

        // The owner dropped its reader, so re-registering is legal.
        let second = Arc::new(CountingReader {
            updates: AtomicUsize::new(0),
            one_shot: false,
        });
        router.register_reader(0x02, &(second as Arc<dyn ReportReader>));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn double_registration_panics() {
        let (_tx, rx) = crossbeam_channel::unbounded();
        let router = HidRouter::new(ScriptedSource { rx });

        let a = Arc::new(CountingReader {
            updates: AtomicUsize::new(0),
            one_shot: false,
        });
        let b = Arc::new(CountingReader {
            updates: AtomicUsize::new(0),
            one_shot: false,
        });
        router.register_reader(0x02, &(Arc::clone(&a) as Arc<dyn ReportReader>));
        router.register_reader(0x02, &(b as Arc<dyn ReportReader>));
    }
}
