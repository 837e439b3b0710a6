//! Vendor HID device: the fixed feature-report exchange that brings the
//! display panels out of sleep, plus log-and-discard readers for the
//! device's interrupt reports (their semantics are unknown).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::hid::{HidRouter, HidWriter, ReportReader, ReportSource};
use crate::protocol::{
    VENDOR_INTERRUPT_1_ID, VENDOR_INTERRUPT_1_SIZE, VENDOR_INTERRUPT_5_ID,
    VENDOR_INTERRUPT_5_SIZE, VENDOR_REPORT_4_ID, VENDOR_REPORT_50_ID, VENDOR_REPORT_50_SIZE,
    VENDOR_REPORT_6_ID, VENDOR_REPORT_6_SIZE, VENDOR_REPORT_8_ID, VENDOR_REPORT_8_SIZE,
    VENDOR_REPORT_9_ID, VENDOR_REPORT_9_SIZE,
};
use crate::Result;

/// Vendor HID engine. Holds the demux for the vendor device and exposes the
/// display wake sequence.
pub struct VendorHid {
    writer: Arc<dyn HidWriter>,
    _router: HidRouter,
    initialized: AtomicBool,
    _interrupt_5_reader: Arc<Interrupt5Reader>,
    _interrupt_1_reader: Arc<Interrupt1Reader>,
}

impl VendorHid {
    pub(crate) fn new(source: impl ReportSource + 'static, writer: Arc<dyn HidWriter>) -> VendorHid {
        let router = HidRouter::new(source);

        let interrupt_5_reader = Arc::new(Interrupt5Reader);
        router.register_reader(
            VENDOR_INTERRUPT_5_ID,
            &(Arc::clone(&interrupt_5_reader) as Arc<dyn ReportReader>),
        );
        let interrupt_1_reader = Arc::new(Interrupt1Reader);
        router.register_reader(
            VENDOR_INTERRUPT_1_ID,
            &(Arc::clone(&interrupt_1_reader) as Arc<dyn ReportReader>),
        );

        VendorHid {
            writer,
            _router: router,
            initialized: AtomicBool::new(false),
            _interrupt_5_reader: interrupt_5_reader,
            _interrupt_1_reader: interrupt_1_reader,
        }
    }

    /// Run the wake-up exchange against the display controller. Captured
    /// from the stock driver; the individual reports have no known meaning.
    pub fn wake_display(&self) -> Result<()> {
        log::trace!("vendor hid: wake display");

        let mut tx50 = [0u8; VENDOR_REPORT_50_SIZE];
        tx50[0] = VENDOR_REPORT_50_ID;
        tx50[1] = 0x01;
        for _ in 0..4 {
            self.writer.set_feature_report(&tx50)?;
            self.writer
                .get_feature_report(VENDOR_REPORT_50_ID, VENDOR_REPORT_50_SIZE)?;
        }

        self.writer
            .get_feature_report(VENDOR_REPORT_9_ID, VENDOR_REPORT_9_SIZE)?;
        self.writer
            .get_feature_report(VENDOR_REPORT_8_ID, VENDOR_REPORT_8_SIZE)?;
        self.writer
            .get_feature_report(VENDOR_REPORT_6_ID, VENDOR_REPORT_6_SIZE)?;

        self.writer
            .set_feature_report(&[VENDOR_REPORT_4_ID, 0x01])?;

        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether the wake sequence has completed at least once.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

struct Interrupt5Reader;

impl ReportReader for Interrupt5Reader {
    fn update(&self, report: &[u8]) {
        if report.len() != VENDOR_INTERRUPT_5_SIZE {
            log::warn!("vendor report 0x05 has wrong size ({})", report.len());
        } else {
            log::debug!("vendor report 0x05: {:02x?}", &report[1..9]);
        }
    }
}

struct Interrupt1Reader;

impl ReportReader for Interrupt1Reader {
    fn update(&self, report: &[u8]) {
        if report.len() != VENDOR_INTERRUPT_1_SIZE {
            log::warn!("vendor report 0x01 has wrong size ({})", report.len());
        } else {
            log::debug!(
                "vendor report 0x01: {:#04x} {:#06x}",
                report[1],
                crate::protocol::read_u16(report, 2)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::testing::{ScriptedSource, ScriptedWriter};
    use crate::hid::HidWriter;

    #[test]
    fn wake_display_runs_the_captured_sequence() {
        let (inject, rx) = crossbeam_channel::unbounded();
        let writer = Arc::new(ScriptedWriter::new(inject));
        let vendor = VendorHid::new(ScriptedSource { rx }, Arc::clone(&writer) as Arc<dyn HidWriter>);

        assert!(!vendor.is_initialized());
        vendor.wake_display().unwrap();
        assert!(vendor.is_initialized());

        // Feature writes recorded in order: 4x report 0x50, then 0x04 = 0x01.
        let writes = writer.writes();
        assert_eq!(writes.len(), 5);
        for w in &writes[..4] {
            assert_eq!(w[0], VENDOR_REPORT_50_ID);
            assert_eq!(w[1], 0x01);
            assert_eq!(w.len(), VENDOR_REPORT_50_SIZE);
        }
        assert_eq!(writes[4], vec![VENDOR_REPORT_4_ID, 0x01]);
    }
}
