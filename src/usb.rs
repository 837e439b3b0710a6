//! USB transport capability: device filtering, the event pump worker, a
//! synchronous bulk write helper and the ring of asynchronous bulk-IN
//! transfers feeding the camera engine.
//!
//! The ring goes through the raw libusb FFI because libusb only exposes
//! asynchronous transfers there; everything else stays on safe `rusb`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use libusb1_sys as ffi;
use rusb::{Context, Device, DeviceHandle, UsbContext};

use crate::types::UsbDeviceId;
use crate::{Result, WmrError};

/// Timeout for synchronous bulk-OUT command writes.
pub(crate) const BULK_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Event pump iteration timeout; also the pump's maximum shutdown latency.
const EVENT_LOOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Find the single device matching `id`, failing when enumeration matches
/// zero or several.
pub(crate) fn find_unique_device(ctx: &Context, id: UsbDeviceId) -> Result<Device<Context>> {
    let mut matching = Vec::new();
    for device in ctx.devices()?.iter() {
        let desc = device.device_descriptor()?;
        if desc.vendor_id() == id.vid && desc.product_id() == id.pid {
            matching.push(device);
        }
    }
    if matching.len() != 1 {
        return Err(WmrError::DeviceNotFound {
            vid: id.vid,
            pid: id.pid,
            matched: matching.len(),
        });
    }
    Ok(matching.remove(0))
}

/// Read a device's serial number string, opening it temporarily.
pub(crate) fn device_serial(device: &Device<Context>) -> Result<String> {
    let desc = device.device_descriptor()?;
    let handle = device.open()?;
    Ok(handle.read_serial_number_string_ascii(&desc)?)
}

/// Synchronous bulk-OUT write; a short write is a transport error.
pub(crate) fn bulk_write(handle: &DeviceHandle<Context>, endpoint: u8, bytes: &[u8]) -> Result<()> {
    let written = handle.write_bulk(endpoint, bytes, BULK_WRITE_TIMEOUT)?;
    if written != bytes.len() {
        return Err(WmrError::Transport(format!(
            "short bulk write ({written} of {} bytes)",
            bytes.len()
        )));
    }
    Ok(())
}

// -- Event pump --

/// Worker pumping the libusb event loop until shutdown. Asynchronous
/// transfer completions are delivered from this thread.
pub(crate) struct UsbEventPump {
    stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl UsbEventPump {
    pub fn new(ctx: Context) -> UsbEventPump {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let worker = std::thread::Builder::new()
            .name("wmr-usb-events".into())
            .spawn(move || {
                log::trace!("USB event pump started");
                while !stop_flag.load(Ordering::Acquire) {
                    if let Err(e) = ctx.handle_events(Some(EVENT_LOOP_TIMEOUT)) {
                        log::error!("USB event loop failed: {e}");
                        break;
                    }
                }
                log::trace!("USB event pump exiting");
            })
            .expect("failed to spawn USB event pump");

        UsbEventPump {
            stop,
            worker: Some(worker),
        }
    }
}

impl Drop for UsbEventPump {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// -- Asynchronous bulk transfer ring --

/// Completion status of one asynchronous transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferStatus {
    Completed,
    Error,
    TimedOut,
    Cancelled,
    Stall,
    NoDevice,
    Overflow,
    Unknown(i32),
}

impl TransferStatus {
    fn from_raw(status: i32) -> TransferStatus {
        use ffi::constants::*;
        match status {
            LIBUSB_TRANSFER_COMPLETED => TransferStatus::Completed,
            LIBUSB_TRANSFER_ERROR => TransferStatus::Error,
            LIBUSB_TRANSFER_TIMED_OUT => TransferStatus::TimedOut,
            LIBUSB_TRANSFER_CANCELLED => TransferStatus::Cancelled,
            LIBUSB_TRANSFER_STALL => TransferStatus::Stall,
            LIBUSB_TRANSFER_NO_DEVICE => TransferStatus::NoDevice,
            LIBUSB_TRANSFER_OVERFLOW => TransferStatus::Overflow,
            other => TransferStatus::Unknown(other),
        }
    }

    pub fn is_completed(self) -> bool {
        self == TransferStatus::Completed
    }
}

/// One reaped transfer, as seen by the consumer of the completion queue.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Completion {
    pub slot: usize,
    pub status: TransferStatus,
    pub actual_length: usize,
}

struct SlotContext {
    slot: usize,
    completions: Sender<Completion>,
}

extern "system" fn transfer_callback(transfer: *mut ffi::libusb_transfer) {
    // Runs on the event pump thread. Push the completion and return; the
    // reaping worker decides whether to resubmit or retire.
    unsafe {
        let ctx = &*((*transfer).user_data as *const SlotContext);
        let completion = Completion {
            slot: ctx.slot,
            status: TransferStatus::from_raw((*transfer).status),
            actual_length: (*transfer).actual_length.max(0) as usize,
        };
        let _ = ctx.completions.send(completion);
    }
}

struct RingSlot {
    transfer: *mut ffi::libusb_transfer,
    buffer: *mut u8,
    /// Buffer came from `libusb_dev_mem_alloc` rather than the heap.
    dev_mem: bool,
    context: *mut SlotContext,
}

/// Fixed ring of asynchronous bulk-IN transfers over one endpoint.
///
/// Completions arrive through a channel fed by the libusb callback (on the
/// event pump thread). The consumer must retire or resubmit every completion
/// it receives; dropping the ring is only legal once no transfer is in
/// flight.
pub(crate) struct TransferRing {
    handle: Arc<DeviceHandle<Context>>,
    slots: Vec<RingSlot>,
    buffer_size: usize,
    completions: Receiver<Completion>,
}

// Raw pointers are only dereferenced at construction, in the completion
// callback and on drop; libusb's submit/cancel are thread-safe.
unsafe impl Send for TransferRing {}
unsafe impl Sync for TransferRing {}

impl TransferRing {
    pub fn new(
        handle: Arc<DeviceHandle<Context>>,
        endpoint: u8,
        slot_count: usize,
        buffer_size: usize,
    ) -> Result<TransferRing> {
        let (tx, rx) = crossbeam_channel::bounded(slot_count);

        let mut slots = Vec::with_capacity(slot_count);
        for slot in 0..slot_count {
            // Prefer device-backed DMA memory; fall back to the heap when the
            // platform doesn't support it.
            let mut dev_mem = true;
            let mut buffer =
                unsafe { ffi::libusb_dev_mem_alloc(handle.as_raw(), buffer_size as _) };
            if buffer.is_null() {
                dev_mem = false;
                buffer = Box::into_raw(vec![0u8; buffer_size].into_boxed_slice()) as *mut u8;
            }

            let transfer = unsafe { ffi::libusb_alloc_transfer(0) };
            if transfer.is_null() {
                // Roll back this slot's buffer; previous slots are reclaimed
                // by Drop.
                unsafe { free_buffer(&handle, buffer, dev_mem, buffer_size) };
                slots.into_iter().for_each(|s: RingSlot| unsafe {
                    free_slot(&handle, s, buffer_size);
                });
                return Err(WmrError::Transport("libusb_alloc_transfer failed".into()));
            }

            let context = Box::into_raw(Box::new(SlotContext {
                slot,
                completions: tx.clone(),
            }));

            // libusb_fill_bulk_transfer is a static inline helper, so the
            // fields are populated directly.
            unsafe {
                (*transfer).dev_handle = handle.as_raw();
                (*transfer).endpoint = endpoint;
                (*transfer).transfer_type = ffi::constants::LIBUSB_TRANSFER_TYPE_BULK;
                (*transfer).timeout = 0;
                (*transfer).length = buffer_size as i32;
                (*transfer).callback = transfer_callback;
                (*transfer).user_data = context as *mut _;
                (*transfer).buffer = buffer;
                (*transfer).num_iso_packets = 0;
                (*transfer).flags = 0;
            }

            slots.push(RingSlot {
                transfer,
                buffer,
                dev_mem,
                context,
            });
        }

        Ok(TransferRing {
            handle,
            slots,
            buffer_size,
            completions: rx,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn completions(&self) -> Receiver<Completion> {
        self.completions.clone()
    }

    /// Submit (or resubmit) one slot's transfer.
    pub fn submit(&self, slot: usize) -> Result<()> {
        let rc = unsafe { ffi::libusb_submit_transfer(self.slots[slot].transfer) };
        if rc != 0 {
            return Err(WmrError::Transport(format!(
                "libusb_submit_transfer failed ({rc})"
            )));
        }
        Ok(())
    }

    /// Request cancellation of every transfer. Transfers that are not in
    /// flight are skipped; in-flight ones complete with Cancelled status
    /// through the completion queue.
    pub fn cancel_all(&self) {
        for slot in &self.slots {
            let rc = unsafe { ffi::libusb_cancel_transfer(slot.transfer) };
            if rc != 0 && rc != ffi::constants::LIBUSB_ERROR_NOT_FOUND {
                log::warn!("libusb_cancel_transfer failed ({rc})");
            }
        }
    }

    /// Data received by a completed transfer.
    ///
    /// Only call for a slot that has been reaped from the completion queue
    /// and not yet resubmitted; the reaping worker is the sole consumer, so
    /// the buffer cannot be concurrently rewritten.
    pub fn completed_data(&self, completion: &Completion) -> &[u8] {
        let len = completion.actual_length.min(self.buffer_size);
        unsafe { std::slice::from_raw_parts(self.slots[completion.slot].buffer, len) }
    }
}

impl Drop for TransferRing {
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            unsafe { free_slot(&self.handle, slot, self.buffer_size) };
        }
    }
}

unsafe fn free_slot(handle: &DeviceHandle<Context>, slot: RingSlot, buffer_size: usize) {
    ffi::libusb_free_transfer(slot.transfer);
    drop(Box::from_raw(slot.context));
    free_buffer(handle, slot.buffer, slot.dev_mem, buffer_size);
}

unsafe fn free_buffer(handle: &DeviceHandle<Context>, buffer: *mut u8, dev_mem: bool, size: usize) {
    if dev_mem {
        ffi::libusb_dev_mem_free(handle.as_raw(), buffer, size as _);
    } else {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
            buffer, size,
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffi::constants::*;

    #[test]
    fn transfer_status_mapping() {
        assert!(TransferStatus::from_raw(LIBUSB_TRANSFER_COMPLETED).is_completed());
        assert_eq!(
            TransferStatus::from_raw(LIBUSB_TRANSFER_CANCELLED),
            TransferStatus::Cancelled
        );
        assert_eq!(
            TransferStatus::from_raw(LIBUSB_TRANSFER_NO_DEVICE),
            TransferStatus::NoDevice
        );
        assert_eq!(TransferStatus::from_raw(99), TransferStatus::Unknown(99));
    }
}
