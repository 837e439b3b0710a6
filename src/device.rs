//! Device façade: enumeration of the headset's three USB roles and the
//! opaque `Headset` object composing the camera, firmware and vendor
//! engines.

use std::sync::Arc;

use hidapi::HidApi;
use rusb::Context;

use crate::camera::Camera;
use crate::firmware::OasisHid;
use crate::hid::{open_hid_pair, HidWriter};
use crate::types::HeadsetSpec;
use crate::usb::{self, UsbEventPump};
use crate::vendor::VendorHid;
use crate::Result;

/// An opened headset. Field order is load-bearing: dropping stops the camera
/// worker first, then the HID read workers, then the USB event pump, and
/// releases the transports last.
pub struct Headset {
    spec: HeadsetSpec,
    camera: Camera,
    oasis_hid: OasisHid,
    vendor_hid: VendorHid,
    _usb_pump: UsbEventPump,
    _hid_api: HidApi,
    open: bool,
}

/// Locate the headset described by `spec` and bring up its engines. Each of
/// the three device roles must match exactly one USB device.
pub fn open_headset(spec: &HeadsetSpec) -> Result<Headset> {
    let ctx = Context::new()?;

    let hid_comms_dev = usb::find_unique_device(&ctx, spec.hid_comms_dev)?;
    let camera_dev = usb::find_unique_device(&ctx, spec.camera_dev)?;
    let vendor_hid_dev = usb::find_unique_device(&ctx, spec.vendor_hid_dev)?;

    // hidapi opens by (vid, pid, serial); read the serials over USB so the
    // right interfaces are matched even with several headsets on the bus.
    let hid_serial = usb::device_serial(&hid_comms_dev)?;
    let vendor_serial = usb::device_serial(&vendor_hid_dev)?;

    let api = HidApi::new()?;
    let (oasis_source, oasis_writer) = open_hid_pair(
        &api,
        spec.hid_comms_dev.vid,
        spec.hid_comms_dev.pid,
        Some(&hid_serial),
    )?;
    let (vendor_source, vendor_writer) = open_hid_pair(
        &api,
        spec.vendor_hid_dev.vid,
        spec.vendor_hid_dev.pid,
        Some(&vendor_serial),
    )?;

    let camera = Camera::new(*spec, &camera_dev)?;
    let usb_pump = UsbEventPump::new(ctx);

    let oasis_hid = OasisHid::new(oasis_source, Arc::new(oasis_writer) as Arc<dyn HidWriter>)?;
    let vendor_hid = VendorHid::new(vendor_source, Arc::new(vendor_writer) as Arc<dyn HidWriter>);

    log::info!("opened {}", spec.product_name);

    Ok(Headset {
        spec: *spec,
        camera,
        oasis_hid,
        vendor_hid,
        _usb_pump: usb_pump,
        _hid_api: api,
        open: false,
    })
}

impl Headset {
    /// Start the inertial stream, then the camera stream. Also kicks the
    /// display out of sleep; a failure there is logged but does not keep the
    /// tracking streams from coming up.
    pub fn open(&mut self) -> Result<()> {
        if let Err(e) = self.vendor_hid.wake_display() {
            log::warn!("display wake failed: {e}");
        }

        self.oasis_hid.start_imu()?;
        self.camera.start_stream()?;
        self.open = true;
        Ok(())
    }

    /// Stop the inertial stream, then the camera stream.
    pub fn close(&mut self) -> Result<()> {
        self.open = false;
        let imu_result = self.oasis_hid.stop_imu();
        let camera_result = self.camera.stop_stream();
        imu_result.and(camera_result)
    }

    pub fn spec(&self) -> &HeadsetSpec {
        &self.spec
    }

    pub fn camera(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn oasis_hid(&self) -> &OasisHid {
        &self.oasis_hid
    }

    pub fn vendor_hid(&self) -> &VendorHid {
        &self.vendor_hid
    }
}

impl Drop for Headset {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.close() {
                log::warn!("close on drop failed: {e}");
            }
        }
    }
}
