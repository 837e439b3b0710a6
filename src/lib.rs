//! # wmr - driver core for Windows Mixed Reality headsets
//!
//! Supports the HP Reverb G2 class of devices. Provides:
//! - A camera stream of synchronized multi-image frames from the tracking
//!   sensors, reaped from a ring of asynchronous bulk transfers
//! - An inertial stream of accelerometer, gyroscope and magnetometer samples
//! - The firmware control channel, including the factory calibration blob
//!
//! ## Quick start
//! ```no_run
//! let mut headset = wmr::open_headset(&wmr::HP_REVERB_G2).unwrap();
//!
//! headset.camera().register_frame_callback(|frame| {
//!     println!("{:?} frame at t={}", frame.frame_type, frame.timestamp.ticks());
//!     true
//! });
//! headset.open().unwrap();
//!
//! let json = headset.oasis_hid().read_calibration().unwrap();
//! let calibration = wmr::Calibration::parse_json(&json).unwrap();
//! println!("{} cameras calibrated", calibration.cameras().len());
//! ```

pub mod calibration;
mod calibration_key;
pub mod camera;
pub mod device;
pub mod error;
pub mod firmware;
pub mod hid;
pub mod imu;
pub mod pool;
pub mod protocol;
pub mod subscribers;
pub mod types;
mod usb;
pub mod vendor;

pub use calibration::Calibration;
pub use camera::{Camera, CameraFrameHandle};
pub use device::{open_headset, Headset};
pub use error::WmrError;
pub use firmware::OasisHid;
pub use imu::ImuFrameHandle;
pub use types::{
    CameraFrame, CameraFrameType, HeadsetSpec, ImuFrame, Timestamp, HP_REVERB_G2,
};
pub use vendor::VendorHid;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, WmrError>;
