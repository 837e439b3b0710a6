/// Errors that can occur while driving a WMR headset.
#[derive(Debug, thiserror::Error)]
pub enum WmrError {
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// Transport-level failure that the transport itself reports as success,
    /// e.g. a short bulk write.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("device not found (vid={vid:04x} pid={pid:04x}, matched {matched})")]
    DeviceNotFound { vid: u16, pid: u16, matched: usize },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("firmware protocol violation: {0}")]
    Protocol(String),

    #[error("timed out waiting for device")]
    Timeout,

    #[error("invalid camera frame: {0}")]
    FrameInvalid(String),

    #[error("frame pool exhausted")]
    Exhausted,

    #[error("calibration blob is not valid JSON: {0}")]
    CalibrationJson(#[from] serde_json::Error),

    #[error("streaming engine failed: {0}")]
    Engine(String),
}
