use std::ops::Sub;

/// Device timestamp with 100 ns precision, as reported by the headset's own
/// clock. No relation to any host time base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Number of 100 ns ticks in one millisecond.
    pub const TICKS_PER_MS: i64 = 10_000;

    pub fn from_ticks(ticks: i64) -> Self {
        Timestamp(ticks)
    }

    pub fn ticks(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 * 100e-9
    }
}

impl Sub for Timestamp {
    type Output = i64;

    /// Difference between two timestamps, in 100 ns ticks.
    fn sub(self, rhs: Timestamp) -> i64 {
        self.0 - rhs.0
    }
}

/// USB device identity used to match a headset role during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbDeviceId {
    pub vid: u16,
    pub pid: u16,
}

/// Per-model device profile. One constant per supported headset.
#[derive(Debug, Clone, Copy)]
pub struct HeadsetSpec {
    pub product_name: &'static str,
    /// HID device carrying the firmware command channel and IMU.
    pub hid_comms_dev: UsbDeviceId,
    /// USB device exposing the bulk camera interface.
    pub camera_dev: UsbDeviceId,
    /// Secondary HID device for display wake and ancillary features.
    pub vendor_hid_dev: UsbDeviceId,
    pub n_cameras: usize,
    pub camera_width: usize,
    pub camera_height: usize,
    /// Size of each bulk-IN transfer buffer. At least `camera_frame_size`.
    pub camera_xfer_size: usize,
    /// Size of one composite frame as delivered by the device.
    pub camera_frame_size: usize,
    pub camera_frame_footer_offset: usize,
    pub camera_segment_size: usize,
    /// Number of segment headers in a composite. The last segment may be
    /// partial; only its header is required to fit inside the composite.
    pub camera_segment_count: usize,
}

/// HP Reverb G2: four 640x480 tracking cameras, Oasis HID at 045e:0659,
/// vendor HID at 03f0:0580.
pub const HP_REVERB_G2: HeadsetSpec = HeadsetSpec {
    product_name: "HP Reverb G2",
    hid_comms_dev: UsbDeviceId { vid: 0x045e, pid: 0x0659 },
    camera_dev: UsbDeviceId { vid: 0x045e, pid: 0x0659 },
    vendor_hid_dev: UsbDeviceId { vid: 0x03f0, pid: 0x0580 },
    n_cameras: 4,
    camera_width: 640,
    camera_height: 480,
    camera_xfer_size: 0x12D400,
    camera_frame_size: 0x12d07a,
    camera_frame_footer_offset: 0x12D060,
    camera_segment_size: 0x6000,
    camera_segment_count: 0x33,
};

/// Source of a camera composite, from the frame footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFrameType {
    /// Long-exposure frame for environment tracking.
    Room,
    /// Short-exposure frame for controller LED tracking.
    Controller,
}

/// One de-interleaved multi-camera frame. Holds `image_count` contiguous
/// single-channel 8-bit images in a flat buffer. Instances are recycled
/// through a [`crate::pool::FramePool`]; subscribers see them as shared,
/// read-only handles.
#[derive(Debug)]
pub struct CameraFrame {
    pub timestamp: Timestamp,
    pub frame_type: CameraFrameType,
    image_width: usize,
    image_height: usize,
    image_count: usize,
    data: Box<[u8]>,
}

impl CameraFrame {
    pub fn new(image_width: usize, image_height: usize, image_count: usize) -> Self {
        CameraFrame {
            timestamp: Timestamp::default(),
            frame_type: CameraFrameType::Room,
            image_width,
            image_height,
            image_count,
            data: vec![0u8; image_width * image_height * image_count].into_boxed_slice(),
        }
    }

    pub fn image_width(&self) -> usize {
        self.image_width
    }

    pub fn image_height(&self) -> usize {
        self.image_height
    }

    pub fn image_size(&self) -> usize {
        self.image_width * self.image_height
    }

    pub fn image_count(&self) -> usize {
        self.image_count
    }

    /// Pixels of camera image `n`, row-major, `image_size()` bytes.
    ///
    /// # Panics
    /// Panics if `n >= image_count()`.
    pub fn image(&self, n: usize) -> &[u8] {
        assert!(n < self.image_count, "camera image index out of range");
        let size = self.image_size();
        &self.data[n * size..(n + 1) * size]
    }

    pub(crate) fn image_mut(&mut self, n: usize) -> &mut [u8] {
        assert!(n < self.image_count, "camera image index out of range");
        let size = self.image_size();
        &mut self.data[n * size..(n + 1) * size]
    }
}

/// Number of accelerometer sub-periods per IMU report.
pub const IMU_SAMPLES_PER_FRAME: usize = 4;
/// Gyro samples per accelerometer sub-period.
pub const IMU_GYRO_OVERSAMPLING: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct AccelSample {
    pub timestamp: Timestamp,
    /// Degrees Celsius.
    pub temperature: f32,
    /// Meters per second squared, one value per axis.
    pub axes: [f32; 3],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GyroSample {
    pub timestamp: Timestamp,
    /// Degrees Celsius, inherited from the surrounding accelerometer period.
    pub temperature: f32,
    /// Radians per second, one value per axis.
    pub axes: [f32; 3],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MagnetoSample {
    pub timestamp: Timestamp,
    pub axes: [f32; 3],
}

/// One decoded inertial frame: four accelerometer periods with 8x oversampled
/// gyro readings and up to four magnetometer samples.
#[derive(Debug, Clone)]
pub struct ImuFrame {
    pub accel_samples: [AccelSample; IMU_SAMPLES_PER_FRAME],
    pub gyro_samples: [GyroSample; IMU_SAMPLES_PER_FRAME * IMU_GYRO_OVERSAMPLING],
    pub magneto_samples: [MagnetoSample; IMU_SAMPLES_PER_FRAME],
    /// Number of valid entries in `magneto_samples`.
    pub magneto_sample_count: usize,
}

impl Default for ImuFrame {
    fn default() -> Self {
        ImuFrame {
            accel_samples: Default::default(),
            gyro_samples: [GyroSample::default(); IMU_SAMPLES_PER_FRAME * IMU_GYRO_OVERSAMPLING],
            magneto_samples: Default::default(),
            magneto_sample_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_delta_is_in_ticks() {
        let a = Timestamp::from_ticks(30_000);
        let b = Timestamp::from_ticks(10_000);
        assert_eq!(a - b, 2 * Timestamp::TICKS_PER_MS);
    }

    #[test]
    fn camera_frame_images_are_contiguous_and_disjoint() {
        let mut frame = CameraFrame::new(4, 2, 3);
        frame.image_mut(1).fill(0xAA);
        assert_eq!(frame.image(0), &[0u8; 8]);
        assert_eq!(frame.image(1), &[0xAAu8; 8]);
        assert_eq!(frame.image(2), &[0u8; 8]);
    }

    #[test]
    fn g2_profile_geometry() {
        let spec = HP_REVERB_G2;
        // Transfer buffers must hold a whole composite.
        assert!(spec.camera_xfer_size >= spec.camera_frame_size);
        // Footer lies fully inside the composite.
        assert!(spec.camera_frame_footer_offset + 26 <= spec.camera_frame_size);
        // Every segment header lies inside the composite.
        let last_header = (spec.camera_segment_count - 1) * spec.camera_segment_size;
        assert!(last_header + 32 <= spec.camera_frame_size);
        // One camera row never straddles a segment payload.
        assert!(spec.camera_width * spec.camera_height <= spec.camera_segment_size * spec.camera_segment_count);
    }
}
