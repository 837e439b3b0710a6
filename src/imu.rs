//! IMU report decoder.
//!
//! Each 381-byte report carries four accelerometer periods with 8x
//! oversampled gyro readings and up to four magnetometer samples. The device
//! only reports the timestamp of the last gyro reading of each period;
//! earlier gyro timestamps are synthesized by dividing the period evenly.

use std::sync::{Arc, Mutex};

use crate::hid::ReportReader;
use crate::pool::{FramePool, PooledFrame};
use crate::protocol::{self, ReportError};
use crate::subscribers::SubscriberList;
use crate::types::{
    ImuFrame, Timestamp, IMU_GYRO_OVERSAMPLING, IMU_SAMPLES_PER_FRAME,
};

/// Shared read-only handle to a decoded IMU frame; the frame returns to its
/// pool when the last handle drops.
pub type ImuFrameHandle = Arc<PooledFrame<ImuFrame>>;

pub(crate) const IMU_FRAME_POOL_SIZE: usize = 3;

const ACCEL_PRECISION: f32 = 1e-3;
const GYRO_PRECISION: f32 = 1e-3;
const MAGNETO_PRECISION: f32 = 1e-8;
const TEMP_PRECISION: f32 = 1e-2;

/// Nominal accelerometer period (1 ms), used before the first report and as
/// the gap clamp unit.
const SAMPLE_PERIOD_TICKS: i64 = Timestamp::TICKS_PER_MS;

/// The first reports after kImuInit carry garbage; discard until this many
/// samples have passed.
const STARTUP_DISCARD_SAMPLES: u64 = 100;

struct DecodeState {
    prev_sample_time: Timestamp,
    sample_count: u64,
    stale_frame_count: u32,
}

/// Demux reader for report id 0x01. Decodes reports into pool-backed frames
/// and dispatches them to subscribers on the HID read worker.
pub(crate) struct ImuReportReader {
    pool: FramePool<ImuFrame>,
    subscribers: Arc<SubscriberList<ImuFrameHandle>>,
    state: Mutex<DecodeState>,
}

impl ImuReportReader {
    pub fn new(subscribers: Arc<SubscriberList<ImuFrameHandle>>) -> ImuReportReader {
        ImuReportReader {
            pool: FramePool::new(IMU_FRAME_POOL_SIZE, ImuFrame::default),
            subscribers,
            state: Mutex::new(DecodeState {
                prev_sample_time: Timestamp::from_ticks(-1),
                sample_count: 0,
                stale_frame_count: 0,
            }),
        }
    }

    #[cfg(test)]
    pub fn stale_frame_count(&self) -> u32 {
        self.state.lock().unwrap().stale_frame_count
    }

    #[cfg(test)]
    pub fn skip_warmup(&self) {
        self.state.lock().unwrap().sample_count = STARTUP_DISCARD_SAMPLES;
    }

    fn decode(&self, report: &[u8]) {
        let raw = match protocol::parse_imu_report(report) {
            Ok(raw) => raw,
            Err(ReportError::WrongSize(size)) => {
                log::warn!("IMU report has wrong size ({size})");
                return;
            }
            Err(ReportError::BadMagic(magic)) => {
                log::warn!("IMU report has bad magic ({magic:08x})");
                return;
            }
        };

        let mut state = self.state.lock().unwrap();
        state.sample_count += IMU_SAMPLES_PER_FRAME as u64;
        if state.sample_count >= STARTUP_DISCARD_SAMPLES {
            self.decode_periods(&mut state, &raw);
        }

        // Heartbeat
        if state.sample_count % 6000 == 0 {
            log::info!("IMU sample_count = {}", state.sample_count);
        }

        // Report stale frames once per second
        if state.sample_count % 1000 == 0 && state.stale_frame_count > 0 {
            log::warn!("IMU dropped {} stale frames", state.stale_frame_count);
            state.stale_frame_count = 0;
        }
    }

    fn decode_periods(&self, state: &mut DecodeState, raw: &protocol::RawImuReport) {
        let mut frame = match self.pool.allocate() {
            Ok(frame) => frame,
            Err(_) => {
                log::warn!("IMU frame pool exhausted, dropping report");
                return;
            }
        };

        frame.magneto_samples = Default::default();
        frame.magneto_sample_count = 0;

        for i in 0..IMU_SAMPLES_PER_FRAME {
            let sample_time = raw.accel_timestamp[i];
            let mut delta_t = if state.prev_sample_time.ticks() > 0 {
                sample_time - state.prev_sample_time
            } else {
                SAMPLE_PERIOD_TICKS
            };
            state.prev_sample_time = sample_time;

            if delta_t <= 0 {
                state.stale_frame_count += 1;
                return;
            }

            if delta_t > 2 * SAMPLE_PERIOD_TICKS {
                log::warn!(
                    "IMU gap at sample_count={} sample_time={}*100ns delta_t={}*100ns",
                    state.sample_count,
                    sample_time.ticks(),
                    delta_t
                );
                delta_t = 2 * SAMPLE_PERIOD_TICKS;
            }

            let temperature = raw.temperature[i] as f32 * TEMP_PRECISION;

            let accel = &mut frame.accel_samples[i];
            accel.timestamp = sample_time;
            accel.temperature = temperature;
            for axis in 0..3 {
                accel.axes[axis] = raw.accel[axis][i] as f32 * ACCEL_PRECISION;
            }

            // gyro_timestamp[i] is the time of the last of the eight gyro
            // readings in this period.
            let gyro_delta_t = delta_t / IMU_GYRO_OVERSAMPLING as i64;
            for j in 0..IMU_GYRO_OVERSAMPLING {
                let gyro_idx = i * IMU_GYRO_OVERSAMPLING + j;
                let gyro = &mut frame.gyro_samples[gyro_idx];
                gyro.timestamp = Timestamp::from_ticks(
                    raw.gyro_timestamp[i].ticks()
                        - (IMU_GYRO_OVERSAMPLING - 1 - j) as i64 * gyro_delta_t,
                );
                gyro.temperature = temperature;
                for axis in 0..3 {
                    gyro.axes[axis] = raw.gyro[axis][gyro_idx] as f32 * GYRO_PRECISION;
                }
            }

            // Valid magnetometer samples have nonzero timestamps.
            if raw.magneto_timestamp[i] != 0 {
                let m = frame.magneto_sample_count;
                frame.magneto_sample_count += 1;
                let magneto = &mut frame.magneto_samples[m];
                magneto.timestamp = Timestamp::from_ticks(raw.magneto_timestamp[i] as i64);
                for axis in 0..3 {
                    magneto.axes[axis] = raw.magneto[axis][i] as f32 * MAGNETO_PRECISION;
                }
            }
        }

        let handle: ImuFrameHandle = Arc::new(frame);
        self.subscribers.dispatch(&handle);
    }
}

impl ReportReader for ImuReportReader {
    fn update(&self, report: &[u8]) {
        self.decode(report);
    }
}
