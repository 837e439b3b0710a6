//! Camera streaming engine.
//!
//! A fixed ring of asynchronous bulk-IN transfers is kept in flight against
//! the headset's camera interface. A reaping worker consumes completions:
//! each completed transfer carries one composite frame, which is validated,
//! de-interleaved into per-camera images drawn from the frame pool, and
//! dispatched to subscribers before the transfer is resubmitted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Receiver;
use rusb::{Context, Device, DeviceHandle, Direction, TransferType};

use crate::pool::{FramePool, PooledFrame};
use crate::protocol::{self, FrameFooter, SegmentHeader, SEGMENT_HEADER_SIZE};
use crate::subscribers::SubscriberList;
use crate::types::{CameraFrame, CameraFrameType, HeadsetSpec, Timestamp};
use crate::usb::{self, Completion, TransferRing};
use crate::{Result, WmrError};

/// Shared read-only handle to a de-interleaved camera frame.
pub type CameraFrameHandle = Arc<PooledFrame<CameraFrame>>;

const CAMERA_INTERFACE: u8 = 3;
const RX_SLOT_COUNT: usize = 3;
const FRAME_POOL_SIZE: usize = 3;
/// Logical sensor ids accepted by SetExpGain.
const CAMERA_TYPE_COUNT: usize = 8;
/// The device occasionally loses exposure settings, so a cached command is
/// re-sent at least once per this many calls.
const EXP_GAIN_RESEND_LIMIT: u16 = 60;

/// Camera engine over the headset's bulk interface.
pub struct Camera {
    spec: HeadsetSpec,
    handle: Arc<DeviceHandle<Context>>,
    write_ep: u8,
    ring: Arc<TransferRing>,
    pool: Arc<FramePool<CameraFrame>>,
    subscribers: Arc<SubscriberList<CameraFrameHandle>>,
    exp_gain: ExpGainCache,
    streaming: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<WmrError>>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl Camera {
    /// Open the camera device, discover its bulk endpoint pair, claim the
    /// interface and pre-allocate the transfer ring. Sends a gratuitous stop
    /// so a stream left running by a previous process is quiesced.
    pub(crate) fn new(spec: HeadsetSpec, device: &Device<Context>) -> Result<Camera> {
        let mut handle = device.open()?;

        let config = match device.active_config_descriptor() {
            Ok(config) => config,
            Err(rusb::Error::NotFound) => {
                // Device not configured yet; pick configuration 1 and retry.
                handle.set_active_configuration(1)?;
                device.active_config_descriptor()?
            }
            Err(e) => return Err(e.into()),
        };

        let iface_desc = config
            .interfaces()
            .filter_map(|iface| iface.descriptors().next())
            .find(|desc| desc.interface_number() == CAMERA_INTERFACE)
            .ok_or_else(|| {
                WmrError::Unsupported(format!(
                    "camera device has no interface {CAMERA_INTERFACE}"
                ))
            })?;

        let mut read_ep = None;
        let mut write_ep = None;
        for ep in iface_desc.endpoint_descriptors() {
            if ep.transfer_type() != TransferType::Bulk {
                continue;
            }
            match ep.direction() {
                Direction::In if read_ep.is_none() => read_ep = Some(ep.address()),
                Direction::Out if write_ep.is_none() => write_ep = Some(ep.address()),
                _ => {
                    return Err(WmrError::Unsupported(
                        "camera interface has multiple bulk endpoint pairs".into(),
                    ))
                }
            }
        }
        let (read_ep, write_ep) = match (read_ep, write_ep) {
            (Some(r), Some(w)) => (r, w),
            _ => {
                return Err(WmrError::Unsupported(
                    "camera bulk endpoint pair not found".into(),
                ))
            }
        };
        log::debug!(
            "camera endpoints on interface {CAMERA_INTERFACE}: r:{read_ep:#04x} w:{write_ep:#04x}"
        );

        handle.claim_interface(CAMERA_INTERFACE)?;
        let handle = Arc::new(handle);

        let camera = Camera {
            pool: Arc::new(FramePool::new(FRAME_POOL_SIZE, || {
                CameraFrame::new(spec.camera_width, spec.camera_height, spec.n_cameras)
            })),
            ring: Arc::new(TransferRing::new(
                Arc::clone(&handle),
                read_ep,
                RX_SLOT_COUNT,
                spec.camera_xfer_size,
            )?),
            spec,
            handle,
            write_ep,
            subscribers: Arc::new(SubscriberList::new()),
            exp_gain: ExpGainCache::default(),
            streaming: Arc::new(AtomicBool::new(false)),
            fault: Arc::new(Mutex::new(None)),
            worker: None,
        };

        camera.send_start_stop_command(false)?;
        Ok(camera)
    }

    /// Start streaming: submit the transfer ring, command the device to
    /// stream and launch the reaping worker.
    ///
    /// # Panics
    /// Panics if the stream is already running.
    pub fn start_stream(&mut self) -> Result<()> {
        assert!(self.worker.is_none(), "camera stream already running");
        log::trace!("camera: start stream");

        // A stray stream from a crashed process would corrupt frame sync.
        self.send_start_stop_command(false)?;
        self.exp_gain = ExpGainCache::default();
        *self.fault.lock().unwrap() = None;

        let completions = self.ring.completions();
        for slot in 0..self.ring.slot_count() {
            self.submit_with_rollback(slot, &completions)?;
        }

        self.streaming.store(true, Ordering::Release);
        self.send_start_stop_command(true)?;

        let ctx = WorkerContext {
            spec: self.spec,
            handle: Arc::clone(&self.handle),
            write_ep: self.write_ep,
            ring: Arc::clone(&self.ring),
            completions,
            streaming: Arc::clone(&self.streaming),
            pool: Arc::clone(&self.pool),
            subscribers: Arc::clone(&self.subscribers),
            fault: Arc::clone(&self.fault),
        };
        self.worker = Some(
            std::thread::Builder::new()
                .name("wmr-camera-reap".into())
                .spawn(move || reap_loop(ctx))
                .expect("failed to spawn camera reaping worker"),
        );
        Ok(())
    }

    fn submit_with_rollback(&self, slot: usize, completions: &Receiver<Completion>) -> Result<()> {
        if let Err(e) = self.ring.submit(slot) {
            // Reclaim whatever made it onto the bus before bailing out.
            self.ring.cancel_all();
            for _ in 0..slot {
                let _ = completions.recv_timeout(std::time::Duration::from_secs(1));
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stop streaming: command the device to stop, cancel outstanding
    /// transfers and join the reaping worker.
    pub fn stop_stream(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        log::trace!("camera: stop stream");

        let stop_result = self.send_start_stop_command(false);
        self.ring.cancel_all();
        let _ = worker.join();
        stop_result
    }

    /// Set exposure and gain for one logical camera. Repeated identical
    /// settings are served from a cache but still re-sent periodically.
    ///
    /// # Panics
    /// Panics if `camera_type` is not in `0..8`.
    pub fn set_exp_gain(&mut self, camera_type: u16, exposure: u16, gain: u16) -> Result<()> {
        if !self.exp_gain.should_send(camera_type, exposure, gain) {
            return Ok(());
        }
        log::trace!("camera: set_exp_gain camera_type={camera_type} exposure={exposure} gain={gain}");
        usb::bulk_write(
            &self.handle,
            self.write_ep,
            &protocol::build_exp_gain_command(camera_type, exposure, gain),
        )?;
        self.exp_gain.note_sent(camera_type, exposure, gain);
        Ok(())
    }

    /// Subscribe to de-interleaved frames. The callback runs on the reaping
    /// worker and is retained while it returns `true`.
    pub fn register_frame_callback(
        &self,
        callback: impl FnMut(&CameraFrameHandle) -> bool + Send + 'static,
    ) {
        self.subscribers.register(callback);
    }

    /// Fetch and clear the fatal engine error recorded by the reaping
    /// worker, if any.
    pub fn take_fault(&self) -> Option<WmrError> {
        self.fault.lock().unwrap().take()
    }

    fn send_start_stop_command(&self, start: bool) -> Result<()> {
        usb::bulk_write(
            &self.handle,
            self.write_ep,
            &protocol::build_start_stop_command(start),
        )
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        if let Err(e) = self.stop_stream() {
            log::warn!("camera: stop on drop failed: {e}");
        }
    }
}

// -- Exposure/gain command cache --

#[derive(Debug, Clone, Copy, Default)]
struct ExpGainState {
    exposure: u16,
    gain: u16,
    cache_use_count: u16,
}

/// Suppresses retransmission of unchanged exposure/gain settings, except
/// that every [`EXP_GAIN_RESEND_LIMIT`]th call goes to the device anyway.
/// Accessed only from the application thread.
#[derive(Debug, Default)]
struct ExpGainCache {
    entries: [ExpGainState; CAMERA_TYPE_COUNT],
}

impl ExpGainCache {
    fn should_send(&mut self, camera_type: u16, exposure: u16, gain: u16) -> bool {
        let state = &mut self.entries[camera_type as usize];
        state.cache_use_count += 1;
        !(state.exposure == exposure
            && state.gain == gain
            && state.cache_use_count < EXP_GAIN_RESEND_LIMIT)
    }

    fn note_sent(&mut self, camera_type: u16, exposure: u16, gain: u16) {
        self.entries[camera_type as usize] = ExpGainState {
            exposure,
            gain,
            cache_use_count: 0,
        };
    }
}

// -- Reaping worker --

struct WorkerContext {
    spec: HeadsetSpec,
    handle: Arc<DeviceHandle<Context>>,
    write_ep: u8,
    ring: Arc<TransferRing>,
    completions: Receiver<Completion>,
    streaming: Arc<AtomicBool>,
    pool: Arc<FramePool<CameraFrame>>,
    subscribers: Arc<SubscriberList<CameraFrameHandle>>,
    fault: Arc<Mutex<Option<WmrError>>>,
}

fn reap_loop(ctx: WorkerContext) {
    log::trace!("camera reaper: thread started");

    let mut assembler = FrameAssembler::new(ctx.spec);
    let mut outstanding = ctx.ring.slot_count();

    while outstanding > 0 {
        let completion = match ctx.completions.recv() {
            Ok(completion) => completion,
            Err(_) => break,
        };

        let mut retire = true;
        if completion.status.is_completed() && ctx.streaming.load(Ordering::Acquire) {
            let data = ctx.ring.completed_data(&completion);
            match handle_frame(&ctx, &mut assembler, data) {
                Ok(()) => match ctx.ring.submit(completion.slot) {
                    Ok(()) => retire = false,
                    Err(e) => {
                        log::error!("camera reaper: resubmit failed: {e}");
                        record_fault(&ctx.fault, e);
                    }
                },
                Err(e) => {
                    log::error!("camera reaper: {e}");
                    record_fault(&ctx.fault, e);
                }
            }
        }

        if retire {
            if outstanding == ctx.ring.slot_count() {
                // First retirement brings the whole stream down; the rest of
                // the ring drains through cancellation.
                log::trace!("camera reaper: retiring transfers");
                if let Err(e) = usb::bulk_write(
                    &ctx.handle,
                    ctx.write_ep,
                    &protocol::build_start_stop_command(false),
                ) {
                    log::warn!("camera reaper: stop command failed: {e}");
                }
                ctx.ring.cancel_all();
                ctx.streaming.store(false, Ordering::Release);
            }
            outstanding -= 1;
            log::trace!(
                "camera reaper: retired transfer slot={} status={:?}",
                completion.slot,
                completion.status
            );
        }
    }

    log::trace!("camera reaper: thread exiting");
}

fn record_fault(fault: &Mutex<Option<WmrError>>, error: WmrError) {
    let mut slot = fault.lock().unwrap();
    if slot.is_none() {
        *slot = Some(error);
    }
}

fn handle_frame(ctx: &WorkerContext, assembler: &mut FrameAssembler, data: &[u8]) -> Result<()> {
    match assembler.validate(data)? {
        Validation::Valid => {}
        Validation::Discarded => return Ok(()),
    }

    let frame = match ctx.pool.allocate() {
        Ok(frame) => frame,
        Err(_) => {
            log::warn!("camera: frame pool exhausted, dropping composite");
            return Ok(());
        }
    };

    let frame = assembler.deinterleave(data, frame)?;
    let handle: CameraFrameHandle = Arc::new(frame);
    ctx.subscribers.dispatch(&handle);
    Ok(())
}

// -- Validation and de-interleaving --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Validation {
    Valid,
    /// Composite dropped; streaming continues.
    Discarded,
}

/// Per-stream validation state and the de-interleaving step. One instance
/// per streaming session, so frame continuity restarts with the stream.
struct FrameAssembler {
    spec: HeadsetSpec,
    prev_frame_number: u32,
    got_first_frame: bool,
}

impl FrameAssembler {
    fn new(spec: HeadsetSpec) -> FrameAssembler {
        FrameAssembler {
            spec,
            prev_frame_number: 0,
            got_first_frame: false,
        }
    }

    /// Check one composite. Structural damage before the first valid frame
    /// is tolerated (device warm-up); afterwards it is a fatal engine error.
    /// A frame-number discontinuity is never fatal: the composite is dropped
    /// and the counter resyncs within one frame.
    fn validate(&mut self, data: &[u8]) -> Result<Validation> {
        match self.check(data) {
            Ok(valid) => {
                if valid == Validation::Valid {
                    self.got_first_frame = true;
                }
                Ok(valid)
            }
            Err(reason) => {
                log::warn!("camera: invalid composite: {reason}");
                if self.got_first_frame {
                    Err(WmrError::FrameInvalid(reason))
                } else {
                    Ok(Validation::Discarded)
                }
            }
        }
    }

    fn check(&mut self, data: &[u8]) -> std::result::Result<Validation, String> {
        let spec = &self.spec;

        if data.len() != spec.camera_frame_size {
            return Err(format!(
                "wrong composite size (expected={:#x}, actual={:#x})",
                spec.camera_frame_size,
                data.len()
            ));
        }

        let footer = FrameFooter::parse(&data[spec.camera_frame_footer_offset..]);
        if footer.magic != protocol::MAGIC {
            return Err(format!("footer has bad magic ({:#010x})", footer.magic));
        }
        if footer.timestamp == 0 {
            return Err("footer has no timestamp".into());
        }

        let first = SegmentHeader::parse(data);

        // Update the expected counter from the observed value either way, so
        // a drop costs exactly one composite.
        let expected = self.prev_frame_number.wrapping_add(1);
        let dropped = self.got_first_frame && first.frame_number != expected;
        self.prev_frame_number = first.frame_number;
        if dropped {
            log::warn!(
                "camera: dropped frame (expected={expected}, current={})",
                first.frame_number
            );
            return Ok(Validation::Discarded);
        }

        for segment_idx in 0..spec.camera_segment_count {
            let header = SegmentHeader::parse(&data[segment_idx * spec.camera_segment_size..]);
            if header.magic != protocol::MAGIC {
                return Err(format!(
                    "segment {segment_idx} has bad magic ({:#010x})",
                    header.magic
                ));
            }
            if header.frame_number != first.frame_number {
                return Err(format!(
                    "segment {segment_idx} has unexpected frame_number (expected={} actual={})",
                    first.frame_number, header.frame_number
                ));
            }
            if header.segment_number != segment_idx as u32 {
                return Err(format!(
                    "segment has unexpected segment_number (expected={segment_idx} actual={})",
                    header.segment_number
                ));
            }
        }

        Ok(Validation::Valid)
    }

    /// Excise segment headers and un-shuffle the row-interleaved camera
    /// images into `frame`.
    fn deinterleave(
        &self,
        data: &[u8],
        mut frame: PooledFrame<CameraFrame>,
    ) -> Result<PooledFrame<CameraFrame>> {
        let spec = &self.spec;
        let footer = FrameFooter::parse(&data[spec.camera_frame_footer_offset..]);

        frame.frame_type = match footer.frame_type {
            protocol::FRAME_TYPE_ROOM => CameraFrameType::Room,
            protocol::FRAME_TYPE_CONTROLLER => CameraFrameType::Controller,
            other => {
                return Err(WmrError::FrameInvalid(format!(
                    "unknown frame type ({other})"
                )))
            }
        };
        frame.timestamp = Timestamp::from_ticks(footer.timestamp as i64);

        let width = spec.camera_width;
        let image_size = width * spec.camera_height;
        let mut copied = vec![0usize; spec.n_cameras];
        let mut cam_idx = 0usize;

        // The first row of each camera image is metadata; skip it.
        let mut offset = SEGMENT_HEADER_SIZE + spec.n_cameras * width;

        loop {
            while offset % spec.camera_segment_size != 0 {
                let row_remainder = width - copied[cam_idx] % width;
                let segment_remainder =
                    spec.camera_segment_size - offset % spec.camera_segment_size;
                let block = row_remainder.min(segment_remainder);

                if offset + block >= spec.camera_frame_size {
                    return Err(WmrError::FrameInvalid(
                        "ran out of bytes in raw composite".into(),
                    ));
                }

                frame.image_mut(cam_idx)[copied[cam_idx]..copied[cam_idx] + block]
                    .copy_from_slice(&data[offset..offset + block]);
                offset += block;
                copied[cam_idx] += block;

                // A completed row hands off to the next camera in round-robin
                // order; when that camera's image is already full, we're done.
                if block > 0 && copied[cam_idx] % width == 0 {
                    cam_idx = (cam_idx + 1) % spec.n_cameras;
                    if copied[cam_idx] == image_size {
                        return Ok(frame);
                    }
                }
            }

            // Seek past the next segment header.
            offset += SEGMENT_HEADER_SIZE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAGIC;

    /// Compact profile keeping composites small: 2 cameras of 8x4 pixels,
    /// 64-byte segments with 32-byte headers, footer after the segments.
    fn test_spec() -> HeadsetSpec {
        HeadsetSpec {
            product_name: "test rig",
            hid_comms_dev: crate::types::UsbDeviceId { vid: 0, pid: 0 },
            camera_dev: crate::types::UsbDeviceId { vid: 0, pid: 0 },
            vendor_hid_dev: crate::types::UsbDeviceId { vid: 0, pid: 0 },
            n_cameras: 2,
            camera_width: 8,
            camera_height: 4,
            camera_xfer_size: 256,
            camera_frame_size: 218,
            camera_frame_footer_offset: 192,
            camera_segment_size: 64,
            camera_segment_count: 3,
        }
    }

    /// Build a valid composite for `test_spec`: segment headers carrying
    /// `frame_number`, one metadata row per camera, then row-interleaved
    /// image rows where pixel value = camera * 16 + row.
    fn build_composite(spec: &HeadsetSpec, frame_number: u32, frame_type: u16) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend(std::iter::repeat(0xEE).take(spec.n_cameras * spec.camera_width));
        for row in 0..spec.camera_height {
            for cam in 0..spec.n_cameras {
                payload
                    .extend(std::iter::repeat((cam * 16 + row) as u8).take(spec.camera_width));
            }
        }

        let mut data = vec![0u8; spec.camera_frame_size];
        let payload_per_segment = spec.camera_segment_size - SEGMENT_HEADER_SIZE;
        for (idx, chunk) in payload.chunks(payload_per_segment).enumerate() {
            let base = idx * spec.camera_segment_size;
            data[base..base + 4].copy_from_slice(&MAGIC.to_le_bytes());
            data[base + 4..base + 8].copy_from_slice(&frame_number.to_le_bytes());
            data[base + 8..base + 12].copy_from_slice(&(idx as u32).to_le_bytes());
            data[base + SEGMENT_HEADER_SIZE..base + SEGMENT_HEADER_SIZE + chunk.len()]
                .copy_from_slice(chunk);
        }

        let footer = spec.camera_frame_footer_offset;
        data[footer..footer + 8].copy_from_slice(&123_456u64.to_le_bytes());
        data[footer + 20..footer + 24].copy_from_slice(&MAGIC.to_le_bytes());
        data[footer + 24..footer + 26].copy_from_slice(&frame_type.to_le_bytes());
        data
    }

    #[test]
    fn validation_happy_path_tracks_frame_numbers() {
        let spec = test_spec();
        let mut assembler = FrameAssembler::new(spec);

        let first = build_composite(&spec, 1, 0);
        assert_eq!(assembler.validate(&first).unwrap(), Validation::Valid);
        assert_eq!(assembler.prev_frame_number, 1);

        let second = build_composite(&spec, 2, 0);
        assert_eq!(assembler.validate(&second).unwrap(), Validation::Valid);
        assert_eq!(assembler.prev_frame_number, 2);
    }

    #[test]
    fn dropped_frame_is_discarded_and_resyncs_in_one_frame() {
        let spec = test_spec();
        let mut assembler = FrameAssembler::new(spec);

        assert_eq!(
            assembler.validate(&build_composite(&spec, 1, 0)).unwrap(),
            Validation::Valid
        );
        // Frame 2 lost on the bus; frame 3 arrives.
        assert_eq!(
            assembler.validate(&build_composite(&spec, 3, 0)).unwrap(),
            Validation::Discarded
        );
        assert_eq!(assembler.prev_frame_number, 3);
        // Resynced: frame 4 is valid again.
        assert_eq!(
            assembler.validate(&build_composite(&spec, 4, 0)).unwrap(),
            Validation::Valid
        );
    }

    #[test]
    fn corruption_is_tolerated_only_before_first_valid_frame() {
        let spec = test_spec();
        let mut assembler = FrameAssembler::new(spec);

        let mut bad = build_composite(&spec, 1, 0);
        bad[spec.camera_frame_footer_offset + 20] ^= 0xff; // break footer magic

        // Warm-up garbage: dropped, not fatal.
        assert_eq!(assembler.validate(&bad).unwrap(), Validation::Discarded);

        assert_eq!(
            assembler.validate(&build_composite(&spec, 1, 0)).unwrap(),
            Validation::Valid
        );

        // The same damage mid-stream is fatal.
        let mut bad = build_composite(&spec, 2, 0);
        bad[spec.camera_frame_footer_offset + 20] ^= 0xff;
        assert!(matches!(
            assembler.validate(&bad),
            Err(WmrError::FrameInvalid(_))
        ));
    }

    #[test]
    fn wrong_size_and_zero_timestamp_are_rejected() {
        let spec = test_spec();
        let mut assembler = FrameAssembler::new(spec);

        let short = vec![0u8; spec.camera_frame_size - 1];
        assert_eq!(assembler.validate(&short).unwrap(), Validation::Discarded);

        let mut no_timestamp = build_composite(&spec, 1, 0);
        no_timestamp[spec.camera_frame_footer_offset..spec.camera_frame_footer_offset + 8]
            .fill(0);
        assert_eq!(
            assembler.validate(&no_timestamp).unwrap(),
            Validation::Discarded
        );
    }

    #[test]
    fn segment_header_mismatches_are_rejected() {
        let spec = test_spec();
        let mut assembler = FrameAssembler::new(spec);

        // Segment 1 claims the wrong segment_number.
        let mut bad = build_composite(&spec, 1, 0);
        bad[spec.camera_segment_size + 8] = 9;
        assert_eq!(assembler.validate(&bad).unwrap(), Validation::Discarded);

        // Segment 2 claims a different frame_number.
        let mut bad = build_composite(&spec, 1, 0);
        bad[2 * spec.camera_segment_size + 4] = 77;
        assert_eq!(assembler.validate(&bad).unwrap(), Validation::Discarded);
    }

    #[test]
    fn deinterleave_reconstructs_per_camera_images() {
        let spec = test_spec();
        let mut assembler = FrameAssembler::new(spec);
        let pool = FramePool::new(1, || {
            CameraFrame::new(spec.camera_width, spec.camera_height, spec.n_cameras)
        });

        let data = build_composite(&spec, 1, 0);
        assert_eq!(assembler.validate(&data).unwrap(), Validation::Valid);
        let frame = assembler
            .deinterleave(&data, pool.allocate().unwrap())
            .unwrap();

        assert_eq!(frame.frame_type, CameraFrameType::Room);
        assert_eq!(frame.timestamp.ticks(), 123_456);
        for cam in 0..spec.n_cameras {
            let image = frame.image(cam);
            for row in 0..spec.camera_height {
                let expected = (cam * 16 + row) as u8;
                assert!(
                    image[row * spec.camera_width..(row + 1) * spec.camera_width]
                        .iter()
                        .all(|&px| px == expected),
                    "camera {cam} row {row} corrupted"
                );
            }
        }
    }

    #[test]
    fn controller_frame_type_is_propagated() {
        let spec = test_spec();
        let assembler = FrameAssembler::new(spec);
        let pool = FramePool::new(1, || {
            CameraFrame::new(spec.camera_width, spec.camera_height, spec.n_cameras)
        });

        let data = build_composite(&spec, 1, protocol::FRAME_TYPE_CONTROLLER);
        let frame = assembler
            .deinterleave(&data, pool.allocate().unwrap())
            .unwrap();
        assert_eq!(frame.frame_type, CameraFrameType::Controller);
    }

    #[test]
    fn unknown_frame_type_is_fatal() {
        let spec = test_spec();
        let assembler = FrameAssembler::new(spec);
        let pool = FramePool::new(1, || {
            CameraFrame::new(spec.camera_width, spec.camera_height, spec.n_cameras)
        });

        let data = build_composite(&spec, 1, 7);
        assert!(matches!(
            assembler.deinterleave(&data, pool.allocate().unwrap()),
            Err(WmrError::FrameInvalid(_))
        ));
    }

    #[test]
    fn exp_gain_cache_resends_on_the_61st_identical_call() {
        let mut cache = ExpGainCache::default();
        let mut writes = 0;
        for _ in 0..61 {
            if cache.should_send(0, 0x1770, 0xff) {
                writes += 1;
                cache.note_sent(0, 0x1770, 0xff);
            }
        }
        assert_eq!(writes, 2);
    }

    #[test]
    fn exp_gain_cache_sends_immediately_on_changed_settings() {
        let mut cache = ExpGainCache::default();
        assert!(cache.should_send(3, 100, 10));
        cache.note_sent(3, 100, 10);
        assert!(!cache.should_send(3, 100, 10));
        assert!(cache.should_send(3, 200, 10));
        cache.note_sent(3, 200, 10);
        // Other camera types are tracked independently.
        assert!(cache.should_send(4, 200, 10));
    }
}
