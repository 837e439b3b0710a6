//! Bounded pool of pre-constructed frame buffers.
//!
//! Camera and IMU dispatch must not allocate on the hot path, and the
//! upstream transfer buffer is overwritten by the next submission, so frames
//! are recycled through a fixed set of slots. A frame leaves the pool as an
//! exclusive [`PooledFrame`] guard, gets filled in, and is then frozen into a
//! shared read-only handle for subscribers. Dropping the last handle returns
//! the frame to the pool.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};

use crate::{Result, WmrError};

struct PoolShared<T> {
    free: Mutex<Vec<Box<T>>>,
    returned: Condvar,
    capacity: usize,
}

/// Fixed-capacity frame allocator. `allocate` never blocks and never copies;
/// dropping the pool blocks until every frame has come back.
pub struct FramePool<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T> FramePool<T> {
    /// Pre-construct `capacity` frames with `init`.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, mut init: impl FnMut() -> T) -> Self {
        assert!(capacity > 0, "frame pool needs at least one slot");
        let free = (0..capacity).map(|_| Box::new(init())).collect();
        FramePool {
            shared: Arc::new(PoolShared {
                free: Mutex::new(free),
                returned: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Take a free frame, or fail with [`WmrError::Exhausted`] when every
    /// frame is checked out. Callers should treat exhaustion as backpressure.
    pub fn allocate(&self) -> Result<PooledFrame<T>> {
        let frame = self
            .shared
            .free
            .lock()
            .unwrap()
            .pop()
            .ok_or(WmrError::Exhausted)?;
        Ok(PooledFrame {
            frame: Some(frame),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Number of frames currently resident in the pool.
    pub fn free_count(&self) -> usize {
        self.shared.free.lock().unwrap().len()
    }
}

impl<T> Drop for FramePool<T> {
    /// Blocks until all frames are resident, so no handle can outlive the
    /// pool's bookkeeping.
    fn drop(&mut self) {
        let mut free = self.shared.free.lock().unwrap();
        while free.len() != self.shared.capacity {
            free = self.shared.returned.wait(free).unwrap();
        }
    }
}

/// Exclusive guard over a pool frame. Freeze into an `Arc<PooledFrame<T>>`
/// before handing it to subscribers; the frame returns to the pool when the
/// last handle drops.
pub struct PooledFrame<T> {
    frame: Option<Box<T>>,
    shared: Arc<PoolShared<T>>,
}

impl<T> Deref for PooledFrame<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.frame.as_deref().expect("frame present until drop")
    }
}

impl<T> DerefMut for PooledFrame<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.frame.as_deref_mut().expect("frame present until drop")
    }
}

impl<T> Drop for PooledFrame<T> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.shared.free.lock().unwrap().push(frame);
            self.shared.returned.notify_one();
        }
    }
}
