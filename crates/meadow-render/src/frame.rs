// SPDX-License-Identifier: CEPL-1.0
//! Frames-in-flight ring.
//!
//! The ring owns N frame slots (command buffer, image-available semaphore,
//! render-finished semaphore, in-flight fence) and drives one presentation cycle
//! per [`FrameRing::advance_frame`] call. The graphics API is reached only
//! through [`FrameBackend`], so the protocol itself carries no API handles.
//!
//! ```text
//! Idle -> Acquiring -> Recording -> Submitted -> (fence observed) -> Idle
//! ```

use tracing::{debug, info, warn};

use crate::error::FrameError;

pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Acquire attempts per frame, counting the first one. Each failed attempt
/// triggers a full recreation before the next.
pub const MAX_ACQUIRE_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// Image is usable but the swapchain no longer matches the surface.
    pub suboptimal: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub slot: usize,
    pub image_index: u32,
    /// A full recreation ran during this call.
    pub recreated: bool,
}

/// The graphics-API side of the frame protocol.
///
/// Every call is made from the frame loop's thread. A returned
/// [`FrameError::OutOfDate`] means the swapchain is stale; any other error is
/// treated as fatal by the ring.
pub trait FrameBackend {
    /// Per-slot resources: command buffer, two semaphores and a fence.
    type Slot;

    /// The fence must be created signaled so the first wait returns at once.
    fn create_slot(&mut self, index: usize) -> Result<Self::Slot, FrameError>;

    /// Replaces the slot's semaphores and fence with fresh ones (fence signaled).
    /// The command buffer is kept. Only called while the device is idle.
    /// On error the slot must still hold live objects: the ring destroys it
    /// again on drop.
    fn recreate_slot_sync(&mut self, slot: &mut Self::Slot) -> Result<(), FrameError>;

    /// Only called while the device is idle.
    fn destroy_slot(&mut self, slot: Self::Slot);

    /// Blocks without timeout until the slot's fence is signaled.
    fn wait_for_fence(&mut self, slot: &Self::Slot) -> Result<(), FrameError>;
    fn reset_fence(&mut self, slot: &Self::Slot) -> Result<(), FrameError>;

    /// Signals the slot's image-available semaphore once the image is ready.
    fn acquire_image(&mut self, slot: &Self::Slot) -> Result<AcquiredImage, FrameError>;

    /// Resets the slot's command buffer and records the frame for `image_index`.
    fn record(&mut self, slot: &Self::Slot, image_index: u32) -> Result<(), FrameError>;

    /// Waits on image-available, signals render-finished and the in-flight fence.
    fn submit(&mut self, slot: &Self::Slot) -> Result<(), FrameError>;

    /// Waits on render-finished.
    fn present(&mut self, slot: &Self::Slot, image_index: u32)
        -> Result<PresentStatus, FrameError>;

    fn wait_idle(&mut self) -> Result<(), FrameError>;

    /// Tears the swapchain (and anything derived from it) down and builds it
    /// again. Only called while the device is idle.
    fn recreate_swapchain(&mut self) -> Result<(), FrameError>;
}

struct FrameSlot<S> {
    resources: S,
    state: SlotState,
}

pub struct FrameRing<B: FrameBackend> {
    backend: B,
    slots: Vec<FrameSlot<B::Slot>>,
    current: usize,
    frames: u64,
    recreations: u64,
}

impl<B: FrameBackend> FrameRing<B> {
    pub fn new(mut backend: B, frames_in_flight: usize) -> Result<Self, FrameError> {
        if frames_in_flight == 0 {
            return Err(FrameError::NoFrameSlots);
        }

        let mut slots = Vec::with_capacity(frames_in_flight);
        for i in 0..frames_in_flight {
            match backend.create_slot(i) {
                Ok(resources) => slots.push(FrameSlot {
                    resources,
                    state: SlotState::Idle,
                }),
                Err(e) => {
                    for slot in slots.drain(..) {
                        backend.destroy_slot(slot.resources);
                    }
                    return Err(e);
                }
            }
        }

        info!("frame ring ready ({} frames in flight)", frames_in_flight);
        Ok(Self {
            backend,
            slots,
            current: 0,
            frames: 0,
            recreations: 0,
        })
    }

    // STRICT PER-FRAME ORDER:
    // 1) wait in-flight fence (backpressure: at most N frames queued)
    // 2) reset fence
    // 3) acquire (signals image-available); stale => recreate, restart at 1
    // 4) reset + record command buffer
    // 5) submit (waits image-available, signals render-finished + fence)
    // 6) present (waits render-finished)
    // 7) advance current index
    pub fn advance_frame(&mut self) -> Result<FrameReport, FrameError> {
        let index = self.current;
        let mut recreated = false;
        let mut attempts = 0;

        let acquired = loop {
            attempts += 1;
            let slot = &mut self.slots[index];

            self.backend.wait_for_fence(&slot.resources)?;
            slot.state = SlotState::Idle;
            self.backend.reset_fence(&slot.resources)?;

            slot.state = SlotState::Acquiring;
            match self.backend.acquire_image(&slot.resources) {
                Ok(acquired) => break acquired,
                Err(FrameError::OutOfDate) if attempts < MAX_ACQUIRE_ATTEMPTS => {
                    debug!("acquire on slot {} reported a stale swapchain", index);
                    self.recreate()?;
                    recreated = true;
                }
                Err(e) => {
                    // The fence was reset but nothing will signal it.
                    if e.is_recoverable() {
                        self.backend.recreate_slot_sync(&mut slot.resources)?;
                    }
                    slot.state = SlotState::Idle;
                    return Err(e);
                }
            }
        };

        let slot = &mut self.slots[index];
        slot.state = SlotState::Recording;
        self.backend.record(&slot.resources, acquired.index)?;

        self.backend.submit(&slot.resources)?;
        slot.state = SlotState::Submitted;

        let presented = self.backend.present(&slot.resources, acquired.index);

        self.current = (self.current + 1) % self.slots.len();
        self.frames += 1;

        let stale = match presented {
            Ok(PresentStatus::Optimal) => acquired.suboptimal,
            Ok(PresentStatus::Suboptimal) | Err(FrameError::OutOfDate) => true,
            Err(e) => return Err(e),
        };
        if stale {
            debug!("frame {} presented on a stale swapchain", self.frames);
            self.recreate()?;
            recreated = true;
        }

        Ok(FrameReport {
            slot: index,
            image_index: acquired.index,
            recreated,
        })
    }

    // STRICT ORDER (recreate):
    // 1) device idle: no slot may still be in flight
    // 2) fresh semaphores + signaled fences for every slot
    // 3) swapchain (and derived state) rebuilt by the backend
    pub fn recreate(&mut self) -> Result<(), FrameError> {
        self.backend.wait_idle()?;

        for slot in &mut self.slots {
            self.backend.recreate_slot_sync(&mut slot.resources)?;
            slot.state = SlotState::Idle;
        }

        self.backend.recreate_swapchain()?;
        self.recreations += 1;
        info!("swapchain recreated (#{})", self.recreations);
        Ok(())
    }

    pub fn wait_idle(&mut self) -> Result<(), FrameError> {
        self.backend.wait_idle()?;
        for slot in &mut self.slots {
            slot.state = SlotState::Idle;
        }
        Ok(())
    }

    pub fn current_frame(&self) -> usize {
        self.current
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|s| s.state)
    }

    /// Slots whose fence has not been observed signaled since their last use.
    pub fn busy_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state != SlotState::Idle)
            .count()
    }

    /// Frames submitted since creation.
    pub fn frames_submitted(&self) -> u64 {
        self.frames
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: FrameBackend> Drop for FrameRing<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            warn!("wait_idle before frame ring teardown failed: {e}");
        }
        for slot in self.slots.drain(..) {
            self.backend.destroy_slot(slot.resources);
        }
    }
}
