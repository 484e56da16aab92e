// SPDX-License-Identifier: CEPL-1.0
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use meadow_render::{
    AcquiredImage, FrameBackend, FrameError, FrameRing, PresentStatus, SlotState,
    MAX_ACQUIRE_ATTEMPTS,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fence {
    Signaled,
    Unsignaled,
    /// Submitted work the "GPU" has not finished yet.
    Pending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    Wait(usize),
    Reset(usize),
    Acquire(usize),
    Record(usize, u32),
    Submit(usize),
    Present { slot: usize, image: u32, swapchain: u32 },
    WaitIdle,
    RecreateSync(usize),
    RecreateSwapchain,
    Destroy(usize),
}

#[derive(Debug)]
struct MockSlot {
    index: usize,
    /// Id of the slot's current semaphore/fence set.
    sync: u32,
}

#[derive(Default)]
struct MockState {
    events: Vec<Event>,
    fences: Vec<Fence>,
    acquire_calls: usize,
    out_of_date_on_acquire: VecDeque<usize>,
    suboptimal_present_on: VecDeque<usize>,
    device_lost_on_submit: Option<usize>,
    submits: usize,
    presents: usize,
    swapchain_generation: u32,
    swapchain_recreations: usize,
    next_image: u32,
    image_count: u32,
    next_sync: u32,
    destroyed_sync: Vec<u32>,
    sync_recreates: usize,
    fail_sync_recreate_on: Option<usize>,
}

impl MockState {
    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

/// Always-succeeding backend unless a failure is scheduled.
/// Instance, device, swapchain and pipeline setup happen outside the ring and
/// are not modelled; the mock starts with a three-image swapchain.
struct MockBackend {
    state: Rc<RefCell<MockState>>,
}

impl MockBackend {
    fn new() -> (Self, Rc<RefCell<MockState>>) {
        let state = Rc::new(RefCell::new(MockState {
            image_count: 3,
            ..Default::default()
        }));
        (
            MockBackend {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl FrameBackend for MockBackend {
    type Slot = MockSlot;

    fn create_slot(&mut self, index: usize) -> Result<MockSlot, FrameError> {
        let mut s = self.state.borrow_mut();
        assert_eq!(s.fences.len(), index);
        s.fences.push(Fence::Signaled);
        s.next_sync += 1;
        Ok(MockSlot {
            index,
            sync: s.next_sync,
        })
    }

    fn recreate_slot_sync(&mut self, slot: &mut MockSlot) -> Result<(), FrameError> {
        let mut s = self.state.borrow_mut();
        assert_ne!(
            s.fences[slot.index],
            Fence::Pending,
            "sync objects rebuilt while still in flight"
        );
        s.sync_recreates += 1;
        if s.fail_sync_recreate_on == Some(s.sync_recreates) {
            return Err(FrameError::backend("create_semaphore", "ERROR_OUT_OF_HOST_MEMORY"));
        }
        s.next_sync += 1;
        let old = std::mem::replace(&mut slot.sync, s.next_sync);
        s.destroyed_sync.push(old);
        s.fences[slot.index] = Fence::Signaled;
        s.events.push(Event::RecreateSync(slot.index));
        Ok(())
    }

    fn destroy_slot(&mut self, slot: MockSlot) {
        let mut s = self.state.borrow_mut();
        assert_ne!(s.fences[slot.index], Fence::Pending, "destroyed in flight");
        assert!(
            !s.destroyed_sync.contains(&slot.sync),
            "slot {} sync set {} destroyed twice",
            slot.index,
            slot.sync
        );
        s.destroyed_sync.push(slot.sync);
        s.events.push(Event::Destroy(slot.index));
    }

    fn wait_for_fence(&mut self, slot: &MockSlot) -> Result<(), FrameError> {
        let mut s = self.state.borrow_mut();
        match s.fences[slot.index] {
            Fence::Unsignaled => panic!("slot {} waits on a fence nothing will signal", slot.index),
            Fence::Pending | Fence::Signaled => s.fences[slot.index] = Fence::Signaled,
        }
        s.events.push(Event::Wait(slot.index));
        Ok(())
    }

    fn reset_fence(&mut self, slot: &MockSlot) -> Result<(), FrameError> {
        let mut s = self.state.borrow_mut();
        assert_eq!(s.fences[slot.index], Fence::Signaled);
        s.fences[slot.index] = Fence::Unsignaled;
        s.events.push(Event::Reset(slot.index));
        Ok(())
    }

    fn acquire_image(&mut self, slot: &MockSlot) -> Result<AcquiredImage, FrameError> {
        let mut s = self.state.borrow_mut();
        s.acquire_calls += 1;
        s.events.push(Event::Acquire(slot.index));
        let call = s.acquire_calls;
        if s.out_of_date_on_acquire.front() == Some(&call) {
            s.out_of_date_on_acquire.pop_front();
            return Err(FrameError::OutOfDate);
        }
        let index = s.next_image;
        s.next_image = (s.next_image + 1) % s.image_count;
        Ok(AcquiredImage {
            index,
            suboptimal: false,
        })
    }

    fn record(&mut self, slot: &MockSlot, image_index: u32) -> Result<(), FrameError> {
        let mut s = self.state.borrow_mut();
        assert_ne!(
            s.fences[slot.index],
            Fence::Pending,
            "slot {} re-recorded before its fence signaled",
            slot.index
        );
        s.events.push(Event::Record(slot.index, image_index));
        Ok(())
    }

    fn submit(&mut self, slot: &MockSlot) -> Result<(), FrameError> {
        let mut s = self.state.borrow_mut();
        if s.device_lost_on_submit == Some(s.submits + 1) {
            return Err(FrameError::DeviceLost);
        }
        s.submits += 1;
        s.fences[slot.index] = Fence::Pending;
        s.events.push(Event::Submit(slot.index));
        Ok(())
    }

    fn present(&mut self, slot: &MockSlot, image_index: u32) -> Result<PresentStatus, FrameError> {
        let mut s = self.state.borrow_mut();
        s.presents += 1;
        let swapchain = s.swapchain_generation;
        s.events.push(Event::Present {
            slot: slot.index,
            image: image_index,
            swapchain,
        });
        let call = s.presents;
        if s.suboptimal_present_on.front() == Some(&call) {
            s.suboptimal_present_on.pop_front();
            return Ok(PresentStatus::Suboptimal);
        }
        Ok(PresentStatus::Optimal)
    }

    fn wait_idle(&mut self) -> Result<(), FrameError> {
        let mut s = self.state.borrow_mut();
        for fence in s.fences.iter_mut() {
            if *fence == Fence::Pending {
                *fence = Fence::Signaled;
            }
        }
        s.events.push(Event::WaitIdle);
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> Result<(), FrameError> {
        let mut s = self.state.borrow_mut();
        assert!(
            s.fences.iter().all(|f| *f != Fence::Pending),
            "swapchain rebuilt while work is in flight"
        );
        s.swapchain_generation += 1;
        s.swapchain_recreations += 1;
        s.next_image = 0;
        s.events.push(Event::RecreateSwapchain);
        Ok(())
    }
}

#[test]
fn zero_slots_is_rejected() {
    let (backend, _) = MockBackend::new();
    assert!(matches!(
        FrameRing::new(backend, 0),
        Err(FrameError::NoFrameSlots)
    ));
}

#[test]
fn ten_frames_on_two_slots_cycle_the_index() {
    let (backend, state) = MockBackend::new();
    let mut ring = FrameRing::new(backend, 2).unwrap();

    let mut seen = Vec::new();
    for _ in 0..10 {
        seen.push(ring.current_frame());
        let report = ring.advance_frame().unwrap();
        assert!(!report.recreated);
    }

    assert_eq!(seen, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    assert_eq!(ring.current_frame(), 0);
    assert_eq!(ring.frames_submitted(), 10);

    let s = state.borrow();
    assert_eq!(s.submits, 10);
    assert_eq!(s.presents, 10);
    assert_eq!(s.swapchain_recreations, 0);
}

#[test]
fn each_frame_follows_the_protocol_order() {
    let (backend, state) = MockBackend::new();
    let mut ring = FrameRing::new(backend, 2).unwrap();
    ring.advance_frame().unwrap();

    let s = state.borrow();
    assert_eq!(
        s.events,
        vec![
            Event::Wait(0),
            Event::Reset(0),
            Event::Acquire(0),
            Event::Record(0, 0),
            Event::Submit(0),
            Event::Present {
                slot: 0,
                image: 0,
                swapchain: 0
            },
        ]
    );
}

#[test]
fn out_of_date_acquire_recreates_once_and_recovers() {
    let (backend, state) = MockBackend::new();
    state.borrow_mut().out_of_date_on_acquire.push_back(5);
    let mut ring = FrameRing::new(backend, 2).unwrap();

    let mut recreated_on = Vec::new();
    for call in 1..=10 {
        let report = ring.advance_frame().unwrap();
        if report.recreated {
            recreated_on.push(call);
        }
    }

    assert_eq!(recreated_on, vec![5]);
    assert_eq!(ring.recreations(), 1);

    let s = state.borrow();
    assert_eq!(s.swapchain_recreations, 1);
    assert_eq!(s.submits, 10);
    assert_eq!(s.presents, 10);

    let generations: Vec<u32> = s
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Present { swapchain, .. } => Some(*swapchain),
            _ => None,
        })
        .collect();
    assert_eq!(generations, vec![0, 0, 0, 0, 1, 1, 1, 1, 1, 1]);
}

#[test]
fn recreation_idles_the_device_and_rebuilds_every_slot_first() {
    let (backend, state) = MockBackend::new();
    state.borrow_mut().out_of_date_on_acquire.push_back(2);
    let mut ring = FrameRing::new(backend, 2).unwrap();
    ring.advance_frame().unwrap();
    ring.advance_frame().unwrap();

    let s = state.borrow();
    let at = s
        .events
        .iter()
        .position(|e| *e == Event::RecreateSwapchain)
        .unwrap();
    assert_eq!(
        &s.events[at - 3..=at],
        &[
            Event::WaitIdle,
            Event::RecreateSync(0),
            Event::RecreateSync(1),
            Event::RecreateSwapchain,
        ]
    );
}

#[test]
fn never_more_than_n_slots_busy() {
    for n in 1..=4 {
        let (backend, _) = MockBackend::new();
        let mut ring = FrameRing::new(backend, n).unwrap();
        for _ in 0..25 {
            ring.advance_frame().unwrap();
            assert!(ring.busy_slots() <= n);
            assert!(ring.current_frame() < n);
        }
        assert_eq!(ring.busy_slots(), n);
        ring.wait_idle().unwrap();
        assert_eq!(ring.busy_slots(), 0);
    }
}

#[test]
fn fence_is_waited_before_every_rerecord() {
    let (backend, state) = MockBackend::new();
    let mut ring = FrameRing::new(backend, 3).unwrap();
    for _ in 0..12 {
        ring.advance_frame().unwrap();
    }

    let s = state.borrow();
    let mut waited_since_submit = vec![true; 3];
    for event in &s.events {
        match *event {
            Event::Wait(i) => waited_since_submit[i] = true,
            Event::Record(i, _) => assert!(waited_since_submit[i], "slot {i} reused early"),
            Event::Submit(i) => waited_since_submit[i] = false,
            _ => {}
        }
    }
}

#[test]
fn submitted_slot_stays_busy_until_its_fence_is_waited() {
    let (backend, _) = MockBackend::new();
    let mut ring = FrameRing::new(backend, 2).unwrap();

    ring.advance_frame().unwrap();
    assert_eq!(ring.slot_state(0), Some(SlotState::Submitted));
    assert_eq!(ring.slot_state(1), Some(SlotState::Idle));

    ring.advance_frame().unwrap();
    ring.advance_frame().unwrap();
    assert_eq!(ring.slot_state(0), Some(SlotState::Submitted));
    assert_eq!(ring.slot_state(2), None);
}

#[test]
fn persistent_staleness_surfaces_after_bounded_retries() {
    let (backend, state) = MockBackend::new();
    state
        .borrow_mut()
        .out_of_date_on_acquire
        .extend(1..=MAX_ACQUIRE_ATTEMPTS);
    let mut ring = FrameRing::new(backend, 2).unwrap();

    assert_eq!(ring.advance_frame(), Err(FrameError::OutOfDate));
    assert_eq!(ring.recreations() as usize, MAX_ACQUIRE_ATTEMPTS - 1);
    assert_eq!(ring.slot_state(0), Some(SlotState::Idle));

    // The reset fence was rebuilt, so the same slot does not deadlock.
    let report = ring.advance_frame().unwrap();
    assert_eq!(report.slot, 0);
    assert_eq!(state.borrow().submits, 1);
}

#[test]
fn suboptimal_present_recreates_after_the_frame() {
    let (backend, state) = MockBackend::new();
    state.borrow_mut().suboptimal_present_on.push_back(3);
    let mut ring = FrameRing::new(backend, 2).unwrap();

    let reports: Vec<_> = (0..4).map(|_| ring.advance_frame().unwrap()).collect();
    assert!(!reports[1].recreated);
    assert!(reports[2].recreated);
    assert!(!reports[3].recreated);
    assert_eq!(ring.recreations(), 1);
    assert_eq!(state.borrow().submits, 4);
}

#[test]
fn device_loss_is_fatal() {
    let (backend, state) = MockBackend::new();
    state.borrow_mut().device_lost_on_submit = Some(4);
    let mut ring = FrameRing::new(backend, 2).unwrap();

    for _ in 0..3 {
        ring.advance_frame().unwrap();
    }
    assert_eq!(ring.advance_frame(), Err(FrameError::DeviceLost));
    assert_eq!(ring.recreations(), 0);
}

#[test]
fn explicit_recreate_bumps_swapchain_generation() {
    let (backend, state) = MockBackend::new();
    let mut ring = FrameRing::new(backend, 2).unwrap();
    ring.advance_frame().unwrap();
    ring.recreate().unwrap();
    ring.advance_frame().unwrap();

    let s = state.borrow();
    assert_eq!(s.swapchain_recreations, 1);
    assert!(matches!(
        s.events.last(),
        Some(Event::Present { swapchain: 1, .. })
    ));
}

#[test]
fn drop_idles_then_destroys_every_slot() {
    let (backend, state) = MockBackend::new();
    {
        let mut ring = FrameRing::new(backend, 2).unwrap();
        for _ in 0..3 {
            ring.advance_frame().unwrap();
        }
    }

    let s = state.borrow();
    let tail = &s.events[s.events.len() - 3..];
    assert_eq!(
        tail,
        &[Event::WaitIdle, Event::Destroy(0), Event::Destroy(1)]
    );
    assert_eq!(s.count(|e| matches!(e, Event::Destroy(_))), 2);
}

#[test]
fn failed_sync_rebuild_leaves_slots_destroyable_once() {
    let (backend, state) = MockBackend::new();
    // First recreation: slot 0 rebuilds, slot 1 fails.
    state.borrow_mut().fail_sync_recreate_on = Some(2);
    {
        let mut ring = FrameRing::new(backend, 2).unwrap();
        ring.advance_frame().unwrap();
        assert!(matches!(
            ring.recreate(),
            Err(FrameError::Backend { op: "create_semaphore", .. })
        ));
        assert_eq!(ring.recreations(), 0);
    }

    let s = state.borrow();
    assert_eq!(s.swapchain_recreations, 0);
    assert_eq!(s.count(|e| matches!(e, Event::Destroy(_))), 2);
    // slot 0 held sets 1 and 3; slot 1 kept set 2
    let mut destroyed = s.destroyed_sync.clone();
    destroyed.sort_unstable();
    assert_eq!(destroyed, vec![1, 2, 3]);
}
