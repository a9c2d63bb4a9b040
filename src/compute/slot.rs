//! Buffering slots and the per-frame state machine.
//!
//! Each slot carries one frame through
//! `Idle → Staged → Uploading → Dispatched → Complete → Idle`.
//! Frames are assigned to slots by sequence number modulo the ring size, so
//! with N slots up to N frames can be in flight at once. With one slot the
//! engine is fully serialized on that slot's fence.
//!
//! The ring only tracks states, tickets and fences. The GPU resources a slot
//! owns live in the processor that uses the ring.

use crate::core::error::{FrameError, FrameResult, SlotStateName};
use crate::gpu::fence::Fence;
use std::fmt;
use std::time::Duration;

/// Lifecycle state of one buffering slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Free for a new frame
    Idle,
    /// Frame bytes copied into the slot's staging memory
    Staged,
    /// Staging → INPUT transfer recorded
    Uploading,
    /// Transfer and dispatch submitted, fence pending
    Dispatched,
    /// Fence signaled; OUTPUT may be read
    Complete,
}

impl SlotState {
    /// State name for errors and logs.
    pub fn name(self) -> SlotStateName {
        SlotStateName(match self {
            SlotState::Idle => "idle",
            SlotState::Staged => "staged",
            SlotState::Uploading => "uploading",
            SlotState::Dispatched => "dispatched",
            SlotState::Complete => "complete",
        })
    }

    /// The state a frame moves to next.
    pub fn next(self) -> SlotState {
        match self {
            SlotState::Idle => SlotState::Staged,
            SlotState::Staged => SlotState::Uploading,
            SlotState::Uploading => SlotState::Dispatched,
            SlotState::Dispatched => SlotState::Complete,
            SlotState::Complete => SlotState::Idle,
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Handle to one submitted frame.
///
/// Tickets are only valid until their frame is released or the engine is
/// reset; after that they are rejected as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameTicket {
    /// Slot the frame occupies
    pub slot: usize,
    /// Monotonic frame sequence number
    pub sequence: u64,
}

impl fmt::Display for FrameTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame #{} (slot {})", self.sequence, self.slot)
    }
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    sequence: Option<u64>,
    fence: Fence,
}

impl Slot {
    fn idle() -> Self {
        Self {
            state: SlotState::Idle,
            sequence: None,
            fence: Fence::signaled(),
        }
    }
}

/// Ring of N buffering slots indexed by frame sequence modulo N.
#[derive(Debug)]
pub struct SlotRing {
    slots: Vec<Slot>,
    next_sequence: u64,
}

impl SlotRing {
    /// Create a ring of `count` idle slots with signaled fences.
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| Slot::idle()).collect(),
            next_sequence: 0,
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the ring has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// State of slot `slot`.
    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    /// Whether every slot is idle.
    pub fn all_idle(&self) -> bool {
        self.slots.iter().all(|s| s.state == SlotState::Idle)
    }

    /// Number of slots holding a frame.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.state != SlotState::Idle).count()
    }

    /// Slot the next frame will be assigned to.
    pub fn next_slot(&self) -> usize {
        (self.next_sequence % self.slots.len().max(1) as u64) as usize
    }

    /// Fence of slot `slot`.
    ///
    /// # Panics
    /// Panics if `slot` is out of range; slot indices come from tickets
    /// issued by this ring.
    pub fn fence(&self, slot: usize) -> &Fence {
        &self.slots[slot].fence
    }

    /// Claim the next slot for a new frame and move it to `Staged`.
    ///
    /// Fails with [`FrameError::SlotBusy`] if that slot still holds an
    /// earlier frame; the ring is left unchanged.
    pub fn begin(&mut self) -> FrameResult<FrameTicket> {
        let index = self.next_slot();
        let slot = self.slots.get_mut(index).ok_or(FrameError::SlotBusy {
            slot: index,
            state: SlotState::Idle.name(),
        })?;
        if slot.state != SlotState::Idle {
            return Err(FrameError::SlotBusy {
                slot: index,
                state: slot.state.name(),
            });
        }
        let ticket = FrameTicket {
            slot: index,
            sequence: self.next_sequence,
        };
        slot.state = SlotState::Staged;
        slot.sequence = Some(ticket.sequence);
        self.next_sequence += 1;
        log::trace!("{ticket} staged");
        Ok(ticket)
    }

    fn slot_for(&mut self, ticket: FrameTicket) -> FrameResult<&mut Slot> {
        match self.slots.get_mut(ticket.slot) {
            Some(slot) if slot.sequence == Some(ticket.sequence) => Ok(slot),
            _ => Err(FrameError::StaleTicket {
                slot: ticket.slot,
                sequence: ticket.sequence,
            }),
        }
    }

    /// Move the ticket's frame from `from` to the following state.
    pub fn advance(&mut self, ticket: FrameTicket, from: SlotState) -> FrameResult<SlotState> {
        let slot = self.slot_for(ticket)?;
        if slot.state != from {
            return Err(FrameError::NotComplete {
                slot: ticket.slot,
                sequence: ticket.sequence,
                state: slot.state.name(),
            });
        }
        slot.state = from.next();
        log::trace!("{ticket} {}", slot.state);
        Ok(slot.state)
    }

    /// Return a frame that never reached submission to `Idle`.
    ///
    /// The slot gets a fresh fence so nothing recorded for the aborted
    /// frame can signal it later. If the ticket is the most recent one its
    /// sequence number is handed out again, keeping slot assignment in step
    /// with the frames actually in flight.
    pub fn abort(&mut self, ticket: FrameTicket) {
        if let Ok(slot) = self.slot_for(ticket) {
            *slot = Slot::idle();
            if ticket.sequence + 1 == self.next_sequence {
                self.next_sequence = ticket.sequence;
            }
            log::trace!("{ticket} aborted");
        }
    }

    /// Wait for the ticket's frame to finish executing.
    ///
    /// Blocks on the slot fence for at most `timeout`, calling `poll`
    /// between checks. On success the slot is `Complete`. A timeout is
    /// reported as [`FrameError::DeviceHang`] and leaves the slot
    /// `Dispatched`; the caller is expected to reset.
    pub fn wait(
        &mut self,
        ticket: FrameTicket,
        timeout: Duration,
        poll: impl FnMut(),
    ) -> FrameResult<()> {
        let slot = self.slot_for(ticket)?;
        match slot.state {
            SlotState::Complete => Ok(()),
            SlotState::Dispatched => {
                slot.fence
                    .wait(timeout, poll)
                    .map_err(|_| FrameError::DeviceHang {
                        slot: ticket.slot,
                        timeout,
                    })?;
                slot.state = SlotState::Complete;
                log::trace!("{ticket} complete");
                Ok(())
            }
            state => Err(FrameError::NotComplete {
                slot: ticket.slot,
                sequence: ticket.sequence,
                state: state.name(),
            }),
        }
    }

    /// Check that the ticket's frame is `Complete`.
    pub fn require_complete(&mut self, ticket: FrameTicket) -> FrameResult<()> {
        let slot = self.slot_for(ticket)?;
        if slot.state != SlotState::Complete {
            return Err(FrameError::NotComplete {
                slot: ticket.slot,
                sequence: ticket.sequence,
                state: slot.state.name(),
            });
        }
        Ok(())
    }

    /// Return a `Complete` slot to `Idle`, invalidating the ticket.
    pub fn release(&mut self, ticket: FrameTicket) -> FrameResult<()> {
        self.advance(ticket, SlotState::Complete)?;
        if let Ok(slot) = self.slot_for(ticket) {
            slot.sequence = None;
        }
        Ok(())
    }

    /// Drop every in-flight frame: all slots become `Idle` with fresh,
    /// signaled fences, and all outstanding tickets turn stale.
    ///
    /// Returns the number of frames dropped.
    pub fn reset(&mut self) -> usize {
        let dropped = self.in_flight();
        for slot in &mut self.slots {
            *slot = Slot::idle();
        }
        dropped
    }
}
