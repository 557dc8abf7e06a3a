//! Packet records and the arena they live in.
//!
//! Every direction of every flow keeps a short trailing list of the data segments it has
//! sent. The records of all flows share one arena and are linked through generation
//! checked handles, so recycling a record is O(1) and a stale handle can never reach a
//! record that has since been reused by another flow.
use crate::clock::Timestamp;
use bitflags::bitflags;

bitflags! {
    /// How a segment was classified on arrival.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PktFlags: u8 {
        const NEW            = 1 << 0;
        const REXMIT         = 1 << 1;
        const DUPLICATE      = 1 << 2;
        const REORDER        = 1 << 3;
        const STRANGE        = 1 << 4;
        const PARTIAL_REXMIT = 1 << 5;
        const KEEPALIVE      = 1 << 6;
    }
}

impl PktFlags {
    pub fn is_rexmit(&self) -> bool {
        self.intersects(PktFlags::REXMIT | PktFlags::PARTIAL_REXMIT)
    }
}

/// One data segment as remembered by its direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pkt {
    /// Relative sequence number of the first byte
    pub seq: u64,
    /// Relative sequence number one past the last byte
    pub end: u64,
    /// Relative acknowledgement carried, 0 if none
    pub ack: u64,
    pub timestamp: Timestamp,
    pub ip_id: u16,
    pub flags: PktFlags,
    /// Loss event this segment belongs to, 0 if none
    pub event_id: u32,
    /// ACKs seen for this direction before the segment arrived
    pub ack_epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    live: bool,
    prev: Option<Handle>,
    next: Option<Handle>,
    pkt: Pkt,
}

/// Arena of packet records shared by all flows.
#[derive(Debug)]
pub struct PacketPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    soft_cap: usize,
    live: usize,
    overflows: u64,
}

impl PacketPool {
    pub fn new(soft_cap: usize) -> Self {
        PacketPool {
            slots: Vec::with_capacity(soft_cap.min(4096)),
            free: Vec::new(),
            soft_cap,
            live: 0,
            overflows: 0,
        }
    }

    /// Store `pkt`, reusing a free slot when there is one.
    ///
    /// The pool never refuses: past the soft cap it keeps growing, and the second value
    /// reports that this allocation went over the cap.
    fn alloc(&mut self, pkt: Pkt) -> (Handle, bool) {
        let over_cap = self.free.is_empty() && self.slots.len() >= self.soft_cap;
        if over_cap {
            self.overflows += 1;
        }
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.live = true;
            slot.prev = None;
            slot.next = None;
            slot.pkt = pkt;
            let handle = Handle {
                index,
                generation: slot.generation,
            };
            return (handle, over_cap);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            live: true,
            prev: None,
            next: None,
            pkt,
        });
        (
            Handle {
                index,
                generation: 0,
            },
            over_cap,
        )
    }

    fn release(&mut self, handle: Handle) -> Option<Pkt> {
        let slot = self.slot_mut(handle)?;
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        let pkt = slot.pkt;
        self.free.push(handle.index);
        self.live -= 1;
        Some(pkt)
    }

    fn slot(&self, handle: Handle) -> Option<&Slot> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.live && s.generation == handle.generation)
    }

    fn slot_mut(&mut self, handle: Handle) -> Option<&mut Slot> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.live && s.generation == handle.generation)
    }

    pub fn get(&self, handle: Handle) -> Option<&Pkt> {
        self.slot(handle).map(|s| &s.pkt)
    }

    /// Records currently owned by some flow.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Records waiting on the free list.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn soft_cap(&self) -> usize {
        self.soft_cap
    }

    /// Allocations that had to grow the arena past the soft cap.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }
}

/// A doubly linked list of records threaded through a [`PacketPool`].
#[derive(Debug, Default)]
pub struct PacketList {
    head: Option<Handle>,
    tail: Option<Handle>,
    len: usize,
}

impl PacketList {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn tail(&self) -> Option<Handle> {
        self.tail
    }

    /// Append a record; the flag is set when the pool had to grow past its soft cap.
    pub fn push_back(&mut self, pool: &mut PacketPool, pkt: Pkt) -> (Handle, bool) {
        let (handle, over_cap) = pool.alloc(pkt);
        if let Some(tail) = self.tail {
            if let Some(slot) = pool.slot_mut(tail) {
                slot.next = Some(handle);
            }
            if let Some(slot) = pool.slot_mut(handle) {
                slot.prev = Some(tail);
            }
        } else {
            self.head = Some(handle);
        }
        self.tail = Some(handle);
        self.len += 1;
        (handle, over_cap)
    }

    /// Detach the oldest record and return it to the pool.
    pub fn pop_front(&mut self, pool: &mut PacketPool) -> Option<(Handle, Pkt)> {
        let head = self.head?;
        let next = pool.slot(head).and_then(|s| s.next);
        let pkt = pool.release(head)?;
        match next {
            Some(next) => {
                if let Some(slot) = pool.slot_mut(next) {
                    slot.prev = None;
                }
            }
            None => self.tail = None,
        }
        self.head = next;
        self.len -= 1;
        Some((head, pkt))
    }

    /// Return every record to the pool.
    pub fn clear(&mut self, pool: &mut PacketPool) -> usize {
        let mut freed = 0;
        while self.pop_front(pool).is_some() {
            freed += 1;
        }
        freed
    }

    /// Walk the list from the newest record to the oldest.
    pub fn iter_rev<'a>(&self, pool: &'a PacketPool) -> RevIter<'a> {
        RevIter {
            pool,
            cursor: self.tail,
        }
    }
}

pub struct RevIter<'a> {
    pool: &'a PacketPool,
    cursor: Option<Handle>,
}

impl<'a> Iterator for RevIter<'a> {
    type Item = (Handle, &'a Pkt);

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.cursor?;
        let slot = self.pool.slot(handle)?;
        self.cursor = slot.prev;
        Some((handle, &slot.pkt))
    }
}
