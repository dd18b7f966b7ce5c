//! Message queues
//!
//! Bounded FIFO of fixed-size items copied in and out of storage carved
//! from the kernel heap. Senders blocked on a full queue are served in
//! priority order, receivers blocked on an empty one in arrival order.
//! A successful send or receive signals the longest-standing counterpart,
//! which re-checks the queue when it runs.
//!
//! Author: Moroya Sakamoto

use crate::error::KernelError;
use crate::heap::Block;
use crate::kernel::{Kernel, Wait};
use crate::list::{WaitList, WaitOrder};
use crate::port::Port;
use crate::ring::SlotRing;
use crate::table::RawHandle;
use crate::task::{WaitObject, WakeReason};
use crate::tick::Timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle(pub(crate) RawHandle);

/// Where a sent item is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendPosition {
    Back,
    Front,
    /// Replace the only item of a length-1 queue
    Overwrite,
}

pub struct Queue {
    pub(crate) item_size: usize,
    storage: Block,
    pub(crate) ring: SlotRing,
    pub(crate) senders: WaitList,
    pub(crate) receivers: WaitList,
}

impl<P: Port, const HEAP: usize> Kernel<P, HEAP> {
    /// Create a queue of `length` items of `item_size` bytes each
    pub fn queue_create(&mut self, length: usize, item_size: usize) -> Result<QueueHandle, KernelError> {
        if length == 0 || item_size == 0 {
            return Err(KernelError::InvalidArgument);
        }
        if self.queues.is_full() {
            return Err(KernelError::TooManyObjects);
        }
        let bytes = length.checked_mul(item_size).ok_or(KernelError::InvalidArgument)?;
        let storage = match self.heap.allocate(bytes) {
            Some(block) => block,
            None => return Err(self.allocation_failed()),
        };

        let queue = Queue {
            item_size,
            storage,
            ring: SlotRing::new(length),
            senders: WaitList::new(WaitOrder::Priority),
            receivers: WaitList::new(WaitOrder::Fifo),
        };
        match self.queues.insert(queue) {
            Ok(raw) => {
                log::debug!("queue {} created, {} x {} bytes", raw.index(), length, item_size);
                Ok(QueueHandle(raw))
            }
            Err(queue) => {
                self.heap.free(queue.storage);
                Err(KernelError::TooManyObjects)
            }
        }
    }

    pub(crate) fn resolve_queue(&self, queue: QueueHandle) -> Result<usize, KernelError> {
        self.queues.resolve(queue.0).ok_or(KernelError::InvalidHandle)
    }

    /// Append `item`, blocking up to `timeout` while the queue is full
    pub fn queue_send_to_back(&mut self, queue: QueueHandle, item: &[u8], timeout: Timeout) -> Result<Wait<()>, KernelError> {
        self.queue_send(queue, item, timeout, SendPosition::Back)
    }

    /// Insert `item` ahead of every queued item
    pub fn queue_send_to_front(&mut self, queue: QueueHandle, item: &[u8], timeout: Timeout) -> Result<Wait<()>, KernelError> {
        self.queue_send(queue, item, timeout, SendPosition::Front)
    }

    /// Write `item` into a length-1 queue whether or not it is full
    pub fn queue_overwrite(&mut self, queue: QueueHandle, item: &[u8]) -> Result<(), KernelError> {
        let q = self.resolve_queue(queue)?;
        self.check_item(q, item.len())?;
        self.place_item(q, item, SendPosition::Overwrite)?;
        self.preempt_check();
        Ok(())
    }

    fn queue_send(
        &mut self,
        queue: QueueHandle,
        item: &[u8],
        timeout: Timeout,
        position: SendPosition,
    ) -> Result<Wait<()>, KernelError> {
        let q = self.resolve_queue(queue)?;
        self.check_item(q, item.len())?;
        let object = WaitObject::QueueSend(q);
        let prior = self.prior_wait(object);

        if !self.queues[q].ring.is_full() {
            self.place_item(q, item, position)?;
            self.preempt_check();
            return Ok(Wait::Done(()));
        }

        let Ok(deadline) = self.wait_deadline(timeout, prior) else {
            return Ok(Wait::TimedOut);
        };
        let cur = self.blocking_caller()?;
        let priority = self.tasks[cur].priority;
        self.queues[q].senders.push(cur, priority);
        self.block_current(cur, object, deadline);
        Ok(Wait::Blocked)
    }

    pub(crate) fn check_item(&self, q: usize, len: usize) -> Result<(), KernelError> {
        if self.queues[q].item_size == len {
            Ok(())
        } else {
            Err(KernelError::InvalidArgument)
        }
    }

    /// Copy `item` into a free slot and signal a waiting receiver
    ///
    /// Returns whether the woken receiver outranks the running task.
    pub(crate) fn place_item(&mut self, q: usize, item: &[u8], position: SendPosition) -> Result<bool, KernelError> {
        let queue = &mut self.queues[q];
        let slot = match position {
            SendPosition::Back => queue.ring.push_back(),
            SendPosition::Front => queue.ring.push_front(),
            SendPosition::Overwrite => {
                if queue.ring.capacity() != 1 {
                    return Err(KernelError::InvalidArgument);
                }
                queue.ring.clear();
                queue.ring.push_back()
            }
        };
        // Callers check for space first
        let Some(slot) = slot else {
            return Ok(false);
        };
        let size = queue.item_size;
        let storage = queue.storage;
        let receiver = queue.receivers.pop();

        let bytes = self.heap.bytes_mut(storage);
        bytes[slot * size..(slot + 1) * size].copy_from_slice(item);
        Ok(match receiver {
            Some(r) => self.wake(r, WakeReason::Signalled),
            None => false,
        })
    }

    /// Remove the oldest item into `out`, blocking up to `timeout` while the
    /// queue is empty
    pub fn queue_receive(&mut self, queue: QueueHandle, out: &mut [u8], timeout: Timeout) -> Result<Wait<()>, KernelError> {
        self.queue_read(queue, out, timeout, true)
    }

    /// Copy the oldest item into `out` without removing it
    pub fn queue_peek(&mut self, queue: QueueHandle, out: &mut [u8], timeout: Timeout) -> Result<Wait<()>, KernelError> {
        self.queue_read(queue, out, timeout, false)
    }

    fn queue_read(
        &mut self,
        queue: QueueHandle,
        out: &mut [u8],
        timeout: Timeout,
        remove: bool,
    ) -> Result<Wait<()>, KernelError> {
        let q = self.resolve_queue(queue)?;
        self.check_item(q, out.len())?;
        let object = WaitObject::QueueReceive(q);
        let prior = self.prior_wait(object);

        if !self.queues[q].ring.is_empty() {
            self.take_item(q, out, remove);
            self.preempt_check();
            return Ok(Wait::Done(()));
        }

        let Ok(deadline) = self.wait_deadline(timeout, prior) else {
            return Ok(Wait::TimedOut);
        };
        let cur = self.blocking_caller()?;
        let priority = self.tasks[cur].priority;
        self.queues[q].receivers.push(cur, priority);
        self.block_current(cur, object, deadline);
        Ok(Wait::Blocked)
    }

    /// Copy the oldest item out; if `remove`, free its slot and signal the
    /// highest-priority sender
    ///
    /// A peek leaves the item in place, so the next receiver is signalled
    /// instead. Returns whether a woken task outranks the running one.
    pub(crate) fn take_item(&mut self, q: usize, out: &mut [u8], remove: bool) -> bool {
        let queue = &mut self.queues[q];
        let slot = if remove { queue.ring.pop_front() } else { queue.ring.front() };
        let Some(slot) = slot else {
            return false;
        };
        let size = queue.item_size;
        let storage = queue.storage;
        let next = if remove { queue.senders.pop() } else { queue.receivers.pop() };

        let bytes = self.heap.bytes(storage);
        out.copy_from_slice(&bytes[slot * size..(slot + 1) * size]);
        match next {
            Some(t) => self.wake(t, WakeReason::Signalled),
            None => false,
        }
    }

    pub fn queue_messages_waiting(&self, queue: QueueHandle) -> Result<usize, KernelError> {
        let q = self.resolve_queue(queue)?;
        Ok(self.queues[q].ring.len())
    }

    pub fn queue_spaces_available(&self, queue: QueueHandle) -> Result<usize, KernelError> {
        let q = self.resolve_queue(queue)?;
        Ok(self.queues[q].ring.spaces())
    }

    /// Discard every queued item; blocked senders are signalled
    pub fn queue_reset(&mut self, queue: QueueHandle) -> Result<(), KernelError> {
        let q = self.resolve_queue(queue)?;
        self.queues[q].ring.clear();
        while let Some(t) = self.queues[q].senders.pop() {
            self.wake(t, WakeReason::Signalled);
        }
        self.preempt_check();
        Ok(())
    }

    /// Delete a queue no task is waiting on, returning its storage to the heap
    pub fn queue_delete(&mut self, queue: QueueHandle) -> Result<(), KernelError> {
        let q = self.resolve_queue(queue)?;
        let pending = &self.queues[q];
        if !pending.senders.is_empty() || !pending.receivers.is_empty() {
            return Err(KernelError::ObjectInUse);
        }
        if let Some(queue) = self.queues.remove_at(q) {
            self.heap.free(queue.storage);
        }
        Ok(())
    }

    /// Queues currently allocated
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }
}
