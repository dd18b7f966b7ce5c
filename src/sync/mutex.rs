//! Mutexes with priority inheritance
//!
//! A mutex records its owner and the owner records the mutexes it holds.
//! While any task waits on a held mutex the owner runs at the highest
//! effective priority among those waiters; the boost is recomputed from
//! these two relations whenever a waiter arrives, leaves or is handed the
//! lock, so nested and chained inheritance unwind correctly.
//!
//! Ownership passes directly to the highest-priority waiter on release.
//!
//! Author: Moroya Sakamoto

use crate::config::Features;
use crate::error::KernelError;
use crate::kernel::{Kernel, Wait};
use crate::list::{WaitList, WaitOrder};
use crate::port::Port;
use crate::table::RawHandle;
use crate::task::{TaskHandle, WaitObject, WaitState, WakeReason};
use crate::tick::Timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexHandle(pub(crate) RawHandle);

pub struct Mutex {
    pub(crate) owner: Option<usize>,
    /// Lock count of the owner; above 1 only for recursive mutexes
    pub(crate) depth: u32,
    pub(crate) recursive: bool,
    pub(crate) waiters: WaitList,
}

impl Mutex {
    fn new(recursive: bool) -> Self {
        Self {
            owner: None,
            depth: 0,
            recursive,
            waiters: WaitList::new(WaitOrder::Priority),
        }
    }
}

impl<P: Port, const HEAP: usize> Kernel<P, HEAP> {
    pub fn mutex_create(&mut self) -> Result<MutexHandle, KernelError> {
        self.insert_mutex(Mutex::new(false))
    }

    /// A mutex its owner may lock again, released after as many unlocks
    pub fn mutex_create_recursive(&mut self) -> Result<MutexHandle, KernelError> {
        self.require(Features::RECURSIVE_MUTEXES)?;
        self.insert_mutex(Mutex::new(true))
    }

    fn insert_mutex(&mut self, mutex: Mutex) -> Result<MutexHandle, KernelError> {
        let recursive = mutex.recursive;
        let raw = self.mutexes.insert(mutex).map_err(|_| KernelError::TooManyObjects)?;
        log::debug!("mutex {} created{}", raw.index(), if recursive { ", recursive" } else { "" });
        Ok(MutexHandle(raw))
    }

    fn resolve_mutex(&self, mutex: MutexHandle) -> Result<usize, KernelError> {
        self.mutexes.resolve(mutex.0).ok_or(KernelError::InvalidHandle)
    }

    /// Lock, blocking up to `timeout` while another task owns the mutex
    ///
    /// Locking a non-recursive mutex the caller already owns fails with
    /// [`KernelError::WouldDeadlock`].
    pub fn mutex_lock(&mut self, mutex: MutexHandle, timeout: Timeout) -> Result<Wait<()>, KernelError> {
        let m = self.resolve_mutex(mutex)?;
        let object = WaitObject::Mutex(m);
        let prior = self.prior_wait(object);
        let cur = self.caller()?;
        if let Some(WaitState { outcome: Some(WakeReason::Acquired), .. }) = prior {
            return Ok(Wait::Done(()));
        }

        let (owner, recursive) = {
            let mx = &self.mutexes[m];
            (mx.owner, mx.recursive)
        };
        match owner {
            None => {
                self.tasks[cur].held.push(m).map_err(|_| KernelError::TooManyObjects)?;
                let mx = &mut self.mutexes[m];
                mx.owner = Some(cur);
                mx.depth = 1;
                Ok(Wait::Done(()))
            }
            Some(o) if o == cur => {
                if !recursive {
                    return Err(KernelError::WouldDeadlock);
                }
                self.mutexes[m].depth += 1;
                Ok(Wait::Done(()))
            }
            Some(o) => {
                let Ok(deadline) = self.wait_deadline(timeout, prior) else {
                    return Ok(Wait::TimedOut);
                };
                self.blocking_caller()?;
                let priority = self.tasks[cur].priority;
                self.mutexes[m].waiters.push(cur, priority);
                self.block_current(cur, object, deadline);
                self.refresh_priority(o);
                Ok(Wait::Blocked)
            }
        }
    }

    /// Unlock; the caller must own the mutex
    ///
    /// When the last lock is dropped ownership moves to the highest-priority
    /// waiter and the caller's inherited priority is withdrawn.
    pub fn mutex_unlock(&mut self, mutex: MutexHandle) -> Result<(), KernelError> {
        let m = self.resolve_mutex(mutex)?;
        let cur = self.caller()?;
        let mx = &mut self.mutexes[m];
        if mx.owner != Some(cur) {
            return Err(KernelError::NotOwner);
        }
        mx.depth -= 1;
        if mx.depth > 0 {
            return Ok(());
        }
        self.release_mutex(m, cur);
        self.preempt_check();
        Ok(())
    }

    /// Task owning the mutex, if any
    pub fn mutex_holder(&self, mutex: MutexHandle) -> Result<Option<TaskHandle>, KernelError> {
        let m = self.resolve_mutex(mutex)?;
        Ok(self.mutexes[m].owner.map(|t| self.handle(t)))
    }

    /// Delete a mutex that is neither held nor waited on
    pub fn mutex_delete(&mut self, mutex: MutexHandle) -> Result<(), KernelError> {
        let m = self.resolve_mutex(mutex)?;
        let mx = &self.mutexes[m];
        if mx.owner.is_some() || !mx.waiters.is_empty() {
            return Err(KernelError::ObjectInUse);
        }
        self.mutexes.remove_at(m);
        Ok(())
    }
}
