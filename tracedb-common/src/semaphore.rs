// Copyright 2026 tracedb Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A counting semaphore with timed acquisition.
//!
//! The semaphore enforces hard ceilings on resources such as open files and loaded index blocks. A unit taken by
//! [`Semaphore::acquire_owned`] is held by an [`OwnedPermit`] and returned when the permit drops, which makes release
//! on every error path automatic.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::{
    error::{Error, ErrorKind, Result},
    strict_assert,
};

/// Counting semaphore with blocking, timed and non-blocking acquisition.
#[derive(Debug)]
pub struct Semaphore {
    available: Mutex<usize>,
    condvar: Condvar,
    capacity: usize,
}

impl Semaphore {
    /// Create a semaphore holding `capacity` units.
    pub fn new(capacity: usize) -> Self {
        Self {
            available: Mutex::new(capacity),
            condvar: Condvar::new(),
            capacity,
        }
    }

    /// Total units the semaphore was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Units currently available.
    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    /// Take one unit, waiting up to `timeout` for one to become available.
    ///
    /// A zero timeout makes a single non-blocking attempt. Fails with [`ErrorKind::ResourceExhausted`] on timeout.
    pub fn acquire(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        let mut available = self.available.lock();
        while *available == 0 {
            let timed_out = match deadline {
                Some(deadline) => self.condvar.wait_until(&mut available, deadline).timed_out(),
                None => {
                    self.condvar.wait(&mut available);
                    false
                }
            };
            if timed_out && *available == 0 {
                tracing::trace!("[semaphore]: acquire timed out after {timeout:?}");
                return Err(Error::new(ErrorKind::ResourceExhausted, "quota exhausted")
                    .with_context("capacity", self.capacity)
                    .with_context("timeout", format!("{timeout:?}")));
            }
        }
        *available -= 1;
        Ok(())
    }

    /// Take one unit if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut available = self.available.lock();
        if *available == 0 {
            return false;
        }
        *available -= 1;
        true
    }

    /// Return one unit and wake one waiter.
    pub fn release(&self) {
        let mut available = self.available.lock();
        strict_assert!(*available < self.capacity, "semaphore released more units than acquired");
        *available += 1;
        drop(available);
        self.condvar.notify_one();
    }

    /// Like [`Semaphore::acquire`], but the unit is returned when the permit drops.
    pub fn acquire_owned(self: &Arc<Self>, timeout: Duration) -> Result<OwnedPermit> {
        self.acquire(timeout)?;
        Ok(OwnedPermit { semaphore: self.clone() })
    }

    /// Like [`Semaphore::try_acquire`], but the unit is returned when the permit drops.
    pub fn try_acquire_owned(self: &Arc<Self>) -> Option<OwnedPermit> {
        self.try_acquire().then(|| OwnedPermit { semaphore: self.clone() })
    }
}

/// One unit of a [`Semaphore`], released on drop.
#[derive(Debug)]
#[must_use = "dropping the permit releases the unit immediately"]
pub struct OwnedPermit {
    semaphore: Arc<Semaphore>,
}

impl Drop for OwnedPermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
