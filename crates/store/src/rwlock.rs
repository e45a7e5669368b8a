// Copyright (C) 2025 the Arbor Authors. This program is free software: you can
// redistribute it and/or modify it under the terms of the GNU General Public
// License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The store lock: a writer-preference read-write lock with explicit
//! acquire/release, reentrant reads for the writing thread, and atomic
//! write→read downgrade.
//!
//! `std::sync::RwLock` cannot express this discipline: its guards are
//! lexically scoped, cannot downgrade, and cannot span a prepare/commit pair
//! held across calls (the transactional wrapper keeps the write side for the
//! whole transaction). Built on `Mutex` + `Condvar` instead.

use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

use arbor_common::StateError;

pub struct StoreLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

#[derive(Default)]
struct LockState {
    /// Readers that are not the writing thread.
    readers: usize,
    writer: Option<ThreadId>,
    /// Reentrant read acquisitions held by the writing thread.
    writer_reads: usize,
    waiting_writers: usize,
    closed: bool,
}

impl Default for StoreLock {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
        }
    }

    /// Shut the lock down. Every blocked and future acquisition fails; this
    /// is the closest analogue of interrupting waiters.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Acquire the read side. Readers are admitted concurrently, but wait
    /// while a writer is active or queued (writer preference). The writing
    /// thread itself is always admitted reentrantly.
    pub fn acquire_read(&self) -> Result<(), StateError> {
        let mut st = self.state.lock().unwrap();
        loop {
            if st.closed {
                return Err(StateError::Store("store lock is closed".into()));
            }
            match st.writer {
                Some(w) if w == thread::current().id() => {
                    st.writer_reads += 1;
                    return Ok(());
                }
                None if st.waiting_writers == 0 => {
                    st.readers += 1;
                    return Ok(());
                }
                _ => {}
            }
            st = self.cond.wait(st).unwrap();
        }
    }

    pub fn release_read(&self) {
        let mut st = self.state.lock().unwrap();
        if st.writer == Some(thread::current().id()) && st.writer_reads > 0 {
            st.writer_reads -= 1;
        } else {
            debug_assert!(st.readers > 0, "release_read without a held read lock");
            st.readers = st.readers.saturating_sub(1);
        }
        drop(st);
        self.cond.notify_all();
    }

    /// Acquire the write side: mutually exclusive with all readers and any
    /// other writer. Not write-reentrant.
    pub fn acquire_write(&self) -> Result<(), StateError> {
        let mut st = self.state.lock().unwrap();
        if st.writer == Some(thread::current().id()) {
            return Err(StateError::Store(
                "write lock is already held by this thread".into(),
            ));
        }
        st.waiting_writers += 1;
        loop {
            if st.closed {
                st.waiting_writers -= 1;
                return Err(StateError::Store("store lock is closed".into()));
            }
            if st.writer.is_none() && st.readers == 0 {
                st.waiting_writers -= 1;
                st.writer = Some(thread::current().id());
                return Ok(());
            }
            st = self.cond.wait(st).unwrap();
        }
    }

    pub fn release_write(&self) {
        let mut st = self.state.lock().unwrap();
        debug_assert!(
            st.writer == Some(thread::current().id()),
            "release_write by a thread that does not hold it"
        );
        st.writer = None;
        st.writer_reads = 0;
        drop(st);
        self.cond.notify_all();
    }

    /// Atomically trade the write side for a read side: no other writer can
    /// slip in between.
    pub fn downgrade(&self) {
        let mut st = self.state.lock().unwrap();
        debug_assert!(
            st.writer == Some(thread::current().id()),
            "downgrade by a thread that does not hold the write lock"
        );
        st.writer = None;
        st.readers += 1 + st.writer_reads;
        st.writer_reads = 0;
        drop(st);
        self.cond.notify_all();
    }

    /// RAII read acquisition for plain read paths.
    pub fn read_guard(&self) -> Result<ReadGuard<'_>, StateError> {
        self.acquire_read()?;
        Ok(ReadGuard(self))
    }
}

pub struct ReadGuard<'a>(&'a StoreLock);

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.0.release_read();
    }
}
