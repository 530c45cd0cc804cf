//! The shared device table: an ordered, singly-linked chain of open
//! interfaces, mutated by the discovery agent while the relay agent
//! iterates it, with no lock on the relay path.
//!
//! Field ownership is split between the two agents. Discovery writes
//! `head`, `next`, `in_enumeration`, `unregister_pending`, and creates and
//! destroys records (and with them the backend handles). The relay agent
//! writes `device_id` and `delete_ready`, and is the only user of `io`
//! while a record is live. Everything shared is an atomic; the only
//! blocking is the discovery side's spin in [`DeviceTable::sweep_missing`].
//!
//! A record leaves the table in three steps: discovery stops seeing the
//! path and sets `unregister_pending`; the relay agent unregisters the
//! record on its next visit and answers with `delete_ready`; discovery
//! then unlinks the record, waits until the relay agent has published a
//! fresh iteration (which proves no pointer from an older pass survives),
//! and frees it.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use super::frame::UNASSIGNED_ID;
use crate::hid::DeviceIo;

/// Pause between polls of the handshake spin.
const HANDSHAKE_PAUSE: Duration = Duration::from_millis(1);

pub struct DeviceRecord {
    io: UnsafeCell<Box<dyn DeviceIo>>,
    path: String,
    device_id: AtomicU8,
    in_enumeration: AtomicBool,
    unregister_pending: AtomicBool,
    delete_ready: AtomicBool,
    next: AtomicPtr<DeviceRecord>,
}

// SAFETY: `io` is accessed only by the agent that currently owns the
// record per the protocol above: discovery before publication and during
// destruction, the relay agent in between. All other fields are atomics.
unsafe impl Send for DeviceRecord {}
unsafe impl Sync for DeviceRecord {}

impl DeviceRecord {
    pub fn new(io: Box<dyn DeviceIo>, path: impl Into<String>) -> Self {
        Self {
            io: UnsafeCell::new(io),
            path: path.into(),
            device_id: AtomicU8::new(UNASSIGNED_ID),
            in_enumeration: AtomicBool::new(true),
            unregister_pending: AtomicBool::new(false),
            delete_ready: AtomicBool::new(false),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn device_id(&self) -> u8 {
        self.device_id.load(Ordering::Relaxed)
    }

    /// Relay agent only.
    pub fn set_device_id(&self, id: u8) {
        self.device_id.store(id, Ordering::Relaxed);
    }

    pub fn is_registered(&self) -> bool {
        self.device_id() != UNASSIGNED_ID
    }

    /// Discovery only; scratch flag for one enumeration cycle.
    pub fn mark_in_enumeration(&self, seen: bool) {
        self.in_enumeration.store(seen, Ordering::Relaxed);
    }

    pub fn unregister_pending(&self) -> bool {
        self.unregister_pending.load(Ordering::Acquire)
    }

    /// Discovery only.
    pub fn mark_unregister_pending(&self) {
        self.unregister_pending.store(true, Ordering::Release);
    }

    pub fn delete_ready(&self) -> bool {
        self.delete_ready.load(Ordering::Acquire)
    }

    /// Relay agent only, after the record has been unregistered.
    pub fn mark_delete_ready(&self) {
        self.delete_ready.store(true, Ordering::Release);
    }

    /// Exclusive access to the backend handle.
    ///
    /// # Safety
    /// Only the relay agent may call this on a live record (the main
    /// thread may call it after both agents have stopped), and the
    /// returned borrow must end before the next call.
    pub unsafe fn io_mut(&self) -> &mut dyn DeviceIo {
        &mut **self.io.get()
    }
}

pub struct DeviceTable {
    head: AtomicPtr<DeviceRecord>,
    /// Set by the relay agent at the end of every pass; cleared and awaited
    /// by discovery's removal handshake.
    new_iteration: AtomicBool,
    /// Nodes unlinked while shutdown cut the handshake short. Only touched
    /// by discovery during shutdown and by [`DeviceTable::clear`].
    retired: Mutex<Vec<*mut DeviceRecord>>,
}

// SAFETY: the raw pointers in `head`, `next` and `retired` are managed
// exclusively by the discovery agent (and by `clear` once both agents have
// stopped); the relay agent only ever reads the chain.
unsafe impl Send for DeviceTable {}
unsafe impl Sync for DeviceTable {}

impl DeviceTable {
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            new_iteration: AtomicBool::new(false),
            retired: Mutex::new(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            next: self.head.load(Ordering::Acquire),
            _table: PhantomData,
        }
    }

    /// Relay agent only: marks the end of one full pass over the chain.
    pub fn publish_iteration(&self) {
        self.new_iteration.store(true, Ordering::SeqCst);
    }

    /// Discovery only: append a fully initialized record at the tail. The
    /// record becomes visible to the relay agent with this store.
    pub fn push(&self, record: DeviceRecord) {
        let node = Box::into_raw(Box::new(record));
        let mut link = &self.head;
        loop {
            let current = link.load(Ordering::Acquire);
            if current.is_null() {
                link.store(node, Ordering::Release);
                return;
            }
            // SAFETY: non-null chain pointers reference live records; only
            // this agent unlinks or frees them.
            link = unsafe { &(*current).next };
        }
    }

    /// Discovery only: the live record for `path`, if any. Records already
    /// on their way out are invisible here so a re-plugged path gets a
    /// fresh record.
    pub fn find_live(&self, path: &str) -> Option<&DeviceRecord> {
        self.iter()
            .find(|r| r.path() == path && !r.unregister_pending())
    }

    /// Discovery only: reset every record's enumeration mark.
    pub fn clear_enumeration_marks(&self) {
        for record in self.iter() {
            record.mark_in_enumeration(false);
        }
    }

    /// Discovery only: handle every record the last enumeration did not
    /// see. First-time absentees are flagged for unregistration; records
    /// the relay agent has already released are unlinked and, once the
    /// handshake proves the relay agent cannot still hold them, freed.
    /// Returns the paths of the records it destroyed.
    pub fn sweep_missing(&self, stop: &AtomicBool) -> Vec<String> {
        let mut closed = Vec::new();
        let mut prev: Option<&DeviceRecord> = None;
        let mut cursor = self.head.load(Ordering::Acquire);
        while !cursor.is_null() {
            // SAFETY: chain pointers stay valid until this agent frees
            // them, which happens only below, after unlinking.
            let record = unsafe { &*cursor };
            let next = record.next.load(Ordering::Acquire);
            let missing = !record.in_enumeration.load(Ordering::Relaxed);
            if missing && record.delete_ready() {
                match prev {
                    Some(p) => p.next.store(next, Ordering::Release),
                    None => self.head.store(next, Ordering::Release),
                }
                closed.push(record.path().to_owned());
                if self.await_fresh_iteration(stop) {
                    // SAFETY: unlinked above, and the relay agent has
                    // since begun a pass that cannot reach this node.
                    drop(unsafe { Box::from_raw(cursor) });
                } else {
                    // Shutdown interrupted the handshake; reclaimed by
                    // `clear` after the agents have been joined.
                    self.retired.lock().unwrap().push(cursor);
                }
                cursor = next;
                continue;
            }
            if missing {
                record.mark_unregister_pending();
            }
            prev = Some(record);
            cursor = next;
        }
        closed
    }

    /// True when the relay agent finished a pass after the caller's
    /// unlink; false when shutdown was requested first.
    fn await_fresh_iteration(&self, stop: &AtomicBool) -> bool {
        self.new_iteration.store(false, Ordering::SeqCst);
        loop {
            if self.new_iteration.load(Ordering::SeqCst) {
                return true;
            }
            if stop.load(Ordering::SeqCst) {
                return false;
            }
            thread::sleep(HANDSHAKE_PAUSE);
        }
    }

    /// Release every remaining record, closing its handle. Callable only
    /// once both agents have stopped.
    pub fn clear(&self) {
        let mut cursor = self.head.swap(ptr::null_mut(), Ordering::SeqCst);
        while !cursor.is_null() {
            // SAFETY: no other thread touches the chain any more; each
            // node was allocated by `push` and is freed exactly once.
            let node = unsafe { Box::from_raw(cursor) };
            cursor = node.next.load(Ordering::Acquire);
        }
        for node in self.retired.lock().unwrap().drain(..) {
            // SAFETY: retired nodes were unlinked from the chain and never
            // freed; ownership is exclusively here.
            drop(unsafe { Box::from_raw(node) });
        }
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeviceTable {
    fn drop(&mut self) {
        self.clear();
    }
}

pub struct Iter<'a> {
    next: *mut DeviceRecord,
    _table: PhantomData<&'a DeviceTable>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a DeviceRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_null() {
            return None;
        }
        // SAFETY: chain nodes outlive any iteration: discovery frees a node
        // only after the removal handshake (or after both agents stopped),
        // and an iterator never survives across a relay pass boundary.
        let record = unsafe { &*self.next };
        self.next = record.next.load(Ordering::Acquire);
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::mock::MockBackend;
    use crate::hid::{DeviceIo, HidBackend, HidError};
    use crate::hub::frame::REPORT_SIZE;

    struct NullIo;

    impl DeviceIo for NullIo {
        fn read(&mut self, _buf: &mut [u8; REPORT_SIZE]) -> Result<usize, HidError> {
            Ok(0)
        }
        fn write(&mut self, data: &[u8]) -> Result<usize, HidError> {
            Ok(data.len())
        }
    }

    fn record(path: &str) -> DeviceRecord {
        DeviceRecord::new(Box::new(NullIo), path)
    }

    #[test]
    fn push_preserves_order() {
        let table = DeviceTable::new();
        table.push(record("a"));
        table.push(record("b"));
        table.push(record("c"));
        let paths: Vec<_> = table.iter().map(|r| r.path().to_owned()).collect();
        assert_eq!(paths, ["a", "b", "c"]);
    }

    #[test]
    fn find_live_skips_pending_records() {
        let table = DeviceTable::new();
        table.push(record("a"));
        table.iter().next().unwrap().mark_unregister_pending();
        assert!(table.find_live("a").is_none());
        table.push(record("a"));
        assert!(table.find_live("a").is_some());
    }

    #[test]
    fn sweep_flags_unseen_records_first() {
        let table = DeviceTable::new();
        table.push(record("a"));
        table.clear_enumeration_marks();
        let stop = AtomicBool::new(false);
        let closed = table.sweep_missing(&stop);
        assert!(closed.is_empty());
        assert!(table.iter().next().unwrap().unregister_pending());
    }

    #[test]
    fn sweep_frees_after_handshake() {
        let table = DeviceTable::new();
        table.push(record("a"));
        table.push(record("b"));
        table.clear_enumeration_marks();
        // "b" stays visible, "a" is gone and already released by the relay
        // side.
        for r in table.iter() {
            if r.path() == "b" {
                r.mark_in_enumeration(true);
            } else {
                r.mark_unregister_pending();
                r.mark_delete_ready();
            }
        }
        let stop = AtomicBool::new(false);
        let done = AtomicBool::new(false);
        thread::scope(|s| {
            s.spawn(|| {
                // Stand in for the relay agent's pass cadence.
                while !done.load(Ordering::SeqCst) {
                    table.publish_iteration();
                    thread::sleep(Duration::from_millis(1));
                }
            });
            let closed = table.sweep_missing(&stop);
            done.store(true, Ordering::SeqCst);
            assert_eq!(closed, ["a"]);
        });
        let paths: Vec<_> = table.iter().map(|r| r.path().to_owned()).collect();
        assert_eq!(paths, ["b"]);
    }

    #[test]
    fn shutdown_defers_free_to_clear() {
        let mut backend = MockBackend::new();
        let endpoint = backend.attach("a");
        let io = backend.open("a").unwrap();

        let table = DeviceTable::new();
        table.push(DeviceRecord::new(io, "a"));
        table.clear_enumeration_marks();
        table.iter().next().unwrap().mark_delete_ready();

        let stop = AtomicBool::new(true);
        let closed = table.sweep_missing(&stop);
        assert_eq!(closed, ["a"]);
        assert!(table.is_empty());
        // Handshake was cut short: the handle must still be open.
        assert!(!endpoint.is_closed());

        table.clear();
        assert!(endpoint.is_closed());
    }
}
