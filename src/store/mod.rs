//! Module define the backing key/value store contract.
//!
//! The document layers above persist everything through [KvStore], an
//! embedded store multiplexing named keyspaces over one file. The store owns
//! sequence numbering: every accepted write is stamped with the file's next
//! sequence number, sequence numbers are monotonic and never reused, and a
//! rollback of uncommitted work does not wind the counter back.
//!
//! Writes buffer in the handle until [KvStore::commit] makes them durable
//! and visible atomically; [KvStore::rollback] discards them, and with an
//! older target sequence also truncates committed state. Deletion writes a
//! tombstone; a tombstoned key reads as KeyNotFound while still shadowing
//! older committed versions during iteration.
//!
//! [Alog] is the in-crate implementation.

use std::{ffi, ops::Bound};

use crate::Result;

mod alog;

pub use alog::Alog;

/// Which view of the store a read observes.
///
/// A handle buffering transaction writes reads its own buffered state with
/// [Access::Uncommitted]; every other reader sees the last committed state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Access {
    Committed,
    Uncommitted,
}

/// Encryption algorithms a store may support.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Algorithm {
    None,
    Aes256,
}

/// Encryption key handed to [KvStore::open] and [KvStore::rekey].
#[derive(Clone, Copy)]
pub struct EncryptionKey {
    pub algorithm: Algorithm,
    pub bytes: [u8; 32],
}

impl EncryptionKey {
    pub fn new(algorithm: Algorithm, bytes: [u8; 32]) -> EncryptionKey {
        EncryptionKey { algorithm, bytes }
    }
}

/// Flags for opening a store file.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenFlags {
    /// Create the file if it does not exist.
    pub create: bool,
    /// Open the file read-only; mutating calls fail ReadOnlyViolation.
    pub read_only: bool,
    /// Rewrite the file when stale records pass a threshold.
    pub auto_compact: bool,
}

impl OpenFlags {
    pub fn set_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn set_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn set_auto_compact(mut self, auto_compact: bool) -> Self {
        self.auto_compact = auto_compact;
        self
    }
}

/// A single keyed record within a named keyspace.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Record {
    pub store: String,
    pub key: Vec<u8>,
    pub meta: Vec<u8>,
    /// None when the record was loaded meta-only.
    pub body: Option<Vec<u8>>,
    pub seqno: u64,
    pub deleted: bool,
}

impl Record {
    /// A record that carries nothing, the synthetic shape handed out for
    /// keys that turned out to be absent.
    pub fn empty(store: &str, key: &[u8]) -> Record {
        Record {
            store: store.to_string(),
            key: key.to_vec(),
            ..Record::default()
        }
    }

    /// Whether this record carries any content at all.
    pub fn is_empty(&self) -> bool {
        self.meta.is_empty() && self.body.as_ref().map(|b| b.is_empty()).unwrap_or(true)
    }
}

/// Options for range and sequence iteration.
#[derive(Clone, Copy, Debug, Default)]
pub struct IterOptions {
    /// Leave record bodies unloaded.
    pub meta_only: bool,
    /// Drop tombstones from the stream.
    pub skip_deletes: bool,
    /// Yield records in reverse order.
    pub reverse: bool,
}

impl IterOptions {
    pub fn set_meta_only(mut self, meta_only: bool) -> Self {
        self.meta_only = meta_only;
        self
    }

    pub fn set_skip_deletes(mut self, skip_deletes: bool) -> Self {
        self.skip_deletes = skip_deletes;
        self
    }

    pub fn set_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }
}

/// Ordered cursor over records selected by an iteration call.
///
/// Implementations materialize the matching records when the iterator is
/// constructed; the cursor itself cannot fail.
pub struct Iter {
    records: Vec<Record>,
    cursor: usize,
}

impl Iter {
    pub(crate) fn new(records: Vec<Record>) -> Iter {
        Iter { records, cursor: 0 }
    }

    /// Position the cursor at the first record whose key is `>= key` in
    /// the iterator's order. Return false when no such record remains.
    pub fn seek(&mut self, key: &[u8]) -> bool {
        match self.records.iter().position(|r| r.key.as_slice() >= key) {
            Some(pos) => {
                self.cursor = pos;
                true
            }
            None => {
                self.cursor = self.records.len();
                false
            }
        }
    }
}

impl Iterator for Iter {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        match self.records.get(self.cursor) {
            Some(record) => {
                self.cursor += 1;
                Some(record.clone())
            }
            None => None,
        }
    }
}

/// The backing store contract.
///
/// One writer at a time per file; callers serialize writes through the
/// database transaction slot. Reads state which view they want: the
/// transaction owner passes [Access::Uncommitted] to observe its buffered
/// writes, everyone else reads the committed state.
pub trait KvStore: Sized {
    /// Open or create the file at `path`.
    fn open(
        path: &ffi::OsStr,
        flags: OpenFlags,
        key: Option<EncryptionKey>,
    ) -> Result<Self>;

    /// Release the handle. Buffered writes are discarded.
    fn close(self) -> Result<()>;

    /// Remove the file at `path`. Missing files are not an error.
    fn destroy(path: &ffi::OsStr) -> Result<()>;

    /// Record under (`store`, `key`), body included. Tombstoned and missing
    /// keys fail KeyNotFound.
    fn get(&self, store: &str, key: &[u8], access: Access) -> Result<Record>;

    /// Like [KvStore::get], body left unloaded.
    fn get_meta(&self, store: &str, key: &[u8], access: Access) -> Result<Record>;

    /// Record that was assigned `seqno`, if it is still the live version
    /// of its key. Tombstones are returned, the caller decides.
    fn get_by_seqno(&self, seqno: u64, access: Access) -> Result<Record>;

    /// Records of `store` within the key range, in key order.
    fn iter(
        &self,
        store: &str,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
        opts: IterOptions,
        access: Access,
    ) -> Result<Iter>;

    /// Records of `store` within the sequence range, in sequence order.
    fn iter_seqnos(
        &self,
        store: &str,
        start: Bound<u64>,
        end: Bound<u64>,
        opts: IterOptions,
        access: Access,
    ) -> Result<Iter>;

    /// Buffer a write; returns the assigned sequence number.
    fn set(&mut self, store: &str, key: &[u8], meta: &[u8], body: &[u8]) -> Result<u64>;

    /// Buffer a tombstone; returns the assigned sequence number.
    fn delete(&mut self, store: &str, key: &[u8]) -> Result<u64>;

    /// Make buffered writes durable and visible, atomically.
    fn commit(&mut self) -> Result<()>;

    /// Discard buffered writes newer than `to_seqno`; a target older than
    /// the committed state also truncates committed records.
    fn rollback(&mut self, to_seqno: u64) -> Result<()>;

    /// Read-only view of committed state at `at_seqno`.
    fn snapshot(&self, at_seqno: u64) -> Result<Self>;

    /// Highest sequence number: allocated for [Access::Uncommitted],
    /// committed otherwise.
    fn last_seqno(&self, access: Access) -> u64;

    /// Number of live, non-tombstoned records in `store`.
    fn n_records(&self, store: &str, access: Access) -> u64;

    /// Rewrite the file keeping only live records. With `new_path` the
    /// rewritten file lands there, otherwise it replaces the original.
    fn compact(&mut self, new_path: Option<&ffi::OsStr>) -> Result<()>;

    /// Re-encrypt the file under `key`. The rewrite hook for encrypting
    /// stores; see the implementation for supported algorithms.
    fn rekey(&mut self, key: Option<EncryptionKey>) -> Result<()>;
}
