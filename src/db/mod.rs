//! Module implement the database handle: transactions, raw documents and
//! versioned-document persistence.
//!
//! All handles opened on one path share a single backing store through a
//! process-wide registry, so every handle observes the same committed
//! state. The registry entry also carries the file's transaction slot: one
//! transaction at a time per file, across all handles and threads.
//! [Database::begin_transaction] blocks until the slot frees; everything
//! else is non-blocking apart from I/O.
//!
//! Raw documents are plain (meta, body) records in a named store, used for
//! database metadata (`"info"`) and client-local documents (`"_local"`).
//! Versioned documents live in their own keyspace and go through
//! [crate::doc::Doc].

use lazy_static::lazy_static;
use log::{debug, info};

use std::{
    collections::HashMap,
    ffi,
    ops::Bound,
    sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    doc::Doc,
    store::{Access, Algorithm, Alog, EncryptionKey, IterOptions, KvStore, OpenFlags},
    Error, Result,
};

mod enumerate;

pub use enumerate::{DocEnumerator, EnumOptions};

/// Store holding per-database metadata records.
pub const INFO_STORE: &str = "info";
/// Store holding client-local documents, never replicated.
pub const LOCAL_STORE: &str = "_local";
// Keyspace of the versioned documents themselves.
pub(crate) const DOC_STORE: &str = "docs";

/// Revision-tree depth a save prunes to when the caller does not care.
pub const DEFAULT_MAX_REV_TREE_DEPTH: usize = 20;

// Per-path shared state: the backing store and the transaction slot.
struct FileSlot {
    store: RwLock<Alog>,
    // true while some handle's transaction owns the file.
    busy: Mutex<bool>,
    cond: Condvar,
}

lazy_static! {
    // Process-wide path -> file-slot registry. Entries retire when the
    // last handle on a path drops.
    static ref REGISTRY: Mutex<HashMap<ffi::OsString, Arc<FileSlot>>> =
        Mutex::new(HashMap::new());
}

struct TxnState {
    level: usize,
    begin_seqno: u64,
    wrote: bool,
    aborted: bool,
}

/// Handle to a document database file.
///
/// Handles are cheap: every handle on the same path shares one backing
/// store. Reads outside a transaction observe the last committed state;
/// the handle owning the active transaction additionally observes its own
/// buffered writes.
pub struct Database {
    path: ffi::OsString,
    flags: OpenFlags,
    key: Option<EncryptionKey>,
    slot: Arc<FileSlot>,
    txn: Option<TxnState>,
}

impl Database {
    /// Open the database at `path`. With `flags.create` a missing file is
    /// created; with `flags.read_only` this handle rejects writes.
    pub fn open(
        path: &ffi::OsStr,
        flags: OpenFlags,
        key: Option<EncryptionKey>,
    ) -> Result<Database> {
        if key.map(|k| k.algorithm != Algorithm::None).unwrap_or(false) {
            return err_at!(UnsupportedAlgorithm, msg: "store implements algorithm none only");
        }

        let slot = Self::slot_for(path, flags, key)?;
        info!(target: "revdb", "open {:?}", path);
        Ok(Database { path: path.to_os_string(), flags, key, slot, txn: None })
    }

    fn slot_for(
        path: &ffi::OsStr,
        flags: OpenFlags,
        key: Option<EncryptionKey>,
    ) -> Result<Arc<FileSlot>> {
        let mut registry = match REGISTRY.lock() {
            Ok(registry) => registry,
            Err(_) => return err_at!(Fatal, msg: "registry poisoned"),
        };
        match registry.get(path) {
            Some(slot) => {
                let slot = Arc::clone(slot);
                if !flags.read_only {
                    let mut kv = write_guard(&slot.store)?;
                    if kv.is_read_only() {
                        kv.upgrade_writable()?;
                    }
                }
                Ok(slot)
            }
            None => {
                let kv = Alog::open(path, flags, key)?;
                let slot = Arc::new(FileSlot {
                    store: RwLock::new(kv),
                    busy: Mutex::new(false),
                    cond: Condvar::new(),
                });
                registry.insert(path.to_os_string(), Arc::clone(&slot));
                Ok(slot)
            }
        }
    }

    pub fn path(&self) -> &ffi::OsStr {
        &self.path
    }

    /// Release this handle. Equivalent to dropping it.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    /// Close this handle and remove the database file. Blocks until an
    /// ongoing transaction by another handle finishes. Other handles on
    /// the path are left serving the detached, now-unlinked state.
    pub fn delete_database(self) -> Result<()> {
        if self.txn.is_some() {
            return err_at!(TransactionBusy, msg: "delete inside a transaction");
        }
        self.check_writable()?;
        self.acquire_slot()?;
        let res = Alog::destroy(&self.path);
        if let Ok(mut registry) = REGISTRY.lock() {
            registry.remove(&self.path);
        }
        self.release_slot();
        res
    }

    /// Number of live, undeleted documents. Scans document metadata.
    pub fn n_documents(&self) -> Result<u64> {
        let opts = IterOptions::default().set_meta_only(true).set_skip_deletes(true);
        let iter = {
            let kv = self.store_read()?;
            kv.iter(DOC_STORE, Bound::Unbounded, Bound::Unbounded, opts, self.access())?
        };
        let mut count = 0;
        for record in iter {
            let doc = Doc::from_record(&record)?;
            if !doc.is_deleted() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Latest sequence number allocated to a persisted write.
    pub fn last_seqno(&self) -> Result<u64> {
        Ok(self.store_read()?.last_seqno(self.access()))
    }

    // ------ transactions

    /// Take the file's transaction slot, blocking while another handle
    /// holds it. Nested calls from the same handle are counted and only
    /// the outermost [Database::end_transaction] commits or rolls back.
    pub fn begin_transaction(&mut self) -> Result<()> {
        self.check_writable()?;
        if let Some(txn) = &mut self.txn {
            txn.level += 1;
            return Ok(());
        }

        self.acquire_slot()?;
        let begin_seqno = self.store_read()?.last_seqno(Access::Committed);
        debug!(target: "revdb", "begin-transaction {:?} at {}", self.path, begin_seqno);
        self.txn = Some(TxnState { level: 1, begin_seqno, wrote: false, aborted: false });
        Ok(())
    }

    /// End the innermost [Database::begin_transaction] pairing. The
    /// outermost end commits when `commit` is set, at least one write
    /// succeeded and none failed; otherwise it rolls back to the sequence
    /// recorded at begin.
    pub fn end_transaction(&mut self, commit: bool) -> Result<()> {
        match &mut self.txn {
            None => return err_at!(NotInTransaction, msg: "end-transaction"),
            Some(txn) if txn.level > 1 => {
                txn.level -= 1;
                return Ok(());
            }
            Some(_) => (),
        }
        let txn = match self.txn.take() {
            Some(txn) => txn,
            None => return err_at!(Fatal, msg: "unreachable"),
        };

        let res = (|| {
            let mut kv = self.store_write()?;
            if commit && txn.wrote && !txn.aborted {
                match kv.commit() {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        // a failed commit must not leave buffered writes.
                        kv.rollback(txn.begin_seqno).ok();
                        Err(err)
                    }
                }
            } else {
                kv.rollback(txn.begin_seqno)
            }
        })();
        debug!(
            target: "revdb",
            "end-transaction {:?} commit:{} ok:{}", self.path, commit, res.is_ok()
        );

        self.release_slot();
        res
    }

    pub fn is_in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Within the active transaction, truncate the file back to `seqno`:
    /// buffered writes newer than `seqno` are discarded, committed state
    /// newer than `seqno` is rewritten away durably.
    pub fn rollback_to(&mut self, seqno: u64) -> Result<()> {
        match &self.txn {
            None => return err_at!(NotInTransaction, msg: "rollback_to"),
            Some(txn) if txn.aborted => return err_at!(TransactionAborted, msg: "rollback_to"),
            Some(_) => (),
        }
        let res = self.store_write()?.rollback(seqno);
        match (&res, &mut self.txn) {
            (Ok(_), Some(txn)) => txn.begin_seqno = txn.begin_seqno.min(seqno),
            (Err(_), Some(txn)) => txn.aborted = true,
            _ => (),
        }
        res
    }

    // ------ whole-file operations

    /// Rewrite the file dropping stale records. Takes the file
    /// exclusively; fails TransactionBusy inside a transaction.
    pub fn compact(&mut self) -> Result<()> {
        self.exclusively(|kv| kv.compact(None))
    }

    /// Re-encrypt the file under `key`, the abstract rekey hook. Takes
    /// the file exclusively.
    pub fn rekey(&mut self, key: Option<EncryptionKey>) -> Result<()> {
        let res = self.exclusively(|kv| kv.rekey(key));
        if res.is_ok() {
            self.key = key;
        }
        res
    }

    /// Delete the file and start over empty with the same configuration.
    /// Takes the file exclusively.
    pub fn erase(&mut self) -> Result<()> {
        let (path, flags, key) = (self.path.clone(), self.flags, self.key);
        self.exclusively(move |kv| {
            Alog::destroy(&path)?;
            *kv = Alog::open(&path, flags.set_create(true), key)?;
            Ok(())
        })
    }

    fn exclusively<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Alog) -> Result<()>,
    {
        if self.txn.is_some() {
            return err_at!(TransactionBusy, msg: "file is transaction-locked by this handle");
        }
        self.check_writable()?;
        self.acquire_slot()?;
        let res = match self.store_write() {
            Ok(mut kv) => f(&mut kv),
            Err(err) => Err(err),
        };
        self.release_slot();
        res
    }

    // ------ raw documents

    /// Fetch a raw document from the named store. Absent keys are None,
    /// not an error.
    pub fn raw_get(&self, store: &str, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let res = self.store_read()?.get(store, key, self.access());
        match res {
            Ok(record) => Ok(Some((record.meta, record.body.unwrap_or_default()))),
            Err(Error::KeyNotFound(_, _)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Write a raw document, or delete it when both `meta` and `body` are
    /// empty. Must run inside a transaction.
    pub fn raw_put(&mut self, store: &str, key: &[u8], meta: &[u8], body: &[u8]) -> Result<()> {
        let store = store.to_string();
        self.txn_write(|kv| {
            if meta.is_empty() && body.is_empty() {
                kv.delete(&store, key)
            } else {
                kv.set(&store, key, meta, body)
            }
        })?;
        Ok(())
    }

    // ------ versioned documents

    /// Load the document `id`. A missing id fails KeyNotFound when
    /// `must_exist`, otherwise an empty handle is returned, to be
    /// populated and saved. The current revision is selected.
    pub fn get_doc(&self, id: &[u8], must_exist: bool) -> Result<Doc> {
        let res = self.store_read()?.get(DOC_STORE, id, self.access());
        match res {
            Ok(record) => Doc::from_record(&record),
            Err(Error::KeyNotFound(p, m)) => {
                if must_exist {
                    Err(Error::KeyNotFound(p, m))
                } else {
                    Ok(Doc::new(id))
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Load the document persisted at `seqno`.
    pub fn get_doc_by_seqno(&self, seqno: u64) -> Result<Doc> {
        let record = self.store_read()?.get_by_seqno(seqno, self.access())?;
        if record.store != DOC_STORE || record.deleted || record.is_empty() {
            return err_at!(KeyNotFound, msg: "no document at seqno {}", seqno);
        }
        Doc::from_record(&record)
    }

    /// Persist `doc`: prune its tree to `max_depth` (0 picks
    /// [DEFAULT_MAX_REV_TREE_DEPTH]), re-derive document flags, write the
    /// record and stamp the new revisions with the assigned sequence
    /// number. A document emptied by purging has its record removed
    /// instead. Must run inside a transaction.
    pub fn save_doc(&mut self, doc: &mut Doc, max_depth: usize) -> Result<()> {
        if self.txn.is_none() {
            return err_at!(NotInTransaction, msg: "save {:?}", doc.id());
        }
        let depth = if max_depth == 0 { DEFAULT_MAX_REV_TREE_DEPTH } else { max_depth };
        doc.prune(depth);

        if doc.tree().is_empty() {
            // purged down to nothing: remove every trace of the record.
            let id = doc.id.clone();
            let on_disk = {
                let res = self.store_read()?.get_meta(DOC_STORE, &id, self.access());
                match res {
                    Ok(_) => true,
                    Err(Error::KeyNotFound(_, _)) => false,
                    Err(err) => return Err(err),
                }
            };
            if on_disk {
                let seqno = self.txn_write(|kv| kv.delete(DOC_STORE, &id))?;
                doc.seqno = seqno;
            }
            doc.flags = 0;
            return Ok(());
        }

        if doc.needs_bodies() {
            let record = self.store_read()?.get(DOC_STORE, doc.id(), self.access())?;
            doc.fill_bodies(&record.body.unwrap_or_default())?;
        }

        doc.update_flags();
        let (meta, body) = doc.to_meta_body()?;
        let id = doc.id.clone();
        let seqno = self.txn_write(|kv| kv.set(DOC_STORE, &id, &meta, &body))?;
        doc.mark_saved(seqno);
        Ok(())
    }

    /// Fill the body of the document's selected revision if it was loaded
    /// meta-only. Ok(false) when the revision has no body on record.
    pub fn load_revision_body(&self, doc: &mut Doc) -> Result<bool> {
        match doc.selected_rev() {
            None => return Ok(false),
            Some(rev) if rev.body().is_some() => return Ok(true),
            Some(_) if !doc.has_revision_body() => return Ok(false),
            Some(_) => (),
        }
        let record = self.store_read()?.get(DOC_STORE, doc.id(), self.access())?;
        doc.fill_bodies(&record.body.unwrap_or_default())?;
        Ok(doc.selected_rev().map(|rev| rev.body().is_some()).unwrap_or(false))
    }

    /// Remove all trace of document `id` and its revisions. Must run
    /// inside a transaction.
    pub fn purge_doc(&mut self, id: &[u8]) -> Result<()> {
        self.txn_write(|kv| kv.delete(DOC_STORE, id))?;
        Ok(())
    }

    // ------ internals

    // Route one store write through the transaction state machine: no
    // transaction refuses, a previous failure short-circuits, and a fresh
    // failure poisons the transaction for its remaining writes.
    fn txn_write<F>(&mut self, f: F) -> Result<u64>
    where
        F: FnOnce(&mut Alog) -> Result<u64>,
    {
        match &self.txn {
            None => return err_at!(NotInTransaction, msg: "write"),
            Some(txn) if txn.aborted => return err_at!(TransactionAborted, msg: "write"),
            Some(_) => (),
        }
        let res = match self.store_write() {
            Ok(mut kv) => f(&mut kv),
            Err(err) => Err(err),
        };
        match (&res, &mut self.txn) {
            (Ok(_), Some(txn)) => txn.wrote = true,
            (Err(_), Some(txn)) => txn.aborted = true,
            _ => (),
        }
        res
    }

    pub(crate) fn access(&self) -> Access {
        if self.txn.is_some() {
            Access::Uncommitted
        } else {
            Access::Committed
        }
    }

    pub(crate) fn store_read(&self) -> Result<RwLockReadGuard<'_, Alog>> {
        read_guard(&self.slot.store)
    }

    fn store_write(&self) -> Result<RwLockWriteGuard<'_, Alog>> {
        write_guard(&self.slot.store)
    }

    fn check_writable(&self) -> Result<()> {
        if self.flags.read_only {
            err_at!(ReadOnlyViolation, msg: "{:?}", self.path)
        } else {
            Ok(())
        }
    }

    fn acquire_slot(&self) -> Result<()> {
        let mut busy = mutex_guard(&self.slot.busy)?;
        while *busy {
            busy = match self.slot.cond.wait(busy) {
                Ok(guard) => guard,
                Err(_) => return err_at!(Fatal, msg: "transaction slot poisoned"),
            };
        }
        *busy = true;
        Ok(())
    }

    fn release_slot(&self) {
        if let Ok(mut busy) = self.slot.busy.lock() {
            *busy = false;
            self.slot.cond.notify_one();
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // an open transaction aborts with its handle.
        let open_txn = match &mut self.txn {
            Some(txn) => {
                txn.level = 1;
                true
            }
            None => false,
        };
        if open_txn {
            self.end_transaction(false).ok();
        }
        // retire the registry entry along with the last handle: two
        // references left means the map and this handle.
        if let Ok(mut registry) = REGISTRY.lock() {
            if Arc::strong_count(&self.slot) == 2 {
                registry.remove(&self.path);
            }
        }
    }
}

fn mutex_guard<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    match mutex.lock() {
        Ok(guard) => Ok(guard),
        Err(_) => err_at!(Fatal, msg: "mutex poisoned"),
    }
}

fn read_guard<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    match lock.read() {
        Ok(guard) => Ok(guard),
        Err(_) => err_at!(Fatal, msg: "rwlock poisoned"),
    }
}

fn write_guard<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    match lock.write() {
        Ok(guard) => Ok(guard),
        Err(_) => err_at!(Fatal, msg: "rwlock poisoned"),
    }
}
