//! Append-only-log store, the in-crate [KvStore] implementation.
//!
//! One file holds a header frame followed by commit batches. Each frame is
//! length-prefixed CBOR guarded by a crc32; a torn or corrupt tail is
//! detected on load and truncated away, so a crash between frames costs at
//! most the uncommitted batch. The full record set lives in memory; the
//! file is replayed into the index on open.

use cbordata::Cborize;
use fs2::FileExt;
use log::{debug, info, warn};

use std::{
    collections::BTreeMap,
    ffi, fs,
    io::{Read, Seek, SeekFrom},
    mem,
    ops::Bound,
    path,
};

use crate::{
    store::{Access, Algorithm, EncryptionKey, Iter, IterOptions, KvStore, OpenFlags, Record},
    util, Error, Result,
};

const HEAD_VER: u32 = 0x0001_0001;
const BATCH_VER: u32 = 0x0001_0001;
const ENTRY_VER: u32 = 0x0001_0001;

const MAGIC: &[u8; 10] = b"revdb/alog";

// Frames larger than this are treated as corruption, not allocation hints.
const FRAME_LIMIT: usize = 1024 * 1024 * 1024;

// With auto_compact, rewrite once this many records went stale.
const AUTO_COMPACT_STALE: usize = 1024;

#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
struct Head {
    magic: Vec<u8>,
    version: u64,
    // Algorithm encrypting the payload frames, 0 = none, 1 = aes256.
    algorithm: u64,
}

impl Head {
    const ID: u32 = HEAD_VER;

    fn new(algorithm: Algorithm) -> Head {
        let algorithm = match algorithm {
            Algorithm::None => 0,
            Algorithm::Aes256 => 1,
        };
        Head { magic: MAGIC.to_vec(), version: u64::from(HEAD_VER), algorithm }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
struct LogEntry {
    store: String,
    key: Vec<u8>,
    meta: Vec<u8>,
    body: Vec<u8>,
    seqno: u64,
    deleted: bool,
}

impl LogEntry {
    const ID: u32 = ENTRY_VER;

    fn from_record(record: &Record) -> LogEntry {
        LogEntry {
            store: record.store.clone(),
            key: record.key.clone(),
            meta: record.meta.clone(),
            body: record.body.clone().unwrap_or_default(),
            seqno: record.seqno,
            deleted: record.deleted,
        }
    }

    fn into_record(self) -> Record {
        Record {
            store: self.store,
            key: self.key,
            meta: self.meta,
            body: Some(self.body),
            seqno: self.seqno,
            deleted: self.deleted,
        }
    }
}

// One committed transaction; a batch frame is the commit point.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
struct Batch {
    first_seqno: u64,
    last_seqno: u64,
    entries: Vec<LogEntry>,
}

impl Batch {
    const ID: u32 = BATCH_VER;
}

type IndexKey = (String, Vec<u8>);
type Index = BTreeMap<IndexKey, Record>;
type SeqIndex = BTreeMap<u64, IndexKey>;

/// Append-only-log backing store. Refer to [KvStore] for the contract and
/// the module documentation for the file layout.
#[derive(Debug)]
pub struct Alog {
    path: ffi::OsString,
    flags: OpenFlags,
    // Write/read handle on the log; None for snapshots.
    file: Option<fs::File>,
    // Committed state, latest record per key, tombstones included.
    index: Index,
    byseq: SeqIndex,
    // Uncommitted writes, visible only to this handle.
    overlay: Index,
    overlay_byseq: SeqIndex,
    // Highest allocated seqno, never winds back within a handle.
    seqno: u64,
    committed_seqno: u64,
    // Bytes of the file replayed into `index`.
    file_off: u64,
    n_stale: usize,
    is_snapshot: bool,
}

impl KvStore for Alog {
    fn open(
        path: &ffi::OsStr,
        flags: OpenFlags,
        key: Option<EncryptionKey>,
    ) -> Result<Alog> {
        let want_algo = key.map(|k| k.algorithm).unwrap_or(Algorithm::None);

        let os_path = path::Path::new(path);
        let exists = os_path.is_file();
        if !exists && (!flags.create || flags.read_only) {
            return err_at!(InvalidFile, msg: "no file at {:?}", path);
        }

        let mut file = {
            let mut opts = fs::OpenOptions::new();
            opts.read(true);
            if !flags.read_only {
                opts.append(true).create(flags.create);
            }
            err_at!(IOError, opts.open(os_path), "open {:?}", path)?
        };
        let locked = if flags.read_only {
            fs2::FileExt::try_lock_shared(&file)
        } else {
            fs2::FileExt::try_lock_exclusive(&file)
        };
        err_at!(IOError, locked, "lock {:?}", path)?;

        let file_len = err_at!(IOError, file.metadata())?.len();

        let mut val = Alog {
            path: path.to_os_string(),
            flags,
            file: None,
            index: Index::default(),
            byseq: SeqIndex::default(),
            overlay: Index::default(),
            overlay_byseq: SeqIndex::default(),
            seqno: 0,
            committed_seqno: 0,
            file_off: 0,
            n_stale: 0,
            is_snapshot: false,
        };

        if file_len == 0 {
            // Fresh file. Encryption is not implemented by this store, the
            // header records algorithm none or the open fails.
            if want_algo != Algorithm::None {
                return err_at!(UnsupportedAlgorithm, msg: "{:?}", want_algo);
            }
            let data = util::into_cbor_bytes(Head::new(Algorithm::None))?;
            val.file_off = write_frame(&mut file, &data)? as u64;
        } else {
            err_at!(IOError, file.seek(SeekFrom::Start(0)))?;
            let head = match read_frame(&mut file)? {
                Some(data) => util::from_cbor_bytes::<Head>(&data)?.0,
                None => return err_at!(InvalidFile, msg: "missing header {:?}", path),
            };
            if head.magic != MAGIC.to_vec() || head.version != u64::from(HEAD_VER) {
                return err_at!(InvalidFile, msg: "bad header {:?}", path);
            }
            let file_algo = match head.algorithm {
                0 => Algorithm::None,
                _ => Algorithm::Aes256,
            };
            if file_algo != want_algo {
                return err_at!(WrongKey, msg: "file {:?} key {:?}", file_algo, want_algo);
            }
            if file_algo != Algorithm::None {
                return err_at!(UnsupportedAlgorithm, msg: "{:?}", file_algo);
            }
            val.file_off = err_at!(IOError, file.seek(SeekFrom::Current(0)))?;

            let (consumed, high_seqno) = replay(
                &mut file,
                None,
                &mut val.index,
                &mut val.byseq,
                &mut val.n_stale,
            )?;
            val.file_off += consumed;
            val.seqno = high_seqno;
            val.committed_seqno = high_seqno;

            if val.file_off < file_len && !flags.read_only {
                warn!(
                    target: "alog",
                    "truncating torn tail of {:?}, {} of {} bytes",
                    path, val.file_off, file_len
                );
                err_at!(IOError, file.set_len(val.file_off))?;
            }
        }

        info!(
            target: "alog",
            "open {:?} seqno:{} records:{}", path, val.seqno, val.index.len()
        );

        val.file = Some(file);
        Ok(val)
    }

    fn close(self) -> Result<()> {
        // advisory lock is released when the handle drops.
        Ok(())
    }

    fn destroy(path: &ffi::OsStr) -> Result<()> {
        match fs::remove_file(path) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => err_at!(IOError, Err(err), "remove {:?}", path),
        }
    }

    fn get(&self, store: &str, key: &[u8], access: Access) -> Result<Record> {
        let ikey = (store.to_string(), key.to_vec());
        match self.lookup(&ikey, access) {
            Some(record) if !record.deleted => Ok(record.clone()),
            _ => err_at!(KeyNotFound, msg: "{} {:?}", store, key),
        }
    }

    fn get_meta(&self, store: &str, key: &[u8], access: Access) -> Result<Record> {
        let mut record = self.get(store, key, access)?;
        record.body = None;
        Ok(record)
    }

    fn get_by_seqno(&self, seqno: u64, access: Access) -> Result<Record> {
        let ikey = match access {
            Access::Uncommitted => self
                .overlay_byseq
                .get(&seqno)
                .or_else(|| self.byseq.get(&seqno)),
            Access::Committed => self.byseq.get(&seqno),
        };
        let record = ikey.and_then(|ikey| self.lookup(ikey, access));
        match record {
            Some(record) if record.seqno == seqno => Ok(record.clone()),
            _ => err_at!(KeyNotFound, msg: "seqno {}", seqno),
        }
    }

    fn iter(
        &self,
        store: &str,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
        opts: IterOptions,
        access: Access,
    ) -> Result<Iter> {
        let merged = self.merged_range(store, &start, &end, access);
        Ok(self.make_iter(merged.into_iter().map(|(_, r)| r).collect(), opts))
    }

    fn iter_seqnos(
        &self,
        store: &str,
        start: Bound<u64>,
        end: Bound<u64>,
        opts: IterOptions,
        access: Access,
    ) -> Result<Iter> {
        let committed = self.byseq.range((start, end));
        let seqnos: Vec<(u64, IndexKey)> = match access {
            Access::Uncommitted => committed
                .chain(self.overlay_byseq.range((start, end)))
                .map(|(s, k)| (*s, k.clone()))
                .collect(),
            Access::Committed => committed.map(|(s, k)| (*s, k.clone())).collect(),
        };

        let mut records: Vec<Record> = vec![];
        for (seqno, ikey) in seqnos.iter() {
            if ikey.0 != store {
                continue;
            }
            match self.lookup(ikey, access) {
                // a mismatch means the key was rewritten at a later seqno,
                // that version shadowing this one.
                Some(record) if record.seqno == *seqno => records.push(record.clone()),
                _ => (),
            }
        }
        records.sort_by_key(|r| r.seqno);
        Ok(self.make_iter(records, opts))
    }

    fn set(&mut self, store: &str, key: &[u8], meta: &[u8], body: &[u8]) -> Result<u64> {
        self.check_writable()?;
        self.seqno += 1;
        let record = Record {
            store: store.to_string(),
            key: key.to_vec(),
            meta: meta.to_vec(),
            body: Some(body.to_vec()),
            seqno: self.seqno,
            deleted: false,
        };
        self.push_overlay(record);
        Ok(self.seqno)
    }

    fn delete(&mut self, store: &str, key: &[u8]) -> Result<u64> {
        self.check_writable()?;
        self.seqno += 1;
        let record = Record {
            store: store.to_string(),
            key: key.to_vec(),
            meta: Vec::default(),
            body: Some(Vec::default()),
            seqno: self.seqno,
            deleted: true,
        };
        self.push_overlay(record);
        Ok(self.seqno)
    }

    fn commit(&mut self) -> Result<()> {
        self.check_writable()?;
        if self.overlay.is_empty() {
            return Ok(());
        }

        let mut entries: Vec<LogEntry> =
            self.overlay.values().map(LogEntry::from_record).collect();
        entries.sort_by_key(|e| e.seqno);
        let batch = Batch {
            first_seqno: entries.first().map(|e| e.seqno).unwrap_or(0),
            last_seqno: entries.last().map(|e| e.seqno).unwrap_or(0),
            entries,
        };
        debug!(target: "alog", "commit {:?} {}..={}", self.path, batch.first_seqno, batch.last_seqno);

        let data = util::into_cbor_bytes(batch)?;
        let file = match self.file.as_mut() {
            Some(file) => file,
            None => return err_at!(Fatal, msg: "no file handle"),
        };
        self.file_off += write_frame(file, &data)? as u64;

        for (ikey, record) in mem::take(&mut self.overlay) {
            if let Some(old) = self.index.insert(ikey, record) {
                self.byseq.remove(&old.seqno);
                self.n_stale += 1;
            }
        }
        for (seqno, ikey) in mem::take(&mut self.overlay_byseq) {
            self.byseq.insert(seqno, ikey);
        }
        self.committed_seqno = self.seqno;

        if self.flags.auto_compact && self.n_stale >= AUTO_COMPACT_STALE {
            self.compact(None)?;
        }
        Ok(())
    }

    fn rollback(&mut self, to_seqno: u64) -> Result<()> {
        self.check_writable()?;

        let dropped: Vec<(u64, IndexKey)> = self
            .overlay_byseq
            .range((Bound::Excluded(to_seqno), Bound::Unbounded))
            .map(|(seqno, ikey)| (*seqno, ikey.clone()))
            .collect();
        for (seqno, ikey) in dropped {
            self.overlay.remove(&ikey);
            self.overlay_byseq.remove(&seqno);
        }

        if to_seqno < self.committed_seqno {
            // truncate committed state to the target and rewrite the file.
            let mut index = Index::default();
            let mut byseq = SeqIndex::default();
            let mut n_stale = 0;
            {
                let mut file = err_at!(
                    IOError,
                    fs::OpenOptions::new().read(true).open(path::Path::new(&self.path))
                )?;
                err_at!(IOError, file.seek(SeekFrom::Start(0)))?;
                read_frame(&mut file)?; // skip header
                replay(&mut file, Some(to_seqno), &mut index, &mut byseq, &mut n_stale)?;
            }
            self.index = index;
            self.byseq = byseq;
            self.committed_seqno = to_seqno;
            self.rewrite(None)?;
        }
        Ok(())
    }

    fn snapshot(&self, at_seqno: u64) -> Result<Alog> {
        if at_seqno > self.committed_seqno {
            return err_at!(Fatal, msg: "snapshot at {} beyond {}", at_seqno, self.committed_seqno);
        }
        let (index, byseq) = if at_seqno == self.committed_seqno {
            (self.index.clone(), self.byseq.clone())
        } else {
            let mut index = Index::default();
            let mut byseq = SeqIndex::default();
            let mut n_stale = 0;
            let mut file = err_at!(
                IOError,
                fs::OpenOptions::new().read(true).open(path::Path::new(&self.path))
            )?;
            read_frame(&mut file)?; // skip header
            replay(&mut file, Some(at_seqno), &mut index, &mut byseq, &mut n_stale)?;
            (index, byseq)
        };
        Ok(Alog {
            path: self.path.clone(),
            flags: self.flags.set_read_only(true),
            file: None,
            index,
            byseq,
            overlay: Index::default(),
            overlay_byseq: SeqIndex::default(),
            seqno: at_seqno,
            committed_seqno: at_seqno,
            file_off: 0,
            n_stale: 0,
            is_snapshot: true,
        })
    }

    fn last_seqno(&self, access: Access) -> u64 {
        match access {
            Access::Uncommitted => self.seqno,
            Access::Committed => self.committed_seqno,
        }
    }

    fn n_records(&self, store: &str, access: Access) -> u64 {
        let merged = self.merged_range(store, &Bound::Unbounded, &Bound::Unbounded, access);
        merged.values().filter(|r| !r.deleted).count() as u64
    }

    fn compact(&mut self, new_path: Option<&ffi::OsStr>) -> Result<()> {
        self.check_writable()?;
        if !self.overlay.is_empty() {
            return err_at!(Fatal, msg: "compact with buffered writes");
        }
        self.rewrite(new_path)
    }

    fn rekey(&mut self, key: Option<EncryptionKey>) -> Result<()> {
        match key.map(|k| k.algorithm).unwrap_or(Algorithm::None) {
            // rewriting under no encryption is the only supported rekey.
            Algorithm::None => self.compact(None),
            algorithm => err_at!(UnsupportedAlgorithm, msg: "{:?}", algorithm),
        }
    }
}

impl Alog {
    /// Whether this handle rejects writes.
    pub fn is_read_only(&self) -> bool {
        self.flags.read_only || self.is_snapshot
    }

    /// Reopen a read-only handle writable, swapping its shared lock for
    /// an exclusive one. Batches appended by another process in the
    /// unlocked window are replayed before writes resume.
    pub fn upgrade_writable(&mut self) -> Result<()> {
        if self.is_snapshot {
            return err_at!(ReadOnlyViolation, msg: "snapshot cannot upgrade");
        }
        if !self.flags.read_only {
            return Ok(());
        }

        // the shared lock must go before the exclusive one can be taken.
        self.file = None;
        let mut file = {
            let mut opts = fs::OpenOptions::new();
            err_at!(
                IOError,
                opts.read(true).append(true).open(path::Path::new(&self.path))
            )?
        };
        err_at!(IOError, file.try_lock_exclusive(), "lock {:?}", self.path)?;

        let file_len = err_at!(IOError, file.metadata())?.len();
        if file_len > self.file_off {
            err_at!(IOError, file.seek(SeekFrom::Start(self.file_off)))?;
            let (consumed, high_seqno) = replay(
                &mut file,
                None,
                &mut self.index,
                &mut self.byseq,
                &mut self.n_stale,
            )?;
            self.file_off += consumed;
            self.seqno = self.seqno.max(high_seqno);
            self.committed_seqno = self.committed_seqno.max(high_seqno);
        }

        self.file = Some(file);
        self.flags.read_only = false;
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.flags.read_only || self.is_snapshot {
            err_at!(ReadOnlyViolation, msg: "{:?}", self.path)
        } else {
            Ok(())
        }
    }

    fn lookup(&self, ikey: &IndexKey, access: Access) -> Option<&Record> {
        match access {
            Access::Uncommitted => self.overlay.get(ikey).or_else(|| self.index.get(ikey)),
            Access::Committed => self.index.get(ikey),
        }
    }

    fn push_overlay(&mut self, record: Record) {
        let ikey = (record.store.clone(), record.key.clone());
        let seqno = record.seqno;
        if let Some(old) = self.overlay.insert(ikey.clone(), record) {
            self.overlay_byseq.remove(&old.seqno);
        }
        self.overlay_byseq.insert(seqno, ikey);
    }

    // Committed range for `store`, shadowed by the overlay for the
    // transaction owner's view.
    fn merged_range(
        &self,
        store: &str,
        start: &Bound<Vec<u8>>,
        end: &Bound<Vec<u8>>,
        access: Access,
    ) -> BTreeMap<Vec<u8>, Record> {
        let lo: Bound<IndexKey> = match start {
            Bound::Included(key) => Bound::Included((store.to_string(), key.clone())),
            Bound::Excluded(key) => Bound::Excluded((store.to_string(), key.clone())),
            Bound::Unbounded => Bound::Included((store.to_string(), Vec::default())),
        };
        let within_end = |key: &[u8]| match end {
            Bound::Included(end) => key <= end.as_slice(),
            Bound::Excluded(end) => key < end.as_slice(),
            Bound::Unbounded => true,
        };

        let sources: Vec<&Index> = match access {
            Access::Uncommitted => vec![&self.index, &self.overlay],
            Access::Committed => vec![&self.index],
        };
        let mut merged = BTreeMap::new();
        for source in sources {
            for ((s, key), record) in source.range((lo.clone(), Bound::Unbounded)) {
                if s != store {
                    break;
                }
                if !within_end(key) {
                    break;
                }
                merged.insert(key.clone(), record.clone());
            }
        }
        merged
    }

    fn make_iter(&self, mut records: Vec<Record>, opts: IterOptions) -> Iter {
        if opts.skip_deletes {
            records.retain(|r| !r.deleted);
        }
        if opts.meta_only {
            for record in records.iter_mut() {
                record.body = None;
            }
        }
        if opts.reverse {
            records.reverse();
        }
        Iter::new(records)
    }

    // Rewrite the live records into a fresh file, atomically replacing
    // `new_path` (or the current file). Clears the stale count.
    fn rewrite(&mut self, new_path: Option<&ffi::OsStr>) -> Result<()> {
        let tmp: ffi::OsString = {
            let mut tmp = self.path.clone();
            tmp.push(".compact");
            tmp
        };
        fs::remove_file(path::Path::new(&tmp)).ok();

        let mut file = {
            let mut opts = fs::OpenOptions::new();
            err_at!(
                IOError,
                opts.append(true).create_new(true).read(true).open(path::Path::new(&tmp))
            )?
        };

        let mut file_off = {
            let data = util::into_cbor_bytes(Head::new(Algorithm::None))?;
            write_frame(&mut file, &data)? as u64
        };

        // tombstones do not survive a rewrite, absent keys read the same.
        let mut entries: Vec<LogEntry> = self
            .index
            .values()
            .filter(|r| !r.deleted)
            .map(LogEntry::from_record)
            .collect();
        entries.sort_by_key(|e| e.seqno);
        if !entries.is_empty() || self.committed_seqno > 0 {
            let batch = Batch {
                first_seqno: entries.first().map(|e| e.seqno).unwrap_or(0),
                // carry the counter high-water, not just the highest
                // surviving record: burned seqnos must stay burned after
                // a reopen even when compaction dropped their records.
                last_seqno: self.committed_seqno,
                entries,
            };
            let data = util::into_cbor_bytes(batch)?;
            file_off += write_frame(&mut file, &data)? as u64;
        }

        let dest = new_path.unwrap_or(&self.path).to_os_string();
        err_at!(IOError, fs::rename(path::Path::new(&tmp), path::Path::new(&dest)))?;
        info!(target: "alog", "compacted {:?} into {:?}", self.path, dest);

        err_at!(IOError, file.try_lock_exclusive(), "lock {:?}", dest)?;
        self.path = dest;
        self.file = Some(file);
        self.file_off = file_off;
        self.n_stale = 0;

        // drop tombstones from the in-memory view to match the file.
        let tombstones: Vec<IndexKey> = self
            .index
            .iter()
            .filter(|(_, r)| r.deleted)
            .map(|(ikey, _)| ikey.clone())
            .collect();
        for ikey in tombstones {
            if let Some(record) = self.index.remove(&ikey) {
                self.byseq.remove(&record.seqno);
            }
        }
        Ok(())
    }
}

// Append one length-prefixed, crc-guarded frame.
fn write_frame(file: &mut fs::File, payload: &[u8]) -> Result<usize> {
    use crc::crc32;

    let mut buf = Vec::with_capacity(payload.len() + 8);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&crc32::checksum_ieee(payload).to_le_bytes());
    util::sync_write(file, &buf)
}

// Read the frame at the current position. Ok(None) means clean EOF or a
// torn/corrupt tail; the caller stops replaying there.
fn read_frame(file: &mut fs::File) -> Result<Option<Vec<u8>>> {
    use crc::crc32;

    let mut lenb = [0_u8; 4];
    match file.read_exact(&mut lenb) {
        Ok(_) => (),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return err_at!(IOError, Err(err)),
    }
    let len = u32::from_le_bytes(lenb) as usize;
    if len > FRAME_LIMIT {
        warn!(target: "alog", "frame length {} past limit, treating as torn", len);
        return Ok(None);
    }
    let mut payload = vec![0; len];
    let mut crcb = [0_u8; 4];
    let whole = file
        .read_exact(&mut payload)
        .and_then(|_| file.read_exact(&mut crcb));
    match whole {
        Ok(_) => (),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            warn!(target: "alog", "torn frame of {} bytes", len);
            return Ok(None);
        }
        Err(err) => return err_at!(IOError, Err(err)),
    }
    if crc32::checksum_ieee(&payload) != u32::from_le_bytes(crcb) {
        warn!(target: "alog", "crc mismatch on frame of {} bytes", len);
        return Ok(None);
    }
    Ok(Some(payload))
}

// Replay batch frames from the current position, applying entries with
// seqno <= upto (when given). Return (bytes consumed, highest seqno seen).
fn replay(
    file: &mut fs::File,
    upto: Option<u64>,
    index: &mut Index,
    byseq: &mut SeqIndex,
    n_stale: &mut usize,
) -> Result<(u64, u64)> {
    let mut consumed = 0;
    let mut high_seqno = 0;
    while let Some(data) = read_frame(file)? {
        let batch = match util::from_cbor_bytes::<Batch>(&data) {
            Ok((batch, _)) => batch,
            Err(err) => {
                warn!(target: "alog", "undecodable batch frame, stopping replay: {}", err);
                break;
            }
        };
        if let Some(upto) = upto {
            if batch.first_seqno > upto {
                break;
            }
        } else {
            // the batch header may carry a counter high-water past any
            // surviving entry, written by compaction.
            high_seqno = high_seqno.max(batch.last_seqno);
        }
        for entry in batch.entries.into_iter() {
            if let Some(upto) = upto {
                if entry.seqno > upto {
                    continue;
                }
            }
            high_seqno = high_seqno.max(entry.seqno);
            let record = entry.into_record();
            let seqno = record.seqno;
            let ikey = (record.store.clone(), record.key.clone());
            if let Some(old) = index.insert(ikey.clone(), record) {
                byseq.remove(&old.seqno);
                *n_stale += 1;
            }
            byseq.insert(seqno, ikey);
        }
        consumed += (data.len() + 8) as u64;
    }
    Ok((consumed, high_seqno))
}

#[cfg(test)]
#[path = "alog_test.rs"]
mod alog_test;
