use rand::random;

use std::{env, ffi, fs};

use super::*;

fn test_path(name: &str) -> ffi::OsString {
    let mut path = env::temp_dir();
    path.push(format!("{}-{}.alog", name, random::<u32>()));
    fs::remove_file(&path).ok();
    path.into_os_string()
}

fn writable() -> OpenFlags {
    OpenFlags::default().set_create(true)
}

#[test]
fn test_alog_crud() {
    let path = test_path("test_alog_crud");

    {
        let mut kv = Alog::open(&path, writable(), None).unwrap();
        let seqno = kv.set("docs", b"alpha", b"meta1", b"body1").unwrap();
        assert_eq!(seqno, 1);

        // buffered write is invisible to the committed view.
        assert_eq!(
            kv.get("docs", b"alpha", Access::Committed).unwrap_err(),
            Error::KeyNotFound(String::default(), String::default())
        );
        let record = kv.get("docs", b"alpha", Access::Uncommitted).unwrap();
        assert_eq!(record.meta, b"meta1".to_vec());
        assert_eq!(record.body, Some(b"body1".to_vec()));
        assert_eq!(record.seqno, 1);

        kv.commit().unwrap();
        let record = kv.get("docs", b"alpha", Access::Committed).unwrap();
        assert_eq!(record.body, Some(b"body1".to_vec()));
        assert_eq!(kv.last_seqno(Access::Committed), 1);

        let record = kv.get_meta("docs", b"alpha", Access::Committed).unwrap();
        assert_eq!(record.body, None);
        assert_eq!(record.meta, b"meta1".to_vec());
    }

    // reopen and find the record again.
    {
        let kv = Alog::open(&path, writable(), None).unwrap();
        let record = kv.get("docs", b"alpha", Access::Committed).unwrap();
        assert_eq!(record.meta, b"meta1".to_vec());
        assert_eq!(record.body, Some(b"body1".to_vec()));
        assert_eq!(record.seqno, 1);
        assert_eq!(kv.last_seqno(Access::Committed), 1);
        assert_eq!(kv.n_records("docs", Access::Committed), 1);
    }

    Alog::destroy(&path).unwrap();
}

#[test]
fn test_alog_seqno_monotonic() {
    let path = test_path("test_alog_seqno_monotonic");
    let mut kv = Alog::open(&path, writable(), None).unwrap();

    let mut last = 0;
    for i in 0..100 {
        let key = format!("key-{:03}", i % 10);
        let seqno = kv.set("docs", key.as_bytes(), b"", b"x").unwrap();
        assert!(seqno > last, "{} {}", seqno, last);
        last = seqno;
        if i % 7 == 0 {
            kv.commit().unwrap();
        }
    }
    kv.commit().unwrap();
    assert_eq!(kv.last_seqno(Access::Committed), 100);

    Alog::destroy(&path).unwrap();
}

#[test]
fn test_alog_tombstone() {
    let path = test_path("test_alog_tombstone");
    let mut kv = Alog::open(&path, writable(), None).unwrap();

    kv.set("docs", b"alpha", b"m", b"b").unwrap();
    kv.set("docs", b"beta", b"m", b"b").unwrap();
    kv.commit().unwrap();

    let seqno = kv.delete("docs", b"alpha").unwrap();
    assert_eq!(seqno, 3);
    kv.commit().unwrap();

    assert_eq!(
        kv.get("docs", b"alpha", Access::Committed).unwrap_err(),
        Error::KeyNotFound(String::default(), String::default())
    );
    assert_eq!(kv.n_records("docs", Access::Committed), 1);

    let opts = IterOptions::default().set_skip_deletes(true);
    let records: Vec<Record> = kv
        .iter("docs", Bound::Unbounded, Bound::Unbounded, opts, Access::Committed)
        .unwrap()
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, b"beta".to_vec());

    // tombstone still visible when not skipping deletes.
    let opts = IterOptions::default();
    let records: Vec<Record> = kv
        .iter("docs", Bound::Unbounded, Bound::Unbounded, opts, Access::Committed)
        .unwrap()
        .collect();
    assert_eq!(records.len(), 2);
    assert!(records[0].deleted);

    Alog::destroy(&path).unwrap();
}

#[test]
fn test_alog_rollback_uncommitted() {
    let path = test_path("test_alog_rollback_uncommitted");
    let mut kv = Alog::open(&path, writable(), None).unwrap();

    kv.set("docs", b"alpha", b"m", b"b").unwrap();
    kv.commit().unwrap();

    let at = kv.last_seqno(Access::Committed);
    kv.set("docs", b"beta", b"m", b"b").unwrap();
    kv.set("docs", b"alpha", b"m", b"b2").unwrap();
    kv.rollback(at).unwrap();

    assert_eq!(
        kv.get("docs", b"beta", Access::Uncommitted).unwrap_err(),
        Error::KeyNotFound(String::default(), String::default())
    );
    let record = kv.get("docs", b"alpha", Access::Uncommitted).unwrap();
    assert_eq!(record.body, Some(b"b".to_vec()));

    // seqnos are not handed out again after a rollback.
    let seqno = kv.set("docs", b"gamma", b"m", b"b").unwrap();
    assert_eq!(seqno, 4);

    Alog::destroy(&path).unwrap();
}

#[test]
fn test_alog_rollback_committed() {
    let path = test_path("test_alog_rollback_committed");
    let mut kv = Alog::open(&path, writable(), None).unwrap();

    kv.set("docs", b"alpha", b"m", b"v1").unwrap();
    kv.commit().unwrap();
    let at = kv.last_seqno(Access::Committed);

    kv.set("docs", b"alpha", b"m", b"v2").unwrap();
    kv.set("docs", b"beta", b"m", b"b").unwrap();
    kv.commit().unwrap();

    kv.rollback(at).unwrap();
    let record = kv.get("docs", b"alpha", Access::Committed).unwrap();
    assert_eq!(record.body, Some(b"v1".to_vec()));
    assert_eq!(
        kv.get("docs", b"beta", Access::Committed).unwrap_err(),
        Error::KeyNotFound(String::default(), String::default())
    );

    // the truncation survives a reopen.
    std::mem::drop(kv);
    let kv = Alog::open(&path, writable(), None).unwrap();
    assert_eq!(kv.last_seqno(Access::Committed), at);
    let record = kv.get("docs", b"alpha", Access::Committed).unwrap();
    assert_eq!(record.body, Some(b"v1".to_vec()));

    Alog::destroy(&path).unwrap();
}

#[test]
fn test_alog_snapshot() {
    let path = test_path("test_alog_snapshot");
    let mut kv = Alog::open(&path, writable(), None).unwrap();

    kv.set("docs", b"alpha", b"m", b"v1").unwrap();
    kv.commit().unwrap();
    let at = kv.last_seqno(Access::Committed);

    kv.set("docs", b"alpha", b"m", b"v2").unwrap();
    kv.commit().unwrap();

    let mut snap = kv.snapshot(at).unwrap();
    let record = snap.get("docs", b"alpha", Access::Committed).unwrap();
    assert_eq!(record.body, Some(b"v1".to_vec()));
    assert_eq!(snap.last_seqno(Access::Committed), at);
    assert_eq!(
        snap.set("docs", b"beta", b"m", b"b").unwrap_err(),
        Error::ReadOnlyViolation(String::default(), String::default())
    );

    // the live handle still reads the newest version.
    let record = kv.get("docs", b"alpha", Access::Committed).unwrap();
    assert_eq!(record.body, Some(b"v2".to_vec()));

    Alog::destroy(&path).unwrap();
}

#[test]
fn test_alog_iter_ranges() {
    let path = test_path("test_alog_iter_ranges");
    let mut kv = Alog::open(&path, writable(), None).unwrap();

    for key in ["a", "b", "c", "d"].iter() {
        kv.set("docs", key.as_bytes(), b"", b"x").unwrap();
    }
    kv.set("info", b"version", b"", b"1").unwrap();
    kv.commit().unwrap();

    let keys = |iter: Iter| -> Vec<Vec<u8>> { iter.map(|r| r.key).collect() };
    let opts = IterOptions::default();

    let iter = kv
        .iter("docs", Bound::Unbounded, Bound::Unbounded, opts, Access::Committed)
        .unwrap();
    assert_eq!(keys(iter), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

    // keyspaces do not bleed into each other.
    let iter = kv
        .iter("info", Bound::Unbounded, Bound::Unbounded, opts, Access::Committed)
        .unwrap();
    assert_eq!(keys(iter), vec![b"version".to_vec()]);

    let iter = kv
        .iter(
            "docs",
            Bound::Excluded(b"a".to_vec()),
            Bound::Excluded(b"d".to_vec()),
            opts,
            Access::Committed,
        )
        .unwrap();
    assert_eq!(keys(iter), vec![b"b".to_vec(), b"c".to_vec()]);

    let iter = kv
        .iter(
            "docs",
            Bound::Included(b"b".to_vec()),
            Bound::Included(b"c".to_vec()),
            opts.set_reverse(true),
            Access::Committed,
        )
        .unwrap();
    assert_eq!(keys(iter), vec![b"c".to_vec(), b"b".to_vec()]);

    let mut iter = kv
        .iter("docs", Bound::Unbounded, Bound::Unbounded, opts, Access::Committed)
        .unwrap();
    assert!(iter.seek(b"bb"));
    assert_eq!(iter.next().unwrap().key, b"c".to_vec());
    assert!(!iter.seek(b"zz"));
    assert!(iter.next().is_none());

    Alog::destroy(&path).unwrap();
}

#[test]
fn test_alog_iter_seqnos() {
    let path = test_path("test_alog_iter_seqnos");
    let mut kv = Alog::open(&path, writable(), None).unwrap();

    kv.set("docs", b"a", b"", b"x").unwrap(); // seqno 1
    kv.set("info", b"version", b"", b"1").unwrap(); // seqno 2
    kv.set("docs", b"b", b"", b"x").unwrap(); // seqno 3
    kv.set("docs", b"a", b"", b"y").unwrap(); // seqno 4, shadows 1
    kv.commit().unwrap();

    let records: Vec<Record> = kv
        .iter_seqnos(
            "docs",
            Bound::Unbounded,
            Bound::Unbounded,
            IterOptions::default(),
            Access::Committed,
        )
        .unwrap()
        .collect();
    let seqnos: Vec<u64> = records.iter().map(|r| r.seqno).collect();
    assert_eq!(seqnos, vec![3, 4]);

    let records: Vec<Record> = kv
        .iter_seqnos(
            "docs",
            Bound::Excluded(3),
            Bound::Unbounded,
            IterOptions::default(),
            Access::Committed,
        )
        .unwrap()
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, b"a".to_vec());

    Alog::destroy(&path).unwrap();
}

#[test]
fn test_alog_compact() {
    let path = test_path("test_alog_compact");
    let mut kv = Alog::open(&path, writable(), None).unwrap();

    for i in 0..50 {
        kv.set("docs", b"churn", b"", format!("v{}", i).as_bytes()).unwrap();
        kv.commit().unwrap();
    }
    kv.delete("docs", b"gone").unwrap();
    kv.commit().unwrap();

    let before = fs::metadata(&path).unwrap().len();
    kv.compact(None).unwrap();
    let after = fs::metadata(&path).unwrap().len();
    assert!(after < before, "{} {}", after, before);

    let record = kv.get("docs", b"churn", Access::Committed).unwrap();
    assert_eq!(record.body, Some(b"v49".to_vec()));

    std::mem::drop(kv);
    let kv = Alog::open(&path, writable(), None).unwrap();
    let record = kv.get("docs", b"churn", Access::Committed).unwrap();
    assert_eq!(record.body, Some(b"v49".to_vec()));
    assert_eq!(record.seqno, 50);

    Alog::destroy(&path).unwrap();
}

#[test]
fn test_alog_encryption() {
    let path = test_path("test_alog_encryption");

    let key = EncryptionKey::new(Algorithm::Aes256, [7; 32]);
    assert_eq!(
        Alog::open(&path, writable(), Some(key)).unwrap_err(),
        Error::UnsupportedAlgorithm(String::default(), String::default())
    );

    // create plain, reopen with a key: key mismatch.
    let kv = Alog::open(&path, writable(), None).unwrap();
    std::mem::drop(kv);
    assert_eq!(
        Alog::open(&path, writable(), Some(key)).unwrap_err(),
        Error::WrongKey(String::default(), String::default())
    );

    Alog::destroy(&path).unwrap();
}

#[test]
fn test_alog_read_only() {
    let path = test_path("test_alog_read_only");

    let flags = OpenFlags::default().set_read_only(true);
    assert_eq!(
        Alog::open(&path, flags, None).unwrap_err(),
        Error::InvalidFile(String::default(), String::default())
    );

    {
        let mut kv = Alog::open(&path, writable(), None).unwrap();
        kv.set("docs", b"alpha", b"m", b"b").unwrap();
        kv.commit().unwrap();
    }

    let mut kv = Alog::open(&path, flags, None).unwrap();
    assert_eq!(kv.get("docs", b"alpha", Access::Committed).unwrap().seqno, 1);
    assert_eq!(
        kv.set("docs", b"beta", b"m", b"b").unwrap_err(),
        Error::ReadOnlyViolation(String::default(), String::default())
    );
    std::mem::drop(kv);

    Alog::destroy(&path).unwrap();
}

#[test]
fn test_alog_torn_tail() {
    use std::io::Write;

    let path = test_path("test_alog_torn_tail");

    {
        let mut kv = Alog::open(&path, writable(), None).unwrap();
        kv.set("docs", b"alpha", b"m", b"b").unwrap();
        kv.commit().unwrap();
    }

    // simulate a crash mid-append.
    {
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x2a, 0x00, 0x00, 0x00, 0xde, 0xad]).unwrap();
    }

    let kv = Alog::open(&path, writable(), None).unwrap();
    let record = kv.get("docs", b"alpha", Access::Committed).unwrap();
    assert_eq!(record.body, Some(b"b".to_vec()));
    assert_eq!(kv.last_seqno(Access::Committed), 1);

    Alog::destroy(&path).unwrap();
}
