//! Module implement versioned documents and their revision trees.
//!
//! A document is a tree of revisions, usually a single chain, forking into
//! branches when independent edits of the same parent meet, typically via
//! replication. Every branch tip is a leaf; the deterministic winner among
//! active leaves is the current revision. A leaf carrying the deleted flag
//! is a tombstone: it closes its branch without erasing the ancestry that
//! replicators still need.
//!
//! [tree::RevTree] is the bare tree; [Doc] wraps it with document flags,
//! the selection cursor and the persisted form.

use std::cmp::Ordering;

mod doc;
mod tree;

pub use self::doc::Doc;
pub use self::tree::{Rev, RevTree};

// Document flags, persisted in the record meta.
/// Every leaf of the document is a deletion tombstone.
pub const DOC_DELETED: u32 = 0x01;
/// Two or more live leaves, the document needs conflict resolution.
pub const DOC_CONFLICTED: u32 = 0x02;
/// The current revision carries attachments.
pub const DOC_HAS_ATTACHMENTS: u32 = 0x04;
/// The document has at least one revision.
pub const DOC_EXISTS: u32 = 0x1000;

// Revision flags, persisted in the record meta except NEW.
/// This revision is a deletion tombstone.
pub const REV_DELETED: u8 = 0x01;
/// No revision lists this one as parent.
pub const REV_LEAF: u8 = 0x02;
/// Inserted since the document was loaded; cleared once a save assigns
/// the revision its sequence number. Never persisted.
pub const REV_NEW: u8 = 0x04;
/// The revision body carries attachments.
pub const REV_HAS_ATTACHMENTS: u8 = 0x08;

/// Generation of a revision-id: the integer prefix up to the first `-`,
/// 0 when there is no parsable prefix.
pub fn generation(revid: &[u8]) -> u64 {
    let pos = match revid.iter().position(|b| *b == b'-') {
        Some(pos) if pos > 0 => pos,
        _ => return 0,
    };
    let mut gen: u64 = 0;
    for b in revid[..pos].iter() {
        match b {
            b'0'..=b'9' => match gen.checked_mul(10) {
                Some(g) => gen = g + u64::from(b - b'0'),
                None => return 0,
            },
            _ => return 0,
        }
    }
    gen
}

/// Total order over revision-ids: by generation first, then by raw bytes.
/// The comparator is deliberately a free function, storage and replication
/// layers must agree on it.
pub fn cmp_revid(a: &[u8], b: &[u8]) -> Ordering {
    match generation(a).cmp(&generation(b)) {
        Ordering::Equal => a.cmp(b),
        ord => ord,
    }
}
