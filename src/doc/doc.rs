//! Versioned document: flags, selection cursor and the persisted form.

use cbordata::Cborize;

use std::convert::TryFrom;

use crate::{
    doc::{self, Rev, RevTree},
    store::Record,
    util, Error, Result,
};

const DOC_META_VER: u32 = 0x0001_0001;
const REV_META_VER: u32 = 0x0001_0001;

// Marks a root revision in RevMeta.parent.
const NO_PARENT: u64 = u64::MAX;

// Persisted per-revision metadata. Bodies live concatenated in the record
// body, located by (body_off, body_len).
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
struct RevMeta {
    revid: Vec<u8>,
    flags: u64,
    seqno: u64,
    // index of the parent within the revision list, NO_PARENT for roots.
    parent: u64,
    has_body: bool,
    body_off: u64,
    body_len: u64,
}

impl RevMeta {
    const ID: u32 = REV_META_VER;
}

// Persisted document metadata, the record meta of a document.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
struct DocMeta {
    flags: u64,
    doctype: Vec<u8>,
    revs: Vec<RevMeta>,
}

impl DocMeta {
    const ID: u32 = DOC_META_VER;
}

/// A versioned document: a revision tree plus document flags, type and the
/// selection cursor.
///
/// The cursor addresses one revision at a time; insertions go under the
/// selected revision and the body accessors read from it. Loading a
/// document selects its current revision.
///
/// Mutations only touch the in-memory tree; nothing persists until the
/// document is saved through its database.
#[derive(Clone, Debug)]
pub struct Doc {
    pub(crate) id: Vec<u8>,
    pub(crate) flags: u32,
    pub(crate) doctype: Vec<u8>,
    pub(crate) seqno: u64,
    pub(crate) tree: RevTree,
    // revid of the selected revision; survives re-sorting.
    selected: Option<Vec<u8>>,
}

impl Doc {
    /// An empty document handle for `id`; exists turns on at first insert.
    pub fn new(id: &[u8]) -> Doc {
        Doc {
            id: id.to_vec(),
            flags: 0,
            doctype: Vec::default(),
            seqno: 0,
            tree: RevTree::default(),
            selected: None,
        }
    }

    // Decode a document from its persisted record. With a meta-only record
    // the revision bodies stay unloaded, their spans retained.
    pub(crate) fn from_record(record: &Record) -> Result<Doc> {
        let (meta, _) = util::from_cbor_bytes::<DocMeta>(&record.meta)?;

        let mut tree = RevTree::default();
        for rm in meta.revs.iter() {
            let parent = match rm.parent {
                NO_PARENT => None,
                p => Some(err_at!(FailConvert, usize::try_from(p))?),
            };
            if parent.map(|p| p >= meta.revs.len()).unwrap_or(false) {
                return err_at!(Corruption, msg: "rev parent {} of {}", rm.parent, meta.revs.len());
            }
            let body = match (&record.body, rm.has_body) {
                (Some(body), true) => {
                    let (off, len) = (rm.body_off as usize, rm.body_len as usize);
                    let bytes = off.checked_add(len).and_then(|end| body.get(off..end));
                    match bytes {
                        Some(bytes) => Some(bytes.to_vec()),
                        None => {
                            return err_at!(
                                Corruption,
                                msg: "rev body {}+{}/{}", off, len, body.len()
                            )
                        }
                    }
                }
                _ => None,
            };
            tree.push_decoded(Rev {
                revid: rm.revid.clone(),
                // NEW is transient, a persisted record cannot carry it.
                flags: (rm.flags as u8) & !doc::REV_NEW,
                seqno: rm.seqno,
                parent,
                body,
                body_span: if rm.has_body {
                    Some((rm.body_off, rm.body_len))
                } else {
                    None
                },
            });
        }
        // parent links must form a forest; a cycle would hang the
        // purge/prune walks.
        for start in 0..tree.len() {
            let mut cursor = tree.rev(start).and_then(|rev| rev.parent);
            let mut steps = 0;
            while let Some(at) = cursor {
                steps += 1;
                if steps > tree.len() {
                    return err_at!(Corruption, msg: "parent cycle at rev {}", start);
                }
                cursor = tree.rev(at).and_then(|rev| rev.parent);
            }
        }
        tree.sort();

        let mut val = Doc {
            id: record.key.clone(),
            flags: (meta.flags as u32) | doc::DOC_EXISTS,
            doctype: meta.doctype,
            seqno: record.seqno,
            tree,
            selected: None,
        };
        val.select_current_revision();
        Ok(val)
    }

    // Encode into (meta, body): document metadata plus the revision bodies
    // concatenated in canonical order.
    pub(crate) fn to_meta_body(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut body = Vec::default();
        let mut revs = Vec::with_capacity(self.tree.len());
        for rev in self.tree.revs().iter() {
            let (has_body, body_off, body_len) = match rev.body() {
                Some(bytes) => {
                    let off = body.len() as u64;
                    body.extend_from_slice(bytes);
                    (true, off, bytes.len() as u64)
                }
                None => (false, 0, 0),
            };
            revs.push(RevMeta {
                revid: rev.revid.clone(),
                flags: u64::from(rev.flags & !doc::REV_NEW),
                seqno: rev.seqno,
                parent: rev.parent.map(|p| p as u64).unwrap_or(NO_PARENT),
                has_body,
                body_off,
                body_len,
            });
        }
        let meta = DocMeta {
            flags: u64::from(self.flags),
            doctype: self.doctype.clone(),
            revs,
        };
        Ok((util::into_cbor_bytes(meta)?, body))
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Sequence at which this document was last persisted.
    pub fn seqno(&self) -> u64 {
        self.seqno
    }

    pub fn exists(&self) -> bool {
        self.flags & doc::DOC_EXISTS != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & doc::DOC_DELETED != 0
    }

    pub fn is_conflicted(&self) -> bool {
        self.flags & doc::DOC_CONFLICTED != 0
    }

    pub fn has_attachments(&self) -> bool {
        self.flags & doc::DOC_HAS_ATTACHMENTS != 0
    }

    /// Opaque type hint for external indexers, persisted with the document.
    pub fn doc_type(&self) -> &[u8] {
        &self.doctype
    }

    /// Takes effect at the next save.
    pub fn set_doc_type(&mut self, doctype: &[u8]) {
        self.doctype = doctype.to_vec();
    }

    /// Revision-id of the current revision, the canonical winner.
    pub fn revid(&self) -> Option<&[u8]> {
        self.tree.rev(0).map(|rev| rev.revid())
    }

    pub fn tree(&self) -> &RevTree {
        &self.tree
    }

    /// The revision under the cursor.
    pub fn selected_rev(&self) -> Option<&Rev> {
        let index = self.selected_index()?;
        self.tree.rev(index)
    }

    /// Point the cursor at `revid`.
    pub fn select_revision(&mut self, revid: &[u8]) -> Result<()> {
        match self.tree.index_of(revid) {
            Some(_) => {
                self.selected = Some(revid.to_vec());
                Ok(())
            }
            None => err_at!(UnknownRevision, msg: "{:?}", revid),
        }
    }

    /// Point the cursor at the current revision. False on an empty
    /// document.
    pub fn select_current_revision(&mut self) -> bool {
        match self.tree.rev(0) {
            Some(rev) => {
                self.selected = Some(rev.revid().to_vec());
                true
            }
            None => {
                self.selected = None;
                false
            }
        }
    }

    /// Move the cursor to the parent of the selected revision. False at a
    /// root.
    pub fn select_parent_revision(&mut self) -> bool {
        let parent = self
            .selected_index()
            .and_then(|index| self.tree.rev(index))
            .and_then(|rev| rev.parent);
        match parent.and_then(|index| self.tree.rev(index)) {
            Some(rev) => {
                self.selected = Some(rev.revid().to_vec());
                true
            }
            None => false,
        }
    }

    /// Move the cursor to the next revision in canonical order. False past
    /// the last one.
    pub fn select_next_revision(&mut self) -> bool {
        match self.selected_index().map(|index| index + 1) {
            Some(index) => match self.tree.rev(index) {
                Some(rev) => {
                    self.selected = Some(rev.revid().to_vec());
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Like [Doc::select_next_revision] but skip non-leaves, and skip
    /// tombstone leaves unless `include_deleted`.
    pub fn select_next_leaf_revision(&mut self, include_deleted: bool) -> bool {
        let mut index = match self.selected_index() {
            Some(index) => index + 1,
            None => return false,
        };
        while let Some(rev) = self.tree.rev(index) {
            if rev.is_leaf() && (include_deleted || !rev.is_deleted()) {
                self.selected = Some(rev.revid().to_vec());
                return true;
            }
            index += 1;
        }
        false
    }

    /// Whether the selected revision's body is either loaded or still on
    /// disk for [crate::db::Database::load_revision_body] to fetch.
    pub fn has_revision_body(&self) -> bool {
        match self.selected_rev() {
            Some(rev) => rev.body.is_some() || rev.body_span.is_some(),
            None => false,
        }
    }

    /// Insert a revision as a child of the selected revision, or as a root
    /// on an empty document. The new revision is selected. Returns the
    /// number of revisions added: 1, or 0 when `revid` already exists.
    ///
    /// Without `allow_conflict`, growing a second branch fails with
    /// Conflict.
    pub fn insert_revision(
        &mut self,
        revid: &[u8],
        body: &[u8],
        deleted: bool,
        has_attachments: bool,
        allow_conflict: bool,
    ) -> Result<usize> {
        let parent = self.selected.clone();
        let inserted = self.tree.insert(
            revid,
            body.to_vec(),
            deleted,
            has_attachments,
            allow_conflict,
            parent.as_deref(),
        );
        match inserted {
            Ok(()) => {
                self.selected = Some(revid.to_vec());
                self.update_flags();
                Ok(1)
            }
            Err(Error::RevIDExists(_, _)) => Ok(0),
            Err(err) => Err(err),
        }
    }

    /// Insert a replicated revision with its ancestry, `history[0]` being
    /// the new revision and the rest its ancestors newest first. The chain
    /// grafts onto the first ancestor already present. The new revision is
    /// selected. Returns the number of revisions added.
    pub fn insert_revision_with_history(
        &mut self,
        body: &[u8],
        deleted: bool,
        has_attachments: bool,
        history: &[&[u8]],
    ) -> Result<usize> {
        let added = self
            .tree
            .insert_history(history, body.to_vec(), deleted, has_attachments)?;
        self.selected = Some(history[0].to_vec());
        self.update_flags();
        Ok(added)
    }

    /// Remove the leaf named `revid` and its exclusive ancestors. Returns
    /// the number of revisions removed. Purging the last branch empties
    /// the document; the next save then removes its record entirely.
    pub fn purge_revision(&mut self, revid: &[u8]) -> Result<usize> {
        let n = self.tree.purge(revid)?;
        match &self.selected {
            Some(selected) if self.tree.index_of(selected).is_none() => {
                self.select_current_revision();
            }
            _ => (),
        }
        self.update_flags();
        Ok(n)
    }

    pub(crate) fn prune(&mut self, max_depth: usize) -> usize {
        let n = self.tree.prune(max_depth);
        if n > 0 {
            match &self.selected {
                Some(selected) if self.tree.index_of(selected).is_none() => {
                    self.select_current_revision();
                }
                _ => (),
            }
            self.update_flags();
        }
        n
    }

    // A successful save assigned `seqno` to this document's record; stamp
    // the new revisions and clear their transient flag.
    pub(crate) fn mark_saved(&mut self, seqno: u64) {
        for rev in self.tree.revs_mut().iter_mut() {
            if rev.flags & doc::REV_NEW != 0 {
                rev.seqno = seqno;
                rev.flags &= !doc::REV_NEW;
            }
        }
        self.seqno = seqno;
    }

    // Fill unloaded revision bodies from the persisted body record.
    pub(crate) fn fill_bodies(&mut self, body: &[u8]) -> Result<()> {
        for rev in self.tree.revs_mut().iter_mut() {
            if rev.body.is_none() {
                if let Some((off, len)) = rev.body_span {
                    let (off, len) = (off as usize, len as usize);
                    let bytes = off.checked_add(len).and_then(|end| body.get(off..end));
                    match bytes {
                        Some(bytes) => rev.body = Some(bytes.to_vec()),
                        None => {
                            return err_at!(
                                Corruption,
                                msg: "rev body {}+{}/{}", off, len, body.len()
                            )
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn needs_bodies(&self) -> bool {
        self.tree
            .revs()
            .iter()
            .any(|rev| rev.body.is_none() && rev.body_span.is_some())
    }

    // Re-derive document flags from the tree: deleted when every leaf is
    // a tombstone, conflicted on two or more live leaves, attachments
    // follow the current revision.
    pub(crate) fn update_flags(&mut self) {
        if self.tree.is_empty() {
            self.flags = 0;
            return;
        }
        let mut flags = doc::DOC_EXISTS;
        let n_active = self.tree.n_active_leaves();
        if n_active == 0 {
            flags |= doc::DOC_DELETED;
        }
        if n_active >= 2 {
            flags |= doc::DOC_CONFLICTED;
        }
        match self.tree.rev(0) {
            Some(rev) if rev.has_attachments() => flags |= doc::DOC_HAS_ATTACHMENTS,
            _ => (),
        }
        self.flags = flags;
    }

    fn selected_index(&self) -> Option<usize> {
        self.tree.index_of(self.selected.as_deref()?)
    }
}

#[cfg(test)]
#[path = "doc_test.rs"]
mod doc_test;
