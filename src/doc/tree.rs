//! The bare revision tree: ordering, insertion, purge and pruning.

use std::cmp::Ordering;

use crate::{doc, Error, Result};

/// One revision within a document's tree.
#[derive(Clone, Debug)]
pub struct Rev {
    pub(crate) revid: Vec<u8>,
    pub(crate) flags: u8,
    pub(crate) seqno: u64,
    // index of the parent revision within the tree, None for roots.
    pub(crate) parent: Option<usize>,
    pub(crate) body: Option<Vec<u8>>,
    // (offset, length) of the body within the persisted body record, kept
    // so a meta-only load can fetch the body later.
    pub(crate) body_span: Option<(u64, u64)>,
}

impl Rev {
    pub fn revid(&self) -> &[u8] {
        &self.revid
    }

    pub fn seqno(&self) -> u64 {
        self.seqno
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn is_leaf(&self) -> bool {
        self.flags & doc::REV_LEAF != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & doc::REV_DELETED != 0
    }

    pub fn is_new(&self) -> bool {
        self.flags & doc::REV_NEW != 0
    }

    pub fn has_attachments(&self) -> bool {
        self.flags & doc::REV_HAS_ATTACHMENTS != 0
    }

    fn is_active_leaf(&self) -> bool {
        self.is_leaf() && !self.is_deleted()
    }
}

/// Revision tree, kept in canonical order: descending by
/// `(active-leaf, generation, revid)`, so the revision at index 0 is the
/// current one. Parent links are indexes and are remapped whenever the
/// order changes.
#[derive(Clone, Debug, Default)]
pub struct RevTree {
    revs: Vec<Rev>,
}

impl RevTree {
    pub fn is_empty(&self) -> bool {
        self.revs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.revs.len()
    }

    pub fn rev(&self, index: usize) -> Option<&Rev> {
        self.revs.get(index)
    }

    pub(crate) fn rev_mut(&mut self, index: usize) -> Option<&mut Rev> {
        self.revs.get_mut(index)
    }

    pub(crate) fn revs(&self) -> &[Rev] {
        &self.revs
    }

    pub(crate) fn revs_mut(&mut self) -> &mut [Rev] {
        &mut self.revs
    }

    /// Index of the revision named `revid`.
    pub fn index_of(&self, revid: &[u8]) -> Option<usize> {
        self.revs.iter().position(|r| r.revid == revid)
    }

    // Decoding appends revisions verbatim; the decoder sorts once at the
    // end.
    pub(crate) fn push_decoded(&mut self, rev: Rev) {
        self.revs.push(rev);
    }

    /// Leaves, in canonical order.
    pub fn leaves(&self) -> impl Iterator<Item = &Rev> {
        self.revs.iter().filter(|r| r.is_leaf())
    }

    pub fn n_active_leaves(&self) -> usize {
        self.revs.iter().filter(|r| r.is_active_leaf()).count()
    }

    /// Insert a revision under `parent`. The new revision becomes a leaf,
    /// the parent stops being one.
    ///
    /// Without `allow_conflict` the parent must be a leaf; growing a second
    /// branch, or a second root, fails with Conflict. A revid already in
    /// the tree fails with RevIDExists.
    pub(crate) fn insert(
        &mut self,
        revid: &[u8],
        body: Vec<u8>,
        deleted: bool,
        has_attachments: bool,
        allow_conflict: bool,
        parent: Option<&[u8]>,
    ) -> Result<()> {
        if self.index_of(revid).is_some() {
            return err_at!(RevIDExists, msg: "{:?}", revid);
        }
        let parent = match parent {
            Some(parent_id) => match self.index_of(parent_id) {
                Some(index) => Some(index),
                None => return err_at!(UnknownRevision, msg: "{:?}", parent_id),
            },
            None => None,
        };
        match parent {
            Some(index) if !allow_conflict && !self.revs[index].is_leaf() => {
                return err_at!(Conflict, msg: "parent {:?} is not a leaf", self.revs[index].revid)
            }
            None if !allow_conflict && !self.revs.is_empty() => {
                return err_at!(Conflict, msg: "new root in a non-empty tree")
            }
            _ => (),
        }

        let mut flags = doc::REV_LEAF | doc::REV_NEW;
        if deleted {
            flags |= doc::REV_DELETED;
        }
        if has_attachments {
            flags |= doc::REV_HAS_ATTACHMENTS;
        }
        if let Some(index) = parent {
            self.revs[index].flags &= !doc::REV_LEAF;
        }
        self.revs.push(Rev {
            revid: revid.to_vec(),
            flags,
            seqno: 0,
            parent,
            body: Some(body),
            body_span: None,
        });
        self.sort();
        Ok(())
    }

    /// Insert a replicated revision along with its ancestry. `history[0]`
    /// is the new revision, the rest its ancestors newest first. The chain
    /// is grafted onto the first ancestor already present, or becomes a new
    /// root. Return the number of revisions added.
    pub(crate) fn insert_history(
        &mut self,
        history: &[&[u8]],
        body: Vec<u8>,
        deleted: bool,
        has_attachments: bool,
    ) -> Result<usize> {
        if history.is_empty() {
            return err_at!(Fatal, msg: "empty revision history");
        }
        if self.index_of(history[0]).is_some() {
            return Ok(0);
        }

        let attach = history
            .iter()
            .enumerate()
            .find_map(|(i, revid)| self.index_of(revid).map(|index| (i, index)));
        let (mut to_add, mut parent) = match attach {
            Some((i, index)) => {
                self.revs[index].flags &= !doc::REV_LEAF;
                (i, Some(index))
            }
            None => (history.len(), None),
        };

        let added = to_add;
        while to_add > 0 {
            to_add -= 1;
            let revid = history[to_add];
            let leaf = to_add == 0;
            let mut flags = doc::REV_NEW;
            if leaf {
                flags |= doc::REV_LEAF;
                if deleted {
                    flags |= doc::REV_DELETED;
                }
                if has_attachments {
                    flags |= doc::REV_HAS_ATTACHMENTS;
                }
            }
            self.revs.push(Rev {
                revid: revid.to_vec(),
                flags,
                seqno: 0,
                parent,
                body: if leaf { Some(body.clone()) } else { None },
                body_span: None,
            });
            parent = Some(self.revs.len() - 1);
        }
        self.sort();
        Ok(added)
    }

    /// Remove the leaf named `revid` and every exclusive ancestor, walking
    /// up until an ancestor shared with another branch. Return the number
    /// of revisions removed.
    pub(crate) fn purge(&mut self, revid: &[u8]) -> Result<usize> {
        let index = match self.index_of(revid) {
            Some(index) => index,
            None => return err_at!(UnknownRevision, msg: "{:?}", revid),
        };
        if !self.revs[index].is_leaf() {
            return err_at!(NotALeaf, msg: "{:?}", revid);
        }

        let mut doomed = vec![false; self.revs.len()];
        let mut cursor = Some(index);
        while let Some(at) = cursor {
            let shared = self
                .revs
                .iter()
                .enumerate()
                .any(|(i, r)| !doomed[i] && i != at && r.parent == Some(at));
            if shared {
                break;
            }
            doomed[at] = true;
            cursor = self.revs[at].parent;
        }

        Ok(self.remove_marked(&doomed))
    }

    /// Keep at most `max_depth` revisions on every leaf-to-root path,
    /// detaching older ancestors not retained by any other branch. Return
    /// the number of revisions removed.
    pub(crate) fn prune(&mut self, max_depth: usize) -> usize {
        if max_depth == 0 || self.revs.is_empty() {
            return 0;
        }
        let mut keep = vec![false; self.revs.len()];
        for index in 0..self.revs.len() {
            if !self.revs[index].is_leaf() {
                continue;
            }
            let mut cursor = Some(index);
            let mut depth = 0;
            while let Some(at) = cursor {
                if depth == max_depth {
                    break;
                }
                keep[at] = true;
                depth += 1;
                cursor = self.revs[at].parent;
            }
        }
        let doomed: Vec<bool> = keep.iter().map(|k| !k).collect();
        self.remove_marked(&doomed)
    }

    // Drop marked revisions, compacting indexes and re-rooting retained
    // revisions whose parent went away.
    fn remove_marked(&mut self, doomed: &[bool]) -> usize {
        let n_doomed = doomed.iter().filter(|d| **d).count();
        if n_doomed == 0 {
            return 0;
        }

        let mut remap = vec![None; self.revs.len()];
        let mut kept = 0;
        for (index, doomed) in doomed.iter().enumerate() {
            if !doomed {
                remap[index] = Some(kept);
                kept += 1;
            }
        }

        let mut index = 0;
        self.revs.retain(|_| {
            let keep = !doomed[index];
            index += 1;
            keep
        });
        for rev in self.revs.iter_mut() {
            rev.parent = rev.parent.and_then(|p| remap[p]);
        }
        self.sort();
        n_doomed
    }

    // Canonical order: descending by (active-leaf, generation, revid);
    // index 0 ends up the current revision. Parent indexes are remapped.
    pub(crate) fn sort(&mut self) {
        let revs = std::mem::take(&mut self.revs);

        let mut order: Vec<usize> = (0..revs.len()).collect();
        order.sort_by(|&a, &b| Self::cmp_rank(&revs[b], &revs[a]));

        let mut remap = vec![0; revs.len()];
        for (pos, &old) in order.iter().enumerate() {
            remap[old] = pos;
        }

        let mut sorted: Vec<Rev> = order.into_iter().map(|old| revs[old].clone()).collect();
        for rev in sorted.iter_mut() {
            rev.parent = rev.parent.map(|p| remap[p]);
        }
        self.revs = sorted;
    }

    fn cmp_rank(a: &Rev, b: &Rev) -> Ordering {
        match a.is_active_leaf().cmp(&b.is_active_leaf()) {
            Ordering::Equal => doc::cmp_revid(&a.revid, &b.revid),
            ord => ord,
        }
    }
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;
