//! Document enumerators: by key range, by sequence, by explicit key set.

use std::ops::Bound;

use crate::{
    db::{Database, DOC_STORE},
    doc::Doc,
    store::{Iter, IterOptions, KvStore, Record},
    Result,
};

/// Options shared by the enumerator constructors.
///
/// Defaults match the common read path: ascending, both endpoints
/// inclusive, bodies loaded, deleted documents filtered out, conflicted
/// and non-conflicted documents both included.
#[derive(Clone, Copy, Debug)]
pub struct EnumOptions {
    /// Results to drop after filtering, before the first yield.
    pub skip: usize,
    /// Iterate keys in descending order.
    pub descending: bool,
    /// Yield the start endpoint itself.
    pub inclusive_start: bool,
    /// Yield the end endpoint itself.
    pub inclusive_end: bool,
    /// Yield documents whose every branch is a tombstone.
    pub include_deleted: bool,
    /// When false, yield only documents in conflict.
    pub include_non_conflicted: bool,
    /// Load revision bodies up front; otherwise documents come meta-only
    /// and bodies load lazily per revision.
    pub include_bodies: bool,
}

impl Default for EnumOptions {
    fn default() -> EnumOptions {
        EnumOptions {
            skip: 0,
            descending: false,
            inclusive_start: true,
            inclusive_end: true,
            include_deleted: false,
            include_non_conflicted: true,
            include_bodies: true,
        }
    }
}

impl EnumOptions {
    pub fn set_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn set_descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn set_inclusive_start(mut self, inclusive: bool) -> Self {
        self.inclusive_start = inclusive;
        self
    }

    pub fn set_inclusive_end(mut self, inclusive: bool) -> Self {
        self.inclusive_end = inclusive;
        self
    }

    pub fn set_include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    pub fn set_include_non_conflicted(mut self, include: bool) -> Self {
        self.include_non_conflicted = include;
        self
    }

    pub fn set_include_bodies(mut self, include: bool) -> Self {
        self.include_bodies = include;
        self
    }
}

impl Database {
    /// Enumerate documents by key order between `start` and `end`, either
    /// endpoint open when None. With `descending`, `start` is the upper
    /// endpoint.
    pub fn enumerate_all_docs(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        opts: EnumOptions,
    ) -> Result<DocEnumerator> {
        let (lo, lo_incl, hi, hi_incl) = if opts.descending {
            (end, opts.inclusive_end, start, opts.inclusive_start)
        } else {
            (start, opts.inclusive_start, end, opts.inclusive_end)
        };
        let iter = self.store_read()?.iter(
            DOC_STORE,
            key_bound(lo, lo_incl),
            key_bound(hi, hi_incl),
            store_opts(&opts),
            self.access(),
        )?;
        Ok(DocEnumerator::new(iter, None, opts))
    }

    /// Enumerate documents whose record sequence is greater than `since`,
    /// in sequence order. The change feed.
    pub fn enumerate_changes(&self, since: u64, opts: EnumOptions) -> Result<DocEnumerator> {
        let iter = self.store_read()?.iter_seqnos(
            DOC_STORE,
            Bound::Excluded(since),
            Bound::Unbounded,
            store_opts(&opts),
            self.access(),
        )?;
        Ok(DocEnumerator::new(iter, None, opts))
    }

    /// Enumerate an explicit set of document ids, ascending. Ids without
    /// a document yield an empty handle, so callers can tell present from
    /// missing.
    pub fn enumerate_some_docs(
        &self,
        ids: &[&[u8]],
        opts: EnumOptions,
    ) -> Result<DocEnumerator> {
        let mut keys: Vec<Vec<u8>> = ids.iter().map(|id| id.to_vec()).collect();
        keys.sort();
        // seek-then-next needs the underlying records ascending.
        let iter = self.store_read()?.iter(
            DOC_STORE,
            Bound::Unbounded,
            Bound::Unbounded,
            store_opts(&opts).set_reverse(false),
            self.access(),
        )?;
        Ok(DocEnumerator::new(iter, Some(keys), opts))
    }
}

fn key_bound(key: Option<&[u8]>, inclusive: bool) -> Bound<Vec<u8>> {
    match key {
        None => Bound::Unbounded,
        Some(key) if inclusive => Bound::Included(key.to_vec()),
        Some(key) => Bound::Excluded(key.to_vec()),
    }
}

fn store_opts(opts: &EnumOptions) -> IterOptions {
    IterOptions::default()
        .set_meta_only(!opts.include_bodies)
        .set_skip_deletes(true)
        .set_reverse(opts.descending)
}

/// Ordered cursor over documents. Owns its underlying store iterator;
/// dropping the enumerator releases it.
pub struct DocEnumerator {
    iter: Option<Iter>,
    // explicit-key-set mode: sorted keys and the next position.
    keys: Option<(Vec<Vec<u8>>, usize)>,
    opts: EnumOptions,
    to_skip: usize,
}

impl DocEnumerator {
    fn new(iter: Iter, keys: Option<Vec<Vec<u8>>>, opts: EnumOptions) -> DocEnumerator {
        DocEnumerator {
            iter: Some(iter),
            keys: keys.map(|keys| (keys, 0)),
            opts,
            to_skip: opts.skip,
        }
    }

    /// Next document passing the filters, or None once exhausted. The
    /// enumerator closes itself at the end.
    pub fn next_document(&mut self) -> Result<Option<Doc>> {
        loop {
            let (record, synthetic) = match self.advance() {
                Some(found) => found,
                None => {
                    self.close();
                    return Ok(None);
                }
            };
            let doc = match synthetic {
                // absent id: an empty handle, exempt from filtering.
                true => Doc::new(&record.key),
                false => Doc::from_record(&record)?,
            };
            if !synthetic {
                if !self.opts.include_deleted && doc.is_deleted() {
                    continue;
                }
                if !self.opts.include_non_conflicted && !doc.is_conflicted() {
                    continue;
                }
            }
            if self.to_skip > 0 {
                self.to_skip -= 1;
                continue;
            }
            return Ok(Some(doc));
        }
    }

    /// Release the underlying iterator early.
    pub fn close(&mut self) {
        self.iter = None;
    }

    // Next raw record: (record, synthetic-for-missing-key).
    fn advance(&mut self) -> Option<(Record, bool)> {
        let iter = self.iter.as_mut()?;
        match &mut self.keys {
            Some((keys, cursor)) => {
                if *cursor >= keys.len() {
                    return None;
                }
                let key = keys[*cursor].clone();
                *cursor += 1;
                if iter.seek(&key) {
                    if let Some(record) = iter.next() {
                        if record.key == key {
                            return Some((record, false));
                        }
                    }
                }
                Some((Record::empty(DOC_STORE, &key), true))
            }
            None => iter.next().map(|record| (record, false)),
        }
    }
}

impl Iterator for DocEnumerator {
    type Item = Result<Doc>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_document().transpose()
    }
}

#[cfg(test)]
#[path = "enumerate_test.rs"]
mod enumerate_test;
