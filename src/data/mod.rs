//! Module implement the compact binary value format for document bodies.
//!
//! Values are encoded as a one-byte type code followed by a fixed-width or
//! varint-sized payload. The format is self-describing and forward-walkable:
//! given the start of a value, [Value::next_offset] computes the byte just
//! past it without allocating, so containers never need a length prefix for
//! their children.
//!
//! Strings have three physical forms. An inline string is a varint length
//! followed by raw bytes. When a shareable string repeats, the writer
//! rewrites the first occurrence's type code from `string` to `sharedString`
//! and encodes every repeat as a `sharedStringRef` carrying the byte delta
//! back to the first occurrence. Strings known out-of-band to both producer
//! and consumer can instead live in an [ExternStrings] table and be encoded
//! as a bare index.
//!
//! Dictionaries carry a hash index: one 16-bit hash per entry, stored ahead
//! of the key/value pairs, so lookups scan two-byte words instead of
//! decoding every key. See [Dict::get].

use std::collections::HashMap;

mod value;
mod writer;

pub use value::{Array, ArrayIter, Dict, DictIter, Value, ValueType};
pub use writer::Writer;

// Wire type codes, one per encoded value.
pub(crate) const TAG_NULL: u8 = 0;
pub(crate) const TAG_FALSE: u8 = 1;
pub(crate) const TAG_TRUE: u8 = 2;
pub(crate) const TAG_INT8: u8 = 3;
pub(crate) const TAG_INT16: u8 = 4;
pub(crate) const TAG_INT32: u8 = 5;
pub(crate) const TAG_INT64: u8 = 6;
pub(crate) const TAG_UINT64: u8 = 7;
pub(crate) const TAG_FLOAT32: u8 = 8;
pub(crate) const TAG_FLOAT64: u8 = 9;
pub(crate) const TAG_DATE: u8 = 10;
pub(crate) const TAG_STRING: u8 = 11;
pub(crate) const TAG_SHARED_STRING: u8 = 12;
pub(crate) const TAG_SHARED_STRING_REF: u8 = 13;
pub(crate) const TAG_EXTERN_STRING_REF: u8 = 14;
pub(crate) const TAG_RAW_NUMBER: u8 = 15;
pub(crate) const TAG_DATA: u8 = 16;
pub(crate) const TAG_ARRAY: u8 = 17;
pub(crate) const TAG_DICT: u8 = 18;

/// Strings shorter than this are cheaper inline than as a reference.
pub const MIN_SHARED_STRING_LEN: usize = 4;
/// Strings longer than this are not worth tracking in the writer's table.
pub const MAX_SHARED_STRING_LEN: usize = 100;

/// Table of well-known strings agreed upon out-of-band.
///
/// The writer encodes a matching string as its index in this table; a reader
/// holding the same table resolves the index back to bytes. Indexes are the
/// zero-based positions in the `strings` vector, writer and reader must be
/// constructed from identical tables.
#[derive(Clone, Debug, Default)]
pub struct ExternStrings {
    strings: Vec<Vec<u8>>,
    index: HashMap<Vec<u8>, u32>,
}

impl ExternStrings {
    pub fn new<I, T>(iter: I) -> ExternStrings
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let strings: Vec<Vec<u8>> = iter.into_iter().map(|s| s.as_ref().to_vec()).collect();
        let index = strings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i as u32))
            .collect();
        ExternStrings { strings, index }
    }

    /// Writer side: index for a string, if it is in the table.
    pub fn index_of(&self, s: &[u8]) -> Option<u32> {
        self.index.get(s).copied()
    }

    /// Reader side: string at `index`, if within the table.
    pub fn get(&self, index: u64) -> Option<&[u8]> {
        use std::convert::TryFrom;

        let index = usize::try_from(index).ok()?;
        self.strings.get(index).map(|s| s.as_slice())
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
