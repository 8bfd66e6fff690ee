//! Encoder for the binary value format.

use std::collections::HashMap;

use crate::{
    data::{self, ExternStrings},
    util, Error, Result,
};

// Sentinel for "no dict open", so write_key outside begin_dict is caught.
const NO_DICT: usize = usize::MAX;

/// Single-use encoder, produces one value per instance.
///
/// The output is built in an owned buffer because two features patch bytes
/// already written: repeating a shareable string rewrites the first
/// occurrence's type code, and [Writer::write_key] patches the enclosing
/// dict's reserved hash slot.
///
/// Containers are written by announcing the entry count up front and then
/// writing the children; the writer trusts the announced counts, it does
/// not track arity.
pub struct Writer<'a> {
    out: Vec<u8>,
    // string bytes -> offset of the first occurrence's type code.
    shared: HashMap<Vec<u8>, usize>,
    extern_strings: Option<&'a ExternStrings>,
    // next hash slot to patch in the innermost open dict.
    index_pos: usize,
    saved_index_pos: Vec<usize>,
}

impl<'a> Writer<'a> {
    pub fn new() -> Writer<'a> {
        Writer {
            out: Vec::default(),
            shared: HashMap::default(),
            extern_strings: None,
            index_pos: NO_DICT,
            saved_index_pos: Vec::default(),
        }
    }

    /// Writer that encodes strings found in `table` as extern references.
    pub fn with_extern(table: &'a ExternStrings) -> Writer<'a> {
        let mut writer = Writer::new();
        writer.extern_strings = Some(table);
        writer
    }

    /// Finish and take the encoded bytes. Fails if a dict is still open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.index_pos != NO_DICT || !self.saved_index_pos.is_empty() {
            err_at!(Fatal, msg: "unbalanced begin_dict/end_dict")
        } else {
            Ok(self.out)
        }
    }

    pub fn write_null(&mut self) {
        self.out.push(data::TAG_NULL);
    }

    pub fn write_bool(&mut self, b: bool) {
        self.out.push(if b { data::TAG_TRUE } else { data::TAG_FALSE });
    }

    /// Integer at the smallest signed width that fits.
    pub fn write_int(&mut self, i: i64) {
        if i >= i64::from(i8::MIN) && i <= i64::from(i8::MAX) {
            self.out.push(data::TAG_INT8);
            self.out.extend_from_slice(&(i as i8).to_le_bytes());
        } else if i >= i64::from(i16::MIN) && i <= i64::from(i16::MAX) {
            self.out.push(data::TAG_INT16);
            self.out.extend_from_slice(&(i as i16).to_le_bytes());
        } else if i >= i64::from(i32::MIN) && i <= i64::from(i32::MAX) {
            self.out.push(data::TAG_INT32);
            self.out.extend_from_slice(&(i as i32).to_le_bytes());
        } else {
            self.out.push(data::TAG_INT64);
            self.out.extend_from_slice(&i.to_le_bytes());
        }
    }

    /// Unsigned integer; values above `i64::MAX` take the distinct
    /// `uint64` encoding.
    pub fn write_uint(&mut self, u: u64) {
        if u <= i64::MAX as u64 {
            self.write_int(u as i64)
        } else {
            self.out.push(data::TAG_UINT64);
            self.out.extend_from_slice(&u.to_le_bytes());
        }
    }

    /// 64-bit float; integral values collapse to the integer encoding.
    pub fn write_float(&mut self, n: f64) {
        if n == (n as i64) as f64 {
            self.write_int(n as i64)
        } else {
            self.out.push(data::TAG_FLOAT64);
            self.out.extend_from_slice(&n.to_le_bytes());
        }
    }

    /// 32-bit float; integral values collapse to the integer encoding.
    pub fn write_float32(&mut self, n: f32) {
        if n == (n as i32) as f32 {
            self.write_int(i64::from(n as i32))
        } else {
            self.out.push(data::TAG_FLOAT32);
            self.out.extend_from_slice(&n.to_le_bytes());
        }
    }

    /// Date as unix seconds.
    pub fn write_date(&mut self, seconds: u64) {
        self.out.push(data::TAG_DATE);
        util::put_uvarint(&mut self.out, seconds);
    }

    /// Decimal bytes carried through without numeric interpretation.
    pub fn write_raw_number(&mut self, digits: &[u8]) {
        self.out.push(data::TAG_RAW_NUMBER);
        util::put_uvarint(&mut self.out, digits.len() as u64);
        self.out.extend_from_slice(digits);
    }

    pub fn write_data(&mut self, bytes: &[u8]) {
        self.out.push(data::TAG_DATA);
        util::put_uvarint(&mut self.out, bytes.len() as u64);
        self.out.extend_from_slice(bytes);
    }

    pub fn write_string(&mut self, s: &[u8]) {
        if let Some(table) = self.extern_strings {
            if let Some(index) = table.index_of(s) {
                self.out.push(data::TAG_EXTERN_STRING_REF);
                util::put_uvarint(&mut self.out, u64::from(index));
                return;
            }
        }

        let shareable = s.len() >= data::MIN_SHARED_STRING_LEN
            && s.len() <= data::MAX_SHARED_STRING_LEN;
        if shareable {
            let cur = self.out.len();
            if let Some(&first) = self.shared.get(s) {
                // Retag the first occurrence as shared and point back at it.
                self.out[first] = data::TAG_SHARED_STRING;
                self.out.push(data::TAG_SHARED_STRING_REF);
                util::put_uvarint(&mut self.out, (cur - first) as u64);
                return;
            }
            self.shared.insert(s.to_vec(), cur);
        }

        self.out.push(data::TAG_STRING);
        util::put_uvarint(&mut self.out, s.len() as u64);
        self.out.extend_from_slice(s);
    }

    /// Announce an array of `count` values; the caller writes exactly that
    /// many values next.
    pub fn begin_array(&mut self, count: u64) {
        self.out.push(data::TAG_ARRAY);
        util::put_uvarint(&mut self.out, count);
    }

    /// Announce a dict of `count` entries and reserve its hash index. The
    /// caller alternates [Writer::write_key] and one value per key, then
    /// closes with [Writer::end_dict].
    pub fn begin_dict(&mut self, count: u64) {
        self.out.push(data::TAG_DICT);
        util::put_uvarint(&mut self.out, count);
        self.saved_index_pos.push(self.index_pos);
        self.index_pos = self.out.len();
        self.out.resize(self.out.len() + 2 * count as usize, 0);
    }

    /// Write an entry's key and patch its hash into the reserved index.
    pub fn write_key(&mut self, key: &[u8]) -> Result<()> {
        if self.index_pos == NO_DICT {
            return err_at!(Fatal, msg: "write_key outside a dict");
        }
        let hash = util::hash16(key).to_le_bytes();
        self.out[self.index_pos..self.index_pos + 2].copy_from_slice(&hash);
        self.index_pos += 2;
        self.write_string(key);
        Ok(())
    }

    pub fn end_dict(&mut self) -> Result<()> {
        match self.saved_index_pos.pop() {
            Some(pos) => {
                self.index_pos = pos;
                Ok(())
            }
            None => err_at!(Fatal, msg: "end_dict without begin_dict"),
        }
    }
}

impl<'a> Default for Writer<'a> {
    fn default() -> Writer<'a> {
        Writer::new()
    }
}

#[cfg(test)]
#[path = "writer_test.rs"]
mod writer_test;
