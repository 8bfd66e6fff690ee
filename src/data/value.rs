//! Borrowed, zero-copy reader over encoded values.

use std::convert::TryFrom;

use crate::{
    data::{self, ExternStrings},
    util, Error, Result,
};

/// Broad classification of an encoded value, one per family of type codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueType {
    Null,
    Bool,
    Number,
    String,
    Data,
    Array,
    Dict,
}

/// A single encoded value, borrowed from its enclosing buffer.
///
/// The value keeps the whole buffer and its own offset within it, because
/// shared-string references reach backward across sibling values. Accessors
/// are non-destructive, every read is bounds checked.
#[derive(Clone, Copy, Debug)]
pub struct Value<'a> {
    buf: &'a [u8],
    off: usize,
    code: u8,
}

impl<'a> Value<'a> {
    /// Decode the value starting at the front of `buf`.
    pub fn decode(buf: &'a [u8]) -> Result<Value<'a>> {
        Value::at(buf, 0)
    }

    // A value at an arbitrary offset within `buf`.
    pub(crate) fn at(buf: &'a [u8], off: usize) -> Result<Value<'a>> {
        match buf.get(off) {
            Some(&code) if code <= data::TAG_DICT => Ok(Value { buf, off, code }),
            Some(&code) => err_at!(BadTypeCode, msg: "type code {} at {}", code, off),
            None => err_at!(TruncatedInput, msg: "value at {}/{}", off, buf.len()),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self.code {
            data::TAG_NULL => ValueType::Null,
            data::TAG_FALSE | data::TAG_TRUE => ValueType::Bool,
            data::TAG_INT8..=data::TAG_DATE | data::TAG_RAW_NUMBER => ValueType::Number,
            data::TAG_STRING..=data::TAG_EXTERN_STRING_REF => ValueType::String,
            data::TAG_DATA => ValueType::Data,
            data::TAG_ARRAY => ValueType::Array,
            _ => ValueType::Dict,
        }
    }

    // Varint parameter following the type code. Return (value, offset just
    // past the varint).
    fn param(&self) -> Result<(u64, usize)> {
        let start = self.off + 1;
        match self.buf.get(start..) {
            Some(src) => {
                let (param, n) = util::get_uvarint(src)?;
                Ok((param, start + n))
            }
            None => err_at!(TruncatedInput, msg: "param at {}/{}", start, self.buf.len()),
        }
    }

    // Fixed-width little-endian payload following the type code.
    fn fixed<const N: usize>(&self) -> Result<[u8; N]> {
        let start = self.off + 1;
        match self.buf.get(start..start + N) {
            Some(bytes) => {
                let mut out = [0; N];
                out.copy_from_slice(bytes);
                Ok(out)
            }
            None => {
                err_at!(TruncatedInput, msg: "need {} bytes at {}/{}", N, start, self.buf.len())
            }
        }
    }

    /// Offset just past this value's encoded bytes. Arrays and dicts are
    /// walked child by child, everything else is O(1).
    pub fn next_offset(&self) -> Result<usize> {
        let after_code = self.off + 1;
        let end = match self.code {
            data::TAG_NULL | data::TAG_FALSE | data::TAG_TRUE => after_code,
            data::TAG_INT8 => after_code + 1,
            data::TAG_INT16 => after_code + 2,
            data::TAG_INT32 | data::TAG_FLOAT32 => after_code + 4,
            data::TAG_INT64 | data::TAG_UINT64 | data::TAG_FLOAT64 => after_code + 8,
            data::TAG_DATE | data::TAG_SHARED_STRING_REF | data::TAG_EXTERN_STRING_REF => {
                let (_, end) = self.param()?;
                end
            }
            data::TAG_STRING
            | data::TAG_SHARED_STRING
            | data::TAG_RAW_NUMBER
            | data::TAG_DATA => {
                let (len, end) = self.param()?;
                let len = err_at!(FailConvert, usize::try_from(len))?;
                match end.checked_add(len) {
                    Some(end) => end,
                    None => return err_at!(TruncatedInput, msg: "length {} overflows", len),
                }
            }
            data::TAG_ARRAY => {
                let (count, mut cursor) = self.param()?;
                for _ in 0..count {
                    cursor = Value::at(self.buf, cursor)?.next_offset()?;
                }
                cursor
            }
            data::TAG_DICT => {
                let (count, hash_end) = self.param()?;
                let count = err_at!(FailConvert, usize::try_from(count))?;
                let mut cursor = match count
                    .checked_mul(2)
                    .and_then(|words| hash_end.checked_add(words))
                {
                    Some(cursor) => cursor,
                    None => return err_at!(TruncatedInput, msg: "count {} overflows", count),
                };
                for _ in 0..(2 * count) {
                    cursor = Value::at(self.buf, cursor)?.next_offset()?;
                }
                cursor
            }
            _ => unreachable!(),
        };
        if end > self.buf.len() {
            err_at!(TruncatedInput, msg: "value ends at {}/{}", end, self.buf.len())
        } else {
            Ok(end)
        }
    }

    pub fn is_null(&self) -> bool {
        self.code == data::TAG_NULL
    }

    /// Truthiness: null and false are false, numbers are `!= 0`, every
    /// other value is true.
    pub fn as_bool(&self) -> bool {
        match self.code {
            data::TAG_NULL | data::TAG_FALSE => false,
            data::TAG_TRUE => true,
            data::TAG_INT8..=data::TAG_DATE => self.as_int().map(|i| i != 0).unwrap_or(true),
            _ => true,
        }
    }

    /// Numeric value as signed 64-bit. Bools convert to 0/1, floats
    /// truncate. A `uint64` above `i64::MAX` fails with NumericOverflow.
    pub fn as_int(&self) -> Result<i64> {
        match self.code {
            data::TAG_NULL | data::TAG_FALSE => Ok(0),
            data::TAG_TRUE => Ok(1),
            data::TAG_INT8 => Ok(i64::from(i8::from_le_bytes(self.fixed::<1>()?))),
            data::TAG_INT16 => Ok(i64::from(i16::from_le_bytes(self.fixed::<2>()?))),
            data::TAG_INT32 => Ok(i64::from(i32::from_le_bytes(self.fixed::<4>()?))),
            data::TAG_INT64 => Ok(i64::from_le_bytes(self.fixed::<8>()?)),
            data::TAG_UINT64 => {
                let u = u64::from_le_bytes(self.fixed::<8>()?);
                match i64::try_from(u) {
                    Ok(i) => Ok(i),
                    Err(_) => err_at!(NumericOverflow, msg: "uint64 {} as signed", u),
                }
            }
            data::TAG_FLOAT32 => Ok(f32::from_le_bytes(self.fixed::<4>()?) as i64),
            data::TAG_FLOAT64 => Ok(f64::from_le_bytes(self.fixed::<8>()?) as i64),
            data::TAG_DATE => self.as_date().map(|d| d as i64),
            _ => err_at!(FailConvert, msg: "type code {} is not a number", self.code),
        }
    }

    /// Numeric value as unsigned 64-bit, the lossless path for `uint64`.
    pub fn as_uint(&self) -> Result<u64> {
        match self.code {
            data::TAG_UINT64 => Ok(u64::from_le_bytes(self.fixed::<8>()?)),
            _ => match self.as_int()? {
                i if i >= 0 => Ok(i as u64),
                i => err_at!(NumericOverflow, msg: "negative {} as unsigned", i),
            },
        }
    }

    /// Numeric value as 64-bit float. Non-float numerics go through
    /// [Value::as_int].
    pub fn as_float(&self) -> Result<f64> {
        match self.code {
            data::TAG_FLOAT32 => Ok(f64::from(f32::from_le_bytes(self.fixed::<4>()?))),
            data::TAG_FLOAT64 => Ok(f64::from_le_bytes(self.fixed::<8>()?)),
            data::TAG_UINT64 => Ok(self.as_uint()? as f64),
            _ => Ok(self.as_int()? as f64),
        }
    }

    /// Unix seconds carried by a `date` value.
    pub fn as_date(&self) -> Result<u64> {
        match self.code {
            data::TAG_DATE => Ok(self.param()?.0),
            _ => err_at!(FailConvert, msg: "type code {} is not a date", self.code),
        }
    }

    /// The decimal bytes of a `rawNumber`, for callers doing their own
    /// arbitrary-precision parsing.
    pub fn as_raw_number(&self) -> Result<&'a [u8]> {
        match self.code {
            data::TAG_RAW_NUMBER => self.inline_bytes(),
            _ => err_at!(FailConvert, msg: "type code {} is not a raw number", self.code),
        }
    }

    /// String bytes, resolving shared-string references. Extern references
    /// fail with NeedsExternTable, use [Value::as_string_in].
    pub fn as_string(&self) -> Result<&'a [u8]> {
        self.resolve_string(None)
    }

    /// String bytes, resolving both shared and extern references.
    pub fn as_string_in(&self, table: &'a ExternStrings) -> Result<&'a [u8]> {
        self.resolve_string(Some(table))
    }

    fn resolve_string(&self, table: Option<&'a ExternStrings>) -> Result<&'a [u8]> {
        match self.code {
            data::TAG_STRING | data::TAG_SHARED_STRING => self.inline_bytes(),
            data::TAG_SHARED_STRING_REF => {
                let (delta, _) = self.param()?;
                let delta = err_at!(FailConvert, usize::try_from(delta))?;
                if delta == 0 || delta > self.off {
                    return err_at!(
                        SharedStringRefTargetNotString,
                        msg: "delta {} from {}", delta, self.off
                    );
                }
                let target = Value::at(self.buf, self.off - delta)?;
                match target.code {
                    data::TAG_STRING | data::TAG_SHARED_STRING => target.inline_bytes(),
                    code => err_at!(
                        SharedStringRefTargetNotString,
                        msg: "target code {} at {}", code, self.off - delta
                    ),
                }
            }
            data::TAG_EXTERN_STRING_REF => {
                let (index, _) = self.param()?;
                match table {
                    Some(table) => match table.get(index) {
                        Some(s) => Ok(s),
                        None => err_at!(
                            NeedsExternTable,
                            msg: "extern index {} outside table of {}", index, table.len()
                        ),
                    },
                    None => err_at!(NeedsExternTable, msg: "extern index {}", index),
                }
            }
            _ => err_at!(FailConvert, msg: "type code {} is not a string", self.code),
        }
    }

    /// Index carried by an `externStringRef` value.
    pub fn extern_string_index(&self) -> Result<u64> {
        match self.code {
            data::TAG_EXTERN_STRING_REF => Ok(self.param()?.0),
            _ => err_at!(FailConvert, msg: "type code {} is not extern", self.code),
        }
    }

    /// Blob bytes of a `data` value.
    pub fn as_data(&self) -> Result<&'a [u8]> {
        match self.code {
            data::TAG_DATA => self.inline_bytes(),
            _ => err_at!(FailConvert, msg: "type code {} is not data", self.code),
        }
    }

    pub fn as_array(&self) -> Result<Array<'a>> {
        match self.code {
            data::TAG_ARRAY => {
                let (count, first) = self.param()?;
                Ok(Array { value: *self, count, first })
            }
            _ => err_at!(FailConvert, msg: "type code {} is not an array", self.code),
        }
    }

    pub fn as_dict(&self) -> Result<Dict<'a>> {
        match self.code {
            data::TAG_DICT => {
                let (count, hash_off) = self.param()?;
                let count = err_at!(FailConvert, usize::try_from(count))?;
                let first_key = match count
                    .checked_mul(2)
                    .and_then(|words| hash_off.checked_add(words))
                {
                    Some(first_key) => first_key,
                    None => {
                        return err_at!(TruncatedInput, msg: "count {} overflows", count)
                    }
                };
                if first_key > self.buf.len() {
                    return err_at!(
                        TruncatedInput,
                        msg: "dict index ends at {}/{}", first_key, self.buf.len()
                    );
                }
                Ok(Dict { value: *self, count, hash_off, first_key })
            }
            _ => err_at!(FailConvert, msg: "type code {} is not a dict", self.code),
        }
    }

    // Varint length followed by that many raw bytes.
    fn inline_bytes(&self) -> Result<&'a [u8]> {
        let (len, start) = self.param()?;
        let len = err_at!(FailConvert, usize::try_from(len))?;
        let bytes = start
            .checked_add(len)
            .and_then(|end| self.buf.get(start..end));
        match bytes {
            Some(bytes) => Ok(bytes),
            None => {
                err_at!(TruncatedInput, msg: "{} bytes at {}/{}", len, start, self.buf.len())
            }
        }
    }
}

/// Borrowed view over an encoded array.
#[derive(Clone, Copy, Debug)]
pub struct Array<'a> {
    value: Value<'a>,
    count: u64,
    first: usize,
}

impl<'a> Array<'a> {
    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn iter(&self) -> ArrayIter<'a> {
        ArrayIter { buf: self.value.buf, cursor: self.first, remaining: self.count }
    }

    /// Value at `index`, walking from the front.
    pub fn get(&self, index: usize) -> Result<Option<Value<'a>>> {
        let mut iter = self.iter();
        for _ in 0..index {
            match iter.next() {
                Some(item) => {
                    item?;
                }
                None => return Ok(None),
            }
        }
        iter.next().transpose()
    }
}

pub struct ArrayIter<'a> {
    buf: &'a [u8],
    cursor: usize,
    remaining: u64,
}

impl<'a> Iterator for ArrayIter<'a> {
    type Item = Result<Value<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match Value::at(self.buf, self.cursor) {
            Ok(value) => match value.next_offset() {
                Ok(end) => {
                    self.cursor = end;
                    Some(Ok(value))
                }
                Err(err) => {
                    self.remaining = 0;
                    Some(Err(err))
                }
            },
            Err(err) => {
                self.remaining = 0;
                Some(Err(err))
            }
        }
    }
}

/// Borrowed view over an encoded dictionary.
#[derive(Clone, Copy, Debug)]
pub struct Dict<'a> {
    value: Value<'a>,
    count: usize,
    hash_off: usize,
    first_key: usize,
}

impl<'a> Dict<'a> {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Value stored under `key`, or None. Keys encoded as extern references
    /// fail with NeedsExternTable, use [Dict::get_in].
    pub fn get(&self, key: &[u8]) -> Result<Option<Value<'a>>> {
        self.lookup(key, None)
    }

    /// Value stored under `key`, resolving extern keys through `table`.
    pub fn get_in(&self, key: &[u8], table: &'a ExternStrings) -> Result<Option<Value<'a>>> {
        self.lookup(key, Some(table))
    }

    // Scan the hash index; only decode keys at matching slots, advancing a
    // forward cursor since values are not random-access.
    fn lookup(&self, key: &[u8], table: Option<&'a ExternStrings>) -> Result<Option<Value<'a>>> {
        let hash = util::hash16(key);
        let buf = self.value.buf;

        let mut key_index = 0;
        let mut key_value = None;
        for i in 0..self.count {
            let off = self.hash_off + 2 * i;
            let slot = match buf.get(off..off + 2) {
                Some(w) => u16::from_le_bytes([w[0], w[1]]),
                None => {
                    return err_at!(TruncatedInput, msg: "hash slot {} at {}", i, off);
                }
            };
            if slot != hash {
                continue;
            }
            let mut cursor = match key_value {
                None => Value::at(buf, self.first_key)?,
                Some(kv) => kv,
            };
            while key_index < i {
                let value = Value::at(buf, cursor.next_offset()?)?;
                cursor = Value::at(buf, value.next_offset()?)?;
                key_index += 1;
            }
            key_value = Some(cursor);
            if cursor.resolve_string(table)? == key {
                let value = Value::at(buf, cursor.next_offset()?)?;
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Iterate `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> DictIter<'a> {
        DictIter { buf: self.value.buf, cursor: self.first_key, remaining: self.count }
    }
}

pub struct DictIter<'a> {
    buf: &'a [u8],
    cursor: usize,
    remaining: usize,
}

impl<'a> Iterator for DictIter<'a> {
    type Item = Result<(Value<'a>, Value<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let pair = || -> Result<(Value<'a>, Value<'a>, usize)> {
            let key = Value::at(self.buf, self.cursor)?;
            let value = Value::at(self.buf, key.next_offset()?)?;
            Ok((key, value, value.next_offset()?))
        }();
        match pair {
            Ok((key, value, end)) => {
                self.cursor = end;
                Some(Ok((key, value)))
            }
            Err(err) => {
                self.remaining = 0;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
#[path = "value_test.rs"]
mod value_test;
