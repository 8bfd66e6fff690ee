//! Embedded document database with conflict-aware revision trees.
//!
//! Every document is a tree of revisions. Concurrent edits, typically fed in
//! by a replicator, grow the tree into multiple branches; the database keeps
//! all of them, deterministically picks a current revision, and flags the
//! document as conflicted until one branch is tombstoned. Each persisted
//! write is stamped with a file-wide monotonic sequence number, which is what
//! change feeds iterate over.
//!
//! The crate is organised bottom up:
//!
//! * [util] - varint and hashing primitives shared by the formats.
//! * [data] - the compact self-describing binary value format used to encode
//!   document bodies, with shared-string and extern-string references.
//! * [store] - the backing key/value store contract, [store::KvStore], and
//!   its append-only-log implementation [store::Alog].
//! * [doc] - revision trees and their persisted document form.
//! * [db] - [db::Database]: transactions, raw documents, enumerators.
//!
//! Writes happen inside a transaction and there is at most one transaction
//! per file at a time, across all handles and threads. Refer to
//! [db::Database::begin_transaction] for the locking discipline.

#![deny(rust_2018_idioms)]

/// Short form to compose Error values.
///
/// Here are few possible ways:
///
/// ```ignore
/// use crate::Error;
/// err_at!(TruncatedInput, msg: "short buffer {}", n);
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, fd.read(&mut buf));
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, fd.read(&mut buf), "reading {:?}", file);
/// ```
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("at {}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("at {}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("at {}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

pub mod data;
pub mod db;
pub mod doc;
mod error;
pub mod store;
pub mod util;

pub use crate::error::Error;

/// Type alias for Result return type, used by this package.
pub type Result<T> = std::result::Result<T, Error>;
