use std::{error, fmt, result};

/// Error enumerates over all possible errors that this package shall return.
///
/// Each variant carries a prefix, typically identifying the failing call
/// site, and a human readable message.
#[derive(Clone, Debug)]
pub enum Error {
    /// Requested key is not present in the backing store.
    KeyNotFound(String, String),
    /// Underlying file-system error.
    IOError(String, String),
    /// Backing file failed validation, checksum mismatch or torn record.
    Corruption(String, String),
    /// Mutating operation attempted on a read-only handle.
    ReadOnlyViolation(String, String),
    /// Operation requires an active transaction.
    NotInTransaction(String, String),
    /// File is exclusively held by an ongoing transaction.
    TransactionBusy(String, String),
    /// A write already failed within this transaction, it shall rollback.
    TransactionAborted(String, String),
    /// Inserting the revision would create a branch and the caller did
    /// not allow conflicts.
    Conflict(String, String),
    /// Revision-id is already present in the document's tree.
    RevIDExists(String, String),
    /// Operation is defined only on leaf revisions.
    NotALeaf(String, String),
    /// Revision-id does not name a revision in the document.
    UnknownRevision(String, String),
    /// Encoded value carries an unknown type code.
    BadTypeCode(String, String),
    /// LEB128 sequence is truncated or longer than 10 bytes.
    MalformedVarint(String, String),
    /// Encoded value claims more bytes than the input holds.
    TruncatedInput(String, String),
    /// Value is an extern-string reference and no table was supplied.
    NeedsExternTable(String, String),
    /// Shared-string reference resolves to a non-string value.
    SharedStringRefTargetNotString(String, String),
    /// Unsigned value does not fit the requested signed width.
    NumericOverflow(String, String),
    /// Backing file was created with a different encryption key.
    WrongKey(String, String),
    /// Encryption algorithm is not implemented by this store.
    UnsupportedAlgorithm(String, String),
    /// Invariant breakage, typically a bug in this package.
    Fatal(String, String),
    /// Error converting from one type to another.
    FailConvert(String, String),
    /// Error serializing or deserializing a CBOR record.
    FailCbor(String, String),
    /// File is not a database file, or path is not a file.
    InvalidFile(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            KeyNotFound(p, m) => write!(f, "KeyNotFound:{} {}", p, m),
            IOError(p, m) => write!(f, "IOError:{} {}", p, m),
            Corruption(p, m) => write!(f, "Corruption:{} {}", p, m),
            ReadOnlyViolation(p, m) => write!(f, "ReadOnlyViolation:{} {}", p, m),
            NotInTransaction(p, m) => write!(f, "NotInTransaction:{} {}", p, m),
            TransactionBusy(p, m) => write!(f, "TransactionBusy:{} {}", p, m),
            TransactionAborted(p, m) => write!(f, "TransactionAborted:{} {}", p, m),
            Conflict(p, m) => write!(f, "Conflict:{} {}", p, m),
            RevIDExists(p, m) => write!(f, "RevIDExists:{} {}", p, m),
            NotALeaf(p, m) => write!(f, "NotALeaf:{} {}", p, m),
            UnknownRevision(p, m) => write!(f, "UnknownRevision:{} {}", p, m),
            BadTypeCode(p, m) => write!(f, "BadTypeCode:{} {}", p, m),
            MalformedVarint(p, m) => write!(f, "MalformedVarint:{} {}", p, m),
            TruncatedInput(p, m) => write!(f, "TruncatedInput:{} {}", p, m),
            NeedsExternTable(p, m) => write!(f, "NeedsExternTable:{} {}", p, m),
            SharedStringRefTargetNotString(p, m) => {
                write!(f, "SharedStringRefTargetNotString:{} {}", p, m)
            }
            NumericOverflow(p, m) => write!(f, "NumericOverflow:{} {}", p, m),
            WrongKey(p, m) => write!(f, "WrongKey:{} {}", p, m),
            UnsupportedAlgorithm(p, m) => write!(f, "UnsupportedAlgorithm:{} {}", p, m),
            Fatal(p, m) => write!(f, "Fatal:{} {}", p, m),
            FailConvert(p, m) => write!(f, "FailConvert:{} {}", p, m),
            FailCbor(p, m) => write!(f, "FailCbor:{} {}", p, m),
            InvalidFile(p, m) => write!(f, "InvalidFile:{} {}", p, m),
        }
    }
}

impl error::Error for Error {}

// Call sites and tests match errors by kind, the prefix and message
// are incidental.
impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
