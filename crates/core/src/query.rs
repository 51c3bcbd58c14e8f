//! Queries: an index name bound to an ordered argument list
//!
//! A [`Query`] is resolved against one table. Its arguments are handed to the
//! target index's argument encoder, which turns them into the byte key used
//! for the lookup. Prefix queries use the index's prefix encoder instead.

use std::fmt;
use uuid::Uuid;

/// Name of the mandatory primary index
pub const ID_INDEX: &str = "id";
/// Conventional name of the `<namespace, name>` compound index
pub const NAME_INDEX: &str = "name";
/// Conventional name of the namespace index
pub const NAMESPACE_INDEX: &str = "namespace";
/// Conventional name of the integer identity index
pub const IDENTITY_INDEX: &str = "identity";

/// A single query argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// String argument
    Str(String),
    /// Unsigned integer argument
    Uint(u64),
    /// Signed integer argument
    Int(i64),
    /// Boolean argument
    Bool(bool),
    /// UUID argument
    Uuid(Uuid),
    /// Raw bytes, for custom `FnIndex` argument encoders
    Bytes(Vec<u8>),
}

impl Arg {
    /// Short kind name, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Arg::Str(_) => "string",
            Arg::Uint(_) => "uint",
            Arg::Int(_) => "int",
            Arg::Bool(_) => "bool",
            Arg::Uuid(_) => "uuid",
            Arg::Bytes(_) => "bytes",
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(s)
    }
}

impl From<u64> for Arg {
    fn from(v: u64) -> Self {
        Arg::Uint(v)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

impl From<Uuid> for Arg {
    fn from(v: Uuid) -> Self {
        Arg::Uuid(v)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Self {
        Arg::Bytes(v)
    }
}

/// A lookup against one named index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    index: String,
    args: Vec<Arg>,
    prefix: bool,
    scan: bool,
}

impl Query {
    /// Exact-match query on `index`
    pub fn new<I, A>(index: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Self {
            index: index.into(),
            args: args.into_iter().map(Into::into).collect(),
            prefix: false,
            scan: false,
        }
    }

    /// Query matching every entry of `index`, in index order
    pub fn all(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            args: Vec::new(),
            prefix: false,
            scan: true,
        }
    }

    /// Turn this into a prefix query
    ///
    /// The arguments are encoded with the index's prefix encoder, so a
    /// compound index accepts fewer arguments and string indexes match any
    /// value starting with the given string.
    pub fn prefix(mut self) -> Self {
        self.prefix = true;
        self
    }

    /// Target index name
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Query arguments
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Whether this is a prefix query
    pub fn is_prefix(&self) -> bool {
        self.prefix
    }

    /// Whether this query scans the whole index
    ///
    /// Only [`Query::all`] does; an empty argument list passed to
    /// [`Query::new`] is still encoded and rejected by the indexer.
    pub fn is_scan(&self) -> bool {
        self.scan
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)?;
        if self.scan {
            return write!(f, "[*]");
        }
        if self.prefix {
            write!(f, "_prefix")?;
        }
        write!(f, "{:?}", self.args)
    }
}

/// Look up a record by `<namespace, name>`
pub fn by_name(namespace: &str, name: &str) -> Query {
    Query::new(NAME_INDEX, [namespace, name])
}

/// All records in a namespace
pub fn by_namespace(namespace: &str) -> Query {
    Query::new(NAMESPACE_INDEX, [namespace])
}

/// Look up a record by its primary id
pub fn by_id(id: Uuid) -> Query {
    Query::new(ID_INDEX, [id])
}

/// All records carrying an integer identity
pub fn by_identity(identity: u64) -> Query {
    Query::new(IDENTITY_INDEX, [identity])
}
