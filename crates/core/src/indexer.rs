//! Field indexers: turn records and query arguments into byte-comparable keys
//!
//! Every indexer offers three encoders:
//! - `from_object`: the key a record is stored under (`None` = value missing)
//! - `from_args`: the exact key a query looks up
//! - `prefix_from_args`: the key prefix a prefix query scans
//!
//! Keys compare bytewise, so every encoding here preserves the natural order of
//! the field. Variable-length components end with a `0x00` terminator, which
//! keeps `"foo"` from matching `"foobar"` in an exact lookup; the prefix encoder
//! strips the final terminator to allow partial matches.

use crate::error::IndexerError;
use crate::query::Arg;
use std::any::Any;
use std::marker::PhantomData;
use uuid::Uuid;

/// Result of an indexer encoder
pub type KeyResult<T> = std::result::Result<T, IndexerError>;

const TERMINATOR: u8 = 0x00;

/// Typed key encoder for records of type `T`
pub trait Indexer<T>: Send + Sync + 'static {
    /// Key for `record`, or `None` if the indexed value is missing
    fn from_object(&self, record: &T) -> KeyResult<Option<Vec<u8>>>;

    /// Exact lookup key for the query arguments
    fn from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>>;

    /// Prefix lookup key for the query arguments
    fn prefix_from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        self.from_args(args)
    }
}

/// Object-safe, type-erased indexer used by the storage layer
pub trait ErasedIndexer: Send + Sync {
    /// Key for a type-erased record
    fn from_object(&self, record: &(dyn Any + Send + Sync)) -> KeyResult<Option<Vec<u8>>>;
    /// Exact lookup key
    fn from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>>;
    /// Prefix lookup key
    fn prefix_from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>>;
}

/// Adapter from [`Indexer<T>`] to [`ErasedIndexer`]
pub(crate) struct Erased<T, I> {
    inner: I,
    _record: PhantomData<fn(&T)>,
}

impl<T, I> Erased<T, I> {
    pub(crate) fn new(inner: I) -> Self {
        Self {
            inner,
            _record: PhantomData,
        }
    }
}

impl<T, I> ErasedIndexer for Erased<T, I>
where
    T: Any + Send + Sync,
    I: Indexer<T>,
{
    fn from_object(&self, record: &(dyn Any + Send + Sync)) -> KeyResult<Option<Vec<u8>>> {
        let record = record
            .downcast_ref::<T>()
            .ok_or(IndexerError::WrongRecordType(std::any::type_name::<T>()))?;
        self.inner.from_object(record)
    }

    fn from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        self.inner.from_args(args)
    }

    fn prefix_from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        self.inner.prefix_from_args(args)
    }
}

fn single(args: &[Arg]) -> KeyResult<&Arg> {
    match args {
        [arg] => Ok(arg),
        _ => Err(IndexerError::ArgumentCount {
            expected: "1".to_string(),
            got: args.len(),
        }),
    }
}

fn type_error(position: usize, expected: &'static str, got: &Arg) -> IndexerError {
    IndexerError::ArgumentType {
        position,
        expected,
        got: got.kind(),
    }
}

fn push_terminated(out: &mut Vec<u8>, value: &str, lowercase: bool) -> KeyResult<()> {
    if value.as_bytes().contains(&TERMINATOR) {
        return Err(IndexerError::InvalidValue(
            "string contains a NUL byte".to_string(),
        ));
    }
    if lowercase {
        out.extend_from_slice(value.to_lowercase().as_bytes());
    } else {
        out.extend_from_slice(value.as_bytes());
    }
    out.push(TERMINATOR);
    Ok(())
}

fn strip_terminator(mut key: Vec<u8>) -> Vec<u8> {
    if key.last() == Some(&TERMINATOR) {
        key.pop();
    }
    key
}

// ============================================================================
// String
// ============================================================================

type StrField<T> = Box<dyn Fn(&T) -> &str + Send + Sync>;

/// Indexes a string field; an empty string counts as missing
pub struct StringFieldIndex<T> {
    field: StrField<T>,
    lowercase: bool,
}

impl<T> StringFieldIndex<T> {
    /// Index the string returned by `field`
    pub fn new<F>(field: F) -> Self
    where
        F: Fn(&T) -> &str + Send + Sync + 'static,
    {
        Self {
            field: Box::new(field),
            lowercase: false,
        }
    }

    /// Fold keys and arguments to lowercase
    pub fn lowercase(mut self) -> Self {
        self.lowercase = true;
        self
    }
}

impl<T: 'static> Indexer<T> for StringFieldIndex<T> {
    fn from_object(&self, record: &T) -> KeyResult<Option<Vec<u8>>> {
        let value = (self.field)(record);
        if value.is_empty() {
            return Ok(None);
        }
        let mut key = Vec::with_capacity(value.len() + 1);
        push_terminated(&mut key, value, self.lowercase)?;
        Ok(Some(key))
    }

    fn from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        match single(args)? {
            Arg::Str(s) => {
                let mut key = Vec::with_capacity(s.len() + 1);
                push_terminated(&mut key, s, self.lowercase)?;
                Ok(key)
            }
            other => Err(type_error(0, "string", other)),
        }
    }

    fn prefix_from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        self.from_args(args).map(strip_terminator)
    }
}

// ============================================================================
// Compound string
// ============================================================================

/// Indexes several string fields as one key, each component terminated
///
/// The record is missing from the index only when every component is empty.
/// Prefix queries may supply any leading subset of the components.
pub struct CompoundStringIndex<T> {
    fields: Vec<StrField<T>>,
}

impl<T> CompoundStringIndex<T> {
    /// Empty compound index; add components with [`field`](Self::field)
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append a component
    pub fn field<F>(mut self, field: F) -> Self
    where
        F: Fn(&T) -> &str + Send + Sync + 'static,
    {
        self.fields.push(Box::new(field));
        self
    }

    fn encode_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        let mut key = Vec::new();
        for (position, arg) in args.iter().enumerate() {
            match arg {
                Arg::Str(s) => push_terminated(&mut key, s, false)?,
                other => return Err(type_error(position, "string", other)),
            }
        }
        Ok(key)
    }
}

impl<T> Default for CompoundStringIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Indexer<T> for CompoundStringIndex<T> {
    fn from_object(&self, record: &T) -> KeyResult<Option<Vec<u8>>> {
        let values: Vec<&str> = self.fields.iter().map(|f| f(record)).collect();
        if values.iter().all(|v| v.is_empty()) {
            return Ok(None);
        }
        let mut key = Vec::new();
        for value in values {
            push_terminated(&mut key, value, false)?;
        }
        Ok(Some(key))
    }

    fn from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        if args.len() != self.fields.len() {
            return Err(IndexerError::ArgumentCount {
                expected: self.fields.len().to_string(),
                got: args.len(),
            });
        }
        self.encode_args(args)
    }

    fn prefix_from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        if args.is_empty() || args.len() > self.fields.len() {
            return Err(IndexerError::ArgumentCount {
                expected: format!("1..={}", self.fields.len()),
                got: args.len(),
            });
        }
        self.encode_args(args).map(strip_terminator)
    }
}

// ============================================================================
// Integers and booleans
// ============================================================================

/// Indexes a `u64` field as 8 big-endian bytes
pub struct UintFieldIndex<T> {
    field: Box<dyn Fn(&T) -> Option<u64> + Send + Sync>,
}

impl<T> UintFieldIndex<T> {
    /// Index the value returned by `field`
    pub fn new<F>(field: F) -> Self
    where
        F: Fn(&T) -> u64 + Send + Sync + 'static,
    {
        Self {
            field: Box::new(move |record| Some(field(record))),
        }
    }

    /// Index an optional value; `None` counts as missing
    pub fn optional<F>(field: F) -> Self
    where
        F: Fn(&T) -> Option<u64> + Send + Sync + 'static,
    {
        Self {
            field: Box::new(field),
        }
    }
}

impl<T: 'static> Indexer<T> for UintFieldIndex<T> {
    fn from_object(&self, record: &T) -> KeyResult<Option<Vec<u8>>> {
        Ok((self.field)(record).map(|v| v.to_be_bytes().to_vec()))
    }

    fn from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        match single(args)? {
            Arg::Uint(v) => Ok(v.to_be_bytes().to_vec()),
            other => Err(type_error(0, "uint", other)),
        }
    }
}

fn encode_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ (1 << 63)).to_be_bytes()
}

/// Indexes an `i64` field; negative values sort before positive ones
pub struct IntFieldIndex<T> {
    field: Box<dyn Fn(&T) -> i64 + Send + Sync>,
}

impl<T> IntFieldIndex<T> {
    /// Index the value returned by `field`
    pub fn new<F>(field: F) -> Self
    where
        F: Fn(&T) -> i64 + Send + Sync + 'static,
    {
        Self {
            field: Box::new(field),
        }
    }
}

impl<T: 'static> Indexer<T> for IntFieldIndex<T> {
    fn from_object(&self, record: &T) -> KeyResult<Option<Vec<u8>>> {
        Ok(Some(encode_i64((self.field)(record)).to_vec()))
    }

    fn from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        match single(args)? {
            Arg::Int(v) => Ok(encode_i64(*v).to_vec()),
            other => Err(type_error(0, "int", other)),
        }
    }
}

/// Indexes a `bool` field as a single byte
pub struct BoolFieldIndex<T> {
    field: Box<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> BoolFieldIndex<T> {
    /// Index the value returned by `field`
    pub fn new<F>(field: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            field: Box::new(field),
        }
    }
}

impl<T: 'static> Indexer<T> for BoolFieldIndex<T> {
    fn from_object(&self, record: &T) -> KeyResult<Option<Vec<u8>>> {
        Ok(Some(vec![u8::from((self.field)(record))]))
    }

    fn from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        match single(args)? {
            Arg::Bool(v) => Ok(vec![u8::from(*v)]),
            other => Err(type_error(0, "bool", other)),
        }
    }
}

// ============================================================================
// UUID
// ============================================================================

/// Indexes a UUID field as its 16 raw bytes; the nil UUID counts as missing
///
/// Arguments may be a [`Uuid`] or its string form. Prefix arguments may also
/// be a hex prefix of the string form, with or without hyphens.
pub struct UuidFieldIndex<T> {
    field: Box<dyn Fn(&T) -> Uuid + Send + Sync>,
}

impl<T> UuidFieldIndex<T> {
    /// Index the UUID returned by `field`
    pub fn new<F>(field: F) -> Self
    where
        F: Fn(&T) -> Uuid + Send + Sync + 'static,
    {
        Self {
            field: Box::new(field),
        }
    }
}

fn parse_hex_prefix(s: &str) -> KeyResult<Vec<u8>> {
    let hex: Vec<u8> = s.bytes().filter(|b| *b != b'-').collect();
    if hex.len() % 2 != 0 || hex.len() > 32 {
        return Err(IndexerError::InvalidValue(format!(
            "uuid prefix {s:?} must have an even number of hex digits, at most 32"
        )));
    }
    hex.chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(|| IndexerError::InvalidValue(format!("invalid hex in {s:?}")))
        })
        .collect()
}

impl<T: 'static> Indexer<T> for UuidFieldIndex<T> {
    fn from_object(&self, record: &T) -> KeyResult<Option<Vec<u8>>> {
        let id = (self.field)(record);
        if id.is_nil() {
            return Ok(None);
        }
        Ok(Some(id.as_bytes().to_vec()))
    }

    fn from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        match single(args)? {
            Arg::Uuid(id) => Ok(id.as_bytes().to_vec()),
            Arg::Str(s) => Uuid::parse_str(s)
                .map(|id| id.as_bytes().to_vec())
                .map_err(|e| IndexerError::InvalidValue(format!("invalid uuid {s:?}: {e}"))),
            other => Err(type_error(0, "uuid", other)),
        }
    }

    fn prefix_from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        match single(args)? {
            Arg::Uuid(id) => Ok(id.as_bytes().to_vec()),
            Arg::Str(s) => parse_hex_prefix(s),
            other => Err(type_error(0, "uuid", other)),
        }
    }
}

// ============================================================================
// Closure-backed
// ============================================================================

type ArgsEncoder = Box<dyn Fn(&[Arg]) -> KeyResult<Vec<u8>> + Send + Sync>;

/// Indexer assembled from closures, for key shapes the stock indexers miss
pub struct FnIndex<T> {
    object: Box<dyn Fn(&T) -> Option<Vec<u8>> + Send + Sync>,
    args: ArgsEncoder,
    prefix: Option<ArgsEncoder>,
}

impl<T> FnIndex<T> {
    /// Build from a record encoder and an argument encoder
    ///
    /// Keys must be byte-comparable; prefix queries reuse `args` unless
    /// [`with_prefix`](Self::with_prefix) is set.
    pub fn new<O, A>(object: O, args: A) -> Self
    where
        O: Fn(&T) -> Option<Vec<u8>> + Send + Sync + 'static,
        A: Fn(&[Arg]) -> KeyResult<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            object: Box::new(object),
            args: Box::new(args),
            prefix: None,
        }
    }

    /// Dedicated prefix encoder
    pub fn with_prefix<P>(mut self, prefix: P) -> Self
    where
        P: Fn(&[Arg]) -> KeyResult<Vec<u8>> + Send + Sync + 'static,
    {
        self.prefix = Some(Box::new(prefix));
        self
    }
}

impl<T: 'static> Indexer<T> for FnIndex<T> {
    fn from_object(&self, record: &T) -> KeyResult<Option<Vec<u8>>> {
        Ok((self.object)(record))
    }

    fn from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        (self.args)(args)
    }

    fn prefix_from_args(&self, args: &[Arg]) -> KeyResult<Vec<u8>> {
        match &self.prefix {
            Some(prefix) => prefix(args),
            None => (self.args)(args),
        }
    }
}
