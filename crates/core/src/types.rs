//! Shared type aliases
//!
//! Records are stored type-erased so one store can hold tables of different
//! Rust types. The erasure never leaks past the typed table handles: they
//! check the table's registered [`TypeId`] before handing out a record.

use std::any::{Any, TypeId};
use std::sync::Arc;

/// A type-erased, shared record
pub type Object = Arc<dyn Any + Send + Sync>;

/// Boxed error returned by user hooks such as the change reflector
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Runtime identity of a record type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordType {
    id: TypeId,
    name: &'static str,
}

impl RecordType {
    /// Identity of `T`
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Type name, for error messages
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Check whether this is the identity of `T`
    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    /// Check whether `record` is of this type
    pub fn matches(&self, record: &(dyn Any + Send + Sync)) -> bool {
        let record: &dyn Any = record;
        record.type_id() == self.id
    }
}

/// Downcast a stored object to `T`
///
/// Returns `None` when the object holds another type.
pub fn downcast<T: Any + Send + Sync>(object: Object) -> Option<Arc<T>> {
    object.downcast::<T>().ok()
}
