mod repository;
mod schema;

pub use repository::{Repository, StoredItem};

/// Outcome of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Inserted<T> {
    New(T),
    AlreadyExists,
}

impl<T> Inserted<T> {
    pub fn is_new(&self) -> bool {
        matches!(self, Inserted::New(_))
    }
}
