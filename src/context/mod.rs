//! Two-level vocabulary lookup used to compact and expand entity and attribute names.

mod vocabulary;

pub use vocabulary::{NameResolver, VocabularyContext};
