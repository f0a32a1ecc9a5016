//! Result rows and the lazy iterator that walks a statement's cursor.

mod iterator;
mod row;

pub use iterator::ResultIterator;
pub use row::DbRow;
pub(crate) use row::column_index;
