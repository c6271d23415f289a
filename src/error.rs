//! Closed error-kind enum shared by every layer of the storage core.
//!
//! Each layer propagates errors from the layer below unchanged: the Pager
//! never rewrites a B-tree error and the B-tree never rewrites a DBM error.
//! `anyhow` is used only at the binary/test edges for convenient
//! `?`-propagation over this type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("out of memory")]
    NoMemory,

    #[error("invalid page number: {0}")]
    PageNumber(u32),

    #[error("invalid cell index: {0}")]
    CellNumber(i64),

    #[error("corrupt file header")]
    CorruptHeader,

    #[error("key not found")]
    NotFound,

    #[error("duplicate key")]
    Duplicate,

    #[error("API misuse: {0}")]
    Misuse(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
