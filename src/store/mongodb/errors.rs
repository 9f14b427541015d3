//! Error codes the mongodb crate has no constants for.

use mongodb::error::{Error as DbError, ErrorKind, WriteFailure};

pub const DUPLICATE_KEY: i32 = 11000;

/// Return true if the given error is a duplicate key write error.
pub fn is_duplicate_key_error(err: &DbError) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref e)) if e.code == DUPLICATE_KEY
    )
}

/// Return true if a stored document could not be decoded into the expected type.
pub fn is_decode_error(err: &DbError) -> bool {
    matches!(*err.kind, ErrorKind::BsonDeserialization(_))
}
