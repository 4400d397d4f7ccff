use crate::hash::Oid;
use crate::obj::ObjType;
use std::fmt::{self, Display, Formatter};

pub type MergeResult<T> = Result<T, MergeGenericError>;
pub type MergeGenericError = anyhow::Error;

// usually anyhow is all we need, but sometimes it's nice to have a "rust"
// representation we can test or match against
#[derive(Debug, PartialEq)]
pub enum MergeError {
    ObjectNotFound(Oid),
    /// object exists but has the wrong kind
    ExpectedType { oid: Oid, expected: ObjType, found: ObjType },
}

pub trait MergeErrorExt {
    fn try_into_merge_error(self) -> MergeResult<MergeError>;
    fn try_into_obj_not_found_err(self) -> MergeResult<Oid>;
}

impl MergeErrorExt for MergeGenericError {
    fn try_into_merge_error(self) -> MergeResult<MergeError> {
        match self.downcast::<MergeError>() {
            Ok(merge_error) => Ok(merge_error),
            Err(cast_failed_err) => Err(cast_failed_err),
        }
    }

    /// tries to convert the generic error into the specific error and just
    /// returns the previous error on failure
    fn try_into_obj_not_found_err(self) -> MergeResult<Oid> {
        match self.try_into_merge_error()? {
            MergeError::ObjectNotFound(oid) => Ok(oid),
            err => Err(anyhow!(err)),
        }
    }
}

pub trait MergeResultExt {
    fn is_not_found_err(&self) -> bool;
}

impl<T> MergeResultExt for MergeResult<T> {
    fn is_not_found_err(&self) -> bool {
        match self {
            Ok(..) => false,
            Err(err) => err.is_not_found_err(),
        }
    }
}

impl MergeResultExt for MergeGenericError {
    fn is_not_found_err(&self) -> bool {
        matches!(self.downcast_ref::<MergeError>(), Some(MergeError::ObjectNotFound(..)))
    }
}

impl Display for MergeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::ObjectNotFound(oid) => write!(f, "object `{}` not found", oid),
            MergeError::ExpectedType { oid, expected, found } =>
                write!(f, "object `{}` is a {}, expected {}", oid, found, expected),
        }
    }
}
