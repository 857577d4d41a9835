//! # Error Kinds
//!
//! RaxDB reports failures as [`eyre::Report`]s so call sites can attach file
//! and operation context with `wrap_err`. The conditions a caller may need to
//! branch on (retrying a conflicted transaction, distinguishing a missing key
//! from an I/O failure) are carried as a typed [`StoreError`] inside the
//! report and recovered with [`StoreError::of`].
//!
//! ## Propagation
//!
//! | Kind                | Raised by                        | Handling                         |
//! |---------------------|----------------------------------|----------------------------------|
//! | NotFound            | index lookup                     | returned to caller               |
//! | NoFreeSpace         | free list reserve                | returned; transaction rolls back |
//! | BoundsViolation     | table read/write                 | returned; bug or corruption      |
//! | DataSizeTooLarge    | table write                      | returned to caller               |
//! | MappingClosed       | write through a superseded mmap  | retried internally               |
//! | ReadOnlyTransaction | set on a view transaction        | returned to caller               |
//! | WriteConflict       | commit conflict check            | returned; caller may retry       |
//!
//! `MappingClosed` never escapes the storage layer; everything else is part
//! of the public surface.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,
    #[error("not enough free space to reserve the requested region")]
    NoFreeSpace,
    #[error("requested offset and size exceed the mapped region")]
    BoundsViolation,
    #[error("record exceeds the maximum growth step")]
    DataSizeTooLarge,
    #[error("mapping has been superseded or closed")]
    MappingClosed,
    #[error("cannot write through a read-only transaction")]
    ReadOnlyTransaction,
    #[error("record was modified by a conflicting transaction")]
    WriteConflict,
}

impl StoreError {
    /// Recovers the typed kind from a report, if one is attached.
    pub fn of(report: &eyre::Report) -> Option<StoreError> {
        report.downcast_ref::<StoreError>().copied()
    }

    /// True if `report` carries exactly this kind.
    pub fn is(self, report: &eyre::Report) -> bool {
        Self::of(report) == Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn kind_survives_wrapping() {
        let err: eyre::Report = StoreError::NotFound.into();
        let wrapped = Err::<(), _>(err)
            .wrap_err("looking up key")
            .unwrap_err();
        assert_eq!(StoreError::of(&wrapped), Some(StoreError::NotFound));
        assert!(StoreError::NotFound.is(&wrapped));
        assert!(!StoreError::WriteConflict.is(&wrapped));
    }

    #[test]
    fn unrelated_report_has_no_kind() {
        let err = eyre::eyre!("plain failure");
        assert_eq!(StoreError::of(&err), None);
    }
}
