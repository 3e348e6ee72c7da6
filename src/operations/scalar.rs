//! Operations on scalar bin values.

use super::{Operation, OperationBin, OperationType};
use crate::Bin;

/// Read all bins of the record.
#[must_use]
pub const fn get<'a>() -> Operation<'a> {
    Operation {
        op: OperationType::Read,
        bin: OperationBin::All,
        value: None,
    }
}

/// Read the record header (generation, expiration) only.
#[must_use]
pub const fn get_header<'a>() -> Operation<'a> {
    Operation {
        op: OperationType::Read,
        bin: OperationBin::None,
        value: None,
    }
}

/// Read the named bin.
#[must_use]
pub const fn get_bin(name: &str) -> Operation<'_> {
    Operation {
        op: OperationType::Read,
        bin: OperationBin::Name(name),
        value: None,
    }
}

/// Write the bin's value.
#[must_use]
pub fn put(bin: &Bin) -> Operation<'_> {
    Operation {
        op: OperationType::Write,
        bin: OperationBin::Name(bin.name.as_ref()),
        value: Some(&bin.value),
    }
}

/// Add the bin's integer value to the stored value.
#[must_use]
pub fn add(bin: &Bin) -> Operation<'_> {
    Operation {
        op: OperationType::Incr,
        bin: OperationBin::Name(bin.name.as_ref()),
        value: Some(&bin.value),
    }
}

/// Append the bin's string value to the stored value.
#[must_use]
pub fn append(bin: &Bin) -> Operation<'_> {
    Operation {
        op: OperationType::Append,
        bin: OperationBin::Name(bin.name.as_ref()),
        value: Some(&bin.value),
    }
}

/// Prepend the bin's string value to the stored value.
#[must_use]
pub fn prepend(bin: &Bin) -> Operation<'_> {
    Operation {
        op: OperationType::Prepend,
        bin: OperationBin::Name(bin.name.as_ref()),
        value: Some(&bin.value),
    }
}

/// Refresh the record's time-to-live.
#[must_use]
pub const fn touch<'a>() -> Operation<'a> {
    Operation {
        op: OperationType::Touch,
        bin: OperationBin::None,
        value: None,
    }
}

/// Delete the whole record.
#[must_use]
pub const fn delete<'a>() -> Operation<'a> {
    Operation {
        op: OperationType::Delete,
        bin: OperationBin::None,
        value: None,
    }
}
