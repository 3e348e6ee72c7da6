//! Operations that can be performed on a record with a single
//! [`operate`](crate::Client::operate) call.

pub mod scalar;

use crate::{commands::buffer::Buffer, msgpack::Sink, Bin, Value};

/// Operation codes of the wire protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationType {
    /// Read a bin, or the whole record.
    Read = 1,
    /// Write a bin value.
    Write = 2,
    /// Add a value to an integer bin.
    Incr = 5,
    /// Append a string to a string bin.
    Append = 9,
    /// Prepend a string to a string bin.
    Prepend = 10,
    /// Refresh the record's time-to-live.
    Touch = 11,
    /// Delete the whole record.
    Delete = 14,
}

/// Bin selector of a single operation.
#[derive(Clone, Debug)]
pub enum OperationBin<'a> {
    /// The operation applies to the whole record.
    None,
    /// The operation reads all bins.
    All,
    /// The operation applies to the named bin.
    Name(&'a str),
}

/// A single operation within an [`operate`](crate::Client::operate) call.
#[derive(Clone, Debug)]
pub struct Operation<'a> {
    pub(crate) op: OperationType,
    pub(crate) bin: OperationBin<'a>,
    pub(crate) value: Option<&'a Value>,
}

impl<'a> Operation<'a> {
    pub(crate) fn estimate_size(&self) -> usize {
        let name_len = match &self.bin {
            OperationBin::None | OperationBin::All => 0,
            OperationBin::Name(name) => name.len(),
        };
        let value_len = self.value.map_or(0, Value::estimate_size);

        name_len + value_len
    }

    pub(crate) fn write_to(&self, buffer: &mut Buffer) {
        let name = match &self.bin {
            OperationBin::None | OperationBin::All => "",
            OperationBin::Name(name) => name,
        };

        match self.value {
            Some(value) => buffer.write_operation(self.op, name, value),
            None => buffer.write_operation(self.op, name, &Value::Nil),
        }
    }

    pub(crate) fn is_write(&self) -> bool {
        !matches!(self.op, OperationType::Read)
    }
}

/// An operation with owned bin name and value, as carried by batch write
/// entries.
#[derive(Clone, Debug)]
pub struct OwnedOperation {
    pub(crate) op: OperationType,
    pub(crate) name: String,
    pub(crate) value: Value,
}

impl OwnedOperation {
    /// Write the given value into the named bin.
    #[must_use]
    pub fn put(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: OperationType::Write,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Add the given value to the named integer bin.
    #[must_use]
    pub fn add(name: impl Into<String>, value: i64) -> Self {
        Self {
            op: OperationType::Incr,
            name: name.into(),
            value: Value::Int(value),
        }
    }

    pub(crate) fn estimate_size(&self) -> usize {
        self.name.len() + self.value.estimate_size()
    }

    pub(crate) fn write_to(&self, buffer: &mut Buffer) {
        buffer.write_operation(self.op, &self.name, &self.value);
    }
}

pub(crate) fn estimate_size_for_bin(bin: &Bin) -> usize {
    bin.name.len() + bin.value.estimate_size()
}

pub(crate) fn pack_size(value: &Value) -> usize {
    let mut sink = Sink;
    crate::msgpack::encoder::pack_value(&mut sink, value)
}
