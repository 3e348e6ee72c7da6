//! Scans and secondary-index queries, modelled as resumable streams over
//! partitions.

mod partition_filter;
mod recordset;
mod statement;
mod tracker;

pub use self::{
    partition_filter::{PartitionFilter, PartitionState, PartitionStatus},
    recordset::RecordSet,
    statement::{IndexFilter, Statement},
};
pub(crate) use self::{
    partition_filter::PartitionProgress,
    tracker::{PartitionTracker, StreamJob},
};
