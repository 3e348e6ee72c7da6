#![forbid(unsafe_code)]
#![warn(
    rust_2018_idioms,
    clippy::all,
    clippy::pedantic,
    clippy::clone_on_ref_ptr,
    clippy::format_push_string,
    clippy::get_unwrap,
    clippy::mem_forget,
    clippy::rc_buffer,
    clippy::rc_mutex,
    clippy::str_to_string,
    clippy::string_add,
    clippy::string_to_string,
    clippy::try_err
)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::too_many_lines,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

//! A pure-Rust client for the Meridian distributed key-value store.
//!
//! Meridian is a sharded, eventually-consistent record store. This client
//! lets many concurrent callers issue record operations against a dynamic
//! cluster of server nodes while hiding topology, partition routing,
//! connection pooling, retries, timeouts and protocol encoding.
//!
//! # Examples
//!
//! Basic record round trip:
//!
//! ```no_run
//! use meridian::{
//!     policy::{BasePolicy, ClientPolicy, WritePolicy},
//!     Bin, Bins, Client, Key,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::new(&ClientPolicy::default(), "localhost:3900")
//!         .await
//!         .expect("failed to connect to cluster");
//!
//!     let key = Key::new("test", "demo", "alpha");
//!     let bins = [Bin::new("count", 1), Bin::new("name", "one")];
//!
//!     client.put(&WritePolicy::default(), &key, &bins).await.unwrap();
//!     let record = client
//!         .get(&BasePolicy::default(), &key, Bins::All)
//!         .await
//!         .unwrap();
//!     println!("record: {record}");
//!
//!     let existed = client.delete(&WritePolicy::default(), &key).await.unwrap();
//!     assert!(existed);
//! }
//! ```

pub use batch::{BatchOp, BatchRecord, BatchResults};
pub use bin::{Bin, Bins};
pub use client::Client;
pub use key::{Key, UserKey};
pub use net::{Host, ToHosts};
pub use query::{
    IndexFilter, PartitionFilter, PartitionState, PartitionStatus, RecordSet, Statement,
};
pub use record::Record;
pub use result_code::ResultCode;
pub use txn::{AbortStatus, CommitStatus, Txn};
pub use value::{FloatValue, Value};

pub mod batch;
mod bin;
mod client;
pub mod cluster;
mod commands;
pub mod errors;
pub mod expressions;
pub mod index;
mod key;
#[macro_use]
mod macros;
mod msgpack;
mod net;
pub mod operations;
pub mod policy;
pub mod query;
mod record;
mod result_code;
pub mod txn;
mod value;
