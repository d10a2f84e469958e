//! kdbxkit: read and write KeePass password databases.
//!
//! - [`kdbx`]: KDBX 3.1 / 4 codecs and the read-only KeePass 1 reader
//! - [`db`]: the in-memory database model
//! - [`crypto`]: ciphers, key derivation and composite keys
//! - [`store`]: atomic load/save of database files

pub mod cli;
pub mod config;
pub mod crypto;
pub mod db;
pub mod errors;
pub mod kdbx;
pub mod store;
