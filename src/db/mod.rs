//! In-memory password database model.

pub mod database;
pub mod entry;
pub mod group;
pub mod meta;
pub mod protected;
pub mod times;

pub use database::{Database, DatabaseSettings, DeletedObject};
pub use entry::{Attachment, AutoType, AutoTypeAssociation, CustomData, CustomDataItem, Entry, Value};
pub use group::Group;
pub use meta::{CustomIcon, MemoryProtection, Metadata};
pub use protected::ProtectedValue;
pub use times::Times;
