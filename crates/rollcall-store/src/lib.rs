//! rollcall-store — SQLite and filesystem backends for the rollcall pipeline.
//!
//! [`Database`] implements the roster, descriptor store, section resolver and
//! attendance sink; [`FsImageStore`] keeps the reference face images.

pub mod attendance;
pub mod catalog;
pub mod db;
pub mod descriptors;
pub mod error;
pub mod images;
pub mod roster;

pub use attendance::{GenerateSummary, MonthStatistics};
pub use catalog::{Room, Section, Subject};
pub use db::Database;
pub use error::DbError;
pub use images::FsImageStore;
pub use roster::Student;
