//! Persistence boundary for invitations, their audit trail and the reference
//! data the workflow reads.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod records;
pub mod r#trait;

pub use in_memory::{InMemoryGateway, InMemoryUnitOfWork};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresGateway, PostgresUnitOfWork};
pub use records::{LocationRecord, PurposeRecord, TemplateRecord, UserRecord, VisitorRecord};
pub use r#trait::{PersistenceGateway, StoreError, UnitOfWork};
