//! Infrastructure layer: storage backends and the application services.
//!
//! - [`store`]: store traits, the atomic [`store::ChangeSet`], and the
//!   in-memory and Postgres backends.
//! - [`services`]: invoice, device, approval, audit and report services that
//!   run the pure domain aggregates against a store.

pub mod error;
pub mod services;
pub mod store;

pub use error::StoreError;
pub use services::{ServiceError, ServiceResult, ServiceSettings, Services};
pub use store::{InMemoryStore, PostgresStore, Store};
