//! Strongly-typed identifiers used across the domain.
//!
//! Records owned by this system (invoices, devices, approvals, audit entries,
//! users) are UUIDv7 newtypes. Master data that lives elsewhere (products,
//! customers, suppliers, warehouses) is referenced by opaque string keys.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a user (actor identity).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

/// Identifier of an invoice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(Uuid);

/// Identifier of a tracked physical unit (serial-numbered device).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

/// Identifier of an approval request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalId(Uuid);

/// Identifier of an audit log entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEntryId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(UserId, "UserId");
impl_uuid_newtype!(InvoiceId, "InvoiceId");
impl_uuid_newtype!(DeviceId, "DeviceId");
impl_uuid_newtype!(ApprovalId, "ApprovalId");
impl_uuid_newtype!(AuditEntryId, "AuditEntryId");

/// Reference to a product in the catalogue.
///
/// `Default` is the empty key, used only by not-yet-created aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

/// Reference to a customer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(String);

/// Reference to a supplier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierId(String);

/// Reference to a warehouse / physical location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarehouseId(String);

macro_rules! impl_key_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Build a key, rejecting blank values.
            pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(concat!($name, " must not be empty")));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

impl_key_newtype!(ProductId, "ProductId");
impl_key_newtype!(CustomerId, "CustomerId");
impl_key_newtype!(SupplierId, "SupplierId");
impl_key_newtype!(WarehouseId, "WarehouseId");

impl WarehouseId {
    /// Receiving area where freshly purchased units wait for inspection.
    pub fn inspection() -> Self {
        Self("inspection".to_string())
    }

    /// Main sales floor stock.
    pub fn main() -> Self {
        Self("main".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_round_trip_through_strings() {
        let id = InvoiceId::new();
        let parsed: InvoiceId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn malformed_uuid_is_invalid_id() {
        let err = "not-a-uuid".parse::<DeviceId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(msg) if msg.starts_with("DeviceId")));
    }

    #[test]
    fn string_keys_are_trimmed_and_non_empty() {
        assert_eq!(ProductId::parse("  P1 ").unwrap().as_str(), "P1");
        assert!(ProductId::parse("   ").is_err());
    }

    #[test]
    fn well_known_warehouses() {
        assert_eq!(WarehouseId::inspection().as_str(), "inspection");
        assert_eq!(WarehouseId::main().as_str(), "main");
    }
}
