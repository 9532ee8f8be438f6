//! Inventory domain module.
//!
//! Serial-numbered device lifecycle (inspection, preparation, custody,
//! transfer, sale) and per-product stock counters. Pure domain logic only.

pub mod device;
pub mod serial;
pub mod stock;

pub use device::{
    Device, DeviceCommand, DeviceEvent, DeviceHistoryEntry, DeviceStatus, InspectionResult,
    RegisterDevice,
};
pub use serial::{SerialNumber, serial_sequence_key};
pub use stock::ProductStock;
