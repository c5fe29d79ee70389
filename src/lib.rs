//! Inventory sync for the showroom site: pulls the inventory sheet, rehosts
//! listing images on the CDN, and upserts one document per serial number.

pub mod catalog;
pub mod cdn;
pub mod config;
pub mod http;
pub mod images;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod sheet;
pub mod store;
pub mod supabase;

pub use config::SyncConfig;
pub use models::{InventoryRecord, RawRow, SyncReport};
pub use pipeline::{SyncError, SyncErrorKind, SyncPipeline};
