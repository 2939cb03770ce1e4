// ── Device state storage ──
//
// The registry of discovered devices, their attribute caches, and the
// persisted snapshot schema.

pub mod registry;
pub mod snapshot;
pub mod state_cache;

pub use registry::{DeviceQuery, DeviceRegistry, Upsert};
pub use snapshot::{
    DeviceRecord, EndpointStateRecord, RegistrySnapshot, SNAPSHOT_SCHEMA_VERSION, StateRecord,
};
pub use state_cache::StateWrite;
