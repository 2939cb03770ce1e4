// ── Domain model ──
//
// Canonical types shared by every engine component.

pub mod addr;
pub mod cluster;
pub mod device;
pub mod profile;
pub mod value;

pub use addr::{
    ChannelMask, ExtendedPanId, IeeeAddr, MAX_CHANNEL, MIN_CHANNEL, PanId, ShortAddr,
    normalize_channel_list, validate_channel,
};
pub use cluster::{Feature, GREEN_POWER_ENDPOINT, PROFILE_HOME_AUTOMATION, attr_id, cluster_id, zcl_type};
pub use device::{
    DescriptorReport, DeviceIdentity, DiscoveredDevice, EndpointClusters, EndpointDescriptor,
    EndpointIdentity, EndpointStateKey, Lifecycle, NodeDescriptor, PowerDescriptor, Presence,
    StaleReadPolicy, StateEntry, StateInfo, StateKey, StateMeta, StatePolicy, StateSource,
};
pub use profile::{NetworkMode, NetworkProfile, ProfileSource, ProfileUpdate, Role};
pub use value::AttrValue;

/// Serde adapter storing a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
