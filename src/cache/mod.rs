//! Cache tiers: the in-process TTL cache and the shared (network) tier

mod shared;
mod ttl;

pub use shared::{MemorySharedCache, RedisSharedCache, SharedCache};
pub use ttl::{CacheStats, CacheStatsSnapshot, DEFAULT_SWEEP_INTERVAL, TtlCache};
