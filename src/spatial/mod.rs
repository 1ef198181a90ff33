pub mod cache;
pub mod locator;
pub mod ping_tree;

pub use cache::{is_closed, ArtifactCache, ArtifactKind, CacheLookup};
pub use locator::{NearestPing, NearestPingMap, PingRef, SpatialMatcher, StopPasses};
pub use ping_tree::{IndexedPing, PingTree};
