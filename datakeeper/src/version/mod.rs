//! Version of the binary and of the data it runs against.

pub mod assets;
pub mod feature_lock;
pub mod gate;
pub mod metadata;

pub use assets::{AssetSource, BundledAssets};
pub use feature_lock::{CustomNoUpgrade, FeatureGateLock, FeatureGates};
pub use gate::{check_compatibility, is_blocked, BlockedEdges, VersionGate};
pub use metadata::{BuildInfo, VersionMetadata};
