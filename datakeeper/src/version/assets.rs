/// Source of static assets, looked up by logical name.
pub trait AssetSource {
    /// Returns `None` when no asset with that name exists.
    fn load(&self, name: &str) -> Option<Vec<u8>>;
}

pub const UPGRADE_BLOCKS_ASSET: &str = "release/upgrade-blocks.json";

/// Assets compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledAssets;

impl AssetSource for BundledAssets {
    fn load(&self, name: &str) -> Option<Vec<u8>> {
        match name {
            UPGRADE_BLOCKS_ASSET => {
                Some(include_bytes!("../../assets/upgrade-blocks.json").to_vec())
            }
            _ => None,
        }
    }
}
