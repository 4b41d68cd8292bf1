use crate::utils::{KeeperError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `Major.Minor.Patch`, ordered component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionMetadata {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionMetadata {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for VersionMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for VersionMetadata {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parts: Vec<&str> = s.split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(KeeperError::Parse(format!(
                "invalid version string {:?}: expected Major.Minor.Patch",
                s
            )));
        };

        let number = |part: &str| {
            part.parse::<u32>().map_err(|e| {
                KeeperError::Parse(format!("invalid version component {:?} in {:?}: {}", part, s, e))
            })
        };
        Ok(Self::new(number(*major)?, number(*minor)?, number(*patch)?))
    }
}

impl TryFrom<String> for VersionMetadata {
    type Error = KeeperError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<VersionMetadata> for String {
    fn from(value: VersionMetadata) -> Self {
        value.to_string()
    }
}

/// Build metadata of the running binary, created once at startup and passed
/// around by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: VersionMetadata,
}

impl BuildInfo {
    pub fn new(version: VersionMetadata) -> Self {
        Self { version }
    }

    /// Version baked in by cargo at compile time.
    pub fn from_build() -> Result<Self> {
        let version = format!(
            "{}.{}.{}",
            env!("CARGO_PKG_VERSION_MAJOR"),
            env!("CARGO_PKG_VERSION_MINOR"),
            env!("CARGO_PKG_VERSION_PATCH")
        );
        Ok(Self::new(version.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() -> Result<()> {
        let v: VersionMetadata = " 4.14.10\n".parse()?;
        assert_eq!(v, VersionMetadata::new(4, 14, 10));
        assert_eq!(v.to_string(), "4.14.10");
        Ok(())
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in ["", "4.14", "4.14.0.1", "4.x.0", "4.14.-1"] {
            assert!(input.parse::<VersionMetadata>().is_err(), "{input}");
        }
    }

    #[test]
    fn test_ordering() {
        let mut versions = vec![
            VersionMetadata::new(4, 14, 10),
            VersionMetadata::new(4, 14, 9),
            VersionMetadata::new(5, 0, 0),
            VersionMetadata::new(4, 2, 0),
        ];
        versions.sort();
        let rendered: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["4.2.0", "4.14.9", "4.14.10", "5.0.0"]);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&VersionMetadata::new(4, 18, 1)).unwrap();
        assert_eq!(json, r#""4.18.1""#);
        assert!(serde_json::from_str::<VersionMetadata>(r#""4.18""#).is_err());
    }

    #[test]
    fn test_build_info_matches_package_version() -> Result<()> {
        let build = BuildInfo::from_build()?;
        assert_eq!(build.version.to_string(), env!("CARGO_PKG_VERSION"));
        Ok(())
    }
}
