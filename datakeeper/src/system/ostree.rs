//! Parsing of `rpm-ostree status --json`.

use crate::system::DeploymentId;
use crate::utils::{KeeperError, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    #[serde(default)]
    pub booted: bool,
    #[serde(default)]
    pub staged: bool,
    #[serde(default)]
    pub pinned: bool,
}

#[derive(Deserialize)]
struct Status {
    #[serde(default)]
    deployments: Vec<Deployment>,
}

pub fn parse_status(output: &str) -> Result<Vec<Deployment>> {
    let status: Status = serde_json::from_str(output.trim())
        .map_err(|e| KeeperError::Parse(format!("failed to parse rpm-ostree status: {}", e)))?;
    if status.deployments.is_empty() {
        return Err(KeeperError::Parse(
            "rpm-ostree status lists no deployments".to_string(),
        ));
    }
    Ok(status.deployments)
}

pub fn booted(deployments: &[Deployment]) -> Result<&Deployment> {
    deployments.iter().find(|d| d.booted).ok_or_else(|| {
        KeeperError::NotFound(format!(
            "booted deployment among {:?}",
            deployments.iter().map(|d| d.id.as_str()).collect::<Vec<_>>()
        ))
    })
}

/// The deployment the host would fall back to: the first one that is
/// neither booted nor staged for the next boot.
pub fn rollback(deployments: &[Deployment]) -> Option<&Deployment> {
    deployments.iter().find(|d| !d.booted && !d.staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = r#"{
        "deployments": [
            {"id": "rhel-aaa.0", "booted": false, "staged": true, "pinned": false, "osname": "rhel"},
            {"id": "rhel-bbb.0", "booted": true, "staged": false, "pinned": false},
            {"id": "rhel-ccc.0", "booted": false, "staged": false, "pinned": true}
        ],
        "transaction": null
    }"#;

    #[test]
    fn test_parse_status() -> Result<()> {
        let deployments = parse_status(STATUS)?;
        assert_eq!(deployments.len(), 3);
        assert!(deployments[2].pinned);

        assert_eq!(booted(&deployments)?.id, DeploymentId::new("rhel-bbb.0"));
        assert_eq!(
            rollback(&deployments).map(|d| d.id.as_str()),
            Some("rhel-ccc.0")
        );
        Ok(())
    }

    #[test]
    fn test_single_deployment_has_no_rollback() -> Result<()> {
        let deployments = parse_status(r#"{"deployments":[{"id":"rhel-bbb.0","booted":true}]}"#)?;
        assert!(rollback(&deployments).is_none());
        Ok(())
    }

    #[test]
    fn test_no_deployments_is_an_error() {
        assert!(parse_status(r#"{"deployments":[]}"#).is_err());
        assert!(booted(&[]).is_err());
    }
}
