use thiserror::Error;

use std::fs;
use std::path::Path;

use crate::meraki::{self, Dashboard, StaticRoute, Vlan};

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Dashboard(#[from] meraki::Error),
}

/// Create the VLANs from a JSON bootstrap file, skipping any whose name the
/// network already has.
pub fn create_vlans(dashboard: &Dashboard, network_id: &str, path: &Path) -> Result<(), Error> {
    let vlans: Vec<Vlan> = serde_json::from_str(&fs::read_to_string(path)?)?;
    let existing: Vec<String> = dashboard.vlans(network_id)?.into_iter().map(|v| v.name).collect();

    let total = vlans.len();
    tracing::info!(total, "creating vlans");
    for (index, vlan) in vlans.iter().enumerate() {
        tracing::info!(id = %vlan.id, name = %vlan.name, "processing vlan ({} of {total})", index + 1);
        if existing.contains(&vlan.name) {
            continue;
        }
        dashboard.create_vlan(network_id, vlan)?;
    }
    Ok(())
}

/// Create the static routes from a JSON bootstrap file, skipping any whose
/// name the network already has.
pub fn create_static_routes(dashboard: &Dashboard, network_id: &str, path: &Path) -> Result<(), Error> {
    let routes: Vec<StaticRoute> = serde_json::from_str(&fs::read_to_string(path)?)?;
    let existing: Vec<String> = dashboard
        .static_routes(network_id)?
        .into_iter()
        .map(|r| r.name)
        .collect();

    let total = routes.len();
    tracing::info!(total, "creating static routes");
    for (index, route) in routes.iter().enumerate() {
        tracing::info!(name = %route.name, "processing route ({} of {total})", index + 1);
        if existing.contains(&route.name) {
            continue;
        }
        dashboard.create_static_route(network_id, route)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::meraki::{StaticRoute, Vlan};

    #[test]
    fn test_vlan_record_shape() {
        let vlans: Vec<Vlan> = serde_json::from_str(
            r#"[{"id": 10, "name": "LAN", "subnet": "10.0.0.0/24", "applianceIp": "10.0.0.1", "groupPolicyId": null}]"#,
        )
        .unwrap();
        assert_eq!(vlans[0].id, "10");
        assert_eq!(vlans[0].appliance_ip, "10.0.0.1");
        assert!(vlans[0].group_policy_id.is_none());
    }

    #[test]
    fn test_static_route_record_shape() {
        let routes: Vec<StaticRoute> = serde_json::from_str(
            r#"[{"name": "to-dc", "subnet": "192.168.50.0/24", "gatewayIp": "10.0.0.254"}]"#,
        )
        .unwrap();
        assert_eq!(routes[0].gateway_ip, "10.0.0.254");
    }
}
