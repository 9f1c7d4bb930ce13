use serde::Deserialize;
use thiserror::Error;

use std::fs;
use std::path::Path;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Settings file not found")]
    NoFile,
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Deserialization error: {0}")]
    TomlDeserialization(#[from] toml::de::Error),
}

/// A SonicWall zone and the MX VLAN backing it. An empty VLAN id means the
/// zone is not local to the appliance.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Zone {
    pub name: String,
    #[serde(default)]
    pub vlan: String,
}

/// Migration settings. The Dashboard API key is deliberately not part of the
/// file, it comes from the environment.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub org_name: String,
    pub network_name: String,
    /// Zone order here drives row/column order of the default traffic map.
    #[serde(default)]
    pub zones: Vec<Zone>,
    /// Zones whose source-side rules go to the inbound ruleset.
    #[serde(default = "default_inbound")]
    pub inbound: Vec<String>,
    /// Zones routing rules to the site-to-site ruleset from either side.
    #[serde(default = "default_site2site")]
    pub site2site: Vec<String>,
}

fn default_inbound() -> Vec<String> {
    vec!["WAN".to_string()]
}

fn default_site2site() -> Vec<String> {
    vec!["VPN".to_string(), "SSLVPN".to_string()]
}

pub fn read(path: &Path) -> Result<Settings, Error> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NoFile
        } else {
            Error::IO(e)
        }
    })?;
    Ok(toml::from_str::<Settings>(&content)?)
}

#[cfg(test)]
mod tests {
    use super::{Error, read};
    use std::io::Write;

    #[test]
    fn test_read_full_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
org_name = "Acme"
network_name = "HQ"
inbound = ["WAN"]
site2site = ["VPN"]

[[zones]]
name = "LAN"
vlan = "10"

[[zones]]
name = "WAN"
"#
        )
        .unwrap();

        let settings = read(file.path()).unwrap();
        assert_eq!(settings.org_name, "Acme");
        assert_eq!(settings.zones.len(), 2);
        assert_eq!(settings.zones[0].vlan, "10");
        assert_eq!(settings.zones[1].vlan, "");
        assert_eq!(settings.site2site, vec!["VPN"]);
    }

    #[test]
    fn test_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "org_name = \"Acme\"\nnetwork_name = \"HQ\"\n").unwrap();
        let settings = read(file.path()).unwrap();
        assert!(settings.zones.is_empty());
        assert_eq!(settings.inbound, vec!["WAN"]);
        assert_eq!(settings.site2site, vec!["VPN", "SSLVPN"]);
    }

    #[test]
    fn test_missing_file() {
        let err = read(std::path::Path::new("/nonexistent/swmx.toml")).unwrap_err();
        assert!(matches!(err, Error::NoFile));
    }
}
