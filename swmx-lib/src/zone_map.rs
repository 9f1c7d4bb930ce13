use std::collections::HashMap;
use std::io::Write;

use crate::meraki::MxFirewallRule;
use crate::rules::Action;
use crate::settings::Zone;

/// Default inter-zone behavior, learned from `any/any/any/any` rules. Rows
/// and columns follow the configured zone order; a cell stays empty until an
/// any-any rule sets it.
#[derive(Debug, Default)]
pub struct DefaultZoneMap {
    zones: Vec<Zone>,
    cells: HashMap<(String, String), Action>,
}

impl DefaultZoneMap {
    pub fn new(zones: &[Zone]) -> Self {
        DefaultZoneMap {
            zones: zones.to_vec(),
            cells: HashMap::new(),
        }
    }

    fn has_zone(&self, name: &str) -> bool {
        self.zones.iter().any(|z| z.name == name)
    }

    /// Record the default action between two zones. Ignored unless both
    /// zones are configured.
    pub fn set(&mut self, src_zone: &str, dst_zone: &str, action: Action) {
        if self.has_zone(src_zone) && self.has_zone(dst_zone) {
            self.cells.insert((src_zone.to_string(), dst_zone.to_string()), action);
        }
    }

    pub fn get(&self, src_zone: &str, dst_zone: &str) -> Option<Action> {
        self.cells.get(&(src_zone.to_string(), dst_zone.to_string())).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Serialize the map as a CSV table, source zones as rows and
    /// destination zones as columns.
    pub fn write_csv<W: Write>(&self, out: W) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(out);

        let mut header = vec!["Source Zone \\ Destination Zone".to_string()];
        header.extend(self.zones.iter().map(|z| z.name.clone()));
        writer.write_record(&header)?;

        for src in &self.zones {
            let mut row = vec![src.name.clone()];
            for dst in &self.zones {
                let cell = self
                    .get(&src.name, &dst.name)
                    .map(|action| action.wire().to_string())
                    .unwrap_or_default();
                row.push(cell);
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Project the map into VLAN-scoped deny rules. One rule per source zone
    /// backed by a local VLAN, denying traffic to every VLAN-backed
    /// destination zone whose default is deny. Allows are implicit.
    pub fn vlan_rules(&self) -> Vec<MxFirewallRule> {
        let mut rules = Vec::new();
        for src in &self.zones {
            if src.vlan.is_empty() {
                continue;
            }
            let denied: Vec<String> = self
                .zones
                .iter()
                .filter(|dst| !dst.vlan.is_empty())
                .filter(|dst| self.get(&src.name, &dst.name) == Some(Action::Deny))
                .map(|dst| format!("VLAN({}).*", dst.vlan))
                .collect();
            if denied.is_empty() {
                continue;
            }
            rules.push(MxFirewallRule {
                comment: "Any Any Inter-zone rule".to_string(),
                policy: Action::Deny.wire().to_string(),
                protocol: "any".to_string(),
                src_port: "any".to_string(),
                src_cidr: format!("VLAN({}).*", src.vlan),
                dest_cidr: denied.join(","),
                dest_port: "any".to_string(),
            });
        }
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::DefaultZoneMap;
    use crate::rules::Action;
    use crate::settings::Zone;

    fn zones() -> Vec<Zone> {
        vec![
            Zone {
                name: "LAN".into(),
                vlan: "10".into(),
            },
            Zone {
                name: "DMZ".into(),
                vlan: "20".into(),
            },
            Zone {
                name: "WAN".into(),
                vlan: "".into(),
            },
        ]
    }

    #[test]
    fn test_set_ignores_unknown_zones() {
        let mut map = DefaultZoneMap::new(&zones());
        map.set("LAN", "NOPE", Action::Allow);
        map.set("NOPE", "LAN", Action::Deny);
        assert!(map.is_empty());

        map.set("LAN", "WAN", Action::Allow);
        assert_eq!(map.get("LAN", "WAN"), Some(Action::Allow));
    }

    #[test]
    fn test_last_rule_wins() {
        let mut map = DefaultZoneMap::new(&zones());
        map.set("LAN", "DMZ", Action::Allow);
        map.set("LAN", "DMZ", Action::Deny);
        assert_eq!(map.get("LAN", "DMZ"), Some(Action::Deny));
    }

    #[test]
    fn test_csv_layout() {
        let mut map = DefaultZoneMap::new(&zones());
        map.set("LAN", "DMZ", Action::Deny);
        map.set("DMZ", "LAN", Action::Allow);

        let mut buffer = Vec::new();
        map.write_csv(&mut buffer).unwrap();
        let csv = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Source Zone \\ Destination Zone,LAN,DMZ,WAN");
        assert_eq!(lines[1], "LAN,,deny,");
        assert_eq!(lines[2], "DMZ,allow,,");
        assert_eq!(lines[3], "WAN,,,");
    }

    #[test]
    fn test_vlan_rules_only_for_vlan_backed_denies() {
        let mut map = DefaultZoneMap::new(&zones());
        map.set("LAN", "DMZ", Action::Deny);
        map.set("LAN", "WAN", Action::Deny); // WAN has no VLAN, never appears
        map.set("DMZ", "LAN", Action::Allow); // allow is implicit, no rule

        let rules = map.vlan_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].src_cidr, "VLAN(10).*");
        assert_eq!(rules[0].dest_cidr, "VLAN(20).*");
        assert_eq!(rules[0].policy, "deny");
        assert_eq!(rules[0].comment, "Any Any Inter-zone rule");
    }

    #[test]
    fn test_vlan_rules_join_multiple_destinations() {
        let mut zones = zones();
        zones.push(Zone {
            name: "GUEST".into(),
            vlan: "30".into(),
        });
        let mut map = DefaultZoneMap::new(&zones);
        map.set("LAN", "DMZ", Action::Deny);
        map.set("LAN", "GUEST", Action::Deny);

        let rules = map.vlan_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].dest_cidr, "VLAN(20).*,VLAN(30).*");
    }
}
