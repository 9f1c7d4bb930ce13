use crate::meraki::MxFirewallRule;
use crate::rules::AclRule;

/// Zone-driven routing of flattened rules into the three MX rulesets.
#[derive(Clone, Debug)]
pub struct Classifier {
    /// Off means everything lands in the outbound L3 ruleset.
    pub mapping: bool,
    pub inbound_zones: Vec<String>,
    pub site2site_zones: Vec<String>,
}

impl Classifier {
    pub fn unmapped() -> Self {
        Classifier {
            mapping: false,
            inbound_zones: Vec::new(),
            site2site_zones: Vec::new(),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RuleSets {
    pub outbound: Vec<MxFirewallRule>,
    pub inbound: Vec<MxFirewallRule>,
    pub site2site: Vec<MxFirewallRule>,
}

impl RuleSets {
    pub fn total(&self) -> usize {
        self.outbound.len() + self.inbound.len() + self.site2site.len()
    }
}

/// Expand every resolved rule into the cartesian product of its source
/// tokens, destination tokens and services, one wire record per triple, and
/// route each record by zone.
pub fn flatten(rules: &[AclRule], classifier: &Classifier) -> RuleSets {
    let mut sets = RuleSets::default();
    for rule in rules {
        let target = if !classifier.mapping {
            &mut sets.outbound
        } else if classifier.inbound_zones.contains(&rule.src_zone) {
            &mut sets.inbound
        } else if classifier.site2site_zones.contains(&rule.src_zone)
            || classifier.site2site_zones.contains(&rule.dst_zone)
        {
            &mut sets.site2site
        } else {
            &mut sets.outbound
        };

        for src in rule.src.tokens() {
            for dst in rule.dst.tokens() {
                for service in &rule.services {
                    target.push(MxFirewallRule {
                        comment: rule.comment.clone().unwrap_or_default(),
                        policy: rule.action.wire().to_string(),
                        protocol: service.protocol.wire().to_string(),
                        src_port: rule.src_port.clone().unwrap_or_else(|| "any".to_string()),
                        src_cidr: src.to_string(),
                        dest_cidr: dst.to_string(),
                        dest_port: service.port.wire(),
                    });
                }
            }
        }
    }
    sets
}

#[cfg(test)]
mod tests {
    use super::{Classifier, flatten};
    use crate::resolver::{Endpoint, PortExpr, Protocol, RefToken, ServiceEntry};
    use crate::rules::{AclRule, Action};

    fn rule(src_zone: &str, dst_zone: &str) -> AclRule {
        AclRule {
            src_zone: src_zone.into(),
            dst_zone: dst_zone.into(),
            action: Action::Allow,
            comment: None,
            src: Endpoint::Single(RefToken::Object("1".into())),
            src_port: None,
            dst: Endpoint::Single(RefToken::Object("2".into())),
            services: vec![ServiceEntry::new(Protocol::Tcp, PortExpr::Single(80))],
        }
    }

    fn mapped() -> Classifier {
        Classifier {
            mapping: true,
            inbound_zones: vec!["WAN".into()],
            site2site_zones: vec!["VPN".into(), "SSLVPN".into()],
        }
    }

    #[test]
    fn test_cartesian_product() {
        let mut acl = rule("LAN", "WAN");
        acl.dst = Endpoint::Many(vec![RefToken::Group("10".into()), RefToken::Group("11".into())]);
        acl.services = vec![
            ServiceEntry::new(Protocol::Tcp, PortExpr::List(vec![80, 443])),
            ServiceEntry::new(Protocol::Udp, PortExpr::Single(53)),
            ServiceEntry::new(Protocol::Tcp, PortExpr::Range(1000, 2000)),
        ];
        let sets = flatten(&[acl], &Classifier::unmapped());
        assert_eq!(sets.outbound.len(), 6);
        assert_eq!(sets.outbound[0].dest_cidr, "GRP[10]");
        assert_eq!(sets.outbound[0].dest_port, "80,443");
        assert_eq!(sets.outbound[5].dest_cidr, "GRP[11]");
        assert_eq!(sets.outbound[5].dest_port, "1000-2000");
    }

    #[test]
    fn test_icmp_protocols_lowercase() {
        let mut acl = rule("LAN", "WAN");
        acl.services = vec![
            ServiceEntry::new(Protocol::Icmp, PortExpr::None),
            ServiceEntry::new(Protocol::Icmpv6, PortExpr::None),
        ];
        let sets = flatten(&[acl], &Classifier::unmapped());
        assert_eq!(sets.outbound[0].protocol, "icmp");
        assert_eq!(sets.outbound[0].dest_port, "any");
        assert_eq!(sets.outbound[1].protocol, "icmp6");
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let sets = flatten(&[rule("LAN", "WAN")], &Classifier::unmapped());
        let flat = &sets.outbound[0];
        assert_eq!(flat.comment, "");
        assert_eq!(flat.src_port, "any");
        assert_eq!(flat.policy, "allow");
    }

    #[test]
    fn test_mapping_routes_by_zone() {
        let rules = vec![
            rule("WAN", "LAN"),
            rule("LAN", "VPN"),
            rule("SSLVPN", "LAN"),
            rule("LAN", "DMZ"),
        ];
        let sets = flatten(&rules, &mapped());
        assert_eq!(sets.inbound.len(), 1);
        assert_eq!(sets.site2site.len(), 2);
        assert_eq!(sets.outbound.len(), 1);
    }

    #[test]
    fn test_inbound_wins_over_site2site() {
        // WAN source to VPN destination is inbound, source side decides first
        let sets = flatten(&[rule("WAN", "VPN")], &mapped());
        assert_eq!(sets.inbound.len(), 1);
        assert!(sets.site2site.is_empty());
    }

    #[test]
    fn test_unmapped_sends_everything_outbound() {
        let sets = flatten(&[rule("WAN", "LAN"), rule("LAN", "VPN")], &Classifier::unmapped());
        assert_eq!(sets.outbound.len(), 2);
        assert_eq!(sets.total(), 2);
    }
}
