use thiserror::Error;

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::slice;

/// Reserved name suffix for range groups.
pub const RANGE_SUFFIX: &str = "__range__";
/// Reserved name suffixes for the two halves of a split mixed group.
pub const FQDN_SPLIT_SUFFIX: &str = "__fqdn__split";
pub const IPV4_SPLIT_SUFFIX: &str = "__ipv4__split";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Icmpv6,
    Any,
}

impl Protocol {
    /// Parse the protocol column of a `service-object` line.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TCP" => Some(Protocol::Tcp),
            "UDP" => Some(Protocol::Udp),
            "ICMP" => Some(Protocol::Icmp),
            "ICMPV6" => Some(Protocol::Icmpv6),
            _ => None,
        }
    }

    /// Wire spelling the Dashboard accepts.
    pub fn wire(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Icmpv6 => "icmp6",
            Protocol::Any => "any",
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.wire())
    }
}

/// Port expression of a service primitive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortExpr {
    /// Matches every port.
    Any,
    /// No port concept (ICMP variants); becomes `any` on the wire.
    None,
    Single(u16),
    Range(u16, u16),
    /// Comma-joined single ports, produced by the combine step.
    List(Vec<u16>),
}

impl PortExpr {
    pub fn wire(&self) -> String {
        match self {
            PortExpr::Any | PortExpr::None => "any".to_string(),
            PortExpr::Single(port) => port.to_string(),
            PortExpr::Range(lo, hi) => format!("{lo}-{hi}"),
            PortExpr::List(ports) => ports
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// A `(protocol, port-expr)` service primitive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceEntry {
    pub protocol: Protocol,
    pub port: PortExpr,
}

impl ServiceEntry {
    pub fn new(protocol: Protocol, port: PortExpr) -> Self {
        ServiceEntry { protocol, port }
    }

    pub fn any() -> Self {
        ServiceEntry::new(Protocol::Any, PortExpr::Any)
    }

    pub fn is_any(&self) -> bool {
        self.protocol == Protocol::Any && self.port == PortExpr::Any
    }
}

/// Combine like protocols when a service group is dereferenced: TCP and UDP
/// single ports each collapse into one comma-joined primitive, ranges stay
/// distinct, ICMP and ICMPV6 each collapse to a single occurrence. Keeps the
/// cartesian product small at flattening time.
pub fn combine_like_services(entries: &[ServiceEntry]) -> Vec<ServiceEntry> {
    let mut result: Vec<ServiceEntry> = Vec::new();
    let mut tcp_ports: Vec<u16> = Vec::new();
    let mut udp_ports: Vec<u16> = Vec::new();
    let mut saw_icmp = false;
    let mut saw_icmpv6 = false;

    for entry in entries {
        match (&entry.protocol, &entry.port) {
            (_, PortExpr::Range(..)) => result.push(entry.clone()),
            (Protocol::Tcp, port) => collect_ports(&mut tcp_ports, port),
            (Protocol::Udp, port) => collect_ports(&mut udp_ports, port),
            (Protocol::Icmp, _) => saw_icmp = true,
            (Protocol::Icmpv6, _) => saw_icmpv6 = true,
            _ => result.push(entry.clone()),
        }
    }

    if !tcp_ports.is_empty() {
        result.push(ServiceEntry::new(Protocol::Tcp, PortExpr::List(tcp_ports)));
    }
    if !udp_ports.is_empty() {
        result.push(ServiceEntry::new(Protocol::Udp, PortExpr::List(udp_ports)));
    }
    if saw_icmp {
        result.push(ServiceEntry::new(Protocol::Icmp, PortExpr::None));
    }
    if saw_icmpv6 {
        result.push(ServiceEntry::new(Protocol::Icmpv6, PortExpr::None));
    }
    result
}

fn collect_ports(into: &mut Vec<u16>, port: &PortExpr) {
    match port {
        PortExpr::Single(p) => {
            if !into.contains(p) {
                into.push(*p);
            }
        }
        PortExpr::List(ports) => {
            for p in ports {
                if !into.contains(p) {
                    into.push(*p);
                }
            }
        }
        _ => {}
    }
}

/// A resolved address reference as the Dashboard rule grammar spells it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefToken {
    Any,
    Object(String),
    Group(String),
}

impl Display for RefToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RefToken::Any => write!(f, "any"),
            RefToken::Object(id) => write!(f, "OBJ[{id}]"),
            RefToken::Group(id) => write!(f, "GRP[{id}]"),
        }
    }
}

/// A rule endpoint is either one reference or a list of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Single(RefToken),
    Many(Vec<RefToken>),
}

impl Endpoint {
    pub fn any() -> Self {
        Endpoint::Single(RefToken::Any)
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Endpoint::Single(RefToken::Any))
    }

    pub fn tokens(&self) -> &[RefToken] {
        match self {
            Endpoint::Single(token) => slice::from_ref(token),
            Endpoint::Many(tokens) => tokens,
        }
    }
}

/// Rule slot a reference appears in; FQDN material is legal only on the
/// destination side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Source,
    Destination,
}

impl Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Slot::Source => write!(f, "Source"),
            Slot::Destination => write!(f, "Destination"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("FQDN Source Address not supported in Meraki")]
    FqdnSource,
    #[error("FQDN Source Address Group not supported in Meraki")]
    FqdnSourceGroup,
    #[error("No valid {0} Object exists")]
    UnknownObject(Slot),
    #[error("No valid {0} Object Group exists (group contains no valid objects)")]
    UnknownGroup(Slot),
    #[error("No valid Service Object found in local list (unsupported protocol, no port numbers, etc.)")]
    UnknownService,
    #[error("No valid Service Object Group found in local list (no valid service objects present)")]
    UnknownServiceGroup,
}

/// Ids of the direct members of a group construct that is kept local:
/// plain object ids and ids of groups it references.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupParts {
    pub object_ids: Vec<String>,
    pub group_ids: Vec<String>,
}

impl GroupParts {
    fn tokens(&self) -> Vec<RefToken> {
        self.object_ids
            .iter()
            .map(|id| RefToken::Object(id.clone()))
            .chain(self.group_ids.iter().map(|id| RefToken::Group(id.clone())))
            .collect()
    }
}

/// Address-side symbol table: seven mappings keyed by sanitized name.
#[derive(Debug, Default)]
pub struct AddressTable {
    /// CidrObject name -> remote policy object id.
    pub objects: HashMap<String, String>,
    /// FqdnObject name -> remote policy object id.
    pub fqdn_objects: HashMap<String, String>,
    /// `<name>__range__` -> remote group id covering the range.
    pub range_objects: HashMap<String, String>,
    /// AddressGroup name -> remote group id.
    pub object_groups: HashMap<String, String>,
    /// FqdnGroup or `<name>__fqdn__split` -> remote group id.
    pub fqdn_object_groups: HashMap<String, String>,
    /// `<name>__range__` -> local member ids for groups nesting ranges.
    pub range_object_groups: HashMap<String, GroupParts>,
    /// Unflattened group-of-groups, kept local and expanded at rule time.
    pub group_of_groups: HashMap<String, GroupParts>,
}

/// Service-side symbol table. Service constructs never exist remotely.
#[derive(Debug, Default)]
pub struct ServiceTable {
    pub objects: HashMap<String, ServiceEntry>,
    pub groups: HashMap<String, Vec<ServiceEntry>>,
    pub group_of_groups: HashMap<String, Vec<ServiceEntry>>,
}

/// The resolution context threaded through every compiler pass and the rule
/// parser.
#[derive(Debug, Default)]
pub struct Resolver {
    pub addresses: AddressTable,
    pub services: ServiceTable,
}

impl Resolver {
    /// Resolve a `name X` address reference for the given slot.
    pub fn address_name(&self, name: &str, slot: Slot) -> Result<RefToken, ResolveError> {
        let addrs = &self.addresses;
        if let Some(id) = addrs.objects.get(name) {
            return Ok(RefToken::Object(id.clone()));
        }
        if let Some(id) = addrs.range_objects.get(&format!("{name}{RANGE_SUFFIX}")) {
            return Ok(RefToken::Group(id.clone()));
        }
        match (slot, addrs.fqdn_objects.get(name)) {
            (Slot::Destination, Some(id)) => Ok(RefToken::Object(id.clone())),
            (Slot::Source, Some(_)) => Err(ResolveError::FqdnSource),
            (_, None) => Err(ResolveError::UnknownObject(slot)),
        }
    }

    /// Resolve a `group X` address reference for the given slot.
    pub fn address_group(&self, name: &str, slot: Slot) -> Result<Endpoint, ResolveError> {
        let addrs = &self.addresses;
        if let Some(id) = addrs.object_groups.get(name) {
            return Ok(Endpoint::Single(RefToken::Group(id.clone())));
        }
        if let Some(parts) = addrs.range_object_groups.get(&format!("{name}{RANGE_SUFFIX}")) {
            return Ok(Endpoint::Many(parts.tokens()));
        }
        if let Some(fqdn_id) = addrs.fqdn_object_groups.get(&format!("{name}{FQDN_SPLIT_SUFFIX}")) {
            let mut tokens = vec![RefToken::Group(fqdn_id.clone())];
            if let Some(ipv4_id) = addrs.object_groups.get(&format!("{name}{IPV4_SPLIT_SUFFIX}")) {
                tokens.push(RefToken::Group(ipv4_id.clone()));
            }
            return Ok(Endpoint::Many(tokens));
        }
        if let Some(parts) = addrs.group_of_groups.get(name) {
            return Ok(Endpoint::Many(parts.tokens()));
        }
        match (slot, addrs.fqdn_object_groups.get(name)) {
            (Slot::Destination, Some(id)) => Ok(Endpoint::Single(RefToken::Group(id.clone()))),
            (Slot::Source, Some(_)) => Err(ResolveError::FqdnSourceGroup),
            (_, None) => Err(ResolveError::UnknownGroup(slot)),
        }
    }

    /// Resolve a `service name X` reference.
    pub fn service_name(&self, name: &str) -> Result<Vec<ServiceEntry>, ResolveError> {
        self.services
            .objects
            .get(name)
            .map(|entry| vec![entry.clone()])
            .ok_or(ResolveError::UnknownService)
    }

    /// Resolve a `service group X` reference, combining like protocols.
    pub fn service_group(&self, name: &str) -> Result<Vec<ServiceEntry>, ResolveError> {
        let services = &self.services;
        let entries = services
            .groups
            .get(name)
            .or_else(|| services.group_of_groups.get(name))
            .ok_or(ResolveError::UnknownServiceGroup)?;
        Ok(combine_like_services(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with_fqdn(name: &str, id: &str) -> Resolver {
        let mut resolver = Resolver::default();
        resolver.addresses.fqdn_objects.insert(name.into(), id.into());
        resolver
    }

    #[test]
    fn test_address_name_priority() {
        let mut resolver = resolver_with_fqdn("X", "9");
        resolver.addresses.objects.insert("X".into(), "1".into());
        assert_eq!(resolver.address_name("X", Slot::Source), Ok(RefToken::Object("1".into())));

        resolver
            .addresses
            .range_objects
            .insert("R__range__".into(), "5".into());
        assert_eq!(
            resolver.address_name("R", Slot::Destination),
            Ok(RefToken::Group("5".into()))
        );
    }

    #[test]
    fn test_fqdn_allowed_as_destination_only() {
        let resolver = resolver_with_fqdn("CDN", "77");
        assert_eq!(
            resolver.address_name("CDN", Slot::Destination),
            Ok(RefToken::Object("77".into()))
        );
        assert_eq!(resolver.address_name("CDN", Slot::Source), Err(ResolveError::FqdnSource));
        assert_eq!(
            resolver.address_name("missing", Slot::Source),
            Err(ResolveError::UnknownObject(Slot::Source))
        );
    }

    #[test]
    fn test_group_split_resolution() {
        let mut resolver = Resolver::default();
        resolver
            .addresses
            .fqdn_object_groups
            .insert("MIX__fqdn__split".into(), "10".into());
        resolver
            .addresses
            .object_groups
            .insert("MIX__ipv4__split".into(), "11".into());
        let endpoint = resolver.address_group("MIX", Slot::Destination).unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Many(vec![RefToken::Group("10".into()), RefToken::Group("11".into())])
        );
    }

    #[test]
    fn test_group_of_groups_expands_to_tokens() {
        let mut resolver = Resolver::default();
        resolver.addresses.group_of_groups.insert(
            "NEST".into(),
            GroupParts {
                object_ids: vec!["1".into()],
                group_ids: vec!["2".into(), "3".into()],
            },
        );
        let endpoint = resolver.address_group("NEST", Slot::Source).unwrap();
        assert_eq!(endpoint.tokens().len(), 3);
        assert_eq!(endpoint.tokens()[0], RefToken::Object("1".into()));
        assert_eq!(endpoint.tokens()[2], RefToken::Group("3".into()));
    }

    #[test]
    fn test_fqdn_group_source_rejected() {
        let mut resolver = Resolver::default();
        resolver
            .addresses
            .fqdn_object_groups
            .insert("FG".into(), "20".into());
        assert_eq!(
            resolver.address_group("FG", Slot::Source),
            Err(ResolveError::FqdnSourceGroup)
        );
        assert_eq!(
            resolver.address_group("FG", Slot::Destination),
            Ok(Endpoint::Single(RefToken::Group("20".into())))
        );
    }

    #[test]
    fn test_combine_like_services() {
        let entries = vec![
            ServiceEntry::new(Protocol::Tcp, PortExpr::Single(80)),
            ServiceEntry::new(Protocol::Tcp, PortExpr::Single(443)),
            ServiceEntry::new(Protocol::Udp, PortExpr::Single(53)),
            ServiceEntry::new(Protocol::Tcp, PortExpr::Range(1000, 2000)),
        ];
        let combined = combine_like_services(&entries);
        assert_eq!(combined.len(), 3);
        assert_eq!(combined[0], ServiceEntry::new(Protocol::Tcp, PortExpr::Range(1000, 2000)));
        assert_eq!(combined[1].port.wire(), "80,443");
        assert_eq!(combined[2], ServiceEntry::new(Protocol::Udp, PortExpr::List(vec![53])));
    }

    #[test]
    fn test_combine_dedups_and_collapses_icmp() {
        let entries = vec![
            ServiceEntry::new(Protocol::Icmp, PortExpr::None),
            ServiceEntry::new(Protocol::Tcp, PortExpr::Single(22)),
            ServiceEntry::new(Protocol::Icmp, PortExpr::None),
            ServiceEntry::new(Protocol::Tcp, PortExpr::Single(22)),
            ServiceEntry::new(Protocol::Icmpv6, PortExpr::None),
        ];
        let combined = combine_like_services(&entries);
        assert_eq!(combined.len(), 3);
        assert_eq!(combined[0].port.wire(), "22");
        assert_eq!(combined[1].protocol, Protocol::Icmp);
        assert_eq!(combined[2].protocol, Protocol::Icmpv6);
    }

    #[test]
    fn test_ref_token_display() {
        assert_eq!(RefToken::Any.to_string(), "any");
        assert_eq!(RefToken::Object("12".into()).to_string(), "OBJ[12]");
        assert_eq!(RefToken::Group("9".into()).to_string(), "GRP[9]");
    }

    #[test]
    fn test_port_expr_wire() {
        assert_eq!(PortExpr::Any.wire(), "any");
        assert_eq!(PortExpr::None.wire(), "any");
        assert_eq!(PortExpr::Single(8080).wire(), "8080");
        assert_eq!(PortExpr::Range(1, 1024).wire(), "1-1024");
        assert_eq!(PortExpr::List(vec![80, 443]).wire(), "80,443");
    }
}
