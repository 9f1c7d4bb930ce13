use ipnetwork::Ipv4Network;

use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::journal::Journal;
use crate::masks;
use crate::meraki::{self, NewPolicyObject, PolicyStore};
use crate::range_cover;
use crate::resolver::{
    FQDN_SPLIT_SUFFIX, GroupParts, IPV4_SPLIT_SUFFIX, PortExpr, Protocol, RANGE_SUFFIX, Resolver, ServiceEntry,
};
use crate::show_run::{ShowRun, Stanza};
use crate::stanza::{StanzaKind, sanitize_name, split_all};

const ADDRESS_OBJECT_PREFIX: &str = "address-object ipv4";
const FQDN_OBJECT_PREFIX: &str = "address-object fqdn";
const ADDRESS_GROUP_PREFIX: &str = "address-group ipv4";
const IPV6_GROUP_PREFIX: &str = "address-group ipv6";
const SERVICE_OBJECT_PREFIX: &str = "service-object";
const SERVICE_GROUP_PREFIX: &str = "service-group";

/// What a single `address-object ipv4` stanza materializes into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressObjectPlan {
    Cidr { name: String, cidr: String },
    /// An IP range, exploded into its minimal CIDR cover.
    Range { name: String, cover: Vec<Ipv4Network> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FqdnObjectPlan {
    pub name: String,
    pub fqdn: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressGroupPlan {
    pub name: String,
    pub object_ids: Vec<String>,
    pub range_ids: Vec<String>,
    pub nested_group_ids: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FqdnGroupPlan {
    pub name: String,
    pub fqdn_ids: Vec<String>,
    pub ipv4_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServicePlan {
    pub name: String,
    pub entry: ServiceEntry,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceGroupPlan {
    pub name: String,
    pub entries: Vec<ServiceEntry>,
    pub nested: Vec<ServiceEntry>,
}

fn stanza_name(stanza: &Stanza, prefix: &str) -> String {
    sanitize_name(stanza.text.strip_prefix(prefix).unwrap_or(&stanza.text))
}

fn invalid_member(member: &str, stanza: &Stanza) -> String {
    format!("Invalid object \"{member}\" in group \"{}\"", stanza.text)
}

/// Analyze one `address-object ipv4` stanza. Later `host`/`network`/`range`
/// lines override earlier ones, `zone` lines are tolerated and ignored.
pub fn address_object_plan(stanza: &Stanza, resolver: &Resolver) -> Result<AddressObjectPlan, String> {
    let name = stanza_name(stanza, ADDRESS_OBJECT_PREFIX);
    let addrs = &resolver.addresses;
    if addrs.objects.contains_key(&name) || addrs.range_objects.contains_key(&format!("{name}{RANGE_SUFFIX}")) {
        return Err("Object already exists".to_string());
    }

    let mut plan: Option<AddressObjectPlan> = None;
    for child in &stanza.children {
        let tokens: Vec<&str> = child.split_whitespace().collect();
        match tokens.as_slice() {
            ["host", ip] => {
                plan = Some(AddressObjectPlan::Cidr {
                    name: name.clone(),
                    cidr: format!("{ip}/32"),
                });
            }
            ["network", ip, mask] => {
                let prefix = masks::prefix_len(mask).ok_or_else(|| format!("Unknown subnet mask \"{mask}\""))?;
                plan = Some(AddressObjectPlan::Cidr {
                    name: name.clone(),
                    cidr: format!("{ip}/{prefix}"),
                });
            }
            ["range", lo, hi] => {
                let lo: Ipv4Addr = lo.parse().map_err(|_| "Invalid range line".to_string())?;
                let hi: Ipv4Addr = hi.parse().map_err(|_| "Invalid range line".to_string())?;
                let cover = range_cover::summarize(lo, hi);
                if cover.is_empty() {
                    return Err("Invalid range line".to_string());
                }
                plan = Some(AddressObjectPlan::Range {
                    name: name.clone(),
                    cover,
                });
            }
            _ => {}
        }
    }
    plan.ok_or_else(|| "No valid host or network line".to_string())
}

pub fn fqdn_object_plan(stanza: &Stanza, resolver: &Resolver) -> Result<FqdnObjectPlan, String> {
    let name = stanza_name(stanza, FQDN_OBJECT_PREFIX);
    if resolver.addresses.fqdn_objects.contains_key(&name) {
        return Err("Object already exists".to_string());
    }

    for child in &stanza.children {
        let tokens: Vec<&str> = child.split_whitespace().collect();
        if let ["domain", fqdn] = tokens.as_slice() {
            return Ok(FqdnObjectPlan {
                name,
                fqdn: fqdn.to_string(),
            });
        }
    }
    Err("No domain line".to_string())
}

/// Analyze an `address-group ipv4` stanza. Unresolvable members are journaled
/// and dropped; the group itself survives with whatever members resolved.
pub fn address_group_plan(stanza: &Stanza, resolver: &Resolver, journal: &mut Journal) -> Result<AddressGroupPlan, String> {
    let name = stanza_name(stanza, ADDRESS_GROUP_PREFIX);
    let addrs = &resolver.addresses;
    if addrs.object_groups.contains_key(&name) {
        return Err("Object Group already exists".to_string());
    }
    if stanza.children.is_empty() {
        return Err(format!("\"{name}\" contains no valid entries"));
    }

    let mut plan = AddressGroupPlan {
        name,
        ..AddressGroupPlan::default()
    };
    for child in &stanza.children {
        if let Some(member) = child.strip_prefix(ADDRESS_OBJECT_PREFIX) {
            let member = sanitize_name(member);
            if let Some(id) = addrs.objects.get(&member) {
                plan.object_ids.push(id.clone());
            } else if let Some(id) = addrs.range_objects.get(&format!("{member}{RANGE_SUFFIX}")) {
                plan.range_ids.push(id.clone());
            } else {
                journal.record(&stanza.text, &invalid_member(&member, stanza));
            }
        } else if let Some(member) = child.strip_prefix(ADDRESS_GROUP_PREFIX) {
            let member = sanitize_name(member);
            if let Some(id) = addrs.object_groups.get(&member) {
                plan.nested_group_ids.push(id.clone());
            } else {
                journal.record(&stanza.text, &invalid_member(&member, stanza));
            }
        }
    }
    Ok(plan)
}

/// Analyze an `address-group ipv6` stanza, the syntactic home of FQDN groups
/// and mixed FQDN/IPv4 groups.
pub fn fqdn_group_plan(stanza: &Stanza, resolver: &Resolver, journal: &mut Journal) -> Result<FqdnGroupPlan, String> {
    let name = stanza_name(stanza, IPV6_GROUP_PREFIX);
    let addrs = &resolver.addresses;
    if addrs.object_groups.contains_key(&name) || addrs.fqdn_object_groups.contains_key(&name) {
        return Err("Object Group already exists".to_string());
    }
    if stanza.children.is_empty() {
        return Err(format!("\"{name}\" contains no valid entries"));
    }

    let mut plan = FqdnGroupPlan {
        name,
        ..FqdnGroupPlan::default()
    };
    for child in &stanza.children {
        if let Some(member) = child.strip_prefix(FQDN_OBJECT_PREFIX) {
            let member = sanitize_name(member);
            if let Some(id) = addrs.fqdn_objects.get(&member) {
                plan.fqdn_ids.push(id.clone());
            } else {
                journal.record(&stanza.text, &invalid_member(&member, stanza));
            }
        } else if let Some(member) = child.strip_prefix(ADDRESS_OBJECT_PREFIX) {
            let member = sanitize_name(member);
            if let Some(id) = addrs.objects.get(&member) {
                plan.ipv4_ids.push(id.clone());
            } else {
                journal.record(&stanza.text, &invalid_member(&member, stanza));
            }
        }
    }
    Ok(plan)
}

/// Parse a `service-object` line: `service-object <name> TCP|UDP <lo> <hi>`
/// or `service-object <name> ICMP|ICMPV6`, name optionally quoted.
pub fn service_plan(stanza: &Stanza, resolver: &Resolver) -> Result<ServicePlan, String> {
    const INVALID: &str = "Invalid Service Object (service not supported, missing ports, etc.)";

    let rest = stanza
        .text
        .strip_prefix(SERVICE_OBJECT_PREFIX)
        .unwrap_or(&stanza.text)
        .trim();
    let (raw_name, proto_ports) = if let Some(quoted) = rest.strip_prefix('"') {
        quoted.split_once('"').ok_or_else(|| INVALID.to_string())?
    } else {
        rest.split_once(char::is_whitespace).ok_or_else(|| INVALID.to_string())?
    };

    let name = sanitize_name(raw_name);
    if resolver.services.objects.contains_key(&name) {
        return Err("Service Object already exists".to_string());
    }

    let tokens: Vec<&str> = proto_ports.split_whitespace().collect();
    let entry = match tokens.as_slice() {
        [proto, lo, hi] => {
            let protocol = Protocol::parse(proto).filter(|p| matches!(*p, Protocol::Tcp | Protocol::Udp));
            let protocol = protocol.ok_or_else(|| INVALID.to_string())?;
            let lo: u16 = lo.parse().map_err(|_| INVALID.to_string())?;
            let hi: u16 = hi.parse().map_err(|_| INVALID.to_string())?;
            let port = if lo == hi { PortExpr::Single(lo) } else { PortExpr::Range(lo, hi) };
            ServiceEntry::new(protocol, port)
        }
        [proto] => {
            let protocol = Protocol::parse(proto).filter(|p| matches!(*p, Protocol::Icmp | Protocol::Icmpv6));
            ServiceEntry::new(protocol.ok_or_else(|| INVALID.to_string())?, PortExpr::None)
        }
        _ => return Err(INVALID.to_string()),
    };

    Ok(ServicePlan { name, entry })
}

/// Analyze a `service-group` stanza. Direct members land in `entries`, nested
/// group members are spliced into `nested`.
pub fn service_group_plan(stanza: &Stanza, resolver: &Resolver, journal: &mut Journal) -> Result<ServiceGroupPlan, String> {
    let name = sanitize_name(stanza.text.strip_prefix(SERVICE_GROUP_PREFIX).unwrap_or(&stanza.text));
    let services = &resolver.services;
    if services.groups.contains_key(&name) || services.group_of_groups.contains_key(&name) {
        return Err("Service Group already exists".to_string());
    }
    if stanza.children.is_empty() {
        return Err("No valid service object line".to_string());
    }

    let mut plan = ServiceGroupPlan {
        name,
        ..ServiceGroupPlan::default()
    };
    for child in &stanza.children {
        if let Some(member) = child.strip_prefix(SERVICE_OBJECT_PREFIX) {
            let member = sanitize_name(member);
            if let Some(entry) = services.objects.get(&member) {
                plan.entries.push(entry.clone());
            } else {
                journal.record(
                    &stanza.text,
                    &format!("Invalid service object \"{member}\" in group \"{}\"", stanza.text),
                );
            }
        } else if let Some(member) = child.strip_prefix(SERVICE_GROUP_PREFIX) {
            let member = sanitize_name(member);
            if let Some(entries) = services.groups.get(&member) {
                plan.nested.extend(entries.iter().cloned());
            } else {
                journal.record(
                    &stanza.text,
                    &format!("Invalid service object \"{member}\" in group \"{}\"", stanza.text),
                );
            }
        }
    }

    if plan.entries.is_empty() {
        return Err("No valid service object line".to_string());
    }
    Ok(plan)
}

/// Drives the six ordered passes over the configuration. Dependencies must be
/// materialized before dependents because SonicWall permits forward
/// references within a file.
pub struct Compiler<'a, S: PolicyStore> {
    pub store: &'a mut S,
    pub resolver: &'a mut Resolver,
    pub journal: &'a mut Journal,
}

impl<'a, S: PolicyStore> Compiler<'a, S> {
    pub fn new(store: &'a mut S, resolver: &'a mut Resolver, journal: &'a mut Journal) -> Self {
        Compiler {
            store,
            resolver,
            journal,
        }
    }

    /// Adopt every Policy Object and Policy Object Group the organization
    /// already has, so re-runs create nothing twice.
    pub fn bootstrap(&mut self) -> Result<(), meraki::Error> {
        let objects = self.store.policy_objects()?;
        let cidr_ids: HashSet<String> = objects
            .iter()
            .filter(|o| o.kind == "cidr")
            .map(|o| o.id.clone())
            .collect();
        for object in objects {
            match object.kind.as_str() {
                "cidr" => {
                    self.resolver.addresses.objects.insert(object.name, object.id);
                }
                "fqdn" => {
                    self.resolver.addresses.fqdn_objects.insert(object.name, object.id);
                }
                other => {
                    tracing::debug!(name = %object.name, kind = %other, "ignoring existing policy object");
                }
            }
        }

        for group in self.store.policy_object_groups()? {
            if group.name.contains(RANGE_SUFFIX) {
                self.resolver.addresses.range_objects.insert(group.name, group.id);
            } else if group.object_ids.iter().all(|id| cidr_ids.contains(id)) {
                self.resolver.addresses.object_groups.insert(group.name, group.id);
            } else {
                self.resolver.addresses.fqdn_object_groups.insert(group.name, group.id);
            }
        }
        Ok(())
    }

    pub fn run(&mut self, show_run: &ShowRun) -> Result<(), meraki::Error> {
        self.pass_address_objects(show_run)?;
        self.pass_fqdn_objects(show_run)?;
        self.pass_address_groups(show_run)?;
        self.pass_fqdn_groups(show_run)?;
        self.pass_nested_groups(show_run);
        self.pass_services(show_run);
        Ok(())
    }

    fn pass_address_objects(&mut self, show_run: &ShowRun) -> Result<(), meraki::Error> {
        let mut stanzas = show_run.matching(ADDRESS_OBJECT_PREFIX);
        split_all(&mut stanzas, StanzaKind::Ipv4Object);
        let total = stanzas.len();
        tracing::info!(total, "creating ipv4 network objects");

        for (index, stanza) in stanzas.iter().enumerate() {
            tracing::info!(object = %stanza.text, "processing object ({} of {total})", index + 1);
            match address_object_plan(stanza, self.resolver) {
                Ok(AddressObjectPlan::Cidr { name, cidr }) => {
                    let created = self.store.create_policy_object(&NewPolicyObject::Cidr {
                        name: name.clone(),
                        cidr,
                    })?;
                    self.resolver.addresses.objects.insert(created.name, created.id);
                }
                Ok(AddressObjectPlan::Range { name, cover }) => {
                    let mut object_ids = Vec::with_capacity(cover.len());
                    for (i, net) in cover.iter().enumerate() {
                        let created = self.store.create_policy_object(&NewPolicyObject::Cidr {
                            name: format!("{name}{RANGE_SUFFIX}{i}"),
                            cidr: net.to_string(),
                        })?;
                        object_ids.push(created.id);
                    }
                    let group = self
                        .store
                        .create_policy_object_group(&format!("{name}{RANGE_SUFFIX}"), &object_ids)?;
                    self.resolver.addresses.range_objects.insert(group.name, group.id);
                }
                Err(reason) => self.journal.record(&stanza.text, &reason),
            }
        }
        Ok(())
    }

    fn pass_fqdn_objects(&mut self, show_run: &ShowRun) -> Result<(), meraki::Error> {
        let mut stanzas = show_run.matching(FQDN_OBJECT_PREFIX);
        split_all(&mut stanzas, StanzaKind::FqdnObject);
        let total = stanzas.len();
        tracing::info!(total, "creating fqdn objects");

        for (index, stanza) in stanzas.iter().enumerate() {
            tracing::info!(object = %stanza.text, "processing object ({} of {total})", index + 1);
            match fqdn_object_plan(stanza, self.resolver) {
                Ok(plan) => {
                    let created = self.store.create_policy_object(&NewPolicyObject::Fqdn {
                        name: plan.name,
                        fqdn: plan.fqdn,
                    })?;
                    self.resolver.addresses.fqdn_objects.insert(created.name, created.id);
                }
                Err(reason) => self.journal.record(&stanza.text, &reason),
            }
        }
        Ok(())
    }

    fn pass_address_groups(&mut self, show_run: &ShowRun) -> Result<(), meraki::Error> {
        // non-nested groups first, SonicWall allows groups to be defined
        // after the groups that use them
        let mut stanzas = show_run.matching_without_child(ADDRESS_GROUP_PREFIX, ADDRESS_GROUP_PREFIX);
        split_all(&mut stanzas, StanzaKind::Ipv4Group);
        let total = stanzas.len();
        tracing::info!(total, "creating ipv4 network object groups");

        for (index, stanza) in stanzas.iter().enumerate() {
            tracing::info!(group = %stanza.text, "processing object ({} of {total})", index + 1);
            let plan = match address_group_plan(stanza, self.resolver, self.journal) {
                Ok(plan) => plan,
                Err(reason) => {
                    self.journal.record(&stanza.text, &reason);
                    continue;
                }
            };
            if !plan.range_ids.is_empty() {
                // groups that pull in ranges stay local, the flattener
                // expands them at reference time
                self.resolver.addresses.range_object_groups.insert(
                    format!("{}{RANGE_SUFFIX}", plan.name),
                    GroupParts {
                        object_ids: plan.object_ids,
                        group_ids: plan.range_ids,
                    },
                );
            } else if !plan.object_ids.is_empty() {
                let group = self.store.create_policy_object_group(&plan.name, &plan.object_ids)?;
                self.resolver.addresses.object_groups.insert(group.name, group.id);
            } else {
                self.journal
                    .record(&stanza.text, &format!("\"{}\" contains no valid entries", plan.name));
            }
        }
        Ok(())
    }

    fn pass_fqdn_groups(&mut self, show_run: &ShowRun) -> Result<(), meraki::Error> {
        let mut stanzas = show_run.matching_without_child(IPV6_GROUP_PREFIX, IPV6_GROUP_PREFIX);
        split_all(&mut stanzas, StanzaKind::Ipv6Group);
        let total = stanzas.len();
        tracing::info!(total, "creating fqdn network object groups");

        for (index, stanza) in stanzas.iter().enumerate() {
            tracing::info!(group = %stanza.text, "processing object ({} of {total})", index + 1);
            let plan = match fqdn_group_plan(stanza, self.resolver, self.journal) {
                Ok(plan) => plan,
                Err(reason) => {
                    self.journal.record(&stanza.text, &reason);
                    continue;
                }
            };
            if plan.fqdn_ids.is_empty() && plan.ipv4_ids.is_empty() {
                self.journal
                    .record(&stanza.text, &format!("\"{}\" contains no valid entries", plan.name));
            } else if plan.fqdn_ids.is_empty() {
                // plain ipv4 members under an ipv6 group header; nothing
                // Meraki-representable beyond what pass 3 already covers
                self.journal.record(&stanza.text, "No FQDN members in group");
            } else if plan.ipv4_ids.is_empty() {
                let group = self.store.create_policy_object_group(&plan.name, &plan.fqdn_ids)?;
                self.resolver.addresses.fqdn_object_groups.insert(group.name, group.id);
            } else {
                // Meraki does not allow mixed-category groups, split
                let fqdn_name = format!("{}{FQDN_SPLIT_SUFFIX}", plan.name);
                if !self.resolver.addresses.fqdn_object_groups.contains_key(&fqdn_name) {
                    let group = self.store.create_policy_object_group(&fqdn_name, &plan.fqdn_ids)?;
                    self.resolver.addresses.fqdn_object_groups.insert(group.name, group.id);
                }
                let ipv4_name = format!("{}{IPV4_SPLIT_SUFFIX}", plan.name);
                if !self.resolver.addresses.object_groups.contains_key(&ipv4_name) {
                    let group = self.store.create_policy_object_group(&ipv4_name, &plan.ipv4_ids)?;
                    self.resolver.addresses.object_groups.insert(group.name, group.id);
                }
            }
        }
        Ok(())
    }

    fn pass_nested_groups(&mut self, show_run: &ShowRun) {
        let stanzas = show_run.matching_with_child(ADDRESS_GROUP_PREFIX, ADDRESS_GROUP_PREFIX);
        let total = stanzas.len();
        tracing::info!(total, "creating ipv4 network object groups (nested)");

        for (index, stanza) in stanzas.iter().enumerate() {
            tracing::info!(group = %stanza.text, "processing object ({} of {total})", index + 1);
            let plan = match address_group_plan(stanza, self.resolver, self.journal) {
                Ok(plan) => plan,
                Err(reason) => {
                    self.journal.record(&stanza.text, &reason);
                    continue;
                }
            };
            if plan.nested_group_ids.is_empty() {
                self.journal
                    .record(&stanza.text, &format!("\"{}\" contains no valid nested groups", plan.name));
            } else if self.resolver.addresses.group_of_groups.contains_key(&plan.name) {
                self.journal.record(&stanza.text, "Object Group already exists");
            } else {
                // kept local, never flattened into a remote group
                self.resolver.addresses.group_of_groups.insert(
                    plan.name,
                    GroupParts {
                        object_ids: plan.object_ids,
                        group_ids: plan.nested_group_ids,
                    },
                );
            }
        }
    }

    fn pass_services(&mut self, show_run: &ShowRun) {
        let stanzas = show_run.matching(SERVICE_OBJECT_PREFIX);
        let total = stanzas.len();
        tracing::info!(total, "creating service objects");
        for (index, stanza) in stanzas.iter().enumerate() {
            tracing::info!(service = %stanza.text, "processing object ({} of {total})", index + 1);
            match service_plan(stanza, self.resolver) {
                Ok(plan) => {
                    self.resolver.services.objects.insert(plan.name, plan.entry);
                }
                Err(reason) => self.journal.record(&stanza.text, &reason),
            }
        }

        let stanzas = show_run.matching_without_child(SERVICE_GROUP_PREFIX, SERVICE_GROUP_PREFIX);
        let total = stanzas.len();
        tracing::info!(total, "creating service groups");
        for (index, stanza) in stanzas.iter().enumerate() {
            tracing::info!(group = %stanza.text, "processing object ({} of {total})", index + 1);
            match service_group_plan(stanza, self.resolver, self.journal) {
                Ok(plan) => {
                    self.resolver.services.groups.insert(plan.name, plan.entries);
                }
                Err(reason) => self.journal.record(&stanza.text, &reason),
            }
        }

        let stanzas = show_run.matching_with_child(SERVICE_GROUP_PREFIX, SERVICE_GROUP_PREFIX);
        let total = stanzas.len();
        tracing::info!(total, "creating service groups (nested)");
        for (index, stanza) in stanzas.iter().enumerate() {
            tracing::info!(group = %stanza.text, "processing object ({} of {total})", index + 1);
            match service_group_plan(stanza, self.resolver, self.journal) {
                Ok(plan) => {
                    if plan.nested.is_empty() {
                        continue;
                    }
                    let mut combined = plan.entries;
                    combined.extend(plan.nested);
                    self.resolver.services.group_of_groups.insert(plan.name, combined);
                }
                Err(reason) => self.journal.record(&stanza.text, &reason),
            }
        }
    }
}
