use regex::Regex;

use std::fmt::{self, Display};
use std::sync::LazyLock;

use crate::journal::Journal;
use crate::resolver::{Endpoint, ResolveError, Resolver, ServiceEntry, Slot};
use crate::show_run::{ShowRun, Stanza};
use crate::stanza::{StanzaKind, sanitize_name, split_all};
use crate::zone_map::DefaultZoneMap;

const RULE_PREFIX: &str = "access-rule ipv4";

/// Best-effort capture of the rule header. The child-line loop is the source
/// of truth; this catches rules whose children are incomplete.
static ACL_RULE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // the service slot may come before or after the destination slot
    Regex::new(
        r#"^access-rule ipv4 from (\w+) to (\w+)(?: action (\w+))?(?: source address (name "[^"]+"|name [\w.-]+|group "[^"]+"|group [\w.-]+|any))?(?: service (name "[^"]+"|name [\w.-]+|group "[^"]+"|group [\w.-]+|any))?(?: destination address (name "[^"]+"|name [\w.-]+|group "[^"]+"|group [\w.-]+|any))?(?: service (name "[^"]+"|name [\w.-]+|group "[^"]+"|group [\w.-]+|any))?"#,
    )
    .expect("hard-coded rule pattern")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Allow,
    Deny,
}

impl Action {
    /// SonicWall action word; `discard` is a silent drop, mapped to deny.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Action::Allow),
            "deny" | "discard" => Some(Action::Deny),
            _ => None,
        }
    }

    pub fn wire(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.wire())
    }
}

/// A fully resolved `access-rule ipv4` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclRule {
    pub src_zone: String,
    pub dst_zone: String,
    pub action: Action,
    pub comment: Option<String>,
    pub src: Endpoint,
    pub src_port: Option<String>,
    pub dst: Endpoint,
    pub services: Vec<ServiceEntry>,
}

#[derive(Debug, Default)]
struct PartialRule {
    src_zone: Option<String>,
    dst_zone: Option<String>,
    action: Option<Action>,
    comment: Option<String>,
    src: Option<Endpoint>,
    src_port: Option<String>,
    dst: Option<Endpoint>,
    services: Option<Vec<ServiceEntry>>,
}

enum ParsedRule {
    Acl(AclRule),
    /// src, dst and service were all `any`; only the default-zone map moves.
    AnyAny {
        src_zone: String,
        dst_zone: String,
        action: Action,
    },
}

fn parse_address_slot(text: &str, slot: Slot, resolver: &Resolver) -> Result<Endpoint, ResolveError> {
    let text = text.trim();
    if text == "any" {
        return Ok(Endpoint::any());
    }
    if let Some(name) = text.strip_prefix("name") {
        resolver.address_name(&sanitize_name(name), slot).map(Endpoint::Single)
    } else if let Some(name) = text.strip_prefix("group") {
        resolver.address_group(&sanitize_name(name), slot)
    } else {
        Err(ResolveError::UnknownObject(slot))
    }
}

fn parse_service_slot(text: &str, resolver: &Resolver) -> Result<Vec<ServiceEntry>, ResolveError> {
    let text = text.trim();
    if text == "any" {
        return Ok(vec![ServiceEntry::any()]);
    }
    if let Some(name) = text.strip_prefix("name") {
        resolver.service_name(&sanitize_name(name))
    } else if let Some(name) = text.strip_prefix("group") {
        resolver.service_group(&sanitize_name(name))
    } else {
        Err(ResolveError::UnknownService)
    }
}

fn apply_header(header: &str, rule: &mut PartialRule, resolver: &Resolver) -> Result<(), String> {
    let Some(captures) = ACL_RULE_REGEX.captures(header) else {
        return Ok(());
    };

    if let Some(zone) = captures.get(1) {
        rule.src_zone = Some(zone.as_str().to_string());
    }
    if let Some(zone) = captures.get(2) {
        rule.dst_zone = Some(zone.as_str().to_string());
    }
    if let Some(action) = captures.get(3) {
        rule.action = Action::parse(action.as_str());
    }
    if let Some(src) = captures.get(4) {
        rule.src = Some(parse_address_slot(src.as_str(), Slot::Source, resolver).map_err(|e| e.to_string())?);
    }
    if let Some(dst) = captures.get(6) {
        rule.dst = Some(parse_address_slot(dst.as_str(), Slot::Destination, resolver).map_err(|e| e.to_string())?);
    }
    if let Some(service) = captures.get(5).or_else(|| captures.get(7)) {
        rule.services = Some(parse_service_slot(service.as_str(), resolver).map_err(|e| e.to_string())?);
    }
    Ok(())
}

fn apply_children(stanza: &Stanza, rule: &mut PartialRule, resolver: &Resolver) -> Result<(), String> {
    for child in &stanza.children {
        let content = child.trim();

        if content.starts_with("no enable") {
            return Err("Inactive rules not allowed in Meraki".to_string());
        }

        if rule.src_zone.is_none() {
            if let Some(zone) = content.strip_prefix("from ") {
                rule.src_zone = Some(zone.trim().to_string());
            }
        }
        if rule.dst_zone.is_none() {
            if let Some(zone) = content.strip_prefix("to ") {
                rule.dst_zone = Some(zone.trim().to_string());
            }
        }
        if rule.action.is_none() {
            if let Some(action) = content.strip_prefix("action ") {
                rule.action = Action::parse(action.trim());
            }
        }
        if let Some(comment) = content.strip_prefix("comment ") {
            rule.comment = Some(comment.trim().replace('"', ""));
        }
        if rule.src.is_none() {
            if let Some(src) = content.strip_prefix("source address ") {
                rule.src = Some(parse_address_slot(src, Slot::Source, resolver).map_err(|e| e.to_string())?);
            }
        }
        if let Some(port) = content.strip_prefix("source port ") {
            if port.trim() == "any" {
                rule.src_port = Some("any".to_string());
            }
        }
        if rule.dst.is_none() {
            if let Some(dst) = content.strip_prefix("destination address ") {
                rule.dst = Some(parse_address_slot(dst, Slot::Destination, resolver).map_err(|e| e.to_string())?);
            }
        }
        if rule.services.is_none() {
            if let Some(service) = content.strip_prefix("service ") {
                rule.services = Some(parse_service_slot(service, resolver).map_err(|e| e.to_string())?);
            }
        }
    }
    Ok(())
}

fn parse_one(stanza: &Stanza, resolver: &Resolver) -> Result<ParsedRule, String> {
    let mut rule = PartialRule::default();
    apply_header(&stanza.text, &mut rule, resolver)?;
    apply_children(stanza, &mut rule, resolver)?;

    let (Some(src_zone), Some(dst_zone), Some(action), Some(src), Some(dst), Some(services)) = (
        rule.src_zone,
        rule.dst_zone,
        rule.action,
        rule.src,
        rule.dst,
        rule.services,
    ) else {
        return Err("Invalid line".to_string());
    };

    if src.is_any() && dst.is_any() && services.first().is_some_and(|s| s.is_any()) {
        return Ok(ParsedRule::AnyAny {
            src_zone,
            dst_zone,
            action,
        });
    }

    Ok(ParsedRule::Acl(AclRule {
        src_zone,
        dst_zone,
        action,
        comment: rule.comment,
        src,
        src_port: rule.src_port,
        dst,
        services,
    }))
}

/// Parse every `access-rule ipv4` stanza. Any-any-any-any rules move the
/// default-zone map instead of producing a rule; everything unparsable is
/// journaled and dropped.
pub fn parse_rules(
    show_run: &ShowRun,
    resolver: &Resolver,
    zone_map: &mut DefaultZoneMap,
    journal: &mut Journal,
) -> Vec<AclRule> {
    let mut stanzas = show_run.matching(RULE_PREFIX);
    split_all(&mut stanzas, StanzaKind::Rule);
    let total = stanzas.len();
    tracing::info!(total, "parsing access rules");

    let mut rules = Vec::new();
    for (index, stanza) in stanzas.iter().enumerate() {
        match parse_one(stanza, resolver) {
            Ok(ParsedRule::Acl(rule)) => {
                tracing::info!(rule = %stanza.text, "processing line ({} of {total})", index + 1);
                rules.push(rule);
            }
            Ok(ParsedRule::AnyAny {
                src_zone,
                dst_zone,
                action,
            }) => {
                tracing::info!(%src_zone, %dst_zone, %action, "any any any any rule placed in mapping file");
                zone_map.set(&src_zone, &dst_zone, action);
            }
            Err(reason) => {
                tracing::warn!(rule = %stanza.text, %reason, "error processing line ({} of {total})", index + 1);
                journal.record(&stanza.text, &reason);
            }
        }
    }
    rules
}
