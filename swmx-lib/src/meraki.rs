use backoff::ExponentialBackoff;
use reqwest::StatusCode;
use reqwest::blocking;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::json;
use thiserror::Error;
use url::Url;

use std::fmt;
use std::time::Duration;

const BASE_URL: &str = "https://api.meraki.com/api/v1/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
// Meraki list endpoints paginate; one maximum-size page covers any
// realistically sized migration target.
const PER_PAGE: &str = "1000";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Error parsing url: {0}")]
    Url(#[from] url::ParseError),
    #[error("Error making http request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Dashboard returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("Error serializing request body: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Organization `{0}` not found")]
    OrgNotFound(String),
    #[error("Network `{0}` not found")]
    NetworkNotFound(String),
}

impl Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::Api { status, .. } => *status == StatusCode::TOO_MANY_REQUESTS,
            Error::Request(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Meraki ids arrive as strings in some endpoints and bare numbers in others.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("expected string or number id, got {other}"))),
    }
}

fn id_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<serde_json::Value>::deserialize(deserializer)?;
    values
        .into_iter()
        .map(|value| match value {
            serde_json::Value::String(s) => Ok(s),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            other => Err(de::Error::custom(format!("expected string or number id, got {other}"))),
        })
        .collect()
}

#[derive(Clone, Debug, Deserialize)]
pub struct Organization {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Network {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
}

/// Organization-scoped Policy Object (a named CIDR or FQDN).
#[derive(Clone, Debug, Deserialize)]
pub struct PolicyObject {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub cidr: Option<String>,
    #[serde(default)]
    pub fqdn: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyObjectGroup {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "id_strings")]
    pub object_ids: Vec<String>,
}

/// Creation payload for a Policy Object. Category is always `network`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NewPolicyObject {
    Cidr { name: String, cidr: String },
    Fqdn { name: String, fqdn: String },
}

impl NewPolicyObject {
    pub fn name(&self) -> &str {
        match self {
            NewPolicyObject::Cidr { name, .. } | NewPolicyObject::Fqdn { name, .. } => name,
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            NewPolicyObject::Cidr { name, cidr } => json!({
                "name": name,
                "category": "network",
                "type": "cidr",
                "cidr": cidr,
            }),
            NewPolicyObject::Fqdn { name, fqdn } => json!({
                "name": name,
                "category": "network",
                "type": "fqdn",
                "fqdn": fqdn,
            }),
        }
    }
}

/// Flattened wire-form firewall rule, exactly what the rule endpoints accept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MxFirewallRule {
    #[serde(default)]
    pub comment: String,
    pub policy: String,
    pub protocol: String,
    pub src_port: String,
    pub src_cidr: String,
    pub dest_cidr: String,
    pub dest_port: String,
}

impl fmt::Display for MxFirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {}:{} -> {}:{}",
            self.policy, self.protocol, self.src_cidr, self.src_port, self.dest_cidr, self.dest_port
        )
    }
}

#[derive(Clone, Debug, Deserialize)]
struct RulesEnvelope {
    rules: Vec<MxFirewallRule>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vlan {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    pub subnet: String,
    pub appliance_ip: String,
    #[serde(default)]
    pub group_policy_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticRoute {
    pub name: String,
    pub subnet: String,
    pub gateway_ip: String,
}

/// The subset of the Dashboard the object compiler needs, as a seam so the
/// passes can run against an in-memory store in tests.
pub trait PolicyStore {
    fn policy_objects(&mut self) -> Result<Vec<PolicyObject>, Error>;
    fn policy_object_groups(&mut self) -> Result<Vec<PolicyObjectGroup>, Error>;
    fn create_policy_object(&mut self, new: &NewPolicyObject) -> Result<PolicyObject, Error>;
    fn create_policy_object_group(&mut self, name: &str, object_ids: &[String]) -> Result<PolicyObjectGroup, Error>;
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

fn request_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: Some(Duration::from_secs(180)),
        ..ExponentialBackoff::default()
    }
}

fn unwrap_backoff(err: backoff::Error<Error>) -> Error {
    match err {
        backoff::Error::Permanent(e) => e,
        backoff::Error::Transient { err, .. } => err,
    }
}

fn classify(err: Error) -> backoff::Error<Error> {
    if err.is_transient() {
        backoff::Error::transient(err)
    } else {
        backoff::Error::permanent(err)
    }
}

/// Blocking Meraki Dashboard v1 client.
pub struct Dashboard {
    client: blocking::Client,
    base: Url,
    api_key: String,
}

impl Dashboard {
    pub fn new(api_key: &str) -> Result<Self, Error> {
        Self::with_base(api_key, BASE_URL)
    }

    pub fn with_base(api_key: &str, base: &str) -> Result<Self, Error> {
        let client = blocking::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Dashboard {
            client,
            base: Url::parse(base)?,
            api_key: api_key.to_string(),
        })
    }

    fn send(&self, build: impl Fn() -> blocking::RequestBuilder) -> Result<blocking::Response, Error> {
        backoff::retry(request_backoff(), || {
            let resp = build()
                .bearer_auth(&self.api_key)
                .headers(json_headers())
                .send()
                .map_err(|e| classify(Error::Request(e)))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().unwrap_or_default();
                return Err(classify(Error::Api { status, body }));
            }
            Ok(resp)
        })
        .map_err(unwrap_backoff)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, paginated: bool) -> Result<T, Error> {
        let mut url = self.base.join(path)?;
        if paginated {
            url.query_pairs_mut().append_pair("perPage", PER_PAGE);
        }
        tracing::debug!(%url, "get");
        Ok(self.send(|| self.client.get(url.clone()))?.json::<T>()?)
    }

    fn post_json<T: DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> Result<T, Error> {
        let url = self.base.join(path)?;
        tracing::debug!(%url, body = %body, "post");
        Ok(self.send(|| self.client.post(url.clone()).json(body))?.json::<T>()?)
    }

    fn put_json(&self, path: &str, body: &serde_json::Value) -> Result<(), Error> {
        let url = self.base.join(path)?;
        tracing::debug!(%url, "put");
        self.send(|| self.client.put(url.clone()).json(body))?;
        Ok(())
    }

    pub fn organizations(&self) -> Result<Vec<Organization>, Error> {
        self.get_json("organizations", false)
    }

    pub fn networks(&self, org_id: &str) -> Result<Vec<Network>, Error> {
        self.get_json(&format!("organizations/{org_id}/networks"), true)
    }

    /// Resolve an organization name to its id.
    pub fn find_org_id(&self, org_name: &str) -> Result<String, Error> {
        self.organizations()?
            .into_iter()
            .find(|org| org.name == org_name)
            .map(|org| org.id)
            .ok_or_else(|| Error::OrgNotFound(org_name.to_string()))
    }

    /// Resolve a network name to its id within an organization.
    pub fn find_network_id(&self, org_id: &str, network_name: &str) -> Result<String, Error> {
        self.networks(org_id)?
            .into_iter()
            .find(|network| network.name == network_name)
            .map(|network| network.id)
            .ok_or_else(|| Error::NetworkNotFound(network_name.to_string()))
    }

    pub fn policy_objects(&self, org_id: &str) -> Result<Vec<PolicyObject>, Error> {
        self.get_json(&format!("organizations/{org_id}/policyObjects"), true)
    }

    pub fn policy_object_groups(&self, org_id: &str) -> Result<Vec<PolicyObjectGroup>, Error> {
        self.get_json(&format!("organizations/{org_id}/policyObjects/groups"), true)
    }

    pub fn create_policy_object(&self, org_id: &str, new: &NewPolicyObject) -> Result<PolicyObject, Error> {
        self.post_json(&format!("organizations/{org_id}/policyObjects"), &new.body())
    }

    pub fn create_policy_object_group(
        &self,
        org_id: &str,
        name: &str,
        object_ids: &[String],
    ) -> Result<PolicyObjectGroup, Error> {
        self.post_json(
            &format!("organizations/{org_id}/policyObjects/groups"),
            &json!({ "name": name, "objectIds": object_ids }),
        )
    }

    pub fn l3_firewall_rules(&self, network_id: &str) -> Result<Vec<MxFirewallRule>, Error> {
        let envelope: RulesEnvelope =
            self.get_json(&format!("networks/{network_id}/appliance/firewall/l3FirewallRules"), false)?;
        Ok(envelope.rules)
    }

    pub fn update_l3_firewall_rules(&self, network_id: &str, rules: &[MxFirewallRule]) -> Result<(), Error> {
        self.put_json(
            &format!("networks/{network_id}/appliance/firewall/l3FirewallRules"),
            &json!({ "rules": rules }),
        )
    }

    pub fn update_inbound_firewall_rules(&self, network_id: &str, rules: &[MxFirewallRule]) -> Result<(), Error> {
        self.put_json(
            &format!("networks/{network_id}/appliance/firewall/inboundFirewallRules"),
            &json!({ "rules": rules }),
        )
    }

    pub fn update_vpn_firewall_rules(&self, org_id: &str, rules: &[MxFirewallRule]) -> Result<(), Error> {
        self.put_json(
            &format!("organizations/{org_id}/appliance/vpn/vpnFirewallRules"),
            &json!({ "rules": rules }),
        )
    }

    pub fn vlans(&self, network_id: &str) -> Result<Vec<Vlan>, Error> {
        self.get_json(&format!("networks/{network_id}/appliance/vlans"), false)
    }

    pub fn create_vlan(&self, network_id: &str, vlan: &Vlan) -> Result<(), Error> {
        let body = serde_json::to_value(vlan)?;
        let _: serde_json::Value = self.post_json(&format!("networks/{network_id}/appliance/vlans"), &body)?;
        Ok(())
    }

    pub fn static_routes(&self, network_id: &str) -> Result<Vec<StaticRoute>, Error> {
        self.get_json(&format!("networks/{network_id}/appliance/staticRoutes"), false)
    }

    pub fn create_static_route(&self, network_id: &str, route: &StaticRoute) -> Result<(), Error> {
        let body = serde_json::to_value(route)?;
        let _: serde_json::Value = self.post_json(&format!("networks/{network_id}/appliance/staticRoutes"), &body)?;
        Ok(())
    }
}

/// A `Dashboard` narrowed to one organization, carrying the scope the object
/// compiler works in.
pub struct OrgPolicyStore<'a> {
    pub dashboard: &'a Dashboard,
    pub org_id: String,
}

impl PolicyStore for OrgPolicyStore<'_> {
    fn policy_objects(&mut self) -> Result<Vec<PolicyObject>, Error> {
        self.dashboard.policy_objects(&self.org_id)
    }

    fn policy_object_groups(&mut self) -> Result<Vec<PolicyObjectGroup>, Error> {
        self.dashboard.policy_object_groups(&self.org_id)
    }

    fn create_policy_object(&mut self, new: &NewPolicyObject) -> Result<PolicyObject, Error> {
        self.dashboard.create_policy_object(&self.org_id, new)
    }

    fn create_policy_object_group(&mut self, name: &str, object_ids: &[String]) -> Result<PolicyObjectGroup, Error> {
        self.dashboard.create_policy_object_group(&self.org_id, name, object_ids)
    }
}

/// In-memory `PolicyStore` used by the test suite. Counts creations so
/// idempotency is observable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub objects: Vec<PolicyObject>,
    pub groups: Vec<PolicyObjectGroup>,
    pub created_objects: usize,
    pub created_groups: usize,
    next_id: u64,
}

impl MemoryStore {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    pub fn object_named(&self, name: &str) -> Option<&PolicyObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn group_named(&self, name: &str) -> Option<&PolicyObjectGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

impl PolicyStore for MemoryStore {
    fn policy_objects(&mut self) -> Result<Vec<PolicyObject>, Error> {
        Ok(self.objects.clone())
    }

    fn policy_object_groups(&mut self) -> Result<Vec<PolicyObjectGroup>, Error> {
        Ok(self.groups.clone())
    }

    fn create_policy_object(&mut self, new: &NewPolicyObject) -> Result<PolicyObject, Error> {
        let id = self.next_id();
        let object = match new {
            NewPolicyObject::Cidr { name, cidr } => PolicyObject {
                id,
                name: name.clone(),
                kind: "cidr".to_string(),
                cidr: Some(cidr.clone()),
                fqdn: None,
            },
            NewPolicyObject::Fqdn { name, fqdn } => PolicyObject {
                id,
                name: name.clone(),
                kind: "fqdn".to_string(),
                cidr: None,
                fqdn: Some(fqdn.clone()),
            },
        };
        self.objects.push(object.clone());
        self.created_objects += 1;
        Ok(object)
    }

    fn create_policy_object_group(&mut self, name: &str, object_ids: &[String]) -> Result<PolicyObjectGroup, Error> {
        let group = PolicyObjectGroup {
            id: self.next_id(),
            name: name.to_string(),
            object_ids: object_ids.to_vec(),
        };
        self.groups.push(group.clone());
        self.created_groups += 1;
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::{MxFirewallRule, PolicyObject, PolicyObjectGroup};

    #[test]
    fn test_policy_object_numeric_id() {
        let object: PolicyObject = serde_json::from_str(
            r#"{"id": 4821, "name": "H1", "category": "network", "type": "cidr", "cidr": "10.0.0.1/32"}"#,
        )
        .unwrap();
        assert_eq!(object.id, "4821");
        assert_eq!(object.kind, "cidr");
        assert_eq!(object.cidr.as_deref(), Some("10.0.0.1/32"));
    }

    #[test]
    fn test_policy_object_group_mixed_ids() {
        let group: PolicyObjectGroup =
            serde_json::from_str(r#"{"id": "7", "name": "G", "objectIds": [1, "2"]}"#).unwrap();
        assert_eq!(group.object_ids, vec!["1", "2"]);
    }

    #[test]
    fn test_firewall_rule_wire_shape() {
        let rule = MxFirewallRule {
            comment: "".into(),
            policy: "allow".into(),
            protocol: "tcp".into(),
            src_port: "any".into(),
            src_cidr: "OBJ[1]".into(),
            dest_cidr: "GRP[2]".into(),
            dest_port: "443".into(),
        };
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["srcCidr"], "OBJ[1]");
        assert_eq!(value["destCidr"], "GRP[2]");
        assert_eq!(value["destPort"], "443");

        let back: MxFirewallRule = serde_json::from_value(value).unwrap();
        assert_eq!(back, rule);
    }
}
