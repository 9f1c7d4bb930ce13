use clap::Parser;
use std::path::PathBuf;

/// Migrate a SonicWall "show-run" configuration onto a Meraki MX security
/// appliance: policy objects, policy object groups and firewall rules.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    /// SonicWall show-run configuration file
    #[arg(short = 'r', long = "show-run")]
    pub show_run: PathBuf,

    /// JSON file of VLANs to create before rule installation
    #[arg(short = 'v', long = "vlans")]
    pub vlans: Option<PathBuf>,

    /// JSON file of static routes to create before rule installation
    #[arg(short = 's', long = "static-routes")]
    pub static_routes: Option<PathBuf>,

    /// Migration settings file
    #[arg(short = 'c', long = "config", default_value = "swmx.toml")]
    pub config: PathBuf,

    /// Meraki Dashboard API key
    #[arg(long, env = "MERAKI_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Route rules into inbound / outbound / site-to-site rulesets by zone
    #[arg(long)]
    pub mapping: bool,

    /// Append default-zone VLAN deny rules to the outbound ruleset
    #[arg(long = "vlan-rules")]
    pub vlan_rules: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}
