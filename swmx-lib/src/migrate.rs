use thiserror::Error;

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::bootstrap;
use crate::flatten::{Classifier, flatten};
use crate::journal::Journal;
use crate::meraki::{self, Dashboard, OrgPolicyStore};
use crate::objects::Compiler;
use crate::resolver::Resolver;
use crate::rules::parse_rules;
use crate::settings::Settings;
use crate::show_run::ShowRun;
use crate::zone_map::DefaultZoneMap;

pub const OBJECTS_JOURNAL: &str = "unprocessed_objects.txt";
pub const RULES_JOURNAL: &str = "unprocessed_rules.txt";
pub const ZONE_MAP_CSV: &str = "zone_default_traffic_map.csv";

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Dashboard(#[from] meraki::Error),
    #[error(transparent)]
    Bootstrap(#[from] bootstrap::Error),
    #[error("Error writing zone map: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Clone, Debug)]
pub struct Options {
    pub show_run: PathBuf,
    pub vlans: Option<PathBuf>,
    pub static_routes: Option<PathBuf>,
    /// Route flattened rules into inbound/outbound/site-to-site by zone.
    pub mapping: bool,
    /// Append default-zone VLAN deny rules after the outbound ruleset.
    pub vlan_rules: bool,
}

/// The full migration: objects, optional VLAN/static-route bootstrap, rules,
/// default-zone synthesis. Transport errors abort; everything else lands in
/// the failure journals and the run continues.
pub fn run(dashboard: &Dashboard, settings: &Settings, options: &Options) -> Result<(), Error> {
    let org_id = dashboard.find_org_id(&settings.org_name)?;
    let network_id = dashboard.find_network_id(&org_id, &settings.network_name)?;
    tracing::info!(%org_id, %network_id, "resolved migration target");

    let show_run = ShowRun::from_file(&options.show_run)?;
    tracing::info!(stanzas = show_run.len(), file = %options.show_run.display(), "parsed show-run configuration");

    // step 1: policy objects and groups
    tracing::info!("step 1: creating network objects and groups");
    let mut resolver = Resolver::default();
    let mut objects_journal = Journal::create(Path::new(OBJECTS_JOURNAL))?;
    let mut store = OrgPolicyStore {
        dashboard,
        org_id: org_id.clone(),
    };
    let mut compiler = Compiler::new(&mut store, &mut resolver, &mut objects_journal);
    compiler.bootstrap()?;
    compiler.run(&show_run)?;

    // step 2: vlans and static routes needed by the rules
    if let Some(path) = &options.vlans {
        tracing::info!("step 2: creating vlans");
        bootstrap::create_vlans(dashboard, &network_id, path)?;
    }
    if let Some(path) = &options.static_routes {
        tracing::info!("step 2.5: creating static routes");
        bootstrap::create_static_routes(dashboard, &network_id, path)?;
    }

    // step 3: parse access rules
    tracing::info!("step 3: parsing access rules");
    let mut zone_map = DefaultZoneMap::new(&settings.zones);
    let mut rules_journal = Journal::create(Path::new(RULES_JOURNAL))?;
    let acl_rules = parse_rules(&show_run, &resolver, &mut zone_map, &mut rules_journal);

    // step 4: flatten and install
    tracing::info!("step 4: creating mx rules");
    let classifier = if options.mapping {
        Classifier {
            mapping: true,
            inbound_zones: settings.inbound.clone(),
            site2site_zones: settings.site2site.clone(),
        }
    } else {
        Classifier::unmapped()
    };
    let sets = flatten(&acl_rules, &classifier);
    tracing::info!(
        rules = sets.total(),
        network = %settings.network_name,
        "installing rules, this may take a few minutes"
    );
    if options.mapping {
        dashboard.update_vpn_firewall_rules(&org_id, &sets.site2site)?;
        tracing::info!(rules = sets.site2site.len(), "site to site rule list written");
        dashboard.update_l3_firewall_rules(&network_id, &sets.outbound)?;
        tracing::info!(rules = sets.outbound.len(), "outbound rule list written");
        dashboard.update_inbound_firewall_rules(&network_id, &sets.inbound)?;
        tracing::info!(rules = sets.inbound.len(), "inbound rule list written");
    } else {
        dashboard.update_l3_firewall_rules(&network_id, &sets.outbound)?;
        tracing::info!(rules = sets.outbound.len(), "outbound rule list written");
    }

    // step 5: default zone behavior
    tracing::info!("step 5: creating default zone behavior rules");
    if options.vlan_rules {
        let synthetic = zone_map.vlan_rules();
        if synthetic.is_empty() {
            tracing::info!("no vlan rules to create");
        } else {
            // appended after whatever the outbound list holds by now
            let mut existing = dashboard.l3_firewall_rules(&network_id)?;
            let count = synthetic.len();
            existing.extend(synthetic);
            dashboard.update_l3_firewall_rules(&network_id, &existing)?;
            tracing::info!(rules = count, "created vlan rules");
        }
    }

    let csv_file = File::create(ZONE_MAP_CSV)?;
    zone_map.write_csv(csv_file)?;
    tracing::info!(file = ZONE_MAP_CSV, "wrote default zone traffic map");

    tracing::info!(
        skipped_objects = objects_journal.records(),
        skipped_rules = rules_journal.records(),
        "migration complete"
    );
    Ok(())
}
