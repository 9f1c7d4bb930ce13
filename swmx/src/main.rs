use std::process;

use swmx_lib::meraki::Dashboard;
use swmx_lib::migrate;
use swmx_lib::settings;

mod cli;

fn run() -> exitcode::ExitCode {
    let args = cli::parse();

    if !args.show_run.exists() {
        tracing::error!(file = %args.show_run.display(), "show run file not found");
        return exitcode::NOINPUT;
    }
    if let Some(vlans) = &args.vlans {
        if !vlans.exists() {
            tracing::error!(file = %vlans.display(), "vlan file not found");
            return exitcode::NOINPUT;
        }
    } else {
        tracing::warn!("no vlan file given, source vlans must already exist on the target MX");
    }
    if let Some(routes) = &args.static_routes {
        if !routes.exists() {
            tracing::error!(file = %routes.display(), "static route file not found");
            return exitcode::NOINPUT;
        }
    } else {
        tracing::warn!("no static route file given, routes must already exist on the target MX");
    }

    let settings = match settings::read(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, file = %args.config.display(), "cannot read settings");
            return exitcode::CONFIG;
        }
    };

    let dashboard = match Dashboard::new(&args.api_key) {
        Ok(dashboard) => dashboard,
        Err(e) => {
            tracing::error!(error = %e, "cannot build dashboard client");
            return exitcode::UNAVAILABLE;
        }
    };

    let options = migrate::Options {
        show_run: args.show_run,
        vlans: args.vlans,
        static_routes: args.static_routes,
        mapping: args.mapping,
        vlan_rules: args.vlan_rules,
    };

    match migrate::run(&dashboard, &settings, &options) {
        Ok(()) => {
            tracing::info!("acl rules converted");
            exitcode::OK
        }
        Err(migrate::Error::IO(e)) => {
            tracing::error!(error = %e, "migration failed");
            exitcode::IOERR
        }
        Err(migrate::Error::Csv(e)) => {
            tracing::error!(error = %e, "migration failed");
            exitcode::IOERR
        }
        Err(e) => {
            tracing::error!(error = %e, "migration failed, partial remote state remains installed");
            exitcode::UNAVAILABLE
        }
    }
}

fn main() {
    // install global collector configured based on RUST_LOG env var.
    tracing_subscriber::fmt::init();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting {}",
        env!("CARGO_PKG_NAME")
    );

    let exit = run();
    if exit != exitcode::OK {
        tracing::warn!("abnormal exit");
    }
    process::exit(exit)
}
