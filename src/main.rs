mod cli;
mod config;
mod credentials;
mod error;
mod logging;
mod proxy;
mod rotator;
mod routes;
mod watcher;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use slog_scope::{error, warn};

use cli::Cli;
use credentials::CredentialStore;
use rotator::Rotator;

fn main() {
    let cli = Cli::parse();
    logging::init_terminal(cli.verbose);
    if let Err(e) = run(cli) {
        error!("startup_failed"; "error" => format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let users = config::load_users(&cli.users_file)
        .with_context(|| format!("loading credentials from {}", cli.users_file.display()))?;
    if users.is_empty() {
        anyhow::bail!(
            "credential file {} contains no users",
            cli.users_file.display()
        );
    }
    let credentials = Arc::new(CredentialStore::new(users));

    let entries = config::load_subnets(&cli.subnets_file)
        .with_context(|| format!("loading prefixes from {}", cli.subnets_file.display()))?;
    let (accepted, errors) = rotator::parse_prefixes(&entries);
    for err in &errors {
        warn!("prefix_entry_skipped"; "entry" => err.as_str());
    }
    let rotator = Arc::new(Rotator::new(accepted.clone(), cli.rotation_limit)?);

    // Routes go in before the proxy can dial, so every address the rotator
    // may emit is already bindable.
    routes::apply_local_routes(&accepted, &cli.interface)?;

    watcher::spawn_prefix_watcher(
        cli.subnets_file.clone(),
        rotator.clone(),
        cli.interface.clone(),
    );
    watcher::spawn_user_watcher(cli.users_file.clone(), credentials.clone());

    let listener =
        proxy::bind_reuseport(cli.listen).with_context(|| format!("binding {}", cli.listen))?;

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    rt.block_on(async move {
        let resolver = proxy::dns::system_resolver();
        let hooks = Arc::new(proxy::build_hooks(credentials, rotator, resolver));
        proxy::serve(listener, hooks).await
    })
}
