use anyhow::bail;
use std::io::IsTerminal;
use std::path::Path;
use tracing::info;

use crate::auth::{ClientSecrets, TokenProvider};
use crate::config::Config;
use crate::gmail::GmailClient;
use crate::models::Output;
use crate::registry::authenticate_accounts;
use crate::rules::load_rules;
use crate::scheduler::{Scheduler, SystemClock};

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let window = config.cutoff_window()?;
    let clock = SystemClock::new(config.utc_offset()?);

    let rules = load_rules(&config.rules_dir)?;
    if rules.is_empty() {
        bail!("No forwarding rules found in {}", config.rules_dir.display());
    }
    info!(rules = rules.len(), "Forwarding rules loaded");

    let secrets = ClientSecrets::load(&config.credentials_file)?;
    // Consent needs someone at the keyboard
    let interactive = std::io::stdin().is_terminal();

    let registry = authenticate_accounts(&rules, |account: String| {
        let secrets = secrets.clone();
        let path = config.token_path(&account);
        let api_base = config.api_base.clone();
        let max_results = config.max_results;
        async move {
            let tokens = TokenProvider::obtain(&account, secrets, path, interactive).await?;
            GmailClient::new(&api_base, tokens, max_results)
        }
    })
    .await;

    if registry.is_empty() {
        bail!("No account could be authenticated");
    }
    info!(
        accounts = ?registry.addresses(),
        interval_secs = config.poll_interval_secs,
        cutoff = %format!("{}-{}", window.start().format("%H:%M"), window.end().format("%H:%M")),
        "Relay running"
    );

    let mut scheduler = Scheduler::new(registry, window, config.poll_interval(), clock);
    let ticks = scheduler.run().await;

    Output::<()>::success_msg(format!("Stopped for the cutoff window after {} ticks", ticks)).print();

    Ok(())
}
