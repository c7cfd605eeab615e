use std::path::Path;

use crate::config::Config;
use crate::models::Output;
use crate::rules::load_rules;

pub async fn list_rules(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let rules = load_rules(&config.rules_dir)?;
    Output::success(rules).print();

    Ok(())
}
