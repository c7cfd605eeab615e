use std::path::Path;

use crate::auth::{ClientSecrets, TokenProvider};
use crate::config::Config;
use crate::gmail::GmailClient;
use crate::models::Output;
use crate::registry::verify_identity;

pub async fn auth(config_path: Option<&Path>, account: &str) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let secrets = ClientSecrets::load(&config.credentials_file)?;

    let tokens = TokenProvider::obtain(account, secrets, config.token_path(account), true).await?;
    let client = GmailClient::new(&config.api_base, tokens, config.max_results)?;
    let identity = verify_identity(account, &client).await?;

    Output::<()>::success_msg(format!("Token for {} stored, authenticated as {}", client.account(), identity)).print();

    Ok(())
}
