//! OAuth2 credentials for Gmail accounts.
//!
//! Each account's token lives in its own JSON file. Access tokens are
//! refreshed shortly before they expire; a brand-new account goes through
//! Google's consent screen once, with the code pasted back on the console.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub const SCOPE: &str = "https://mail.google.com/";
const TIMEOUT: Duration = Duration::from_secs(30);
const EXPIRY_SKEW_SECS: i64 = 60;
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_REDIRECT_URI: &str = "http://localhost";

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.into()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.into()
}

/// OAuth client registration, as downloaded from the Google Cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    #[serde(default)]
    installed: Option<ClientSecrets>,
    #[serde(default)]
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Could not read client secrets {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(content)?;
        file.installed.or(file.web).ok_or_else(|| {
            Error::Config("Client secrets must contain an \"installed\" or \"web\" entry".into())
        })
    }

    fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }

    pub fn consent_url(&self, account: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &self.auth_uri,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri()),
                ("response_type", "code"),
                ("scope", SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("login_hint", account),
            ],
        )
        .map_err(|e| Error::Config(format!("Invalid auth_uri {:?}: {}", self.auth_uri, e)))?;
        Ok(url.to_string())
    }
}

/// Persisted per-account token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl StoredToken {
    /// Usable for at least another `EXPIRY_SKEW_SECS` at `now`. A token
    /// without an expiry is taken at face value.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.token.is_empty() {
            return false;
        }
        match self.expiry {
            Some(expiry) => expiry - ChronoDuration::seconds(EXPIRY_SKEW_SECS) > now,
            None => true,
        }
    }

    fn from_response(resp: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            token: resp.access_token,
            refresh_token: resp.refresh_token,
            expiry: resp.expires_in.map(|s| now + ChronoDuration::seconds(s)),
            scopes: resp
                .scope
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_else(|| vec![SCOPE.to_string()]),
        }
    }

    /// Google usually omits the refresh token on refresh; keep the old one.
    fn refreshed(&self, resp: TokenResponse, now: DateTime<Utc>) -> Self {
        let mut next = Self::from_response(resp, now);
        if next.refresh_token.is_none() {
            next.refresh_token = self.refresh_token.clone();
        }
        next
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Yields bearer tokens for one account, refreshing and persisting as needed.
pub struct TokenProvider {
    http: Client,
    account: String,
    secrets: ClientSecrets,
    path: PathBuf,
    token: StoredToken,
}

impl TokenProvider {
    /// Loads the stored token for `account`, refreshing it if it expired.
    /// Without a usable token, `interactive` decides whether to walk the
    /// user through the consent screen or give up.
    pub async fn obtain(
        account: &str,
        secrets: ClientSecrets,
        path: PathBuf,
        interactive: bool,
    ) -> Result<Self> {
        let http = Client::builder().timeout(TIMEOUT).build()?;

        if let Some(token) = load_token(&path) {
            let mut provider = Self {
                http,
                account: account.to_string(),
                secrets,
                path,
                token,
            };

            if provider.token.is_valid_at(Utc::now()) {
                debug!(account, "Using stored token");
                return Ok(provider);
            }

            if provider.token.refresh_token.is_some() {
                match provider.refresh().await {
                    Ok(()) => return Ok(provider),
                    Err(e) => warn!(account, error = %e, "Token refresh failed"),
                }
            }

            provider.token = consent_flow(&provider.http, &provider.secrets, account, interactive).await?;
            provider.persist()?;
            return Ok(provider);
        }

        let token = consent_flow(&http, &secrets, account, interactive).await?;
        let provider = Self {
            http,
            account: account.to_string(),
            secrets,
            path,
            token,
        };
        provider.persist()?;
        Ok(provider)
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub async fn access_token(&mut self) -> Result<String> {
        if !self.token.is_valid_at(Utc::now()) {
            self.refresh().await?;
        }
        Ok(self.token.token.clone())
    }

    async fn refresh(&mut self) -> Result<()> {
        let refresh_token = self
            .token
            .refresh_token
            .clone()
            .ok_or_else(|| Error::Auth(format!("No refresh token stored for {}", self.account)))?;

        debug!(account = %self.account, "Refreshing access token");
        let resp = request_token(
            &self.http,
            &self.secrets,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ],
        )
        .await?;

        self.token = self.token.refreshed(resp, Utc::now());
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
            }
        }

        let content = serde_json::to_string_pretty(&self.token)?;
        fs::write(&self.path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

fn load_token(path: &Path) -> Option<StoredToken> {
    if !path.exists() {
        return None;
    }
    match fs::read_to_string(path)
        .map_err(Error::from)
        .and_then(|c| serde_json::from_str(&c).map_err(Error::from))
    {
        Ok(token) => Some(token),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable token file");
            None
        }
    }
}

async fn request_token(
    http: &Client,
    secrets: &ClientSecrets,
    grant: &[(&str, &str)],
) -> Result<TokenResponse> {
    let mut form: Vec<(&str, &str)> = vec![
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
    ];
    form.extend_from_slice(grant);

    let resp = http.post(&secrets.token_uri).form(&form).send().await?;
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        let reason = match serde_json::from_str::<TokenErrorResponse>(&text) {
            Ok(err) => match err.error_description {
                Some(desc) => format!("{}: {}", err.error, desc),
                None => err.error,
            },
            Err(_) => format!("token endpoint returned {}", status),
        };
        return Err(Error::Auth(reason));
    }

    Ok(serde_json::from_str(&text)?)
}

async fn consent_flow(
    http: &Client,
    secrets: &ClientSecrets,
    account: &str,
    interactive: bool,
) -> Result<StoredToken> {
    if !interactive {
        return Err(Error::Auth(format!(
            "No usable token for {}. Run `gmail-relay auth {}` first.",
            account, account
        )));
    }

    let url = secrets.consent_url(account)?;
    eprintln!("Authorize {} by visiting:\n\n{}\n", account, url);
    eprintln!("Paste the authorization code (or the full redirect URL) here:");

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    let code = extract_code(&line)
        .ok_or_else(|| Error::Auth(format!("No authorization code entered for {}", account)))?;

    let resp = request_token(
        http,
        secrets,
        &[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", secrets.redirect_uri()),
        ],
    )
    .await?;

    info!(account, "Authorization granted");
    Ok(StoredToken::from_response(resp, Utc::now()))
}

/// Accepts either a bare code or a redirect URL carrying `code=`.
pub fn extract_code(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(input)
        && url.has_host()
    {
        return url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned());
    }
    Some(input.to_string())
}
