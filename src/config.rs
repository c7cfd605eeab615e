use crate::error::{Error, Result};
use crate::gmail::batch::MAX_BATCH_SIZE;
use crate::scheduler::CutoffWindow;
use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub credentials_file: PathBuf,
    pub tokens_dir: PathBuf,
    pub rules_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub cutoff_start: String,
    pub cutoff_end: String,
    pub utc_offset_minutes: i32,
    pub max_results: u32,
    pub api_base: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials_file: PathBuf::from("app_credentials.json"),
            tokens_dir: PathBuf::from("tokens"),
            rules_dir: PathBuf::from("email_lists"),
            poll_interval_secs: 5,
            cutoff_start: "23:55".into(),
            cutoff_end: "00:00".into(),
            utc_offset_minutes: 0,
            max_results: 100,
            api_base: DEFAULT_API_BASE.into(),
        }
    }
}

impl Config {
    fn config_dir() -> Result<PathBuf> {
        let dir = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not find home directory".into()))?
            .join(".gmail-relay");
        Ok(dir)
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Loads from `path`, or from `~/.gmail-relay/config.json` when none is given.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.cutoff_window()?;
        self.utc_offset()?;
        if self.max_results == 0 || self.max_results > MAX_BATCH_SIZE {
            return Err(Error::Config(format!(
                "max_results must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.max_results
            )));
        }
        Ok(())
    }

    pub fn cutoff_window(&self) -> Result<CutoffWindow> {
        Ok(CutoffWindow::new(
            parse_clock_time(&self.cutoff_start)?,
            parse_clock_time(&self.cutoff_end)?,
        ))
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            Error::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn token_path(&self, account: &str) -> PathBuf {
        self.tokens_dir.join(account)
    }
}

fn parse_clock_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| Error::Config(format!("Invalid time of day {:?}: {}", s, e)))
}
