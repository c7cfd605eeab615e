//! Per-account distribution lists.
//!
//! Each file in the rules directory describes one account:
//!
//! ```text
//! ACCOUNT
//! me@example.com
//! TO
//! list@example.com
//! CC
//! Alice <alice@example.com>
//! bob@example.com
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::ForwardingRule;
use crate::util::parse_address;

/// Reads every regular file in `dir`, in file-name order. Malformed files are
/// logged and skipped.
pub fn load_rules(dir: &Path) -> Result<BTreeMap<String, ForwardingRule>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| Error::Config(format!("Cannot read rules directory {}: {}", dir.display(), e)))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let mut rules = BTreeMap::new();
    for path in files {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Unreadable rule file, skipping");
                continue;
            }
        };

        match parse_rule(&content) {
            Ok((account, rule)) => {
                debug!(file = %path.display(), account = %account, "Rule loaded");
                if rules.insert(account.clone(), rule).is_some() {
                    warn!(file = %path.display(), account = %account, "Rule replaces an earlier one for the same account");
                }
            }
            Err(e) => warn!(file = %path.display(), error = %e, "Dropping rule"),
        }
    }
    Ok(rules)
}

pub fn parse_rule(content: &str) -> Result<(String, ForwardingRule)> {
    let lines: Vec<&str> = content.trim().lines().map(str::trim).collect();
    if lines.len() < 5 {
        return Err(Error::Config(format!(
            "expected at least 5 lines, found {}",
            lines.len()
        )));
    }

    expect_marker(lines[0], "ACCOUNT", 1)?;
    expect_marker(lines[2], "TO", 3)?;
    expect_marker(lines[4], "CC", 5)?;

    let account = checked_address(lines[1], "account")?;
    let to = checked_address(lines[3], "to")?;
    let cc = lines[5..]
        .iter()
        .filter(|line| !line.is_empty())
        .map(|line| checked_address(line, "cc"))
        .collect::<Result<Vec<_>>>()?;

    Ok((account, ForwardingRule { to, cc }))
}

fn expect_marker(line: &str, marker: &str, number: usize) -> Result<()> {
    if line.eq_ignore_ascii_case(marker) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "line {} should be {:?}, found {:?}",
            number, marker, line
        )))
    }
}

fn checked_address(value: &str, field: &str) -> Result<String> {
    if parse_address(value).is_plausible() {
        Ok(value.to_string())
    } else {
        Err(Error::Config(format!("invalid {} address {:?}", field, value)))
    }
}
