//! Startup authentication of every configured account.

use std::collections::BTreeMap;
use std::future::Future;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::ForwardingRule;
use crate::service::MailService;

pub struct ActiveAccount<S> {
    pub address: String,
    pub rule: ForwardingRule,
    pub service: S,
}

/// Accounts that authenticated as themselves, in authentication order.
pub struct AccountRegistry<S> {
    accounts: Vec<ActiveAccount<S>>,
}

impl<S> AccountRegistry<S> {
    pub fn new(accounts: Vec<ActiveAccount<S>>) -> Self {
        Self { accounts }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveAccount<S>> {
        self.accounts.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn addresses(&self) -> Vec<&str> {
        self.accounts.iter().map(|a| a.address.as_str()).collect()
    }
}

/// Checks that `service` is signed in as `address`, ignoring case.
pub async fn verify_identity<S: MailService>(address: &str, service: &S) -> Result<String> {
    let actual = service.get_identity().await?;
    if !actual.eq_ignore_ascii_case(address) {
        return Err(Error::AuthMismatch {
            expected: address.to_string(),
            actual,
        });
    }
    Ok(actual)
}

/// Connects and verifies every account in `rules`. Accounts that fail either
/// step are logged and left out; they are not retried.
pub async fn authenticate_accounts<S, F, Fut>(
    rules: &BTreeMap<String, ForwardingRule>,
    mut connect: F,
) -> AccountRegistry<S>
where
    S: MailService,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<S>>,
{
    let mut accounts = Vec::with_capacity(rules.len());

    for (address, rule) in rules {
        let service = match connect(address.clone()).await {
            Ok(service) => service,
            Err(e) => {
                warn!(account = %address, error = %e, "Could not authenticate account, skipping");
                continue;
            }
        };

        if let Err(e) = verify_identity(address, &service).await {
            warn!(account = %address, error = %e, "Account excluded");
            continue;
        }

        info!(account = %address, to = %rule.to, cc = rule.cc.len(), "Account authenticated");
        accounts.push(ActiveAccount {
            address: address.clone(),
            rule: rule.clone(),
            service,
        });
    }

    AccountRegistry::new(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMailService;

    fn rules(addresses: &[&str]) -> BTreeMap<String, ForwardingRule> {
        addresses
            .iter()
            .map(|a| {
                (
                    a.to_string(),
                    ForwardingRule {
                        to: "list@example.com".into(),
                        cc: vec![],
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_verify_identity_ignores_case() {
        let service = FakeMailService::new("Me@Example.com");
        assert_eq!(
            verify_identity("me@example.com", &service).await.unwrap(),
            "Me@Example.com"
        );
    }

    #[tokio::test]
    async fn test_verify_identity_mismatch() {
        let service = FakeMailService::new("other@example.com");
        match verify_identity("me@example.com", &service).await {
            Err(Error::AuthMismatch { expected, actual }) => {
                assert_eq!(expected, "me@example.com");
                assert_eq!(actual, "other@example.com");
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_mismatched_and_failing_accounts_excluded() {
        let rules = rules(&["a@example.com", "b@example.com", "c@example.com", "d@example.com"]);
        let registry = authenticate_accounts(&rules, |address: String| async move {
            match address.as_str() {
                // signed in to the wrong mailbox
                "b@example.com" => Ok(FakeMailService::new("someone@example.com")),
                "c@example.com" => Err(Error::Auth("consent required".into())),
                "d@example.com" => {
                    let service = FakeMailService::new("d@example.com");
                    service.fail_identity();
                    Ok(service)
                }
                _ => Ok(FakeMailService::new(&address)),
            }
        })
        .await;

        assert_eq!(registry.addresses().len(), 1);
        assert_eq!(registry.addresses(), vec!["a@example.com"]);
    }

    #[tokio::test]
    async fn test_registry_keeps_rule_order() {
        let rules = rules(&["z@example.com", "a@example.com"]);
        let registry =
            authenticate_accounts(&rules, |address: String| async move { Ok(FakeMailService::new(&address)) })
                .await;
        assert_eq!(registry.addresses(), vec!["a@example.com", "z@example.com"]);
        assert!(!registry.is_empty());
    }
}
