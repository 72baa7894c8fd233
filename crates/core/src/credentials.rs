use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::AccountClass;

fn default_max_position_ratio() -> f64 {
    1.0
}

fn default_max_daily_loss() -> f64 {
    5_000_000.0
}

fn default_leverage() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// One brokerage account as loaded from the accounts blob (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub webhook_token: String,
    pub app_key: String,
    pub app_secret: String,
    pub account_number: String,
    pub account_product: String,
    #[serde(default)]
    pub account_type: Option<String>,
    pub is_virtual: bool,
    pub is_active: bool,
    #[serde(default)]
    pub real_account_reference: Option<String>,
    #[serde(default = "default_max_position_ratio")]
    pub max_position_ratio: f64,
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,
    #[serde(default = "default_true")]
    pub is_strategy_active: bool,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
}

impl Account {
    /// Derives the account class per §3: explicit `account_type` wins, else
    /// `account_product` starting with "03" implies FUTURES, else STOCK.
    pub fn account_class(&self) -> AccountClass {
        match self.account_type.as_deref() {
            Some(t) if t.eq_ignore_ascii_case("FUTURES") => AccountClass::Futures,
            Some(t) if t.eq_ignore_ascii_case("OVERSEAS") => AccountClass::Overseas,
            Some(t) if t.eq_ignore_ascii_case("STOCK") => AccountClass::Stock,
            _ if self.account_product.starts_with("03") => AccountClass::Futures,
            _ => AccountClass::Stock,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id must not be empty".into());
        }
        if self.webhook_token.trim().is_empty() {
            return Err("webhook_token must not be empty".into());
        }
        if self.app_key.trim().is_empty() {
            return Err("app_key must not be empty".into());
        }
        if self.app_secret.trim().is_empty() {
            return Err("app_secret must not be empty".into());
        }
        if self.account_number.trim().is_empty() {
            return Err("account_number must not be empty".into());
        }
        if self.account_number.len() != 8 {
            return Err(format!(
                "account_number must be exactly 8 chars, got {}",
                self.account_number.len()
            ));
        }
        if self.account_product.len() != 2 {
            return Err(format!(
                "account_product must be exactly 2 chars, got {}",
                self.account_product.len()
            ));
        }
        Ok(())
    }
}

/// Parses, validates, and indexes the accounts blob. Both indexes are
/// read-only after construction (§4.1, §5).
#[derive(Debug, Default)]
pub struct CredentialStore {
    by_id: HashMap<String, Account>,
    by_token: HashMap<String, Account>,
}

impl CredentialStore {
    /// Builds a store from a JSON array of account records. A malformed JSON
    /// document is the only case that raises; individual bad records are
    /// dropped with a diagnostic.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let records: Vec<Account> = serde_json::from_str(raw)?;
        Ok(Self::from_accounts(records))
    }

    pub fn from_accounts(records: Vec<Account>) -> Self {
        let mut by_id = HashMap::new();
        let mut by_token = HashMap::new();
        let mut seen_ids = HashMap::new();
        let mut seen_tokens = HashMap::new();

        for account in records {
            if let Err(reason) = account.validate() {
                tracing::warn!(account_id = %account.id, reason = %reason, "dropping invalid account record");
                continue;
            }
            if seen_ids.insert(account.id.clone(), ()).is_some() {
                tracing::warn!(account_id = %account.id, "dropping account with duplicate id");
                continue;
            }
            if seen_tokens
                .insert(account.webhook_token.clone(), ())
                .is_some()
            {
                tracing::warn!(account_id = %account.id, "dropping account with duplicate webhook_token");
                continue;
            }
            by_id.insert(account.id.clone(), account.clone());
            by_token.insert(account.webhook_token.clone(), account);
        }

        Self { by_id, by_token }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load_by_id(&self, id: &str) -> Option<&Account> {
        self.by_id.get(id)
    }

    pub fn load_by_token(&self, token: &str) -> Option<&Account> {
        self.by_token.get(token)
    }

    pub fn list_ids(&self) -> Vec<&str> {
        self.by_id.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, token: &str) -> Account {
        Account {
            id: id.to_string(),
            webhook_token: token.to_string(),
            app_key: "k".to_string(),
            app_secret: "s".to_string(),
            account_number: "12345678".to_string(),
            account_product: "03".to_string(),
            account_type: None,
            is_virtual: true,
            is_active: true,
            real_account_reference: None,
            max_position_ratio: 1.0,
            max_daily_loss: 5_000_000.0,
            is_strategy_active: true,
            leverage: 1.0,
        }
    }

    #[test]
    fn account_product_prefix_infers_futures() {
        let account = sample("acc1", "tok_a");
        assert_eq!(account.account_class(), AccountClass::Futures);
    }

    #[test]
    fn account_product_other_infers_stock() {
        let mut account = sample("acc1", "tok_a");
        account.account_product = "01".to_string();
        assert_eq!(account.account_class(), AccountClass::Stock);
    }

    #[test]
    fn store_indexes_by_id_and_token() {
        let store = CredentialStore::from_accounts(vec![sample("acc1", "tok_a")]);
        assert!(store.load_by_id("acc1").is_some());
        assert!(store.load_by_token("tok_a").is_some());
        assert!(store.load_by_token("missing").is_none());
    }

    #[test]
    fn invalid_account_product_length_is_dropped() {
        let mut account = sample("acc1", "tok_a");
        account.account_product = "3".to_string();
        let store = CredentialStore::from_accounts(vec![account]);
        assert!(store.load_by_id("acc1").is_none());
        assert!(store.list_ids().is_empty());
    }

    #[test]
    fn duplicate_token_is_dropped() {
        let a = sample("acc1", "tok_a");
        let mut b = sample("acc2", "tok_a");
        b.id = "acc2".to_string();
        let store = CredentialStore::from_accounts(vec![a, b]);
        assert_eq!(store.list_ids().len(), 1);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(CredentialStore::from_json("not json").is_err());
    }

    #[test]
    fn empty_store_yields_not_found() {
        let store = CredentialStore::empty();
        assert!(store.load_by_token("anything").is_none());
    }
}
