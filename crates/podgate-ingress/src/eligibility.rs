//! Withdrawal eligibility.
//!
//! A trader may withdraw if configured as approved, or if their KYC token
//! balance is at least the configured minimum. Balances are cached and the
//! sync loop re-queries every cached trader each tick. A cached balance below
//! the minimum is never trusted: it is re-read so a trader who just completed
//! KYC is not turned away until the next tick.

use std::collections::{HashMap, HashSet};

use podgate_types::{Address, IngressError, Result};
use tokio::sync::RwLock;

use crate::binder::Binder;

#[derive(Debug)]
pub struct EligibilityCache {
    approved: HashSet<Address>,
    min_balance: u64,
    balances: RwLock<HashMap<Address, u64>>,
}

impl EligibilityCache {
    pub fn new(approved: impl IntoIterator<Item = Address>, min_balance: u64) -> Self {
        Self {
            approved: approved.into_iter().collect(),
            min_balance,
            balances: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_eligible(&self, binder: &Binder, trader: Address) -> Result<bool> {
        if self.approved.contains(&trader) {
            return Ok(true);
        }
        if self
            .cached_balance(&trader)
            .await
            .is_some_and(|balance| balance >= self.min_balance)
        {
            return Ok(true);
        }
        let balance = binder.balance_of(trader).await?;
        self.balances.write().await.insert(trader, balance);
        Ok(balance >= self.min_balance)
    }

    pub async fn cached_balance(&self, trader: &Address) -> Option<u64> {
        self.balances.read().await.get(trader).copied()
    }

    /// Re-query the balance of every cached trader. Traders whose query fails
    /// keep their previous balance; the errors are returned.
    pub async fn refresh(&self, binder: &Binder) -> Vec<IngressError> {
        let traders: Vec<Address> = self.balances.read().await.keys().copied().collect();
        let mut errors = Vec::new();
        for trader in traders {
            match binder.balance_of(trader).await {
                Ok(balance) => {
                    self.balances.write().await.insert(trader, balance);
                }
                Err(err) => errors.push(err),
            }
        }
        let traders = self.balances.read().await.len();
        tracing::debug!(traders, failed = errors.len(), "eligibility refreshed");
        errors
    }
}
