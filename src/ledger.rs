//! Credit ledger: the client packages that pay for sessions.
//!
//! The engine never touches `sessions_remaining` itself. Every movement goes
//! through [`CreditLedger::use_session`] / [`CreditLedger::return_session`],
//! which implementations must make atomic (decrement only while
//! `remaining > 0`).

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{ClientPackage, PackageStatus};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("package not found: {0}")]
    NotFound(Ulid),
    #[error("package {0} has no sessions remaining")]
    Exhausted(Ulid),
    #[error("package {0} is expired")]
    Expired(Ulid),
    #[error("ledger unavailable: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// The client's current `active` package (earliest expiry first), if any.
    async fn active_package_for_client(
        &self,
        tenant_id: Ulid,
        client_id: Ulid,
    ) -> Result<Option<ClientPackage>, LedgerError>;

    /// Earliest-expiring active package with credit left and not expired at `at`.
    async fn best_package_for_session(
        &self,
        tenant_id: Ulid,
        client_id: Ulid,
        at: DateTime<Utc>,
    ) -> Result<Option<ClientPackage>, LedgerError>;

    async fn client_packages(
        &self,
        tenant_id: Ulid,
        client_id: Ulid,
    ) -> Result<Vec<ClientPackage>, LedgerError>;

    /// `remaining -= 1`, `used += 1`; flips to `depleted` at zero.
    async fn use_session(
        &self,
        tenant_id: Ulid,
        package_id: Ulid,
    ) -> Result<ClientPackage, LedgerError>;

    /// `remaining += 1`, `used -= 1` (floored at zero); revives `depleted`.
    async fn return_session(
        &self,
        tenant_id: Ulid,
        package_id: Ulid,
    ) -> Result<ClientPackage, LedgerError>;
}

/// Packages ordered by expiry (undated last), then purchase time.
fn by_expiry(a: &ClientPackage, b: &ClientPackage) -> Ordering {
    match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then(a.purchased_at.cmp(&b.purchased_at))
    .then(a.id.cmp(&b.id))
}

/// DashMap-backed ledger. A package's shard lock is held for the whole
/// read-modify-write, so concurrent `use_session` calls cannot both take the
/// last credit.
#[derive(Default)]
pub struct InMemoryLedger {
    packages: DashMap<Ulid, ClientPackage>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_package(&self, package: ClientPackage) {
        self.packages.insert(package.id, package);
    }

    pub fn package(&self, id: Ulid) -> Option<ClientPackage> {
        self.packages.get(&id).map(|p| p.value().clone())
    }

    fn packages_of(&self, tenant_id: Ulid, client_id: Ulid) -> Vec<ClientPackage> {
        let mut found: Vec<ClientPackage> = self
            .packages
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.client_id == client_id)
            .map(|p| p.value().clone())
            .collect();
        found.sort_by(by_expiry);
        found
    }
}

#[async_trait]
impl CreditLedger for InMemoryLedger {
    async fn active_package_for_client(
        &self,
        tenant_id: Ulid,
        client_id: Ulid,
    ) -> Result<Option<ClientPackage>, LedgerError> {
        Ok(self
            .packages_of(tenant_id, client_id)
            .into_iter()
            .find(|p| p.status == PackageStatus::Active))
    }

    async fn best_package_for_session(
        &self,
        tenant_id: Ulid,
        client_id: Ulid,
        at: DateTime<Utc>,
    ) -> Result<Option<ClientPackage>, LedgerError> {
        Ok(self.packages_of(tenant_id, client_id).into_iter().find(|p| {
            p.status == PackageStatus::Active
                && p.sessions_remaining > 0
                && p.expiry_date.is_none_or(|exp| exp > at)
        }))
    }

    async fn client_packages(
        &self,
        tenant_id: Ulid,
        client_id: Ulid,
    ) -> Result<Vec<ClientPackage>, LedgerError> {
        Ok(self.packages_of(tenant_id, client_id))
    }

    async fn use_session(
        &self,
        tenant_id: Ulid,
        package_id: Ulid,
    ) -> Result<ClientPackage, LedgerError> {
        let mut entry = self
            .packages
            .get_mut(&package_id)
            .filter(|p| p.tenant_id == tenant_id)
            .ok_or(LedgerError::NotFound(package_id))?;
        if entry.status == PackageStatus::Expired {
            return Err(LedgerError::Expired(package_id));
        }
        if entry.sessions_remaining == 0 {
            return Err(LedgerError::Exhausted(package_id));
        }
        entry.sessions_remaining -= 1;
        entry.sessions_used += 1;
        if entry.sessions_remaining == 0 {
            entry.status = PackageStatus::Depleted;
        }
        Ok(entry.clone())
    }

    async fn return_session(
        &self,
        tenant_id: Ulid,
        package_id: Ulid,
    ) -> Result<ClientPackage, LedgerError> {
        let mut entry = self
            .packages
            .get_mut(&package_id)
            .filter(|p| p.tenant_id == tenant_id)
            .ok_or(LedgerError::NotFound(package_id))?;
        entry.sessions_remaining += 1;
        entry.sessions_used = entry.sessions_used.saturating_sub(1);
        if entry.status == PackageStatus::Depleted {
            entry.status = PackageStatus::Active;
        }
        Ok(entry.clone())
    }
}
