//! Role checks for privileged fleet operations.
//!
//! Role storage belongs to an external access manager; the engines only ask
//! `has_role`. `RoleRegistry` is the in-memory implementation used by the
//! simulator and tests.

use crate::error::{Error, Result};
use crate::utils::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Adds/removes arks and sets fleet-wide limits.
    Governor,
    /// Tunes per-ark caps.
    Curator,
    /// Submits rebalances and kicks reward auctions.
    Keeper,
    /// Reserved for emergency keeper actions.
    SuperKeeper,
}

pub trait AccessControl: Send + Sync {
    fn has_role(&self, role: Role, account: Address) -> bool;
}

/// Fail with `Unauthorized` unless `account` holds `role`.
pub fn require_role(access: &dyn AccessControl, role: Role, account: Address) -> Result<()> {
    if access.has_role(role, account) {
        Ok(())
    } else {
        Err(Error::Unauthorized { role, account })
    }
}

/// Fail unless `account` holds at least one of `roles`. Reports the first.
pub fn require_any_role(
    access: &dyn AccessControl,
    roles: &[Role],
    account: Address,
) -> Result<()> {
    if roles.iter().any(|r| access.has_role(*r, account)) {
        return Ok(());
    }
    Err(Error::Unauthorized {
        role: roles.first().copied().unwrap_or(Role::Governor),
        account,
    })
}

#[derive(Debug, Default)]
pub struct RoleRegistry {
    grants: RwLock<HashSet<(Role, Address)>>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, role: Role, account: Address) {
        if let Ok(mut grants) = self.grants.write() {
            if grants.insert((role, account)) {
                info!(?role, %account, "Role granted");
            }
        }
    }

    pub fn revoke(&self, role: Role, account: Address) {
        if let Ok(mut grants) = self.grants.write() {
            if grants.remove(&(role, account)) {
                info!(?role, %account, "Role revoked");
            }
        }
    }
}

impl AccessControl for RoleRegistry {
    fn has_role(&self, role: Role, account: Address) -> bool {
        self.grants
            .read()
            .map(|g| g.contains(&(role, account)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_and_revoke() {
        let registry = RoleRegistry::new();
        let keeper = Address::repeat_byte(0x0e);

        assert!(!registry.has_role(Role::Keeper, keeper));
        registry.grant(Role::Keeper, keeper);
        assert!(registry.has_role(Role::Keeper, keeper));
        assert!(!registry.has_role(Role::Governor, keeper));

        registry.revoke(Role::Keeper, keeper);
        assert!(!registry.has_role(Role::Keeper, keeper));
    }

    #[test]
    fn test_require_any_role() {
        let registry = RoleRegistry::new();
        let curator = Address::repeat_byte(0xcc);
        registry.grant(Role::Curator, curator);

        assert!(require_any_role(&registry, &[Role::Governor, Role::Curator], curator).is_ok());
        assert_eq!(
            require_role(&registry, Role::Governor, curator),
            Err(Error::Unauthorized {
                role: Role::Governor,
                account: curator
            })
        );
    }
}
