//! Explicit authorization table.
//!
//! Roles are passed into components rather than held as global state, so
//! every test can build whatever authorization context it needs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Address, Result, VaultError};

/// A role a principal can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Deployment owner; tunes oracle parameters.
    Owner,
    /// Operates rounds and the redemption queue.
    Admin,
    /// Pushes price targets into the oracle.
    PriceUpdater,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owner => write!(f, "OWNER"),
            Self::Admin => write!(f, "ADMIN"),
            Self::PriceUpdater => write!(f, "PRICE_UPDATER"),
        }
    }
}

/// Who may do what. The owner implicitly holds every role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationTable {
    owner: Address,
    admins: HashSet<Address>,
    updaters: HashSet<Address>,
}

impl AuthorizationTable {
    #[must_use]
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            admins: HashSet::new(),
            updaters: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_admin(mut self, admin: Address) -> Self {
        self.admins.insert(admin);
        self
    }

    #[must_use]
    pub fn with_updater(mut self, updater: Address) -> Self {
        self.updaters.insert(updater);
        self
    }

    pub fn grant(&mut self, role: Role, who: Address) {
        match role {
            Role::Owner => self.owner = who,
            Role::Admin => {
                self.admins.insert(who);
            }
            Role::PriceUpdater => {
                self.updaters.insert(who);
            }
        }
    }

    pub fn revoke(&mut self, role: Role, who: &Address) {
        match role {
            // The owner can only be replaced, not removed.
            Role::Owner => {}
            Role::Admin => {
                self.admins.remove(who);
            }
            Role::PriceUpdater => {
                self.updaters.remove(who);
            }
        }
    }

    #[must_use]
    pub fn owner(&self) -> Address {
        self.owner
    }

    #[must_use]
    pub fn has_role(&self, role: Role, who: &Address) -> bool {
        if *who == self.owner {
            return true;
        }
        match role {
            Role::Owner => false,
            Role::Admin => self.admins.contains(who),
            Role::PriceUpdater => self.updaters.contains(who),
        }
    }

    /// Guard an action.
    ///
    /// # Errors
    /// Returns [`VaultError::Unauthorized`] naming the action.
    pub fn require(&self, role: Role, who: &Address, action: &str) -> Result<()> {
        if self.has_role(role, who) {
            Ok(())
        } else {
            Err(VaultError::Unauthorized {
                principal: *who,
                action: action.to_string(),
            })
        }
    }
}
