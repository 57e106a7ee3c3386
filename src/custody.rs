// 9.2 custody.rs: MOCKED. collateral vaults are plain balance holders, no real token transfers.
// the engine is the only caller. every move is a send from one vault and a receive into another,
// so the sum of all balances only changes when collateral enters or leaves the system.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Amount, Holder, OwnerId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CustodyError {
    #[error("{vault} holds {available} collateral, {requested} requested")]
    InsufficientCollateral {
        vault: &'static str,
        available: Amount,
        requested: Amount,
    },

    #[error("{vault} tracks {available} debt, {requested} requested")]
    InsufficientDebt {
        vault: &'static str,
        available: Amount,
        requested: Amount,
    },

    #[error("no collateral available to claim for {0}")]
    NothingToClaim(OwnerId),

    #[error("balance overflow in {0}")]
    Overflow(&'static str),
}

/** 9.2.1: anything that holds collateral on behalf of the system */
pub trait CollateralVault {
    fn name(&self) -> &'static str;

    fn collateral(&self) -> Amount;

    fn receive_collateral(&mut self, amount: Amount) -> Result<(), CustodyError>;

    fn send_collateral(&mut self, amount: Amount) -> Result<(), CustodyError>;
}

// move collateral between two vaults. the send is checked before anything changes.
pub fn transfer_collateral(
    from: &mut dyn CollateralVault,
    to: &mut dyn CollateralVault,
    amount: Amount,
) -> Result<(), CustodyError> {
    if amount == 0 {
        return Ok(());
    }
    if from.collateral() < amount {
        return Err(CustodyError::InsufficientCollateral {
            vault: from.name(),
            available: from.collateral(),
            requested: amount,
        });
    }
    to.collateral()
        .checked_add(amount)
        .ok_or(CustodyError::Overflow(to.name()))?;
    from.send_collateral(amount)?;
    to.receive_collateral(amount)
}

fn debit(vault: &'static str, balance: &mut Amount, amount: Amount) -> Result<(), CustodyError> {
    if *balance < amount {
        return Err(CustodyError::InsufficientCollateral {
            vault,
            available: *balance,
            requested: amount,
        });
    }
    *balance -= amount;
    Ok(())
}

fn credit(vault: &'static str, balance: &mut Amount, amount: Amount) -> Result<(), CustodyError> {
    *balance = balance
        .checked_add(amount)
        .ok_or(CustodyError::Overflow(vault))?;
    Ok(())
}

/** 9.2.2: collateral and debt of every active position, rewards not yet applied excluded */
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivePool {
    coll: Amount,
    debt: Amount,
}

/** 9.2.3: redistributed collateral and debt waiting to be applied to positions */
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultPool {
    coll: Amount,
    debt: Amount,
}

macro_rules! debt_tracking_vault {
    ($pool:ty, $name:literal) => {
        impl $pool {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn debt(&self) -> Amount {
                self.debt
            }

            pub fn increase_debt(&mut self, amount: Amount) -> Result<(), CustodyError> {
                credit($name, &mut self.debt, amount)
            }

            pub fn decrease_debt(&mut self, amount: Amount) -> Result<(), CustodyError> {
                if self.debt < amount {
                    return Err(CustodyError::InsufficientDebt {
                        vault: $name,
                        available: self.debt,
                        requested: amount,
                    });
                }
                self.debt -= amount;
                Ok(())
            }
        }

        impl CollateralVault for $pool {
            fn name(&self) -> &'static str {
                $name
            }

            fn collateral(&self) -> Amount {
                self.coll
            }

            fn receive_collateral(&mut self, amount: Amount) -> Result<(), CustodyError> {
                credit($name, &mut self.coll, amount)
            }

            fn send_collateral(&mut self, amount: Amount) -> Result<(), CustodyError> {
                debit($name, &mut self.coll, amount)
            }
        }
    };
}

debt_tracking_vault!(ActivePool, "active-pool");
debt_tracking_vault!(DefaultPool, "default-pool");

/** 9.2.4: collateral left over after a capped liquidation or a full redemption */
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollSurplusPool {
    coll: Amount,
    claims: HashMap<OwnerId, Amount>,
}

impl CollSurplusPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claimable(&self, owner: OwnerId) -> Amount {
        self.claims.get(&owner).copied().unwrap_or(0)
    }

    pub(crate) fn account_surplus(&mut self, owner: OwnerId, amount: Amount) -> Result<(), CustodyError> {
        let entry = self.claims.entry(owner).or_insert(0);
        credit("coll-surplus-pool", entry, amount)
    }

    // zeroes the claim. the caller moves the collateral out.
    pub(crate) fn take_claim(&mut self, owner: OwnerId) -> Result<Amount, CustodyError> {
        match self.claims.remove(&owner) {
            Some(amount) if amount > 0 => Ok(amount),
            _ => Err(CustodyError::NothingToClaim(owner)),
        }
    }
}

impl CollateralVault for CollSurplusPool {
    fn name(&self) -> &'static str {
        "coll-surplus-pool"
    }

    fn collateral(&self) -> Amount {
        self.coll
    }

    fn receive_collateral(&mut self, amount: Amount) -> Result<(), CustodyError> {
        credit("coll-surplus-pool", &mut self.coll, amount)
    }

    fn send_collateral(&mut self, amount: Amount) -> Result<(), CustodyError> {
        debit("coll-surplus-pool", &mut self.coll, amount)
    }
}

/** 9.2.5: collateral that left the system, per recipient. stands in for external wallets */
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollateralWallets {
    balances: HashMap<Holder, Amount>,
    total_paid_out: Amount,
}

impl CollateralWallets {
    pub fn balance_of(&self, holder: Holder) -> Amount {
        self.balances.get(&holder).copied().unwrap_or(0)
    }

    pub fn total_paid_out(&self) -> Amount {
        self.total_paid_out
    }

    pub(crate) fn pay(&mut self, holder: Holder, amount: Amount) -> Result<(), CustodyError> {
        credit("wallets", &mut self.total_paid_out, amount)?;
        let entry = self.balances.entry(holder).or_insert(0);
        credit("wallets", entry, amount)
    }
}

/** 9.2.6: every vault the engine owns besides the stability pool */
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Custody {
    pub(crate) active: ActivePool,
    pub(crate) default: DefaultPool,
    pub(crate) surplus: CollSurplusPool,
    pub(crate) wallets: CollateralWallets,
    total_received: Amount,
}

impl Custody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> &ActivePool {
        &self.active
    }

    pub fn default_pool(&self) -> &DefaultPool {
        &self.default
    }

    pub fn surplus(&self) -> &CollSurplusPool {
        &self.surplus
    }

    pub fn wallets(&self) -> &CollateralWallets {
        &self.wallets
    }

    // collateral that ever entered the system through a position
    pub fn total_received(&self) -> Amount {
        self.total_received
    }

    pub(crate) fn deposit_to_active(&mut self, amount: Amount) -> Result<(), CustodyError> {
        self.active.receive_collateral(amount)?;
        credit("custody", &mut self.total_received, amount)
    }

    pub(crate) fn pay_from_active(&mut self, holder: Holder, amount: Amount) -> Result<(), CustodyError> {
        self.active.send_collateral(amount)?;
        self.wallets.pay(holder, amount)
    }

    // applying a pending reward pulls it back into the active pool
    pub(crate) fn move_pending_to_active(&mut self, coll: Amount, debt: Amount) -> Result<(), CustodyError> {
        self.default.decrease_debt(debt)?;
        self.active.increase_debt(debt)?;
        transfer_collateral(&mut self.default, &mut self.active, coll)
    }

    pub(crate) fn move_to_default(&mut self, coll: Amount, debt: Amount) -> Result<(), CustodyError> {
        self.active.decrease_debt(debt)?;
        self.default.increase_debt(debt)?;
        transfer_collateral(&mut self.active, &mut self.default, coll)
    }

    pub(crate) fn move_to_surplus(&mut self, owner: OwnerId, amount: Amount) -> Result<(), CustodyError> {
        transfer_collateral(&mut self.active, &mut self.surplus, amount)?;
        self.surplus.account_surplus(owner, amount)
    }

    pub(crate) fn claim_surplus(&mut self, owner: OwnerId) -> Result<Amount, CustodyError> {
        let amount = self.surplus.claimable(owner);
        if amount == 0 || self.surplus.collateral() < amount {
            return Err(CustodyError::NothingToClaim(owner));
        }
        self.surplus.take_claim(owner)?;
        self.surplus.send_collateral(amount)?;
        self.wallets.pay(Holder::User(owner), amount)?;
        Ok(amount)
    }

    // collateral held across the three vaults
    pub fn held_collateral(&self) -> Amount {
        self.active.collateral() + self.default.collateral() + self.surplus.collateral()
    }
}
