// 9.1 token.rs: MOCKED debt-asset ledger. balances by holder, mint and burn move total supply.
// outside an operation total_supply equals active debt plus default debt.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Amount, Holder};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("{holder} holds {available}, {requested} requested")]
    InsufficientBalance {
        holder: Holder,
        available: Amount,
        requested: Amount,
    },

    #[error("token supply overflow")]
    Overflow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebtToken {
    balances: HashMap<Holder, Amount>,
    total_supply: Amount,
}

impl DebtToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, holder: Holder) -> Amount {
        self.balances.get(&holder).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn require_balance(&self, holder: Holder, amount: Amount) -> Result<(), TokenError> {
        let available = self.balance_of(holder);
        if available < amount {
            return Err(TokenError::InsufficientBalance {
                holder,
                available,
                requested: amount,
            });
        }
        Ok(())
    }

    pub(crate) fn mint(&mut self, to: Holder, amount: Amount) -> Result<(), TokenError> {
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(TokenError::Overflow)?;
        let balance = self.balance_of(to).checked_add(amount).ok_or(TokenError::Overflow)?;
        self.total_supply = supply;
        self.balances.insert(to, balance);
        Ok(())
    }

    pub(crate) fn burn(&mut self, from: Holder, amount: Amount) -> Result<(), TokenError> {
        self.require_balance(from, amount)?;
        self.set_balance(from, self.balance_of(from) - amount);
        self.total_supply -= amount;
        Ok(())
    }

    // the engine moves tokens on the holder's behalf (deposits, repayments, gas comp)
    pub(crate) fn transfer(&mut self, from: Holder, to: Holder, amount: Amount) -> Result<(), TokenError> {
        if from == to || amount == 0 {
            return self.require_balance(from, amount);
        }
        self.require_balance(from, amount)?;
        let credited = self.balance_of(to).checked_add(amount).ok_or(TokenError::Overflow)?;
        self.set_balance(from, self.balance_of(from) - amount);
        self.balances.insert(to, credited);
        Ok(())
    }

    // users move their own tokens, e.g. to pay down someone else's position in tests
    pub fn send(&mut self, from: crate::types::OwnerId, to: crate::types::OwnerId, amount: Amount) -> Result<(), TokenError> {
        self.transfer(Holder::User(from), Holder::User(to), amount)
    }

    fn set_balance(&mut self, holder: Holder, balance: Amount) {
        if balance == 0 {
            self.balances.remove(&holder);
        } else {
            self.balances.insert(holder, balance);
        }
    }
}
