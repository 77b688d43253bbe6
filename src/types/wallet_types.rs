use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type OwnerId = u64;
pub type Amount = i64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    Points,
    Gems,
    Keys,
    UsdEquivalent,
}

impl Currency {
    pub const ALL: [Currency; 4] = [
        Currency::Points,
        Currency::Gems,
        Currency::Keys,
        Currency::UsdEquivalent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Points => "points",
            Currency::Gems => "gems",
            Currency::Keys => "keys",
            Currency::UsdEquivalent => "usd_equivalent",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown currency: {}", s))
    }
}

/// Guard key for wallet mutations.
pub type WalletKey = (OwnerId, Currency);

/// Point-in-time view of an owner's balances, derived from the ledger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub owner_id: OwnerId,
    pub balances: BTreeMap<Currency, Amount>,
}

impl Wallet {
    pub fn balance(&self, currency: Currency) -> Amount {
        self.balances.get(&currency).copied().unwrap_or(0)
    }
}
