//! Core types for the ledger
//!
//! All money is carried as signed integer minor units (`MinorUnits`), never as
//! floating point, so netting is exact and the zero-sum invariant can be
//! checked with plain equality.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Signed amount in the smallest unit of a currency (e.g. cents)
pub type MinorUnits = i64;

/// Group member identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create new user ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Expense group identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Create new group ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Settlement record identifier (UUIDv7 for time-ordering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SettlementId(Uuid);

impl SettlementId {
    /// Generate a fresh time-ordered ID
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SettlementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SettlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO 4217 style currency code: exactly three uppercase ASCII letters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    /// US Dollar
    pub const USD: Currency = Currency(*b"USD");
    /// Euro
    pub const EUR: Currency = Currency(*b"EUR");
    /// British Pound
    pub const GBP: Currency = Currency(*b"GBP");
    /// Japanese Yen
    pub const JPY: Currency = Currency(*b"JPY");

    /// Parse and validate a currency code
    pub fn parse(code: &str) -> Result<Self> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(Error::InvalidCurrency(code.to_string()));
        }
        Ok(Currency([bytes[0], bytes[1], bytes[2]]))
    }

    /// ISO 4217 code
    pub fn code(&self) -> &str {
        // Only constructed from validated ASCII
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for Currency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Currency::parse(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Currency::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.code().to_string()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Proposed payment produced by a settlement algorithm (never persisted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSuggestion {
    /// Member who pays
    pub payer_id: UserId,

    /// Member who receives
    pub receiver_id: UserId,

    /// Amount in minor units (always positive)
    pub amount: MinorUnits,

    /// Currency
    pub currency: Currency,
}

impl fmt::Display for SettlementSuggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}: {} {}",
            self.payer_id, self.receiver_id, self.amount, self.currency
        )
    }
}

/// Affinity between two members, used to bias pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendWeight {
    /// First member (the pair is unordered)
    pub user_a: UserId,

    /// Second member
    pub user_b: UserId,

    /// Affinity score (e.g. prior completed-settlement count)
    pub weight: f64,
}

impl FriendWeight {
    /// Create new weight
    pub fn new(user_a: UserId, user_b: UserId, weight: f64) -> Self {
        Self {
            user_a,
            user_b,
            weight,
        }
    }

    /// Pair ordered ascending, so (a, b) and (b, a) compare equal
    pub fn normalized_pair(&self) -> (&UserId, &UserId) {
        if self.user_a <= self.user_b {
            (&self.user_a, &self.user_b)
        } else {
            (&self.user_b, &self.user_a)
        }
    }

    /// Check whether the weight links the two given members
    pub fn links(&self, x: &UserId, y: &UserId) -> bool {
        (&self.user_a == x && &self.user_b == y) || (&self.user_a == y && &self.user_b == x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_parse() {
        assert_eq!(Currency::parse("USD").unwrap(), Currency::USD);
        assert_eq!("EUR".parse::<Currency>().unwrap(), Currency::EUR);
        assert!(Currency::parse("usd").is_err());
        assert!(Currency::parse("US").is_err());
        assert!(Currency::parse("USDT").is_err());
        assert!(Currency::parse("U$D").is_err());
    }

    #[test]
    fn test_currency_serde_as_code() {
        let json = serde_json::to_string(&Currency::GBP).unwrap();
        assert_eq!(json, "\"GBP\"");

        let parsed: Currency = serde_json::from_str("\"JPY\"").unwrap();
        assert_eq!(parsed, Currency::JPY);

        assert!(serde_json::from_str::<Currency>("\"jpy\"").is_err());
    }

    #[test]
    fn test_friend_weight_pair() {
        let weight = FriendWeight::new(UserId::new("bob"), UserId::new("alice"), 3.0);
        let (first, second) = weight.normalized_pair();
        assert_eq!(first.as_str(), "alice");
        assert_eq!(second.as_str(), "bob");

        assert!(weight.links(&UserId::new("alice"), &UserId::new("bob")));
        assert!(!weight.links(&UserId::new("alice"), &UserId::new("carol")));
    }

    #[test]
    fn test_settlement_ids_are_unique() {
        assert_ne!(SettlementId::new(), SettlementId::new());
    }
}
