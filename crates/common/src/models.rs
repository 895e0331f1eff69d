//! Domain models observed by the suite: Kafka user events and the rows the
//! userdata and spend services persist.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::wait::Ready;

/// Payload of the `users` topic event published by niffler-auth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserName {
    pub username: String,
}

impl UserName {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// Currencies known to niffler-currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CurrencyValues {
    #[default]
    Rub,
    Usd,
    Eur,
    Kzt,
}

impl CurrencyValues {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurrencyValues::Rub => "RUB",
            CurrencyValues::Usd => "USD",
            CurrencyValues::Eur => "EUR",
            CurrencyValues::Kzt => "KZT",
        }
    }
}

impl fmt::Display for CurrencyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurrencyValues {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RUB" => Ok(CurrencyValues::Rub),
            "USD" => Ok(CurrencyValues::Usd),
            "EUR" => Ok(CurrencyValues::Eur),
            "KZT" => Ok(CurrencyValues::Kzt),
            other => Err(Error::InvalidConfig(format!("unknown currency: {other}"))),
        }
    }
}

/// Row of the userdata `user` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub currency: String,
    pub firstname: Option<String>,
    pub surname: Option<String>,
    pub full_name: Option<String>,
}

impl User {
    /// A freshly registered user as the userdata consumer creates it
    pub fn registered(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            currency: CurrencyValues::default().to_string(),
            firstname: None,
            surname: None,
            full_name: None,
        }
    }
}

impl Ready for User {
    fn is_ready(&self) -> bool {
        true
    }
}

/// Friendship link state
///
/// The column is free text; statuses this suite does not know about are kept
/// verbatim in `Other` so rows written by newer services still decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FriendshipStatus {
    #[default]
    Pending,
    Accepted,
    Friend,
    Void,
    Other(String),
}

impl FriendshipStatus {
    pub fn as_str(&self) -> &str {
        match self {
            FriendshipStatus::Pending => "PENDING",
            FriendshipStatus::Accepted => "ACCEPTED",
            FriendshipStatus::Friend => "FRIEND",
            FriendshipStatus::Void => "VOID",
            FriendshipStatus::Other(raw) => raw,
        }
    }
}

impl fmt::Display for FriendshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for FriendshipStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "PENDING" => FriendshipStatus::Pending,
            "ACCEPTED" => FriendshipStatus::Accepted,
            "FRIEND" => FriendshipStatus::Friend,
            "VOID" => FriendshipStatus::Void,
            _ => FriendshipStatus::Other(raw),
        }
    }
}

impl From<FriendshipStatus> for String {
    fn from(status: FriendshipStatus) -> Self {
        match status {
            FriendshipStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for FriendshipStatus {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(FriendshipStatus::from(s.to_string()))
    }
}

/// Row of the userdata `friendship` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friendship {
    pub requester_id: String,
    pub addressee_id: String,
    pub status: FriendshipStatus,
    pub created_date: NaiveDate,
}

impl Friendship {
    pub fn pending(requester_id: impl Into<String>, addressee_id: impl Into<String>) -> Self {
        Self {
            requester_id: requester_id.into(),
            addressee_id: addressee_id.into(),
            status: FriendshipStatus::Pending,
            created_date: chrono::Utc::now().date_naive(),
        }
    }
}

impl Ready for Friendship {
    fn is_ready(&self) -> bool {
        true
    }
}

/// Row of the spend `category` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub username: String,
    #[serde(default)]
    pub archived: bool,
}

impl Ready for Category {
    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_user_event_wire_format() {
        let event: UserName = serde_json::from_str(r#"{"username":"alice"}"#).unwrap();
        assert_eq!(event, UserName::new("alice"));
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"username":"alice"}"#
        );
    }

    #[test_case("pending", FriendshipStatus::Pending)]
    #[test_case("ACCEPTED", FriendshipStatus::Accepted)]
    #[test_case("FRIEND", FriendshipStatus::Friend)]
    #[test_case("void", FriendshipStatus::Void)]
    #[test_case("INVITED", FriendshipStatus::Other("INVITED".to_string()))]
    fn test_parse_friendship_status(raw: &str, expected: FriendshipStatus) {
        assert_eq!(raw.parse::<FriendshipStatus>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_status_kept_verbatim() {
        let status: FriendshipStatus = serde_json::from_str(r#""Invited""#).unwrap();
        assert_eq!(status.as_str(), "Invited");
        assert_eq!(serde_json::to_string(&status).unwrap(), r#""Invited""#);
        assert_eq!(
            serde_json::to_string(&FriendshipStatus::Friend).unwrap(),
            r#""FRIEND""#
        );
    }

    #[test]
    fn test_unknown_currency_rejected() {
        assert!("GBP".parse::<CurrencyValues>().is_err());
    }

    #[test]
    fn test_registered_user_defaults_to_rub() {
        let user = User::registered("id-1", "bob");
        assert_eq!(user.currency, "RUB");
        assert!(Some(user).is_ready());
    }
}
