use crate::model::{image::MediaRef, user::User};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub const PERSON_NAME_MAX_LEN: usize = 30;

/// The application-level record of a user. Keyed by the user id, one per account.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct Profile {
    pub user: User,
    pub first_name: Option<PersonName>,
    pub last_name: Option<PersonName>,
    pub bio: Option<String>,
    pub avatar: Option<MediaRef>,
}

/// New values for the editable profile fields. A `None` avatar keeps the current one.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct UpdateProfile {
    pub first_name: PersonName,
    pub last_name: Option<PersonName>,
    pub bio: Option<String>,
    pub avatar: Option<MediaRef>,
}

/// Lower-cased first or last name.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct PersonName(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Names must be between 1 and 30 characters long: {0:?}")]
pub struct InvalidPersonNameError(String);

impl PersonName {
    pub fn new(name: &str) -> Result<Self, InvalidPersonNameError> {
        let name = name.trim();
        let length = name.chars().count();
        if (1..=PERSON_NAME_MAX_LEN).contains(&length) {
            Ok(Self(name.to_lowercase()))
        } else {
            Err(InvalidPersonNameError(name.to_owned()))
        }
    }

    /// Blank input means "no name given".
    pub fn new_optional(name: &str) -> Result<Option<Self>, InvalidPersonNameError> {
        if name.trim().is_empty() {
            Ok(None)
        } else {
            Self::new(name).map(Some)
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for PersonName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        PersonName::new(&inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"PersonName"))
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

impl Display for SubscriptionAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SubscriptionAction::Subscribe => "subscribe",
            SubscriptionAction::Unsubscribe => "unsubscribe",
        })
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Deserialize, Serialize)]
pub struct SubscriptionStatus {
    pub is_subscribed: bool,
    pub subscribers_count: u64,
}
