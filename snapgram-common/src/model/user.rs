use crate::model::{
    Id,
    auth::StoredPassword,
    profile::PersonName,
};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use thiserror::Error;
use validator::ValidateEmail;

pub const USER_HANDLE_MAX_LEN: usize = 50;
pub const EMAIL_ADDRESS_MAX_LEN: usize = 254;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: Id<UserMarker>,
    pub handle: UserHandle,
}

/// Account row including the fields only needed for logging in.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Account {
    pub user: User,
    pub email: EmailAddress,
    pub password: StoredPassword,
    pub is_active: bool,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreateUser {
    pub handle: UserHandle,
    pub email: EmailAddress,
    pub first_name: Option<PersonName>,
    pub last_name: Option<PersonName>,
    pub password: StoredPassword,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct UserHandle(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The username is invalid: {0:?}. Use at most 50 letters, digits and @/./+/-/_ only.")]
pub struct InvalidUserHandleError(String);

fn is_handle_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_')
}

impl UserHandle {
    pub fn new(handle: String) -> Result<Self, InvalidUserHandleError> {
        let length = handle.chars().count();
        if (1..=USER_HANDLE_MAX_LEN).contains(&length) && handle.chars().all(is_handle_char) {
            Ok(UserHandle(handle))
        } else {
            Err(InvalidUserHandleError(handle))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl<'de> Deserialize<'de> for UserHandle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        UserHandle::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"UserHandle"))
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Enter a valid email address: {0:?}")]
pub struct InvalidEmailAddressError(String);

impl EmailAddress {
    /// Accepts addresses of the form `local@domain.tld` that mail transports can parse.
    pub fn new(address: String) -> Result<Self, InvalidEmailAddressError> {
        let valid = address.len() <= EMAIL_ADDRESS_MAX_LEN
            && address.as_str().validate_email()
            && address
                .rsplit_once('@')
                .is_some_and(|(_, domain)| domain.contains('.'));

        if valid {
            Ok(Self(address))
        } else {
            Err(InvalidEmailAddressError(address))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for EmailAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        EmailAddress::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"EmailAddress"))
    }
}
