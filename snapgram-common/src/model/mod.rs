pub mod activation;
pub mod auth;
pub mod image;
pub mod password;
pub mod post;
pub mod profile;
pub mod tag;
pub mod user;

use crate::{
    model::{
        activation::InvalidActivationCodeError,
        auth::{InvalidAuthTokenHashError, InvalidStoredPasswordError},
        image::InvalidMediaRefError,
        profile::InvalidPersonNameError,
        tag::InvalidTagNameError,
        user::{InvalidEmailAddressError, InvalidUserHandleError},
    },
    snowflake::{Epoch, Snowflake, SnowflakeGenerator},
    util::NonPositiveDurationError,
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, marker::PhantomData};
use thiserror::Error;
use time::{UtcDateTime, macros::utc_datetime};

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    UserHandle(#[from] InvalidUserHandleError),
    #[error(transparent)]
    EmailAddress(#[from] InvalidEmailAddressError),
    #[error(transparent)]
    PersonName(#[from] InvalidPersonNameError),
    #[error(transparent)]
    TagName(#[from] InvalidTagNameError),
    #[error(transparent)]
    MediaRef(#[from] InvalidMediaRefError),
    #[error(transparent)]
    ActivationCode(#[from] InvalidActivationCodeError),
    #[error(transparent)]
    StoredPassword(#[from] InvalidStoredPasswordError),
    #[error(transparent)]
    NonPositiveDuration(#[from] NonPositiveDurationError),
    #[error(transparent)]
    TokenHash(#[from] InvalidAuthTokenHashError),
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct SnapgramEpoch;
impl Epoch for SnapgramEpoch {
    const EPOCH_TIME: UtcDateTime = utc_datetime!(2025-01-01 00:00);
}

pub type SnapgramSnowflake = Snowflake<SnapgramEpoch>;
pub type SnapgramSnowflakeGenerator = SnowflakeGenerator<SnapgramEpoch>;

/// Snowflake id tagged with the kind of row it identifies.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id<Marker>(SnapgramSnowflake, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(snowflake: SnapgramSnowflake) -> Self {
        Self(snowflake, PhantomData)
    }

    #[must_use]
    pub fn snowflake(self) -> SnapgramSnowflake {
        self.0
    }

    /// Representation used for `BIGINT` columns.
    #[must_use]
    pub fn to_db(self) -> i64 {
        self.0.get().cast_signed()
    }

    #[must_use]
    pub fn from_db(value: i64) -> Self {
        value.cast_unsigned().into()
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> From<SnapgramSnowflake> for Id<Marker> {
    fn from(value: SnapgramSnowflake) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<Id<Marker>> for SnapgramSnowflake {
    fn from(value: Id<Marker>) -> Self {
        value.0
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Id::new(SnapgramSnowflake::new(value))
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.snowflake().get()
    }
}
