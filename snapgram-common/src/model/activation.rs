use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    ops::RangeInclusive,
};
use thiserror::Error;

pub const ACTIVATION_CODE_RANGE: RangeInclusive<u16> = 1000..=9999;

/// Four digit code mailed to a new user to prove they own the address.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct ActivationCode(u16);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Activation codes have four digits, got {0}")]
pub struct InvalidActivationCodeError(i64);

impl ActivationCode {
    #[must_use]
    pub fn new(code: u16) -> Option<Self> {
        ACTIVATION_CODE_RANGE.contains(&code).then_some(Self(code))
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(rand::rng().random_range(ACTIVATION_CODE_RANGE))
    }

    #[must_use]
    pub fn get(self) -> u16 {
        self.0
    }

    /// Whether the number a user typed in is exactly this code.
    #[must_use]
    pub fn matches(self, entered: i64) -> bool {
        i64::from(self.0) == entered
    }
}

impl Display for ActivationCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl TryFrom<u16> for ActivationCode {
    type Error = InvalidActivationCodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidActivationCodeError(value.into()))
    }
}

impl TryFrom<i32> for ActivationCode {
    type Error = InvalidActivationCodeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        u16::try_from(value)
            .ok()
            .and_then(Self::new)
            .ok_or(InvalidActivationCodeError(value.into()))
    }
}

impl From<ActivationCode> for u16 {
    fn from(value: ActivationCode) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use crate::model::activation::{ACTIVATION_CODE_RANGE, ActivationCode};

    #[test]
    fn generated_codes_have_four_digits() {
        for _ in 0..1000 {
            let code = ActivationCode::generate();
            assert!(ACTIVATION_CODE_RANGE.contains(&code.get()));
            assert_eq!(code.to_string().len(), 4);
        }
    }

    #[test]
    fn only_the_exact_code_matches() {
        let code = ActivationCode::new(4821).unwrap();

        assert!(code.matches(4821));
        assert!(!code.matches(4820));
        assert!(!code.matches(4822));
        assert!(!code.matches(-4821));
        assert!(!code.matches(4821 + (1 << 16)));
    }

    #[test]
    fn range_is_inclusive() {
        assert!(ActivationCode::new(999).is_none());
        assert!(ActivationCode::new(1000).is_some());
        assert!(ActivationCode::new(9999).is_some());
        assert!(ActivationCode::new(10000).is_none());
        assert!(ActivationCode::try_from(-1_i32).is_err());
    }
}
