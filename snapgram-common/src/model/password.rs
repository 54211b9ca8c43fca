//! Rules a new password has to satisfy at registration.

use std::fmt::{Display, Formatter};
use thiserror::Error;

pub const PASSWORD_MIN_LEN: usize = 8;

/// Passwords `zxcvbn` scores below this (fewer than about 10^8 guesses) are too common.
pub const PASSWORD_MIN_SCORE: u8 = 3;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum PasswordProblem {
    TooShort,
    TooCommon,
    EntirelyNumeric,
}

impl Display for PasswordProblem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordProblem::TooShort => write!(
                f,
                "This password is too short. It must contain at least {PASSWORD_MIN_LEN} characters."
            ),
            PasswordProblem::TooCommon => f.write_str("This password is too common."),
            PasswordProblem::EntirelyNumeric => f.write_str("This password is entirely numeric."),
        }
    }
}

/// All problems found with one password, displayed joined by `", "`.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct PasswordProblems(pub Vec<PasswordProblem>);

impl Display for PasswordProblems {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, problem) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            Display::fmt(problem, f)?;
        }
        Ok(())
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum PasswordError {
    #[error("{0}")]
    Invalid(PasswordProblems),
    #[error("The passwords are not the same.")]
    Mismatch,
}

#[must_use]
pub fn password_problems(password: &str) -> Vec<PasswordProblem> {
    let mut problems = Vec::new();

    if password.chars().count() < PASSWORD_MIN_LEN {
        problems.push(PasswordProblem::TooShort);
    }
    if is_too_common(password) {
        problems.push(PasswordProblem::TooCommon);
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        problems.push(PasswordProblem::EntirelyNumeric);
    }

    problems
}

/// Blank passwords are not scored, they are already too short.
fn is_too_common(password: &str) -> bool {
    zxcvbn::zxcvbn(password, &[]).is_ok_and(|entropy| entropy.score() < PASSWORD_MIN_SCORE)
}

/// Checks the password of a registration form and its confirmation.
///
/// The policy runs on `password` alone; the confirmation is only compared afterwards.
pub fn check_passwords(password: &str, confirmation: &str) -> Result<(), PasswordError> {
    let problems = password_problems(password);
    if !problems.is_empty() {
        return Err(PasswordError::Invalid(PasswordProblems(problems)));
    }

    if password != confirmation {
        return Err(PasswordError::Mismatch);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::model::password::{
        PasswordError, PasswordProblem, check_passwords, password_problems,
    };

    #[test]
    fn short_common_password_reports_everything() {
        let error = check_passwords("newuser", "newuser@example.com").unwrap_err();

        assert_eq!(
            error.to_string(),
            "This password is too short. It must contain at least 8 characters., \
            This password is too common."
        );
    }

    #[test]
    fn numeric_password() {
        let error = check_passwords("12345678", "12345678").unwrap_err();

        assert_eq!(
            error.to_string(),
            "This password is too common., This password is entirely numeric."
        );
    }

    #[test]
    fn mismatch_is_checked_after_policy() {
        assert_eq!(
            check_passwords("Testpassword_123", "Testpassword_124"),
            Err(PasswordError::Mismatch)
        );
        assert_eq!(
            PasswordError::Mismatch.to_string(),
            "The passwords are not the same."
        );
    }

    #[test]
    fn well_known_passwords_are_too_common() {
        for password in [
            "1q2w3e4r5t",
            "qwerty12345",
            "password1234",
            "iloveyou2",
            "football1",
            "asdfghjkl",
        ] {
            assert_eq!(
                password_problems(password),
                vec![PasswordProblem::TooCommon],
                "{password}"
            );
        }
    }

    #[test]
    fn empty_password_is_only_too_short() {
        assert_eq!(password_problems(""), vec![PasswordProblem::TooShort]);
    }

    #[test]
    fn good_password() {
        assert_eq!(check_passwords("Testpassword_123", "Testpassword_123"), Ok(()));
    }
}
