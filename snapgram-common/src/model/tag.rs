use regex::Regex;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::{collections::BTreeSet, sync::LazyLock};
use thiserror::Error;

pub const TAG_NAME_MAX_LEN: usize = 50;

static HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\w+)").expect("hashtag pattern is valid"));

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct TagMarker;

/// Hashtag name without the leading `#`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct TagName(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Tags are 1 to 50 word characters: {0:?}")]
pub struct InvalidTagNameError(String);

impl TagName {
    pub fn new(name: String) -> Result<Self, InvalidTagNameError> {
        let length = name.chars().count();
        let word_only = HASHTAG
            .captures(&format!("#{name}"))
            .and_then(|captures| captures.get(1))
            .is_some_and(|word| word.as_str().len() == name.len());

        if (1..=TAG_NAME_MAX_LEN).contains(&length) && word_only {
            Ok(Self(name))
        } else {
            Err(InvalidTagNameError(name))
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

impl<'de> Deserialize<'de> for TagName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        TagName::new(inner).map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"TagName"))
    }
}

/// Every distinct `#word` in `caption`. Words longer than [`TAG_NAME_MAX_LEN`] are skipped.
#[must_use]
pub fn extract_tags(caption: &str) -> BTreeSet<TagName> {
    HASHTAG
        .captures_iter(caption)
        .filter_map(|captures| captures.get(1))
        .filter_map(|word| TagName::new(word.as_str().to_owned()).ok())
        .collect()
}

/// What has to happen to the tag rows of a post whose caption now yields `desired`.
///
/// `purge` names are deleted as tag rows, not just detached from this post, so any other
/// post sharing a row with that name loses the tag too.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct TagReconciliation {
    pub attach: BTreeSet<TagName>,
    pub purge: BTreeSet<TagName>,
}

impl TagReconciliation {
    /// Plans the update of a post that carried `previously_attached` before the edit.
    ///
    /// Once `desired` is attached, the post carries the union of both sets; everything in
    /// that union that is not desired gets purged.
    #[must_use]
    pub fn new(previously_attached: &BTreeSet<TagName>, desired: BTreeSet<TagName>) -> Self {
        let purge = previously_attached.difference(&desired).cloned().collect();

        Self {
            attach: desired,
            purge,
        }
    }
}
