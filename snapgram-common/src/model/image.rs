use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct ImageMarker;

/// Directory inside the media root a stored file belongs to.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum MediaFolder {
    PostImage,
    AvatarImage,
}

impl MediaFolder {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MediaFolder::PostImage => "post_image",
            MediaFolder::AvatarImage => "avatar_image",
        }
    }
}

impl Display for MediaFolder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to a stored media file: a relative path below the media root.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct MediaRef(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Invalid media reference: {0:?}")]
pub struct InvalidMediaRefError(String);

impl MediaRef {
    pub fn new(path: String) -> Result<Self, InvalidMediaRefError> {
        let valid = !path.is_empty()
            && !path.starts_with('/')
            && !path.contains('\\')
            && path
                .split('/')
                .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

        if valid {
            Ok(Self(path))
        } else {
            Err(InvalidMediaRefError(path))
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

impl<'de> Deserialize<'de> for MediaRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        MediaRef::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"MediaRef"))
    }
}
