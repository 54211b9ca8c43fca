use crate::model::{
    Id,
    image::MediaRef,
    tag::{TagName, extract_tags},
    user::User,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
};
use time::OffsetDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub author: User,
    pub caption: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub tags: Vec<TagName>,
    pub images: Vec<MediaRef>,
    pub likes: u64,
    pub dislikes: u64,
}

/// Caption, hashtags and newly uploaded images of a post being created or edited.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct PostDraft {
    pub caption: String,
    pub tags: BTreeSet<TagName>,
    pub images: Vec<MediaRef>,
}

impl PostDraft {
    #[must_use]
    pub fn new(caption: String, images: Vec<MediaRef>) -> Self {
        let tags = extract_tags(&caption);

        Self {
            caption,
            tags,
            images,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Like,
    Dislike,
}

impl Display for Reaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Reaction::Like => "like",
            Reaction::Dislike => "dislike",
        })
    }
}

impl Reaction {
    /// The reaction a profile loses when placing this one.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Reaction::Like => Reaction::Dislike,
            Reaction::Dislike => Reaction::Like,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Deserialize, Serialize)]
pub struct ReactionCounts {
    pub post_id: Id<PostMarker>,
    pub likes: u64,
    pub dislikes: u64,
}
