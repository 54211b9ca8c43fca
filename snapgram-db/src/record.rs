use snapgram_common::{
    model::{
        Id, ModelValidationError,
        activation::ActivationCode,
        auth::{Session, StoredPassword},
        image::MediaRef,
        post::Post,
        profile::{PersonName, Profile},
        tag::TagName,
        user::{Account, EmailAddress, User, UserHandle},
    },
    util::PositiveDuration,
};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_snowflake: i64,
    pub handle: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct AccountRecord {
    pub user_snowflake: i64,
    pub handle: String,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct SessionRecord {
    pub user_snowflake: i64,
    pub token_hash: Vec<u8>,
    pub created_at: OffsetDateTime,
    pub expires_after_seconds: Option<i64>,
    pub activation_code: Option<i32>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct ProfileRecord {
    pub user_snowflake: i64,
    pub handle: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PostRecord {
    pub post_snowflake: i64,
    pub caption: String,
    pub created_at: OffsetDateTime,
    pub user_snowflake: i64,
    pub handle: String,
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub likes: i64,
    pub dislikes: i64,
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.user_snowflake),
            handle: UserHandle::new(value.handle)?,
        })
    }
}

impl TryFrom<AccountRecord> for Account {
    type Error = ModelValidationError;

    fn try_from(value: AccountRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: User {
                id: Id::from_db(value.user_snowflake),
                handle: UserHandle::new(value.handle)?,
            },
            email: EmailAddress::new(value.email)?,
            password: StoredPassword::from_phc(value.password_hash)?,
            is_active: value.is_active,
        })
    }
}

impl TryFrom<SessionRecord> for Session {
    type Error = ModelValidationError;

    fn try_from(value: SessionRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: Id::from_db(value.user_snowflake),
            token_hash: value.token_hash.try_into()?,
            created_at: value.created_at,
            expires_after: value
                .expires_after_seconds
                .map(|seconds| PositiveDuration::try_from(Duration::seconds(seconds)))
                .transpose()?,
            activation_code: value
                .activation_code
                .map(ActivationCode::try_from)
                .transpose()?,
        })
    }
}

impl TryFrom<ProfileRecord> for Profile {
    type Error = ModelValidationError;

    fn try_from(value: ProfileRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: User {
                id: Id::from_db(value.user_snowflake),
                handle: UserHandle::new(value.handle)?,
            },
            first_name: value
                .first_name
                .as_deref()
                .map(PersonName::new_optional)
                .transpose()?
                .flatten(),
            last_name: value
                .last_name
                .as_deref()
                .map(PersonName::new_optional)
                .transpose()?
                .flatten(),
            bio: value.bio,
            avatar: value.avatar.map(MediaRef::new).transpose()?,
        })
    }
}

impl TryFrom<PostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: PostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.post_snowflake),
            author: User {
                id: Id::from_db(value.user_snowflake),
                handle: UserHandle::new(value.handle)?,
            },
            caption: value.caption,
            created_at: value.created_at,
            tags: value
                .tags
                .into_iter()
                .map(TagName::new)
                .collect::<Result<_, _>>()?,
            images: value
                .images
                .into_iter()
                .map(MediaRef::new)
                .collect::<Result<_, _>>()?,
            likes: count(value.likes),
            dislikes: count(value.dislikes),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::record::{PostRecord, ProfileRecord, SessionRecord};
    use snapgram_common::model::{auth::Session, post::Post, profile::Profile};
    use time::macros::datetime;

    fn post_record() -> PostRecord {
        PostRecord {
            post_snowflake: -5,
            caption: "Evening #sunset".to_owned(),
            created_at: datetime!(2025-06-01 18:00 UTC),
            user_snowflake: 12,
            handle: "testuser".to_owned(),
            tags: vec!["sunset".to_owned()],
            images: vec!["post_image/1-a.jpg".to_owned()],
            likes: 3,
            dislikes: 0,
        }
    }

    #[test]
    fn post_from_record() {
        let post = Post::try_from(post_record()).unwrap();

        assert_eq!(u64::from(post.id), (-5_i64).cast_unsigned());
        assert_eq!(post.author.handle.get(), "testuser");
        assert_eq!(post.tags[0].get(), "sunset");
        assert_eq!(post.images[0].get(), "post_image/1-a.jpg");
        assert_eq!((post.likes, post.dislikes), (3, 0));
    }

    #[test]
    fn corrupt_post_rows_are_rejected() {
        let record = PostRecord {
            images: vec!["../outside".to_owned()],
            ..post_record()
        };

        assert!(Post::try_from(record).is_err());
    }

    #[test]
    fn blank_profile_names_read_as_missing() {
        let profile = Profile::try_from(ProfileRecord {
            user_snowflake: 1,
            handle: "testuser".to_owned(),
            first_name: Some(String::new()),
            last_name: Some("user".to_owned()),
            bio: None,
            avatar: None,
        })
        .unwrap();

        assert_eq!(profile.first_name, None);
        assert_eq!(profile.last_name.unwrap().get(), "user");
    }

    #[test]
    fn session_from_record() {
        let record = SessionRecord {
            user_snowflake: 9,
            token_hash: vec![0; 32],
            created_at: datetime!(2025-06-01 18:00 UTC),
            expires_after_seconds: Some(60),
            activation_code: Some(4821),
        };

        let session = Session::try_from(record.clone()).unwrap();
        assert_eq!(session.activation_code.map(|code| code.get()), Some(4821));

        let wrong_hash_len = SessionRecord {
            token_hash: vec![0; 3],
            ..record
        };
        assert!(Session::try_from(wrong_hash_len).is_err());
    }
}
