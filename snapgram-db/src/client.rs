use crate::record::{AccountRecord, PostRecord, ProfileRecord, SessionRecord, UserRecord};
use snapgram_common::model::{
    Id, ModelValidationError, SnapgramSnowflakeGenerator,
    auth::{AuthTokenHash, Session},
    image::{ImageMarker, MediaRef},
    post::{Post, PostDraft, PostMarker, Reaction, ReactionCounts},
    profile::{Profile, SubscriptionAction, SubscriptionStatus, UpdateProfile},
    tag::{TagMarker, TagName, TagReconciliation},
    user::{Account, CreateUser, User, UserHandle, UserMarker},
};
use snapgram_common::snowflake::{ProcessId, WorkerId};
use sqlx::{PgConnection, PgPool, migrate::MigrateError, query, query_as, query_scalar};
use std::{
    collections::BTreeSet,
    sync::{Mutex, PoisonError},
};
use thiserror::Error;
use tracing::debug;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("The username {0} is already taken")]
    HandleTaken(String),
    #[error("Running migrations failed: {0}")]
    Migrate(#[from] MigrateError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Columns of a [`PostRecord`]; callers append `WHERE`/`ORDER BY`.
const POST_SELECT: &str = "
    SELECT
        posts.post_snowflake,
        posts.caption,
        posts.created_at,
        users.user_snowflake,
        users.handle,
        COALESCE(
            (
                SELECT array_agg(tags.name ORDER BY tags.name)
                FROM posts.post_tags JOIN posts.tags USING (tag_snowflake)
                WHERE post_tags.post_snowflake = posts.post_snowflake
            ),
            '{}'
        ) AS tags,
        COALESCE(
            (
                SELECT array_agg(images.media ORDER BY images.image_snowflake)
                FROM posts.post_images JOIN posts.images USING (image_snowflake)
                WHERE post_images.post_snowflake = posts.post_snowflake
            ),
            '{}'
        ) AS images,
        (
            SELECT count(*) FROM posts.likes
            WHERE likes.post_snowflake = posts.post_snowflake
        ) AS likes,
        (
            SELECT count(*) FROM posts.dislikes
            WHERE dislikes.post_snowflake = posts.post_snowflake
        ) AS dislikes
    FROM
        posts.posts JOIN users.users USING (user_snowflake)
";

fn unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|err| err.is_unique_violation())
}

#[derive(Debug)]
pub struct DbClient {
    pool: PgPool,
    snowflake_generator: Mutex<SnapgramSnowflakeGenerator>,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool, worker_id: WorkerId, process_id: ProcessId) -> Self {
        let snowflake_generator =
            Mutex::new(SnapgramSnowflakeGenerator::new(worker_id, process_id));

        Self {
            pool,
            snowflake_generator,
        }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    #[must_use]
    pub fn generate_id<Marker>(&self) -> Id<Marker> {
        self.snowflake_generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate()
            .into()
    }

    pub async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_snowflake,
                users.handle
            FROM
                users.users
            WHERE
                users.user_snowflake = $1
            ",
        )
        .bind(user_id.to_db())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    pub async fn fetch_account_by_handle(&self, handle: &str) -> Result<Option<Account>> {
        let record = query_as::<_, AccountRecord>(
            "
            SELECT
                users.user_snowflake,
                users.handle,
                users.email,
                users.password_hash,
                users.is_active
            FROM
                users.users
            WHERE
                users.handle = $1
            ",
        )
        .bind(handle)
        .fetch_optional(&self.pool)
        .await?;

        let account = record.map(Account::try_from).transpose()?;
        Ok(account)
    }

    pub async fn handle_exists(&self, handle: &UserHandle) -> Result<bool> {
        let exists = query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users.users WHERE users.handle = $1)",
        )
        .bind(handle.get())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Creates an inactive account, its profile and the registration `session` at once.
    pub async fn register_user(
        &self,
        user_id: Id<UserMarker>,
        user: &CreateUser,
        session: &Session,
    ) -> Result<()> {
        let mut transaction = self.pool.begin().await?;

        let inserted = query(
            "
            INSERT INTO users.users (user_snowflake, handle, email, password_hash, is_active)
            VALUES ($1, $2, $3, $4, FALSE)
            ",
        )
        .bind(user_id.to_db())
        .bind(user.handle.get())
        .bind(user.email.get())
        .bind(user.password.as_phc())
        .execute(&mut *transaction)
        .await;

        match inserted {
            Err(err) if unique_violation(&err) => {
                return Err(DbError::HandleTaken(user.handle.get().to_owned()));
            }
            result => result?,
        };

        query(
            "
            INSERT INTO users.profiles (user_snowflake, first_name, last_name)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(user_id.to_db())
        .bind(user.first_name.as_ref().map(|name| name.get()))
        .bind(user.last_name.as_ref().map(|name| name.get()))
        .execute(&mut *transaction)
        .await?;

        insert_session(&mut transaction, session).await?;

        transaction.commit().await?;
        debug!(%user_id, handle = user.handle.get(), "Registered user");

        Ok(())
    }

    pub async fn create_session(&self, session: &Session) -> Result<()> {
        let mut connection = self.pool.acquire().await?;
        insert_session(&mut connection, session).await
    }

    pub async fn fetch_session(&self, token_hash: &AuthTokenHash) -> Result<Option<Session>> {
        let record = query_as::<_, SessionRecord>(
            "
            SELECT
                sessions.user_snowflake,
                sessions.token_hash,
                sessions.created_at,
                sessions.expires_after_seconds,
                sessions.activation_code
            FROM
                users.sessions
            WHERE
                sessions.token_hash = $1
            ",
        )
        .bind(token_hash.0.as_slice())
        .fetch_optional(&self.pool)
        .await?;

        let session = record.map(Session::try_from).transpose()?;
        Ok(session)
    }

    pub async fn delete_session(&self, token_hash: &AuthTokenHash) -> Result<()> {
        query("DELETE FROM users.sessions WHERE sessions.token_hash = $1")
            .bind(token_hash.0.as_slice())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Marks the account active and turns its registration session into a login session.
    pub async fn activate_user(
        &self,
        user_id: Id<UserMarker>,
        token_hash: &AuthTokenHash,
    ) -> Result<()> {
        let mut transaction = self.pool.begin().await?;

        query("UPDATE users.users SET is_active = TRUE WHERE users.user_snowflake = $1")
            .bind(user_id.to_db())
            .execute(&mut *transaction)
            .await?;

        query(
            "
            UPDATE users.sessions
            SET activation_code = NULL
            WHERE sessions.token_hash = $1 AND sessions.user_snowflake = $2
            ",
        )
        .bind(token_hash.0.as_slice())
        .bind(user_id.to_db())
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;
        debug!(%user_id, "Activated user");

        Ok(())
    }

    pub async fn fetch_profile(&self, user_id: Id<UserMarker>) -> Result<Option<Profile>> {
        let record = query_as::<_, ProfileRecord>(
            "
            SELECT
                users.user_snowflake,
                users.handle,
                profiles.first_name,
                profiles.last_name,
                profiles.bio,
                profiles.avatar
            FROM
                users.profiles JOIN users.users USING (user_snowflake)
            WHERE
                profiles.user_snowflake = $1
            ",
        )
        .bind(user_id.to_db())
        .fetch_optional(&self.pool)
        .await?;

        let profile = record.map(Profile::try_from).transpose()?;
        Ok(profile)
    }

    pub async fn update_profile(
        &self,
        user_id: Id<UserMarker>,
        update: &UpdateProfile,
    ) -> Result<Option<Profile>> {
        let updated = query(
            "
            UPDATE users.profiles
            SET
                first_name = $2,
                last_name = $3,
                bio = $4,
                avatar = COALESCE($5, profiles.avatar)
            WHERE
                profiles.user_snowflake = $1
            ",
        )
        .bind(user_id.to_db())
        .bind(update.first_name.get())
        .bind(update.last_name.as_ref().map(|name| name.get()))
        .bind(update.bio.as_deref())
        .bind(update.avatar.as_ref().map(MediaRef::get))
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch_profile(user_id).await
    }

    pub async fn is_subscribed(
        &self,
        subscriber: Id<UserMarker>,
        target: Id<UserMarker>,
    ) -> Result<bool> {
        let mut connection = self.pool.acquire().await?;
        is_subscribed(&mut connection, subscriber, target).await
    }

    /// Adds or removes `subscriber -> target`. Both directions are idempotent.
    ///
    /// Returns `None` if `target` has no profile.
    pub async fn set_subscription(
        &self,
        subscriber: Id<UserMarker>,
        target: Id<UserMarker>,
        action: SubscriptionAction,
    ) -> Result<Option<SubscriptionStatus>> {
        let mut transaction = self.pool.begin().await?;

        let target_exists = query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users.profiles WHERE profiles.user_snowflake = $1)",
        )
        .bind(target.to_db())
        .fetch_one(&mut *transaction)
        .await?;
        if !target_exists {
            return Ok(None);
        }

        let statement = match action {
            SubscriptionAction::Subscribe => {
                "
                INSERT INTO users.subscriptions (subscriber_snowflake, target_snowflake)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "
            }
            SubscriptionAction::Unsubscribe => {
                "
                DELETE FROM users.subscriptions
                WHERE subscriber_snowflake = $1 AND target_snowflake = $2
                "
            }
        };
        query(statement)
            .bind(subscriber.to_db())
            .bind(target.to_db())
            .execute(&mut *transaction)
            .await?;

        let is_subscribed = is_subscribed(&mut transaction, subscriber, target).await?;
        let subscribers_count = query_scalar::<_, i64>(
            "SELECT count(*) FROM users.subscriptions WHERE target_snowflake = $1",
        )
        .bind(target.to_db())
        .fetch_one(&mut *transaction)
        .await?;

        transaction.commit().await?;

        Ok(Some(SubscriptionStatus {
            is_subscribed,
            subscribers_count: subscribers_count.cast_unsigned(),
        }))
    }

    pub async fn fetch_subscribers(&self, target: Id<UserMarker>) -> Result<Vec<User>> {
        let records = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_snowflake,
                users.handle
            FROM
                users.subscriptions
                JOIN users.users ON users.user_snowflake = subscriptions.subscriber_snowflake
            WHERE
                subscriptions.target_snowflake = $1
            ORDER BY
                users.handle
            ",
        )
        .bind(target.to_db())
        .fetch_all(&self.pool)
        .await?;

        let users = records
            .into_iter()
            .map(User::try_from)
            .collect::<Result<_, _>>()?;
        Ok(users)
    }

    pub async fn fetch_subscriptions(&self, subscriber: Id<UserMarker>) -> Result<Vec<User>> {
        let records = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_snowflake,
                users.handle
            FROM
                users.subscriptions
                JOIN users.users ON users.user_snowflake = subscriptions.target_snowflake
            WHERE
                subscriptions.subscriber_snowflake = $1
            ORDER BY
                users.handle
            ",
        )
        .bind(subscriber.to_db())
        .fetch_all(&self.pool)
        .await?;

        let users = records
            .into_iter()
            .map(User::try_from)
            .collect::<Result<_, _>>()?;
        Ok(users)
    }

    pub async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, PostRecord>(&format!(
            "{POST_SELECT} WHERE posts.post_snowflake = $1"
        ))
        .bind(post_id.to_db())
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    /// Every post, newest first.
    pub async fn fetch_feed(&self) -> Result<Vec<Post>> {
        let records = query_as::<_, PostRecord>(&format!(
            "{POST_SELECT} ORDER BY posts.created_at DESC, posts.post_snowflake DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        collect_posts(records)
    }

    pub async fn fetch_user_posts(&self, user_id: Id<UserMarker>) -> Result<Vec<Post>> {
        let records = query_as::<_, PostRecord>(&format!(
            "
            {POST_SELECT}
            WHERE posts.user_snowflake = $1
            ORDER BY posts.created_at DESC, posts.post_snowflake DESC
            "
        ))
        .bind(user_id.to_db())
        .fetch_all(&self.pool)
        .await?;

        collect_posts(records)
    }

    /// Posts carrying a tag whose name equals `tag` ignoring case, newest first.
    pub async fn fetch_posts_by_tag(&self, tag: &str) -> Result<Vec<Post>> {
        let records = query_as::<_, PostRecord>(&format!(
            "
            {POST_SELECT}
            WHERE EXISTS (
                SELECT 1
                FROM posts.post_tags JOIN posts.tags USING (tag_snowflake)
                WHERE
                    post_tags.post_snowflake = posts.post_snowflake
                    AND lower(tags.name) = lower($1)
            )
            ORDER BY posts.created_at DESC, posts.post_snowflake DESC
            "
        ))
        .bind(tag)
        .fetch_all(&self.pool)
        .await?;

        collect_posts(records)
    }

    /// Distinct tags across all posts of a user.
    pub async fn fetch_user_tags(&self, user_id: Id<UserMarker>) -> Result<Vec<TagName>> {
        let names = query_scalar::<_, String>(
            "
            SELECT DISTINCT
                tags.name
            FROM
                posts.posts
                JOIN posts.post_tags USING (post_snowflake)
                JOIN posts.tags USING (tag_snowflake)
            WHERE
                posts.user_snowflake = $1
            ORDER BY
                tags.name
            ",
        )
        .bind(user_id.to_db())
        .fetch_all(&self.pool)
        .await?;

        let tags = names
            .into_iter()
            .map(TagName::new)
            .collect::<Result<_, _>>()
            .map_err(ModelValidationError::from)?;
        Ok(tags)
    }

    pub async fn create_post(&self, author: Id<UserMarker>, draft: &PostDraft) -> Result<Post> {
        let post_id = self.generate_id::<PostMarker>();
        let mut transaction = self.pool.begin().await?;

        query(
            "
            INSERT INTO posts.posts (post_snowflake, user_snowflake, caption)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(post_id.to_db())
        .bind(author.to_db())
        .bind(&draft.caption)
        .execute(&mut *transaction)
        .await?;

        self.attach_images(&mut transaction, post_id, &draft.images)
            .await?;
        self.reconcile_tags(&mut transaction, post_id, &draft.tags)
            .await?;

        transaction.commit().await?;
        debug!(%post_id, %author, "Created post");

        self.fetch_post(post_id)
            .await?
            .ok_or(DbError::Sqlx(sqlx::Error::RowNotFound))
    }

    /// Replaces the caption, re-derives the tags and appends `draft.images`.
    ///
    /// Returns `None` if the post does not exist.
    pub async fn update_post(
        &self,
        post_id: Id<PostMarker>,
        draft: &PostDraft,
    ) -> Result<Option<Post>> {
        let mut transaction = self.pool.begin().await?;

        let updated = query("UPDATE posts.posts SET caption = $2 WHERE posts.post_snowflake = $1")
            .bind(post_id.to_db())
            .bind(&draft.caption)
            .execute(&mut *transaction)
            .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        self.attach_images(&mut transaction, post_id, &draft.images)
            .await?;
        self.reconcile_tags(&mut transaction, post_id, &draft.tags)
            .await?;

        transaction.commit().await?;
        debug!(%post_id, "Updated post");

        self.fetch_post(post_id).await
    }

    /// Returns whether a post was deleted.
    pub async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let deleted = query("DELETE FROM posts.posts WHERE posts.post_snowflake = $1")
            .bind(post_id.to_db())
            .execute(&self.pool)
            .await?;

        Ok(deleted.rows_affected() > 0)
    }

    /// Puts `user_id` into the `reaction` set of the post and out of the opposite one.
    ///
    /// Returns `None` if the post does not exist.
    pub async fn set_reaction(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
        reaction: Reaction,
    ) -> Result<Option<ReactionCounts>> {
        let mut transaction = self.pool.begin().await?;

        let post_exists = query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM posts.posts WHERE posts.post_snowflake = $1)",
        )
        .bind(post_id.to_db())
        .fetch_one(&mut *transaction)
        .await?;
        if !post_exists {
            return Ok(None);
        }

        let add = format!(
            "
            INSERT INTO posts.{} (post_snowflake, user_snowflake)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            ",
            reaction_table(reaction)
        );
        query(&add)
            .bind(post_id.to_db())
            .bind(user_id.to_db())
            .execute(&mut *transaction)
            .await?;

        // Deleting a membership that is not there affects zero rows, which is fine.
        let remove = format!(
            "DELETE FROM posts.{} WHERE post_snowflake = $1 AND user_snowflake = $2",
            reaction_table(reaction.opposite())
        );
        query(&remove)
            .bind(post_id.to_db())
            .bind(user_id.to_db())
            .execute(&mut *transaction)
            .await?;

        let (likes, dislikes) = query_as::<_, (i64, i64)>(
            "
            SELECT
                (SELECT count(*) FROM posts.likes WHERE likes.post_snowflake = $1),
                (SELECT count(*) FROM posts.dislikes WHERE dislikes.post_snowflake = $1)
            ",
        )
        .bind(post_id.to_db())
        .fetch_one(&mut *transaction)
        .await?;

        transaction.commit().await?;

        Ok(Some(ReactionCounts {
            post_id,
            likes: likes.cast_unsigned(),
            dislikes: dislikes.cast_unsigned(),
        }))
    }

    async fn attach_images(
        &self,
        connection: &mut PgConnection,
        post_id: Id<PostMarker>,
        images: &[MediaRef],
    ) -> Result<()> {
        for image in images {
            let image_id = self.generate_id::<ImageMarker>();

            query("INSERT INTO posts.images (image_snowflake, media) VALUES ($1, $2)")
                .bind(image_id.to_db())
                .bind(image.get())
                .execute(&mut *connection)
                .await?;
            query("INSERT INTO posts.post_images (post_snowflake, image_snowflake) VALUES ($1, $2)")
                .bind(post_id.to_db())
                .bind(image_id.to_db())
                .execute(&mut *connection)
                .await?;
        }

        Ok(())
    }

    /// Attaches `desired` to the post, reusing tag rows by exact name, and deletes the tag
    /// rows of every name the post carried before but no longer wants.
    ///
    /// The delete is global: other posts sharing such a row lose the tag as well.
    async fn reconcile_tags(
        &self,
        connection: &mut PgConnection,
        post_id: Id<PostMarker>,
        desired: &BTreeSet<TagName>,
    ) -> Result<()> {
        let previous = query_scalar::<_, String>(
            "
            SELECT tags.name
            FROM posts.post_tags JOIN posts.tags USING (tag_snowflake)
            WHERE post_tags.post_snowflake = $1
            ",
        )
        .bind(post_id.to_db())
        .fetch_all(&mut *connection)
        .await?
        .into_iter()
        .map(TagName::new)
        .collect::<Result<BTreeSet<_>, _>>()
        .map_err(ModelValidationError::from)?;

        let reconciliation = TagReconciliation::new(&previous, desired.clone());

        for name in &reconciliation.attach {
            let existing = query_scalar::<_, i64>(
                "
                SELECT tags.tag_snowflake
                FROM posts.tags
                WHERE tags.name = $1
                ORDER BY tags.tag_snowflake
                LIMIT 1
                ",
            )
            .bind(name.get())
            .fetch_optional(&mut *connection)
            .await?;

            let tag_snowflake = if let Some(tag_snowflake) = existing {
                tag_snowflake
            } else {
                let tag_id = self.generate_id::<TagMarker>();
                query("INSERT INTO posts.tags (tag_snowflake, name) VALUES ($1, $2)")
                    .bind(tag_id.to_db())
                    .bind(name.get())
                    .execute(&mut *connection)
                    .await?;
                tag_id.to_db()
            };

            query(
                "
                INSERT INTO posts.post_tags (post_snowflake, tag_snowflake)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                ",
            )
            .bind(post_id.to_db())
            .bind(tag_snowflake)
            .execute(&mut *connection)
            .await?;
        }

        if !reconciliation.purge.is_empty() {
            let purge: Vec<&str> = reconciliation.purge.iter().map(TagName::get).collect();
            let deleted = query("DELETE FROM posts.tags WHERE tags.name = ANY($1)")
                .bind(purge.as_slice())
                .execute(&mut *connection)
                .await?;
            debug!(%post_id, ?purge, rows = deleted.rows_affected(), "Purged tags");
        }

        Ok(())
    }
}

fn reaction_table(reaction: Reaction) -> &'static str {
    match reaction {
        Reaction::Like => "likes",
        Reaction::Dislike => "dislikes",
    }
}

fn collect_posts(records: Vec<PostRecord>) -> Result<Vec<Post>> {
    let posts = records
        .into_iter()
        .map(Post::try_from)
        .collect::<Result<_, _>>()?;
    Ok(posts)
}

async fn insert_session(connection: &mut PgConnection, session: &Session) -> Result<()> {
    query(
        "
        INSERT INTO users.sessions
            (token_hash, user_snowflake, created_at, expires_after_seconds, activation_code)
        VALUES ($1, $2, $3, $4, $5)
        ",
    )
    .bind(session.token_hash.0.as_slice())
    .bind(session.user.to_db())
    .bind(session.created_at)
    .bind(session.expires_after.map(|duration| duration.whole_seconds()))
    .bind(session.activation_code.map(|code| i32::from(code.get())))
    .execute(&mut *connection)
    .await?;

    Ok(())
}

async fn is_subscribed(
    connection: &mut PgConnection,
    subscriber: Id<UserMarker>,
    target: Id<UserMarker>,
) -> Result<bool> {
    let subscribed = query_scalar::<_, bool>(
        "
        SELECT EXISTS (
            SELECT 1 FROM users.subscriptions
            WHERE subscriber_snowflake = $1 AND target_snowflake = $2
        )
        ",
    )
    .bind(subscriber.to_db())
    .bind(target.to_db())
    .fetch_one(&mut *connection)
    .await?;

    Ok(subscribed)
}
