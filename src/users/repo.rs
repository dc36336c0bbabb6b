use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::{Access, DbPools};
use crate::error::AppError;
use crate::users::repo_types::{NewUser, User, UserChanges, UserFilter, UserPage};

/// Data access for users. Writes always go to the primary, reads to the replica.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, new_user: NewUser) -> Result<User, AppError>;
    async fn get_by_id(&self, id: Uuid) -> Result<User, AppError>;
    async fn list(&self, filter: &UserFilter) -> Result<UserPage, AppError>;
    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<User, AppError>;
    /// Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    pools: DbPools,
}

impl PgUserRepository {
    pub fn new(pools: DbPools) -> Self {
        Self { pools }
    }

    /// Checked on the primary so a just-written email is never missed through replica lag.
    async fn email_taken(&self, email: &str, excluding: Uuid) -> Result<bool, AppError> {
        let taken = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND id <> $2)"#,
        )
        .bind(email)
        .bind(excluding)
        .fetch_one(self.pools.route(Access::Write))
        .await?;
        Ok(taken)
    }
}

/// Escapes LIKE wildcards so user input only ever matches literally.
pub(crate) fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    qb.push(" WHERE TRUE");
    if let Some(active) = filter.is_active {
        qb.push(" AND is_active = ").push_bind(active);
    }
    if let Some(fragment) = &filter.email_contains {
        qb.push(" AND email ILIKE ")
            .push_bind(format!("%{}%", escape_like(fragment)));
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    #[instrument(skip(self, new_user), fields(email = %new_user.email))]
    async fn create(&self, new_user: NewUser) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, first_name, last_name, is_active)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, first_name, last_name, is_active, created_at, updated_at
            "#,
        )
        .bind(&new_user.email)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(new_user.is_active)
        .fetch_one(self.pools.route(Access::Write))
        .await?;

        info!(user_id = %user.id, "user created");
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: Uuid) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, first_name, last_name, is_active, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pools.route(Access::Read))
        .await?;

        match user {
            Some(u) => Ok(u),
            None => {
                debug!(user_id = %id, "user not found");
                Err(AppError::NotFound("User"))
            }
        }
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &UserFilter) -> Result<UserPage, AppError> {
        let pool = self.pools.route(Access::Read);

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filters(&mut count, filter);

        let mut page = QueryBuilder::<Postgres>::new(
            "SELECT id, email, first_name, last_name, is_active, created_at, updated_at FROM users",
        );
        push_filters(&mut page, filter);
        page.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let (total, users) = tokio::try_join!(
            count.build_query_scalar::<i64>().fetch_one(pool),
            page.build_query_as::<User>().fetch_all(pool),
        )?;

        info!(returned = users.len(), total, "users listed");
        Ok(UserPage { users, total })
    }

    #[instrument(skip(self, changes))]
    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<User, AppError> {
        if changes.is_empty() {
            return Err(AppError::Validation(crate::error::Violations::single(
                "body",
                "at least one field must be supplied",
            )));
        }

        if let Some(email) = &changes.email {
            if self.email_taken(email, id).await? {
                return Err(AppError::Conflict("Email already exists".into()));
            }
        }

        // updated_at is maintained by the users_touch_updated_at trigger
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE users SET ");
        let mut set = qb.separated(", ");
        if let Some(email) = changes.email {
            set.push("email = ").push_bind_unseparated(email);
        }
        if let Some(first_name) = changes.first_name {
            set.push("first_name = ").push_bind_unseparated(first_name);
        }
        if let Some(last_name) = changes.last_name {
            set.push("last_name = ").push_bind_unseparated(last_name);
        }
        if let Some(active) = changes.is_active {
            set.push("is_active = ").push_bind_unseparated(active);
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING id, email, first_name, last_name, is_active, created_at, updated_at");

        let user = qb
            .build_query_as::<User>()
            .fetch_optional(self.pools.route(Access::Write))
            .await?;

        match user {
            Some(u) => {
                info!(user_id = %u.id, "user updated");
                Ok(u)
            }
            None => {
                info!(user_id = %id, "user not found for update");
                Err(AppError::NotFound("User"))
            }
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(self.pools.route(Access::Write))
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(user_id = %id, "user deleted");
        } else {
            info!(user_id = %id, "user not found for deletion");
        }
        Ok(deleted)
    }
}
