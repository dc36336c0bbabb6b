//! In-process `UserRepository` with the same observable rules as the Postgres one.

use std::collections::HashMap;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, Violations};
use crate::users::repo::UserRepository;
use crate::users::repo_types::{NewUser, User, UserChanges, UserFilter, UserPage};

#[derive(Default)]
pub struct MemoryUserRepository {
    rows: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn email_conflict() -> AppError {
    AppError::Conflict("Email already exists".into())
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, new_user: NewUser) -> Result<User, AppError> {
        let mut rows = self.rows.write().await;
        if rows.values().any(|u| u.email == new_user.email) {
            return Err(email_conflict());
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            is_active: new_user.is_active,
            created_at: now,
            updated_at: now,
        };
        rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<User, AppError> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AppError::NotFound("User"))
    }

    async fn list(&self, filter: &UserFilter) -> Result<UserPage, AppError> {
        let rows = self.rows.read().await;
        let mut matching: Vec<User> = rows
            .values()
            .filter(|u| filter.is_active.map_or(true, |a| u.is_active == a))
            .filter(|u| {
                filter
                    .email_contains
                    .as_deref()
                    .map_or(true, |frag| u.email.to_lowercase().contains(&frag.to_lowercase()))
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let users = matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect();
        Ok(UserPage { users, total })
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<User, AppError> {
        if changes.is_empty() {
            return Err(AppError::Validation(Violations::single(
                "body",
                "at least one field must be supplied",
            )));
        }

        let mut rows = self.rows.write().await;
        if let Some(email) = &changes.email {
            if rows.values().any(|u| u.id != id && &u.email == email) {
                return Err(email_conflict());
            }
        }

        let user = rows.get_mut(&id).ok_or(AppError::NotFound("User"))?;
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(first_name) = changes.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            user.last_name = last_name;
        }
        if let Some(active) = changes.is_active {
            user.is_active = active;
        }
        user.updated_at = OffsetDateTime::now_utc().max(user.updated_at + Duration::microseconds(1));
        Ok(user.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.rows.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn create_assigns_unique_ids_and_equal_timestamps() {
        let repo = MemoryUserRepository::new();
        let a = repo.create(new_user("a@example.com")).await.unwrap();
        let b = repo.create(new_user("b@example.com")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.created_at, a.updated_at);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_and_leaves_first_untouched() {
        let repo = MemoryUserRepository::new();
        let first = repo.create(new_user("dup@example.com")).await.unwrap();
        let err = repo.create(new_user("dup@example.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(repo.get_by_id(first.id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn update_changes_only_supplied_fields_and_bumps_updated_at() {
        let repo = MemoryUserRepository::new();
        let before = repo.create(new_user("u@example.com")).await.unwrap();
        let after = repo
            .update(
                before.id,
                UserChanges {
                    first_name: Some("Grace".into()),
                    ..UserChanges::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(after.first_name, "Grace");
        assert_eq!(after.last_name, before.last_name);
        assert_eq!(after.email, before.email);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn update_email_conflict_excludes_self() {
        let repo = MemoryUserRepository::new();
        let a = repo.create(new_user("a@example.com")).await.unwrap();
        repo.create(new_user("b@example.com")).await.unwrap();

        let same = UserChanges {
            email: Some("a@example.com".into()),
            ..UserChanges::default()
        };
        assert!(repo.update(a.id, same).await.is_ok());

        let taken = UserChanges {
            email: Some("b@example.com".into()),
            ..UserChanges::default()
        };
        assert!(matches!(repo.update(a.id, taken).await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn empty_update_is_a_validation_error() {
        let repo = MemoryUserRepository::new();
        let a = repo.create(new_user("a@example.com")).await.unwrap();
        let err = repo.update(a.id, UserChanges::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_went_away() {
        let repo = MemoryUserRepository::new();
        let a = repo.create(new_user("a@example.com")).await.unwrap();
        assert!(repo.delete(a.id).await.unwrap());
        assert!(!repo.delete(a.id).await.unwrap());
        assert!(matches!(repo.get_by_id(a.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_pages_are_stable_and_counted() {
        let repo = MemoryUserRepository::new();
        for i in 0..15 {
            repo.create(new_user(&format!("user{i}@example.com"))).await.unwrap();
        }
        let first = repo
            .list(&UserFilter { limit: 10, ..UserFilter::default() })
            .await
            .unwrap();
        let second = repo
            .list(&UserFilter { limit: 10, offset: 10, ..UserFilter::default() })
            .await
            .unwrap();
        assert_eq!(first.total, 15);
        assert_eq!(first.users.len(), 10);
        assert_eq!(second.users.len(), 5);
        assert!(first.users.iter().all(|u| !second.users.contains(u)));
    }
}
