//! Stores over the live service databases
//!
//! Every operation opens its own connection and drops it afterwards, so a
//! wait never reuses a session that might hold a stale snapshot.

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, warn};

use niffler_common::{Category, Friendship, FriendshipStatus, User};

use super::{SpendStore, UserdataStore};
use crate::error::E2eResult;

const USER_COLUMNS: &str =
    r#"id::text, username, currency, firstname, surname, full_name FROM "user""#;

const FRIENDSHIP_COLUMNS: &str =
    "requester_id::text, addressee_id::text, status, created_date FROM friendship";

const CATEGORY_COLUMNS: &str = "id::text, name, username, archived FROM category";

async fn connect(url: &str) -> E2eResult<Client> {
    let (client, connection) = tokio_postgres::connect(url, NoTls).await?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!("PostgreSQL connection error: {}", e);
        }
    });

    Ok(client)
}

fn user_from_row(row: &Row) -> User {
    User {
        id: row.get(0),
        username: row.get(1),
        currency: row.get(2),
        firstname: row.get(3),
        surname: row.get(4),
        full_name: row.get(5),
    }
}

fn friendship_from_row(row: &Row) -> Friendship {
    Friendship {
        requester_id: row.get(0),
        addressee_id: row.get(1),
        status: FriendshipStatus::from(row.get::<_, String>(2)),
        created_date: row.get(3),
    }
}

fn category_from_row(row: &Row) -> Category {
    Category {
        id: row.get(0),
        name: row.get(1),
        username: row.get(2),
        archived: row.get(3),
    }
}

/// niffler-userdata over PostgreSQL
#[derive(Debug, Clone)]
pub struct PgUserdataStore {
    url: String,
}

impl PgUserdataStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl UserdataStore for PgUserdataStore {
    async fn user_by_username(&self, username: &str) -> E2eResult<Option<User>> {
        let client = connect(&self.url).await?;
        let row = client
            .query_opt(
                &format!("SELECT {USER_COLUMNS} WHERE username = $1 LIMIT 1"),
                &[&username],
            )
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn user_by_id(&self, id: &str) -> E2eResult<Option<User>> {
        let client = connect(&self.url).await?;
        let row = client
            .query_opt(&format!("SELECT {USER_COLUMNS} WHERE id::text = $1"), &[&id])
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn users(&self) -> E2eResult<Vec<User>> {
        let client = connect(&self.url).await?;
        let rows = client
            .query(&format!("SELECT {USER_COLUMNS} ORDER BY username"), &[])
            .await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn count_users_by_username(&self, username: &str) -> E2eResult<i64> {
        let client = connect(&self.url).await?;
        let row = client
            .query_one(
                r#"SELECT count(*) FROM "user" WHERE username = $1"#,
                &[&username],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn delete_user_by_username(&self, username: &str) -> E2eResult<u64> {
        let client = connect(&self.url).await?;
        let deleted = client
            .execute(r#"DELETE FROM "user" WHERE username = $1"#, &[&username])
            .await?;
        debug!("Deleted {} user row(s) for '{}'", deleted, username);
        Ok(deleted)
    }

    async fn delete_user_with_friendships(&self, username: &str) -> E2eResult<u64> {
        let mut client = connect(&self.url).await?;
        let tx = client.transaction().await?;

        let links = tx
            .execute(
                r#"DELETE FROM friendship
                   WHERE requester_id IN (SELECT id FROM "user" WHERE username = $1)
                      OR addressee_id IN (SELECT id FROM "user" WHERE username = $1)"#,
                &[&username],
            )
            .await?;
        let users = tx
            .execute(r#"DELETE FROM "user" WHERE username = $1"#, &[&username])
            .await?;
        tx.commit().await?;

        debug!(
            "Deleted {} user row(s) and {} friendship(s) for '{}'",
            users, links, username
        );
        Ok(users + links)
    }

    async fn friendship(
        &self,
        requester_id: &str,
        addressee_id: &str,
        status: Option<FriendshipStatus>,
    ) -> E2eResult<Option<Friendship>> {
        let client = connect(&self.url).await?;
        let row = match status {
            Some(status) => {
                client
                    .query_opt(
                        &format!(
                            "SELECT {FRIENDSHIP_COLUMNS} \
                             WHERE requester_id::text = $1 AND addressee_id::text = $2 \
                             AND status = $3 LIMIT 1"
                        ),
                        &[&requester_id, &addressee_id, &status.as_str()],
                    )
                    .await?
            }
            None => {
                client
                    .query_opt(
                        &format!(
                            "SELECT {FRIENDSHIP_COLUMNS} \
                             WHERE requester_id::text = $1 AND addressee_id::text = $2 LIMIT 1"
                        ),
                        &[&requester_id, &addressee_id],
                    )
                    .await?
            }
        };
        Ok(row.as_ref().map(friendship_from_row))
    }

    async fn friendships_for_user(&self, user_id: &str) -> E2eResult<Vec<Friendship>> {
        let client = connect(&self.url).await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {FRIENDSHIP_COLUMNS} \
                     WHERE requester_id::text = $1 OR addressee_id::text = $1"
                ),
                &[&user_id],
            )
            .await?;
        Ok(rows.iter().map(friendship_from_row).collect())
    }

    async fn friendships_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> E2eResult<Vec<Friendship>> {
        let client = connect(&self.url).await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {FRIENDSHIP_COLUMNS} \
                     WHERE (requester_id::text = $1 AND addressee_id::text = $2) \
                        OR (requester_id::text = $2 AND addressee_id::text = $1)"
                ),
                &[&user_a, &user_b],
            )
            .await?;
        Ok(rows.iter().map(friendship_from_row).collect())
    }

    async fn count_friendships_for_user(&self, user_id: &str) -> E2eResult<i64> {
        let client = connect(&self.url).await?;
        let row = client
            .query_one(
                "SELECT count(*) FROM friendship \
                 WHERE requester_id::text = $1 OR addressee_id::text = $1",
                &[&user_id],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn create_friendship(&self, friendship: &Friendship) -> E2eResult<()> {
        let client = connect(&self.url).await?;
        client
            .execute(
                "INSERT INTO friendship (requester_id, addressee_id, status, created_date) \
                 VALUES ($1::text::uuid, $2::text::uuid, $3, $4)",
                &[
                    &friendship.requester_id,
                    &friendship.addressee_id,
                    &friendship.status.as_str(),
                    &friendship.created_date,
                ],
            )
            .await?;
        Ok(())
    }

    async fn set_friendship_status(
        &self,
        requester_id: &str,
        addressee_id: &str,
        status: FriendshipStatus,
    ) -> E2eResult<u64> {
        let client = connect(&self.url).await?;
        let updated = client
            .execute(
                "UPDATE friendship SET status = $3 \
                 WHERE requester_id::text = $1 AND addressee_id::text = $2",
                &[&requester_id, &addressee_id, &status.as_str()],
            )
            .await?;
        Ok(updated)
    }

    async fn delete_friendships_for_user(&self, user_id: &str) -> E2eResult<u64> {
        let client = connect(&self.url).await?;
        let deleted = client
            .execute(
                "DELETE FROM friendship WHERE requester_id::text = $1 OR addressee_id::text = $1",
                &[&user_id],
            )
            .await?;
        Ok(deleted)
    }

    async fn delete_friendships_between(&self, user_a: &str, user_b: &str) -> E2eResult<u64> {
        let client = connect(&self.url).await?;
        let deleted = client
            .execute(
                "DELETE FROM friendship \
                 WHERE (requester_id::text = $1 AND addressee_id::text = $2) \
                    OR (requester_id::text = $2 AND addressee_id::text = $1)",
                &[&user_a, &user_b],
            )
            .await?;
        Ok(deleted)
    }
}

/// niffler-spend over PostgreSQL
#[derive(Debug, Clone)]
pub struct PgSpendStore {
    url: String,
}

impl PgSpendStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl SpendStore for PgSpendStore {
    async fn categories_for_user(&self, username: &str) -> E2eResult<Vec<Category>> {
        let client = connect(&self.url).await?;
        let rows = client
            .query(
                &format!("SELECT {CATEGORY_COLUMNS} WHERE username = $1 ORDER BY name"),
                &[&username],
            )
            .await?;
        Ok(rows.iter().map(category_from_row).collect())
    }

    async fn categories_by_name(&self, name: &str) -> E2eResult<Vec<Category>> {
        let client = connect(&self.url).await?;
        let rows = client
            .query(&format!("SELECT {CATEGORY_COLUMNS} WHERE name = $1"), &[&name])
            .await?;
        Ok(rows.iter().map(category_from_row).collect())
    }

    async fn delete_category_by_id(&self, id: &str) -> E2eResult<u64> {
        let client = connect(&self.url).await?;
        let deleted = client
            .execute("DELETE FROM category WHERE id::text = $1", &[&id])
            .await?;
        Ok(deleted)
    }

    async fn delete_categories_by_names(&self, names: &[String]) -> E2eResult<u64> {
        if names.is_empty() {
            return Ok(0);
        }
        let client = connect(&self.url).await?;
        let deleted = client
            .execute("DELETE FROM category WHERE name = ANY($1)", &[&names])
            .await?;
        debug!("Deleted {} categor(ies) by name", deleted);
        Ok(deleted)
    }
}
