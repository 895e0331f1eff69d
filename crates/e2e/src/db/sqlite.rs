//! SQLite fixture database
//!
//! Mirrors the userdata and spend tables closely enough to run the waits and
//! scenarios without a Postgres instance.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use niffler_common::{Category, Friendship, FriendshipStatus, User};

use super::{SpendStore, UserdataStore};
use crate::error::E2eResult;

const USER_COLUMNS: &str = "id, username, currency, firstname, surname, full_name FROM user";
const FRIENDSHIP_COLUMNS: &str =
    "requester_id, addressee_id, status, created_date FROM friendship";
const CATEGORY_COLUMNS: &str = "id, name, username, archived FROM category";

/// Both service schemas in one SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> E2eResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;

        info!("Opened fixture database at {:?}", path.as_ref());
        Ok(store)
    }

    /// Open in-memory database
    pub fn open_memory() -> E2eResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> E2eResult<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS user (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                currency TEXT NOT NULL DEFAULT 'RUB',
                firstname TEXT,
                surname TEXT,
                full_name TEXT
            );

            CREATE TABLE IF NOT EXISTS friendship (
                requester_id TEXT NOT NULL REFERENCES user(id),
                addressee_id TEXT NOT NULL REFERENCES user(id),
                status TEXT NOT NULL,
                created_date TEXT NOT NULL,
                PRIMARY KEY (requester_id, addressee_id)
            );
            CREATE INDEX IF NOT EXISTS idx_friendship_addressee ON friendship(addressee_id);

            CREATE TABLE IF NOT EXISTS category (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                username TEXT NOT NULL,
                archived INTEGER NOT NULL DEFAULT 0,
                UNIQUE (username, name)
            );
            "#,
        )?;

        debug!("Fixture schema ready");
        Ok(())
    }

    /// Insert a user row unless one with the same username exists.
    /// Returns whether a row was written.
    pub fn insert_user(&self, user: &User) -> E2eResult<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO user (id, username, currency, firstname, surname, full_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id,
                user.username,
                user.currency,
                user.firstname,
                user.surname,
                user.full_name,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn insert_category(&self, category: &Category) -> E2eResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO category (id, name, username, archived) VALUES (?1, ?2, ?3, ?4)",
            params![
                category.id,
                category.name,
                category.username,
                category.archived
            ],
        )?;
        Ok(())
    }

    fn query_users(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> E2eResult<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let users = stmt
            .query_map(args, user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn query_friendships(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> E2eResult<Vec<Friendship>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, chrono::NaiveDate>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(requester_id, addressee_id, status, created_date)| Friendship {
                requester_id,
                addressee_id,
                status: FriendshipStatus::from(status),
                created_date,
            })
            .collect())
    }

    fn query_categories(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> E2eResult<Vec<Category>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let categories = stmt
            .query_map(args, |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    username: row.get(2)?,
                    archived: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    fn execute(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> E2eResult<u64> {
        let conn = self.conn.lock();
        Ok(conn.execute(sql, args)? as u64)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        currency: row.get(2)?,
        firstname: row.get(3)?,
        surname: row.get(4)?,
        full_name: row.get(5)?,
    })
}

#[async_trait]
impl UserdataStore for SqliteStore {
    async fn user_by_username(&self, username: &str) -> E2eResult<Option<User>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} WHERE username = ?1"),
                params![username],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    async fn user_by_id(&self, id: &str) -> E2eResult<Option<User>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    async fn users(&self) -> E2eResult<Vec<User>> {
        self.query_users(&format!("SELECT {USER_COLUMNS} ORDER BY username"), &[])
    }

    async fn count_users_by_username(&self, username: &str) -> E2eResult<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT count(*) FROM user WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn delete_user_by_username(&self, username: &str) -> E2eResult<u64> {
        self.execute("DELETE FROM user WHERE username = ?1", &[&username])
    }

    async fn delete_user_with_friendships(&self, username: &str) -> E2eResult<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let links = tx.execute(
            "DELETE FROM friendship
             WHERE requester_id IN (SELECT id FROM user WHERE username = ?1)
                OR addressee_id IN (SELECT id FROM user WHERE username = ?1)",
            params![username],
        )?;
        let users = tx.execute("DELETE FROM user WHERE username = ?1", params![username])?;
        tx.commit()?;
        Ok((users + links) as u64)
    }

    async fn friendship(
        &self,
        requester_id: &str,
        addressee_id: &str,
        status: Option<FriendshipStatus>,
    ) -> E2eResult<Option<Friendship>> {
        let status = status.as_ref().map(FriendshipStatus::as_str);
        let mut links = self.query_friendships(
            &format!(
                "SELECT {FRIENDSHIP_COLUMNS}
                 WHERE requester_id = ?1 AND addressee_id = ?2
                   AND (?3 IS NULL OR status = ?3)
                 LIMIT 1"
            ),
            &[&requester_id, &addressee_id, &status],
        )?;
        Ok(links.pop())
    }

    async fn friendships_for_user(&self, user_id: &str) -> E2eResult<Vec<Friendship>> {
        self.query_friendships(
            &format!("SELECT {FRIENDSHIP_COLUMNS} WHERE requester_id = ?1 OR addressee_id = ?1"),
            &[&user_id],
        )
    }

    async fn friendships_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> E2eResult<Vec<Friendship>> {
        self.query_friendships(
            &format!(
                "SELECT {FRIENDSHIP_COLUMNS}
                 WHERE (requester_id = ?1 AND addressee_id = ?2)
                    OR (requester_id = ?2 AND addressee_id = ?1)"
            ),
            &[&user_a, &user_b],
        )
    }

    async fn count_friendships_for_user(&self, user_id: &str) -> E2eResult<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT count(*) FROM friendship WHERE requester_id = ?1 OR addressee_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn create_friendship(&self, friendship: &Friendship) -> E2eResult<()> {
        self.execute(
            "INSERT INTO friendship (requester_id, addressee_id, status, created_date)
             VALUES (?1, ?2, ?3, ?4)",
            &[
                &friendship.requester_id,
                &friendship.addressee_id,
                &friendship.status.as_str(),
                &friendship.created_date,
            ],
        )?;
        Ok(())
    }

    async fn set_friendship_status(
        &self,
        requester_id: &str,
        addressee_id: &str,
        status: FriendshipStatus,
    ) -> E2eResult<u64> {
        self.execute(
            "UPDATE friendship SET status = ?3 WHERE requester_id = ?1 AND addressee_id = ?2",
            &[&requester_id, &addressee_id, &status.as_str()],
        )
    }

    async fn delete_friendships_for_user(&self, user_id: &str) -> E2eResult<u64> {
        self.execute(
            "DELETE FROM friendship WHERE requester_id = ?1 OR addressee_id = ?1",
            &[&user_id],
        )
    }

    async fn delete_friendships_between(&self, user_a: &str, user_b: &str) -> E2eResult<u64> {
        self.execute(
            "DELETE FROM friendship
             WHERE (requester_id = ?1 AND addressee_id = ?2)
                OR (requester_id = ?2 AND addressee_id = ?1)",
            &[&user_a, &user_b],
        )
    }
}

#[async_trait]
impl SpendStore for SqliteStore {
    async fn categories_for_user(&self, username: &str) -> E2eResult<Vec<Category>> {
        self.query_categories(
            &format!("SELECT {CATEGORY_COLUMNS} WHERE username = ?1 ORDER BY name"),
            &[&username],
        )
    }

    async fn categories_by_name(&self, name: &str) -> E2eResult<Vec<Category>> {
        self.query_categories(
            &format!("SELECT {CATEGORY_COLUMNS} WHERE name = ?1"),
            &[&name],
        )
    }

    async fn delete_category_by_id(&self, id: &str) -> E2eResult<u64> {
        self.execute("DELETE FROM category WHERE id = ?1", &[&id])
    }

    async fn delete_categories_by_names(&self, names: &[String]) -> E2eResult<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for name in names {
            deleted += tx.execute("DELETE FROM category WHERE name = ?1", params![name])?;
        }
        tx.commit()?;
        Ok(deleted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn store_with_users() -> SqliteStore {
        let store = SqliteStore::open_memory().unwrap();
        store.insert_user(&User::registered("a", "alice")).unwrap();
        store.insert_user(&User::registered("b", "bob")).unwrap();
        store.insert_user(&User::registered("c", "carol")).unwrap();
        store
    }

    fn link(requester: &str, addressee: &str, status: FriendshipStatus) -> Friendship {
        Friendship {
            requester_id: requester.to_string(),
            addressee_id: addressee.to_string(),
            status,
            created_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_user_is_idempotent_per_username() {
        let store = store_with_users();
        assert!(!store.insert_user(&User::registered("x", "alice")).unwrap());
        assert_eq!(store.count_users_by_username("alice").await.unwrap(), 1);
        assert_eq!(
            store.user_by_username("alice").await.unwrap().unwrap().id,
            "a"
        );
        assert_eq!(store.users().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_friendship_lookup_respects_status() {
        let store = store_with_users();
        store
            .create_friendship(&link("a", "b", FriendshipStatus::Pending))
            .await
            .unwrap();

        assert!(store.friendship("a", "b", None).await.unwrap().is_some());
        assert!(store
            .friendship("a", "b", Some(FriendshipStatus::Accepted))
            .await
            .unwrap()
            .is_none());
        assert!(store.friendship("b", "a", None).await.unwrap().is_none());

        let updated = store
            .set_friendship_status("a", "b", FriendshipStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let found = store
            .friendship("a", "b", Some(FriendshipStatus::Accepted))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.created_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[tokio::test]
    async fn test_friendship_cleanup() {
        let store = store_with_users();
        store
            .create_friendship(&link("a", "b", FriendshipStatus::Pending))
            .await
            .unwrap();
        store
            .create_friendship(&link("c", "a", FriendshipStatus::Accepted))
            .await
            .unwrap();
        store
            .create_friendship(&link("b", "c", FriendshipStatus::Pending))
            .await
            .unwrap();

        assert_eq!(store.count_friendships_for_user("a").await.unwrap(), 2);
        assert_eq!(store.friendships_between("b", "a").await.unwrap().len(), 1);
        assert_eq!(store.delete_friendships_between("b", "a").await.unwrap(), 1);
        assert_eq!(store.friendships_for_user("a").await.unwrap().len(), 1);

        assert_eq!(store.delete_user_with_friendships("alice").await.unwrap(), 2);
        assert!(store.user_by_id("a").await.unwrap().is_none());
        assert_eq!(store.count_friendships_for_user("b").await.unwrap(), 1);
        assert_eq!(store.delete_friendships_for_user("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_category_helpers() {
        let store = SqliteStore::open_memory().unwrap();
        for (id, name) in [("1", "Food"), ("2", "Travel"), ("3", "Books")] {
            store
                .insert_category(&Category {
                    id: id.to_string(),
                    name: name.to_string(),
                    username: "alice".to_string(),
                    archived: false,
                })
                .unwrap();
        }

        let names: Vec<_> = store
            .categories_for_user("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["Books", "Food", "Travel"]);

        assert_eq!(store.categories_by_name("Food").await.unwrap()[0].id, "1");
        assert_eq!(store.delete_category_by_id("1").await.unwrap(), 1);
        let deleted = store
            .delete_categories_by_names(&["Travel".to_string(), "Missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.categories_for_user("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.db");

        SqliteStore::open(&path)
            .unwrap()
            .insert_user(&User::registered("a", "alice"))
            .unwrap();

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.user_by_username("alice").await.unwrap().is_some());
    }
}
