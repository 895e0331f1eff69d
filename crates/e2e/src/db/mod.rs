//! Service database access and eventual-appearance waits
//!
//! The services under test write their rows asynchronously (a Kafka consumer
//! in niffler-userdata, for instance). [`wait_for_user`] and
//! [`wait_for_friendship`] poll a store until the row shows up, treating
//! lookup errors as transient.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use niffler_common::wait::{wait_until, WaitConfig};
use niffler_common::{Category, Friendship, FriendshipStatus, Ready, User, WaitError};

use crate::error::{E2eError, E2eResult};

pub mod postgres;
pub mod sqlite;

pub use postgres::{PgSpendStore, PgUserdataStore};
pub use sqlite::SqliteStore;

/// Default budget for a row to appear
pub const DEFAULT_DB_TIMEOUT: Duration = Duration::from_secs(25);

/// Default pause between lookups
pub const DEFAULT_DB_INTERVAL: Duration = Duration::from_millis(200);

/// Wait settings used when the caller has none
pub fn default_db_wait() -> WaitConfig {
    WaitConfig::new(DEFAULT_DB_TIMEOUT, DEFAULT_DB_INTERVAL).strict()
}

/// The niffler-userdata schema: `user` and `friendship` tables
#[async_trait]
pub trait UserdataStore: Send + Sync {
    async fn user_by_username(&self, username: &str) -> E2eResult<Option<User>>;

    async fn user_by_id(&self, id: &str) -> E2eResult<Option<User>>;

    async fn users(&self) -> E2eResult<Vec<User>>;

    async fn count_users_by_username(&self, username: &str) -> E2eResult<i64>;

    /// Returns the number of deleted rows
    async fn delete_user_by_username(&self, username: &str) -> E2eResult<u64>;

    /// Delete the user rows and every friendship they take part in
    async fn delete_user_with_friendships(&self, username: &str) -> E2eResult<u64>;

    /// The `requester -> addressee` link, optionally restricted to `status`
    async fn friendship(
        &self,
        requester_id: &str,
        addressee_id: &str,
        status: Option<FriendshipStatus>,
    ) -> E2eResult<Option<Friendship>>;

    /// Links where the user is either side
    async fn friendships_for_user(&self, user_id: &str) -> E2eResult<Vec<Friendship>>;

    /// Links in both directions between two users
    async fn friendships_between(&self, user_a: &str, user_b: &str)
        -> E2eResult<Vec<Friendship>>;

    async fn count_friendships_for_user(&self, user_id: &str) -> E2eResult<i64>;

    async fn create_friendship(&self, friendship: &Friendship) -> E2eResult<()>;

    /// Returns the number of updated rows; 0 if the link does not exist
    async fn set_friendship_status(
        &self,
        requester_id: &str,
        addressee_id: &str,
        status: FriendshipStatus,
    ) -> E2eResult<u64>;

    async fn delete_friendships_for_user(&self, user_id: &str) -> E2eResult<u64>;

    async fn delete_friendships_between(&self, user_a: &str, user_b: &str) -> E2eResult<u64>;
}

/// The niffler-spend schema: `category` table
#[async_trait]
pub trait SpendStore: Send + Sync {
    async fn categories_for_user(&self, username: &str) -> E2eResult<Vec<Category>>;

    async fn categories_by_name(&self, name: &str) -> E2eResult<Vec<Category>>;

    async fn delete_category_by_id(&self, id: &str) -> E2eResult<u64>;

    async fn delete_categories_by_names(&self, names: &[String]) -> E2eResult<u64>;
}

/// Wait until the `user` row for `username` exists
pub async fn wait_for_user<S>(store: &S, username: &str, wait: WaitConfig) -> E2eResult<User>
where
    S: UserdataStore + ?Sized,
{
    let what = format!("user '{username}'");
    wait_for_row(&what, wait, move || store.user_by_username(username)).await
}

/// Wait until the `requester -> addressee` friendship exists (with `status`, if given)
pub async fn wait_for_friendship<S>(
    store: &S,
    requester_id: &str,
    addressee_id: &str,
    status: Option<FriendshipStatus>,
    wait: WaitConfig,
) -> E2eResult<Friendship>
where
    S: UserdataStore + ?Sized,
{
    let what = match &status {
        Some(status) => format!("friendship {requester_id} -> {addressee_id} with status {status}"),
        None => format!("friendship {requester_id} -> {addressee_id}"),
    };
    let status = &status;
    wait_for_row(&what, wait, move || {
        store.friendship(requester_id, addressee_id, status.clone())
    })
    .await
}

/// Poll `lookup` until it yields a row; lookup errors are kept and retried
async fn wait_for_row<T, F, Fut>(what: &str, wait: WaitConfig, lookup: F) -> E2eResult<T>
where
    T: Ready,
    F: Fn() -> Fut,
    Fut: Future<Output = E2eResult<Option<T>>>,
{
    let wait = wait.strict();
    let last_error: Mutex<Option<String>> = Mutex::new(None);
    let last_error_ref = &last_error;
    let lookup_ref = &lookup;

    let outcome = wait_until(what, &wait, move || async move {
        match lookup_ref().await {
            Ok(row) => Ok::<_, E2eError>(row),
            Err(e) => {
                warn!("Lookup of {} failed, retrying: {}", what, e);
                remember(last_error_ref, &e);
                Ok(None)
            }
        }
    })
    .await;

    match outcome {
        Ok(Some(row)) => Ok(row),
        Ok(None) | Err(WaitError::Timeout { .. }) => Err(E2eError::RowNotFound {
            what: what.to_string(),
            timeout: wait.timeout,
            last_error: last_error.into_inner(),
        }),
        Err(WaitError::Probe(e)) => Err(e),
    }
}

fn remember(slot: &Mutex<Option<String>>, err: &impl Display) {
    *slot.lock() = Some(err.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_retried_and_reported() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let wait = WaitConfig::new(Duration::from_millis(500), Duration::from_millis(100));

        let err = wait_for_row::<User, _, _>("user 'ghost'", wait, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(E2eError::Bus("connection refused".to_string()))
        })
        .await
        .unwrap_err();

        assert!(calls.load(Ordering::SeqCst) > 1);
        match err {
            E2eError::RowNotFound { what, last_error, .. } => {
                assert_eq!(what, "user 'ghost'");
                assert_eq!(
                    last_error.as_deref(),
                    Some("Message bus error: connection refused")
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_row_after_transient_error() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let wait = WaitConfig::new(Duration::from_secs(2), Duration::from_millis(200));

        let user = wait_for_row("user 'bob'", wait, move || async move {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(E2eError::Bus("reset".to_string())),
                1 => Ok(None),
                _ => Ok(Some(User::registered("id-1", "bob"))),
            }
        })
        .await
        .unwrap();

        assert_eq!(user.username, "bob");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_default_wait_is_strict() {
        let wait = default_db_wait();
        assert_eq!(wait.timeout, DEFAULT_DB_TIMEOUT);
        assert_eq!(wait.interval, DEFAULT_DB_INTERVAL);
        assert!(wait.fail_on_timeout);
    }
}
