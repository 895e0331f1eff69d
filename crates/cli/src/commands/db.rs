//! Database Commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use niffler_common::{Category, Friendship, FriendshipStatus, Settings, User};
use niffler_e2e::{wait_for_friendship, wait_for_user, PgSpendStore, PgUserdataStore, SpendStore};

use super::with_timeout;
use crate::output::{print_item, print_list, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum DbCommands {
    /// Wait until a user row appears in the userdata database
    AwaitUser {
        #[arg(short, long)]
        username: String,

        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Wait until a friendship row appears
    AwaitFriendship {
        /// Requester user id
        #[arg(long)]
        requester: String,

        /// Addressee user id
        #[arg(long)]
        addressee: String,

        /// Required status (PENDING, ACCEPTED)
        #[arg(long)]
        status: Option<FriendshipStatus>,

        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List spending categories of a user
    Categories {
        #[arg(short, long)]
        username: String,
    },
}

#[derive(Serialize)]
pub struct UserDisplay(User);

impl TableDisplay for UserDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Username", "Currency", "Full name"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.0.id.clone(),
            self.0.username.clone(),
            self.0.currency.clone(),
            self.0.full_name.clone().unwrap_or_default(),
        ]
    }
}

#[derive(Serialize)]
pub struct FriendshipDisplay(Friendship);

impl TableDisplay for FriendshipDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Requester", "Addressee", "Status", "Created"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.0.requester_id.clone(),
            self.0.addressee_id.clone(),
            self.0.status.to_string(),
            self.0.created_date.to_string(),
        ]
    }
}

#[derive(Serialize)]
pub struct CategoryDisplay(Category);

impl TableDisplay for CategoryDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Archived"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.0.id.clone(),
            self.0.name.clone(),
            self.0.archived.to_string(),
        ]
    }
}

pub async fn execute(cmd: DbCommands, settings: &Settings, format: OutputFormat) -> Result<()> {
    let store = PgUserdataStore::new(&settings.database.userdata_url);

    match cmd {
        DbCommands::AwaitUser { username, timeout } => {
            let wait = with_timeout(settings.waits.db(), timeout);
            let user = wait_for_user(&store, &username, wait).await?;
            print_item(&UserDisplay(user), format);
        }

        DbCommands::AwaitFriendship {
            requester,
            addressee,
            status,
            timeout,
        } => {
            let wait = with_timeout(settings.waits.db(), timeout);
            let friendship =
                wait_for_friendship(&store, &requester, &addressee, status, wait).await?;
            print_item(&FriendshipDisplay(friendship), format);
        }

        DbCommands::Categories { username } => {
            let spend = PgSpendStore::new(&settings.database.spend_url);
            let categories: Vec<CategoryDisplay> = spend
                .categories_for_user(&username)
                .await?
                .into_iter()
                .map(CategoryDisplay)
                .collect();
            print_list(&categories, format);
        }
    }

    Ok(())
}
