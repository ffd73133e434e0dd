pub mod accounts;

use std::sync::Arc;

use crate::db::accounts::{AccountRecord, AccountsRepoError};

/// Per-user records and their artifact collections.
///
/// Implementations are blocking; async callers go through `spawn_blocking`. Appends from
/// concurrent requests must not need a lock held by the caller.
pub trait AccountStore: Send + Sync + 'static {
    fn find_account(&self, user_id: &str) -> Result<Option<AccountRecord>, AccountsRepoError>;

    fn append_artifact(&self, user_id: &str, artifact_url: &str) -> Result<(), AccountsRepoError>;
}

pub type SharedAccountStore = Arc<dyn AccountStore>;
