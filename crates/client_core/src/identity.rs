//! Resolves the local username to the backend's numeric identity.

use shared::{domain::UserId, protocol::UserSummary};
use tracing::{info, warn};

use crate::{
    api::{BackendApi, LOOKUP_SENTINEL},
    error::SessionError,
};

/// Exact, case-sensitive scan of a user listing.
pub fn find_identity(users: &[UserSummary], username: &str) -> Option<UserId> {
    users
        .iter()
        .find(|user| user.username == username)
        .map(|user| user.id)
}

pub async fn resolve_identity(
    backend: &dyn BackendApi,
    username: &str,
) -> Result<UserId, SessionError> {
    let users = backend
        .list_all_users(LOOKUP_SENTINEL)
        .await
        .map_err(|err| {
            warn!(username, error = %err, "identity lookup failed");
            SessionError::unreachable(&err)
        })?;

    match find_identity(&users, username) {
        Some(user_id) => {
            info!(username, user_id = user_id.0, "identity resolved");
            Ok(user_id)
        }
        None => {
            warn!(username, candidates = users.len(), "identity not in user listing");
            Err(SessionError::IdentityNotFound {
                username: username.to_string(),
            })
        }
    }
}
