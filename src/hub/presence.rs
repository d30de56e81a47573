//! Lobby presence snapshots.

use std::collections::BTreeMap;

use crate::core::{Identity, UserId};
use crate::network::protocol::LobbyUser;

/// One entry per distinct user, ordered by user id. When a user holds several
/// connections the first label seen wins.
pub fn snapshot<'a>(members: impl IntoIterator<Item = &'a Identity>) -> Vec<LobbyUser> {
    let mut users: BTreeMap<UserId, &str> = BTreeMap::new();
    for identity in members {
        users.entry(identity.user_id).or_insert(identity.display_name.as_str());
    }

    users
        .into_iter()
        .map(|(user_id, display_name)| LobbyUser {
            user_id,
            display_name: display_name.to_string(),
        })
        .collect()
}
