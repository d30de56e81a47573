//! Room membership and broadcast fan-out.
//!
//! Only ever touched from inside a hub's control loop.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::handle::{ConnectionHandle, ConnectionId, DeliveryFailure, OutboundFrame};
use crate::core::Identity;

/// Members of one delivery scope.
#[derive(Debug, Default)]
pub(crate) struct Room {
    members: BTreeMap<ConnectionId, ConnectionHandle>,
}

impl Room {
    pub(crate) fn insert(&mut self, handle: ConnectionHandle) {
        self.members.insert(handle.id(), handle);
    }

    /// Detach a member. The returned handle closes its queue when dropped.
    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.members.remove(&id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn ids(&self) -> Vec<ConnectionId> {
        self.members.keys().copied().collect()
    }

    pub(crate) fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.members.values().map(ConnectionHandle::identity)
    }

    /// Queue `frame` for every member without waiting. Members whose queue is
    /// full or closed are evicted; their ids are returned.
    pub(crate) fn fan_out(&mut self, frame: &OutboundFrame) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();

        for (id, handle) in &self.members {
            match handle.try_deliver(frame.clone()) {
                Ok(()) => {}
                Err(DeliveryFailure::Full) => {
                    warn!(connection = %id, user = %handle.identity().user_id, "Outbound queue full, evicting slow client");
                    evicted.push(*id);
                }
                Err(DeliveryFailure::Closed) => {
                    debug!(connection = %id, "Writer gone, evicting");
                    evicted.push(*id);
                }
            }
        }

        for id in &evicted {
            self.members.remove(id);
        }

        evicted
    }
}
