//! Group Registry
//!
//! Process-wide ordered collection of groups with the three lookups the
//! dispatcher needs: by id (constant-time compare), by peer address, and
//! by readiness token.

use mio::Token;
use srtla_protocol::{const_time_id_eq, MAX_GROUPS};
use std::net::SocketAddr;
use thiserror::Error;

use crate::group::Group;

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry is full (max {max} groups)")]
    Full { max: usize },
}

/// All live groups, in registration order.
#[derive(Default)]
pub struct Registry {
    groups: Vec<Group>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { groups: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.groups.len() >= MAX_GROUPS
    }

    pub fn group(&self, idx: usize) -> &Group {
        &self.groups[idx]
    }

    pub fn group_mut(&mut self, idx: usize) -> &mut Group {
        &mut self.groups[idx]
    }

    pub fn insert(&mut self, group: Group) -> Result<(), RegistryError> {
        if self.is_full() {
            return Err(RegistryError::Full { max: MAX_GROUPS });
        }
        self.groups.push(group);
        Ok(())
    }

    /// Find the group owning `id`. Each candidate id is compared in
    /// constant time so probing cannot reveal partial matches.
    pub fn index_of_id(&self, id: &[u8]) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| const_time_id_eq(&g.id, id))
    }

    /// Resolve a readiness token back to its group.
    pub fn index_of_token(&self, token: Token) -> Option<usize> {
        self.groups.iter().position(|g| g.token == Some(token))
    }

    /// Find which group an address belongs to.
    ///
    /// A registered connection match wins; failing that, an address that
    /// registered a group (its `last_addr`) still claims the group even
    /// before any connection exists.
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<(usize, Option<usize>)> {
        for (gidx, group) in self.groups.iter().enumerate() {
            if let Some(cidx) = group.conn_idx_by_addr(addr) {
                return Some((gidx, Some(cidx)));
            }
            if group.last_addr == addr {
                return Some((gidx, None));
            }
        }
        None
    }

    /// Remove the group at `idx`, tearing down its downstream socket and
    /// sidecar file.
    pub fn remove_at(&mut self, idx: usize, poll_registry: &mio::Registry) {
        let mut group = self.groups.remove(idx);
        group.shutdown(poll_registry);
    }

    /// Remove a group by id; a miss is a no-op.
    pub fn remove_by_id(&mut self, id: &[u8], poll_registry: &mio::Registry) {
        if let Some(idx) = self.index_of_id(id) {
            self.remove_at(idx, poll_registry);
        }
    }
}
