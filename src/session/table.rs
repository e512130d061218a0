use std::fmt;
use std::num::NonZeroU16;

use crate::resources::{Resource, ResourceId};

/// Wire session number. Never 0; entry `id - 1` of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(NonZeroU16);

impl SessionId {
    pub fn new(raw: u16) -> Option<Self> {
        NonZeroU16::new(raw).map(Self)
    }

    pub fn get(self) -> u16 {
        self.0.get()
    }

    fn index(self) -> usize {
        self.0.get() as usize - 1
    }

    fn from_index(index: usize) -> Option<Self> {
        u16::try_from(index + 1).ok().and_then(Self::new)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug)]
pub struct Session {
    pub slot: u8,
    pub resource: Resource,
    /// False while a host-initiated create awaits its response
    pub open: bool,
}

/// Fixed-capacity table of sessions.
#[derive(Debug)]
pub struct SessionTable {
    entries: Vec<Option<Session>>,
}

impl SessionTable {
    pub fn new(capacity: usize) -> Self {
        Self { entries: (0..capacity).map(|_| None).collect() }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lowest free id, `None` when the table is full.
    pub fn next_free(&self) -> Option<SessionId> {
        self.entries
            .iter()
            .position(Option::is_none)
            .and_then(SessionId::from_index)
    }

    pub fn insert(&mut self, id: SessionId, session: Session) {
        if let Some(entry) = self.entries.get_mut(id.index()) {
            *entry = Some(session);
        }
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.entries.get(id.index())?.as_ref()
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.entries.get_mut(id.index())?.as_mut()
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.entries.get_mut(id.index())?.take()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SessionId, &Session)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| Some((SessionId::from_index(i)?, e.as_ref()?)))
    }

    /// First open session bound to `resource` on `slot`.
    pub fn find(&self, slot: u8, resource: ResourceId) -> Option<SessionId> {
        self.iter()
            .find(|(_, s)| s.open && s.slot == slot && s.resource.id() == resource)
            .map(|(id, _)| id)
    }

    pub fn ids_on_slot(&self, slot: u8) -> Vec<SessionId> {
        self.iter().filter(|(_, s)| s.slot == slot).map(|(id, _)| id).collect()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.iter().map(|(id, _)| id).collect()
    }
}
