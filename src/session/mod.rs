//! Session layer: SPDU framing and the session handshakes.

mod table;

pub use table::{Session, SessionId, SessionTable};

use bytes::{BufMut, BytesMut};
use tracing::{debug, error, warn};

use crate::apdu;
use crate::cam::CamState;
use crate::constants::*;
use crate::error::{CamError, ParseError};
use crate::interface::ApduSink;
use crate::resources::{Resource, ResourceId};
use crate::transport::Transport;

/// A decoded SPDU coming from the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Spdu<'a> {
    SessionNumber { session: u16, apdu: &'a [u8] },
    OpenRequest { resource: ResourceId },
    CreateResponse { status: u8, resource: ResourceId, session: u16 },
    CloseRequest { session: u16 },
    CloseResponse { status: u8, session: u16 },
}

impl<'a> Spdu<'a> {
    /// Checks each tag's declared length against its fixed shape.
    pub fn parse(spdu: &'a [u8]) -> Result<Self, ParseError> {
        let sid = |hi: u8, lo: u8| u16::from_be_bytes([hi, lo]);
        match *spdu {
            [ST_SESSION_NUMBER, 2, hi, lo, ref apdu @ ..] if !apdu.is_empty() => {
                Ok(Self::SessionNumber { session: sid(hi, lo), apdu })
            }
            [ST_SESSION_NUMBER, ..] => Err(ParseError::Malformed("session number")),

            [ST_OPEN_SESSION_REQUEST, 4, a, b, c, d] => {
                Ok(Self::OpenRequest { resource: ResourceId::from_be_bytes([a, b, c, d]) })
            }
            [ST_OPEN_SESSION_REQUEST, ..] => Err(ParseError::Malformed("open session request")),

            [ST_CREATE_SESSION_RESPONSE, 7, status, a, b, c, d, hi, lo] => Ok(Self::CreateResponse {
                status,
                resource: ResourceId::from_be_bytes([a, b, c, d]),
                session: sid(hi, lo),
            }),
            [ST_CREATE_SESSION_RESPONSE, ..] => Err(ParseError::Malformed("create session response")),

            [ST_CLOSE_SESSION_REQUEST, 2, hi, lo] => Ok(Self::CloseRequest { session: sid(hi, lo) }),
            [ST_CLOSE_SESSION_REQUEST, ..] => Err(ParseError::Malformed("close session request")),

            [ST_CLOSE_SESSION_RESPONSE, 3, status, hi, lo] => {
                Ok(Self::CloseResponse { status, session: sid(hi, lo) })
            }
            [ST_CLOSE_SESSION_RESPONSE, ..] => Err(ParseError::Malformed("close session response")),

            [tag, ..] => Err(ParseError::UnexpectedTag(tag as u32)),
            [] => Err(ParseError::Truncated { needed: 1, available: 0 }),
        }
    }
}

pub fn open_session_response(status: u8, resource: ResourceId, session: u16) -> [u8; 9] {
    let [r0, r1, r2, r3] = resource.to_be_bytes();
    let [s0, s1] = session.to_be_bytes();
    [ST_OPEN_SESSION_RESPONSE, 7, status, r0, r1, r2, r3, s0, s1]
}

pub fn create_session_request(resource: ResourceId, session: SessionId) -> [u8; 8] {
    let [r0, r1, r2, r3] = resource.to_be_bytes();
    let [s0, s1] = session.get().to_be_bytes();
    [ST_CREATE_SESSION, 6, r0, r1, r2, r3, s0, s1]
}

pub fn close_session_request(session: SessionId) -> [u8; 4] {
    let [s0, s1] = session.get().to_be_bytes();
    [ST_CLOSE_SESSION_REQUEST, 2, s0, s1]
}

pub fn close_session_response(status: u8, session: u16) -> [u8; 5] {
    let [s0, s1] = session.to_be_bytes();
    [ST_CLOSE_SESSION_RESPONSE, 3, status, s0, s1]
}

/// Wraps an APDU in a session-number envelope and sends it as
/// `DATA_MORE`* `DATA_LAST`, each answered by a status block.
pub fn send_spdu(transport: &mut Transport, slot: u8, session: SessionId, apdu: &[u8]) -> Result<(), CamError> {
    let mut spdu = BytesMut::with_capacity(apdu.len() + 4);
    spdu.put_u8(ST_SESSION_NUMBER);
    spdu.put_u8(2);
    spdu.put_u16(session.get());
    spdu.put_slice(apdu);

    let mut chunks = spdu.chunks(transport.max_data()).peekable();
    while let Some(chunk) = chunks.next() {
        let tag = if chunks.peek().is_some() { T_DATA_MORE } else { T_DATA_LAST };
        let reply = transport.exchange(slot, tag, chunk).inspect_err(|e| {
            error!(slot, %session, "couldn't send TPDU ({e})");
        })?;
        if reply.tag != T_SB {
            error!(slot, %session, tag = reply.tag, "expected a status block");
            return Err(CamError::UnexpectedTag { expected: T_SB, got: reply.tag });
        }
    }
    Ok(())
}

/// One control SPDU in a single `DATA_LAST`; the reply is only consumed.
fn send_control(transport: &mut Transport, slot: u8, spdu: &[u8]) -> Result<(), CamError> {
    transport.exchange(slot, T_DATA_LAST, spdu).map(|_| ())
}

impl ApduSink for Transport {
    fn send_apdu(&mut self, slot: u8, session: SessionId, tag: u32, data: &[u8]) -> Result<(), CamError> {
        send_spdu(self, slot, session, &apdu::encode(tag, data))
    }

    fn request_close(&mut self, slot: u8, session: SessionId) -> Result<(), CamError> {
        send_control(self, slot, &close_session_request(session))
    }
}

/// Routes one SPDU received on `slot`. Malformed messages are logged and
/// dropped.
pub fn dispatch(transport: &mut Transport, state: &mut CamState, slot: u8, spdu: &[u8]) {
    let msg = match Spdu::parse(spdu) {
        Ok(msg) => msg,
        Err(e) => {
            error!(slot, "dropping SPDU ({e})");
            return;
        }
    };

    match msg {
        Spdu::SessionNumber { session, apdu } => {
            let live = owned_by(state, slot, session)
                .filter(|id| state.sessions.get(*id).is_some_and(|s| s.open));
            match live {
                Some(id) => state.dispatch_apdu(transport, id, apdu),
                None => error!(slot, session, "data for unknown session"),
            }
        }
        Spdu::OpenRequest { resource } => {
            if let Err(e) = open_session(transport, state, slot, resource) {
                error!(slot, %resource, "session not opened ({e})");
            }
        }
        Spdu::CreateResponse { status, resource, session } => {
            handle_create_response(transport, state, slot, status, resource, session)
        }
        Spdu::CloseRequest { session } => close_session(transport, state, slot, session),
        Spdu::CloseResponse { status, session } => {
            match owned_by(state, slot, session).and_then(|id| state.release_session(id)) {
                Some(s) => debug!(slot, session, status, "{} session closed", s.resource.name()),
                None => warn!(slot, session, "close response for unknown session"),
            }
        }
    }
}

/// `session` if it exists and lives on `slot`.
fn owned_by(state: &CamState, slot: u8, session: u16) -> Option<SessionId> {
    SessionId::new(session).filter(|id| state.sessions.get(*id).is_some_and(|s| s.slot == slot))
}

/// Module-initiated open. Allocates the first free entry, answers, then
/// starts the resource.
pub fn open_session(
    transport: &mut Transport,
    state: &mut CamState,
    slot: u8,
    resource: ResourceId,
) -> Result<SessionId, CamError> {
    let Some(id) = state.sessions.next_free() else {
        error!(slot, %resource, "too many sessions");
        return Err(CamError::SessionTableFull(state.sessions.capacity()));
    };
    if let Some(existing) = state.sessions.find(slot, resource) {
        warn!(slot, %resource, %existing, "resource already has a session");
    }

    let Some(res) = Resource::for_id(resource) else {
        send_control(transport, slot, &open_session_response(SS_NOT_ALLOCATED, resource, id.get()))?;
        return Err(CamError::UnknownResource(resource.0));
    };

    let name = res.name();
    state.sessions.insert(id, Session { slot, resource: res, open: true });
    if let Err(e) = send_control(transport, slot, &open_session_response(SS_OK, resource, id.get())) {
        state.sessions.remove(id);
        return Err(e);
    }
    debug!(slot, session = %id, "opened {name} session");
    state.open_resource(transport, id);
    Ok(id)
}

/// Module asked to close `session`: release it and acknowledge.
pub fn close_session(transport: &mut Transport, state: &mut CamState, slot: u8, session: u16) {
    let status = match owned_by(state, slot, session).and_then(|id| state.release_session(id)) {
        Some(s) => {
            debug!(slot, session, "closing {} session", s.resource.name());
            SS_OK
        }
        None => {
            warn!(slot, session, "close request for unknown session");
            SS_NOT_ALLOCATED
        }
    };
    if let Err(e) = send_control(transport, slot, &close_session_response(status, session)) {
        error!(slot, session, "couldn't acknowledge close ({e})");
    }
}

/// Host-initiated session. It stays closed until the module confirms.
pub fn create_session(
    transport: &mut Transport,
    state: &mut CamState,
    slot: u8,
    resource: ResourceId,
) -> Result<SessionId, CamError> {
    let id = state
        .sessions
        .next_free()
        .ok_or(CamError::SessionTableFull(state.sessions.capacity()))?;
    let res = Resource::for_id(resource).ok_or(CamError::UnknownResource(resource.0))?;

    state.sessions.insert(id, Session { slot, resource: res, open: false });
    if let Err(e) = send_control(transport, slot, &create_session_request(resource, id)) {
        state.sessions.remove(id);
        return Err(e);
    }
    debug!(slot, session = %id, %resource, "create session sent");
    Ok(id)
}

fn handle_create_response(
    transport: &mut Transport,
    state: &mut CamState,
    slot: u8,
    status: u8,
    resource: ResourceId,
    session: u16,
) {
    let Some(id) = SessionId::new(session) else {
        error!(slot, "create response for session 0");
        return;
    };
    let pending = state
        .sessions
        .get(id)
        .is_some_and(|s| !s.open && s.slot == slot && s.resource.id() == resource);
    if !pending {
        error!(slot, session, %resource, "create response for unknown session");
        return;
    }

    if status != SS_OK {
        warn!(slot, session, status, %resource, "module refused session");
        state.sessions.remove(id);
        return;
    }
    if let Some(s) = state.sessions.get_mut(id) {
        s.open = true;
    }
    state.open_resource(transport, id);
}
