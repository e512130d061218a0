//! High-level MMI: enquiries, menus and lists driven by the module.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::apdu;
use crate::codec::Cursor;
use crate::constants::*;
use crate::error::{CamError, ParseError};
use crate::resources::Ctx;
use crate::text::decode_dvb_text;
use crate::types::SlotState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MmiMenu {
    pub title: String,
    pub subtitle: String,
    pub bottom: String,
    pub choices: Vec<String>,
}

/// One MMI exchange, in either direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MmiObject {
    #[default]
    None,
    Enquiry { blind: bool, answer_length: u8, text: String },
    Answer { ok: bool, text: String },
    Menu(MmiMenu),
    List(MmiMenu),
    /// 1-based choice, 0 leaves the menu
    MenuAnswer { choice: u8 },
}

impl MmiObject {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Reads one text object, following `TEXT_MORE` segments up to `TEXT_LAST`.
fn read_text(c: &mut Cursor<'_>) -> Result<String, ParseError> {
    let mut raw = Vec::new();
    loop {
        let tag = c.be_u24()?;
        let segment = c.length_prefixed()?;
        match tag {
            AOT_TEXT_MORE => raw.extend_from_slice(segment),
            AOT_TEXT_LAST => {
                raw.extend_from_slice(segment);
                return Ok(decode_dvb_text(&raw));
            }
            other => return Err(ParseError::UnexpectedTag(other)),
        }
    }
}

/// Body of a MENU_LAST / LIST_LAST object.
pub fn decode_menu(body: &[u8]) -> Result<MmiMenu, ParseError> {
    let mut c = Cursor::new(body);
    let choice_nb = c.u8()?;
    let mut menu = MmiMenu::default();
    if !c.is_empty() { menu.title = read_text(&mut c)?; }
    if !c.is_empty() { menu.subtitle = read_text(&mut c)?; }
    if !c.is_empty() { menu.bottom = read_text(&mut c)?; }
    while !c.is_empty() {
        menu.choices.push(read_text(&mut c)?);
    }
    if choice_nb != 0xFF && choice_nb as usize != menu.choices.len() {
        debug!(announced = choice_nb, got = menu.choices.len(), "MMI choice count mismatch");
    }
    Ok(menu)
}

/// Body of an ENQ object.
pub fn decode_enquiry(body: &[u8]) -> Result<MmiObject, ParseError> {
    let mut c = Cursor::new(body);
    let flags = c.u8()?;
    let answer_length = if c.is_empty() { 0 } else { c.u8()? };
    Ok(MmiObject::Enquiry {
        blind: flags & EF_BLIND != 0,
        answer_length,
        text: decode_dvb_text(c.rest()),
    })
}

#[derive(Debug, Default)]
pub struct Mmi {
    object: MmiObject,
    /// MENU_MORE / LIST_MORE bodies waiting for their `*_LAST`
    fragments: Vec<u8>,
}

impl Mmi {
    pub fn object(&self) -> &MmiObject {
        &self.object
    }

    pub fn open(&mut self, ctx: &mut Ctx<'_>) -> Result<(), CamError> {
        debug!(slot = ctx.slot, session = %ctx.session, "opening MMI session");
        Ok(())
    }

    fn display_reply(ctx: &mut Ctx<'_>, reply: &[u8]) -> Result<(), CamError> {
        debug!(slot = ctx.slot, session = %ctx.session, "sending DisplayReply {reply:02x?}");
        ctx.send(AOT_DISPLAY_REPLY, reply)
    }

    /// Stores a freshly received object and flags it for display.
    fn replace(&mut self, ctx: &mut Ctx<'_>, object: MmiObject) {
        self.object = object;
        ctx.slot_state.mmi_expected = false;
        ctx.slot_state.mmi_undisplayed = true;
    }

    pub fn handle(&mut self, ctx: &mut Ctx<'_>, apdu: &[u8]) -> Result<(), CamError> {
        let tag = apdu::get_tag(apdu);
        match tag {
            AOT_DISPLAY_CONTROL => {
                let d = apdu::payload(apdu)?;
                match d {
                    [] => Err(ParseError::Malformed("display control").into()),
                    [DCC_SET_MMI_MODE, MM_HIGH_LEVEL, ..] => {
                        Self::display_reply(ctx, &[DRI_MMI_MODE_ACK, MM_HIGH_LEVEL])
                    }
                    [DCC_SET_MMI_MODE, rest @ ..] => {
                        warn!(slot = ctx.slot, "unsupported MMI mode {:02x?}", rest.first());
                        Self::display_reply(ctx, &[DRI_UNKNOWN_MMI_MODE])
                    }
                    [cmd, ..] => {
                        warn!(slot = ctx.slot, "unsupported display control command {cmd:02x}");
                        Self::display_reply(ctx, &[DRI_UNKNOWN_DISPLAY_CONTROL_CMD])
                    }
                }
            }

            AOT_ENQ => {
                let enq = decode_enquiry(apdu::payload(apdu)?)?;
                if let MmiObject::Enquiry { text, blind, .. } = &enq {
                    info!(slot = ctx.slot, blind, "MMI enquiry: {text}");
                }
                self.replace(ctx, enq);
                Ok(())
            }

            AOT_MENU_MORE | AOT_LIST_MORE => {
                self.fragments.extend_from_slice(apdu::payload(apdu)?);
                debug!(slot = ctx.slot, buffered = self.fragments.len(), "MMI menu fragment");
                Ok(())
            }

            AOT_MENU_LAST | AOT_LIST_LAST => {
                let mut body = std::mem::take(&mut self.fragments);
                body.extend_from_slice(apdu::payload(apdu)?);
                let menu = decode_menu(&body)?;
                info!(slot = ctx.slot, "MMI title: {}", menu.title);
                info!(slot = ctx.slot, "MMI subtitle: {}", menu.subtitle);
                for (i, choice) in menu.choices.iter().enumerate() {
                    info!(slot = ctx.slot, "MMI {}: {choice}", i + 1);
                }
                info!(slot = ctx.slot, "MMI bottom: {}", menu.bottom);
                let object = if tag == AOT_MENU_LAST { MmiObject::Menu(menu) } else { MmiObject::List(menu) };
                self.replace(ctx, object);
                Ok(())
            }

            AOT_CLOSE_MMI => {
                debug!(slot = ctx.slot, session = %ctx.session, "closing MMI session");
                ctx.request_close()
            }

            tag => Err(ParseError::UnexpectedTag(tag).into()),
        }
    }

    /// Sends the host's answer to the current object.
    pub fn send_object(&mut self, ctx: &mut Ctx<'_>, object: &MmiObject) -> Result<(), CamError> {
        match object {
            MmiObject::Answer { ok, text } => {
                let mut data = Vec::with_capacity(text.len() + 1);
                if *ok {
                    data.push(AI_ANSWER);
                    data.extend_from_slice(text.as_bytes());
                } else {
                    data.push(AI_CANCEL);
                }
                ctx.send(AOT_ANSW, &data)?;
            }
            MmiObject::MenuAnswer { choice } => ctx.send(AOT_MENU_ANSW, &[*choice])?,
            _ => return Err(CamError::Unsupported("sending this MMI object")),
        }
        debug!(slot = ctx.slot, session = %ctx.session, "sent MMI object");
        self.object = MmiObject::None;
        ctx.slot_state.mmi_expected = true;
        ctx.slot_state.mmi_undisplayed = false;
        Ok(())
    }

    pub fn close(&mut self, slot_state: &mut SlotState) {
        self.object = MmiObject::None;
        self.fragments.clear();
        slot_state.mmi_expected = false;
        slot_state.mmi_undisplayed = true;
    }
}
