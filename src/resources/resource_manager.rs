use tracing::debug;

use crate::apdu;
use crate::constants::*;
use crate::error::{CamError, ParseError};
use crate::resources::{Ctx, ResourceId};

pub fn open(ctx: &mut Ctx<'_>) -> Result<(), CamError> {
    debug!(slot = ctx.slot, session = %ctx.session, "opening ResourceManager session");
    ctx.send(AOT_PROFILE_ENQ, &[])
}

pub fn handle(ctx: &mut Ctx<'_>, apdu: &[u8]) -> Result<(), CamError> {
    match apdu::get_tag(apdu) {
        AOT_PROFILE_ENQ => {
            let ids: Vec<u8> = ResourceId::SUPPORTED.iter().flat_map(|r| r.to_be_bytes()).collect();
            ctx.send(AOT_PROFILE, &ids)
        }
        // the module's own list is not used
        AOT_PROFILE => ctx.send(AOT_PROFILE_CHANGE, &[]),
        tag => Err(ParseError::UnexpectedTag(tag).into()),
    }
}
