use serde::Serialize;
use tracing::{debug, info};

use crate::apdu;
use crate::codec::Cursor;
use crate::constants::*;
use crate::error::{CamError, ParseError};
use crate::resources::Ctx;
use crate::text::decode_dvb_text;

/// CAM identification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppInfo {
    pub application_type: u8,
    pub manufacturer: u16,
    pub code: u16,
    pub menu: String,
}

pub fn decode_application_info(payload: &[u8]) -> Result<AppInfo, ParseError> {
    let mut c = Cursor::new(payload);
    Ok(AppInfo {
        application_type: c.u8()?,
        manufacturer:     c.be_u16()?,
        code:             c.be_u16()?,
        menu:             decode_dvb_text(c.length_prefixed()?),
    })
}

pub fn open(ctx: &mut Ctx<'_>) -> Result<(), CamError> {
    debug!(slot = ctx.slot, session = %ctx.session, "opening ApplicationInformation session");
    ctx.send(AOT_APPLICATION_INFO_ENQ, &[])
}

pub fn handle(ctx: &mut Ctx<'_>, apdu: &[u8]) -> Result<(), CamError> {
    match apdu::get_tag(apdu) {
        AOT_APPLICATION_INFO => {
            let app = decode_application_info(apdu::payload(apdu)?)?;
            info!(
                slot = ctx.slot,
                "CAM: {}, {:#04x}, {:#06x}, {:#06x}",
                app.menu, app.application_type, app.manufacturer, app.code
            );
            ctx.slot_state.app_info = Some(app);
            Ok(())
        }
        tag => Err(ParseError::UnexpectedTag(tag).into()),
    }
}

/// Asks the module to open its top-level menu over MMI.
pub fn enter_menu(ctx: &mut Ctx<'_>) -> Result<(), CamError> {
    debug!(slot = ctx.slot, session = %ctx.session, "entering MMI menus");
    ctx.send(AOT_ENTER_MENU, &[])?;
    ctx.slot_state.mmi_expected = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::testing::Harness;
    use hex_literal::hex;

    #[test]
    fn application_info_is_kept_on_the_slot() {
        let mut h = Harness::new();
        let apdu = hex!("9F 80 21 0C 01 02 CA 33 01 06 41 6C 70 68 61 43");
        handle(&mut h.ctx(), &apdu).unwrap();
        let app = h.slot_state.app_info.clone().unwrap();
        assert_eq!(app.application_type, 1);
        assert_eq!(app.manufacturer, 0x02CA);
        assert_eq!(app.code, 0x3301);
        assert_eq!(app.menu, "AlphaC");
    }

    #[test]
    fn truncated_menu_string_is_an_error() {
        let mut h = Harness::new();
        assert!(handle(&mut h.ctx(), &hex!("9F 80 21 07 01 02 CA 33 01 09 41")).is_err());
        assert!(h.slot_state.app_info.is_none());
    }

    #[test]
    fn enter_menu_expects_a_reply() {
        let mut h = Harness::new();
        enter_menu(&mut h.ctx()).unwrap();
        assert_eq!(h.tags(), vec![AOT_ENTER_MENU]);
        assert!(h.slot_state.mmi_expected);
    }
}
