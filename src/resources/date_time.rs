use std::time::{Duration, Instant};

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use tracing::debug;

use crate::apdu;
use crate::constants::*;
use crate::error::{CamError, ParseError};
use crate::resources::Ctx;

/// Days from 0001-01-01 to 1858-11-17, the MJD epoch
const MJD_EPOCH_FROM_CE: i32 = 678_576;

pub fn mjd(date: NaiveDate) -> u16 {
    (date.num_days_from_ce() - MJD_EPOCH_FROM_CE) as u16
}

fn bcd(v: u32) -> u8 {
    (((v / 10) << 4) | (v % 10)) as u8
}

/// `MJD(16) | hh mm ss (BCD) | local offset in minutes (16)`
pub fn encode_date_time(utc: NaiveDateTime, offset_minutes: i16) -> [u8; 7] {
    let [m0, m1] = mjd(utc.date()).to_be_bytes();
    let [o0, o1] = offset_minutes.to_be_bytes();
    [m0, m1, bcd(utc.hour()), bcd(utc.minute()), bcd(utc.second()), o0, o1]
}

#[derive(Debug, Default)]
pub struct DateTime {
    /// Resend period in seconds, 0 = only on request
    interval: u8,
    last: Option<Instant>,
}

impl DateTime {
    pub fn interval(&self) -> u8 {
        self.interval
    }

    pub fn open(&mut self, ctx: &mut Ctx<'_>) -> Result<(), CamError> {
        debug!(slot = ctx.slot, session = %ctx.session, "opening DateTime session");
        self.send(ctx)
    }

    pub fn send(&mut self, ctx: &mut Ctx<'_>) -> Result<(), CamError> {
        let now = Local::now();
        let offset = (now.offset().local_minus_utc() / 60) as i16;
        ctx.send(AOT_DATE_TIME, &encode_date_time(now.naive_utc(), offset))?;
        self.last = Some(Instant::now());
        Ok(())
    }

    pub fn handle(&mut self, ctx: &mut Ctx<'_>, apdu: &[u8]) -> Result<(), CamError> {
        match apdu::get_tag(apdu) {
            AOT_DATE_TIME_ENQ => {
                let (len, data) = apdu::get_length(apdu)?;
                if let Some(i) = data.first().filter(|_| len > 0) {
                    self.interval = *i;
                }
                debug!(slot = ctx.slot, session = %ctx.session, "interval set to {}", self.interval);
                self.send(ctx)
            }
            tag => Err(ParseError::UnexpectedTag(tag).into()),
        }
    }

    pub fn manage(&mut self, ctx: &mut Ctx<'_>, now: Instant) -> Result<(), CamError> {
        if self.interval == 0 {
            return Ok(());
        }
        let period = Duration::from_secs(self.interval as u64);
        if self.last.is_none_or(|t| now.saturating_duration_since(t) > period) {
            self.send(ctx)?;
        }
        Ok(())
    }
}
