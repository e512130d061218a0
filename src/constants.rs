//! Wire constants for the EN 50221 transport, session and application layers

/// Length field: top bit set means "long form, low 7 bits = byte count"
pub const SIZE_INDICATOR: u8 = 0x80;

/// Transport layer
pub const DEFAULT_MAX_TPDU_SIZE: usize = 4096;
pub const TPDU_HEADER_OVERHEAD: usize = 4;
/// Longest session control SPDU (open session response), always sent unsplit
pub const MAX_CONTROL_SPDU: usize = 9;
pub const DATA_INDICATOR: u8 = 0x80; // SB_value bit: module has data to send

pub const T_SB: u8 = 0x80;
pub const T_RCV: u8 = 0x81;
pub const T_CREATE_TC: u8 = 0x82;
pub const T_CTC_REPLY: u8 = 0x83;
pub const T_DELETE_TC: u8 = 0x84;
pub const T_DTC_REPLY: u8 = 0x85;
pub const T_REQUEST_TC: u8 = 0x86;
pub const T_NEW_TC: u8 = 0x87;
pub const T_TC_ERROR: u8 = 0x88;
pub const T_DATA_LAST: u8 = 0xA0;
pub const T_DATA_MORE: u8 = 0xA1;

/// Session layer
pub const ST_SESSION_NUMBER: u8 = 0x90;
pub const ST_OPEN_SESSION_REQUEST: u8 = 0x91;
pub const ST_OPEN_SESSION_RESPONSE: u8 = 0x92;
pub const ST_CREATE_SESSION: u8 = 0x93;
pub const ST_CREATE_SESSION_RESPONSE: u8 = 0x94;
pub const ST_CLOSE_SESSION_REQUEST: u8 = 0x95;
pub const ST_CLOSE_SESSION_RESPONSE: u8 = 0x96;

pub const SS_OK: u8 = 0x00;
pub const SS_NOT_ALLOCATED: u8 = 0xF0;

/// Application layer object tags (24 bit)
pub const AOT_NONE: u32 = 0x000000;
pub const AOT_PROFILE_ENQ: u32 = 0x9F8010;
pub const AOT_PROFILE: u32 = 0x9F8011;
pub const AOT_PROFILE_CHANGE: u32 = 0x9F8012;
pub const AOT_APPLICATION_INFO_ENQ: u32 = 0x9F8020;
pub const AOT_APPLICATION_INFO: u32 = 0x9F8021;
pub const AOT_ENTER_MENU: u32 = 0x9F8022;
pub const AOT_CA_INFO_ENQ: u32 = 0x9F8030;
pub const AOT_CA_INFO: u32 = 0x9F8031;
pub const AOT_CA_PMT: u32 = 0x9F8032;
pub const AOT_CA_PMT_REPLY: u32 = 0x9F8033;
pub const AOT_DATE_TIME_ENQ: u32 = 0x9F8440;
pub const AOT_DATE_TIME: u32 = 0x9F8441;
pub const AOT_CLOSE_MMI: u32 = 0x9F8800;
pub const AOT_DISPLAY_CONTROL: u32 = 0x9F8801;
pub const AOT_DISPLAY_REPLY: u32 = 0x9F8802;
pub const AOT_TEXT_LAST: u32 = 0x9F8803;
pub const AOT_TEXT_MORE: u32 = 0x9F8804;
pub const AOT_ENQ: u32 = 0x9F8807;
pub const AOT_ANSW: u32 = 0x9F8808;
pub const AOT_MENU_LAST: u32 = 0x9F8809;
pub const AOT_MENU_MORE: u32 = 0x9F880A;
pub const AOT_MENU_ANSW: u32 = 0x9F880B;
pub const AOT_LIST_LAST: u32 = 0x9F880C;
pub const AOT_LIST_MORE: u32 = 0x9F880D;

/// Display control commands / replies
pub const DCC_SET_MMI_MODE: u8 = 0x01;
pub const MM_HIGH_LEVEL: u8 = 0x01;
pub const DRI_MMI_MODE_ACK: u8 = 0x01;
pub const DRI_UNKNOWN_DISPLAY_CONTROL_CMD: u8 = 0xF0;
pub const DRI_UNKNOWN_MMI_MODE: u8 = 0xF1;

/// Enquiry flags and answer ids
pub const EF_BLIND: u8 = 0x01;
pub const AI_CANCEL: u8 = 0x00;
pub const AI_ANSWER: u8 = 0x01;

/// CA_PMT list management / command ids
pub const CA_DESCRIPTOR_TAG: u8 = 0x09;

/// Linux CA device: slot types and flags (linux/dvb/ca.h)
pub const CA_CI: u32 = 1;
pub const CA_CI_LINK: u32 = 2;
pub const CA_CI_MODULE_PRESENT: u32 = 1;
pub const CA_CI_MODULE_READY: u32 = 2;

/// Ceiling of a `ca_msg_t` payload on high-level interfaces
pub const HLCI_MSG_SIZE: usize = 256;

/// Raw dumps stop here
pub const MAX_DUMP: usize = 256;
