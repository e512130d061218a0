mod common;

use common::{clear_pmt, config, scrambled_pmt, MockDevice};
use en50221::apdu;
use en50221::constants::*;
use en50221::report::Reporter;
use en50221::session;
use en50221::transport::Transport;
use en50221::{Cam, CamConfig, CamError, InterfaceKind, MmiObject, ResourceId, SessionId};
use hex_literal::hex;
use std::time::Duration;

const RM: u32 = 0x0001_0041;
const AI: u32 = 0x0002_0041;
const CA: u32 = 0x0003_0041;
const DT: u32 = 0x0024_0041;
const MMI: u32 = 0x0040_0041;

fn open_link(dev: &MockDevice) -> Cam {
    Cam::open(dev.boxed(), config()).unwrap()
}

fn app_info_payload() -> Vec<u8> {
    let mut data = hex!("01 02 CB 00 01 04").to_vec();
    data.extend_from_slice(b"Test");
    data
}

#[test]
fn resource_manager_handshake() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);
    assert_eq!(cam.kind(), InterfaceKind::LinkLayer);

    dev.open_request(0, RM);
    cam.poll();
    assert_eq!(dev.inner().create_tc, 1);
    assert!(cam.state().slots[0].active);
    assert_eq!(
        dev.take_sent(),
        vec![
            (0, hex!("92 07 00 00 01 00 41 00 01").to_vec()),
            (0, hex!("90 02 00 01 9F 80 10 00").to_vec()),
        ]
    );

    dev.push_apdu(0, 1, AOT_PROFILE_ENQ, &[]);
    dev.push_apdu(0, 1, AOT_PROFILE, &hex!("00 01 00 41"));
    cam.poll();
    let apdus = dev.take_apdus();
    assert_eq!(apdus.len(), 2);
    assert_eq!(
        apdus[0].1,
        hex!(
            "9F 80 11 14"
            "00 01 00 41 00 02 00 41 00 03 00 41 00 24 00 41 00 40 00 41"
        )
    );
    assert_eq!(apdus[1], (1, hex!("9F 80 12 00").to_vec()));
    assert_eq!(dev.inner().create_tc, 1);
}

#[test]
fn unknown_resource_is_refused() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);

    dev.open_request(0, ResourceId::HOST_CONTROL.0);
    cam.poll();
    assert_eq!(dev.take_sent(), vec![(0, hex!("92 07 F0 00 20 00 41 00 01").to_vec())]);
    assert!(cam.state().sessions.is_empty());
}

#[test]
fn stored_programs_replay_after_ca_info() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);

    cam.set_capmt(scrambled_pmt(0x0101, 3, &[0x0100, 0x0500]));
    assert_eq!(cam.status().programs.len(), 1);

    dev.open_request(0, CA);
    cam.poll();
    assert_eq!(dev.take_apdus(), vec![(1, hex!("9F 80 30 00").to_vec())]);

    dev.push_apdu(0, 1, AOT_CA_INFO, &hex!("01 00"));
    cam.poll();
    assert_eq!(
        dev.take_apdus(),
        vec![(
            1,
            hex!(
                "9F 80 32 12"
                "03 01 01 07"
                "00 07 01 09 04 01 00 F5 00"
                "02 01 01 00 00"
            )
            .to_vec()
        )]
    );

    // second program is added to the list
    cam.set_capmt(scrambled_pmt(0x0202, 0, &[0x0100]));
    let apdus = dev.take_apdus();
    assert_eq!(apdus.len(), 1);
    assert_eq!(apdu::get_tag(&apdus[0].1), AOT_CA_PMT);
    assert_eq!(apdus[0].1[4], 0x04);

    // same table again: nothing to say
    cam.set_capmt(scrambled_pmt(0x0202, 0, &[0x0100]));
    assert!(dev.take_apdus().is_empty());

    // going clear deselects with the stored descriptors
    cam.set_capmt(clear_pmt(0x0101));
    let apdus = dev.take_apdus();
    assert_eq!(apdus.len(), 1);
    assert_eq!(&apdus[0].1[4..11], &hex!("05 01 01 07 00 07 04"));
    assert_eq!(cam.status().programs.len(), 1);
}

#[test]
fn program_without_supported_system_is_not_sent() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);
    dev.open_request(0, CA);
    dev.push_apdu(0, 1, AOT_CA_INFO, &hex!("01 00"));
    cam.poll();
    dev.take_sent();

    cam.set_capmt(scrambled_pmt(7, 0, &[0x0B00]));
    assert!(dev.take_apdus().is_empty());
    assert_eq!(cam.status().programs.len(), 1);
}

#[test]
fn mmi_menu_round_trip() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);

    assert!(matches!(cam.open_mmi(0), Err(CamError::NoApplicationInfo(0))));

    dev.open_request(0, AI);
    cam.poll();
    assert_eq!(dev.take_apdus(), vec![(1, hex!("9F 80 20 00").to_vec())]);

    dev.push_apdu(0, 1, AOT_APPLICATION_INFO, &app_info_payload());
    cam.poll();
    let status = cam.status();
    let app = status.slots[0].cam.as_ref().unwrap();
    assert_eq!(app.menu, "Test");
    assert_eq!(app.manufacturer, 0x02CB);

    cam.open_mmi(0).unwrap();
    assert_eq!(dev.take_apdus(), vec![(1, hex!("9F 80 22 00").to_vec())]);
    assert!(cam.state().slots[0].mmi_expected);
    assert!(cam.get_mmi_object(0).is_none());

    dev.open_request(0, MMI);
    dev.push_apdu(0, 2, AOT_DISPLAY_CONTROL, &hex!("01 01"));
    dev.push_apdu(
        0,
        2,
        AOT_MENU_LAST,
        &hex!(
            "02"
            "9F 88 03 04 4D 61 69 6E"
            "9F 88 03 00"
            "9F 88 03 00"
            "9F 88 03 01 41"
            "9F 88 03 01 42"
        ),
    );
    cam.poll();
    assert_eq!(dev.take_apdus(), vec![(2, hex!("9F 88 02 02 01 01").to_vec())]);

    assert!(cam.mmi_undisplayed(0));
    match cam.get_mmi_object(0) {
        Some(MmiObject::Menu(menu)) => {
            assert_eq!(menu.title, "Main");
            assert_eq!(menu.choices, vec!["A".to_string(), "B".to_string()]);
        }
        other => panic!("expected a menu, got {other:?}"),
    }
    cam.acknowledge_mmi(0);
    assert!(!cam.mmi_undisplayed(0));
    assert!(matches!(cam.open_mmi(0), Err(CamError::MmiAlreadyOpen(0))));

    cam.send_mmi_object(0, &MmiObject::MenuAnswer { choice: 1 }).unwrap();
    assert_eq!(dev.take_apdus(), vec![(2, hex!("9F 88 0B 01 01").to_vec())]);
    assert!(cam.get_mmi_object(0).is_none());

    // module closes its menu
    dev.push_apdu(0, 2, AOT_CLOSE_MMI, &hex!("00"));
    cam.poll();
    assert_eq!(dev.take_sent(), vec![(0, hex!("95 02 00 02").to_vec())]);
    dev.push_spdu(0, &hex!("96 03 00 00 02"));
    cam.poll();
    assert_eq!(cam.state().sessions.len(), 1);
    assert!(matches!(cam.close_mmi(0), Err(CamError::NoMmiSession(0))));
}

#[test]
fn host_closes_mmi() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);
    dev.open_request(0, MMI);
    cam.poll();
    dev.take_sent();

    cam.close_mmi(0).unwrap();
    assert_eq!(dev.take_sent(), vec![(0, hex!("95 02 00 01").to_vec())]);
    assert!(matches!(cam.close_mmi(3), Err(CamError::InvalidSlot(3))));
}

#[test]
fn module_closes_sessions() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);
    dev.open_request(0, RM);
    cam.poll();
    dev.take_sent();

    dev.push_spdu(0, &hex!("95 02 00 01"));
    dev.push_spdu(0, &hex!("95 02 00 07"));
    cam.poll();
    assert_eq!(
        dev.take_sent(),
        vec![
            (0, hex!("96 03 00 00 01").to_vec()),
            (0, hex!("96 03 F0 00 07").to_vec()),
        ]
    );
    assert!(cam.state().sessions.is_empty());
}

#[test]
fn full_session_table_gets_no_reply() {
    let dev = MockDevice::link_layer(1);
    let cfg = CamConfig { max_sessions: 2, ..config() };
    let mut cam = Cam::open(dev.boxed(), cfg).unwrap();

    dev.open_request(0, RM);
    dev.open_request(0, AI);
    cam.poll();
    assert_eq!(cam.state().sessions.len(), 2);
    dev.take_sent();

    dev.open_request(0, CA);
    cam.poll();
    assert!(dev.take_sent().is_empty());
    assert_eq!(cam.state().sessions.len(), 2);
}

#[test]
fn host_created_session() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);
    assert!(matches!(
        cam.request_session(0, ResourceId::DATE_TIME),
        Err(CamError::InvalidSlot(0))
    ));

    cam.poll();
    let id = cam.request_session(0, ResourceId::DATE_TIME).unwrap();
    assert_eq!(id.get(), 1);
    assert_eq!(dev.take_sent(), vec![(0, hex!("93 06 00 24 00 41 00 01").to_vec())]);
    assert!(!cam.status().sessions[0].open);

    dev.push_spdu(0, &hex!("94 07 00 00 24 00 41 00 01"));
    cam.poll();
    assert!(cam.status().sessions[0].open);
    let apdus = dev.take_apdus();
    assert_eq!(apdus.len(), 1);
    assert_eq!(apdu::get_tag(&apdus[0].1), AOT_DATE_TIME);
    assert_eq!(apdus[0].1[3], 7);
}

#[test]
fn refused_creation_frees_the_entry() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);
    cam.poll();
    cam.request_session(0, ResourceId::MMI).unwrap();
    dev.push_spdu(0, &hex!("94 07 F0 00 40 00 41 00 01"));
    cam.poll();
    assert!(cam.state().sessions.is_empty());
}

#[test]
fn date_time_answers_enquiry() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);
    dev.open_request(0, DT);
    cam.poll();
    assert_eq!(dev.take_apdus().len(), 1);

    dev.push_apdu(0, 1, AOT_DATE_TIME_ENQ, &[0]);
    cam.poll();
    let apdus = dev.take_apdus();
    assert_eq!(apdus.len(), 1);
    assert_eq!(apdu::get_tag(&apdus[0].1), AOT_DATE_TIME);
}

const PROFILE: [u8; 24] = hex!(
    "9F 80 11 14"
    "00 01 00 41 00 02 00 41 00 03 00 41 00 24 00 41 00 40 00 41"
);

#[test]
fn long_spdus_are_split() {
    let dev = MockDevice::link_layer(1);
    let mut cam = Cam::open(dev.boxed(), CamConfig { max_tpdu_size: 16, ..config() }).unwrap();
    dev.open_request(0, RM);
    cam.poll();
    dev.take_sent();
    dev.inner().data_tags.clear();

    dev.push_apdu(0, 1, AOT_PROFILE_ENQ, &[]);
    cam.poll();
    // 28-byte SPDU over 12-byte chunks
    assert_eq!(dev.inner().data_tags, vec![T_DATA_MORE, T_DATA_MORE, T_DATA_LAST]);
    assert_eq!(dev.take_apdus(), vec![(1, PROFILE.to_vec())]);
}

#[test]
fn smallest_tpdu_still_carries_data() {
    let dev = MockDevice::link_layer(1);
    let mut t = Transport::new(dev.boxed(), 1, Duration::from_millis(10), 4, false);
    assert_eq!(t.max_data(), 1);

    let id = SessionId::new(1).unwrap();
    session::send_spdu(&mut t, 0, id, &hex!("9F 80 10 00")).unwrap();
    assert_eq!(dev.inner().data_tags.len(), 8);
    assert_eq!(dev.inner().data_tags.last(), Some(&T_DATA_LAST));
    assert_eq!(dev.take_sent(), vec![(0, hex!("90 02 00 01 9F 80 10 00").to_vec())]);
}

#[test]
fn open_validates_config() {
    let dev = MockDevice::link_layer(1);
    assert!(matches!(
        Cam::open(dev.boxed(), CamConfig { max_tpdu_size: 4, ..config() }),
        Err(CamError::InvalidConfig(_))
    ));
    assert!(matches!(
        Cam::open(dev.boxed(), CamConfig { max_slots: 33, ..config() }),
        Err(CamError::InvalidConfig(_))
    ));
}

#[test]
fn fragmented_module_data_is_skipped() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);
    dev.open_request(0, RM);
    cam.poll();
    dev.take_sent();

    dev.inner().rcv_more = true;
    dev.push_apdu(0, 1, AOT_PROFILE_ENQ, &[]);
    dev.push_apdu(0, 1, AOT_PROFILE_ENQ, &[]);
    cam.poll();
    assert!(dev.take_sent().is_empty());
    assert_eq!(dev.inner().to_host[0].len(), 1);

    dev.inner().rcv_more = false;
    cam.poll();
    assert_eq!(dev.take_apdus(), vec![(1, PROFILE.to_vec())]);
    assert!(cam.state().sessions.get(SessionId::new(1).unwrap()).is_some());
}

#[test]
fn sessions_are_bound_to_their_slot() {
    let dev = MockDevice::link_layer(2);
    let mut cam = open_link(&dev);
    dev.open_request(0, RM);
    cam.poll();
    dev.take_sent();

    dev.push_apdu(1, 1, AOT_PROFILE_ENQ, &[]);
    dev.push_spdu(1, &hex!("95 02 00 01"));
    dev.push_spdu(1, &hex!("96 03 00 00 01"));
    cam.poll();
    assert_eq!(dev.take_sent(), vec![(1, hex!("96 03 F0 00 01").to_vec())]);
    assert_eq!(cam.state().sessions.len(), 1);
    assert!(cam.state().slots[0].active);
}

#[test]
fn pending_session_gets_no_data() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);
    cam.poll();
    cam.request_session(0, ResourceId::DATE_TIME).unwrap();
    dev.take_sent();

    dev.push_apdu(0, 1, AOT_DATE_TIME_ENQ, &[0]);
    cam.poll();
    assert!(dev.take_sent().is_empty());
    assert!(!cam.status().sessions[0].open);
}

#[test]
fn slot_removal_and_reinsertion() {
    let dev = MockDevice::link_layer(2);
    let mut cam = open_link(&dev);
    dev.open_request(0, RM);
    dev.open_request(0, AI);
    dev.push_apdu(0, 2, AOT_APPLICATION_INFO, &app_info_payload());
    dev.open_request(1, RM);
    cam.poll();
    assert_eq!(cam.state().sessions.len(), 3);
    assert!(cam.state().slots[0].app_info.is_some());

    dev.set_ready(0, false);
    cam.poll();
    assert_eq!(cam.state().sessions.len(), 1);
    assert!(!cam.state().slots[0].active);
    assert!(cam.state().slots[0].app_info.is_none());
    assert!(cam.state().slots[1].active);

    dev.set_ready(0, true);
    cam.poll();
    assert!(cam.state().slots[0].active);
    assert_eq!(dev.inner().create_tc, 3);
}

#[test]
fn silent_module_is_reset() {
    let dev = MockDevice::link_layer(1);
    dev.inner().mute = true;
    let mut cam = open_link(&dev);
    cam.poll();
    assert_eq!(dev.inner().create_tc, 4);
    assert_eq!(dev.inner().resets, vec![0]);
    assert!(!cam.state().slots[0].active);
}

#[test]
fn shutdown_closes_everything() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);
    dev.open_request(0, RM);
    dev.open_request(0, CA);
    cam.poll();
    cam.set_capmt(scrambled_pmt(1, 0, &[0x0100]));
    dev.take_sent();

    cam.shutdown();
    assert_eq!(
        dev.take_sent(),
        vec![(0, hex!("95 02 00 01").to_vec()), (0, hex!("95 02 00 02").to_vec())]
    );
    assert!(cam.state().sessions.is_empty());
    assert!(cam.state().programs.is_empty());
    assert!(!cam.state().slots[0].active);
}

#[test]
fn status_report_is_json() {
    let dev = MockDevice::link_layer(1);
    let mut cam = open_link(&dev);
    dev.open_request(0, RM);
    cam.poll();

    let json: serde_json::Value =
        serde_json::from_str(&Reporter::generate_json_report(&cam.status())).unwrap();
    assert_eq!(json["interface"], "link_layer");
    assert_eq!(json["sessions"][0]["resource"], "ResourceManager");
    assert_eq!(json["slots"][0]["active"], true);
}

#[test]
fn open_rejects_bad_devices() {
    let none = MockDevice::with_caps(0, CA_CI_LINK);
    assert!(matches!(Cam::open(none.boxed(), config()), Err(CamError::NoSlots)));

    let odd = MockDevice::with_caps(1, 0x10);
    assert!(matches!(Cam::open(odd.boxed(), config()), Err(CamError::UnsupportedInterface(0x10))));

    let empty = MockDevice::high_level();
    empty.set_ready(0, false);
    assert!(matches!(Cam::open(empty.boxed(), config()), Err(CamError::NoModule)));
}

#[test]
fn high_level_interface() {
    let dev = MockDevice::high_level();
    dev.inner()
        .hl_replies
        .push_back(apdu::encode(AOT_APPLICATION_INFO, &app_info_payload()).to_vec());

    let mut cam = Cam::open(dev.boxed(), config()).unwrap();
    assert_eq!(cam.kind(), InterfaceKind::HighLevel);
    assert_eq!(dev.inner().hl_sent, vec![hex!("9F 80 20 00").to_vec()]);
    assert!(cam.state().slots[0].active);
    assert_eq!(cam.state().slots[0].app_info.as_ref().map(|a| a.menu.as_str()), Some("Test"));
    assert_eq!(cam.status().sessions[0].resource, "ConditionalAccess");

    cam.set_capmt(scrambled_pmt(0x0010, 1, &[0x0B00]));
    let sent = dev.inner().hl_sent.last().cloned().unwrap();
    assert_eq!(apdu::get_tag(&sent), AOT_CA_PMT);
    assert_eq!(sent[4], 0x03);

    cam.poll();
    assert!(matches!(cam.open_mmi(0), Err(CamError::NoApplicationInfo(0))));
    assert!(matches!(
        cam.request_session(0, ResourceId::MMI),
        Err(CamError::Unsupported(_))
    ));

    cam.shutdown();
    assert!(cam.state().sessions.is_empty());
    assert!(cam.state().programs.is_empty());
}

#[test]
fn high_level_without_application_info() {
    let dev = MockDevice::high_level();
    let cam = Cam::open(dev.boxed(), config()).unwrap();
    assert!(cam.state().slots[0].app_info.is_none());
    assert_eq!(cam.state().sessions.len(), 1);
}
