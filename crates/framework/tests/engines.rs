mod common;

use common::TestDaemon;
use csr_framework::error::code;
use csr_framework::protocol::EngineKind;
use csr_framework::transport::SockId;
use csr_framework::{Error, Outcome};
use pretty_assertions::assert_eq;

#[test]
fn engine_info_describes_the_loaded_engine() {
    let daemon = TestDaemon::start();
    let mut admin = daemon.client(SockId::Admin);

    let info = admin.engine_info(EngineKind::ContentScreening).unwrap();
    assert_eq!(info.api_version, csr_abi::CS_API_VERSION);
    assert_eq!(info.vendor, "Mock Security");
    assert_eq!(info.name, "Mock Content Screening");
    assert_eq!(info.last_update, mock_engine::LAST_UPDATE);
    assert!(!info.logo.is_empty());
    assert!(info.activated);
    assert!(info.enabled);

    let info = admin.engine_info(EngineKind::WebProtection).unwrap();
    assert_eq!(info.api_version, csr_abi::WP_API_VERSION);
    assert_eq!(info.name, "Mock Web Protection");
}

#[test]
fn disabled_engine_rejects_scans_until_enabled_again() {
    let daemon = TestDaemon::start();
    let mut admin = daemon.client(SockId::Admin);
    let mut client = daemon.client(SockId::ContentScreening);

    admin
        .engine_set_enabled(EngineKind::ContentScreening, false)
        .unwrap();
    assert!(!admin.engine_info(EngineKind::ContentScreening).unwrap().enabled);

    let task = client.scan_data(b"data".to_vec()).unwrap();
    assert!(matches!(
        client.wait(task).unwrap().outcome,
        Outcome::Failed(Error::EngineDisabled)
    ));

    // web protection is toggled separately
    let mut web = daemon.client(SockId::WebProtection);
    let task = web.check_urls(["https://example.com/"]).unwrap();
    assert!(web.wait(task).unwrap().is_clean());

    admin
        .engine_set_enabled(EngineKind::ContentScreening, true)
        .unwrap();
    let task = client.scan_data(b"data".to_vec()).unwrap();
    assert!(client.wait(task).unwrap().is_clean());
}

#[test]
fn removed_library_is_not_implemented_until_restored() {
    let daemon = TestDaemon::start();
    let mut admin = daemon.client(SockId::Admin);
    let mut client = daemon.client(SockId::ContentScreening);

    std::fs::remove_file(daemon.cs_path()).unwrap();
    // the loaded engine keeps serving until reopened
    let task = client.scan_data(b"data".to_vec()).unwrap();
    assert!(client.wait(task).unwrap().is_clean());

    let err = admin.engine_open(EngineKind::ContentScreening).unwrap_err();
    assert_eq!(err.code(), code::NOT_IMPLEMENTED);
    assert!(!daemon.engines.content().is_open());

    let task = client.scan_data(b"data".to_vec()).unwrap();
    match client.wait(task).unwrap().outcome {
        Outcome::Failed(err) => assert_eq!(err.code(), code::NOT_IMPLEMENTED),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        admin
            .engine_info(EngineKind::ContentScreening)
            .unwrap_err()
            .code(),
        code::NOT_IMPLEMENTED
    );

    std::fs::write(daemon.cs_path(), "").unwrap();
    admin.engine_open(EngineKind::ContentScreening).unwrap();
    let task = client.scan_data(b"MOCK-MALWARE-HIGH".to_vec()).unwrap();
    assert_eq!(client.wait(task).unwrap().detections.len(), 1);
}

#[test]
fn closed_engine_reopens_on_request() {
    let daemon = TestDaemon::start();
    let mut admin = daemon.client(SockId::Admin);

    admin.engine_close(EngineKind::WebProtection).unwrap();
    assert!(!daemon.engines.web().is_open());
    let mut web = daemon.client(SockId::WebProtection);
    let task = web.check_urls(["https://risky.example/"]).unwrap();
    assert!(matches!(
        web.wait(task).unwrap().outcome,
        Outcome::Failed(Error::NotImplemented(_))
    ));

    admin.engine_open(EngineKind::WebProtection).unwrap();
    let task = web.check_urls(["https://risky.example/"]).unwrap();
    assert_eq!(web.wait(task).unwrap().detections.len(), 1);
}

#[test]
fn library_missing_a_symbol_is_not_implemented() {
    let daemon = TestDaemon::with(|config| {
        std::fs::write(
            &config.engines.content_screening.path,
            "missing csre_cs_scan_file",
        )
        .unwrap();
    });
    assert!(!daemon.engines.content().is_open());
    // the other engine is unaffected
    assert!(daemon.engines.web().is_open());

    let mut client = daemon.client(SockId::ContentScreening);
    let task = client.scan_data(b"data".to_vec()).unwrap();
    match client.wait(task).unwrap().outcome {
        Outcome::Failed(err) => assert_eq!(err.code(), code::NOT_IMPLEMENTED),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn incompatible_api_version_is_not_implemented() {
    let daemon = TestDaemon::with(|config| {
        std::fs::write(&config.engines.web_protection.path, "legacy").unwrap();
    });
    assert!(!daemon.engines.web().is_open());

    let mut admin = daemon.client(SockId::Admin);
    let err = admin.engine_open(EngineKind::WebProtection).unwrap_err();
    assert_eq!(err.code(), code::NOT_IMPLEMENTED);
}

#[test]
fn inactive_engine_loads_but_refuses_to_scan() {
    let daemon = TestDaemon::with(|config| {
        std::fs::write(&config.engines.content_screening.path, "inactive").unwrap();
    });
    let mut admin = daemon.client(SockId::Admin);
    let info = admin.engine_info(EngineKind::ContentScreening).unwrap();
    assert!(!info.activated);

    let mut client = daemon.client(SockId::ContentScreening);
    let task = client.scan_data(b"data".to_vec()).unwrap();
    assert!(matches!(
        client.wait(task).unwrap().outcome,
        Outcome::Failed(Error::EngineNotActivated)
    ));
}

#[test]
fn engines_not_loaded_on_start_stay_closed() {
    let daemon = TestDaemon::with(|config| {
        config.engines.content_screening.load_on_start = false;
    });
    assert!(!daemon.engines.content().is_open());

    daemon.engines.reopen();
    assert!(!daemon.engines.content().is_open());
    assert!(daemon.engines.web().is_open());

    let mut admin = daemon.client(SockId::Admin);
    admin.engine_open(EngineKind::ContentScreening).unwrap();
    assert!(daemon.engines.content().is_open());
}

#[test]
fn admin_commands_are_only_served_on_the_admin_socket() {
    let daemon = TestDaemon::start();
    let mut client = daemon.client(SockId::ContentScreening);
    assert!(client.engine_info(EngineKind::ContentScreening).is_err());
    assert!(daemon.engines.content().is_open());
}

#[test]
fn enforced_access_denies_peers_without_the_privilege() {
    if nix::unistd::Uid::effective().is_root() {
        // root holds every privilege
        return;
    }
    let daemon = TestDaemon::with(|config| config.access.enforce = true);
    let mut client = daemon.client(SockId::ContentScreening);
    match client.scan_data(b"data".to_vec()) {
        Err(Error::PermissionDenied | Error::Disconnected) => {}
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn enforced_access_admits_granted_peers() {
    let uid = nix::unistd::Uid::effective().as_raw();
    let daemon = TestDaemon::with(|config| {
        config.access.enforce = true;
        config.access.grants.insert(
            csr_framework::transport::PRIVILEGE_SCAN.to_string(),
            vec![uid],
        );
    });
    let mut client = daemon.client(SockId::ContentScreening);
    let task = client.scan_data(b"data".to_vec()).unwrap();
    assert!(client.wait(task).unwrap().is_clean());
}

#[test]
fn stopping_the_daemon_removes_its_sockets() {
    let daemon = TestDaemon::start();
    let sockets = daemon.sockets.clone();
    daemon.stop().unwrap();
    for sock in [SockId::ContentScreening, SockId::WebProtection, SockId::Admin] {
        assert!(!sockets.path(sock).exists(), "{sock}");
    }
}
