mod common;

use common::ctx;
use memdev::{Credentials, DevError, Memdev, ModuleParams, OpenFlags, Param, SessionKey};

#[test]
fn test_init_with_defaults() {
    common::init_logging();
    let memdev = Memdev::init(ModuleParams::default()).unwrap();
    assert_eq!(memdev.devices().len(), 4);
    assert_eq!(memdev.pipes().len(), 4);
    assert_eq!(memdev.device(0).unwrap().geometry().quantum, 4000);
    assert_eq!(memdev.device(3).unwrap().name(), "memdev3");
    assert!(memdev.device(4).is_none());
    assert_eq!(memdev.pipe(1).unwrap().name(), "memdevpipe1");
}

#[test]
fn test_init_from_params_json() {
    let params = ModuleParams::from_reader(
        &br#"{"quantum": 10, "qset": 2, "nr_devs": 1, "pipe_nr_devs": 2, "pipe_buffer": 6}"#[..],
    )
    .unwrap();
    let memdev = Memdev::init(params).unwrap();

    assert_eq!(memdev.devices().len(), 1);
    let geometry = memdev.device(0).unwrap().geometry();
    assert_eq!((geometry.quantum, geometry.qset), (10, 2));

    let pipe = memdev.pipe(1).unwrap();
    let _reader = pipe.open(&ctx(1, OpenFlags::READ)).unwrap();
    assert_eq!(pipe.capacity(), Some(6));
}

#[test]
fn test_control_changes_reach_trimmed_devices() {
    let memdev = Memdev::init(ModuleParams::default()).unwrap();
    memdev
        .control()
        .set(Param::Quantum, 100, &Credentials::root())
        .unwrap();

    let device = memdev.device(0).unwrap();
    assert_eq!(device.geometry().quantum, 4000);
    let _writer = device.open(OpenFlags::WRITE);
    assert_eq!(device.geometry().quantum, 100);
    assert_eq!(
        memdev.single().policy().device().geometry().quantum,
        4000
    );
}

#[test]
fn test_cleanup_frees_everything() {
    let mut memdev = Memdev::init(ModuleParams::default()).unwrap();

    memdev
        .device(1)
        .unwrap()
        .open(OpenFlags::READ_WRITE)
        .write_all(b"bare")
        .unwrap();
    memdev
        .user()
        .open(&ctx(5, OpenFlags::READ_WRITE))
        .unwrap()
        .write_all(b"uid")
        .unwrap();
    let tty = ctx(5, OpenFlags::READ_WRITE).with_session(SessionKey(4));
    memdev.private().open(&tty).unwrap().write_all(b"tty").unwrap();
    assert_eq!(memdev.private().policy().len(), 1);

    memdev.cleanup();
    assert_eq!(memdev.device(1).unwrap().size(), 0);
    assert_eq!(memdev.user().policy().device().size(), 0);
    assert!(memdev.private().policy().is_empty());
    memdev.cleanup();
}

#[test]
fn test_init_rejects_invalid_params() {
    let params = ModuleParams {
        qset: 0,
        ..ModuleParams::default()
    };
    assert!(matches!(
        Memdev::init(params),
        Err(DevError::InvalidArgument(_))
    ));
}
