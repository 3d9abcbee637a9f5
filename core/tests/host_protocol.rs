mod common;

use common::{Capture, FakeClock, MemFlash, MemStorage, IDENTITY_PAGE};
use embassy_futures::block_on;
use energymeter_core::config::{DEVICE_ID_INVALID, TRANSFER_CHUNK};
use energymeter_core::{ErrorStatus, Fault, HostProtocol, IdentityStore};
use hal_abstractions::DateTime;

type Protocol = HostProtocol<MemStorage, MemFlash, FakeClock>;

fn clock() -> FakeClock {
    FakeClock {
        now: Some(DateTime::new(24, 5, 1, 12, 0, 9).unwrap()),
    }
}

fn host(storage: MemStorage, flash: MemFlash) -> Protocol {
    HostProtocol::new(storage, IdentityStore::new(flash, IDENTITY_PAGE), clock())
}

fn run(protocol: &mut Protocol, message: &str) -> Vec<u8> {
    let mut out = Capture::default();
    block_on(protocol.handle(message.as_bytes(), &mut out)).unwrap();
    out.bytes
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

#[test]
fn test_load_info_with_invalid_identity() {
    let flash = MemFlash::erased();
    let errors = ErrorStatus::new();
    assert_eq!(
        IdentityStore::new(flash.clone(), IDENTITY_PAGE).resolve(&errors),
        DEVICE_ID_INVALID
    );
    assert!(errors.is_set(Fault::InvalidIdentity));

    let storage = MemStorage::default().with_file("a.log", &[0; 1000]);
    let mut protocol = host(storage, flash);
    assert_eq!(
        text(&run(&mut protocol, "$LOAD-INFO")),
        "65535 2048 2046 512 24-05-01-12-00-09$OK"
    );
}

#[test]
fn test_set_id_survives_power_cycle() {
    let flash = MemFlash::erased();
    let mut protocol = host(MemStorage::default(), flash.clone());
    assert_eq!(text(&run(&mut protocol, "$SET-ID 01234\r\n")), "$OK");
    drop(protocol);

    let mut rebooted = IdentityStore::new(flash.clone(), IDENTITY_PAGE);
    let errors = ErrorStatus::new();
    assert_eq!(rebooted.resolve(&errors), 1234);
    assert_eq!(rebooted.read_raw().unwrap().id, 1234);
    // Idempotent reads
    assert_eq!(rebooted.read_raw(), rebooted.read_raw());
    assert!(!errors.any());
    assert!(!flash.is_unlocked());

    let mut protocol = host(MemStorage::default(), flash);
    assert!(text(&run(&mut protocol, "$LOAD-INFO")).starts_with("01234 "));
}

#[test]
fn test_set_id_rejects_reserved_and_malformed() {
    let flash = MemFlash::erased();
    let mut protocol = host(MemStorage::default(), flash.clone());
    for message in ["$SET-ID 65535", "$SET-ID 65534", "$SET-ID 123", "$SET-ID abcde"] {
        assert_eq!(text(&run(&mut protocol, message)), "$ERROR", "{}", message);
    }
    assert!(IdentityStore::new(flash, IDENTITY_PAGE).read().is_err());
}

#[test]
fn test_set_id_flash_failure_answers_error() {
    let flash = MemFlash::erased();
    let mut protocol = host(MemStorage::default(), flash.clone());

    flash.set_failing(true);
    assert_eq!(text(&run(&mut protocol, "$SET-ID 01234")), "$ERROR");
    assert!(!flash.is_unlocked());

    // Nothing half-written survives
    flash.set_failing(false);
    assert!(IdentityStore::new(flash.clone(), IDENTITY_PAGE).read().is_err());
    assert_eq!(text(&run(&mut protocol, "$SET-ID 01234")), "$OK");
    assert!(!flash.is_unlocked());
}

#[test]
fn test_set_rtc_updates_clock() {
    let mut protocol = host(MemStorage::default(), MemFlash::erased());
    assert_eq!(text(&run(&mut protocol, "$SET-RTC 25-12-31-23-59-58")), "$OK");
    assert!(text(&run(&mut protocol, "$LOAD-INFO")).ends_with(" 25-12-31-23-59-58$OK"));
    assert_eq!(text(&run(&mut protocol, "$SET-RTC 25-02-29-00-00-00")), "$ERROR");
}

#[test]
fn test_load_one_streams_exact_bytes() {
    let contents = pattern(100);
    let storage = MemStorage::default().with_file("test.log", &contents);
    let mut protocol = host(storage, MemFlash::erased());

    let mut expected = b"$FILE-START 100 ".to_vec();
    expected.extend_from_slice(&contents);
    expected.extend_from_slice(b"$FILE-END");

    assert_eq!(run(&mut protocol, "$LOAD-ONE 7 test.log"), expected);
}

#[test]
fn test_load_one_chunks_at_transfer_size() {
    let contents = pattern(3 * TRANSFER_CHUNK + 5);
    let storage = MemStorage::default().with_file("big.log", &contents);
    let mut protocol = host(storage, MemFlash::erased());

    let mut out = Capture::default();
    block_on(protocol.handle(b"$LOAD-ONE 7 big.log", &mut out)).unwrap();

    let header = b"$FILE-START 197 ".len();
    assert_eq!(&out.bytes[header..header + contents.len()], contents.as_slice());
    assert!(out.writes.iter().all(|&n| n <= TRANSFER_CHUNK.max(header)));
}

#[test]
fn test_load_one_missing_file() {
    let mut protocol = host(MemStorage::default(), MemFlash::erased());
    assert_eq!(text(&run(&mut protocol, "$LOAD-ONE 8 none.log")), "$ERROR");
    assert_eq!(text(&run(&mut protocol, "$LOAD-ONE none.log")), "$ERROR");
}

#[test]
fn test_read_failure_aborts_transfer() {
    let mut storage = MemStorage::default().with_file("test.log", &pattern(200));
    storage.fail_read_at = Some(TRANSFER_CHUNK);
    let mut protocol = host(storage, MemFlash::erased());

    let out = text(&run(&mut protocol, "$LOAD-ONE 8 test.log"));
    assert!(out.starts_with("$FILE-START 200 "));
    assert!(out.ends_with("$ERROR"));
    assert!(!out.contains("$FILE-END"));
}

#[test]
fn test_load_list() {
    let storage = MemStorage::default()
        .with_file("a.log", &[1; 32])
        .with_file("notes.txt", &[2; 8])
        .with_file("B.LOG", &[]);
    let mut protocol = host(storage, MemFlash::erased());
    assert_eq!(
        text(&run(&mut protocol, "$LOAD-LIST")),
        "$FILE-ENTRY 32 a.log$FILE-ENTRY 0 B.LOG$OK"
    );
}

#[test]
fn test_load_list_empty() {
    let mut protocol = host(MemStorage::default(), MemFlash::erased());
    assert_eq!(text(&run(&mut protocol, "$LOAD-LIST")), "$OK");
    assert_eq!(text(&run(&mut protocol, "$LOAD-ALL")), "$OK");
}

#[test]
fn test_load_all() {
    let storage = MemStorage::default()
        .with_file("a.log", b"0123456789abcdef")
        .with_file("skip.bin", b"zz")
        .with_file("b.log", b"XY");
    let mut protocol = host(storage, MemFlash::erased());
    assert_eq!(
        text(&run(&mut protocol, "$LOAD-ALL")),
        "$FILE-ENTRY 16 a.log 0123456789abcdef$FILE-END$FILE-ENTRY 2 b.log XY$FILE-END$OK"
    );
}

#[test]
fn test_load_all_read_failure_aborts() {
    let first = pattern(10);
    let second = pattern(200);
    let mut storage = MemStorage::default()
        .with_file("a.log", &first)
        .with_file("b.log", &second);
    storage.fail_read_at = Some(TRANSFER_CHUNK);
    let mut protocol = host(storage, MemFlash::erased());

    let mut expected = b"$FILE-ENTRY 10 a.log ".to_vec();
    expected.extend_from_slice(&first);
    expected.extend_from_slice(b"$FILE-END$FILE-ENTRY 200 b.log ");
    expected.extend_from_slice(&second[..TRANSFER_CHUNK]);
    expected.extend_from_slice(b"$ERROR");

    assert_eq!(run(&mut protocol, "$LOAD-ALL"), expected);
}

#[test]
fn test_delete_one_missing_leaves_listing_unchanged() {
    let storage = MemStorage::default()
        .with_file("a.log", &[1; 4])
        .with_file("b.log", &[2; 4]);
    let mut protocol = host(storage, MemFlash::erased());

    let before = run(&mut protocol, "$LOAD-LIST");
    assert_eq!(text(&run(&mut protocol, "$DELETE-ONE 5 c.log")), "$ERROR");
    assert_eq!(run(&mut protocol, "$LOAD-LIST"), before);
}

#[test]
fn test_delete_one() {
    let storage = MemStorage::default()
        .with_file("a.log", &[1; 4])
        .with_file("b.log", &[2; 4]);
    let mut protocol = host(storage, MemFlash::erased());

    assert_eq!(text(&run(&mut protocol, "$DELETE-ONE 5 a.log")), "$OK");
    assert_eq!(protocol.storage().names(), vec!["b.log"]);
}

#[test]
fn test_delete_all_keeps_other_files() {
    let storage = MemStorage::default()
        .with_file("a.log", &[1; 4])
        .with_file("keep.cfg", &[0; 2])
        .with_file("b.log", &[2; 4]);
    let mut protocol = host(storage, MemFlash::erased());

    assert_eq!(text(&run(&mut protocol, "$DELETE-ALL")), "$OK");
    assert_eq!(protocol.storage().names(), vec!["keep.cfg"]);
    assert_eq!(text(&run(&mut protocol, "$LOAD-LIST")), "$OK");
}

#[test]
fn test_unknown_and_malformed_commands() {
    let mut protocol = host(MemStorage::default(), MemFlash::erased());
    for message in ["", "LOAD-LIST", "$FORMAT", "$LOAD-LIST now", "$DELETE-ONE a.log"] {
        assert_eq!(text(&run(&mut protocol, message)), "$ERROR", "{:?}", message);
    }
    // The loop keeps serving after errors
    assert_eq!(text(&run(&mut protocol, "$LOAD-LIST")), "$OK");
}

#[test]
fn test_channel_error_propagates() {
    let storage = MemStorage::default().with_file("test.log", &pattern(100));
    let mut protocol = host(storage, MemFlash::erased());

    let mut out = Capture {
        limit: Some(20),
        ..Capture::default()
    };
    assert!(block_on(protocol.handle(b"$LOAD-ONE 8 test.log", &mut out)).is_err());
    assert_eq!(out.bytes.len(), 20);
}
