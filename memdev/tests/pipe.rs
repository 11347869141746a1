mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{ctx, SETTLE};
use memdev::notification_queue::NotificationQueueArc;
use memdev::{
    DevError, Interrupt, OpenFlags, PipeDevice, Readiness, SharedTunables, Tunables,
};

fn pipe(capacity: usize) -> Arc<PipeDevice> {
    let tunables = SharedTunables::new(Tunables {
        pipe_buffer: capacity,
        ..Tunables::default()
    });
    Arc::new(PipeDevice::new("pipe", tunables, NotificationQueueArc::new()))
}

const NB_READ: OpenFlags = OpenFlags::READ.union(OpenFlags::NONBLOCK);
const NB_WRITE: OpenFlags = OpenFlags::WRITE.union(OpenFlags::NONBLOCK);

#[test]
fn test_nonblocking_write_fills_capacity_minus_one() {
    common::init_logging();
    let dev = pipe(16);
    let _reader = dev.open(&ctx(1, NB_READ)).unwrap();
    let mut writer = dev.open(&ctx(1, NB_WRITE)).unwrap();

    let data = [b'x'; 20];
    assert_eq!(writer.write(&data).unwrap(), 15);
    assert_eq!(dev.space_free(), 0);
    assert_eq!(writer.write(&data[15..]).unwrap_err(), DevError::WouldBlock);
}

#[test]
fn test_read_frees_one_slot() {
    let dev = pipe(16);
    let mut reader = dev.open(&ctx(1, NB_READ)).unwrap();
    let mut writer = dev.open(&ctx(1, NB_WRITE)).unwrap();
    writer.write(&[1u8; 15]).unwrap();

    let mut one = [0u8; 1];
    assert_eq!(reader.read(&mut one).unwrap(), 1);
    assert_eq!(dev.space_free(), 1);
    assert_eq!(writer.write(b"ab").unwrap(), 1);
}

#[test]
fn test_cursors_meet_after_equal_traffic() {
    let dev = pipe(16);
    let mut reader = dev.open(&ctx(1, NB_READ)).unwrap();
    let mut writer = dev.open(&ctx(1, NB_WRITE)).unwrap();

    let mut sent = Vec::new();
    let mut received = Vec::new();
    let mut buf = [0u8; 7];
    for round in 0..10u8 {
        let chunk = [round; 11];
        let mut rest = &chunk[..];
        while !rest.is_empty() {
            let n = writer.write(rest).unwrap();
            sent.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
            loop {
                match reader.read(&mut buf) {
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                    Err(DevError::WouldBlock) => break,
                    Err(e) => panic!("unexpected {e}"),
                }
            }
        }
    }

    assert_eq!(sent, received);
    let (rp, wp) = dev.cursors().unwrap();
    assert_eq!(rp, wp);
    assert_eq!(dev.space_free(), 15);
}

#[test]
fn test_nonblocking_read_on_empty() {
    let dev = pipe(8);
    let _writer = dev.open(&ctx(1, NB_WRITE)).unwrap();
    let mut reader = dev.open(&ctx(1, NB_READ)).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(reader.read(&mut buf).unwrap_err(), DevError::WouldBlock);
}

#[test]
fn test_nonblocking_read_without_writers_would_block() {
    let dev = pipe(8);
    let mut reader = dev.open(&ctx(1, NB_READ)).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(reader.read(&mut buf).unwrap_err(), DevError::WouldBlock);

    let mut writer = dev.open(&ctx(1, OpenFlags::WRITE)).unwrap();
    writer.write(b"ab").unwrap();
    writer.close();
    assert_eq!(reader.read(&mut buf).unwrap(), 2);
    // Drained with no writer left: still not end of stream
    assert_eq!(reader.read(&mut buf).unwrap_err(), DevError::WouldBlock);
}

#[test]
fn test_blocking_reader_opened_before_any_writer_waits() {
    let dev = pipe(8);
    let mut reader = dev.open(&ctx(1, OpenFlags::READ)).unwrap();
    assert_eq!(dev.writers(), 0);

    let consumer = thread::spawn(move || {
        let mut buf = [0u8; 4];
        let n = reader.read(&mut buf);
        (n, buf)
    });

    thread::sleep(SETTLE);
    assert!(!consumer.is_finished());
    let mut writer = dev.open(&ctx(1, OpenFlags::WRITE)).unwrap();
    writer.write(b"hi").unwrap();

    let (n, buf) = consumer.join().unwrap();
    assert_eq!(n, Ok(2));
    assert_eq!(&buf[..2], b"hi");
}

#[test]
fn test_blocking_reader_outlives_last_writer() {
    let dev = pipe(8);
    let mut reader = dev.open(&ctx(1, OpenFlags::READ)).unwrap();
    let writer = dev.open(&ctx(1, OpenFlags::WRITE)).unwrap();

    let consumer = thread::spawn(move || {
        let mut buf = [0u8; 4];
        reader.read(&mut buf)
    });

    thread::sleep(SETTLE);
    writer.close();
    thread::sleep(SETTLE);
    // Losing the writer wakes the reader, which goes back to sleep
    assert!(!consumer.is_finished());

    let mut late = dev.open(&ctx(1, OpenFlags::WRITE)).unwrap();
    late.write(b"late").unwrap();
    assert_eq!(consumer.join().unwrap(), Ok(4));
}

#[test]
fn test_blocking_reader_woken_by_writer() {
    let dev = pipe(32);
    let mut reader = dev.open(&ctx(1, OpenFlags::READ)).unwrap();
    let mut writer = dev.open(&ctx(1, OpenFlags::WRITE)).unwrap();

    let consumer = thread::spawn(move || {
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).unwrap();
        buf[..n].to_vec()
    });

    thread::sleep(SETTLE);
    writer.write(b"wake up").unwrap();
    assert_eq!(consumer.join().unwrap(), b"wake up");
}

#[test]
fn test_blocking_writer_woken_by_reader() {
    let dev = pipe(4);
    let mut reader = dev.open(&ctx(1, OpenFlags::READ)).unwrap();
    let mut writer = dev.open(&ctx(1, OpenFlags::WRITE)).unwrap();
    writer.write(b"abc").unwrap();

    let producer = thread::spawn(move || writer.write(b"d").unwrap());

    thread::sleep(SETTLE);
    assert!(!producer.is_finished());
    let mut buf = [0u8; 2];
    assert_eq!(reader.read(&mut buf).unwrap(), 2);
    assert_eq!(producer.join().unwrap(), 1);
}

#[test]
fn test_blocking_streams_everything() {
    let dev = pipe(7);
    let mut reader = dev.open(&ctx(1, OpenFlags::READ)).unwrap();
    let mut writer = dev.open(&ctx(1, OpenFlags::WRITE)).unwrap();
    let payload: Vec<u8> = (0..=255u8).cycle().take(5000).collect();

    let expected = payload.clone();
    let producer = thread::spawn(move || {
        let mut rest = &payload[..];
        while !rest.is_empty() {
            let n = writer.write(rest).unwrap();
            rest = &rest[n..];
        }
    });

    let mut received = Vec::new();
    let mut buf = [0u8; 5];
    while received.len() < expected.len() {
        let n = reader.read(&mut buf).unwrap();
        assert!(n > 0);
        received.extend_from_slice(&buf[..n]);
    }
    producer.join().unwrap();
    assert_eq!(received, expected);
}

#[test]
fn test_interrupted_read_leaves_pipe_usable() {
    let dev = pipe(8);
    let interrupt = Interrupt::new();
    let mut reader = dev
        .open(&ctx(1, OpenFlags::READ).with_interrupt(interrupt.clone()))
        .unwrap();
    let mut writer = dev.open(&ctx(1, NB_WRITE)).unwrap();

    let consumer = thread::spawn(move || {
        let mut buf = [0u8; 4];
        let first = reader.read(&mut buf);
        (first, reader)
    });

    thread::sleep(SETTLE);
    interrupt.raise();
    let (first, mut reader) = consumer.join().unwrap();
    assert_eq!(first, Err(DevError::Interrupted));
    assert_eq!(dev.cursors(), Some((0, 0)));

    interrupt.clear();
    writer.write(b"ok").unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(reader.read(&mut buf).unwrap(), 2);
}

#[test]
fn test_last_close_frees_ring_and_picks_new_size() {
    let tunables = SharedTunables::new(Tunables {
        pipe_buffer: 8,
        ..Tunables::default()
    });
    let dev = Arc::new(PipeDevice::new(
        "pipe",
        tunables.clone(),
        NotificationQueueArc::new(),
    ));

    let mut writer = dev.open(&ctx(1, NB_WRITE)).unwrap();
    writer.write(b"lost").unwrap();
    tunables
        .update(|t| {
            t.pipe_buffer = 32;
            Ok(())
        })
        .unwrap();
    // Still allocated: the size change waits for the next allocation
    let reader = dev.open(&ctx(1, NB_READ)).unwrap();
    assert_eq!(dev.capacity(), Some(8));
    assert_eq!(dev.buffered(), 0);

    drop(reader);
    drop(writer);
    assert!(!dev.is_allocated());
    assert_eq!((dev.readers(), dev.writers()), (0, 0));

    let _reader = dev.open(&ctx(1, NB_READ)).unwrap();
    assert_eq!(dev.capacity(), Some(32));
    assert_eq!(dev.buffered(), 0);
}

#[test]
fn test_every_open_rewinds_cursors() {
    let dev = pipe(8);
    let mut writer = dev.open(&ctx(1, NB_WRITE)).unwrap();
    writer.write(b"abc").unwrap();
    assert_eq!(dev.cursors(), Some((0, 3)));

    let mut reader = dev.open(&ctx(1, NB_READ)).unwrap();
    assert_eq!(dev.cursors(), Some((0, 0)));
    let mut buf = [0u8; 4];
    assert_eq!(reader.read(&mut buf).unwrap_err(), DevError::WouldBlock);

    writer.write(b"de").unwrap();
    assert_eq!(reader.read(&mut buf).unwrap(), 2);
    assert_eq!(&buf[..2], b"de");
}

#[test]
fn test_poll_reports_hangup() {
    let dev = pipe(8);
    let reader = dev.open(&ctx(1, NB_READ)).unwrap();
    assert!(reader.poll().contains(Readiness::HUP));
    let writer = dev.open(&ctx(1, NB_WRITE)).unwrap();
    assert_eq!(reader.poll(), Readiness::WRITABLE);
    drop(writer);
    assert!(reader.poll().contains(Readiness::HUP));
}

#[tokio::test]
async fn test_one_notification_per_write_per_listener() {
    let dev = pipe(64);
    let reader = dev.open(&ctx(1, NB_READ)).unwrap();
    let mut writer = dev.open(&ctx(1, NB_WRITE)).unwrap();

    let mut first = reader.subscribe(16).unwrap();
    let mut second = reader.subscribe(16).unwrap();

    writer.write(b"a").unwrap();
    writer.write(b"bc").unwrap();

    let readable = i64::from(Readiness::READABLE.bits());
    for rx in [&mut first, &mut second] {
        assert_eq!(rx.recv().await.unwrap(), readable);
        assert_eq!(rx.recv().await.unwrap(), readable);
        assert!(rx.try_recv().is_err());
    }

    writer.close();
    assert_eq!(
        first.recv().await.unwrap(),
        i64::from(Readiness::HUP.bits())
    );
}

#[tokio::test]
async fn test_async_listener_reads_nonblocking() {
    let dev = pipe(64);
    let mut reader = dev.open(&ctx(1, NB_READ)).unwrap();
    let mut writer = dev.open(&ctx(1, NB_WRITE)).unwrap();
    let mut events = reader.subscribe(16).unwrap();

    let listener = tokio::spawn(async move {
        let mut received = Vec::new();
        let mut buf = [0u8; 8];
        while let Ok(event) = events.recv().await {
            if event == i64::from(Readiness::HUP.bits()) {
                break;
            }
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(DevError::WouldBlock) => break,
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                    Err(e) => panic!("unexpected {e}"),
                }
            }
        }
        received
    });

    writer.write(b"hello ").unwrap();
    writer.write(b"world").unwrap();
    writer.close();

    let received = tokio::time::timeout(Duration::from_secs(5), listener)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, b"hello world");
}

#[tokio::test]
async fn test_readable_future_resolves_on_write() {
    let dev = pipe(16);
    let reader = dev.open(&ctx(1, NB_READ)).unwrap();
    let mut writer = dev.open(&ctx(1, NB_WRITE)).unwrap();

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let waiter = tokio::spawn(async move {
        ready_tx.send(()).unwrap();
        let ready = reader.readable().await;
        (ready, reader)
    });

    ready_rx.await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    writer.write(b"x").unwrap();

    let (ready, mut reader) = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(ready.contains(Readiness::READABLE));
    let mut buf = [0u8; 4];
    assert_eq!(reader.read(&mut buf).unwrap(), 1);
}

#[tokio::test]
async fn test_writable_future_resolves_on_read() {
    let dev = pipe(4);
    let mut reader = dev.open(&ctx(1, NB_READ)).unwrap();
    let mut writer = dev.open(&ctx(1, NB_WRITE)).unwrap();
    writer.write(b"abc").unwrap();

    let waiter = tokio::spawn(async move { writer.writable().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    let mut buf = [0u8; 1];
    reader.read(&mut buf).unwrap();
    let ready = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(ready.contains(Readiness::WRITABLE));
}

#[tokio::test]
async fn test_readable_resolves_when_writers_leave() {
    let dev = pipe(16);
    let reader = dev.open(&ctx(1, NB_READ)).unwrap();
    let writer = dev.open(&ctx(1, NB_WRITE)).unwrap();

    let waiter = tokio::spawn(async move { reader.readable().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    writer.close();

    let ready = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(ready.contains(Readiness::HUP));
}
