//! Pipe CLI Demo
//!
//! Lines from stdin go into a pipe device; an async listener drains the pipe
//! in non-blocking mode every time it is notified.

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use memdev::{
    Credentials, DevError, Memdev, ModuleParams, OpenContext, OpenFlags, PipeFile, Readiness,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let params = ModuleParams {
        pipe_nr_devs: 1,
        pipe_buffer: 16,
        ..ModuleParams::default()
    };
    let memdev = Memdev::init(params)?;
    let pipe = memdev.pipe(0).ok_or("no pipe device")?;

    let me = Credentials::user(1000);
    let reader = pipe.open(&OpenContext::new(
        me,
        OpenFlags::READ | OpenFlags::NONBLOCK,
    ))?;
    let writer = pipe.open(&OpenContext::new(me, OpenFlags::WRITE))?;

    // Subscribe before the first write so no event is missed
    let events = reader.subscribe(64)?;
    let listener_task = tokio::spawn(listen(reader, events));
    let writer_task = tokio::task::spawn_blocking(move || write_lines(writer));

    writer_task.await??;
    listener_task.await??;

    println!("All tasks completed");
    Ok(())
}

/// Blocking writer: a line longer than the ring parks until the listener
/// drains it.
fn write_lines(mut writer: PipeFile) -> Result<(), DevError> {
    println!("Enter text (empty line to quit):");

    for line in std::io::stdin().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        let mut rest = trimmed.as_bytes();
        while !rest.is_empty() {
            let n = writer.write(rest)?;
            rest = &rest[n..];
        }
    }

    writer.close();
    println!("Writer closed");
    Ok(())
}

async fn listen(mut reader: PipeFile, mut events: Receiver<i64>) -> Result<(), DevError> {
    let hangup = i64::from(Readiness::HUP.bits());
    let mut buf = [0u8; 4];

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            // Missed events only mean more data is waiting
            Err(RecvError::Lagged(_)) => i64::from(Readiness::READABLE.bits()),
            Err(RecvError::Closed) => break,
        };
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(DevError::WouldBlock) => break,
                Ok(n) => println!("(listener): {}", String::from_utf8_lossy(&buf[..n])),
                Err(e) => return Err(e),
            }
        }
        if event == hangup {
            println!("(listener) EOF");
            break;
        }
    }
    Ok(())
}
