//! Control CLI Demo
//!
//! Runs every control command against a fresh device set, as an unprivileged
//! and as a privileged caller, and prints what each returned.

use memdev::control::MAXNR;
use memdev::{Command, Credentials, Memdev, ModuleParams, Param};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let memdev = Memdev::init(ModuleParams::default())?;
    let control = memdev.control();

    for (who, cred) in [
        ("user", Credentials::user(1000)),
        ("root", Credentials::root()),
    ] {
        println!("== as {who}");
        for nr in 0..=MAXNR {
            let code = (u32::from(memdev::control::MAGIC) << 8) | nr;
            let command = Command::from_code(code)?;
            let mut arg = 64;
            match control.ioctl(code, &mut arg, &cred) {
                Ok(ret) => println!("{nr:>2} {command:?}: ret={ret} arg={arg}"),
                Err(e) => println!("{nr:>2} {command:?}: error {e} (errno {})", e.errno()),
            }
        }
        println!(
            "quantum={} qset={} pipe_buffer={}",
            control.query(Param::Quantum),
            control.query(Param::Qset),
            control.query(Param::PipeBuffer)
        );
        control.reset();
    }
    Ok(())
}
