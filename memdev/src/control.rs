//! Control surface over the process-wide tunables
//!
//! Verbs come in the classic ioctl flavours: a value is passed either through
//! the in/out argument (`Set`, `Get`, `Exchange`) or directly as the argument
//! and return value (`Tell`, `Query`, `Shift`). Writing verbs need
//! [`Capabilities::SYS_ADMIN`]; a refused or invalid call changes nothing.
//!
//! New values only affect devices created or trimmed afterwards, and pipes
//! that allocate their ring afterwards.

use crate::config::{SharedTunables, Tunables};
use crate::context::{Capabilities, Credentials};
use crate::error::{DevError, Result};

/// Type byte of every command code
pub const MAGIC: u8 = b'k';

/// Highest command number
pub const MAXNR: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Store the value read from the argument
    Set,
    /// Store the argument itself
    Tell,
    /// Write the current value into the argument
    Get,
    /// Return the current value
    Query,
    /// Store the argument's value, write the old one back into it
    Exchange,
    /// Store the argument itself, return the old value
    Shift,
}

impl Verb {
    #[must_use]
    pub fn is_privileged(self) -> bool {
        matches!(self, Self::Set | Self::Tell | Self::Exchange | Self::Shift)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    Quantum,
    Qset,
    PipeBuffer,
}

impl Param {
    fn get(self, t: &Tunables) -> usize {
        match self {
            Self::Quantum => t.quantum,
            Self::Qset => t.qset,
            Self::PipeBuffer => t.pipe_buffer,
        }
    }

    fn slot(self, t: &mut Tunables) -> &mut usize {
        match self {
            Self::Quantum => &mut t.quantum,
            Self::Qset => &mut t.qset,
            Self::PipeBuffer => &mut t.pipe_buffer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Restore every tunable to its compiled-in default
    Reset,
    Param { verb: Verb, param: Param },
}

const PAIRED_VERBS: [Verb; 6] = [
    Verb::Set,
    Verb::Tell,
    Verb::Get,
    Verb::Query,
    Verb::Exchange,
    Verb::Shift,
];

impl Command {
    /// Decode a numeric command code
    ///
    /// # Errors
    /// `InvalidArgument` for a foreign type byte or an unknown number.
    pub fn from_code(code: u32) -> Result<Self> {
        if code >> 8 != u32::from(MAGIC) {
            return Err(DevError::invalid(format!("command {code:#x}: wrong type")));
        }
        let nr = code & 0xff;
        let cmd = match nr {
            0 => Self::Reset,
            1..=12 => {
                let idx = (nr - 1) as usize;
                let param = if idx % 2 == 0 {
                    Param::Quantum
                } else {
                    Param::Qset
                };
                Self::Param {
                    verb: PAIRED_VERBS[idx / 2],
                    param,
                }
            }
            13 => Self::Param {
                verb: Verb::Tell,
                param: Param::PipeBuffer,
            },
            14 => Self::Param {
                verb: Verb::Query,
                param: Param::PipeBuffer,
            },
            _ => {
                return Err(DevError::invalid(format!(
                    "command number {nr} exceeds {MAXNR}"
                )))
            }
        };
        Ok(cmd)
    }

    /// Numeric code, if the command has one
    ///
    /// Only `Tell` and `Query` of the pipe buffer size are numbered; the
    /// other pipe-buffer verbs are reachable through [`Control::execute`].
    #[must_use]
    pub fn code(self) -> Option<u32> {
        let nr = match self {
            Self::Reset => 0,
            Self::Param {
                verb,
                param: param @ (Param::Quantum | Param::Qset),
            } => {
                let pos = PAIRED_VERBS.iter().position(|v| *v == verb)?;
                let pos = u32::try_from(pos).ok()?;
                1 + pos * 2 + u32::from(param == Param::Qset)
            }
            Self::Param {
                verb: Verb::Tell,
                param: Param::PipeBuffer,
            } => 13,
            Self::Param {
                verb: Verb::Query,
                param: Param::PipeBuffer,
            } => 14,
            Self::Param { .. } => return None,
        };
        Some((u32::from(MAGIC) << 8) | nr)
    }
}

fn to_value(arg: i64) -> Result<usize> {
    usize::try_from(arg)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| DevError::invalid(format!("value {arg} must be positive")))
}

fn to_arg(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Entry point for the control verbs
#[derive(Debug, Clone)]
pub struct Control {
    tunables: SharedTunables,
}

impl Control {
    #[must_use]
    pub fn new(tunables: SharedTunables) -> Self {
        Self { tunables }
    }

    #[must_use]
    pub fn tunables(&self) -> &SharedTunables {
        &self.tunables
    }

    /// Run a numeric command code
    ///
    /// See [`Self::execute`] for the meaning of `arg` and the return value.
    ///
    /// # Errors
    /// `InvalidArgument` for an unknown code, otherwise as for `execute`.
    pub fn ioctl(&self, code: u32, arg: &mut i64, cred: &Credentials) -> Result<i64> {
        let command = Command::from_code(code)?;
        self.execute(command, arg, cred)
    }

    /// Run a decoded command
    ///
    /// `arg` plays the role of both the user pointer and the direct
    /// argument: `Set`, `Tell`, `Exchange` and `Shift` read the new value
    /// from it, `Get` and `Exchange` write the current/old value into it.
    /// `Query` and `Shift` return the current/old value, every other verb
    /// returns 0.
    ///
    /// # Errors
    /// `PermissionDenied` for a writing verb without `SYS_ADMIN`,
    /// `InvalidArgument` for a value the tunables reject.
    pub fn execute(&self, command: Command, arg: &mut i64, cred: &Credentials) -> Result<i64> {
        let (verb, param) = match command {
            Command::Reset => {
                self.tunables.reset();
                tracing::info!("control: quantum and qset reset to defaults");
                return Ok(0);
            }
            Command::Param { verb, param } => (verb, param),
        };

        if verb.is_privileged() && !cred.has(Capabilities::SYS_ADMIN) {
            tracing::warn!(uid = cred.uid, ?verb, ?param, "control: privileged verb refused");
            return Err(DevError::PermissionDenied);
        }

        match verb {
            Verb::Get => {
                *arg = to_arg(param.get(&self.tunables.snapshot()));
                Ok(0)
            }
            Verb::Query => Ok(to_arg(param.get(&self.tunables.snapshot()))),
            Verb::Set | Verb::Tell => {
                let value = to_value(*arg)?;
                self.store(param, value)?;
                Ok(0)
            }
            Verb::Exchange => {
                let value = to_value(*arg)?;
                let old = self.store(param, value)?;
                *arg = to_arg(old);
                Ok(0)
            }
            Verb::Shift => {
                let value = to_value(*arg)?;
                Ok(to_arg(self.store(param, value)?))
            }
        }
    }

    /// Store `value`, returning the previous one
    fn store(&self, param: Param, value: usize) -> Result<usize> {
        let old = self
            .tunables
            .update(|t| Ok(std::mem::replace(param.slot(t), value)))?;
        tracing::debug!(?param, old, new = value, "control: tunable changed");
        Ok(old)
    }

    /// # Errors
    /// As for [`Self::execute`] with [`Verb::Set`].
    pub fn set(&self, param: Param, value: usize, cred: &Credentials) -> Result<()> {
        let mut arg = to_arg(value);
        self.execute(
            Command::Param {
                verb: Verb::Set,
                param,
            },
            &mut arg,
            cred,
        )
        .map(|_| ())
    }

    #[must_use]
    pub fn query(&self, param: Param) -> usize {
        param.get(&self.tunables.snapshot())
    }

    /// Swap in `value` and return the old one
    ///
    /// # Errors
    /// As for [`Self::execute`] with [`Verb::Exchange`].
    pub fn exchange(&self, param: Param, value: usize, cred: &Credentials) -> Result<usize> {
        let mut arg = to_arg(value);
        self.execute(
            Command::Param {
                verb: Verb::Exchange,
                param,
            },
            &mut arg,
            cred,
        )?;
        to_value(arg)
    }

    pub fn reset(&self) {
        self.tunables.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_QSET, DEFAULT_QUANTUM};

    fn code(nr: u32) -> u32 {
        (u32::from(MAGIC) << 8) | nr
    }

    #[test]
    fn test_decode_numbering() {
        assert_eq!(Command::from_code(code(0)).unwrap(), Command::Reset);
        assert_eq!(
            Command::from_code(code(1)).unwrap(),
            Command::Param {
                verb: Verb::Set,
                param: Param::Quantum
            }
        );
        assert_eq!(
            Command::from_code(code(8)).unwrap(),
            Command::Param {
                verb: Verb::Query,
                param: Param::Qset
            }
        );
        assert_eq!(
            Command::from_code(code(12)).unwrap(),
            Command::Param {
                verb: Verb::Shift,
                param: Param::Qset
            }
        );
        assert_eq!(
            Command::from_code(code(13)).unwrap(),
            Command::Param {
                verb: Verb::Tell,
                param: Param::PipeBuffer
            }
        );
    }

    #[test]
    fn test_code_inverts_decode() {
        for nr in 0..=MAXNR {
            let cmd = Command::from_code(code(nr)).unwrap();
            assert_eq!(cmd.code(), Some(code(nr)), "nr {nr}");
        }
        let unnumbered = Command::Param {
            verb: Verb::Shift,
            param: Param::PipeBuffer,
        };
        assert_eq!(unnumbered.code(), None);
    }

    #[test]
    fn test_unknown_codes() {
        assert!(matches!(
            Command::from_code(code(15)),
            Err(DevError::InvalidArgument(_))
        ));
        assert!(matches!(
            Command::from_code((u32::from(b'x') << 8) | 1),
            Err(DevError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_get_and_query() {
        let control = Control::new(SharedTunables::default());
        let user = Credentials::user(1000);
        let mut arg = 0;
        assert_eq!(control.ioctl(code(5), &mut arg, &user).unwrap(), 0);
        assert_eq!(arg, DEFAULT_QUANTUM as i64);
        assert_eq!(
            control.ioctl(code(8), &mut arg, &user).unwrap(),
            DEFAULT_QSET as i64
        );
    }

    #[test]
    fn test_shift_returns_old() {
        let control = Control::new(SharedTunables::default());
        let mut arg = 64;
        let old = control
            .ioctl(code(11), &mut arg, &Credentials::root())
            .unwrap();
        assert_eq!(old, DEFAULT_QUANTUM as i64);
        assert_eq!(control.query(Param::Quantum), 64);
    }

    #[test]
    fn test_zero_rejected_without_mutation() {
        let control = Control::new(SharedTunables::default());
        let mut arg = 0;
        let result = control.ioctl(code(2), &mut arg, &Credentials::root());
        assert!(matches!(result, Err(DevError::InvalidArgument(_))));
        assert_eq!(control.query(Param::Qset), DEFAULT_QSET);

        let mut arg = 1;
        assert!(control.ioctl(code(13), &mut arg, &Credentials::root()).is_err());
    }
}
