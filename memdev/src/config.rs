//! Process-wide tunables and load-time parameters
//!
//! `quantum` and `qset` are copied into a [`crate::Device`] when it is created
//! or trimmed; `pipe_buffer` is read when a pipe allocates its ring. Changing
//! them never touches storage that already exists.

use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{DevError, Result};

pub const DEFAULT_QUANTUM: usize = 4000;
pub const DEFAULT_QSET: usize = 500;
pub const DEFAULT_PIPE_BUFFER: usize = 4000;
pub const DEFAULT_NR_DEVS: usize = 4;
pub const DEFAULT_PIPE_NR_DEVS: usize = 4;

/// Smallest ring that can hold a byte (one slot is always kept free)
pub const MIN_PIPE_BUFFER: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunables {
    /// Bytes per block
    pub quantum: usize,
    /// Blocks per segment
    pub qset: usize,
    /// Ring capacity for pipes allocated from now on
    pub pipe_buffer: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            qset: DEFAULT_QSET,
            pipe_buffer: DEFAULT_PIPE_BUFFER,
        }
    }
}

impl Tunables {
    /// # Errors
    /// `InvalidArgument` if a size is zero or the segment span overflows.
    pub fn validate(&self) -> Result<()> {
        if self.quantum == 0 || self.qset == 0 {
            return Err(DevError::invalid("quantum and qset must be positive"));
        }
        if self.quantum.checked_mul(self.qset).is_none() {
            return Err(DevError::invalid("quantum * qset overflows"));
        }
        if self.pipe_buffer < MIN_PIPE_BUFFER {
            return Err(DevError::invalid(format!(
                "pipe buffer must be at least {MIN_PIPE_BUFFER} bytes"
            )));
        }
        Ok(())
    }
}

/// Shared handle to the process-wide tunables
///
/// Clones refer to the same values. Readers always get a consistent copy
/// of all three fields.
#[derive(Debug, Clone, Default)]
pub struct SharedTunables(Arc<RwLock<Tunables>>);

impl SharedTunables {
    #[must_use]
    pub fn new(tunables: Tunables) -> Self {
        Self(Arc::new(RwLock::new(tunables)))
    }

    #[must_use]
    pub fn snapshot(&self) -> Tunables {
        *self.0.read()
    }

    /// Apply `f` to a copy and store it only if the result is valid.
    ///
    /// Returns whatever `f` returned.
    ///
    /// # Errors
    /// Propagates `f`'s error and `Tunables::validate` failures; the stored
    /// values are untouched in both cases.
    pub fn update<R>(&self, f: impl FnOnce(&mut Tunables) -> Result<R>) -> Result<R> {
        let mut guard = self.0.write();
        let mut next = *guard;
        let out = f(&mut next)?;
        next.validate()?;
        *guard = next;
        Ok(out)
    }

    /// Restore `quantum` and `qset` to their compiled-in defaults;
    /// `pipe_buffer` keeps its value.
    pub fn reset(&self) {
        let mut guard = self.0.write();
        guard.quantum = DEFAULT_QUANTUM;
        guard.qset = DEFAULT_QSET;
    }
}

/// Load-time parameters
///
/// Every field is optional in the JSON form; missing fields take the
/// compiled-in defaults.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ModuleParams {
    pub quantum: usize,
    pub qset: usize,
    pub nr_devs: usize,
    pub pipe_nr_devs: usize,
    pub pipe_buffer: usize,
    /// Free a cloned device when its last opener leaves
    pub clone_reclaim: bool,
}

impl Default for ModuleParams {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            qset: DEFAULT_QSET,
            nr_devs: DEFAULT_NR_DEVS,
            pipe_nr_devs: DEFAULT_PIPE_NR_DEVS,
            pipe_buffer: DEFAULT_PIPE_BUFFER,
            clone_reclaim: false,
        }
    }
}

impl ModuleParams {
    /// Parse parameters from a JSON string.
    ///
    /// # Errors
    /// `InvalidArgument` for malformed JSON, unknown keys or invalid sizes.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)
            .map_err(|e| DevError::invalid(format!("failed to parse module params: {e}")))?;
        params.tunables().validate()?;
        Ok(params)
    }

    /// Read all of `reader` and parse it as JSON parameters.
    ///
    /// # Errors
    /// `InvalidArgument` if reading fails or the content is not valid params.
    pub fn from_reader(mut reader: impl embedded_io::Read) -> Result<Self> {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match embedded_io::Read::read(&mut reader, &mut chunk) {
                Ok(0) => break,
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    return Err(DevError::invalid(format!(
                        "failed to read module params: {e:?}"
                    )))
                }
            }
        }
        let params: Self = serde_json::from_slice(&buffer)
            .map_err(|e| DevError::invalid(format!("failed to parse module params: {e}")))?;
        params.tunables().validate()?;
        Ok(params)
    }

    #[must_use]
    pub fn tunables(&self) -> Tunables {
        Tunables {
            quantum: self.quantum,
            qset: self.qset,
            pipe_buffer: self.pipe_buffer,
        }
    }
}
