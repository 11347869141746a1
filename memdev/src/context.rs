//! Who is opening a device, and how

use bitflags::bitflags;

use crate::interrupt::Interrupt;

bitflags! {
    /// Open mode of a handle
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READ = 0b001;
        const WRITE = 0b010;
        /// Fail with `WouldBlock` instead of parking
        const NONBLOCK = 0b100;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl OpenFlags {
    #[must_use]
    pub fn is_write_only(self) -> bool {
        self.contains(Self::WRITE) && !self.contains(Self::READ)
    }

    #[must_use]
    pub fn is_nonblocking(self) -> bool {
        self.contains(Self::NONBLOCK)
    }
}

bitflags! {
    /// Privileges relevant to devices
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        /// May change the global tunables
        const SYS_ADMIN = 0b01;
        /// May attach to a same-user device owned by someone else
        const DAC_OVERRIDE = 0b10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Credentials {
    pub uid: u32,
    pub euid: u32,
    pub caps: Capabilities,
}

impl Credentials {
    /// Unprivileged user with `uid == euid`
    #[must_use]
    pub fn user(uid: u32) -> Self {
        Self {
            uid,
            euid: uid,
            caps: Capabilities::empty(),
        }
    }

    /// uid 0 with every capability
    #[must_use]
    pub fn root() -> Self {
        Self {
            uid: 0,
            euid: 0,
            caps: Capabilities::all(),
        }
    }

    #[must_use]
    pub fn with_caps(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    #[must_use]
    pub fn has(&self, cap: Capabilities) -> bool {
        self.caps.contains(cap)
    }
}

/// Key of a per-session cloned device (a controlling terminal number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(pub u32);

/// Everything an access policy may look at when deciding on an open
#[derive(Debug, Clone)]
pub struct OpenContext {
    pub credentials: Credentials,
    pub flags: OpenFlags,
    pub session: Option<SessionKey>,
    pub interrupt: Option<Interrupt>,
}

impl OpenContext {
    #[must_use]
    pub fn new(credentials: Credentials, flags: OpenFlags) -> Self {
        Self {
            credentials,
            flags,
            session: None,
            interrupt: None,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session: SessionKey) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }
}
