use std::fmt;
use std::ops::BitOr;

/// Readiness a channel is armed for.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    /// Registered but disarmed.
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };

    pub const READABLE: Interest = Interest {
        read: true,
        write: false,
    };

    pub const WRITABLE: Interest = Interest {
        read: false,
        write: true,
    };

    pub const BOTH: Interest = Interest {
        read: true,
        write: true,
    };

    pub fn is_readable(self) -> bool {
        self.read
    }

    pub fn is_writable(self) -> bool {
        self.write
    }

    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }

    /// Interest left after removing `other`.
    pub(crate) fn without(self, other: Interest) -> Interest {
        Interest {
            read: self.read && !other.read,
            write: self.write && !other.write,
        }
    }

    pub(crate) fn epoll_flags(self) -> u32 {
        let mut flags = 0;

        if self.read {
            flags |= libc::EPOLLIN | libc::EPOLLRDHUP;
        }
        if self.write {
            flags |= libc::EPOLLOUT;
        }

        flags as u32
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest {
            read: self.read || rhs.read,
            write: self.write || rhs.write,
        }
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.read, self.write) {
            (false, false) => f.write_str("NONE"),
            (true, false) => f.write_str("READABLE"),
            (false, true) => f.write_str("WRITABLE"),
            (true, true) => f.write_str("READABLE | WRITABLE"),
        }
    }
}
