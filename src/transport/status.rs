use std::fmt;

/// Completion status reported by the transport.
///
/// Codes follow the UCS numbering: zero is success, positive values are
/// informational, negative values are errors.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Status = Status(0);
    pub const IN_PROGRESS: Status = Status(1);
    pub const NO_MESSAGE: Status = Status(-1);
    pub const NO_RESOURCE: Status = Status(-2);
    pub const IO_ERROR: Status = Status(-3);
    pub const NO_MEMORY: Status = Status(-4);
    pub const INVALID_PARAM: Status = Status(-5);
    pub const UNREACHABLE: Status = Status(-6);
    pub const INVALID_ADDR: Status = Status(-7);
    pub const MESSAGE_TRUNCATED: Status = Status(-9);
    pub const BUSY: Status = Status(-15);
    pub const CANCELED: Status = Status(-16);
    pub const UNSUPPORTED: Status = Status(-22);
    pub const NOT_CONNECTED: Status = Status(-24);
    pub const CONNECTION_RESET: Status = Status(-25);

    /// Returns `true` for `OK`.
    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` for any error code.
    pub fn is_err(self) -> bool {
        self.0 < 0
    }

    /// Human readable description, in the transport's wording.
    pub fn message(self) -> &'static str {
        match self {
            Status::OK => "Success",
            Status::IN_PROGRESS => "Operation in progress",
            Status::NO_MESSAGE => "No pending message",
            Status::NO_RESOURCE => "No resources are available to initiate the operation",
            Status::IO_ERROR => "Input/output error",
            Status::NO_MEMORY => "Out of memory",
            Status::INVALID_PARAM => "Invalid parameter",
            Status::UNREACHABLE => "Destination is unreachable",
            Status::INVALID_ADDR => "Address not valid",
            Status::MESSAGE_TRUNCATED => "Message truncated",
            Status::UNSUPPORTED => "Unsupported operation",
            Status::BUSY => "Device is busy",
            Status::CANCELED => "Request canceled",
            Status::NOT_CONNECTED => "Endpoint is not connected",
            Status::CONNECTION_RESET => "Connection reset by remote peer",
            _ => "Unknown error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.0)
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({}: {})", self.0, self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::Status;

    #[test]
    fn test_status_classification() {
        assert!(Status::OK.is_ok());
        assert!(!Status::OK.is_err());
        assert!(!Status::IN_PROGRESS.is_err());
        assert!(Status::CANCELED.is_err());
        assert_eq!(Status(-999).message(), "Unknown error");
    }

    #[test]
    fn test_status_display_has_code() {
        assert_eq!(Status::BUSY.to_string(), "Device is busy (-15)");
    }
}
