use crate::addr::RemoteAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot access memory of process {pid}: {reason}")]
    NoAccess { pid: u32, reason: String },

    #[error(
        "Needle not found in {regions_scanned} candidate regions. \
         Pass the registry address explicitly to skip the scan"
    )]
    NotFound { regions_scanned: usize },

    #[error("Failed to read {size} bytes at {address}: {reason}")]
    ReadError {
        address: RemoteAddr,
        size: usize,
        reason: String,
    },

    #[error("Inconsistent snapshot: {0}")]
    InconsistentSnapshot(String),

    #[error("Cannot place a shadow mapping of {size} bytes at {address}: {reason}")]
    MapConflict {
        address: RemoteAddr,
        size: usize,
        reason: String,
    },

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn read(address: RemoteAddr, size: usize, reason: impl ToString) -> Self {
        Error::ReadError {
            address,
            size,
            reason: reason.to_string(),
        }
    }

    /// Errors that end the run: nothing can be inspected without them resolved.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NoAccess { .. } | Error::NotFound { .. } | Error::InvalidLayout(_)
        )
    }

    /// Errors scoped to one record, one operation or one cycle.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Error::ReadError { .. } | Error::InconsistentSnapshot(_) | Error::MapConflict { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let fatal = Error::NoAccess {
            pid: 42,
            reason: "denied".to_string(),
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.is_soft());

        let not_found = Error::NotFound { regions_scanned: 3 };
        assert!(not_found.is_fatal());

        let read = Error::read(RemoteAddr::new(0x1000), 8, "short read");
        assert!(read.is_soft());
        assert!(!read.is_fatal());

        let inconsistent = Error::InconsistentSnapshot("overflow".to_string());
        assert!(inconsistent.is_soft());
    }

    #[test]
    fn test_error_messages_carry_addresses() {
        let err = Error::read(RemoteAddr::new(0x7f00_1000), 16, "EIO");
        assert_eq!(
            err.to_string(),
            "Failed to read 16 bytes at 0x7f001000: EIO"
        );
    }
}
