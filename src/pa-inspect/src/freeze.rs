//! Process freezing
//!
//! `FreezeGuard` stops the target for as long as it lives. The resume signal
//! is sent from `Drop`, so every exit path (including `?` early returns and
//! panics that unwind) lets the target run again.

use crate::error::{Error, Result};

/// Sends job-control signals to a process
pub trait SignalSender: Send + Sync {
    fn stop(&self, pid: u32) -> Result<()>;
    fn resume(&self, pid: u32) -> Result<()>;
}

/// `kill(2)` with `SIGSTOP` / `SIGCONT`
#[derive(Debug, Default, Clone, Copy)]
pub struct KillSignals;

impl KillSignals {
    fn send(pid: u32, signal: libc::c_int) -> Result<()> {
        // SAFETY: kill has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            return Err(Error::NoAccess {
                pid,
                reason: format!("kill({}): {}", signal, err),
            });
        }
        Ok(())
    }
}

impl SignalSender for KillSignals {
    fn stop(&self, pid: u32) -> Result<()> {
        Self::send(pid, libc::SIGSTOP)
    }

    fn resume(&self, pid: u32) -> Result<()> {
        Self::send(pid, libc::SIGCONT)
    }
}

/// Keeps the target stopped until dropped
pub struct FreezeGuard<'a> {
    pid: u32,
    signals: &'a dyn SignalSender,
}

impl<'a> FreezeGuard<'a> {
    pub fn new(pid: u32, signals: &'a dyn SignalSender) -> Result<Self> {
        signals.stop(pid)?;
        tracing::debug!("Stopped PID {}", pid);
        Ok(FreezeGuard { pid, signals })
    }
}

impl Drop for FreezeGuard<'_> {
    fn drop(&mut self) {
        match self.signals.resume(self.pid) {
            Ok(()) => tracing::debug!("Resumed PID {}", self.pid),
            Err(e) => tracing::warn!("Failed to resume PID {}: {}", self.pid, e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Signal {
        Stop(u32),
        Resume(u32),
    }

    /// Records every signal instead of sending it
    #[derive(Default)]
    pub struct RecordingSignals {
        pub sent: Mutex<Vec<Signal>>,
        pub fail_stop: bool,
    }

    impl RecordingSignals {
        pub fn sent(&self) -> Vec<Signal> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl SignalSender for RecordingSignals {
        fn stop(&self, pid: u32) -> Result<()> {
            if self.fail_stop {
                return Err(Error::NoAccess {
                    pid,
                    reason: "EPERM".to_string(),
                });
            }
            self.sent.lock().unwrap().push(Signal::Stop(pid));
            Ok(())
        }

        fn resume(&self, pid: u32) -> Result<()> {
            self.sent.lock().unwrap().push(Signal::Resume(pid));
            Ok(())
        }
    }

    #[test]
    fn test_guard_stops_then_resumes_once() {
        let signals = RecordingSignals::default();
        {
            let _guard = FreezeGuard::new(42, &signals).unwrap();
            assert_eq!(signals.sent(), vec![Signal::Stop(42)]);
        }
        assert_eq!(signals.sent(), vec![Signal::Stop(42), Signal::Resume(42)]);
    }

    #[test]
    fn test_guard_resumes_on_early_return() {
        fn frozen_work(signals: &RecordingSignals) -> Result<()> {
            let _guard = FreezeGuard::new(7, signals)?;
            Err(Error::InconsistentSnapshot("bail".to_string()))
        }

        let signals = RecordingSignals::default();
        assert!(frozen_work(&signals).is_err());
        assert_eq!(signals.sent(), vec![Signal::Stop(7), Signal::Resume(7)]);
    }

    #[test]
    fn test_failed_stop_sends_nothing_else() {
        let signals = RecordingSignals {
            fail_stop: true,
            ..RecordingSignals::default()
        };
        assert!(FreezeGuard::new(9, &signals).is_err());
        assert!(signals.sent().is_empty());
    }

    #[test]
    fn test_kill_signals_to_missing_process_fails() {
        // Signal 0 checks existence without delivering anything.
        assert!(KillSignals::send(0x7fff_fff0, 0).is_err());
    }
}
