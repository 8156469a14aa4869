//! Readiness gate between the two roles of a pair.
//!
//! The second role must not connect before the first one is listening. The
//! default gate is a fixed settling delay, which only assumes readiness. A
//! TCP or file probe checks for it instead, retrying with backoff while
//! watching the first role for an early exit.

use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{HarnessError, Result};
use crate::launcher::RoleProcess;

/// Settling delay used when no probe is configured.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(1);

/// How long a probe keeps trying by default.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(1);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// How to decide that the first role is ready for its counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// Sleep for a fixed interval and assume readiness
    Delay(Duration),
    /// Ready once a TCP connection to `addr` succeeds
    Tcp { addr: String, timeout: Duration },
    /// Ready once `path` exists
    File { path: PathBuf, timeout: Duration },
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        ReadinessProbe::Delay(DEFAULT_SETTLE)
    }
}

impl fmt::Display for ReadinessProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessProbe::Delay(delay) => write!(f, "settle {:?}", delay),
            ReadinessProbe::Tcp { addr, .. } => write!(f, "tcp {}", addr),
            ReadinessProbe::File { path, .. } => write!(f, "file {}", path.display()),
        }
    }
}

impl ReadinessProbe {
    fn check(&self) -> bool {
        match self {
            ReadinessProbe::Delay(_) => true,
            ReadinessProbe::Tcp { addr, .. } => tcp_accepting(addr),
            ReadinessProbe::File { path, .. } => path.exists(),
        }
    }
}

fn tcp_accepting(addr: &str) -> bool {
    let Ok(addrs) = addr.to_socket_addrs() else {
        return false;
    };
    addrs
        .into_iter()
        .any(|sock| TcpStream::connect_timeout(&sock, CONNECT_TIMEOUT).is_ok())
}

/// Exponential backoff capped at [`MAX_BACKOFF`].
#[derive(Debug)]
struct Backoff {
    next: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            next: INITIAL_BACKOFF,
        }
    }

    fn step(&mut self) -> Duration {
        let current = self.next;
        self.next = (self.next * 2).min(MAX_BACKOFF);
        current
    }
}

/// Put the probe back in its not-ready state before the first role starts.
///
/// A ready file left by an earlier pair, or an earlier run, would otherwise
/// open the gate at once.
pub fn reset(probe: &ReadinessProbe) -> Result<()> {
    if let ReadinessProbe::File { path, .. } = probe {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale ready file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Block until `first` is ready for the second role to start.
///
/// Probes fail with `NotReady` if `first` exits before the probe passes, or
/// if the probe's timeout runs out.
pub fn await_ready(probe: &ReadinessProbe, first: &mut dyn RoleProcess) -> Result<()> {
    let timeout = match probe {
        ReadinessProbe::Delay(delay) => {
            debug!(role = %first.role(), ?delay, "settling");
            thread::sleep(*delay);
            return Ok(());
        }
        ReadinessProbe::Tcp { timeout, .. } | ReadinessProbe::File { timeout, .. } => *timeout,
    };

    let start = Instant::now();
    let mut backoff = Backoff::new();
    loop {
        if let Some(outcome) = first.try_wait()? {
            return Err(HarnessError::NotReady {
                role: first.role().to_string(),
                reason: format!("exited ({}) before {} passed", outcome, probe),
            });
        }

        if probe.check() {
            info!(role = %first.role(), %probe, elapsed = ?start.elapsed(), "ready");
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(HarnessError::NotReady {
                role: first.role().to_string(),
                reason: format!("{} did not pass within {:?}", probe, timeout),
            });
        }

        thread::sleep(backoff.step().min(timeout - elapsed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::ExitOutcome;
    use std::net::TcpListener;
    use tempfile::TempDir;

    /// A first role that is either still running or already gone.
    struct StubRole {
        outcome: Option<ExitOutcome>,
    }

    impl RoleProcess for StubRole {
        fn id(&self) -> u32 {
            1
        }
        fn role(&self) -> &str {
            "agent"
        }
        fn try_wait(&mut self) -> Result<Option<ExitOutcome>> {
            Ok(self.outcome)
        }
        fn wait(&mut self) -> Result<ExitOutcome> {
            Ok(self.outcome.unwrap_or(ExitOutcome::Exited(0)))
        }
        fn terminate(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.step(), Duration::from_millis(50));
        assert_eq!(backoff.step(), Duration::from_millis(100));
        for _ in 0..10 {
            backoff.step();
        }
        assert_eq!(backoff.step(), MAX_BACKOFF);
    }

    #[test]
    fn test_delay_sleeps_and_passes() {
        let mut role = StubRole { outcome: None };
        let start = Instant::now();
        await_ready(&ReadinessProbe::Delay(Duration::from_millis(30)), &mut role).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_tcp_probe_ready_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut role = StubRole { outcome: None };
        let probe = ReadinessProbe::Tcp {
            addr,
            timeout: Duration::from_secs(5),
        };
        await_ready(&probe, &mut role).unwrap();
    }

    #[test]
    fn test_file_probe_times_out() {
        let temp = TempDir::new().unwrap();
        let mut role = StubRole { outcome: None };
        let probe = ReadinessProbe::File {
            path: temp.path().join("agent.ready"),
            timeout: Duration::from_millis(200),
        };
        let err = await_ready(&probe, &mut role).unwrap_err();
        assert!(matches!(err, HarnessError::NotReady { .. }));
        assert!(err.to_string().contains("did not pass"));
    }

    #[test]
    fn test_file_probe_ready() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.ready");
        std::fs::write(&path, "").unwrap();
        let mut role = StubRole { outcome: None };
        let probe = ReadinessProbe::File {
            path,
            timeout: Duration::from_secs(1),
        };
        await_ready(&probe, &mut role).unwrap();
    }

    #[test]
    fn test_reset_removes_stale_ready_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.ready");
        std::fs::write(&path, "").unwrap();
        let probe = ReadinessProbe::File {
            path: path.clone(),
            timeout: Duration::from_secs(1),
        };

        reset(&probe).unwrap();
        assert!(!path.exists());
        // Nothing left to remove
        reset(&probe).unwrap();
        reset(&ReadinessProbe::default()).unwrap();
    }

    #[test]
    fn test_reset_reports_unremovable_path() {
        let temp = TempDir::new().unwrap();
        let probe = ReadinessProbe::File {
            path: temp.path().to_path_buf(),
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(reset(&probe), Err(HarnessError::Io(_))));
    }

    #[test]
    fn test_probe_fails_when_first_role_exits() {
        let temp = TempDir::new().unwrap();
        let mut role = StubRole {
            outcome: Some(ExitOutcome::Exited(2)),
        };
        let probe = ReadinessProbe::File {
            path: temp.path().join("never"),
            timeout: Duration::from_secs(5),
        };
        let err = await_ready(&probe, &mut role).unwrap_err();
        assert!(err.to_string().contains("exited (exit 2)"));
    }
}
