//! Bounded retry for cross-process lock contention on the backing file.
//!
//! Another process holding an exclusive lock (or a Windows-style sharing
//! handle) on the database file surfaces as a transient I/O failure. The
//! storage layer funnels every raw file operation through [`run`], which
//! retries only that class of error on a fixed schedule and propagates
//! everything else immediately.

use std::io;
use std::thread;
use std::time::Duration;

use log::warn;

use crate::{Error, Result};

/// Retry schedule for lock-contention failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub attempts: usize,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 10, delay: Duration::from_millis(20) }
    }
}

/// Classifies a raw I/O error.
///
/// Sharing/lock violations become [`Error::LockContention`] and are eligible
/// for retry; every other kind stays a fatal [`Error::Io`].
pub fn classify(err: io::Error) -> Error {
    if is_contention(&err) {
        Error::LockContention(err)
    } else {
        Error::Io(err)
    }
}

fn is_contention(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(windows)]
    {
        // ERROR_SHARING_VIOLATION (32) and ERROR_LOCK_VIOLATION (33).
        if matches!(err.raw_os_error(), Some(32) | Some(33)) {
            return true;
        }
    }
    false
}

/// Runs `op`, retrying lock-contention failures up to the policy budget.
///
/// Any non-contention error is returned on the first occurrence. When the
/// budget is exhausted the contention is no longer considered transient and
/// is surfaced as a fatal [`Error::Io`] naming the attempt count.
///
/// # Example
///
/// ```
/// use tomedb::retry::{self, RetryPolicy};
///
/// let policy = RetryPolicy::default();
/// let value = retry::run(&policy, || Ok::<_, tomedb::Error>(7)).unwrap();
/// assert_eq!(value, 7);
/// ```
pub fn run<T>(policy: &RetryPolicy, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_lock_contention() && attempt < policy.attempts => {
                warn!(
                    "lock contention (attempt {}/{}), retrying in {:?}",
                    attempt, policy.attempts, policy.delay
                );
                thread::sleep(policy.delay);
                attempt += 1;
            }
            Err(Error::LockContention(io_err)) => {
                return Err(Error::Io(io::Error::new(
                    io_err.kind(),
                    format!(
                        "lock contention persisted after {} attempts: {}",
                        policy.attempts, io_err
                    ),
                )));
            }
            other => return other,
        }
    }
}
