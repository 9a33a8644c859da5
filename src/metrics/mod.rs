//! Fire-and-forget server metrics.
//!
//! Counters are plain atomics behind free functions, so emitting a sample
//! can never block or fail back into the caller. A reporting backend can
//! periodically read [`snapshot`] and ship it wherever it likes; the
//! default sink is a debug-level trace line.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// How an A2DP device left the audio output list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum A2dpExitCode {
    /// Disconnected while idle.
    Idle = 0,
    /// Disconnected mid-stream without a socket error.
    WhileStreaming = 1,
    /// Disconnected mid-stream with ECONNRESET.
    ConnReset = 2,
    /// Server-requested disconnect after a long packet Tx failure.
    LongTxFailure = 3,
    /// Server-requested disconnect after a fatal socket error.
    TxFatalError = 4,
}

/// Outcome of an SCO socket setup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ScoErrorType {
    /// Setup succeeded.
    Success = 0,
    /// connect() failed.
    ConnectError = 1,
    /// Socket open failed.
    OpenError = 2,
    /// Poll for connection completion timed out.
    PollTimeout = 3,
    /// Poll reported ERR or HUP.
    PollErrHup = 4,
}

const A2DP_EXIT_CODES: usize = 5;
const SCO_ERROR_TYPES: usize = 5;
const SUSPEND_REASONS: usize = 6;

struct Counters {
    a2dp_exit: [AtomicU64; A2DP_EXIT_CODES],
    sco_error: [AtomicU64; SCO_ERROR_TYPES],
    bt_suspend: [AtomicU64; SUSPEND_REASONS],
    conn_watch_started: AtomicU64,
    profile_switches: AtomicU64,
    device_open_failures: AtomicU64,
    transient_io_errors: AtomicU64,
}

#[allow(clippy::declare_interior_mutable_const)]
const ZERO: AtomicU64 = AtomicU64::new(0);

static COUNTERS: Counters = Counters {
    a2dp_exit: [ZERO; A2DP_EXIT_CODES],
    sco_error: [ZERO; SCO_ERROR_TYPES],
    bt_suspend: [ZERO; SUSPEND_REASONS],
    conn_watch_started: ZERO,
    profile_switches: ZERO,
    device_open_failures: ZERO,
    transient_io_errors: ZERO,
};

/// Records how an A2DP device exited the output list.
pub fn a2dp_exit(code: A2dpExitCode) {
    COUNTERS.a2dp_exit[code as usize].fetch_add(1, Ordering::Relaxed);
}

/// Records the outcome of an SCO socket setup attempt.
pub fn hfp_sco_connection_error(error: ScoErrorType) {
    COUNTERS.sco_error[error as usize].fetch_add(1, Ordering::Relaxed);
}

/// Records a scheduled Bluetooth suspend by reason index.
///
/// The index is the numeric value of the suspend reason, which is part of
/// the operator contract. Out-of-range values are dropped.
pub fn bt_suspend_scheduled(reason_index: usize) {
    if let Some(counter) = COUNTERS.bt_suspend.get(reason_index) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Records the start of a connection watch.
pub fn bt_conn_watch_started() {
    COUNTERS.conn_watch_started.fetch_add(1, Ordering::Relaxed);
}

/// Records a profile switch request.
pub fn bt_profile_switch() {
    COUNTERS.profile_switches.fetch_add(1, Ordering::Relaxed);
}

/// Records a failed device open.
pub fn device_open_failure() {
    COUNTERS.device_open_failures.fetch_add(1, Ordering::Relaxed);
}

/// Records a transient device I/O error recovered locally.
pub fn transient_io_error() {
    COUNTERS.transient_io_errors.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// A2DP exit counts indexed by [`A2dpExitCode`].
    pub a2dp_exit: [u64; A2DP_EXIT_CODES],
    /// SCO setup outcome counts indexed by [`ScoErrorType`].
    pub sco_error: [u64; SCO_ERROR_TYPES],
    /// Scheduled suspend counts indexed by suspend reason.
    pub bt_suspend: [u64; SUSPEND_REASONS],
    /// Connection watches started.
    pub conn_watch_started: u64,
    /// Profile switch requests.
    pub profile_switches: u64,
    /// Failed device opens.
    pub device_open_failures: u64,
    /// Transient device I/O errors.
    pub transient_io_errors: u64,
}

/// Reads every counter.
pub fn snapshot() -> MetricsSnapshot {
    let read = |a: &AtomicU64| a.load(Ordering::Relaxed);
    MetricsSnapshot {
        a2dp_exit: std::array::from_fn(|i| read(&COUNTERS.a2dp_exit[i])),
        sco_error: std::array::from_fn(|i| read(&COUNTERS.sco_error[i])),
        bt_suspend: std::array::from_fn(|i| read(&COUNTERS.bt_suspend[i])),
        conn_watch_started: read(&COUNTERS.conn_watch_started),
        profile_switches: read(&COUNTERS.profile_switches),
        device_open_failures: read(&COUNTERS.device_open_failures),
        transient_io_errors: read(&COUNTERS.transient_io_errors),
    }
}

/// Emits the current counters as a debug trace line.
pub fn log_snapshot() {
    debug!(snapshot = ?snapshot(), "server metrics");
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are process-global, so assertions are written as deltas to
    // stay robust against other tests in the same binary.

    #[test]
    fn counters_accumulate() {
        let before = snapshot();

        a2dp_exit(A2dpExitCode::LongTxFailure);
        a2dp_exit(A2dpExitCode::LongTxFailure);
        hfp_sco_connection_error(ScoErrorType::PollTimeout);
        bt_suspend_scheduled(2);

        let after = snapshot();
        assert_eq!(
            after.a2dp_exit[A2dpExitCode::LongTxFailure as usize]
                - before.a2dp_exit[A2dpExitCode::LongTxFailure as usize],
            2
        );
        assert_eq!(
            after.sco_error[ScoErrorType::PollTimeout as usize]
                - before.sco_error[ScoErrorType::PollTimeout as usize],
            1
        );
        assert_eq!(after.bt_suspend[2] - before.bt_suspend[2], 1);
    }

    #[test]
    fn out_of_range_suspend_reason_dropped() {
        let before = snapshot();
        bt_suspend_scheduled(99);
        assert_eq!(snapshot().bt_suspend, before.bt_suspend);
    }
}
