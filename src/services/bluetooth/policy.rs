//! The Bluetooth audio policy engine.
//!
//! Three per-device state machines cooperate here:
//!
//! - **Connection watch** ticks after a device connects until every
//!   advertised audio profile has a live transport, nudging the remote
//!   stack to connect whichever of A2DP/HFP is missing, and giving up
//!   into a suspend after the retry budget is spent.
//! - **Profile switch** bounces a device's iodevs when the active profile
//!   changes. The capture side resumes immediately; the playback side
//!   resumes through a coalescing delay because some headsets mishandle a
//!   rapid HFP to A2DP flip while an output stream is waiting.
//! - **Suspend** tears a misbehaving device down: suspend A2DP, suspend
//!   the audio gateway, then force-disconnect. One pending suspend per
//!   device; the first reason wins.
//!
//! Everything here runs on the main thread. Workers post a
//! [`PolicyCommand`] through the message bus instead of calling in.
//!
//! The record lists are searched linearly by device path; the number of
//! concurrently connected Bluetooth audio devices is small.

use std::fmt;

use tracing::{debug, error};

use crate::core::AuradError;
use crate::metrics;
use crate::server::message::{MainMessage, MainSender, MessageBus, MessageKind};
use crate::server::timer::TimerHandle;
use crate::server::ServerContext;
use crate::services::audio::{DeviceIndex, Direction};

use super::types::{ObjectPath, Profile, A2DP_SINK_UUID, HFP_HF_UUID};

/// Why a device suspend was scheduled.
///
/// The numeric order and the display names are part of the operator
/// contract: they are emitted verbatim to the log facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SuspendReason {
    /// Consecutive A2DP packet Tx failures for too long.
    A2dpLongTxFailure = 0,
    /// The A2DP socket returned a fatal error code.
    A2dpTxFatalError = 1,
    /// The connection watch exhausted its retries.
    ConnWatchTimeOut = 2,
    /// The SCO socket failed to open or poll.
    HfpScoSocketError = 3,
    /// The audio gateway failed to start.
    HfpAgStartFailure = 4,
    /// A profile transport dropped without warning.
    UnexpectedProfileDrop = 5,
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SuspendReason::A2dpLongTxFailure => "A2DP long Tx failure",
            SuspendReason::A2dpTxFatalError => "A2DP Tx fatal error",
            SuspendReason::ConnWatchTimeOut => "Conn watch times out",
            SuspendReason::HfpScoSocketError => "SCO socket error",
            SuspendReason::HfpAgStartFailure => "HFP AG start failure",
            SuspendReason::UnexpectedProfileDrop => "Unexpected profile drop",
        };
        f.write_str(name)
    }
}

/// A policy request posted from any thread.
#[derive(Debug)]
pub enum PolicyCommand {
    /// The active profile of a device changed; bounce its iodevs.
    SwitchProfile {
        /// Device object path.
        path: ObjectPath,
        /// The iodev that triggered the switch, when known.
        iodev: Option<DeviceIndex>,
    },
    /// Schedule a device suspend.
    ScheduleSuspend {
        /// Device object path.
        path: ObjectPath,
        /// Delay before the suspend fires, in milliseconds.
        delay_ms: u64,
        /// Why the suspend was requested.
        reason: SuspendReason,
    },
    /// Drop a pending suspend.
    CancelSuspend {
        /// Device object path.
        path: ObjectPath,
    },
}

struct ProfileSwitchRecord {
    path: ObjectPath,
    timer: TimerHandle,
}

struct SuspendRecord {
    path: ObjectPath,
    reason: SuspendReason,
    timer: TimerHandle,
}

struct ConnWatchRecord {
    path: ObjectPath,
    retries_left: u32,
    timer: Option<TimerHandle>,
}

/// Per-device policy records, one list per state-machine shape.
#[derive(Default)]
pub struct BtPolicy {
    switches: Vec<ProfileSwitchRecord>,
    suspends: Vec<SuspendRecord>,
    watches: Vec<ConnWatchRecord>,
}

impl BtPolicy {
    /// Creates an engine with no records.
    pub fn new() -> Self {
        Self::default()
    }

    /// The reason of the pending suspend for a device, if one is armed.
    pub fn pending_suspend_reason(&self, path: &str) -> Option<SuspendReason> {
        self.suspends
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.reason)
    }

    /// True while a delayed output resume is pending for the device.
    pub fn has_pending_switch(&self, path: &str) -> bool {
        self.switches.iter().any(|r| r.path == path)
    }

    /// True while a connection watch exists for the device.
    pub fn has_watch(&self, path: &str) -> bool {
        self.watches.iter().any(|r| r.path == path)
    }

    /// Retries left on the device's connection watch.
    pub fn watch_retries(&self, path: &str) -> Option<u32> {
        self.watches
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.retries_left)
    }

    /// True when no records of any shape exist.
    pub fn is_empty(&self) -> bool {
        self.switches.is_empty() && self.suspends.is_empty() && self.watches.is_empty()
    }
}

/// Registers the policy handler on the message bus.
pub fn start(bus: &mut MessageBus<ServerContext>) {
    bus.add_handler(
        MessageKind::BtPolicy,
        Box::new(|msg, ctx| {
            if let MainMessage::BtPolicy(cmd) = msg {
                handle_command(ctx, cmd);
            }
        }),
    );
}

/// Removes the policy handler from the message bus.
pub fn stop(bus: &mut MessageBus<ServerContext>) -> bool {
    bus.rm_handler(MessageKind::BtPolicy)
}

/// Cancels every policy timer and empties the record lists.
pub fn reset(ctx: &mut ServerContext) {
    for record in std::mem::take(&mut ctx.policy.switches) {
        ctx.timers.cancel(record.timer);
    }
    for record in std::mem::take(&mut ctx.policy.suspends) {
        ctx.timers.cancel(record.timer);
    }
    for record in std::mem::take(&mut ctx.policy.watches) {
        if let Some(timer) = record.timer {
            ctx.timers.cancel(timer);
        }
    }
}

/// Posts a profile-switch request from any thread.
///
/// # Errors
/// Returns error if the main loop has shut down.
pub fn post_switch_profile(
    sender: &MainSender,
    path: ObjectPath,
    iodev: Option<DeviceIndex>,
) -> Result<(), AuradError> {
    sender.send(MainMessage::BtPolicy(PolicyCommand::SwitchProfile {
        path,
        iodev,
    }))
}

/// Posts a suspend request from any thread.
///
/// # Errors
/// Returns error if the main loop has shut down.
pub fn post_schedule_suspend(
    sender: &MainSender,
    path: ObjectPath,
    delay_ms: u64,
    reason: SuspendReason,
) -> Result<(), AuradError> {
    sender.send(MainMessage::BtPolicy(PolicyCommand::ScheduleSuspend {
        path,
        delay_ms,
        reason,
    }))
}

/// Posts a suspend cancellation from any thread.
///
/// # Errors
/// Returns error if the main loop has shut down.
pub fn post_cancel_suspend(sender: &MainSender, path: ObjectPath) -> Result<(), AuradError> {
    sender.send(MainMessage::BtPolicy(PolicyCommand::CancelSuspend { path }))
}

/// Dispatches a policy command on the main thread.
pub fn handle_command(ctx: &mut ServerContext, cmd: PolicyCommand) {
    match cmd {
        PolicyCommand::SwitchProfile { path, iodev } => {
            debug!(%path, ?iodev, "profile switch requested");
            switch_profile(ctx, &path);
        }
        PolicyCommand::ScheduleSuspend {
            path,
            delay_ms,
            reason,
        } => schedule_suspend(ctx, &path, delay_ms, reason),
        PolicyCommand::CancelSuspend { path } => cancel_suspend(ctx, &path),
    }
}

/// Bounces a device's iodevs after its active profile changed.
///
/// Both directions are suspended first; both input and output may be
/// active when a device moves from HFP back to A2DP. The input side is
/// resumed immediately after `update_active_node`; the output side goes
/// through the coalescing delay.
pub fn switch_profile(ctx: &mut ServerContext, path: &str) {
    metrics::bt_profile_switch();
    let Some(dev) = ctx.bt.get(path) else {
        debug!(%path, "profile switch for unknown device dropped");
        return;
    };
    let slots = dev.iodevs();

    for idx in slots.iter().flatten() {
        ctx.devices.suspend_dev(*idx);
    }

    if let Some(idx) = slots[Direction::Input.index()] {
        if let Some(iodev) = ctx.devices.get_mut(idx) {
            iodev.update_active_node(0, true);
        }
        ctx.devices.resume_dev(idx);
    }

    if slots[Direction::Output.index()].is_some() {
        switch_profile_with_delay(ctx, path);
    }
}

fn switch_profile_with_delay(ctx: &mut ServerContext, path: &str) {
    let delay_ms = ctx.config.profile_switch_delay_ms;

    // Coalesce: only one delayed resume may be pending per device.
    if let Some(pos) = ctx.policy.switches.iter().position(|r| r.path == path) {
        let record = ctx.policy.switches.remove(pos);
        ctx.timers.cancel(record.timer);
    }

    let cb_path = path.to_string();
    let timer = ctx.timers.schedule_ms(
        delay_ms,
        Box::new(move |ctx: &mut ServerContext| profile_switch_delay_cb(ctx, &cb_path)),
    );
    ctx.policy.switches.push(ProfileSwitchRecord {
        path: path.to_string(),
        timer,
    });
}

fn profile_switch_delay_cb(ctx: &mut ServerContext, path: &str) {
    if let Some(pos) = ctx.policy.switches.iter().position(|r| r.path == path) {
        ctx.policy.switches.remove(pos);
    }

    // During the delay the iodev may have been enabled by others and its
    // active profile may have changed; the audio thread would then be
    // using the node. Touch it only if the device and its output iodev
    // are both still alive.
    let Some(dev) = ctx.bt.get(path) else {
        return;
    };
    let Some(idx) = dev.iodev(Direction::Output) else {
        return;
    };
    if let Some(iodev) = ctx.devices.get_mut(idx) {
        iodev.update_active_node(0, true);
        ctx.devices.resume_dev(idx);
    }
}

/// Schedules a device suspend after `delay_ms`.
///
/// Idempotent per device: while a suspend is pending, later schedules are
/// dropped and the first reason wins. A schedule for a device no longer
/// in the registry is dropped silently.
pub fn schedule_suspend(ctx: &mut ServerContext, path: &str, delay_ms: u64, reason: SuspendReason) {
    if !ctx.bt.contains(path) {
        debug!(%path, ?reason, "suspend for unregistered device dropped");
        return;
    }
    if ctx.policy.suspends.iter().any(|r| r.path == path) {
        debug!(%path, ?reason, "suspend already pending; keeping first reason");
        return;
    }

    let cb_path = path.to_string();
    let timer = ctx.timers.schedule_ms(
        delay_ms,
        Box::new(move |ctx: &mut ServerContext| suspend_cb(ctx, &cb_path)),
    );
    ctx.policy.suspends.push(SuspendRecord {
        path: path.to_string(),
        reason,
        timer,
    });
    metrics::bt_suspend_scheduled(reason as usize);
}

/// Drops the pending suspend for a device, if any.
pub fn cancel_suspend(ctx: &mut ServerContext, path: &str) {
    if let Some(pos) = ctx.policy.suspends.iter().position(|r| r.path == path) {
        let record = ctx.policy.suspends.remove(pos);
        ctx.timers.cancel(record.timer);
    }
}

fn suspend_cb(ctx: &mut ServerContext, path: &str) {
    let Some(pos) = ctx.policy.suspends.iter().position(|r| r.path == path) else {
        return;
    };
    let record = ctx.policy.suspends.remove(pos);

    // The reason goes to the log verbatim so operators can track it in
    // user reports.
    error!("Suspend dev: {}", record.reason);

    let ServerContext {
        bt,
        devices,
        a2dp,
        hfp_ag,
        ..
    } = ctx;
    if let Some(dev) = bt.get_mut(path) {
        a2dp.suspend_connected_device(dev, devices);
        hfp_ag.suspend_connected_device(dev, devices);
        bt.request_disconnect(path);
    }
}

/// Starts (or restarts, with fresh retries) the connection watch of a
/// device.
pub fn start_connection_watch(ctx: &mut ServerContext, path: &str) {
    let retries = ctx.config.conn_watch_max_retries;
    let period = ctx.config.conn_watch_period_ms;

    let cb_path = path.to_string();
    let timer = ctx.timers.schedule_ms(
        period,
        Box::new(move |ctx: &mut ServerContext| conn_watch_cb(ctx, &cb_path)),
    );

    if let Some(record) = ctx.policy.watches.iter_mut().find(|r| r.path == path) {
        if let Some(old) = record.timer.take() {
            ctx.timers.cancel(old);
        }
        record.retries_left = retries;
        record.timer = Some(timer);
    } else {
        ctx.policy.watches.push(ConnWatchRecord {
            path: path.to_string(),
            retries_left: retries,
            timer: Some(timer),
        });
    }
    metrics::bt_conn_watch_started();
}

/// Stops the connection watch of a device, dropping its record.
pub fn stop_connection_watch(ctx: &mut ServerContext, path: &str) {
    if let Some(pos) = ctx.policy.watches.iter().position(|r| r.path == path) {
        let record = ctx.policy.watches.remove(pos);
        if let Some(timer) = record.timer {
            ctx.timers.cancel(timer);
        }
    }
}

/// Drops every policy record of a device. Called when the device leaves
/// the registry.
pub fn remove_device(ctx: &mut ServerContext, path: &str) {
    if let Some(pos) = ctx.policy.switches.iter().position(|r| r.path == path) {
        let record = ctx.policy.switches.remove(pos);
        ctx.timers.cancel(record.timer);
    }
    cancel_suspend(ctx, path);
    stop_connection_watch(ctx, path);
}

fn conn_watch_cb(ctx: &mut ServerContext, path: &str) {
    let Some(pos) = ctx.policy.watches.iter().position(|r| r.path == path) else {
        return;
    };
    ctx.policy.watches[pos].timer = None;

    let Some(dev) = ctx.bt.get(path) else {
        ctx.policy.watches.remove(pos);
        return;
    };
    let profiles = dev.supported_profiles();
    let a2dp_supported = dev.supports_profile(Profile::A2DP_SINK);
    let a2dp_connected = dev.is_profile_connected(Profile::A2DP_SINK);
    let hfp_supported = dev.supports_profile(Profile::HFP_HANDSFREE);
    let hfp_connected = dev.is_profile_connected(Profile::HFP_HANDSFREE);

    // Not an audio device; nothing to watch.
    if profiles.is_empty() {
        ctx.policy.watches.remove(pos);
        return;
    }

    // When both profiles are expected and exactly one is up, nudge the
    // remote stack to bring up the other. When neither is up yet, the
    // stack still owes us the first connection notification.
    if a2dp_supported && hfp_supported {
        if !a2dp_connected && hfp_connected {
            ctx.bt.request_connect_profile(path, A2DP_SINK_UUID);
        }
        if a2dp_connected && !hfp_connected {
            ctx.bt.request_connect_profile(path, HFP_HF_UUID);
        }
    }

    if a2dp_supported != a2dp_connected || hfp_supported != hfp_connected {
        ctx.policy.watches[pos].retries_left =
            ctx.policy.watches[pos].retries_left.saturating_sub(1);
        let retries_left = ctx.policy.watches[pos].retries_left;
        debug!(%path, retries_left, "profile connections not settled");

        if retries_left > 0 {
            let cb_path = path.to_string();
            let timer = ctx.timers.schedule_ms(
                ctx.config.conn_watch_period_ms,
                Box::new(move |ctx: &mut ServerContext| conn_watch_cb(ctx, &cb_path)),
            );
            ctx.policy.watches[pos].timer = Some(timer);
        } else {
            error!(%path, "connection watch timeout");
            schedule_suspend(ctx, path, 0, SuspendReason::ConnWatchTimeOut);
        }
        return;
    }

    // Every expected profile is up. Only the latest connected BT audio
    // device is exposed to the user; treat the rest as conflicts and
    // remove them before starting this one.
    super::remove_conflict(ctx, path);

    if a2dp_connected {
        let ServerContext {
            bt, devices, a2dp, ..
        } = ctx;
        if let Some(dev) = bt.get_mut(path) {
            if let Err(e) = a2dp.start(dev, devices) {
                error!(%path, "A2DP start failed: {e}");
            }
        }
    }

    if hfp_connected {
        let start_result = {
            let ServerContext {
                bt,
                devices,
                hfp_ag,
                ..
            } = ctx;
            match bt.get_mut(path) {
                Some(dev) => hfp_ag.start(dev, devices),
                None => Ok(()),
            }
        };
        if let Err(e) = start_result {
            error!(%path, "audio gateway start failed: {e}");
            schedule_suspend(ctx, path, 0, SuspendReason::HfpAgStartFailure);
        }
    }

    super::set_nodes_plugged(ctx, path, true);

    if let Some(pos) = ctx.policy.watches.iter().position(|r| r.path == path) {
        ctx.policy.watches.remove(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_order_is_operator_contract() {
        assert_eq!(SuspendReason::A2dpLongTxFailure as u32, 0);
        assert_eq!(SuspendReason::A2dpTxFatalError as u32, 1);
        assert_eq!(SuspendReason::ConnWatchTimeOut as u32, 2);
        assert_eq!(SuspendReason::HfpScoSocketError as u32, 3);
        assert_eq!(SuspendReason::HfpAgStartFailure as u32, 4);
        assert_eq!(SuspendReason::UnexpectedProfileDrop as u32, 5);
    }

    #[test]
    fn reason_names_are_operator_contract() {
        assert_eq!(
            SuspendReason::A2dpLongTxFailure.to_string(),
            "A2DP long Tx failure"
        );
        assert_eq!(
            SuspendReason::ConnWatchTimeOut.to_string(),
            "Conn watch times out"
        );
        assert_eq!(
            SuspendReason::UnexpectedProfileDrop.to_string(),
            "Unexpected profile drop"
        );
    }
}
