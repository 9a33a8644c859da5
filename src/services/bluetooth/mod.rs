//! Bluetooth audio: device registry, host-bus plumbing and policy.

/// Remote device state
pub mod device;
/// Bluetooth error types
pub mod error;
/// Host-bus monitoring and command issue
pub mod monitoring;
/// The audio policy engine
pub mod policy;
/// A2DP and HFP-AG collaborators
pub mod profiles;
/// Host-bus proxy interfaces
pub mod proxy;
/// The device registry
pub mod registry;
/// Profile and transport types
pub mod types;

pub use device::{BtDevice, DeviceProperties, UpdateSummary};
pub use error::BtError;
pub use monitoring::{BtCommander, BtMonitor, BusEvent, NullCommander, ZbusCommander};
pub use policy::{BtPolicy, PolicyCommand, SuspendReason};
pub use profiles::{A2dpManager, A2dpPolicy, HfpAgManager, HfpAgPolicy};
pub use registry::BtRegistry;
pub use types::{ObjectPath, Profile, ScoCodec};

use tracing::{debug, info};

use crate::server::message::{MainMessage, MessageBus, MessageKind};
use crate::server::ServerContext;
use crate::services::audio::{Direction, NodeAttr};

/// Registers the registry's bus-event handler on the message bus.
pub fn start(bus: &mut MessageBus<ServerContext>) {
    bus.add_handler(
        MessageKind::BtBus,
        Box::new(|msg, ctx| {
            if let MainMessage::BtBus(event) = msg {
                handle_bus_event(ctx, event);
            }
        }),
    );
}

/// Removes the registry's bus-event handler.
pub fn stop(bus: &mut MessageBus<ServerContext>) -> bool {
    bus.rm_handler(MessageKind::BtBus)
}

/// Applies one host-bus notification to the registry and runs the policy
/// reactions it implies.
pub fn handle_bus_event(ctx: &mut ServerContext, event: BusEvent) {
    match event {
        BusEvent::InterfacesAdded { path, properties } => {
            apply_properties(ctx, &path, &properties, &[]);
        }
        BusEvent::PropertiesChanged {
            path,
            changed,
            invalidated,
        } => {
            if !ctx.bt.contains(&path) {
                debug!(%path, "property change for unknown device ignored");
                return;
            }
            apply_properties(ctx, &path, &changed, &invalidated);
        }
        BusEvent::InterfacesRemoved { path } => remove_device(ctx, &path),
    }
}

fn apply_properties(
    ctx: &mut ServerContext,
    path: &str,
    changed: &DeviceProperties,
    invalidated: &[String],
) {
    let summary = ctx.bt.get_or_create(path).update_properties(changed, invalidated);

    let watch_worthy = {
        let Some(dev) = ctx.bt.get(path) else { return };
        let advertises_audio = dev.supported_profiles().intersects(Profile::audio());
        (summary.became_connected && advertises_audio)
            || (summary.gained_audio_profile && dev.connected())
    };
    if watch_worthy {
        policy::start_connection_watch(ctx, path);
    }

    if summary.became_disconnected {
        set_nodes_plugged(ctx, path, false);
        teardown_transports(ctx, path);
        policy::remove_device(ctx, path);
    }
}

/// Removes a device from record, tearing down any attached A2DP or
/// HFP-AG iodev first.
pub fn remove_device(ctx: &mut ServerContext, path: &str) {
    policy::remove_device(ctx, path);
    teardown_transports(ctx, path);
    if ctx.bt.remove_entry(path).is_some() {
        info!(%path, "Bluetooth device removed");
    }
}

fn teardown_transports(ctx: &mut ServerContext, path: &str) {
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
    }
}

/// Last-wins conflict removal: every other connected BT audio device is
/// torn down and asked to disconnect before `path` starts.
pub fn remove_conflict(ctx: &mut ServerContext, path: &str) {
    let others: Vec<ObjectPath> = ctx
        .bt
        .paths()
        .into_iter()
        .filter(|p| p != path)
        .collect();

    for other in others {
        let in_conflict = ctx
            .bt
            .get(&other)
            .is_some_and(|d| d.connected() && d.is_profile_connected(Profile::audio()));
        if !in_conflict {
            continue;
        }
        info!(path = %other, "removing conflicting BT audio device");
        teardown_transports(ctx, &other);
        ctx.bt.request_disconnect(&other);
    }
}

/// Plugs or unplugs every node of the device's attached iodevs.
pub fn set_nodes_plugged(ctx: &mut ServerContext, path: &str, plugged: bool) {
    let Some(dev) = ctx.bt.get(path) else { return };
    let slots = dev.iodevs();
    for idx in slots.iter().flatten() {
        if let Some(iodev) = ctx.devices.get_mut(*idx) {
            let node_idxs: Vec<u32> = iodev.nodes().iter().map(|n| n.idx).collect();
            for node_idx in node_idxs {
                let _ = iodev.plug_event(node_idx, plugged);
            }
        }
    }
}

/// Notification that the A2DP transport finished configuration: the media
/// profile is up, so any pending suspend is stale and the remaining
/// profiles get a fresh connection watch.
pub fn a2dp_configured(ctx: &mut ServerContext, path: &str) {
    let Some(dev) = ctx.bt.get_mut(path) else {
        return;
    };
    dev.set_profile_connected(Profile::A2DP_SINK, true);
    let active = dev.active_profile() | Profile::A2DP_SINK | Profile::A2DP_SOURCE;
    dev.set_active_profile(active);
    let connected = dev.connected();

    policy::cancel_suspend(ctx, path);
    if connected {
        policy::start_connection_watch(ctx, path);
    }
}

/// Notification that the audio gateway came up for the device.
pub fn audio_gateway_initialized(ctx: &mut ServerContext, path: &str) {
    policy::cancel_suspend(ctx, path);
    if let Some(dev) = ctx.bt.get_mut(path) {
        dev.set_profile_connected(Profile::HFP_HANDSFREE, true);
        dev.set_active_profile(Profile::HFP_AUDIOGATEWAY | Profile::HSP_AUDIOGATEWAY);
    }
}

/// Notification that a profile transport stopped working, by failure to
/// initialize or by a fatal error.
pub fn notify_profile_dropped(ctx: &mut ServerContext, path: &str, profile: Profile) {
    let dropped = ctx
        .bt
        .get_mut(path)
        .is_some_and(|dev| dev.set_profile_connected(profile, false));
    if dropped {
        policy::schedule_suspend(ctx, path, 0, SuspendReason::UnexpectedProfileDrop);
    }
}

/// Applies a remote absolute-volume event to the output iodev's active
/// node.
pub fn update_hardware_volume(ctx: &mut ServerContext, path: &str, volume: u32) {
    let Some(dev) = ctx.bt.get(path) else { return };
    if !dev.use_hardware_volume() {
        return;
    }
    let Some(idx) = dev.iodev(Direction::Output) else {
        return;
    };
    if let Some(iodev) = ctx.devices.get_mut(idx) {
        if let Some(node_idx) = iodev.active_node().map(|n| n.idx) {
            let _ = iodev.set_node_attr(node_idx, NodeAttr::Volume(volume));
        }
    }
}
