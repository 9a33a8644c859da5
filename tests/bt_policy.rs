//! Integration tests for the Bluetooth policy engine.
//!
//! Drives the policy state machines through the same surface the daemon
//! uses: host-bus events into the registry glue, policy commands over the
//! message bus, and the timer wheel advanced on a paused clock.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use tokio::time::{advance, Duration};

use aurad::config::Config;
use aurad::server::Server;
use aurad::services::audio::{Direction, StubBackend, StubState};
use aurad::services::bluetooth::{
    self, policy, A2dpManager, A2dpPolicy, BtCommander, BtDevice, BusEvent, DeviceProperties,
    HfpAgManager, HfpAgPolicy, Profile, ScoCodec, SuspendReason,
};
use aurad::services::bluetooth::types::{A2DP_SINK_UUID, HFP_HF_UUID};
use aurad::services::audio::DeviceList;
use aurad::services::bluetooth::BtError;

const D1: &str = "/org/bluez/hci0/dev_D1";
const D2: &str = "/org/bluez/hci0/dev_D2";

#[derive(Default)]
struct CommanderLog {
    connect_profile: Vec<(String, String)>,
    disconnect: Vec<String>,
}

struct RecordingCommander(Arc<Mutex<CommanderLog>>);

impl BtCommander for RecordingCommander {
    fn connect_profile(&self, path: &str, uuid: &str) {
        self.0
            .lock()
            .unwrap()
            .connect_profile
            .push((path.to_string(), uuid.to_string()));
    }

    fn disconnect(&self, path: &str) {
        self.0.lock().unwrap().disconnect.push(path.to_string());
    }
}

#[derive(Default)]
struct ProfileLog {
    a2dp_starts: u32,
    a2dp_suspends: u32,
    hfp_starts: u32,
    hfp_suspends: u32,
}

struct RecordingA2dp {
    log: Arc<Mutex<ProfileLog>>,
    inner: A2dpManager,
}

impl A2dpPolicy for RecordingA2dp {
    fn start(&mut self, device: &mut BtDevice, devices: &mut DeviceList) -> Result<(), BtError> {
        self.log.lock().unwrap().a2dp_starts += 1;
        self.inner.start(device, devices)
    }

    fn suspend_connected_device(&mut self, device: &mut BtDevice, devices: &mut DeviceList) {
        self.log.lock().unwrap().a2dp_suspends += 1;
        self.inner.suspend_connected_device(device, devices);
    }
}

struct RecordingHfpAg {
    log: Arc<Mutex<ProfileLog>>,
    inner: HfpAgManager,
    fail_start: bool,
}

impl HfpAgPolicy for RecordingHfpAg {
    fn start(&mut self, device: &mut BtDevice, devices: &mut DeviceList) -> Result<(), BtError> {
        self.log.lock().unwrap().hfp_starts += 1;
        if self.fail_start {
            return Err(BtError::ProfileStart {
                path: device.object_path().to_string(),
                details: "forced failure".to_string(),
            });
        }
        self.inner.start(device, devices)
    }

    fn suspend_connected_device(&mut self, device: &mut BtDevice, devices: &mut DeviceList) {
        self.log.lock().unwrap().hfp_suspends += 1;
        self.inner.suspend_connected_device(device, devices);
    }
}

struct Harness {
    server: Server,
    commands: Arc<Mutex<CommanderLog>>,
    profiles: Arc<Mutex<ProfileLog>>,
    backends: Arc<Mutex<Vec<Arc<Mutex<StubState>>>>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_failing_hfp(false)
    }

    fn with_failing_hfp(fail_start: bool) -> Self {
        let commands: Arc<Mutex<CommanderLog>> = Arc::default();
        let profiles: Arc<Mutex<ProfileLog>> = Arc::default();
        let backends: Arc<Mutex<Vec<Arc<Mutex<StubState>>>>> = Arc::default();

        let b1 = Arc::clone(&backends);
        let a2dp = RecordingA2dp {
            log: Arc::clone(&profiles),
            inner: A2dpManager::with_factory(Box::new(move |_| {
                let (backend, state) = StubBackend::new();
                b1.lock().unwrap().push(state);
                Box::new(backend)
            })),
        };
        let b2 = Arc::clone(&backends);
        let hfp_ag = RecordingHfpAg {
            log: Arc::clone(&profiles),
            inner: HfpAgManager::with_factory(Box::new(move |_| {
                let (backend, state) = StubBackend::new();
                b2.lock().unwrap().push(state);
                Box::new(backend)
            })),
            fail_start,
        };

        let mut server = Server::new(
            &Config::default(),
            Arc::new(RecordingCommander(Arc::clone(&commands))),
            Box::new(a2dp),
            Box::new(hfp_ag),
        );
        server.start();

        Self {
            server,
            commands,
            profiles,
            backends,
        }
    }

    fn announce_audio_device(&mut self, path: &str) {
        bluetooth::handle_bus_event(
            self.server.context_mut(),
            BusEvent::InterfacesAdded {
                path: path.to_string(),
                properties: DeviceProperties {
                    name: Some("Headset".to_string()),
                    connected: Some(true),
                    uuids: Some(vec![A2DP_SINK_UUID.to_string(), HFP_HF_UUID.to_string()]),
                    ..Default::default()
                },
            },
        );
    }

    async fn tick(&mut self, ms: u64) {
        advance(Duration::from_millis(ms)).await;
        self.server.context_mut().run_due_timers();
    }

    /// Drives the device to the fully-connected state: watch satisfied,
    /// A2DP and the audio gateway started.
    async fn connect_happy(&mut self, path: &str) {
        self.announce_audio_device(path);
        let ctx = self.server.context_mut();
        bluetooth::a2dp_configured(ctx, path);
        ctx.bt
            .get_mut(path)
            .unwrap()
            .set_profile_connected(Profile::HFP_HANDSFREE, true);
        self.tick(2_000).await;
    }
}

mod connection_watch {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn happy_connect_brings_up_both_profiles() {
        let mut h = Harness::new();
        h.announce_audio_device(D1);

        assert!(h.server.context_mut().policy.has_watch(D1));

        // A2DP transport configures; HFP still missing at the first tick,
        // so the engine asks the stack to connect it.
        bluetooth::a2dp_configured(h.server.context_mut(), D1);
        h.tick(2_000).await;

        assert_eq!(
            h.commands.lock().unwrap().connect_profile,
            vec![(D1.to_string(), HFP_HF_UUID.to_string())]
        );
        assert!(h.server.context_mut().policy.has_watch(D1));

        // HFP reports connected before the next tick.
        h.server
            .context_mut()
            .bt
            .get_mut(D1)
            .unwrap()
            .set_profile_connected(Profile::HFP_HANDSFREE, true);
        h.tick(2_000).await;

        {
            let log = h.profiles.lock().unwrap();
            assert_eq!(log.a2dp_starts, 1);
            assert_eq!(log.hfp_starts, 1);
        }

        let ctx = h.server.context_mut();
        assert!(!ctx.policy.has_watch(D1));
        assert_eq!(ctx.policy.pending_suspend_reason(D1), None);

        // Nodes of the attached iodevs are plugged.
        let out_idx = ctx.bt.get(D1).unwrap().iodev(Direction::Output).unwrap();
        assert!(ctx.devices.get(out_idx).unwrap().nodes()[0].plugged);
        let in_idx = ctx.bt.get(D1).unwrap().iodev(Direction::Input).unwrap();
        assert!(ctx.devices.get(in_idx).unwrap().nodes()[0].plugged);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_schedules_suspend_and_disconnects() {
        let mut h = Harness::new();
        h.announce_audio_device(D1);
        bluetooth::a2dp_configured(h.server.context_mut(), D1);

        // HFP never connects; burn through the full retry budget.
        for _ in 0..30 {
            h.tick(2_000).await;
        }

        assert_eq!(
            h.server.context_mut().policy.pending_suspend_reason(D1),
            Some(SuspendReason::ConnWatchTimeOut)
        );

        // The suspend was scheduled with no delay; the next timer pass
        // fires it.
        h.tick(1).await;

        let log = h.profiles.lock().unwrap();
        assert_eq!(log.a2dp_suspends, 1);
        assert_eq!(log.hfp_suspends, 1);
        drop(log);
        assert_eq!(h.commands.lock().unwrap().disconnect, vec![D1.to_string()]);
        assert_eq!(h.server.context_mut().policy.pending_suspend_reason(D1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_for_profileless_device_terminates_quietly() {
        let mut h = Harness::new();
        bluetooth::handle_bus_event(
            h.server.context_mut(),
            BusEvent::InterfacesAdded {
                path: D1.to_string(),
                properties: DeviceProperties {
                    connected: Some(true),
                    ..Default::default()
                },
            },
        );
        // No audio profile advertised, so no watch was started; start one
        // by hand to exercise the first-tick exit.
        policy::start_connection_watch(h.server.context_mut(), D1);
        assert!(h.server.context_mut().policy.has_watch(D1));

        h.tick(2_000).await;

        let ctx = h.server.context_mut();
        assert!(!ctx.policy.has_watch(D1));
        assert_eq!(ctx.policy.pending_suspend_reason(D1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_resets_retries() {
        let mut h = Harness::new();
        h.announce_audio_device(D1);

        for _ in 0..5 {
            h.tick(2_000).await;
        }
        let drained = h.server.context_mut().policy.watch_retries(D1).unwrap();
        assert!(drained < 30);

        policy::start_connection_watch(h.server.context_mut(), D1);
        assert_eq!(h.server.context_mut().policy.watch_retries(D1), Some(30));
        // Only one timer serves the restarted watch.
        assert_eq!(h.server.context_mut().timers.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a2dp_configured_restarts_watch_with_fresh_retries() {
        let mut h = Harness::new();
        h.announce_audio_device(D1);

        for _ in 0..5 {
            h.tick(2_000).await;
        }
        let drained = h.server.context_mut().policy.watch_retries(D1).unwrap();
        assert!(drained < 30);

        // The media transport coming up counts as a fresh connection
        // signal for the watch.
        bluetooth::a2dp_configured(h.server.context_mut(), D1);

        let ctx = h.server.context_mut();
        assert_eq!(ctx.policy.watch_retries(D1), Some(30));
        assert_eq!(ctx.timers.pending(), 1);
        assert!(ctx
            .bt
            .get(D1)
            .unwrap()
            .is_profile_connected(Profile::A2DP_SINK));
    }

    #[tokio::test(start_paused = true)]
    async fn ag_start_failure_schedules_suspend() {
        let mut h = Harness::with_failing_hfp(true);
        h.connect_happy(D1).await;

        assert_eq!(
            h.server.context_mut().policy.pending_suspend_reason(D1),
            Some(SuspendReason::HfpAgStartFailure)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_removal_is_last_wins() {
        let mut h = Harness::new();
        h.connect_happy(D1).await;
        assert!(h.commands.lock().unwrap().disconnect.is_empty());

        h.connect_happy(D2).await;

        // The earlier device was torn down and asked to disconnect.
        assert_eq!(h.commands.lock().unwrap().disconnect, vec![D1.to_string()]);
        let log = h.profiles.lock().unwrap();
        assert!(log.a2dp_suspends >= 1);
        assert!(log.hfp_suspends >= 1);
    }
}

mod profile_switch {
    use super::*;

    async fn connected_harness() -> Harness {
        let mut h = Harness::new();
        h.connect_happy(D1).await;
        h
    }

    fn output_state(h: &Harness) -> Arc<Mutex<StubState>> {
        // The A2DP factory runs first, so the output backend is the first
        // stub created.
        Arc::clone(&h.backends.lock().unwrap()[0])
    }

    fn input_state(h: &Harness) -> Arc<Mutex<StubState>> {
        Arc::clone(&h.backends.lock().unwrap()[1])
    }

    #[tokio::test(start_paused = true)]
    async fn input_resumes_immediately_output_after_delay() {
        let mut h = connected_harness().await;
        let sender = h.server.sender();

        policy::post_switch_profile(&sender, D1.to_string(), None).unwrap();
        h.server.drain();

        let ctx = h.server.context_mut();
        let out_idx = ctx.bt.get(D1).unwrap().iodev(Direction::Output).unwrap();
        let in_idx = ctx.bt.get(D1).unwrap().iodev(Direction::Input).unwrap();

        // Input bounced synchronously.
        assert_eq!(
            input_state(&h).lock().unwrap().active_node_updates,
            vec![(0, true)]
        );
        assert!(!h.server.context_mut().devices.is_suspended(in_idx));

        // Output still waiting out the delay.
        assert!(h.server.context_mut().devices.is_suspended(out_idx));
        assert!(h.server.context_mut().policy.has_pending_switch(D1));
        assert!(output_state(&h).lock().unwrap().active_node_updates.is_empty());

        h.tick(500).await;

        assert_eq!(
            output_state(&h).lock().unwrap().active_node_updates,
            vec![(0, true)]
        );
        assert!(!h.server.context_mut().devices.is_suspended(out_idx));
        assert!(!h.server.context_mut().policy.has_pending_switch(D1));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_switches_coalesce_to_one_resume() {
        let mut h = connected_harness().await;
        let sender = h.server.sender();

        for _ in 0..3 {
            policy::post_switch_profile(&sender, D1.to_string(), None).unwrap();
            h.server.drain();
            h.tick(100).await;
        }

        // 300 ms after the first request: the last one is still pending.
        assert!(h.server.context_mut().policy.has_pending_switch(D1));
        assert!(output_state(&h).lock().unwrap().active_node_updates.is_empty());

        // 500 ms after the last request the single resume fires.
        h.tick(400).await;
        assert_eq!(
            output_state(&h).lock().unwrap().active_node_updates,
            vec![(0, true)]
        );
        assert!(!h.server.context_mut().policy.has_pending_switch(D1));
    }

    #[tokio::test(start_paused = true)]
    async fn switch_timer_guards_against_device_removal() {
        let mut h = connected_harness().await;
        let sender = h.server.sender();

        policy::post_switch_profile(&sender, D1.to_string(), None).unwrap();
        h.server.drain();

        bluetooth::remove_device(h.server.context_mut(), D1);
        h.tick(500).await;

        // The delayed resume found neither device nor iodev and did
        // nothing.
        assert!(output_state(&h).lock().unwrap().active_node_updates.is_empty());
        assert!(!h.server.context_mut().policy.has_pending_switch(D1));
        assert!(h.server.context_mut().devices.is_empty());
    }
}

mod suspend {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn schedule_is_idempotent_first_reason_wins() {
        let mut h = Harness::new();
        h.announce_audio_device(D1);
        let ctx = h.server.context_mut();
        let timers_before = ctx.timers.pending();

        policy::schedule_suspend(ctx, D1, 5_000, SuspendReason::HfpScoSocketError);
        policy::schedule_suspend(ctx, D1, 5_000, SuspendReason::A2dpTxFatalError);

        assert_eq!(
            ctx.policy.pending_suspend_reason(D1),
            Some(SuspendReason::HfpScoSocketError)
        );
        assert_eq!(ctx.timers.pending(), timers_before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_then_schedule_leaves_one_pending() {
        let mut h = Harness::new();
        h.announce_audio_device(D1);
        let ctx = h.server.context_mut();
        let timers_before = ctx.timers.pending();

        policy::schedule_suspend(ctx, D1, 5_000, SuspendReason::A2dpLongTxFailure);
        policy::cancel_suspend(ctx, D1);
        assert_eq!(ctx.policy.pending_suspend_reason(D1), None);

        policy::schedule_suspend(ctx, D1, 5_000, SuspendReason::UnexpectedProfileDrop);
        assert_eq!(
            ctx.policy.pending_suspend_reason(D1),
            Some(SuspendReason::UnexpectedProfileDrop)
        );
        assert_eq!(ctx.timers.pending(), timers_before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_for_unregistered_device_dropped() {
        let mut h = Harness::new();
        let ctx = h.server.context_mut();

        policy::schedule_suspend(ctx, "/bt/ghost", 0, SuspendReason::HfpScoSocketError);

        assert_eq!(ctx.policy.pending_suspend_reason("/bt/ghost"), None);
        assert_eq!(ctx.timers.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn profile_drop_triggers_suspend_chain() {
        let mut h = Harness::new();
        h.connect_happy(D1).await;

        bluetooth::notify_profile_dropped(
            h.server.context_mut(),
            D1,
            Profile::HFP_HANDSFREE,
        );
        assert_eq!(
            h.server.context_mut().policy.pending_suspend_reason(D1),
            Some(SuspendReason::UnexpectedProfileDrop)
        );

        h.tick(1).await;

        let log = h.profiles.lock().unwrap();
        assert_eq!(log.a2dp_suspends, 1);
        assert_eq!(log.hfp_suspends, 1);
        drop(log);
        assert_eq!(h.commands.lock().unwrap().disconnect, vec![D1.to_string()]);
    }
}

mod message_bus {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn worker_messages_reach_policy_handler() {
        let mut h = Harness::new();
        h.announce_audio_device(D1);
        let sender = h.server.sender();

        let handle = std::thread::spawn(move || {
            policy::post_schedule_suspend(
                &sender,
                D1.to_string(),
                10_000,
                SuspendReason::HfpScoSocketError,
            )
            .unwrap();
        });
        handle.join().unwrap();

        assert_eq!(h.server.drain(), 1);
        assert_eq!(
            h.server.context_mut().policy.pending_suspend_reason(D1),
            Some(SuspendReason::HfpScoSocketError)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn removed_handler_drops_messages_silently() {
        let mut h = Harness::new();
        h.announce_audio_device(D1);
        let sender = h.server.sender();

        assert!(policy::stop(h.server.bus_mut()));

        policy::post_schedule_suspend(
            &sender,
            D1.to_string(),
            10_000,
            SuspendReason::HfpScoSocketError,
        )
        .unwrap();
        h.server.drain();

        assert_eq!(h.server.context_mut().policy.pending_suspend_reason(D1), None);
    }
}

mod sco {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn refcount_pairs_bound_the_link() {
        let mut h = Harness::new();
        h.announce_audio_device(D1);
        let dev = h.server.context_mut().bt.get_mut(D1).unwrap();

        dev.get_sco(ScoCodec::Cvsd).unwrap();
        dev.get_sco(ScoCodec::Cvsd).unwrap();

        dev.put_sco();
        assert_eq!(dev.sco_codec(), Some(ScoCodec::Cvsd));

        dev.put_sco();
        assert_eq!(dev.sco_codec(), None);
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn shutdown_clears_timers_records_and_handlers() {
        let mut h = Harness::new();
        h.announce_audio_device(D1);
        policy::schedule_suspend(
            h.server.context_mut(),
            D1,
            60_000,
            SuspendReason::A2dpLongTxFailure,
        );
        assert!(h.server.context_mut().timers.pending() > 0);

        h.server.shutdown();

        let ctx = h.server.context_mut();
        assert_eq!(ctx.timers.pending(), 0);
        assert!(ctx.policy.is_empty());
        assert!(ctx.bt.is_empty());

        // Messages after shutdown are dropped without effect.
        let sender = h.server.sender();
        policy::post_schedule_suspend(&sender, D1.to_string(), 0, SuspendReason::A2dpTxFatalError)
            .unwrap();
        h.server.drain();
        assert!(h.server.context_mut().policy.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_unplugs_and_cancels_records() {
        let mut h = Harness::new();
        h.connect_happy(D1).await;
        policy::schedule_suspend(
            h.server.context_mut(),
            D1,
            60_000,
            SuspendReason::A2dpLongTxFailure,
        );

        bluetooth::handle_bus_event(
            h.server.context_mut(),
            BusEvent::PropertiesChanged {
                path: D1.to_string(),
                changed: DeviceProperties {
                    connected: Some(false),
                    ..Default::default()
                },
                invalidated: Vec::new(),
            },
        );

        let ctx = h.server.context_mut();
        assert_eq!(ctx.policy.pending_suspend_reason(D1), None);
        assert!(!ctx.policy.has_watch(D1));
        // Transports torn down; the registry entry survives until the
        // interface is removed.
        assert!(ctx.bt.contains(D1));
        assert!(ctx.devices.is_empty());
    }
}
