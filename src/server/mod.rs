//! The main-thread runtime.
//!
//! One task owns every piece of mutable policy state: the device list,
//! the Bluetooth registry, the policy records and the timer wheel. It
//! multiplexes the message bus against the earliest timer deadline, so
//! handlers and timer callbacks always run with exclusive access to
//! [`ServerContext`] and no locking anywhere.

/// Typed main-thread message bus.
pub mod message;
/// One-shot timer manager.
pub mod timer;

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{BluetoothConfig, Config};
use crate::services::audio::DeviceList;
use crate::services::bluetooth::{
    self, A2dpPolicy, BtCommander, BtPolicy, BtRegistry, HfpAgPolicy,
};

use message::{MainMessage, MainSender, MessageBus};
use timer::TimerManager;

/// Everything the main thread owns. Handlers and timer callbacks receive
/// exclusive access to this.
pub struct ServerContext {
    /// Bluetooth policy tuning.
    pub config: BluetoothConfig,
    /// The set of audio devices.
    pub devices: DeviceList,
    /// The Bluetooth device registry.
    pub bt: BtRegistry,
    /// Bluetooth policy records.
    pub policy: BtPolicy,
    /// The timer wheel.
    pub timers: TimerManager<ServerContext>,
    /// A2DP collaborator.
    pub a2dp: Box<dyn A2dpPolicy>,
    /// HFP audio gateway collaborator.
    pub hfp_ag: Box<dyn HfpAgPolicy>,
}

impl ServerContext {
    /// Builds a context from configuration and collaborators.
    pub fn new(
        config: BluetoothConfig,
        commander: Arc<dyn BtCommander>,
        a2dp: Box<dyn A2dpPolicy>,
        hfp_ag: Box<dyn HfpAgPolicy>,
    ) -> Self {
        Self {
            config,
            devices: DeviceList::new(),
            bt: BtRegistry::new(commander),
            policy: BtPolicy::new(),
            timers: TimerManager::new(),
            a2dp,
            hfp_ag,
        }
    }

    /// Runs every timer whose deadline has passed.
    pub fn run_due_timers(&mut self) {
        for callback in self.timers.take_due(Instant::now()) {
            callback(self);
        }
    }
}

/// The daemon's main loop.
pub struct Server {
    ctx: ServerContext,
    bus: MessageBus<ServerContext>,
    rx: UnboundedReceiver<MainMessage>,
    sender: MainSender,
}

impl Server {
    /// Builds a server from configuration and collaborators.
    pub fn new(
        config: &Config,
        commander: Arc<dyn BtCommander>,
        a2dp: Box<dyn A2dpPolicy>,
        hfp_ag: Box<dyn HfpAgPolicy>,
    ) -> Self {
        let (sender, rx) = message::channel();
        Self {
            ctx: ServerContext::new(config.bluetooth.clone(), commander, a2dp, hfp_ag),
            bus: MessageBus::new(),
            rx,
            sender,
        }
    }

    /// A sender handle for worker contexts.
    pub fn sender(&self) -> MainSender {
        self.sender.clone()
    }

    /// The main-thread state. Exposed for the daemon's wiring and for
    /// tests.
    pub fn context_mut(&mut self) -> &mut ServerContext {
        &mut self.ctx
    }

    /// The handler table.
    pub fn bus_mut(&mut self) -> &mut MessageBus<ServerContext> {
        &mut self.bus
    }

    /// Registers the built-in handlers: Bluetooth policy and the registry
    /// glue.
    pub fn start(&mut self) {
        bluetooth::policy::start(&mut self.bus);
        bluetooth::start(&mut self.bus);
        info!("server started");
    }

    /// Dispatches already-queued messages without waiting, then runs due
    /// timers. Returns the number of messages handled.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.rx.try_recv() {
            self.bus.dispatch(msg, &mut self.ctx);
            handled += 1;
        }
        self.ctx.run_due_timers();
        handled
    }

    /// Runs until every sender is dropped, then shuts down.
    pub async fn run(&mut self) {
        loop {
            let deadline = self.ctx.timers.next_deadline();
            tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(msg) => self.bus.dispatch(msg, &mut self.ctx),
                    None => break,
                },
                () = sleep_until(deadline) => self.ctx.run_due_timers(),
            }
        }
        self.shutdown();
    }

    /// Cancels outstanding timers, empties the policy lists and removes
    /// every message-bus handler, in that order.
    pub fn shutdown(&mut self) {
        debug!("server shutting down");
        self.ctx.timers.clear();
        bluetooth::policy::reset(&mut self.ctx);
        self.bus.clear();
        self.ctx.bt.reset();
        info!("server stopped");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}
