//! Example: connection lifecycle machine with a link-supervision parent

use std::collections::HashMap;
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hsm_rt::{Handled, Message, State, StateId, StateMachine, StateOps};
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONNECT_REQ: i32 = 1;
const LINK_UP: i32 = 2;
const LINK_DOWN: i32 = 3;
const CONNECT_TIMEOUT: i32 = 4;

type Targets = Arc<Mutex<HashMap<i32, StateId>>>;

/// Parent of every connection state; owns link-loss handling.
struct Link {
    targets: Targets,
}

impl State for Link {
    fn name(&self) -> &str {
        "link"
    }

    fn handle(&mut self, msg: &Message, ops: &mut StateOps<'_>) -> Handled {
        if msg.name() == LINK_DOWN {
            info!("link lost, returning to idle");
            let idle = self.targets.lock().unwrap()[&LINK_DOWN];
            ops.switch_state(idle).unwrap();
            return Handled::Yes;
        }
        Handled::No
    }
}

struct Idle {
    targets: Targets,
}

impl State for Idle {
    fn name(&self) -> &str {
        "idle"
    }

    fn handle(&mut self, msg: &Message, ops: &mut StateOps<'_>) -> Handled {
        if msg.name() == CONNECT_REQ {
            if let Some(ssid) = msg.payload::<String>() {
                info!(ssid = %ssid, "connect requested");
            }
            let connecting = self.targets.lock().unwrap()[&CONNECT_REQ];
            ops.switch_state(connecting).unwrap();
            return Handled::Yes;
        }
        Handled::No
    }
}

struct Connecting {
    targets: Targets,
}

impl State for Connecting {
    fn name(&self) -> &str {
        "connecting"
    }

    fn enter(&mut self, ops: &mut StateOps<'_>) {
        ops.start_timer(CONNECT_TIMEOUT, 500).unwrap();
    }

    fn exit(&mut self, ops: &mut StateOps<'_>) {
        ops.stop_timer(CONNECT_TIMEOUT);
    }

    fn handle(&mut self, msg: &Message, ops: &mut StateOps<'_>) -> Handled {
        match msg.name() {
            LINK_UP => {
                let connected = self.targets.lock().unwrap()[&LINK_UP];
                ops.switch_state(connected).unwrap();
                Handled::Yes
            }
            CONNECT_TIMEOUT => {
                info!("association timed out");
                let idle = self.targets.lock().unwrap()[&LINK_DOWN];
                ops.switch_state(idle).unwrap();
                Handled::Yes
            }
            _ => Handled::No,
        }
    }
}

struct Connected {
    up_tx: Sender<()>,
}

impl State for Connected {
    fn name(&self) -> &str {
        "connected"
    }

    fn enter(&mut self, _ops: &mut StateOps<'_>) {
        info!("link established");
        let _ = self.up_tx.send(());
    }

    fn handle(&mut self, _msg: &Message, _ops: &mut StateOps<'_>) -> Handled {
        Handled::No
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let targets: Targets = Default::default();
    let (up_tx, up_rx) = channel();

    let mut machine = StateMachine::new("wlan0");
    let link = machine
        .add_state(Box::new(Link { targets: targets.clone() }), None)
        .unwrap();
    let idle = machine
        .add_state(Box::new(Idle { targets: targets.clone() }), Some(link))
        .unwrap();
    let connecting = machine
        .add_state(Box::new(Connecting { targets: targets.clone() }), Some(link))
        .unwrap();
    let connected = machine
        .add_state(Box::new(Connected { up_tx }), Some(link))
        .unwrap();
    {
        let mut targets = targets.lock().unwrap();
        targets.insert(CONNECT_REQ, connecting);
        targets.insert(LINK_UP, connected);
        targets.insert(LINK_DOWN, idle);
    }
    machine.set_initial_state(idle).unwrap();
    machine.start().unwrap();

    machine
        .send_with_payload(CONNECT_REQ, "home-network".to_string())
        .unwrap();
    machine.send_later(LINK_UP, 100).unwrap();
    up_rx.recv().unwrap();
    info!(chain = ?machine.active_states(), "steady state");

    // Drop the link; the parent state takes us back to idle.
    machine.send(LINK_DOWN).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    info!(chain = ?machine.active_states(), "after link loss");

    machine.stop_handler_thread();
}
