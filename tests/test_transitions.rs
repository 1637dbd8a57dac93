use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hsm_rt::{Error, Handled, Message, State, StateId, StateMachine, StateOps};

const CONNECT_REQ: i32 = 1;
const LINK_UP: i32 = 2;
const HOP: i32 = 3;
const REFRESH: i32 = 4;
const GO: i32 = 5;
const TRY_BOGUS: i32 = 6;

type Routes = Arc<Mutex<HashMap<i32, StateId>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Probe {
    Enter(&'static str),
    Exit(&'static str),
}

/// Probe state that switches to a routed target when it consumes a
/// message. Routes are filled in after registration, once ids exist.
struct Router {
    name: &'static str,
    routes: Routes,
    tx: Sender<Probe>,
}

impl Router {
    fn boxed(name: &'static str, routes: &Routes, tx: &Sender<Probe>) -> Box<Self> {
        Box::new(Self {
            name,
            routes: routes.clone(),
            tx: tx.clone(),
        })
    }
}

impl State for Router {
    fn name(&self) -> &str {
        self.name
    }

    fn enter(&mut self, _ops: &mut StateOps<'_>) {
        let _ = self.tx.send(Probe::Enter(self.name));
    }

    fn exit(&mut self, _ops: &mut StateOps<'_>) {
        let _ = self.tx.send(Probe::Exit(self.name));
    }

    fn handle(&mut self, msg: &Message, ops: &mut StateOps<'_>) -> Handled {
        let target = self.routes.lock().unwrap().get(&msg.name()).copied();
        match target {
            Some(target) => {
                ops.switch_state(target).unwrap();
                Handled::Yes
            }
            None => Handled::No,
        }
    }
}

fn next(rx: &Receiver<Probe>) -> Probe {
    rx.recv_timeout(Duration::from_secs(2)).expect("probe event")
}

fn assert_quiet(rx: &Receiver<Probe>) {
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

fn wait_chain(machine: &StateMachine, expected: &[&str]) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if machine.active_states() == expected {
            return;
        }
        assert!(Instant::now() < deadline, "active chain never became {expected:?}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn connection_scenario_idle_connecting_connected() {
    let (tx, rx) = channel();
    let routes: Routes = Arc::new(Mutex::new(HashMap::new()));

    let mut machine = StateMachine::new("wlan");
    let root = machine.add_state(Router::boxed("root", &routes, &tx), None).unwrap();
    let idle = machine
        .add_state(Router::boxed("idle", &routes, &tx), Some(root))
        .unwrap();
    let connecting = machine
        .add_state(Router::boxed("connecting", &routes, &tx), Some(root))
        .unwrap();
    let connected = machine
        .add_state(Router::boxed("connected", &routes, &tx), Some(root))
        .unwrap();
    routes.lock().unwrap().insert(CONNECT_REQ, connecting);
    routes.lock().unwrap().insert(LINK_UP, connected);
    machine.set_initial_state(idle).unwrap();
    machine.start().unwrap();

    assert_eq!(next(&rx), Probe::Enter("root"));
    assert_eq!(next(&rx), Probe::Enter("idle"));

    machine.send(CONNECT_REQ).unwrap();
    assert_eq!(next(&rx), Probe::Exit("idle"));
    assert_eq!(next(&rx), Probe::Enter("connecting"));
    wait_chain(&machine, &["root", "connecting"]);

    machine.send(LINK_UP).unwrap();
    assert_eq!(next(&rx), Probe::Exit("connecting"));
    assert_eq!(next(&rx), Probe::Enter("connected"));
    wait_chain(&machine, &["root", "connected"]);

    machine.stop_handler_thread();
}

#[test]
fn common_ancestors_above_the_lca_are_untouched() {
    let (tx, rx) = channel();
    let routes_a1: Routes = Arc::new(Mutex::new(HashMap::new()));
    let routes_a2: Routes = Arc::new(Mutex::new(HashMap::new()));

    let mut machine = StateMachine::new("hop");
    let link = machine
        .add_state(Router::boxed("link", &routes_a1, &tx), None)
        .unwrap();
    let a1 = machine
        .add_state(Router::boxed("a1", &routes_a1, &tx), Some(link))
        .unwrap();
    let a2 = machine
        .add_state(Router::boxed("a2", &routes_a2, &tx), Some(link))
        .unwrap();
    routes_a1.lock().unwrap().insert(HOP, a2);
    routes_a2.lock().unwrap().insert(HOP, a1);
    machine.set_initial_state(a1).unwrap();
    machine.start().unwrap();

    assert_eq!(next(&rx), Probe::Enter("link"));
    assert_eq!(next(&rx), Probe::Enter("a1"));

    machine.send(HOP).unwrap();
    assert_eq!(next(&rx), Probe::Exit("a1"));
    assert_eq!(next(&rx), Probe::Enter("a2"));

    machine.send(HOP).unwrap();
    assert_eq!(next(&rx), Probe::Exit("a2"));
    assert_eq!(next(&rx), Probe::Enter("a1"));

    // The shared parent never cycles.
    assert_quiet(&rx);

    machine.stop_handler_thread();
}

#[test]
fn switching_to_the_current_leaf_is_a_noop() {
    let (tx, rx) = channel();
    let routes: Routes = Arc::new(Mutex::new(HashMap::new()));

    let mut machine = StateMachine::new("self-switch");
    let root = machine.add_state(Router::boxed("root", &routes, &tx), None).unwrap();
    let leaf = machine
        .add_state(Router::boxed("leaf", &routes, &tx), Some(root))
        .unwrap();
    routes.lock().unwrap().insert(REFRESH, leaf);
    machine.set_initial_state(leaf).unwrap();
    machine.start().unwrap();

    assert_eq!(next(&rx), Probe::Enter("root"));
    assert_eq!(next(&rx), Probe::Enter("leaf"));

    machine.send(REFRESH).unwrap();
    machine.send(REFRESH).unwrap();
    assert_quiet(&rx);
    wait_chain(&machine, &["root", "leaf"]);

    machine.stop_handler_thread();
}

#[test]
fn entry_can_immediately_redirect() {
    /// Guard state whose entry always forwards the machine elsewhere.
    struct Redirect {
        name: &'static str,
        target: Arc<Mutex<Option<StateId>>>,
        tx: Sender<Probe>,
    }

    impl State for Redirect {
        fn name(&self) -> &str {
            self.name
        }

        fn enter(&mut self, ops: &mut StateOps<'_>) {
            let _ = self.tx.send(Probe::Enter(self.name));
            if let Some(target) = *self.target.lock().unwrap() {
                ops.switch_state(target).unwrap();
            }
        }

        fn exit(&mut self, _ops: &mut StateOps<'_>) {
            let _ = self.tx.send(Probe::Exit(self.name));
        }

        fn handle(&mut self, _msg: &Message, _ops: &mut StateOps<'_>) -> Handled {
            Handled::No
        }
    }

    let (tx, rx) = channel();
    let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
    let redirect_target = Arc::new(Mutex::new(None));

    let mut machine = StateMachine::new("guard");
    let root = machine.add_state(Router::boxed("root", &routes, &tx), None).unwrap();
    let idle = machine
        .add_state(Router::boxed("idle", &routes, &tx), Some(root))
        .unwrap();
    let guard = machine
        .add_state(
            Box::new(Redirect {
                name: "guard",
                target: redirect_target.clone(),
                tx: tx.clone(),
            }),
            Some(root),
        )
        .unwrap();
    let done = machine
        .add_state(Router::boxed("done", &routes, &tx), Some(root))
        .unwrap();
    routes.lock().unwrap().insert(GO, guard);
    *redirect_target.lock().unwrap() = Some(done);
    machine.set_initial_state(idle).unwrap();
    machine.start().unwrap();

    assert_eq!(next(&rx), Probe::Enter("root"));
    assert_eq!(next(&rx), Probe::Enter("idle"));

    machine.send(GO).unwrap();
    assert_eq!(next(&rx), Probe::Exit("idle"));
    assert_eq!(next(&rx), Probe::Enter("guard"));
    assert_eq!(next(&rx), Probe::Exit("guard"));
    assert_eq!(next(&rx), Probe::Enter("done"));
    wait_chain(&machine, &["root", "done"]);

    machine.stop_handler_thread();
}

#[test]
fn unregistered_target_is_rejected_and_chain_unchanged() {
    struct BadSwitcher {
        bogus: StateId,
        result_tx: Sender<Result<(), Error>>,
    }

    impl State for BadSwitcher {
        fn name(&self) -> &str {
            "bad-switcher"
        }

        fn handle(&mut self, msg: &Message, ops: &mut StateOps<'_>) -> Handled {
            if msg.name() == TRY_BOGUS {
                let _ = self.result_tx.send(ops.switch_state(self.bogus));
                return Handled::Yes;
            }
            Handled::No
        }
    }

    // Ids are arena indices: one issued by a larger machine is out of
    // range for this one.
    let (other_tx, _other_rx) = channel();
    let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
    let mut other = StateMachine::new("other");
    for name in ["w", "x", "y", "z"] {
        other.add_state(Router::boxed(name, &routes, &other_tx), None).unwrap();
    }
    let bogus = other
        .add_state(Router::boxed("beyond", &routes, &other_tx), None)
        .unwrap();

    let (tx, rx) = channel();
    let (result_tx, result_rx) = channel();
    let mut machine = StateMachine::new("strict");
    let root = machine.add_state(Router::boxed("root", &routes, &tx), None).unwrap();
    let leaf = machine
        .add_state(Box::new(BadSwitcher { bogus, result_tx }), Some(root))
        .unwrap();
    machine.set_initial_state(leaf).unwrap();
    machine.start().unwrap();

    assert_eq!(next(&rx), Probe::Enter("root"));
    wait_chain(&machine, &["root", "bad-switcher"]);

    machine.send(TRY_BOGUS).unwrap();
    let result = result_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(matches!(result, Err(Error::UnknownState(_))));
    wait_chain(&machine, &["root", "bad-switcher"]);

    machine.stop_handler_thread();
}

#[test]
fn every_enter_is_paired_with_a_single_exit() {
    const TO_X2: i32 = 21;
    const TO_Y: i32 = 22;
    const TO_X1: i32 = 23;

    let (tx, rx) = channel();
    let routes: Routes = Arc::new(Mutex::new(HashMap::new()));

    let mut machine = StateMachine::new("pairing");
    let root = machine.add_state(Router::boxed("root", &routes, &tx), None).unwrap();
    let x = machine
        .add_state(Router::boxed("x", &routes, &tx), Some(root))
        .unwrap();
    let x1 = machine
        .add_state(Router::boxed("x1", &routes, &tx), Some(x))
        .unwrap();
    let x2 = machine
        .add_state(Router::boxed("x2", &routes, &tx), Some(x))
        .unwrap();
    let y = machine
        .add_state(Router::boxed("y", &routes, &tx), Some(root))
        .unwrap();
    {
        let mut routes = routes.lock().unwrap();
        routes.insert(TO_X2, x2);
        routes.insert(TO_Y, y);
        routes.insert(TO_X1, x1);
    }
    machine.set_initial_state(x1).unwrap();
    machine.start().unwrap();

    machine.send(TO_X2).unwrap();
    machine.send(TO_Y).unwrap();
    machine.send(TO_X1).unwrap();

    let expected = [
        Probe::Enter("root"),
        Probe::Enter("x"),
        Probe::Enter("x1"),
        // x1 -> x2: siblings under x.
        Probe::Exit("x1"),
        Probe::Enter("x2"),
        // x2 -> y: leaves the x subtree entirely.
        Probe::Exit("x2"),
        Probe::Exit("x"),
        Probe::Enter("y"),
        // y -> x1: re-enters the x subtree top-down.
        Probe::Exit("y"),
        Probe::Enter("x"),
        Probe::Enter("x1"),
    ];
    for want in expected {
        assert_eq!(next(&rx), want);
    }
    wait_chain(&machine, &["root", "x", "x1"]);

    machine.stop_handler_thread();
}
