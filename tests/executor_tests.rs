//! Execution manager and runner behaviour on a live worker pool.

use parking_lot::Mutex;
use protocol_sm::checkpoint::ResumeState;
use protocol_sm::core::{Response, State, TIMEOUT};
use protocol_sm::executor::{ErrorHandler, ExecutionManager, ExecutorConfig, InterpRunner};
use protocol_sm::interp::RunStatus;
use protocol_sm::{event_categories, Action, Event, Interpreter, Machine, PsmError, Terminal, Wait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

const SHOULD_NOT: Duration = Duration::from_secs(5);

event_categories! {
    TICK = "Tick";
    NOTED = "Noted";
    FINISH = "Finish";
    MOVE = "Move";
}

fn started(config: ExecutorConfig) -> Arc<ExecutionManager> {
    let manager = Arc::new(ExecutionManager::new(config).unwrap());
    manager.start().unwrap();
    manager
}

fn to_channel(tx: &mpsc::Sender<PsmError>) -> Option<ErrorHandler> {
    let tx = tx.clone();
    Some(Box::new(move |err: PsmError| {
        let _ = tx.send(err);
    }))
}

type Seen = Arc<Mutex<Vec<u64>>>;

fn collector() -> Arc<Machine<Seen>> {
    Arc::new(
        Machine::new(
            "Collect",
            vec![
                State::new("Collect")
                    .respond(Response::action(
                        &TICK,
                        Action::call("note", |event, interp: &mut Interpreter<Seen>| {
                            let value = event.user_val().unwrap_or_default();
                            interp.context().lock().push(value);
                            Ok(Event::new(&NOTED))
                        }),
                    ))
                    .respond(Response::wait(&NOTED, Wait::Forever))
                    .respond(Response::transition(&FINISH, "Done")),
                State::new("Done").succeed(),
            ],
            "Collect",
        )
        .unwrap(),
    )
}

#[test]
fn submit_blocks_while_pool_is_saturated() {
    let config = ExecutorConfig::builder()
        .min_threads(1)
        .max_threads(2)
        .build()
        .unwrap();
    let manager = started(config);

    let (release, gate) = mpsc::channel::<()>();
    let gate = Arc::new(Mutex::new(gate));
    for _ in 0..2 {
        let gate = Arc::clone(&gate);
        manager
            .submit(move || {
                let _ = gate.lock().recv();
            })
            .unwrap();
    }
    assert_eq!(manager.in_flight(), 2);

    let submitted = Arc::new(AtomicBool::new(false));
    let blocked = {
        let manager = Arc::clone(&manager);
        let submitted = Arc::clone(&submitted);
        thread::spawn(move || {
            manager.submit(|| {}).unwrap();
            submitted.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!submitted.load(Ordering::SeqCst));

    release.send(()).unwrap();
    blocked.join().unwrap();
    assert!(submitted.load(Ordering::SeqCst));

    release.send(()).unwrap();
    manager.stop();
}

#[test]
fn stop_abandons_in_flight_work() {
    let manager = started(ExecutorConfig::minimal());
    manager
        .submit(|| thread::sleep(Duration::from_millis(200)))
        .unwrap();
    manager.stop();

    assert!(!manager.is_running());
    assert_eq!(manager.in_flight(), 0);
    manager.stop();
}

#[test]
fn timer_work_on_saturated_pool_does_not_wedge_it() {
    let config = ExecutorConfig::builder()
        .min_threads(1)
        .max_threads(1)
        .build()
        .unwrap();
    let manager = started(config);
    let (tx, rx) = mpsc::channel();

    manager
        .submit(|| thread::sleep(Duration::from_millis(200)))
        .unwrap();
    {
        let poster = Arc::clone(&manager);
        let tx = tx.clone();
        manager
            .schedule(Duration::from_millis(20), move || {
                poster.execute(move || tx.send("posted").unwrap()).unwrap();
            })
            .unwrap();
    }

    thread::sleep(Duration::from_millis(60));
    manager.submit(move || tx.send("submitted").unwrap()).unwrap();

    let mut done = vec![
        rx.recv_timeout(SHOULD_NOT).unwrap(),
        rx.recv_timeout(SHOULD_NOT).unwrap(),
    ];
    done.sort();
    assert_eq!(done, vec!["posted", "submitted"]);
    assert!(wait_until(|| manager.in_flight() == 0));
    manager.stop();
}

#[test]
fn deadline_reaches_runner_while_pool_is_saturated() {
    let config = ExecutorConfig::builder()
        .min_threads(1)
        .max_threads(1)
        .runner_idle_time(Duration::from_millis(10))
        .build()
        .unwrap();
    let manager = started(config);
    let runner = InterpRunner::new(
        Arc::clone(&manager),
        Interpreter::new(timed(Duration::from_millis(100)), ()),
    );

    runner.enqueue_start(None).unwrap();
    assert!(runner.wait_idle(SHOULD_NOT));
    // Let the runner give its worker back before occupying it.
    thread::sleep(Duration::from_millis(40));
    manager
        .submit(|| thread::sleep(Duration::from_millis(200)))
        .unwrap();

    thread::sleep(Duration::from_millis(80));
    let (tx, rx) = mpsc::channel();
    manager.submit(move || tx.send(()).unwrap()).unwrap();

    assert!(rx.recv_timeout(SHOULD_NOT).is_ok());
    assert!(runner.wait_final(SHOULD_NOT));
    assert_eq!(runner.final_state().as_deref(), Some("Expired"));
    manager.stop();
}

fn wait_until(done: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + SHOULD_NOT;
    while std::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn runner_processes_events_in_enqueue_order() {
    let manager = started(ExecutorConfig::minimal());
    let seen: Seen = Arc::default();
    let runner = InterpRunner::new(
        Arc::clone(&manager),
        Interpreter::new(collector(), Arc::clone(&seen)),
    );
    let (tx, rx) = mpsc::channel();

    runner.enqueue_start(to_channel(&tx)).unwrap();
    for value in 0..50 {
        runner
            .enqueue_event(Event::new(&TICK).with_user_val(value), to_channel(&tx))
            .unwrap();
    }
    assert!(runner.wait_idle(SHOULD_NOT));

    assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    assert!(runner.is_waiting());
    assert_eq!(runner.current_state().as_deref(), Some("Collect"));

    runner.enqueue_event(Event::new(&FINISH), to_channel(&tx)).unwrap();
    assert!(runner.wait_final(SHOULD_NOT));
    assert_eq!(runner.status(), RunStatus::Final(Terminal::Success));
    assert!(rx.try_recv().is_err());
    manager.stop();
}

#[test]
fn lifecycle_misuse_fails_synchronously() {
    let manager = started(ExecutorConfig::minimal());
    let runner = InterpRunner::new(
        Arc::clone(&manager),
        Interpreter::new(collector(), Seen::default()),
    );

    assert!(matches!(
        runner.enqueue_event(Event::new(&TICK), None),
        Err(PsmError::NotStarted)
    ));
    assert!(matches!(
        runner.enqueue_resume(ResumeState::new("Collect", None), None),
        Err(PsmError::IllegalResumptionState(_))
    ));

    runner.enqueue_start(None).unwrap();
    assert!(matches!(
        runner.enqueue_start(None),
        Err(PsmError::AlreadyStarted)
    ));
    assert!(matches!(
        runner.enqueue_resume(ResumeState::new("Collect", Some("Collect".into())), None),
        Err(PsmError::AlreadyStarted)
    ));
    manager.stop();
}

#[test]
fn asynchronous_errors_reach_handler() {
    let manager = started(ExecutorConfig::minimal());
    let runner = InterpRunner::new(
        Arc::clone(&manager),
        Interpreter::new(collector(), Seen::default()),
    );
    let (tx, rx) = mpsc::channel();

    runner.enqueue_start(to_channel(&tx)).unwrap();
    runner.enqueue_event(Event::new(&MOVE), to_channel(&tx)).unwrap();

    match rx.recv_timeout(SHOULD_NOT) {
        Ok(PsmError::UnknownEvent { state, event }) => {
            assert_eq!(state, "Collect");
            assert_eq!(event, "Move");
        }
        other => panic!("expected UnknownEvent, got {other:?}"),
    }

    // Without a handler the error is only logged; later events still run.
    runner.enqueue_event(Event::new(&MOVE), None).unwrap();
    runner.enqueue_event(Event::new(&FINISH), to_channel(&tx)).unwrap();
    assert!(runner.wait_final(SHOULD_NOT));
    manager.stop();
}

#[test]
fn follow_up_runs_after_event() {
    let manager = started(ExecutorConfig::minimal());
    let seen: Seen = Arc::default();
    let runner = InterpRunner::new(
        Arc::clone(&manager),
        Interpreter::new(collector(), Arc::clone(&seen)),
    );
    let (tx, rx) = mpsc::channel();

    runner.enqueue_start(None).unwrap();
    runner
        .enqueue_event_then(Event::new(&TICK).with_user_val(7), None, move |interp| {
            let observed = interp.context().lock().clone();
            tx.send(observed).unwrap();
        })
        .unwrap();

    assert_eq!(rx.recv_timeout(SHOULD_NOT).unwrap(), vec![7]);
    manager.stop();
}

#[test]
fn resumed_runner_starts_in_saved_state() {
    let machine = Arc::new(
        Machine::<()>::new(
            "Resumable",
            vec![
                State::new("Start").respond(Response::transition(&MOVE, "Middle")),
                State::new("Middle")
                    .resumable()
                    .respond(Response::transition(&FINISH, "Done")),
                State::new("Done").succeed(),
            ],
            "Start",
        )
        .unwrap(),
    );
    let manager = started(ExecutorConfig::minimal());
    let runner = InterpRunner::new(Arc::clone(&manager), Interpreter::new(machine, ()));

    runner
        .enqueue_resume(ResumeState::new("Resumable", Some("Middle".into())), None)
        .unwrap();
    assert!(runner.wait_idle(SHOULD_NOT));
    assert_eq!(runner.current_state().as_deref(), Some("Middle"));

    runner.enqueue_event(Event::new(&FINISH), None).unwrap();
    assert!(runner.wait_final(SHOULD_NOT));
    assert_eq!(runner.final_state().as_deref(), Some("Done"));
    manager.stop();
}

fn timed(first_wait: Duration) -> Arc<Machine<()>> {
    Arc::new(
        Machine::new(
            "Timed",
            vec![
                State::new("First")
                    .entry_wait(Wait::After(first_wait))
                    .respond(Response::transition(&MOVE, "Second"))
                    .respond(Response::transition(&TIMEOUT, "Expired")),
                State::new("Second")
                    .respond(Response::transition(&TIMEOUT, "Expired"))
                    .respond(Response::transition(&FINISH, "Done")),
                State::new("Expired").fail(),
                State::new("Done").succeed(),
            ],
            "First",
        )
        .unwrap(),
    )
}

#[test]
fn deadline_delivers_timeout() {
    let manager = started(ExecutorConfig::minimal());
    let runner = InterpRunner::new(
        Arc::clone(&manager),
        Interpreter::new(timed(Duration::from_millis(30)), ()),
    );

    runner.enqueue_start(None).unwrap();
    assert!(runner.wait_final(SHOULD_NOT));
    assert_eq!(runner.status(), RunStatus::Final(Terminal::Failure));
    assert_eq!(runner.final_state().as_deref(), Some("Expired"));
    manager.stop();
}

#[test]
fn stale_deadline_has_no_effect_on_next_state() {
    let manager = started(ExecutorConfig::minimal());
    let runner = InterpRunner::new(
        Arc::clone(&manager),
        Interpreter::new(timed(Duration::from_millis(50)), ()),
    );

    runner.enqueue_start(None).unwrap();
    thread::sleep(Duration::from_millis(10));
    runner.enqueue_event(Event::new(&MOVE), None).unwrap();

    thread::sleep(Duration::from_millis(100));
    assert!(runner.wait_idle(SHOULD_NOT));
    assert_eq!(runner.current_state().as_deref(), Some("Second"));
    assert!(!runner.is_final_state());
    manager.stop();
}

#[test]
fn abandoned_runner_ignores_work() {
    let manager = started(ExecutorConfig::minimal());
    let runner = InterpRunner::new(
        Arc::clone(&manager),
        Interpreter::new(timed(Duration::from_millis(50)), ()),
    );

    runner.enqueue_start(None).unwrap();
    assert!(runner.wait_idle(SHOULD_NOT));
    runner.abandon();
    runner.enqueue_event(Event::new(&MOVE), None).unwrap();

    thread::sleep(Duration::from_millis(120));
    assert_eq!(runner.current_state().as_deref(), Some("First"));
    manager.stop();
}

#[test]
fn many_interpreters_share_a_small_pool() {
    let config = ExecutorConfig::builder()
        .min_threads(1)
        .max_threads(3)
        .runner_idle_time(Duration::from_millis(20))
        .build()
        .unwrap();
    let manager = started(config);

    let runners: Vec<_> = (0..12)
        .map(|_| {
            InterpRunner::new(
                Arc::clone(&manager),
                Interpreter::new(collector(), Seen::default()),
            )
        })
        .collect();
    for runner in &runners {
        runner.enqueue_start(None).unwrap();
        runner.enqueue_event(Event::new(&TICK), None).unwrap();
        runner.enqueue_event(Event::new(&FINISH), None).unwrap();
    }

    for runner in &runners {
        assert!(runner.wait_final(SHOULD_NOT));
    }
    manager.stop();
}
