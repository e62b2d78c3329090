//! Poll Exchange
//!
//! Two interpreters, a poller and a voter, exchange messages through an
//! in-process link while sharing one execution manager.
//!
//! Key concepts:
//! - Message categories and an opcode table for inbound messages
//! - Actions that send to a peer by enqueueing into its runner
//! - State deadlines driving a retry path
//! - Checkpoints taken on entering a resumable state
//!
//! The voter drops the first poll it sees, so the poller times out once and
//! polls again.
//!
//! Run with: cargo run --example poll_exchange

use protocol_sm::core::{EventTable, HistoryRecorder, Response, State, TIMEOUT};
use protocol_sm::executor::{ErrorHandler, ExecutionManager, ExecutorConfig, InterpRunner};
use protocol_sm::{
    event_categories, Action, BuildError, Event, Interpreter, Machine, PsmError, ResumeState, Wait,
};
use std::any::Any;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

event_categories! {
    MSG = "Msg";
    message POLL = "Poll" under MSG;
    message VOTE = "Vote" under MSG;
    message RECEIPT = "Receipt" under MSG;
    POLL_SENT = "PollSent";
    GIVE_UP = "GiveUp";
    AGREED = "Agreed";
    DISAGREED = "Disagreed";
    DROPPED = "Dropped";
    VOTED = "Voted";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Opcode {
    Poll,
    Vote,
    Receipt,
}

#[derive(Debug)]
struct PollMsg {
    round: u32,
}

#[derive(Debug)]
struct VoteMsg {
    round: u32,
    agree: bool,
}

#[derive(Debug)]
struct ReceiptMsg {
    round: u32,
}

type Link = Arc<OnceLock<InterpRunner<Node>>>;

// Per-peer protocol context
struct Node {
    peer: Link,
    table: Arc<EventTable<Opcode>>,
    attempts: u32,
    polls_to_drop: u32,
}

impl Node {
    fn new(peer: Link, table: Arc<EventTable<Opcode>>, polls_to_drop: u32) -> Self {
        Self {
            peer,
            table,
            attempts: 0,
            polls_to_drop,
        }
    }

    fn send<M: Any + Send + Sync>(&self, opcode: Opcode, message: M) -> anyhow::Result<()> {
        let peer = self
            .peer
            .get()
            .ok_or_else(|| anyhow::anyhow!("peer is not connected"))?;
        let event = self.table.from_message(&opcode, message)?;
        peer.enqueue_event(event, None)?;
        Ok(())
    }
}

const MAX_ATTEMPTS: u32 = 3;

fn poller_machine() -> Result<Machine<Node>, BuildError> {
    Machine::new(
        "Poller",
        vec![
            State::new("SendPoll")
                .entry(Action::call("send_poll", |_, interp: &mut Interpreter<Node>| {
                    let node = interp.context_mut();
                    node.attempts += 1;
                    if node.attempts > MAX_ATTEMPTS {
                        return Ok(Event::new(&GIVE_UP));
                    }
                    println!("  [poller] sending poll, attempt {}", node.attempts);
                    node.send(Opcode::Poll, PollMsg { round: node.attempts })?;
                    Ok(Event::new(&POLL_SENT))
                }))
                .respond(Response::transition(&POLL_SENT, "WaitVote"))
                .respond(Response::transition(&GIVE_UP, "NoQuorum")),
            State::new("WaitVote")
                .entry_wait(Wait::After(Duration::from_millis(300)))
                .respond(Response::action(
                    &VOTE,
                    Action::on_message::<VoteMsg, _>("tally", |vote, _, interp: &mut Interpreter<Node>| {
                        println!("  [poller] vote for round {}: agree={}", vote.round, vote.agree);
                        interp
                            .context()
                            .send(Opcode::Receipt, ReceiptMsg { round: vote.round })?;
                        Ok(Event::new(if vote.agree { &AGREED } else { &DISAGREED }))
                    }),
                ))
                .respond(Response::transition(&AGREED, "Agreed"))
                .respond(Response::transition(&DISAGREED, "Disagreed"))
                .respond(Response::transition(&TIMEOUT, "SendPoll")),
            State::new("Agreed").succeed(),
            State::new("Disagreed").fail(),
            State::new("NoQuorum").fail(),
        ],
        "SendPoll",
    )
}

fn voter_machine() -> Result<Machine<Node>, BuildError> {
    Machine::new(
        "Voter",
        vec![
            State::new("WaitPoll")
                .respond(Response::action(
                    &POLL,
                    Action::on_message::<PollMsg, _>("vote", |poll, _, interp: &mut Interpreter<Node>| {
                        let node = interp.context_mut();
                        if node.polls_to_drop > 0 {
                            node.polls_to_drop -= 1;
                            println!("  [voter] dropping poll for round {}", poll.round);
                            return Ok(Event::new(&DROPPED));
                        }
                        node.send(Opcode::Vote, VoteMsg { round: poll.round, agree: true })?;
                        Ok(Event::new(&VOTED))
                    }),
                ))
                .respond(Response::wait(&DROPPED, Wait::Forever))
                .respond(Response::transition(&VOTED, "WaitReceipt")),
            State::new("WaitReceipt")
                .entry_wait(Wait::After(Duration::from_secs(2)))
                .resumable()
                .respond(Response::transition(&RECEIPT, "Done"))
                .respond(Response::transition(&TIMEOUT, "Abandoned")),
            State::new("Done").succeed(),
            State::new("Abandoned").fail(),
        ],
        "WaitPoll",
    )
}

fn report(peer: &'static str) -> Option<ErrorHandler> {
    Some(Box::new(move |err: PsmError| {
        tracing::error!(peer, error = %err, "Protocol run failed");
    }))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Poll Exchange ===\n");

    let table = Arc::new(
        EventTable::new()
            .insert(Opcode::Poll, &POLL)?
            .insert(Opcode::Vote, &VOTE)?
            .insert(Opcode::Receipt, &RECEIPT)?,
    );

    let config = ExecutorConfig::builder()
        .min_threads(2)
        .max_threads(4)
        .runner_idle_time(Duration::from_millis(100))
        .build()?;
    let manager = Arc::new(ExecutionManager::new(config)?);
    manager.start()?;

    let to_poller: Link = Arc::new(OnceLock::new());
    let to_voter: Link = Arc::new(OnceLock::new());

    let poller = InterpRunner::new(
        Arc::clone(&manager),
        Interpreter::new(
            Arc::new(poller_machine()?),
            Node::new(Arc::clone(&to_voter), Arc::clone(&table), 0),
        ),
    );

    let history = HistoryRecorder::new();
    let mut voter_interp = Interpreter::new(
        Arc::new(voter_machine()?),
        Node::new(Arc::clone(&to_poller), Arc::clone(&table), 1),
    );
    voter_interp.set_monitor(history.clone());
    voter_interp.set_checkpointer(|saved: &ResumeState| match saved.to_json() {
        Ok(json) => println!("  [checkpoint] {json}"),
        Err(e) => tracing::warn!(error = %e, "Could not encode checkpoint"),
    });
    let voter = InterpRunner::new(Arc::clone(&manager), voter_interp);

    let _ = to_poller.set(poller.clone());
    let _ = to_voter.set(voter.clone());

    voter.enqueue_start(report("voter"))?;
    poller.enqueue_start(report("poller"))?;

    let patience = Duration::from_secs(5);
    if !poller.wait_final(patience) || !voter.wait_final(patience) {
        manager.stop();
        anyhow::bail!("exchange did not finish within {patience:?}");
    }

    println!();
    println!("Poller finished in {:?}", poller.final_state());
    println!("Voter finished in {:?}", voter.final_state());
    println!("Voter path: {}", history.snapshot().get_path().join(" -> "));

    manager.stop();
    Ok(())
}
