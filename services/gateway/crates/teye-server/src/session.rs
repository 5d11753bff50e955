//! Per-connection command protocol.
//!
//! [`CommandEngine`] walks one request through
//! `Decoding → Validating → Building → Running → Terminal` and emits every
//! resulting [`OutboundEvent`] on the connection's event channel.
//! [`Session`] owns the in-flight command of one connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use teye_common::{CommandCatalog, CommandRequest, OutboundEvent, RequestError, validate};

use crate::invocation::Invocation;
use crate::runner::{ExitOutcome, OutputLine, ProcessSpawner};

/// Capacity of a connection's event channel. While it is full, output
/// stops being read from the command's pipes.
pub const EVENT_BUFFER: usize = 256;

/// Sending half of a connection's ordered event stream.
pub type EventSender = mpsc::Sender<OutboundEvent>;

async fn emit(events: &EventSender, event: OutboundEvent) {
    // A closed receiver means the client is gone; nothing left to report.
    let _ = events.send(event).await;
}

/// Validates, builds and runs commands from the shared catalog.
///
/// Cheap to clone; every session holds its own handle.
#[derive(Clone)]
pub struct CommandEngine {
    catalog: Arc<CommandCatalog>,
    spawner: Arc<dyn ProcessSpawner>,
}

impl std::fmt::Debug for CommandEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEngine")
            .field("commands", &self.catalog.len())
            .field("spawner", &"<ProcessSpawner>")
            .finish()
    }
}

impl CommandEngine {
    pub fn new(catalog: Arc<CommandCatalog>, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self { catalog, spawner }
    }

    #[must_use]
    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    /// Decode, validate and build. No process is started here.
    ///
    /// # Errors
    ///
    /// Returns the protocol or validation failure to report to the client.
    pub fn prepare(&self, payload: &str) -> Result<Invocation, RequestError> {
        let request = CommandRequest::decode(payload).map_err(|err| {
            debug!(error = %err, "undecodable payload");
            RequestError::MalformedPayload
        })?;

        let name = request.command_name().ok_or(RequestError::MissingCommand)?;

        let spec = self
            .catalog
            .get(name)
            .ok_or_else(|| RequestError::UnknownCommand(name.to_string()))?;

        let values = validate(spec, request.args.as_ref()).map_err(|err| {
            if err.is_configuration_defect() {
                error!(command = name, error = %err, "broken catalog entry");
            } else {
                debug!(command = name, error = %err, "request rejected");
            }
            RequestError::from(err)
        })?;

        Ok(Invocation::build(name, spec, &values, &self.catalog))
    }

    /// Run a prepared invocation to its terminal event.
    ///
    /// Emits the announcement, one event per output line, and exactly one
    /// terminal event (`success` or `error`).
    pub async fn run(&self, invocation: Invocation, events: &EventSender) {
        let terminal = self.execute(invocation, events).await;
        emit(events, terminal).await;
    }

    /// Like [`CommandEngine::run`], but hands the terminal event back
    /// instead of sending it.
    pub async fn execute(&self, invocation: Invocation, events: &EventSender) -> OutboundEvent {
        let command = invocation.command.clone();
        emit(events, OutboundEvent::running(format!("Executing: {command}"))).await;

        let mut process = match self.spawner.spawn(&invocation) {
            Ok(process) => process,
            Err(source) => {
                error!(
                    command = %command,
                    cmdline = %invocation.command_line(),
                    error = %source,
                    "failed to spawn command",
                );
                let err = RequestError::SpawnFailure { command, source };
                return OutboundEvent::error(err.to_string());
            }
        };

        info!(
            command = %command,
            cmdline = %invocation.command_line(),
            pid = process.id(),
            uid = invocation.uid,
            gid = invocation.gid,
            "command started",
        );

        while let Some(line) = process.next_output().await {
            match line {
                OutputLine::Stdout(text) => emit(events, OutboundEvent::running(text)).await,
                OutputLine::Stderr(text) => emit(events, OutboundEvent::error(text)).await,
            }
        }

        let terminal = match process.wait().await {
            Ok(ExitOutcome::Exited(0)) => {
                info!(command = %command, "command succeeded");
                return OutboundEvent::success();
            }
            Ok(ExitOutcome::Exited(code)) => {
                info!(command = %command, exit_code = code, "command failed");
                RequestError::NonZeroExit { command, code }
            }
            Ok(ExitOutcome::Signaled(signal)) => {
                info!(command = %command, signal, "command killed by signal");
                RequestError::Signaled { command, signal }
            }
            Err(source) => {
                error!(
                    command = %command,
                    cmdline = %invocation.command_line(),
                    error = %source,
                    "failed to wait for command",
                );
                RequestError::SpawnFailure { command, source }
            }
        };
        OutboundEvent::error(terminal.to_string())
    }

    /// Full lifecycle of one request, in the caller's task.
    pub async fn handle(&self, payload: &str, events: &EventSender) {
        match self.prepare(payload) {
            Ok(invocation) => self.run(invocation, events).await,
            Err(err) => emit(events, OutboundEvent::error(err.to_string())).await,
        }
    }
}

struct InFlight {
    command: String,
    /// Cleared just before the terminal event is sent.
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// One client connection's protocol state.
///
/// At most one command runs at a time; a request arriving while one is
/// still running is rejected with an `error` event. Dropping the session
/// aborts the running command and kills its process group.
pub struct Session {
    engine: CommandEngine,
    events: EventSender,
    in_flight: Option<InFlight>,
}

impl Session {
    #[must_use]
    pub fn new(engine: CommandEngine, events: EventSender) -> Self {
        Self {
            engine,
            events,
            in_flight: None,
        }
    }

    /// Name of the command still running on this connection, if any.
    #[must_use]
    pub fn running_command(&self) -> Option<&str> {
        self.in_flight
            .as_ref()
            .filter(|f| f.active.load(Ordering::Acquire))
            .map(|f| f.command.as_str())
    }

    /// Handle one inbound text payload.
    ///
    /// Returns once the request is rejected or its command is started; an
    /// accepted command keeps running on its own task and reports through
    /// the event channel.
    pub async fn on_message(&mut self, payload: &str) {
        if let Some(running) = self.running_command() {
            warn!(command = running, "request rejected: command still running");
            let err = RequestError::Busy(running.to_string());
            emit(&self.events, OutboundEvent::error(err.to_string())).await;
            return;
        }

        let invocation = match self.engine.prepare(payload) {
            Ok(invocation) => invocation,
            Err(err) => return emit(&self.events, OutboundEvent::error(err.to_string())).await,
        };

        let command = invocation.command.clone();
        let engine = self.engine.clone();
        let events = self.events.clone();
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);
        let task = tokio::spawn(async move {
            let terminal = engine.execute(invocation, &events).await;
            flag.store(false, Ordering::Release);
            emit(&events, terminal).await;
        });
        self.in_flight = Some(InFlight {
            command,
            active,
            task,
        });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight.take()
            && !in_flight.task.is_finished()
        {
            info!(command = %in_flight.command, "client gone, aborting command");
            in_flight.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use teye_common::{CommandSpec, EventStatus};

    use super::*;
    use crate::runner::{RunningProcess, TokioSpawner};

    /// Spawner that counts calls and delegates to the real one.
    #[derive(Default)]
    struct CountingSpawner {
        calls: AtomicUsize,
    }

    impl ProcessSpawner for CountingSpawner {
        fn spawn(&self, invocation: &Invocation) -> io::Result<RunningProcess> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            TokioSpawner.spawn(invocation)
        }
    }

    fn catalog() -> CommandCatalog {
        let entry = |v: serde_json::Value| CommandSpec::from_json("t", v).unwrap();
        CommandCatalog::default()
            .with_command("noop", entry(json!({"script": "/bin/true"})))
            .with_command(
                "echo",
                entry(json!({
                    "script": "/bin/echo",
                    "args": [{"name": "text", "type": "string", "required": true}]
                })),
            )
            .with_command(
                "fail",
                entry(json!({
                    "script": "/bin/sh",
                    "args": [{"name": "c", "required": true}]
                })),
            )
            .with_command(
                "broken",
                entry(json!({"script": "/bin/echo", "args": [{"type": "string"}]})),
            )
            .with_command(
                "ghost",
                entry(json!({"script": "/nonexistent/teye-ghost"})),
            )
            .with_command(
                "shell",
                entry(json!({
                    "script": "/bin/sh",
                    "args": [{"name": "flag"}, {"name": "script"}]
                })),
            )
            .with_command(
                "ordered",
                entry(json!({
                    "script": "/bin/echo",
                    "args": [{"name": "first"}, {"name": "second"}, {"name": "third"}]
                })),
            )
    }

    fn engine() -> (CommandEngine, Arc<CountingSpawner>) {
        let spawner = Arc::new(CountingSpawner::default());
        let engine = CommandEngine::new(Arc::new(catalog()), spawner.clone());
        (engine, spawner)
    }

    async fn events_for(engine: &CommandEngine, payload: &str) -> Vec<OutboundEvent> {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        engine.handle(payload, &tx).await;
        drop(tx);
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn echo_scenario() {
        let (engine, spawner) = engine();
        let events = events_for(&engine, r#"{"command":"echo","args":{"text":"hi"}}"#).await;
        assert_eq!(
            events,
            vec![
                OutboundEvent::running("Executing: echo"),
                OutboundEvent::running("hi"),
                OutboundEvent::success(),
            ]
        );
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn noop_round_trip() {
        let (engine, _) = engine();
        let events = events_for(&engine, r#"{"command":"noop","args":{}}"#).await;
        assert_eq!(
            events,
            vec![OutboundEvent::running("Executing: noop"), OutboundEvent::success()]
        );
    }

    #[tokio::test]
    async fn unknown_command_is_a_single_error() {
        let (engine, spawner) = engine();
        let events = events_for(&engine, r#"{"command":"missing"}"#).await;
        assert_eq!(events, vec![OutboundEvent::error("Unknown command \"missing\".")]);
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_command_name() {
        let (engine, _) = engine();
        for payload in [r#"{"args":{}}"#, r#"{"command":""}"#] {
            let events = events_for(&engine, payload).await;
            assert_eq!(events, vec![OutboundEvent::error("Command not specified.")]);
        }
    }

    #[tokio::test]
    async fn malformed_payloads_are_independent() {
        let (engine, spawner) = engine();
        let first = events_for(&engine, "{not json").await;
        let second = events_for(&engine, "{not json").await;
        let expected = vec![OutboundEvent::error(
            "Invalid arguments received. Valid JSON string expected.",
        )];
        assert_eq!(first, expected);
        assert_eq!(second, expected);
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_required_argument_never_spawns() {
        let (engine, spawner) = engine();
        let events = events_for(&engine, r#"{"command":"echo","args":{}}"#).await;
        assert_eq!(
            events,
            vec![OutboundEvent::error("Required argument \"text\" is missing.")]
        );
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wrong_type_never_spawns() {
        let (engine, spawner) = engine();
        let events = events_for(&engine, r#"{"command":"echo","args":{"text":5}}"#).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Error);
        assert!(events[0].msg.contains("Expecting \"string\" got \"number\""));
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn configuration_defect_is_reported_generically() {
        let (engine, spawner) = engine();
        let events = events_for(&engine, r#"{"command":"broken","args":{}}"#).await;
        assert_eq!(
            events,
            vec![OutboundEvent::error(
                "Invalid configuration. Argument [0] must have a name."
            )]
        );
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stderr_and_exit_code_scenario() {
        let (engine, _) = engine();
        let events = events_for(
            &engine,
            r#"{"command":"fail","args":{"c":"-c"}}"#,
        )
        .await;
        // `sh -c` with no script exits with status 2 and complains on stderr.
        assert_eq!(events.first(), Some(&OutboundEvent::running("Executing: fail")));
        assert_eq!(
            events.last(),
            Some(&OutboundEvent::error("Error executing \"fail\". Exit code: 2"))
        );
        assert!(events[1..events.len() - 1]
            .iter()
            .all(|e| e.status == EventStatus::Error));
    }

    #[tokio::test]
    async fn spawn_failure_emits_one_error_after_announcement() {
        let (engine, spawner) = engine();
        let events = events_for(&engine, r#"{"command":"ghost"}"#).await;
        assert_eq!(
            events,
            vec![
                OutboundEvent::running("Executing: ghost"),
                OutboundEvent::error("Error executing \"ghost\""),
            ]
        );
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn built_arguments_follow_declaration_order() {
        let (engine, _) = engine();
        let invocation = engine
            .prepare(r#"{"command":"ordered","args":{"third":"3","first":"1","second":"2"}}"#)
            .unwrap();
        assert_eq!(invocation.args, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn overlapping_request_is_rejected() {
        let spawner = Arc::new(CountingSpawner::default());
        let catalog = CommandCatalog::default().with_command(
            "slow",
            CommandSpec::from_json("slow", json!({"script": "/bin/sleep", "args": [{"name": "s"}]}))
                .unwrap(),
        );
        let engine = CommandEngine::new(Arc::new(catalog), spawner.clone());
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let mut session = Session::new(engine, tx);

        session.on_message(r#"{"command":"slow","args":{"s":"5"}}"#).await;
        assert_eq!(
            rx.recv().await,
            Some(OutboundEvent::running("Executing: slow"))
        );
        assert_eq!(session.running_command(), Some("slow"));

        session.on_message(r#"{"command":"slow","args":{"s":"5"}}"#).await;
        assert_eq!(
            rx.recv().await,
            Some(OutboundEvent::error("Command \"slow\" is still running."))
        );
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn session_accepts_next_command_after_terminal() {
        let (engine, _) = engine();
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let mut session = Session::new(engine, tx);

        session.on_message(r#"{"command":"noop"}"#).await;
        assert_eq!(rx.recv().await, Some(OutboundEvent::running("Executing: noop")));
        assert_eq!(rx.recv().await, Some(OutboundEvent::success()));

        assert_eq!(session.running_command(), None);

        session.on_message(r#"{"command":"noop"}"#).await;
        assert_eq!(rx.recv().await, Some(OutboundEvent::running("Executing: noop")));
        assert_eq!(rx.recv().await, Some(OutboundEvent::success()));
    }

    #[tokio::test]
    async fn rejected_requests_do_not_occupy_the_session() {
        let (engine, _) = engine();
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let mut session = Session::new(engine, tx);

        session.on_message("garbage").await;
        assert_eq!(rx.recv().await.map(|e| e.status), Some(EventStatus::Error));
        assert_eq!(session.running_command(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn request_after_terminal_event_is_never_busy() {
        let (engine, spawner) = engine();
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let mut session = Session::new(engine, tx);

        for _ in 0..50 {
            session.on_message(r#"{"command":"noop"}"#).await;
            assert_eq!(rx.recv().await, Some(OutboundEvent::running("Executing: noop")));
            assert_eq!(rx.recv().await, Some(OutboundEvent::success()));
        }
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn numeric_command_name_is_looked_up_as_text() {
        let (engine, spawner) = engine();
        let events = events_for(&engine, r#"{"command":5}"#).await;
        assert_eq!(events, vec![OutboundEvent::error("Unknown command \"5\".")]);
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn full_event_channel_holds_back_output() {
        let (engine, _) = engine();
        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            engine
                .handle(
                    r#"{"command":"shell","args":{"flag":"-c","script":"seq 1 100"}}"#,
                    &tx,
                )
                .await;
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!task.is_finished());

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        task.await.unwrap();

        assert_eq!(events.len(), 102);
        assert_eq!(events[1], OutboundEvent::running("1"));
        assert_eq!(events[100], OutboundEvent::running("100"));
        assert_eq!(events[101], OutboundEvent::success());
    }
}
