//! Integration tests: a transport thread and an engine thread on the agent
//! side, a tokio `Framed` editor on the other end of a localhost socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tas_core::codec::encode;
use tas_core::message::{Done, RunFrame};
use tas_core::{
    ControllerState, DoneFlag, EngineExit, FrameSyncEngine, LinkGate, Message, MessageKind,
    NetworkHandle, NetworkWorker, ProcessDebugController, QueueRouter, SessionConfig,
    SimulatedTarget, TransportConfig, TransportError, WireCodec,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ──────────────────────────────────────────────────────

type Editor = Framed<TcpStream, WireCodec>;

struct Agent {
    network: NetworkHandle,
    router: Arc<QueueRouter>,
    running: Arc<AtomicBool>,
    engine: JoinHandle<(EngineExit, FrameSyncEngine<SimulatedTarget>)>,
}

async fn editor_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    (listener, address)
}

fn start_transport(address: &str) -> (NetworkHandle, Arc<QueueRouter>) {
    let router = Arc::new(QueueRouter::new());
    let network = NetworkWorker::new(TransportConfig::default())
        .configure(address)
        .start(Arc::clone(&router))
        .unwrap();
    (network, router)
}

fn start_engine(
    router: Arc<QueueRouter>,
    gate: Arc<LinkGate>,
) -> (
    Arc<AtomicBool>,
    JoinHandle<(EngineExit, FrameSyncEngine<SimulatedTarget>)>,
) {
    let target = SimulatedTarget::new();
    let mut debug = ProcessDebugController::new(target.clone());
    debug.attach(7).unwrap();
    let mut engine =
        FrameSyncEngine::new(SessionConfig::default(), debug, Box::new(target), router, gate)
            .unwrap();

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let handle = tokio::task::spawn_blocking(move || {
        let exit = engine.run(&flag);
        (exit, engine)
    });
    (running, handle)
}

/// Connect an agent and accept it as the editor.
async fn connect_pair() -> (Agent, Editor) {
    let (listener, address) = editor_listener().await;
    let (network, router) = start_transport(&address);
    let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("agent never connected")
        .unwrap();

    let (running, engine) = start_engine(Arc::clone(&router), network.gate());
    let agent = Agent {
        network,
        router,
        running,
        engine,
    };
    (agent, Framed::new(stream, WireCodec::new()))
}

async fn recv(editor: &mut Editor) -> Message {
    tokio::time::timeout(WAIT, editor.next())
        .await
        .expect("timed out waiting for the agent")
        .expect("agent closed the connection")
        .expect("transport error")
        .expect("malformed message from agent")
}

async fn recv_done(editor: &mut Editor) -> Done {
    loop {
        if let Message::Done(done) = recv(editor).await {
            return done;
        }
    }
}

fn frame(player: u8, frame: u32) -> Message {
    Message::run_frame(player, frame, ControllerState::neutral())
}

// ── Scenarios ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_after_run_frame_yields_one_done() {
    let (agent, mut editor) = connect_pair().await;

    editor.send(Message::project_name("demo")).await.unwrap();
    editor.send(frame(0, 1)).await.unwrap();
    // Half of the next length field, then hang up.
    editor.get_mut().write_all(&[0]).await.unwrap();
    editor.get_mut().flush().await.unwrap();

    let done = recv_done(&mut editor).await;
    assert_eq!(done.flag, DoneFlag::RunFrameDone);
    assert_eq!(done.sequence, 0);
    assert!(done.success);
    drop(editor);

    let (exit, engine) = tokio::time::timeout(WAIT, agent.engine)
        .await
        .expect("engine never saw the disconnect")
        .unwrap();
    assert_eq!(exit, EngineExit::Disconnected);
    assert_eq!(engine.session().project_name, "demo");
    assert_eq!(engine.next_sequence(), 1);
    assert!(agent.router.drain_outgoing(MessageKind::Done).is_empty());

    let result = tokio::task::spawn_blocking(move || agent.network.join())
        .await
        .unwrap();
    assert!(matches!(result, Err(TransportError::PeerClosed)));
}

#[tokio::test(flavor = "multi_thread")]
async fn done_sequences_are_gap_free() {
    let (agent, mut editor) = connect_pair().await;

    for (i, player) in [0u8, 0, 9, 0, 0].into_iter().enumerate() {
        editor.send(frame(player, i as u32 + 1)).await.unwrap();
    }

    let mut dones = Vec::new();
    for _ in 0..5 {
        dones.push(recv_done(&mut editor).await);
    }
    let sequences: Vec<_> = dones.iter().map(|d| d.sequence).collect();
    let frames: Vec<_> = dones.iter().map(|d| d.frame).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    assert_eq!(frames, vec![1, 2, 3, 4, 5]);
    assert!(!dones[2].success);
    assert_eq!(dones.iter().filter(|d| d.success).count(), 4);

    agent.running.store(false, Ordering::SeqCst);
    let (exit, _) = agent.engine.await.unwrap();
    assert_eq!(exit, EngineExit::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn one_byte_writes_are_reassembled() {
    let (_agent, mut editor) = connect_pair().await;

    let bytes = encode(&Message::RunFrame(RunFrame {
        controller: ControllerState::neutral(),
        player: 0,
        frame: 12,
        savestate_hook: 3,
        branch: 1,
        include_framebuffer: false,
    }))
    .unwrap();
    for byte in bytes {
        editor.get_mut().write_all(&[byte]).await.unwrap();
        editor.get_mut().flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let done = recv_done(&mut editor).await;
    assert_eq!(done.frame, 12);
    assert!(done.success);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_frame_is_skipped() {
    let (_agent, mut editor) = connect_pair().await;

    editor.get_mut().write_all(&[0, 0]).await.unwrap();
    editor.send(frame(0, 4)).await.unwrap();

    let done = recv_done(&mut editor).await;
    assert_eq!(done.sequence, 0);
    assert_eq!(done.frame, 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_garbage_desyncs_the_link() {
    let (listener, address) = editor_listener().await;
    let (network, _router) = start_transport(&address);
    let (mut stream, _) = listener.accept().await.unwrap();

    let limit = TransportConfig::default().max_consecutive_malformed;
    for _ in 0..limit {
        stream.write_all(&[0, 1, 99]).await.unwrap();
    }
    stream.flush().await.unwrap();

    let gate = network.gate();
    let result = tokio::task::spawn_blocking(move || network.join())
        .await
        .unwrap();
    assert!(matches!(result, Err(TransportError::Desync(n)) if n == limit));
    assert!(gate.is_link_down());
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_editor_fails_to_connect() {
    // Bind then drop to get a port nobody listens on.
    let (listener, address) = editor_listener().await;
    drop(listener);

    let (network, _router) = start_transport(&address);
    let waited = tokio::task::spawn_blocking(move || {
        let waited = network.wait_connected(Some(WAIT));
        (waited, network.join())
    })
    .await
    .unwrap();

    assert!(matches!(waited.0, Err(TransportError::ConnectFailed { .. })));
    assert!(matches!(waited.1, Err(TransportError::ConnectFailed { .. })));
}
