//! Editor end to end: `EditorServer` against a real transport thread and
//! frame sync engine driving the simulated game.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tas_core::debug::sim::SIM_MEMORY_BASE;
use tas_core::{
    Button, ElementType, EngineExit, FrameSyncEngine, GameIdentity, MemoryRegionDescriptor,
    NetworkWorker, ProcessDebugController, QueueRouter, SessionConfig, SimulatedTarget,
    TransportConfig,
};
use tas_editor::{EditorError, EditorEvent, EditorServer, InputScript, MemoryRegionStreamer};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

fn region() -> MemoryRegionDescriptor {
    MemoryRegionDescriptor::new(1, SIM_MEMORY_BASE, 8, ElementType::U32).with_name("counter")
}

/// Run an agent against `address` on blocking threads until the link drops.
fn spawn_agent(address: String, target: SimulatedTarget) -> JoinHandle<EngineExit> {
    tokio::task::spawn_blocking(move || {
        let router = Arc::new(QueueRouter::new());
        let network = NetworkWorker::new(TransportConfig::default())
            .configure(address)
            .start(Arc::clone(&router))
            .unwrap();
        network.wait_connected(Some(WAIT)).unwrap();

        let mut debug = ProcessDebugController::new(target.clone());
        debug.attach(99).unwrap();
        let session = SessionConfig {
            player_count: 2,
            regions: vec![region()],
            ..Default::default()
        };
        let mut engine =
            FrameSyncEngine::new(session, debug, Box::new(target.clone()), router, network.gate())
                .unwrap()
                .with_framebuffer(Box::new(target))
                .with_identity(GameIdentity {
                    game_name: "Sim".into(),
                    user_nickname: "tester".into(),
                });

        let running = AtomicBool::new(true);
        let exit = engine.run(&running);
        engine.release();
        exit
    })
}

async fn connect() -> (
    EditorServer,
    UnboundedReceiver<EditorEvent>,
    JoinHandle<EngineExit>,
    SimulatedTarget,
) {
    let mut server = EditorServer::bind("127.0.0.1:0").await.unwrap();
    let address = server.local_addr().unwrap().to_string();
    let target = SimulatedTarget::new();
    let agent = spawn_agent(address, target.clone());
    let events = tokio::time::timeout(WAIT, server.accept())
        .await
        .expect("agent never connected")
        .unwrap();
    (server, events, agent, target)
}

async fn next_event(events: &mut UnboundedReceiver<EditorEvent>) -> EditorEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

#[tokio::test]
async fn requests_before_accept_fail() {
    let mut server = EditorServer::bind("127.0.0.1:0").await.unwrap();
    assert!(matches!(
        server.set_project_name("demo").await,
        Err(EditorError::NotConnected)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn script_drives_the_game_frame_by_frame() {
    let (mut server, mut events, agent, target) = connect().await;

    let mut script = InputScript::new(2).unwrap();
    script.add_frame();
    script.add_frame();
    script.set_current_frame(1).unwrap();
    script.set_button(0, Button::A, true).unwrap();
    script.set_button(1, Button::B, true).unwrap();

    server.set_project_name("demo").await.unwrap();
    for frame in 0..3 {
        script.set_current_frame(frame).unwrap();
        let done = tokio::time::timeout(WAIT, server.request_frame_advance(&script, false))
            .await
            .expect("frame never completed")
            .unwrap();
        assert_eq!(done.sequence, u64::from(frame));
        assert_eq!(done.frame, frame);
        assert!(done.success);
    }
    assert_eq!(target.frame(), 3);

    // Frame 1 injected A for player 0 and B for player 1.
    let injected = target.injected();
    assert!(injected.iter().any(|i| i.player == 0 && i.state.is_pressed(Button::A)));
    assert!(injected.iter().any(|i| i.player == 1 && i.state.is_pressed(Button::B)));

    // Each frame: one region capture, then completion.
    let mut captured = Vec::new();
    while captured.len() < 3 {
        if let EditorEvent::CapturedRegion(region) = next_event(&mut events).await {
            captured.push(region);
        }
    }
    let counters: Vec<u32> = captured
        .iter()
        .map(|r| u32::from_le_bytes(r.bytes[..4].try_into().unwrap()))
        .collect();
    assert_eq!(counters, vec![1, 2, 3]);

    server.disconnect();
    let exit = tokio::time::timeout(WAIT, agent).await.unwrap().unwrap();
    assert_eq!(exit, EngineExit::Disconnected);
    assert!(!target.is_suspended());
}

#[tokio::test(flavor = "multi_thread")]
async fn game_info_and_framebuffer_arrive_as_events() {
    let (mut server, mut events, agent, _target) = connect().await;

    server.request_game_info().await.unwrap();
    match next_event(&mut events).await {
        EditorEvent::GameInfo(info) => {
            assert_eq!(info.process_id, 99);
            assert_eq!(info.game_name, "Sim");
        }
        other => panic!("expected game info, got {other:?}"),
    }

    server.request_framebuffer().await.unwrap();
    match next_event(&mut events).await {
        EditorEvent::Framebuffer(jpeg) => {
            assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
            assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
        }
        other => panic!("expected framebuffer, got {other:?}"),
    }

    server.set_paused(true).await.unwrap();
    assert_eq!(next_event(&mut events).await, EditorEvent::Paused(true));

    server.disconnect();
    assert_eq!(next_event(&mut events).await, EditorEvent::Disconnected);
    assert_eq!(agent.await.unwrap(), EngineExit::Disconnected);
}

#[tokio::test(flavor = "multi_thread")]
async fn captured_regions_stream_into_project_files() {
    let dir = std::env::temp_dir().join(format!("tas-editor-e2e-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let mut streamer = MemoryRegionStreamer::new(&dir);
    let path = streamer.open_region(&region()).unwrap();

    let (mut server, mut events, agent, _target) = connect().await;
    let script = InputScript::new(1).unwrap();
    for _ in 0..2 {
        server.request_frame_advance(&script, false).await.unwrap();
    }
    server.disconnect();

    loop {
        match next_event(&mut events).await {
            EditorEvent::CapturedRegion(region) => {
                streamer
                    .write_chunk(region.region_id, region.offset, &region.bytes)
                    .unwrap();
            }
            EditorEvent::Disconnected => break,
            _ => {}
        }
    }
    streamer.close_all().unwrap();
    agent.await.unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 8);
    assert_eq!(u32::from_le_bytes(bytes[..4].try_into().unwrap()), 2);
    std::fs::remove_dir_all(&dir).unwrap();
}
