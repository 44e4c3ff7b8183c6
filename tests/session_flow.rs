//! End-to-end session tests: coordinator, worker, and scripted engine together.

use std::sync::Arc;

use ember::engine::AppConfig;
use ember::testing::ScriptedLoader;
use ember::{
    ChunkPolicy, EmberConfig, JsonStore, Message, NotReadyPolicy, OutboundMessage, Role,
    SessionCoordinator,
};

async fn wait_for_response(session: &mut SessionCoordinator) -> OutboundMessage {
    loop {
        let message = session
            .next_event()
            .await
            .expect("worker stopped before responding");
        if matches!(
            message,
            OutboundMessage::ResponseFinal { .. } | OutboundMessage::ResponseError { .. }
        ) {
            return message;
        }
    }
}

#[tokio::test]
async fn conversation_round_trip() {
    let loader = ScriptedLoader::new()
        .with_app_config(AppConfig::with_models(["m1"]))
        .with_chat_reply("hi");
    let mut session = SessionCoordinator::new(EmberConfig::default(), Arc::new(loader));

    session.start().expect("start");
    session.wait_until_ready().await.expect("ready");

    let view = session.view();
    assert!(view.ready);
    assert_eq!(view.status, "Engine ready");
    assert_eq!(view.progress, 1.0);
    assert!(view.messages.contains(&Message::system("Selected model: m1")));

    session.send("hello").expect("send");
    wait_for_response(&mut session).await;

    let messages = session.transcript().messages();
    assert_eq!(messages.first(), Some(&Message::system("Ready. Type to begin.")));
    assert_eq!(
        &messages[messages.len() - 2..],
        &[Message::user("hello"), Message::assistant("hi")]
    );
}

#[tokio::test]
async fn streamed_reply_is_one_assistant_entry() {
    let loader = ScriptedLoader::new().with_stream(["Hel", "lo", "!"]);
    let mut session = SessionCoordinator::new(EmberConfig::default(), Arc::new(loader));
    session.start().expect("start");
    session.wait_until_ready().await.expect("ready");

    session.send("greet me").expect("send");
    wait_for_response(&mut session).await;

    assert_eq!(session.transcript().count_role(Role::Assistant), 1);
    assert_eq!(
        session.transcript().last(),
        Some(&Message::assistant("Hello!"))
    );
    assert_eq!(session.view().draft, None);
}

#[tokio::test]
async fn per_chunk_policy_keeps_one_entry_per_chunk() {
    let mut config = EmberConfig::default();
    config.session.chunk_policy = ChunkPolicy::PerChunk;
    let loader = ScriptedLoader::new().with_stream(["a", "b"]);
    let mut session = SessionCoordinator::new(config, Arc::new(loader));
    session.start().expect("start");
    session.wait_until_ready().await.expect("ready");

    session.send("x").expect("send");
    wait_for_response(&mut session).await;

    let assistant: Vec<&str> = session
        .transcript()
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(assistant, vec!["a", "b", "ab"]);
}

#[tokio::test]
async fn failed_init_still_reaches_ready_and_drops_prompts() {
    let loader = ScriptedLoader::new().failing_module("blocked by policy");
    let mut session = SessionCoordinator::new(EmberConfig::default(), Arc::new(loader));
    session.start().expect("start");
    session.wait_until_ready().await.expect("ready");

    session.send("anyone there?").expect("send");
    let mut seen = Vec::new();
    while let Some(message) = session.next_event().await {
        let done = matches!(&message, OutboundMessage::Log { text, .. } if text.contains("prompt dropped"));
        seen.push(message);
        if done {
            break;
        }
    }

    assert!(!seen.iter().any(|m| matches!(
        m,
        OutboundMessage::ResponseFinal { .. } | OutboundMessage::ResponseChunk { .. }
    )));
    assert_eq!(session.transcript().count_role(Role::Assistant), 0);
    assert!(
        session
            .transcript()
            .iter()
            .any(|m| m.content.starts_with("Failed to load engine module"))
    );
}

#[tokio::test]
async fn queued_prompt_sent_before_ready_is_answered() {
    let mut config = EmberConfig::default();
    config.worker.not_ready_policy = NotReadyPolicy::Queue;
    let mut session = SessionCoordinator::new(config, Arc::new(ScriptedLoader::new()));
    session.start().expect("start");

    // Init is already queued ahead of the prompt, so the prompt waits for it.
    session.send("first").expect("send");
    wait_for_response(&mut session).await;

    assert!(session.is_ready());
    assert_eq!(
        session.transcript().last(),
        Some(&Message::assistant("echo: first"))
    );
}

#[tokio::test]
async fn history_survives_restart_when_enabled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = EmberConfig::default();
    config.session.persist_history = true;

    {
        let store = JsonStore::new(dir.path()).expect("store");
        let mut session =
            SessionCoordinator::new(config.clone(), Arc::new(ScriptedLoader::new()))
                .with_store(store);
        session.start().expect("start");
        session.wait_until_ready().await.expect("ready");
        session.send("remember this").expect("send");
        wait_for_response(&mut session).await;
        session.stop();
    }

    let store = JsonStore::new(dir.path()).expect("store");
    let restored =
        SessionCoordinator::new(config, Arc::new(ScriptedLoader::new())).with_store(store);
    let messages = restored.transcript().messages();
    assert_eq!(
        &messages[messages.len() - 2..],
        &[
            Message::user("remember this"),
            Message::assistant("echo: remember this")
        ]
    );
}

#[tokio::test]
async fn history_is_not_written_when_disabled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = EmberConfig::default();
    let store = JsonStore::new(dir.path()).expect("store");

    let mut session = SessionCoordinator::new(config.clone(), Arc::new(ScriptedLoader::new()))
        .with_store(store.clone());
    session.apply(OutboundMessage::ResponseFinal {
        text: "ephemeral".into(),
    });
    session.stop();

    assert_eq!(store.load(&config.session.history_key), None);
}
