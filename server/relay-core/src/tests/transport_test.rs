use std::sync::Arc;
use std::time::Duration;

use relay_a2a::{FileRole, TaskState};
use relay_artifacts::ArtifactStore;
use relay_types::{
    AgentDescriptor, AgentUrls, EnabledAgent, EventType, HostConfig, HostError,
};
use serde_json::{json, Value};

use crate::bus::{EventBus, EventReceiver};
use crate::tests::agent_stub::StubAgent;
use crate::transport::{AttachmentSource, OutboundAttachment, SendOptions, Transport};

fn transport_with_bus() -> (Arc<Transport>, EventBus, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = HostConfig {
        data_dir: dir.path().to_string_lossy().to_string(),
        ..HostConfig::default()
    };
    let artifacts = Arc::new(ArtifactStore::from_config(&config).unwrap());
    let bus = EventBus::default();
    (
        Arc::new(Transport::new(bus.clone(), artifacts)),
        bus,
        dir,
    )
}

fn enabled(name: &str, url: &str) -> EnabledAgent {
    EnabledAgent {
        descriptor: AgentDescriptor {
            name: name.to_string(),
            description: String::new(),
            urls: AgentUrls {
                dev: Some(url.to_string()),
                production: None,
            },
            skills: vec![],
            input_modes: vec![],
            output_modes: vec![],
            streaming: true,
            tool_approval: Default::default(),
        },
        url: url.to_string(),
    }
}

fn drain(rx: &mut EventReceiver) -> Vec<EventType> {
    let mut seen = Vec::new();
    while let Some(event) = rx.try_recv() {
        seen.push(event.event_type);
    }
    seen
}

#[tokio::test]
async fn streamed_reply_accumulates_chunks_and_emits_lifecycle_events() {
    let stub = StubAgent::spawn(vec![vec![
        json!({ "eventType": "task_updated", "data": { "state": "working" } }),
        json!({ "eventType": "message_chunk", "data": { "text": "Hello " } }),
        json!({ "eventType": "message_chunk", "data": { "text": "world" } }),
        json!({ "eventType": "message_complete",
                "parts": [ { "root": { "kind": "text", "text": "Hello world" } } ] }),
    ]])
    .await;

    let (transport, bus, _dir) = transport_with_bus();
    let (mut rx, _sub) = bus.subscribe("sess");
    let agent = enabled("echo", &stub.url);

    let reply = transport
        .send(&agent, "sess::conv", "say hello", vec![], SendOptions::default())
        .await
        .unwrap();
    assert_eq!(reply.text, "Hello world");

    let events = drain(&mut rx);
    let expect_prefix = [
        EventType::TaskCreated,
        EventType::OutgoingAgentMessage,
        EventType::TaskUpdated,
    ];
    assert_eq!(&events[..3], &expect_prefix);
    assert!(events.contains(&EventType::MessageChunk));
    assert!(events.contains(&EventType::MessageComplete));
    // Terminal pair arrives last: completed status, then task_completed.
    assert_eq!(
        &events[events.len() - 2..],
        &[EventType::TaskUpdated, EventType::TaskCompleted]
    );
    assert!(transport.active_state("sess::conv").is_none());
}

#[tokio::test]
async fn outbound_envelope_matches_wire_format_and_keeps_file_parts() {
    let stub = StubAgent::spawn(vec![vec![json!({
        "eventType": "message_complete",
        "parts": [ { "root": { "kind": "text", "text": "described" } } ]
    })]])
    .await;

    let (transport, _bus, _dir) = transport_with_bus();
    let agent = enabled("vision", &stub.url);

    let opts = SendOptions {
        workflow_text: Some("1. [vision] describe".into()),
        ..SendOptions::default()
    };
    transport
        .send(
            &agent,
            "sess::conv",
            "describe this image",
            vec![OutboundAttachment {
                name: "photo.png".into(),
                mime_type: "image/png".into(),
                role: FileRole::Base,
                source: AttachmentSource::Uri("https://elsewhere.example/photo.png".into()),
            }],
            opts,
        )
        .await
        .unwrap();

    let bodies = stub.send_bodies();
    assert_eq!(bodies.len(), 1);
    let params = &bodies[0]["params"];
    assert_eq!(params["contextId"], "sess::conv");
    assert_eq!(params["role"], "user");
    assert_eq!(params["agentMode"], true);
    assert_eq!(params["enableInterAgentMemory"], true);
    assert_eq!(params["workflow"], "1. [vision] describe");

    let parts = params["parts"].as_array().unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0]["root"]["kind"], "text");
    // The file rides through with its uri, mime type, and role intact.
    assert_eq!(parts[1]["root"]["kind"], "file");
    assert_eq!(
        parts[1]["root"]["file"]["uri"],
        "https://elsewhere.example/photo.png"
    );
    assert_eq!(parts[1]["root"]["file"]["mime_type"], "image/png");
    assert_eq!(parts[1]["root"]["file"]["role"], "base");
}

#[tokio::test]
async fn flattened_parts_are_accepted_from_heterogeneous_agents() {
    let stub = StubAgent::spawn(vec![vec![json!({
        "eventType": "message_complete",
        "parts": [
            { "kind": "text", "text": "generated" },
            { "kind": "file", "file": {
                "name": "dragon.png",
                "uri": "https://blob.example/dragon.png",
                "mime_type": "image/png",
                "role": "result"
            } }
        ]
    })]])
    .await;

    let (transport, _bus, _dir) = transport_with_bus();
    let agent = enabled("painter", &stub.url);

    let reply = transport
        .send(
            &agent,
            "sess::conv",
            "generate dragon over mountains",
            vec![],
            SendOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(reply.text, "generated");
    assert_eq!(reply.file_parts.len(), 1);
    assert_eq!(reply.file_parts[0].uri, "https://blob.example/dragon.png");
    assert_eq!(reply.file_parts[0].role, FileRole::Result);
}

#[tokio::test]
async fn tool_approval_round_is_auto_approved() {
    let stub = StubAgent::spawn(vec![vec![
        json!({ "eventType": "task_updated", "data": {
            "state": "requires_action",
            "tool_calls": [ { "id": "tc_1" }, { "id": "tc_2" } ]
        } }),
        json!({ "eventType": "message_complete",
                "parts": [ { "root": { "kind": "text", "text": "tools done" } } ] }),
    ]])
    .await;

    let (transport, _bus, _dir) = transport_with_bus();
    let agent = enabled("mcp", &stub.url);

    let reply = transport
        .send(&agent, "sess::conv", "use tools", vec![], SendOptions::default())
        .await
        .unwrap();
    assert_eq!(reply.text, "tools done");

    let approvals: Vec<_> = stub
        .requests()
        .into_iter()
        .filter(|r| r.path.starts_with("/tool-approval"))
        .collect();
    assert_eq!(approvals.len(), 1);
    let approved = approvals[0].body["approvals"].as_array().unwrap().clone();
    assert_eq!(approved.len(), 2);
    assert!(approved.iter().all(|a| a["approved"] == Value::Bool(true)));
}

#[tokio::test]
async fn escalation_sentinel_parks_task_then_resume_continues() {
    let stub = StubAgent::spawn(vec![
        vec![json!({
            "eventType": "message_complete",
            "parts": [ { "root": { "kind": "text", "text": "HUMAN_ESCALATION_REQUIRED" } } ]
        })],
        vec![json!({
            "eventType": "message_complete",
            "parts": [ { "root": { "kind": "text", "text": "resumed and finished" } } ]
        })],
    ])
    .await;

    let (transport, bus, _dir) = transport_with_bus();
    let (mut rx, _sub) = bus.subscribe("sess");
    let agent = enabled("support", &stub.url);

    let send = {
        let transport = transport.clone();
        let agent = agent.clone();
        tokio::spawn(async move {
            transport
                .send(
                    &agent,
                    "sess::conv",
                    "cancel my order",
                    vec![],
                    SendOptions::default(),
                )
                .await
        })
    };

    // Wait until the task parks, then answer as the human.
    let task_id = loop {
        let pending = transport.pending_escalations();
        if let Some(info) = pending.first() {
            assert_eq!(info.context_id, "sess::conv");
            assert!(info
                .transcript
                .iter()
                .any(|line| line.speaker == "user" && line.text == "cancel my order"));
            break info.task_id.clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(
        transport.active_state("sess::conv"),
        Some(TaskState::InputRequired)
    );
    transport.resume(&task_id, "approved, go ahead".into()).unwrap();

    let reply = send.await.unwrap().unwrap();
    assert_eq!(reply.text, "resumed and finished");

    // The second outbound message carries the human response.
    let bodies = stub.send_bodies();
    assert_eq!(bodies.len(), 2);
    assert_eq!(
        bodies[1]["params"]["parts"][0]["root"]["text"],
        "approved, go ahead"
    );

    // input_required surfaced with the transcript before resumption.
    let mut saw_input_required = false;
    while let Some(event) = rx.try_recv() {
        if event.event_type == EventType::TaskUpdated
            && event.data["state"] == "input_required"
        {
            saw_input_required = true;
            assert!(event.data["transcript"].is_array());
        }
    }
    assert!(saw_input_required);
}

#[tokio::test]
async fn unreachable_agent_fails_after_retries_with_task_failed() {
    let dir = tempfile::tempdir().unwrap();
    let config = HostConfig {
        data_dir: dir.path().to_string_lossy().to_string(),
        ..HostConfig::default()
    };
    let artifacts = Arc::new(ArtifactStore::from_config(&config).unwrap());
    let bus = EventBus::default();
    let transport = Arc::new(
        Transport::new(bus.clone(), artifacts).with_retry(Duration::from_millis(5), 2),
    );
    let (mut rx, _sub) = bus.subscribe("sess");
    // Nothing listens on this port.
    let agent = enabled("ghost", "http://127.0.0.1:9");

    let result = transport
        .send(&agent, "sess::conv", "hello?", vec![], SendOptions::default())
        .await;
    assert!(matches!(result, Err(HostError::AgentUnreachable(_))));

    let events = drain(&mut rx);
    assert!(events.contains(&EventType::TaskFailed));
}
