//! Integration tests for the chat registry.
//!
//! These tests drive the registry end to end against the scriptable mock
//! backend, so no Pi API is required.

use std::sync::Arc;
use std::time::Duration;

use pi_chat::threads::first_page_cursor;
use pi_chat::{
    Action, ActionEntity, ChatError, ChatEvent, ChatRegistry, DialogueKey, ExecuteActionResponse,
    ExecutionStatus, Feedback, Focus, MockBackend, QueryParams, ThreadPage, ThreadSummary, Token, WireFrame,
    FALLBACK_ANSWER, NEW_CHAT_TITLE,
};
use tokio_test::{assert_err, assert_ok};

fn registry(backend: &MockBackend) -> ChatRegistry {
    ChatRegistry::new(Arc::new(backend.clone()))
}

fn delta(chunk: &str) -> WireFrame {
    WireFrame::Delta {
        chunk: chunk.to_string(),
    }
}

fn action(artifact_id: &str, verb: &str, artifact_type: &str, success: bool) -> Action {
    Action {
        artifact_id: artifact_id.to_string(),
        action: verb.to_string(),
        artifact_type: artifact_type.to_string(),
        entity: None,
        success,
        error: None,
        message: None,
    }
}

fn summary(id: &str, title: &str) -> ThreadSummary {
    ThreadSummary {
        chat_id: id.to_string(),
        title: title.to_string(),
        last_modified: None,
        is_favorite: None,
        workspace_id: None,
        llm: None,
    }
}

fn params() -> QueryParams {
    QueryParams {
        workspace_slug: "acme".to_string(),
        workspace_id: Some("w1".to_string()),
        ..QueryParams::default()
    }
}

/// Poll until `check` holds, failing after two seconds.
async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn wait_for_stream_end(registry: &ChatRegistry, chat_id: &str) {
    wait_until(|| !registry.is_streaming(chat_id)).await;
}

/// Ask one question whose answer is fully scripted and wait for it.
async fn answered(registry: &ChatRegistry, chat_id: &str, query: &str) -> DialogueKey {
    let key = registry.get_answer(chat_id, query, params()).await.unwrap();
    wait_for_stream_end(registry, chat_id).await;
    key
}

// ============================================================================
// Streaming
// ============================================================================

/// Deltas followed by done concatenate into the answer.
#[tokio::test]
async fn test_scenario_a_deltas_then_done() {
    let backend = MockBackend::new()
        .add_token("t1")
        .with_stream("t1", vec![delta("Hel"), delta("lo"), WireFrame::Done]);
    let registry = registry(&backend);

    let key = answered(&registry, "c1", "Say hello").await;
    assert_eq!(key, DialogueKey::Confirmed(Token::new("t1")));

    let entry = registry.entry("c1", &key).unwrap();
    assert_eq!(entry.answer, "Hello");
    assert!(!entry.is_pi_thinking);
    assert_eq!(entry.reasoning, "");
    assert!(entry.actions.is_empty());
    assert_eq!(entry.query_id.as_deref(), Some("t1"));
    assert_eq!(registry.active_stream_count(), 0);
}

/// An actions frame registers an editable artifact and a pending proposal.
#[tokio::test]
async fn test_scenario_b_actions_register_artifact() {
    let proposed = action("a1", "create_issue", "issue", true);
    let backend = MockBackend::new()
        .add_token("t1")
        .with_stream("t1", vec![WireFrame::Actions(proposed.clone()), WireFrame::Done]);
    let registry = registry(&backend);

    let key = answered(&registry, "c1", "Create an issue").await;

    let entry = registry.entry("c1", &key).unwrap();
    assert_eq!(entry.actions, vec![proposed]);
    assert_eq!(entry.execution_status, Some(ExecutionStatus::Pending));

    let artifact = registry.artifacts().get_artifact("a1").unwrap();
    assert!(artifact.is_editable());
    assert_eq!(artifact.chat_id, "c1");
    assert_eq!(artifact.original["artifact_type"], "issue");
}

/// Frames after an abort are never applied.
#[tokio::test]
async fn test_scenario_c_abort_mid_stream() {
    let backend = MockBackend::new().add_token("t1");
    let sender = backend.live_stream("t1");
    let registry = registry(&backend);

    let key = registry.get_answer("c1", "Long answer", params()).await.unwrap();
    sender.send(Ok(delta("Hel"))).unwrap();
    wait_until(|| registry.entry("c1", &key).is_some_and(|e| e.answer == "Hel")).await;

    assert!(registry.abort_stream("c1"));
    let _ = sender.send(Ok(delta("lo")));
    let _ = sender.send(Ok(WireFrame::Done));
    tokio::time::sleep(Duration::from_millis(30)).await;

    let entry = registry.entry("c1", &key).unwrap();
    assert_eq!(entry.answer, "Hel");
    assert!(!entry.is_pi_thinking);
    assert!(!registry.is_streaming("c1"));
    assert_eq!(registry.active_stream_count(), 0);
}

/// Aborting while the token request is in flight keeps the stream from opening.
#[tokio::test]
async fn test_abort_before_token_arrives() {
    let backend = MockBackend::new().add_token("t1");
    let sender = backend.live_stream("t1");
    sender.send(Ok(delta("late"))).unwrap();
    sender.send(Ok(WireFrame::Done)).unwrap();
    let gate = backend.hold("retrieve_token");
    let registry = registry(&backend);

    let asking = registry.clone();
    let answer = tokio::spawn(async move { asking.get_answer("c1", "Long answer", params()).await });
    wait_until(|| backend.call_count("retrieve_token") == 1).await;
    assert!(!registry.is_streaming("c1"));

    assert!(registry.abort_stream("c1"));
    gate.release();
    let key = answer.await.unwrap().unwrap();
    assert_eq!(key, DialogueKey::Confirmed(Token::new("t1")));
    tokio::time::sleep(Duration::from_millis(30)).await;

    let entry = registry.entry("c1", &key).unwrap();
    assert!(entry.answer.is_empty());
    assert!(!entry.is_pi_thinking);
    assert_eq!(backend.call_count("stream_answer"), 0);
    assert_eq!(registry.active_stream_count(), 0);
    assert!(!registry.abort_stream("c1"));
}

/// With nothing live, abort leaves the dialogue alone.
#[tokio::test]
async fn test_abort_without_stream_changes_nothing() {
    let backend = MockBackend::new()
        .add_token("t1")
        .with_stream("t1", vec![delta("done"), WireFrame::Done]);
    let registry = registry(&backend);
    let key = answered(&registry, "c1", "q").await;

    let mut entry = registry.entry("c1", &key).unwrap();
    entry.is_pi_thinking = true;
    assert_ok!(registry.update_dialogue("c1", &key, entry));
    let mut events = registry.subscribe();

    assert!(!registry.abort_stream("c1"));
    assert!(registry.entry("c1", &key).unwrap().is_pi_thinking);
    assert!(events.try_recv().is_err());
}

/// The entry thinks until the first delta arrives.
#[tokio::test]
async fn test_thinking_until_first_delta() {
    let backend = MockBackend::new().add_token("t1");
    let sender = backend.live_stream("t1");
    let registry = registry(&backend);

    let key = registry.get_answer("c1", "q", params()).await.unwrap();
    assert!(registry.entry("c1", &key).unwrap().is_pi_thinking);

    sender
        .send(Ok(WireFrame::Reasoning {
            header: "Searching".to_string(),
            content: Some(" issues".to_string()),
        }))
        .unwrap();
    wait_until(|| registry.entry("c1", &key).is_some_and(|e| !e.reasoning.is_empty())).await;
    let entry = registry.entry("c1", &key).unwrap();
    assert!(entry.is_pi_thinking);
    assert_eq!(entry.current_tick, "Searching");

    sender.send(Ok(delta("Found 3"))).unwrap();
    sender.send(Ok(WireFrame::Done)).unwrap();
    wait_for_stream_end(&registry, "c1").await;

    let entry = registry.entry("c1", &key).unwrap();
    assert!(!entry.is_pi_thinking);
    assert_eq!(entry.reasoning, "Searching issues");
    assert_eq!(entry.answer, "Found 3");
}

/// Error frames replace the answer with the fallback and release the stream.
#[tokio::test]
async fn test_error_frame_yields_fallback() {
    let backend = MockBackend::new().add_token("t1").with_stream(
        "t1",
        vec![delta("partial"), WireFrame::Error("model overloaded".to_string())],
    );
    let registry = registry(&backend);

    let key = answered(&registry, "c1", "q").await;
    let entry = registry.entry("c1", &key).unwrap();
    assert_eq!(entry.answer, FALLBACK_ANSWER);
    assert!(!entry.is_pi_thinking);
    assert_eq!(registry.active_stream_count(), 0);
}

/// A connection that drops mid-answer is treated as an error.
#[tokio::test]
async fn test_transport_failure_yields_fallback() {
    let backend = MockBackend::new().add_token("t1").with_stream_results(
        "t1",
        vec![Ok(delta("par")), Err(ChatError::Transport("connection reset".to_string()))],
    );
    let registry = registry(&backend);

    let key = answered(&registry, "c1", "q").await;
    assert_eq!(registry.entry("c1", &key).unwrap().answer, FALLBACK_ANSWER);
}

/// A stream that ends without done is treated as an error.
#[tokio::test]
async fn test_stream_without_done_yields_fallback() {
    let backend = MockBackend::new()
        .add_token("t1")
        .with_stream("t1", vec![delta("cut off")]);
    let registry = registry(&backend);

    let key = answered(&registry, "c1", "q").await;
    let entry = registry.entry("c1", &key).unwrap();
    assert_eq!(entry.answer, FALLBACK_ANSWER);
    assert!(!registry.is_streaming("c1"));
}

/// A rejected token request is folded into the entry; no stream opens.
#[tokio::test]
async fn test_token_failure_folds_into_dialogue() {
    let backend = MockBackend::new();
    backend.fail("retrieve_token", "queue full");
    let registry = registry(&backend);

    let key = registry.get_answer("c1", "q", params()).await.unwrap();
    assert!(key.is_provisional());

    let entry = registry.entry("c1", &key).unwrap();
    assert_eq!(entry.answer, FALLBACK_ANSWER);
    assert!(!entry.is_pi_thinking);
    assert_eq!(backend.call_count("stream_answer"), 0);
    assert_eq!(registry.active_stream_count(), 0);
}

/// The provisional key stops resolving once the token is issued.
#[tokio::test]
async fn test_provisional_key_is_replaced_in_place() {
    let backend = MockBackend::new()
        .add_token("t1")
        .add_token("t2")
        .with_stream("t1", vec![delta("one"), WireFrame::Done])
        .with_stream("t2", vec![delta("two"), WireFrame::Done]);
    let registry = registry(&backend);
    let mut events = registry.subscribe();

    answered(&registry, "c1", "first").await;
    answered(&registry, "c1", "second").await;

    let dialogue = registry.dialogue("c1");
    let keys: Vec<DialogueKey> = dialogue.iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(
        keys,
        vec![
            DialogueKey::Confirmed(Token::new("t1")),
            DialogueKey::Confirmed(Token::new("t2"))
        ]
    );
    assert!(registry.chat("c1").unwrap().dialogue.is_consistent());

    let mut confirmed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ChatEvent::DialogueConfirmed {
            provisional,
            confirmed: key,
            ..
        } = event
        {
            assert!(registry.entry("c1", &provisional).is_none());
            confirmed.push(key);
        }
    }
    assert_eq!(confirmed, keys);
}

/// Opening a second stream on a chat closes the first.
#[tokio::test]
async fn test_second_query_replaces_live_stream() {
    let backend = MockBackend::new().add_token("t1").add_token("t2");
    let first = backend.live_stream("t1");
    let second = backend.live_stream("t2");
    let registry = registry(&backend);

    let first_key = registry.get_answer("c1", "one", params()).await.unwrap();
    first.send(Ok(delta("partial"))).unwrap();
    wait_until(|| registry.entry("c1", &first_key).is_some_and(|e| !e.answer.is_empty())).await;

    let second_key = registry.get_answer("c1", "two", params()).await.unwrap();
    assert_eq!(registry.active_stream_count(), 1);

    let _ = first.send(Ok(delta(" late")));
    second.send(Ok(delta("fresh"))).unwrap();
    second.send(Ok(WireFrame::Done)).unwrap();
    wait_for_stream_end(&registry, "c1").await;

    let old = registry.entry("c1", &first_key).unwrap();
    assert_eq!(old.answer, "partial");
    assert!(!old.is_pi_thinking);
    assert_eq!(registry.entry("c1", &second_key).unwrap().answer, "fresh");
    assert_eq!(registry.active_stream_count(), 0);
}

/// No stream handle survives done, error or abort.
#[tokio::test]
async fn test_registry_has_no_leaks() {
    let backend = MockBackend::new()
        .add_token("t1")
        .add_token("t2")
        .add_token("t3")
        .with_stream("t1", vec![delta("ok"), WireFrame::Done])
        .with_stream("t2", vec![WireFrame::Error("boom".to_string())]);
    let _held = backend.live_stream("t3");
    let registry = registry(&backend);

    answered(&registry, "done", "q").await;
    answered(&registry, "error", "q").await;
    registry.get_answer("aborted", "q", params()).await.unwrap();
    assert!(registry.is_streaming("aborted"));
    registry.abort_stream("aborted");

    for chat_id in ["done", "error", "aborted"] {
        assert!(!registry.is_streaming(chat_id));
    }
    assert_eq!(registry.active_stream_count(), 0);
}

/// Dispose aborts every live stream.
#[tokio::test]
async fn test_dispose_aborts_all_streams() {
    let backend = MockBackend::new().add_token("t1").add_token("t2");
    let _a = backend.live_stream("t1");
    let _b = backend.live_stream("t2");
    let registry = registry(&backend);

    registry.get_answer("c1", "q", params()).await.unwrap();
    registry.get_answer("c2", "q", params()).await.unwrap();
    assert_eq!(registry.active_stream_count(), 2);

    registry.dispose();
    assert_eq!(registry.active_stream_count(), 0);
}

/// Regeneration answers again under the same token, in the same slot.
#[tokio::test]
async fn test_regenerate_answer_in_place() {
    let backend = MockBackend::new()
        .add_token("t1")
        .with_stream("t1", vec![delta("first"), WireFrame::Done]);
    let registry = registry(&backend);
    let key = answered(&registry, "c1", "Summarize").await;

    let sender = backend.live_stream("t1");
    registry.regenerate_answer("c1", &Token::new("t1"), Some("w1")).unwrap();
    let entry = registry.entry("c1", &key).unwrap();
    assert!(entry.is_pi_thinking);
    assert!(entry.answer.is_empty());
    assert_eq!(entry.query, "Summarize");

    sender.send(Ok(delta("second"))).unwrap();
    sender.send(Ok(WireFrame::Done)).unwrap();
    wait_for_stream_end(&registry, "c1").await;

    let dialogue = registry.dialogue("c1");
    assert_eq!(dialogue.len(), 1);
    assert_eq!(dialogue[0].1.answer, "second");
    assert_eq!(backend.call_count("retrieve_token"), 1);
    assert_eq!(backend.call_count("stream_answer"), 2);
}

#[tokio::test]
async fn test_regenerate_unknown_token() {
    let registry = registry(&MockBackend::new());
    let result = registry.regenerate_answer("c1", &Token::new("missing"), None);
    assert!(matches!(result, Err(ChatError::NotFound(_))));
    assert!(matches!(
        registry.regenerate_answer("c1", &Token::new(""), None),
        Err(ChatError::Validation(_))
    ));
}

/// The title is generated once, after the first exchange.
#[tokio::test]
async fn test_title_fetched_after_first_exchange_only() {
    let backend = MockBackend::new()
        .with_title("Sprint planning")
        .add_token("t1")
        .add_token("t2")
        .with_stream("t1", vec![delta("a"), WireFrame::Done])
        .with_stream("t2", vec![delta("b"), WireFrame::Done]);
    let registry = registry(&backend);
    let chat_id = registry
        .create_new_chat(&Focus::none(), None, false, Some("w1"))
        .await
        .unwrap();
    let before = registry.chat(&chat_id).unwrap().last_modified;

    answered(&registry, &chat_id, "first").await;
    wait_until(|| registry.chat(&chat_id).is_some_and(|c| c.title == "Sprint planning")).await;
    assert!(registry.chat(&chat_id).unwrap().last_modified >= before);

    answered(&registry, &chat_id, "second").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(backend.call_count("retrieve_title"), 1);
}

/// A failed title request leaves the chat untouched.
#[tokio::test]
async fn test_title_failure_is_logged_only() {
    let backend = MockBackend::new()
        .add_token("t1")
        .with_stream("t1", vec![delta("a"), WireFrame::Done]);
    backend.fail("retrieve_title", "unavailable");
    let registry = registry(&backend);
    let chat_id = registry.create_new_chat(&Focus::none(), None, false, None).await.unwrap();

    answered(&registry, &chat_id, "first").await;
    wait_until(|| backend.call_count("retrieve_title") == 1).await;
    assert_eq!(registry.chat(&chat_id).unwrap().title, NEW_CHAT_TITLE);
}

// ============================================================================
// Actions
// ============================================================================

async fn proposed(backend: &MockBackend, registry: &ChatRegistry, actions: Vec<Action>) -> Token {
    let mut frames: Vec<WireFrame> = actions.into_iter().map(WireFrame::Actions).collect();
    frames.push(WireFrame::Done);
    let sender = backend.live_stream("t1");
    for frame in frames {
        sender.send(Ok(frame)).unwrap();
    }
    answered(registry, "c1", "Plan the sprint").await;
    Token::new("t1")
}

/// A partially successful batch completes and reports the successful types.
#[tokio::test]
async fn test_execute_action_partial_failure() {
    let mut created = action("a1", "create_issue", "issue", true);
    created.entity = Some(ActionEntity {
        entity_id: Some("i1".to_string()),
        entity_url: Some("https://pi.example.com/i1".to_string()),
        entity_name: Some("WEB-12".to_string()),
        issue_identifier: Some("WEB-12".to_string()),
    });
    let mut refused = action("a2", "create_cycle", "cycle", false);
    refused.error = Some("cycle dates overlap".to_string());

    let backend = MockBackend::new().add_token("t1").add_execute_response(ExecuteActionResponse {
        action_summary: Some(serde_json::json!({"completed": 1, "failed": 1})),
        actions: vec![created.clone(), refused.clone()],
    });
    let registry = registry(&backend);
    let token = proposed(
        &backend,
        &registry,
        vec![
            action("a1", "create_issue", "issue", true),
            action("a2", "create_cycle", "cycle", true),
        ],
    )
    .await;

    let succeeded = assert_ok!(registry.execute_action("w1", "c1", &token).await);
    assert_eq!(succeeded, vec!["issue".to_string()]);

    let entry = registry.entry("c1", &DialogueKey::from(token.clone())).unwrap();
    assert_eq!(entry.execution_status, Some(ExecutionStatus::Completed));
    assert_eq!(entry.actions, vec![created, refused]);
    assert!(entry.action_error.is_none());
    assert!(entry.action_summary.is_some());

    let artifact = registry.artifacts().get_artifact("a1").unwrap();
    assert!(artifact.is_executed());
    assert_eq!(artifact.original["entity_url"], "https://pi.example.com/i1");

    let grouped = registry.grouped_artifacts_by_dialogue("c1", &token);
    assert_eq!(grouped.successful.len(), 1);
    assert_eq!(grouped.failed.len(), 1);
    assert_eq!(grouped.failed[0]["error"], "cycle dates overlap");
}

/// Drafts are sent as edited data.
#[tokio::test]
async fn test_execute_action_sends_drafts() {
    let backend = MockBackend::new().add_token("t1");
    let registry = registry(&backend);
    let token = proposed(
        &backend,
        &registry,
        vec![
            action("a1", "create_issue", "issue", true),
            action("a2", "create_issue", "issue", true),
        ],
    )
    .await;
    let draft = serde_json::json!({"name": "Fix login redirect"}).as_object().cloned().unwrap();
    registry
        .artifacts()
        .update_artifact("c1", "a2", pi_chat::ArtifactVersion::Updated, draft);

    assert_ok!(registry.execute_action("w1", "c1", &token).await);

    let call = &backend.get_method_calls("execute_action")[0];
    let body = call.body.as_ref().unwrap();
    assert_eq!(body["message_id"], "t1");
    assert_eq!(body["artifact_data"][0]["is_edited"], false);
    assert!(body["artifact_data"][0].get("action_data").is_none());
    assert_eq!(body["artifact_data"][1]["is_edited"], true);
    assert_eq!(body["artifact_data"][1]["action_data"]["name"], "Fix login redirect");
}

/// A rejected batch completes with a normalized error.
#[tokio::test]
async fn test_execute_action_failure_sets_error() {
    let backend = MockBackend::new().add_token("t1");
    let registry = registry(&backend);
    let token = proposed(&backend, &registry, vec![action("a1", "create_issue", "issue", true)]).await;
    backend.fail("execute_action", "workspace is read-only");

    assert_err!(registry.execute_action("w1", "c1", &token).await);

    let entry = registry.entry("c1", &DialogueKey::from(token)).unwrap();
    assert_eq!(entry.execution_status, Some(ExecutionStatus::Completed));
    assert_eq!(entry.action_error.as_deref(), Some("workspace is read-only"));
    assert!(entry.action_summary.is_none());
}

/// Completed proposals cannot be executed again.
#[tokio::test]
async fn test_execution_status_is_monotonic() {
    let backend = MockBackend::new().add_token("t1");
    let registry = registry(&backend);
    let token = proposed(&backend, &registry, vec![action("a1", "create_issue", "issue", true)]).await;
    let key = DialogueKey::from(token.clone());
    let mut events = registry.subscribe();

    assert_eq!(
        registry.entry("c1", &key).unwrap().execution_status,
        Some(ExecutionStatus::Pending)
    );
    assert_ok!(registry.execute_action("w1", "c1", &token).await);
    let updates = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, ChatEvent::DialogueUpdated { key: k, .. } if *k == key))
        .count();
    assert_eq!(updates, 2);

    let again = registry.execute_action("w1", "c1", &token).await;
    assert!(matches!(again, Err(ChatError::InvalidState { .. })));
    assert_eq!(
        registry.entry("c1", &key).unwrap().execution_status,
        Some(ExecutionStatus::Completed)
    );
    assert_eq!(backend.call_count("execute_action"), 1);
}

/// Repeated artifact ids are all sent; the last result wins in the store.
#[tokio::test]
async fn test_duplicate_artifact_ids_correlate_by_id() {
    let mut first = action("a1", "create_issue", "issue", false);
    first.error = Some("duplicate".to_string());
    let second = action("a1", "update_issue", "issue", true);

    let backend = MockBackend::new().add_token("t1").add_execute_response(ExecuteActionResponse {
        action_summary: None,
        actions: vec![first.clone(), second.clone()],
    });
    let registry = registry(&backend);
    let token = proposed(
        &backend,
        &registry,
        vec![
            action("a1", "create_issue", "issue", true),
            action("a1", "update_issue", "issue", true),
        ],
    )
    .await;

    assert_ok!(registry.execute_action("w1", "c1", &token).await);

    let body = backend.get_method_calls("execute_action")[0].body.clone().unwrap();
    assert_eq!(body["artifact_data"].as_array().unwrap().len(), 2);

    let artifact = registry.artifacts().get_artifact("a1").unwrap();
    assert_eq!(artifact.original["success"], true);
    assert!(artifact.original["error"].is_null());

    let entry = registry.entry("c1", &DialogueKey::from(token)).unwrap();
    assert_eq!(entry.actions, vec![first, second]);
}

/// A new proposal after completion reopens execution.
#[tokio::test]
async fn test_regeneration_starts_new_proposal_cycle() {
    let backend = MockBackend::new().add_token("t1");
    let registry = registry(&backend);
    let token = proposed(&backend, &registry, vec![action("a1", "create_issue", "issue", true)]).await;
    assert_ok!(registry.execute_action("w1", "c1", &token).await);

    let sender = backend.live_stream("t1");
    sender
        .send(Ok(WireFrame::Actions(action("a3", "create_issue", "issue", true))))
        .unwrap();
    sender.send(Ok(WireFrame::Done)).unwrap();
    registry.regenerate_answer("c1", &token, None).unwrap();
    wait_for_stream_end(&registry, "c1").await;

    let entry = registry.entry("c1", &DialogueKey::from(token.clone())).unwrap();
    assert_eq!(entry.execution_status, Some(ExecutionStatus::Pending));
    assert_eq!(entry.actions.len(), 1);
    assert_ok!(registry.execute_action("w1", "c1", &token).await);
}

// ============================================================================
// Optimistic mutations
// ============================================================================

#[tokio::test]
async fn test_favorite_rollback_is_exact() {
    let backend = MockBackend::new();
    let registry = registry(&backend);
    let chat_id = registry.create_new_chat(&Focus::none(), None, false, None).await.unwrap();
    let before = registry.chat(&chat_id).unwrap();
    let favorites_before = registry.favorite_chats();

    backend.fail("favorite_chat", "forbidden");
    let err = assert_err!(registry.favorite_chat(&chat_id, None).await);
    assert_eq!(err.status(), Some(500));

    assert_eq!(registry.chat(&chat_id).unwrap(), before);
    assert_eq!(registry.favorite_chats(), favorites_before);
}

#[tokio::test]
async fn test_unfavorite_rollback_is_exact() {
    let backend = MockBackend::new();
    let registry = registry(&backend);
    let chat_id = registry.create_new_chat(&Focus::none(), None, false, None).await.unwrap();
    assert_ok!(registry.favorite_chat(&chat_id, None).await);
    let before = registry.chat(&chat_id).unwrap();
    assert!(before.is_favorite);

    backend.fail("unfavorite_chat", "forbidden");
    assert_err!(registry.unfavorite_chat(&chat_id, None).await);

    assert_eq!(registry.chat(&chat_id).unwrap(), before);
    assert_eq!(registry.favorite_chats().len(), 1);
}

#[tokio::test]
async fn test_rename_rollback_and_success() {
    let backend = MockBackend::new();
    let registry = registry(&backend);
    let chat_id = registry.create_new_chat(&Focus::none(), None, false, None).await.unwrap();
    let before = registry.chat(&chat_id).unwrap();

    backend.fail("rename_chat", "title too long");
    assert_err!(registry.rename_chat(&chat_id, "Roadmap", None).await);
    assert_eq!(registry.chat(&chat_id).unwrap(), before);

    backend.recover("rename_chat");
    assert_ok!(registry.rename_chat(&chat_id, "Roadmap", None).await);
    assert_eq!(registry.chat(&chat_id).unwrap().title, "Roadmap");
}

#[tokio::test]
async fn test_delete_rollback_restores_everything() {
    let backend = MockBackend::new();
    let registry = registry(&backend);
    let chat_id = registry.create_new_chat(&Focus::none(), None, false, None).await.unwrap();
    assert_ok!(registry.favorite_chat(&chat_id, None).await);
    let before = registry.chat(&chat_id).unwrap();
    let threads_before = registry.user_threads(false);
    let favorites_before = registry.favorite_chats();

    backend.fail("destroy_chat", "not allowed");
    assert_err!(registry.delete_chat(&chat_id, "acme").await);

    assert_eq!(registry.chat(&chat_id).unwrap(), before);
    assert_eq!(registry.user_threads(false), threads_before);
    assert_eq!(registry.favorite_chats(), favorites_before);
}

/// A chat created while a delete is pending survives the delete's rollback.
#[tokio::test]
async fn test_failed_delete_keeps_chats_created_meanwhile() {
    let backend = MockBackend::new();
    let registry = registry(&backend);
    let first = registry.create_new_chat(&Focus::none(), None, false, None).await.unwrap();
    assert_ok!(registry.favorite_chat(&first, None).await);

    backend.fail("destroy_chat", "not allowed");
    let gate = backend.hold("destroy_chat");
    let deleting = registry.clone();
    let target = first.clone();
    let delete = tokio::spawn(async move { deleting.delete_chat(&target, "acme").await });
    wait_until(|| backend.call_count("destroy_chat") == 1).await;
    assert!(registry.chat(&first).is_none());

    let second = registry.create_new_chat(&Focus::none(), None, false, None).await.unwrap();
    gate.release();
    assert_err!(delete.await.unwrap());

    let threads: Vec<String> = registry.user_threads(false).into_iter().map(|s| s.chat_id).collect();
    assert_eq!(threads, vec![first.clone(), second.clone()]);
    let favorites: Vec<String> = registry.favorite_chats().into_iter().map(|s| s.chat_id).collect();
    assert_eq!(favorites, vec![first.clone()]);
    assert!(registry.chat(&first).unwrap().is_favorite);
    assert!(registry.chat(&second).is_some());
}

/// A failed unfavorite only puts its own chat back.
#[tokio::test]
async fn test_failed_unfavorite_keeps_other_favorites() {
    let backend = MockBackend::new();
    let registry = registry(&backend);
    let first = registry.create_new_chat(&Focus::none(), None, false, None).await.unwrap();
    let second = registry.create_new_chat(&Focus::none(), None, false, None).await.unwrap();
    assert_ok!(registry.favorite_chat(&first, None).await);

    backend.fail("unfavorite_chat", "forbidden");
    let gate = backend.hold("unfavorite_chat");
    let unfavoriting = registry.clone();
    let target = first.clone();
    let unfavorite = tokio::spawn(async move { unfavoriting.unfavorite_chat(&target, None).await });
    wait_until(|| backend.call_count("unfavorite_chat") == 1).await;

    assert_ok!(registry.favorite_chat(&second, None).await);
    gate.release();
    assert_err!(unfavorite.await.unwrap());

    let favorites: Vec<String> = registry.favorite_chats().into_iter().map(|s| s.chat_id).collect();
    assert_eq!(favorites, vec![first.clone(), second.clone()]);
    assert!(registry.chat(&first).unwrap().is_favorite);
    assert!(registry.chat(&second).unwrap().is_favorite);
}

#[tokio::test]
async fn test_delete_removes_chat_everywhere() {
    let backend = MockBackend::new().add_token("t1");
    let registry = registry(&backend);
    let chat_id = registry.create_new_chat(&Focus::none(), None, false, None).await.unwrap();
    let sender = backend.live_stream("t1");
    sender
        .send(Ok(WireFrame::Actions(action("a1", "create_issue", "issue", true))))
        .unwrap();
    sender.send(Ok(WireFrame::Done)).unwrap();
    answered(&registry, &chat_id, "q").await;
    assert_ok!(registry.favorite_chat(&chat_id, None).await);
    let mut events = registry.subscribe();

    assert_ok!(registry.delete_chat(&chat_id, "acme").await);

    assert!(registry.chat(&chat_id).is_none());
    assert!(registry.user_threads(false).is_empty());
    assert!(registry.favorite_chats().is_empty());
    assert!(registry.artifacts().get_artifact("a1").is_none());
    let deleted = std::iter::from_fn(|| events.try_recv().ok())
        .any(|e| e == ChatEvent::ChatDeleted { chat_id: chat_id.clone() });
    assert!(deleted);
}

#[tokio::test]
async fn test_feedback_rollback_and_success() {
    let backend = MockBackend::new()
        .add_token("t1")
        .with_stream("t1", vec![delta("answer"), WireFrame::Done]);
    let registry = registry(&backend);
    let key = answered(&registry, "c1", "q").await;
    let before = registry.chat("c1").unwrap();

    backend.fail("post_feedback", "rate limited");
    assert_err!(registry.send_feedback("c1", 0, Feedback::Negative, Some("w1"), None).await);
    assert_eq!(registry.chat("c1").unwrap(), before);

    backend.recover("post_feedback");
    assert_ok!(
        registry
            .send_feedback("c1", 0, Feedback::Positive, Some("w1"), Some("spot on"))
            .await
    );
    assert_eq!(registry.entry("c1", &key).unwrap().feedback, Some(Feedback::Positive));

    let body = backend.get_method_calls("post_feedback")[1].body.clone().unwrap();
    assert_eq!(body["message_index"], 0);
    assert_eq!(body["feedback"], "positive");
    assert_eq!(body["feedback_message"], "spot on");

    assert!(matches!(
        registry.send_feedback("c1", 5, Feedback::Positive, None, None).await,
        Err(ChatError::NotFound(_))
    ));
}

// ============================================================================
// Thread listings
// ============================================================================

#[tokio::test]
async fn test_pagination_merge_is_duplicate_free() {
    let backend = MockBackend::new()
        .with_thread_page(
            first_page_cursor(),
            ThreadPage {
                results: vec![summary("a", "Alpha"), summary("b", "Beta")],
                next_cursor: Some("100:1:0".to_string()),
                prev_cursor: None,
                next_page_results: true,
                total_pages: 2,
                total_results: Some(3),
            },
        )
        .with_thread_page(
            "100:1:0",
            ThreadPage {
                results: vec![summary("b", "Beta renamed"), summary("c", "Gamma")],
                next_cursor: None,
                prev_cursor: Some("100:0:0".to_string()),
                next_page_results: false,
                total_pages: 2,
                total_results: Some(3),
            },
        );
    let registry = registry(&backend);

    let next = assert_ok!(registry.fetch_user_threads(Some("w1"), false, None).await);
    assert_eq!(next.as_deref(), Some("100:1:0"));
    let next = assert_ok!(registry.fetch_user_threads(Some("w1"), false, next.as_deref()).await);
    assert!(next.is_none());

    let threads: Vec<(String, String)> = registry
        .user_threads(false)
        .into_iter()
        .map(|s| (s.chat_id, s.title))
        .collect();
    assert_eq!(
        threads,
        vec![
            ("a".to_string(), "Alpha".to_string()),
            ("b".to_string(), "Beta renamed".to_string()),
            ("c".to_string(), "Gamma".to_string()),
        ]
    );
    let listing = registry.thread_listing(false);
    assert!(!listing.next_page_results);
    assert_eq!(listing.total_results, Some(3));

    let first_call = &backend.get_method_calls("list_user_threads")[0];
    assert_eq!(first_call.body.as_ref().unwrap()["cursor"], "100:0:0");
}

#[tokio::test]
async fn test_first_page_resets_listing() {
    let backend = MockBackend::new().with_thread_page(
        first_page_cursor(),
        ThreadPage {
            results: vec![summary("b", "Beta")],
            ..ThreadPage::default()
        },
    );
    let registry = registry(&backend);
    registry.create_new_chat(&Focus::none(), None, false, None).await.unwrap();

    assert_ok!(registry.fetch_user_threads(None, false, None).await);
    let ids: Vec<String> = registry.user_threads(false).into_iter().map(|s| s.chat_id).collect();
    assert_eq!(ids, vec!["b".to_string()]);
}

#[tokio::test]
async fn test_recent_chats_append_unseen() {
    let backend = MockBackend::new()
        .with_thread_page(
            first_page_cursor(),
            ThreadPage {
                results: vec![summary("a", "Alpha")],
                ..ThreadPage::default()
            },
        )
        .with_recent(ThreadPage {
            results: vec![summary("a", "Alpha"), summary("r", "Recent")],
            ..ThreadPage::default()
        });
    let registry = registry(&backend);

    assert_ok!(registry.fetch_user_threads(None, false, None).await);
    assert_ok!(registry.fetch_recent_chats(None, false).await);

    let ids: Vec<String> = registry.user_threads(false).into_iter().map(|s| s.chat_id).collect();
    assert_eq!(ids, vec!["a".to_string(), "r".to_string()]);
}

#[tokio::test]
async fn test_listing_failure_keeps_state() {
    let backend = MockBackend::new();
    let registry = registry(&backend);
    registry.create_new_chat(&Focus::none(), None, false, None).await.unwrap();
    backend.fail("list_user_threads", "server error");

    assert_err!(registry.fetch_user_threads(None, false, None).await);
    assert_eq!(registry.user_threads(false).len(), 1);
}
