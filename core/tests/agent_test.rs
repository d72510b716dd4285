mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{
    done_chunk, reasoning_chunk, search_result, text_chunk, tool_call_chunk, FailingChatModel,
    FixtureCatalog, ScriptedChatModel,
};
use serde_json::{json, Value};
use weknora_core::agent::AgentEngine;
use weknora_core::event::{EventBus, EventData, EventKind};
use weknora_core::llm::StaticModelProvider;
use weknora_core::tools::{Tool, ToolContext, ToolRegistry};
use weknora_core::types::{AgentConfig, CancelToken, MatchType, ToolResult, STOP_SENTINEL};
use weknora_core::WeKnoraError;

/// Search-tool stand-in that returns one reference per call and can cancel
/// the request from inside its execution.
struct RecordingSearchTool {
    cancel_on_execute: Option<CancelToken>,
}

#[async_trait]
impl Tool for RecordingSearchTool {
    fn name(&self) -> String {
        "knowledge_search".to_string()
    }

    fn description(&self) -> String {
        "search".to_string()
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _ctx: &ToolContext, _args: Value) -> ToolResult {
        if let Some(cancel) = &self.cancel_on_execute {
            cancel.cancel();
        }
        let reference = search_result("chunk-1", "k1", 0.9, MatchType::Embedding);
        ToolResult::ok("found one chunk").with_data(json!({
            "references": [reference],
            "count": 1,
        }))
    }
}

fn agent_config(max_iterations: usize) -> AgentConfig {
    AgentConfig {
        enabled: true,
        max_iterations,
        knowledge_bases: vec!["k1".to_string()],
        ..Default::default()
    }
}

fn registry_with_search(cancel_on_execute: Option<CancelToken>) -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(RecordingSearchTool { cancel_on_execute }));
    registry
}

struct Harness {
    engine: AgentEngine,
    recorder: common::EventRecorder,
    ctx: ToolContext,
}

async fn harness(
    config: AgentConfig,
    model: Arc<ScriptedChatModel>,
    cancel_on_execute: Option<CancelToken>,
) -> Harness {
    let bus = Arc::new(EventBus::new());
    let recorder = common::EventRecorder::new();
    recorder.subscribe_all(&bus).await;

    let ctx = ToolContext {
        tenant_id: 1,
        session_id: "s1".to_string(),
        request_id: "r1".to_string(),
        cancel: CancelToken::new(),
    };

    let engine = AgentEngine::new(
        config,
        registry_with_search(cancel_on_execute),
        Arc::new(StaticModelProvider::new(model, None)),
        Arc::new(FixtureCatalog::new(&["k1"])),
        bus,
    )
    .unwrap();

    Harness { engine, recorder, ctx }
}

#[tokio::test]
async fn direct_answer_completes_in_one_step() {
    let model = Arc::new(ScriptedChatModel::new(vec![vec![
        reasoning_chunk("the question is simple"),
        text_chunk("Paris is the capital of France."),
        done_chunk(),
    ]]));
    let h = harness(agent_config(5), model, None).await;

    let outcome = h
        .engine
        .execute(&h.ctx, "m1", "capital of France?", Vec::new())
        .await
        .unwrap();

    assert_eq!(outcome.final_answer, "Paris is the capital of France.");
    assert!(!outcome.stopped);
    assert_eq!(outcome.steps.len(), 1);
    assert_eq!(outcome.steps[0].thought.as_deref(), Some("the question is simple"));

    let kinds = h.recorder.kinds();
    assert!(kinds.contains(&EventKind::AgentThought));
    assert!(kinds.contains(&EventKind::AgentFinalAnswer));
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::AgentComplete).count(),
        1
    );
    assert!(!kinds.contains(&EventKind::AgentToolCall));
}

/// S6: with max_iterations = 2 and a model that always wants a tool, the
/// run emits exactly two tool calls, then a truthful forced final answer
/// and a single completion.
#[tokio::test]
async fn iteration_cap_forces_final_answer() {
    let model = Arc::new(
        ScriptedChatModel::new(vec![
            vec![tool_call_chunk("knowledge_search", json!({"query": "a"}))],
            vec![tool_call_chunk("knowledge_search", json!({"query": "b"}))],
        ])
        // The forced synthesis call yields no content, so the engine's own
        // truthful explanation is used.
        .with_default(vec![done_chunk()]),
    );
    let h = harness(agent_config(2), model, None).await;

    let outcome = h
        .engine
        .execute(&h.ctx, "m1", "needs research", Vec::new())
        .await
        .unwrap();

    let kinds = h.recorder.kinds();
    let tool_calls = kinds.iter().filter(|k| **k == EventKind::AgentToolCall).count();
    assert_eq!(tool_calls, 2);
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::AgentComplete).count(),
        1
    );
    assert_eq!(kinds.last(), Some(&EventKind::AgentComplete));
    assert!(outcome.final_answer.contains("2 tool iterations"));
    assert_eq!(outcome.steps.len(), 2);
}

#[tokio::test]
async fn tool_references_are_accumulated_and_emitted() {
    let model = Arc::new(ScriptedChatModel::new(vec![
        vec![tool_call_chunk("knowledge_search", json!({"query": "x"}))],
        vec![text_chunk("Answer grounded in chunk-1."), done_chunk()],
    ]));
    let h = harness(agent_config(5), model, None).await;

    let outcome = h
        .engine
        .execute(&h.ctx, "m1", "find it", Vec::new())
        .await
        .unwrap();

    assert_eq!(outcome.knowledge_refs.len(), 1);
    assert_eq!(outcome.knowledge_refs[0].id, "chunk-1");

    let events = h.recorder.events.lock().unwrap().clone();
    let references = events
        .iter()
        .find_map(|e| match &e.data {
            EventData::AgentReferences { references } => Some(references.clone()),
            _ => None,
        })
        .expect("references event");
    assert_eq!(references.len(), 1);

    let tool_result_ok = events.iter().any(|e| {
        matches!(&e.data, EventData::AgentToolResult { success: true, tool_name, .. }
            if tool_name == "knowledge_search")
    });
    assert!(tool_result_ok);
}

/// Cancellation promptness: a stop during a tool step prevents any further
/// tool_call/answer/thinking events; the completion carries the sentinel.
#[tokio::test]
async fn stop_during_tool_step_halts_the_loop() {
    let cancel_from_tool = CancelToken::new();
    let model = Arc::new(
        ScriptedChatModel::new(vec![vec![tool_call_chunk(
            "knowledge_search",
            json!({"query": "x"}),
        )]])
        .with_default(vec![text_chunk("should never stream"), done_chunk()]),
    );

    let bus = Arc::new(EventBus::new());
    let recorder = common::EventRecorder::new();
    recorder.subscribe_all(&bus).await;

    let ctx = ToolContext {
        tenant_id: 1,
        session_id: "s1".to_string(),
        request_id: "r1".to_string(),
        cancel: cancel_from_tool.clone(),
    };
    let engine = AgentEngine::new(
        agent_config(5),
        registry_with_search(Some(cancel_from_tool)),
        Arc::new(StaticModelProvider::new(model, None)),
        Arc::new(FixtureCatalog::new(&["k1"])),
        Arc::clone(&bus),
    )
    .unwrap();

    let outcome = engine.execute(&ctx, "m1", "long task", Vec::new()).await.unwrap();

    assert!(outcome.stopped);
    assert_eq!(outcome.final_answer, STOP_SENTINEL);

    let kinds = recorder.kinds();
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::AgentToolCall).count(),
        1,
        "no tool calls after the stop"
    );
    // After the stop only the completion may follow.
    let complete_index = kinds.iter().position(|k| *k == EventKind::AgentComplete).unwrap();
    assert_eq!(complete_index, kinds.len() - 1);
}

#[tokio::test]
async fn invalid_inputs_are_rejected_without_events() {
    let model = Arc::new(ScriptedChatModel::new(vec![]));
    let h = harness(agent_config(5), model, None).await;

    let err = h.engine.execute(&h.ctx, "m1", "   ", Vec::new()).await.unwrap_err();
    assert!(matches!(err, WeKnoraError::InvalidArgument(_)));
    assert!(h.recorder.kinds().is_empty());

    let mut config = agent_config(5);
    config.knowledge_bases.clear();
    let engine = AgentEngine::new(
        config,
        registry_with_search(None),
        Arc::new(StaticModelProvider::new(Arc::new(ScriptedChatModel::new(vec![])), None)),
        Arc::new(FixtureCatalog::new(&[])),
        Arc::new(EventBus::new()),
    )
    .unwrap();
    let err = engine
        .execute(&h.ctx, "m1", "question", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WeKnoraError::NoKnowledgeBase(_)));
}

#[tokio::test]
async fn config_bounds_are_validated_at_construction() {
    let mut config = agent_config(0);
    config.max_iterations = 31;
    let result = AgentEngine::new(
        config,
        registry_with_search(None),
        Arc::new(StaticModelProvider::new(Arc::new(ScriptedChatModel::new(vec![])), None)),
        Arc::new(FixtureCatalog::new(&["k1"])),
        Arc::new(EventBus::new()),
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn llm_failure_emits_error_event_and_terminates() {
    let bus = Arc::new(EventBus::new());
    let recorder = common::EventRecorder::new();
    recorder.subscribe_all(&bus).await;

    let ctx = ToolContext {
        tenant_id: 1,
        session_id: "s1".to_string(),
        request_id: "r1".to_string(),
        cancel: CancelToken::new(),
    };
    let engine = AgentEngine::new(
        agent_config(5),
        registry_with_search(None),
        Arc::new(StaticModelProvider::new(Arc::new(FailingChatModel), None)),
        Arc::new(FixtureCatalog::new(&["k1"])),
        Arc::clone(&bus),
    )
    .unwrap();

    let err = engine.execute(&ctx, "m1", "question", Vec::new()).await.unwrap_err();
    assert!(matches!(err, WeKnoraError::External(_)));

    let events = recorder.events.lock().unwrap().clone();
    let error_event = events
        .iter()
        .find_map(|e| match &e.data {
            EventData::Error { stage, .. } => Some(stage.clone()),
            _ => None,
        })
        .expect("error event");
    assert_eq!(error_event, "agent_execution");
    assert!(!recorder.kinds().contains(&EventKind::AgentComplete));
}

#[tokio::test]
async fn reflection_runs_after_tool_steps_when_enabled() {
    let model = Arc::new(ScriptedChatModel::new(vec![
        vec![tool_call_chunk("knowledge_search", json!({"query": "x"}))],
        // Reflection stream.
        vec![text_chunk("found a chunk, enough to answer"), done_chunk()],
        // Final answer step.
        vec![text_chunk("The answer."), done_chunk()],
    ]));
    let mut config = agent_config(5);
    config.reflection_enabled = true;
    let h = harness(config, model, None).await;

    let outcome = h.engine.execute(&h.ctx, "m1", "find it", Vec::new()).await.unwrap();

    assert_eq!(outcome.final_answer, "The answer.");
    assert_eq!(
        outcome.steps[0].reflection.as_deref(),
        Some("found a chunk, enough to answer")
    );
    assert!(h.recorder.kinds().contains(&EventKind::AgentReflection));
}
