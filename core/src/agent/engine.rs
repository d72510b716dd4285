// ReAct agent loop.
//
// Each iteration streams one LLM step (thoughts and answer text as
// incremental events under stable ids), dispatches any requested tools in
// parallel, optionally reflects, and stops when the model answers without
// tools, the iteration cap is hit, or the request is cancelled.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::prompts::build_react_system_prompt;
use crate::event::{Event, EventBus, EventData};
use crate::llm::{ChatModel, ChatOptions, ModelProvider};
use crate::storage::KnowledgeBaseCatalog;
use crate::tools::{extract_references, ToolContext, ToolRegistry};
use crate::types::{
    AgentConfig, AgentStep, ChatMessage, KnowledgeBaseInfo, SearchResult, ToolCallRecord,
    ToolResult, STOP_SENTINEL,
};
use crate::{Result, WeKnoraError};

/// Maximum characters of one tool output fed back into the conversation.
const TOOL_OUTPUT_CONTEXT_LIMIT: usize = 8_000;

/// Final state of one agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub final_answer: String,
    pub knowledge_refs: Vec<SearchResult>,
    pub steps: Vec<AgentStep>,
    pub stopped: bool,
}

pub struct AgentEngine {
    config: AgentConfig,
    registry: Arc<ToolRegistry>,
    models: Arc<dyn ModelProvider>,
    catalog: Arc<dyn KnowledgeBaseCatalog>,
    bus: Arc<EventBus>,
}

impl AgentEngine {
    pub fn new(
        config: AgentConfig,
        registry: Arc<ToolRegistry>,
        models: Arc<dyn ModelProvider>,
        catalog: Arc<dyn KnowledgeBaseCatalog>,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, registry, models, catalog, bus })
    }

    async fn emit(&self, ctx: &ToolContext, id: String, data: EventData) {
        self.bus
            .emit(
                Event::new(id, ctx.session_id.clone(), data)
                    .with_request_id(ctx.request_id.clone()),
            )
            .await;
    }

    async fn emit_error(&self, ctx: &ToolContext, error: &WeKnoraError) {
        self.emit(
            ctx,
            format!("{}-error", ctx.request_id),
            EventData::Error {
                error: error.to_string(),
                stage: "agent_execution".to_string(),
                session_id: ctx.session_id.clone(),
            },
        )
        .await;
    }

    async fn knowledge_base_infos(&self) -> Vec<KnowledgeBaseInfo> {
        let mut infos = Vec::with_capacity(self.config.knowledge_bases.len());
        for kb_id in &self.config.knowledge_bases {
            match self.catalog.get_knowledge_base(kb_id).await {
                Ok(Some(info)) => infos.push(info),
                Ok(None) => {
                    warn!(target: "agent", kb_id = %kb_id, "Configured knowledge base not found")
                }
                Err(e) => {
                    warn!(target: "agent", kb_id = %kb_id, error = %e, "Knowledge base lookup failed")
                }
            }
        }
        infos
    }

    /// Run the agent loop for one query. Events flow to the engine's bus;
    /// the returned outcome mirrors the emitted `AgentComplete`.
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        message_id: &str,
        query: &str,
        history: Vec<ChatMessage>,
    ) -> Result<AgentOutcome> {
        if query.trim().is_empty() {
            return Err(WeKnoraError::InvalidArgument("query must not be empty".to_string()));
        }
        if self.config.knowledge_bases.is_empty() {
            return Err(WeKnoraError::NoKnowledgeBase(
                "agent requires at least one resolvable knowledge base".to_string(),
            ));
        }

        let model = match self.models.chat_model(&self.config.thinking_model_id).await {
            Ok(m) => m,
            Err(e) => {
                self.emit_error(ctx, &e).await;
                return Err(e);
            }
        };

        let tools = self.registry.function_definitions(&self.config.allowed_tools);
        let kb_infos = self.knowledge_base_infos().await;
        let system_prompt =
            build_react_system_prompt(&kb_infos, &tools, self.config.max_iterations);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history);
        messages.push(ChatMessage::user(query.to_string()));

        let opts = ChatOptions {
            temperature: Some(self.config.temperature),
            ..Default::default()
        };

        let answer_id = format!("{}-answer", ctx.request_id);
        let mut final_answer = String::new();
        let mut knowledge_refs: Vec<SearchResult> = Vec::new();
        let mut seen_ref_ids: HashSet<String> = HashSet::new();
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut completed = false;
        let mut stopped = false;

        for iteration in 1..=self.config.max_iterations {
            if ctx.cancel.is_cancelled() {
                stopped = true;
                break;
            }

            let step_started = Instant::now();
            let thought_id = format!("{}-thought-{}", ctx.request_id, iteration);

            info!(
                target: "agent",
                session_id = %ctx.session_id,
                iteration,
                max_iterations = self.config.max_iterations,
                "Agent iteration started"
            );

            let step_stream = match self
                .stream_step(
                    ctx,
                    model.as_ref(),
                    &messages,
                    &tools,
                    &opts,
                    &thought_id,
                    &answer_id,
                )
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    self.emit_error(ctx, &e).await;
                    return Err(e);
                }
            };

            if step_stream.cancelled {
                stopped = true;
                break;
            }

            final_answer.push_str(&step_stream.content);

            if step_stream.tool_calls.is_empty() {
                // No tools requested: the streamed content is the final
                // answer.
                self.emit(
                    ctx,
                    answer_id.clone(),
                    EventData::AgentFinalAnswer { content: String::new(), done: true },
                )
                .await;
                steps.push(AgentStep {
                    step_index: iteration,
                    thought: step_stream.thought(),
                    tool_calls: Vec::new(),
                    tool_results: Vec::new(),
                    reflection: None,
                    elapsed_ms: step_started.elapsed().as_millis() as u64,
                });
                completed = true;
                break;
            }

            let tool_results = self
                .dispatch_tools(ctx, iteration, &step_stream.tool_calls)
                .await;

            // Collect references from knowledge-bearing tool results.
            let mut new_refs = false;
            for result in &tool_results {
                for reference in extract_references(result.data.as_ref()) {
                    if seen_ref_ids.insert(reference.id.clone()) {
                        knowledge_refs.push(reference);
                        new_refs = true;
                    }
                }
            }
            if new_refs {
                self.emit(
                    ctx,
                    format!("{}-references-{}", ctx.request_id, iteration),
                    EventData::AgentReferences { references: knowledge_refs.clone() },
                )
                .await;
            }

            // Feed the step back into the conversation.
            let call_summary = step_stream
                .tool_calls
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let assistant_text = if step_stream.content.is_empty() {
                format!("Calling tools: {call_summary}")
            } else {
                step_stream.content.clone()
            };
            messages.push(ChatMessage::assistant(assistant_text));
            messages.push(ChatMessage::user(format_tool_results(
                &step_stream.tool_calls,
                &tool_results,
            )));

            let reflection = if self.config.reflection_enabled {
                self.reflect(ctx, model.as_ref(), &messages, &opts, iteration).await
            } else {
                None
            };
            if let Some(text) = &reflection {
                messages.push(ChatMessage::assistant(format!("Reflection: {text}")));
            }

            steps.push(AgentStep {
                step_index: iteration,
                thought: step_stream.thought(),
                tool_calls: step_stream.tool_calls.clone(),
                tool_results,
                reflection,
                elapsed_ms: step_started.elapsed().as_millis() as u64,
            });
        }

        if stopped {
            info!(target: "agent", session_id = %ctx.session_id, "Agent run stopped by user");
            final_answer = STOP_SENTINEL.to_string();
        } else if !completed {
            // Iteration cap: force a tool-less final answer that is honest
            // about the early stop.
            final_answer = self
                .forced_final_answer(ctx, model.as_ref(), &mut messages, &opts, &answer_id)
                .await;
        }

        self.emit(
            ctx,
            format!("{}-complete", ctx.request_id),
            EventData::AgentComplete {
                session_id: ctx.session_id.clone(),
                message_id: message_id.to_string(),
                final_answer: final_answer.clone(),
                knowledge_refs: knowledge_refs.clone(),
                agent_steps: steps.clone(),
            },
        )
        .await;

        Ok(AgentOutcome { final_answer, knowledge_refs, steps, stopped })
    }

    /// Stream one LLM step, emitting thought/answer chunks as they arrive.
    #[allow(clippy::too_many_arguments)]
    async fn stream_step(
        &self,
        ctx: &ToolContext,
        model: &dyn ChatModel,
        messages: &[ChatMessage],
        tools: &[crate::types::FunctionDefinition],
        opts: &ChatOptions,
        thought_id: &str,
        answer_id: &str,
    ) -> Result<StepStream> {
        let mut rx = model.chat_stream(messages, tools, opts).await?;

        let mut stream = StepStream::default();
        loop {
            let chunk = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    stream.cancelled = true;
                    break;
                }
                chunk = rx.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
            };

            if !chunk.reasoning.is_empty() {
                stream.reasoning.push_str(&chunk.reasoning);
                self.emit(
                    ctx,
                    thought_id.to_string(),
                    EventData::AgentThought { content: chunk.reasoning, done: false },
                )
                .await;
            }
            if !chunk.content.is_empty() {
                stream.content.push_str(&chunk.content);
                self.emit(
                    ctx,
                    answer_id.to_string(),
                    EventData::AgentFinalAnswer { content: chunk.content, done: false },
                )
                .await;
            }
            if chunk.done {
                stream.tool_calls = chunk.tool_calls;
                break;
            }
        }

        // Close the thought before any tool activity is reported.
        if !stream.reasoning.is_empty() {
            self.emit(
                ctx,
                thought_id.to_string(),
                EventData::AgentThought { content: String::new(), done: true },
            )
            .await;
        }

        Ok(stream)
    }

    /// Run every requested tool concurrently, preserving request order in
    /// the result list, and emit call/result events.
    async fn dispatch_tools(
        &self,
        ctx: &ToolContext,
        iteration: usize,
        calls: &[ToolCallRecord],
    ) -> Vec<ToolResult> {
        for (j, call) in calls.iter().enumerate() {
            self.emit(
                ctx,
                format!("{}-tool-{}-{}", ctx.request_id, iteration, j),
                EventData::AgentToolCall {
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            )
            .await;
        }

        let mut join_set: JoinSet<(usize, ToolResult, u64)> = JoinSet::new();
        for (j, call) in calls.iter().enumerate() {
            let registry = self.registry.clone();
            let tool_ctx = ctx.clone();
            let call = call.clone();
            join_set.spawn(async move {
                let started = Instant::now();
                let result = registry
                    .execute_tool(&tool_ctx, &call.name, call.arguments.clone())
                    .await;
                (j, result, started.elapsed().as_millis() as u64)
            });
        }

        let mut results: Vec<Option<(ToolResult, u64)>> = vec![None; calls.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((j, result, elapsed_ms)) => results[j] = Some((result, elapsed_ms)),
                Err(e) => warn!(target: "agent", error = %e, "Tool task panicked"),
            }
        }

        let mut ordered = Vec::with_capacity(calls.len());
        for (j, call) in calls.iter().enumerate() {
            let (result, duration_ms) = results[j]
                .take()
                .unwrap_or_else(|| (ToolResult::err("tool task failed"), 0));

            self.emit(
                ctx,
                format!("{}-toolresult-{}-{}", ctx.request_id, iteration, j),
                EventData::AgentToolResult {
                    tool_name: call.name.clone(),
                    success: result.success,
                    output: result.output.clone(),
                    error: result.error.clone(),
                    duration_ms,
                    data: result.data.clone(),
                },
            )
            .await;

            debug!(
                target: "agent",
                tool = %call.name,
                success = result.success,
                duration_ms,
                "Tool finished"
            );
            ordered.push(result);
        }
        ordered
    }

    /// Brief streamed reflection on progress after a tool step.
    async fn reflect(
        &self,
        ctx: &ToolContext,
        model: &dyn ChatModel,
        messages: &[ChatMessage],
        opts: &ChatOptions,
        iteration: usize,
    ) -> Option<String> {
        let reflection_id = format!("{}-reflection-{}", ctx.request_id, iteration);

        let mut prompt = messages.to_vec();
        prompt.push(ChatMessage::user(
            "Briefly reflect on the progress so far: what has been learned, what is \
             still missing, and what the next step should be. Two or three sentences.",
        ));

        let mut rx = match model.chat_stream(&prompt, &[], opts).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(target: "agent", error = %e, "Reflection call failed, skipping");
                return None;
            }
        };

        let mut reflection = String::new();
        loop {
            let chunk = tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                chunk = rx.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
            };
            if !chunk.content.is_empty() {
                reflection.push_str(&chunk.content);
                self.emit(
                    ctx,
                    reflection_id.clone(),
                    EventData::AgentReflection { content: chunk.content, done: false },
                )
                .await;
            }
            if chunk.done {
                break;
            }
        }

        if reflection.is_empty() {
            return None;
        }
        self.emit(
            ctx,
            reflection_id,
            EventData::AgentReflection { content: String::new(), done: true },
        )
        .await;
        Some(reflection)
    }

    /// The iteration budget ran out with tools still being requested: ask
    /// for a synthesis without tools, falling back to a static explanation.
    async fn forced_final_answer(
        &self,
        ctx: &ToolContext,
        model: &dyn ChatModel,
        messages: &mut Vec<ChatMessage>,
        opts: &ChatOptions,
        answer_id: &str,
    ) -> String {
        messages.push(ChatMessage::user(format!(
            "You have used all {} available tool iterations. Provide your best final \
             answer now from the information gathered so far, and state explicitly \
             which parts remain unverified because the iteration limit was reached.",
            self.config.max_iterations
        )));

        let mut final_answer = String::new();
        match model.chat_stream(messages, &[], opts).await {
            Ok(mut rx) => loop {
                let chunk = tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    chunk = rx.recv() => match chunk {
                        Some(chunk) => chunk,
                        None => break,
                    },
                };
                if !chunk.content.is_empty() {
                    final_answer.push_str(&chunk.content);
                    self.emit(
                        ctx,
                        answer_id.to_string(),
                        EventData::AgentFinalAnswer { content: chunk.content, done: false },
                    )
                    .await;
                }
                if chunk.done {
                    break;
                }
            },
            Err(e) => {
                warn!(target: "agent", error = %e, "Forced final answer call failed");
            }
        }

        if final_answer.is_empty() {
            final_answer = format!(
                "I reached the limit of {} tool iterations before completing the \
                 research, so this answer may be incomplete.",
                self.config.max_iterations
            );
            self.emit(
                ctx,
                answer_id.to_string(),
                EventData::AgentFinalAnswer { content: final_answer.clone(), done: false },
            )
            .await;
        }

        self.emit(
            ctx,
            answer_id.to_string(),
            EventData::AgentFinalAnswer { content: String::new(), done: true },
        )
        .await;
        final_answer
    }
}

#[derive(Default)]
struct StepStream {
    reasoning: String,
    content: String,
    tool_calls: Vec<ToolCallRecord>,
    cancelled: bool,
}

impl StepStream {
    fn thought(&self) -> Option<String> {
        if self.reasoning.is_empty() {
            None
        } else {
            Some(self.reasoning.clone())
        }
    }
}

fn format_tool_results(calls: &[ToolCallRecord], results: &[ToolResult]) -> String {
    let mut out = String::from("Tool results:\n");
    for (call, result) in calls.iter().zip(results.iter()) {
        if result.success {
            let mut output = result.output.as_str();
            if output.len() > TOOL_OUTPUT_CONTEXT_LIMIT {
                let mut end = TOOL_OUTPUT_CONTEXT_LIMIT;
                while end > 0 && !output.is_char_boundary(end) {
                    end -= 1;
                }
                output = &output[..end];
            }
            out.push_str(&format!("- {}: {}\n", call.name, output));
        } else {
            out.push_str(&format!(
                "- {}: failed ({})\n",
                call.name,
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
    out
}
