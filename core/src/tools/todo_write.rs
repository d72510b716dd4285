// Planning tool: turns a task plus ordered steps into a plan artifact the
// model can track across iterations.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::traits::{Tool, ToolContext};
use crate::types::ToolResult;

/// A single step in a research plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools_to_use: String,
    #[serde(default)]
    pub status: String,
}

pub struct TodoWriteTool;

impl TodoWriteTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TodoWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

fn status_marker(status: &str) -> &'static str {
    match status {
        "in_progress" => "[~]",
        "completed" => "[x]",
        "skipped" => "[-]",
        _ => "[ ]",
    }
}

fn format_plan(task: &str, steps: &[PlanStep]) -> String {
    let mut output = String::from("Plan created\n\n");
    output.push_str(&format!("**Task**: {task}\n\n"));

    if steps.is_empty() {
        output.push_str(
            "Note: no concrete steps were provided. Prefer 3-7 structured steps: \
             start with knowledge_search, expand key hits with get_related_chunks, \
             then evaluate with the thinking tool before answering.\n",
        );
        return output;
    }

    output.push_str("**Steps**:\n\n");
    for (i, step) in steps.iter().enumerate() {
        let status = if step.status.is_empty() { "pending" } else { &step.status };
        output.push_str(&format!(
            "  {}. {} [{}] {}\n",
            i + 1,
            status_marker(status),
            status,
            step.description
        ));
        if !step.tools_to_use.is_empty() {
            output.push_str(&format!("     tools: {}\n", step.tools_to_use));
        }
    }

    output.push_str(
        "\n**Execution guide**:\n\
         - Mark a step in_progress before executing it, completed right after\n\
         - Skip steps that findings make unnecessary\n\
         - The plan is guidance, not a hard requirement\n",
    );
    output
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> String {
        "todo_write".to_string()
    }

    fn description(&self) -> String {
        "Create a structured, actionable plan for complex research tasks.\n\n\
         Use for multi-dimensional questions, systematic comparisons and deep \
         research that needs several search steps. Skip it for simple direct \
         queries answerable with one or two searches - planning would add \
         overhead without value. Think first (thinking tool), then plan, then \
         execute while updating step status (pending, in_progress, completed, \
         skipped)."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The complex task or question the plan is for"
                },
                "steps": {
                    "type": "array",
                    "description": "Ordered plan steps with status tracking",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {
                                "type": "string",
                                "description": "Unique identifier for this step (e.g. 'step1')"
                            },
                            "description": {
                                "type": "string",
                                "description": "What to investigate or accomplish in this step"
                            },
                            "tools_to_use": {
                                "type": "string",
                                "description": "Suggested tools for this step"
                            },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "skipped"],
                                "description": "Current step status"
                            }
                        },
                        "required": ["id", "description", "status"]
                    }
                }
            },
            "required": ["task", "steps"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolResult {
        let task = args["task"].as_str().unwrap_or("(no task provided)").to_string();
        let steps: Vec<PlanStep> = args["steps"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|s| serde_json::from_value(s.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        let output = format_plan(&task, &steps);

        ToolResult::ok(output).with_data(json!({
            "task": task,
            "steps": steps,
            "total_steps": steps.len(),
            "plan_created": true,
            "display_type": "plan",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn formats_steps_with_status_markers() {
        let tool = TodoWriteTool::new();
        let ctx = ToolContext::new(1, "s1");
        let result = tool
            .execute(
                &ctx,
                json!({
                    "task": "compare cache systems",
                    "steps": [
                        {"id": "step1", "description": "search redis", "status": "completed"},
                        {"id": "step2", "description": "search memcached", "status": "in_progress",
                         "tools_to_use": "knowledge_search"},
                    ]
                }),
            )
            .await;
        assert!(result.success);
        assert!(result.output.contains("[x] [completed] search redis"));
        assert!(result.output.contains("[~] [in_progress] search memcached"));
        assert!(result.output.contains("tools: knowledge_search"));
        assert_eq!(result.data.unwrap()["total_steps"], 2);
    }

    #[tokio::test]
    async fn empty_steps_suggest_a_workflow() {
        let tool = TodoWriteTool::new();
        let ctx = ToolContext::new(1, "s1");
        let result = tool.execute(&ctx, json!({"task": "t", "steps": []})).await;
        assert!(result.success);
        assert!(result.output.contains("no concrete steps"));
    }
}
