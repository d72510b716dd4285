// System prompt assembly for the agent loop.
use crate::types::{FunctionDefinition, KnowledgeBaseInfo};

fn format_knowledge_base_list(kbs: &[KnowledgeBaseInfo]) -> String {
    if kbs.is_empty() {
        return "None".to_string();
    }

    let mut out = String::from("\n");
    for (i, kb) in kbs.iter().enumerate() {
        out.push_str(&format!(
            "{}. **{}** (knowledge_base_id: `{}`)\n",
            i + 1,
            kb.name,
            kb.id
        ));
        if !kb.description.is_empty() {
            out.push_str(&format!("   - Description: {}\n", kb.description));
        }
        if !kb.recent_documents.is_empty() {
            out.push_str("   - Recently added documents:\n");
            for doc in kb.recent_documents.iter().take(10) {
                out.push_str(&format!(
                    "     - {} (knowledge_id: `{}`, added {})\n",
                    doc.title,
                    doc.id,
                    doc.created_at.format("%Y-%m-%d")
                ));
            }
        }
        out.push('\n');
    }
    out
}

fn format_tool_catalog(tools: &[FunctionDefinition]) -> String {
    if tools.is_empty() {
        return "None".to_string();
    }

    let mut out = String::from("\n");
    for (i, tool) in tools.iter().enumerate() {
        // First description line only; the full schema is delivered through
        // the function-calling interface.
        let summary = tool.description.lines().next().unwrap_or_default();
        out.push_str(&format!("{}. {} - {}\n", i + 1, tool.name, summary));
    }
    out
}

/// Build the ReAct system prompt: role, knowledge-base inventory, tool
/// catalog and working rules.
pub fn build_react_system_prompt(
    knowledge_bases: &[KnowledgeBaseInfo],
    tools: &[FunctionDefinition],
    max_iterations: usize,
) -> String {
    format!(
        r#"# Role

You are WeKnora, an intelligent knowledge base assistant. Your mission is to provide accurate, traceable information through systematic tool use and structured task management.

Core capabilities:
- Knowledge retrieval expert: proficient in searching and extracting information from knowledge bases
- Systematic thinker: use thinking and todo_write tools for planning and tracking
- Quality controller: ensure all answers are evidence-based and verifiable

# Known Information

## Available Knowledge Bases
{kb_list}

## Available Tools
{tool_catalog}

# Working Rules

1. Accuracy first: every claim in your answer must be grounded in retrieved
   content. If retrieval finds nothing relevant, say so instead of guessing.
2. Search systematically: start with knowledge_search; expand context with
   get_related_chunks when a hit needs surrounding passages; use thinking to
   evaluate results before deciding the next step.
3. Plan multi-step work: for questions that need several searches or a
   structured comparison, create a plan with todo_write and keep its step
   status current.
4. Cite sources: reference the chunk ids of the passages your answer relies
   on so the reader can trace every statement.
5. Budget: you have at most {max_iterations} tool iterations for this
   question. When you have enough evidence, stop searching and answer.

When you can answer the question, reply with the final answer directly
instead of calling another tool."#,
        kb_list = format_knowledge_base_list(knowledge_bases),
        tool_catalog = format_tool_catalog(tools),
        max_iterations = max_iterations,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentInfo;
    use chrono::Utc;

    #[test]
    fn prompt_lists_kbs_and_tools() {
        let kbs = vec![KnowledgeBaseInfo {
            id: "kb1".to_string(),
            name: "Product Docs".to_string(),
            description: "manuals".to_string(),
            recent_documents: vec![DocumentInfo {
                id: "doc1".to_string(),
                title: "Install Guide".to_string(),
                created_at: Utc::now(),
            }],
        }];
        let tools = vec![FunctionDefinition {
            name: "knowledge_search".to_string(),
            description: "Search within knowledge bases.\nMore detail.".to_string(),
            parameters: serde_json::json!({}),
        }];

        let prompt = build_react_system_prompt(&kbs, &tools, 10);
        assert!(prompt.contains("Product Docs"));
        assert!(prompt.contains("kb1"));
        assert!(prompt.contains("Install Guide"));
        assert!(prompt.contains("knowledge_search - Search within knowledge bases."));
        assert!(!prompt.contains("More detail"));
        assert!(prompt.contains("at most 10 tool iterations"));
    }

    #[test]
    fn recent_documents_capped_at_ten() {
        let docs: Vec<DocumentInfo> = (0..15)
            .map(|i| DocumentInfo {
                id: format!("doc{i}"),
                title: format!("Doc {i}"),
                created_at: Utc::now(),
            })
            .collect();
        let kbs = vec![KnowledgeBaseInfo {
            id: "kb1".to_string(),
            name: "KB".to_string(),
            description: String::new(),
            recent_documents: docs,
        }];
        let prompt = build_react_system_prompt(&kbs, &[], 5);
        assert!(prompt.contains("Doc 9"));
        assert!(!prompt.contains("Doc 10"));
    }
}
