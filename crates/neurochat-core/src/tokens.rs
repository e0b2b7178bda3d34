// Token accounting ledger
//
// Every LLM round-trip produces usage numbers that are broken down into
// per-type consumption records and attached to the assistant message that
// caused them. Tools running their own sub-LLM calls report usage through
// the context usage map, keyed by tool call id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What kind of request generated the consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    ChatCompletion,
    ToolSelection,
    CallWithinTool,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ChatCompletion => "chat-completion",
            TaskKind::ToolSelection => "tool-selection",
            TaskKind::CallWithinTool => "call-within-tool",
        }
    }
}

/// What kind of token was consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenType {
    InputCached,
    InputNoncached,
    Completion,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::InputCached => "input-cached",
            TokenType::InputNoncached => "input-noncached",
            TokenType::Completion => "completion",
        }
    }
}

/// A single append-only ledger entry, attached to an assistant message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConsumption {
    pub token_type: TokenType,
    pub task: TaskKind,
    pub count: i64,
    pub model: String,
}

/// Usage block reported by the LLM provider at the end of a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseUsage {
    pub input_tokens: i64,
    /// Portion of `input_tokens` that was served from the provider cache
    pub cached_input_tokens: i64,
    pub output_tokens: i64,
}

/// Usage reported by a tool that ran its own LLM call, keyed by call id
/// in the context usage map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolTokenUsage {
    pub model: String,
    pub input_cached: i64,
    pub input_noncached: i64,
    pub completion: i64,
}

/// Break a usage block into per-type consumption records.
///
/// Zero counts are skipped so the ledger only carries rows that matter.
pub fn consumption_from_usage(
    usage: Option<&ResponseUsage>,
    model: &str,
    task: TaskKind,
) -> Vec<TokenConsumption> {
    let Some(usage) = usage else {
        return Vec::new();
    };

    let input_cached = usage.cached_input_tokens;
    let input_noncached = usage.input_tokens - input_cached;
    let completion = usage.output_tokens;

    [
        (TokenType::InputCached, input_cached),
        (TokenType::InputNoncached, input_noncached),
        (TokenType::Completion, completion),
    ]
    .into_iter()
    .filter(|(_, count)| *count != 0)
    .map(|(token_type, count)| TokenConsumption {
        token_type,
        task,
        count,
        model: model.to_string(),
    })
    .collect()
}

/// Mint `call-within-tool` records for a tool response, if the tool reported
/// usage under its call id.
pub fn consumption_from_tool_usage(
    call_id: &str,
    usage_map: &HashMap<String, ToolTokenUsage>,
) -> Vec<TokenConsumption> {
    let Some(usage) = usage_map.get(call_id) else {
        return Vec::new();
    };

    [
        (TokenType::InputCached, usage.input_cached),
        (TokenType::InputNoncached, usage.input_noncached),
        (TokenType::Completion, usage.completion),
    ]
    .into_iter()
    .filter(|(_, count)| *count != 0)
    .map(|(token_type, count)| TokenConsumption {
        token_type,
        task: TaskKind::CallWithinTool,
        count,
        model: usage.model.clone(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumption_from_usage_splits_cached_input() {
        let usage = ResponseUsage {
            input_tokens: 120,
            cached_input_tokens: 100,
            output_tokens: 30,
        };

        let records = consumption_from_usage(Some(&usage), "gpt-5-mini", TaskKind::ChatCompletion);

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].token_type, TokenType::InputCached);
        assert_eq!(records[0].count, 100);
        assert_eq!(records[1].token_type, TokenType::InputNoncached);
        assert_eq!(records[1].count, 20);
        assert_eq!(records[2].token_type, TokenType::Completion);
        assert_eq!(records[2].count, 30);
        assert!(records.iter().all(|r| r.model == "gpt-5-mini"));
    }

    #[test]
    fn test_consumption_from_usage_skips_zero_counts() {
        let usage = ResponseUsage {
            input_tokens: 50,
            cached_input_tokens: 0,
            output_tokens: 0,
        };

        let records = consumption_from_usage(Some(&usage), "gpt-5-mini", TaskKind::ToolSelection);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].token_type, TokenType::InputNoncached);
        assert_eq!(records[0].count, 50);
        assert_eq!(records[0].task, TaskKind::ToolSelection);
    }

    #[test]
    fn test_consumption_from_usage_none() {
        assert!(consumption_from_usage(None, "gpt-5-mini", TaskKind::ChatCompletion).is_empty());
    }

    #[test]
    fn test_ledger_total_matches_usage_total() {
        let usage = ResponseUsage {
            input_tokens: 200,
            cached_input_tokens: 64,
            output_tokens: 77,
        };

        let records = consumption_from_usage(Some(&usage), "gpt-5", TaskKind::ChatCompletion);
        let total: i64 = records.iter().map(|r| r.count).sum();

        assert_eq!(total, usage.input_tokens + usage.output_tokens);
    }

    #[test]
    fn test_consumption_from_tool_usage() {
        let mut usage_map = HashMap::new();
        usage_map.insert(
            "call_1".to_string(),
            ToolTokenUsage {
                model: "gpt-5-nano".to_string(),
                input_cached: 0,
                input_noncached: 40,
                completion: 12,
            },
        );

        let records = consumption_from_tool_usage("call_1", &usage_map);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.task == TaskKind::CallWithinTool));
        assert!(records.iter().all(|r| r.model == "gpt-5-nano"));

        assert!(consumption_from_tool_usage("call_2", &usage_map).is_empty());
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_string(&TaskKind::ChatCompletion).unwrap(),
            "\"chat-completion\""
        );
        assert_eq!(
            serde_json::to_string(&TokenType::InputNoncached).unwrap(),
            "\"input-noncached\""
        );
    }
}
