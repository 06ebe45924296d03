//! Rendering backend events as chat text
//!
//! Returns `None` for events that should not reach the channel at all:
//! request bookkeeping, echoed user input, rate-limit chatter.

use serde::Deserialize;

use crate::protocol::{Choice, EventMessage, EventName, MessageKind, TaskMessage};

/// Say variants that never reach the chat
const SILENT_SAYS: &[&str] = &[
    "api_req_started",
    "api_req_finished",
    "api_req_retried",
    "user_feedback",
    "command_output",
];

pub fn render_event(event: &EventMessage) -> Option<String> {
    let task_id = event.task_id();
    match event.event_name {
        EventName::Message => event.data.message.as_ref().and_then(render_message),
        EventName::TaskCreated => Some(format!("📋 Task created: {}", task_id)),
        EventName::TaskStarted => Some(format!("🚀 Task started: {}", task_id)),
        EventName::TaskAborted => Some(format!("❌ Task aborted: {}", task_id)),
        EventName::TaskCompleted => {
            let usage = event.data.usage.unwrap_or_default();
            Some(format!(
                "📊 Task complete\nTokens: {} in, {} out\nTotal cost: ${:.6}",
                usage.total_tokens_in, usage.total_tokens_out, usage.total_cost
            ))
        }
        EventName::Unknown => None,
    }
}

fn render_message(message: &TaskMessage) -> Option<String> {
    let text = message.text.as_deref().unwrap_or("").trim();

    if is_rate_limit_notice(text) {
        return None;
    }

    match message.kind {
        MessageKind::Ask => match message.ask.as_deref() {
            Some("followup") => Some(render_followup(text, &message.choices)),
            Some("tool") => Some(format!("🛠️ Approval needed for tool:\n{}\nReply /approve or /deny", text)),
            Some("command") => Some(format!("⌨️ Approval needed to run:\n{}\nReply /approve or /deny", text)),
            _ if text.is_empty() && message.choices.is_empty() => None,
            _ => {
                let mut out = format!("❓ {}", text);
                push_options(&mut out, message.choices.iter().map(|c| c.label.as_str()));
                Some(out)
            }
        },
        MessageKind::Say => {
            let say = message.say.as_deref().unwrap_or("text");
            if SILENT_SAYS.contains(&say) {
                return None;
            }
            match say {
                "reasoning" => {
                    let body = message.reasoning.as_deref().unwrap_or(text).trim();
                    Some(format!("🤔 Thinking...\n{}", body))
                }
                "completion_result" if text.is_empty() => None,
                "completion_result" => Some(format!("✅ {}", text)),
                "error" => Some(format!("⚠️ {}", text)),
                "tool" if text.is_empty() => Some("🛠️ Using tool".to_string()),
                "tool" => Some(format!("🛠️ Using tool: {}", text)),
                _ if text.is_empty() => None,
                _ => Some(format!("💬 {}", text)),
            }
        }
    }
}

fn is_rate_limit_notice(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("rate limiting")
}

#[derive(Deserialize)]
struct Followup {
    #[serde(default)]
    question: String,
    #[serde(default)]
    suggest: Vec<Suggestion>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Suggestion {
    Plain(String),
    Labeled {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        answer: Option<String>,
    },
}

impl Suggestion {
    fn label(&self) -> &str {
        match self {
            Suggestion::Plain(s) => s,
            Suggestion::Labeled { label, answer } => {
                label.as_deref().or(answer.as_deref()).unwrap_or("")
            }
        }
    }
}

/// Followup questions arrive as JSON `{question, suggest}`; plain text is
/// shown as-is. Either way the offered choices become a numbered list.
fn render_followup(text: &str, choices: &[Choice]) -> String {
    let choice_labels = choices.iter().map(|c| c.label.as_str());

    let Ok(followup) = serde_json::from_str::<Followup>(text) else {
        let mut out = format!("❔ Question:\n{}", text);
        push_options(&mut out, choice_labels);
        return out;
    };

    let mut out = format!("❓ Question:\n{}", followup.question);
    if followup.suggest.is_empty() {
        push_options(&mut out, choice_labels);
    } else {
        push_options(&mut out, followup.suggest.iter().map(Suggestion::label));
    }
    out
}

fn push_options<'a>(out: &mut String, labels: impl Iterator<Item = &'a str>) {
    for (i, label) in labels.enumerate() {
        if i == 0 {
            out.push_str("\n\nPlease choose an option:");
        }
        out.push_str(&format!("\n{}. {}", i + 1, label));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EventData, TokenUsage};

    fn message_event(message: TaskMessage) -> EventMessage {
        EventMessage {
            channel_id: Some("42".into()),
            event_name: EventName::Message,
            data: EventData {
                task_id: "t1".into(),
                partial: message.partial,
                message: Some(message),
                usage: None,
            },
        }
    }

    #[test]
    fn test_completion_result() {
        let rendered = render_event(&message_event(TaskMessage::say("completion_result", "All done", false)));
        assert_eq!(rendered.as_deref(), Some("✅ All done"));
    }

    #[test]
    fn test_bookkeeping_is_silent() {
        assert!(render_event(&message_event(TaskMessage::say("api_req_started", "{}", false))).is_none());
        assert!(render_event(&message_event(TaskMessage::say("user_feedback", "hi", false))).is_none());
        assert!(render_event(&message_event(TaskMessage::say("text", "", false))).is_none());
    }

    #[test]
    fn test_rate_limit_chatter_is_dropped() {
        let msg = TaskMessage::say("text", "Rate limiting for 5 seconds", false);
        assert!(render_event(&message_event(msg)).is_none());
    }

    #[test]
    fn test_followup_with_suggestions() {
        let raw = r#"{"question":"Which file?","suggest":[{"answer":"main.rs"},"lib.rs",{"label":"Both"}]}"#;
        let rendered = render_event(&message_event(TaskMessage::ask("followup", raw))).unwrap();

        assert!(rendered.contains("Which file?"));
        assert!(rendered.contains("1. main.rs"));
        assert!(rendered.contains("2. lib.rs"));
        assert!(rendered.contains("3. Both"));
    }

    #[test]
    fn test_followup_choices_are_numbered() {
        let message = TaskMessage::ask("followup", "Which branch?").with_choices(vec![
            Choice {
                label: "main".into(),
                value: "main".into(),
            },
            Choice {
                label: "dev".into(),
                value: "dev".into(),
            },
        ]);
        let rendered = render_event(&message_event(message)).unwrap();

        assert_eq!(
            rendered,
            "❔ Question:\nWhich branch?\n\nPlease choose an option:\n1. main\n2. dev"
        );
    }

    #[test]
    fn test_tool_say_is_a_tool_line() {
        let rendered = render_event(&message_event(TaskMessage::say("tool", "read_file src/lib.rs", false)));
        assert_eq!(rendered.as_deref(), Some("🛠️ Using tool: read_file src/lib.rs"));
    }

    #[test]
    fn test_followup_plain_text_fallback() {
        let rendered = render_event(&message_event(TaskMessage::ask("followup", "Continue?"))).unwrap();
        assert!(rendered.contains("Continue?"));
    }

    #[test]
    fn test_tool_ask_prompts_for_approval() {
        let rendered = render_event(&message_event(TaskMessage::ask("tool", "write_file src/a.rs"))).unwrap();
        assert!(rendered.contains("/approve"));
        assert!(rendered.contains("write_file"));
    }

    #[test]
    fn test_completed_usage_summary() {
        let event = EventMessage {
            channel_id: None,
            event_name: EventName::TaskCompleted,
            data: EventData {
                task_id: "t1".into(),
                usage: Some(TokenUsage {
                    total_tokens_in: 120,
                    total_tokens_out: 45,
                    total_cost: 0.0021,
                }),
                ..Default::default()
            },
        };
        let rendered = render_event(&event).unwrap();

        assert!(rendered.contains("120 in, 45 out"));
        assert!(rendered.contains("$0.002100"));
    }

    #[test]
    fn test_lifecycle_lines_carry_task_id() {
        for name in [EventName::TaskCreated, EventName::TaskStarted, EventName::TaskAborted] {
            let event = EventMessage {
                channel_id: None,
                event_name: name,
                data: EventData {
                    task_id: "t7".into(),
                    ..Default::default()
                },
            };
            assert!(render_event(&event).unwrap().contains("t7"));
        }
    }
}
