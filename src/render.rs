//! Chronological timeline renderer for a session log.
//!
//! Events stay in seq order; goals open a section, phases indent one level,
//! tool and security traffic indent two. Verbosity widens what is shown,
//! never reorders it.

use vigil_core::{clamp_utf8, Event, EventKind, Session};

pub struct RenderOptions {
    /// 0 = outline, 1 = + tool args/results, 2 = + full content.
    pub verbosity: u8,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { verbosity: 0 }
    }
}

const PREVIEW_LEN: usize = 160;
const CONTENT_CAP: usize = 64 * 1024;

pub fn render_session(session: &Session, opts: &RenderOptions) -> String {
    let mut session = session.clone();
    session.truncate_content(CONTENT_CAP);

    let mut out = String::new();
    let short_id = clamp_utf8(&session.id, 8);
    out.push_str(&format!(
        "═══ {} ({}) ═══\n",
        session.workflow_name, short_id
    ));
    out.push_str(&format!(
        "status: {}   started: {}\n",
        session.status,
        session.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if !session.inputs.is_empty() {
        let mut inputs: Vec<String> = session
            .inputs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        inputs.sort();
        out.push_str(&format!("inputs: {}\n", inputs.join(" ")));
    }
    out.push('\n');

    for event in &session.events {
        render_event(&mut out, event, opts);
    }

    if !session.error.is_empty() {
        out.push_str(&format!("\nrun failed: {}\n", session.error));
    }
    out
}

fn render_event(out: &mut String, event: &Event, opts: &RenderOptions) {
    let ts = event.ts.format("%H:%M:%S");
    let who = if event.agent.is_empty() {
        event.goal.clone()
    } else {
        format!("{}/{}", event.goal, event.agent)
    };

    match event.kind {
        EventKind::WorkflowStart => {
            out.push_str(&format!("{} workflow start: {}\n", ts, preview(&event.content, opts)));
        }
        EventKind::WorkflowEnd => {
            let status = if event.success == Some(true) { "ok" } else { "FAILED" };
            out.push_str(&format!("{} workflow end [{}] {}\n", ts, status, event.error));
        }
        EventKind::GoalStart => {
            out.push_str(&format!(
                "\n{} ─── goal {} ({}) ───\n",
                ts, event.goal, event.step
            ));
            if opts.verbosity >= 1 {
                out.push_str(&format!("  task: {}\n", preview(&event.content, opts)));
            }
        }
        EventKind::GoalEnd => {
            let status = if event.success == Some(true) { "ok" } else { "FAILED" };
            out.push_str(&format!(
                "{} ─── goal {} end [{}] {} ───\n",
                ts, event.goal, status, event.error
            ));
        }
        EventKind::PhaseCommit => {
            out.push_str(&format!(
                "{}   [commit] {} (confidence {})\n",
                ts,
                preview(event.meta["commitment"].as_str().unwrap_or(""), opts),
                event.meta["confidence"].as_str().unwrap_or("?")
            ));
        }
        EventKind::PhaseExecute => {
            out.push_str(&format!(
                "{}   [execute] {} tool calls in {}ms\n",
                ts, event.meta["tool_calls"], event.duration_ms
            ));
        }
        EventKind::PhaseReconcile => {
            let escalate = event.meta["escalate"].as_bool().unwrap_or(false);
            let triggers: Vec<String> = event.meta["triggers"]
                .as_array()
                .map(|a| a.iter().filter_map(|t| t.as_str().map(String::from)).collect())
                .unwrap_or_default();
            if escalate {
                out.push_str(&format!(
                    "{}   [reconcile] ESCALATE [{}]\n",
                    ts,
                    triggers.join(", ")
                ));
            } else {
                out.push_str(&format!("{}   [reconcile] pass\n", ts));
            }
        }
        EventKind::PhaseSupervise => {
            out.push_str(&format!(
                "{}   [supervise] {} {}\n",
                ts,
                event.meta["verdict"].as_str().unwrap_or("?"),
                preview(event.meta["correction"].as_str().unwrap_or(""), opts)
            ));
        }
        EventKind::User => {
            if opts.verbosity >= 1 {
                out.push_str(&format!("{}     [user {}] {}\n", ts, who, preview(&event.content, opts)));
            }
        }
        EventKind::Assistant => {
            out.push_str(&format!(
                "{}     [assistant {}] {} ({}ms)\n",
                ts,
                who,
                preview(&event.content, opts),
                event.duration_ms
            ));
        }
        EventKind::System => {
            if opts.verbosity >= 2 {
                out.push_str(&format!("{}     [system {}] {}\n", ts, who, preview(&event.content, opts)));
            }
        }
        EventKind::ToolCall => {
            out.push_str(&format!(
                "{}     [tool:{}] {} {}\n",
                ts,
                event.tool_name,
                summarize_args(&event.tool_name, &event.args),
                corr(event)
            ));
        }
        EventKind::ToolResult => {
            let marker = if event.success == Some(false) { "✗" } else { "→" };
            let body = if event.success == Some(false) {
                &event.error
            } else {
                &event.content
            };
            if opts.verbosity >= 1 || event.success == Some(false) {
                out.push_str(&format!("{}       {} {}\n", ts, marker, preview(body, opts)));
            }
        }
        EventKind::SecurityStatic => {
            if opts.verbosity >= 1 {
                let pass = event.meta["pass"].as_bool().unwrap_or(false);
                out.push_str(&format!(
                    "{}       [security:static] {} {}\n",
                    ts,
                    if pass { "pass" } else { "FLAGGED" },
                    event.meta["flags"]
                ));
            }
        }
        EventKind::SecurityTriage => {
            if opts.verbosity >= 1 {
                out.push_str(&format!(
                    "{}       [security:triage] suspicious={} {}\n",
                    ts,
                    event.meta["suspicious"],
                    preview(event.meta["rationale"].as_str().unwrap_or(""), opts)
                ));
            }
        }
        EventKind::SecuritySupervisor => {
            out.push_str(&format!(
                "{}       [security:supervisor] {} {}\n",
                ts,
                event.meta["action"].as_str().unwrap_or("?"),
                preview(event.meta["reason"].as_str().unwrap_or(""), opts)
            ));
        }
        EventKind::SecurityDecision => {
            out.push_str(&format!(
                "{}       [security:decision] {} via {} — {}\n",
                ts,
                event.meta["action"].as_str().unwrap_or("?"),
                event.meta["check_path"].as_str().unwrap_or("?"),
                preview(event.meta["reason"].as_str().unwrap_or(""), opts)
            ));
        }
        EventKind::SecurityBlock => {
            out.push_str(&format!(
                "{}       [security:BLOCKED] {}\n",
                ts,
                preview(&event.error, opts)
            ));
        }
        EventKind::BashSecurity => {
            if opts.verbosity >= 1 {
                out.push_str(&format!(
                    "{}       [bash {}] {} — {}\n",
                    ts,
                    event.meta["check"].as_str().unwrap_or("?"),
                    event.meta["decision"].as_str().unwrap_or("?"),
                    preview(&event.content, opts)
                ));
            }
        }
        EventKind::Checkpoint => {
            out.push_str(&format!("{}   [checkpoint] {}\n", ts, event.content));
        }
        EventKind::SubagentStart => {
            out.push_str(&format!(
                "{}   [subagent {} start] (parent seq {})\n",
                ts, event.agent, event.parent_seq
            ));
        }
        EventKind::SubagentEnd => {
            let status = if event.success == Some(true) { "ok" } else { "FAILED" };
            out.push_str(&format!(
                "{}   [subagent {} end [{}]] {}\n",
                ts,
                event.agent,
                status,
                preview(&event.content, opts)
            ));
        }
    }
}

fn corr(event: &Event) -> String {
    if event.correlation_id.is_empty() {
        String::new()
    } else {
        format!("#{}", event.correlation_id)
    }
}

fn preview(text: &str, opts: &RenderOptions) -> String {
    let flat = text.replace('\n', " ");
    if opts.verbosity >= 2 || flat.len() <= PREVIEW_LEN {
        return flat;
    }
    format!("{}…", clamp_utf8(&flat, PREVIEW_LEN))
}

fn summarize_args(tool_name: &str, args: &serde_json::Value) -> String {
    match tool_name {
        "read" | "write" | "edit" => args
            .get("file_path")
            .or_else(|| args.get("path"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        "bash" => args
            .get("command")
            .and_then(|v| v.as_str())
            .map(|s| {
                if s.len() > 120 {
                    format!("{}…", clamp_utf8(s, 120))
                } else {
                    s.to_string()
                }
            })
            .unwrap_or_default(),
        "glob" | "grep" => args
            .get("pattern")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        "web_fetch" => args.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        "web_search" => args.get("query").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        "memory_read" | "memory_write" => {
            args.get("key").and_then(|v| v.as_str()).unwrap_or("").to_string()
        }
        _ => {
            if let Some(obj) = args.as_object() {
                for (k, v) in obj {
                    if let Some(s) = v.as_str() {
                        let display = if s.len() > 100 {
                            format!("{}…", clamp_utf8(s, 100))
                        } else {
                            s.to_string()
                        };
                        return format!("{}={}", k, display);
                    }
                }
            }
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_core::event::DecisionMeta;
    use vigil_core::{Event, EventKind, SessionStatus};

    fn session() -> Session {
        let mut session = Session {
            id: "abcdef1234567890".into(),
            workflow_name: "review".into(),
            status: SessionStatus::Complete,
            ..Default::default()
        };
        session.inputs.insert("topic".into(), "go".into());
        let events = vec![
            Event::of(EventKind::WorkflowStart).content("review"),
            Event::of(EventKind::GoalStart).goal("check").step("main").content("Review it"),
            Event::of(EventKind::ToolCall)
                .goal("check")
                .correlation("cafe0001")
                .tool("read", json!({"file_path": "/tmp/diff.patch"})),
            Event::of(EventKind::ToolResult)
                .goal("check")
                .correlation("cafe0001")
                .success(false)
                .error_text("denied by policy"),
            Event::of(EventKind::SecurityDecision)
                .goal("check")
                .correlation("cafe0001")
                .meta(&DecisionMeta {
                    action: "deny".into(),
                    check_path: "static→triage→supervisor".into(),
                    reason: "exfil".into(),
                }),
            Event::of(EventKind::GoalEnd).goal("check").step("main").success(true),
            Event::of(EventKind::WorkflowEnd).success(true),
        ];
        for (i, mut e) in events.into_iter().enumerate() {
            e.seq = i as u64 + 1;
            session.events.push(e);
        }
        session
    }

    #[test]
    fn outline_shows_goals_and_decisions() {
        let out = render_session(&session(), &RenderOptions { verbosity: 0 });
        assert!(out.contains("═══ review (abcdef12) ═══"));
        assert!(out.contains("goal check"));
        assert!(out.contains("[tool:read] /tmp/diff.patch #cafe0001"));
        assert!(out.contains("deny via static→triage→supervisor"));
        // Failed tool results always surface, even at verbosity 0.
        assert!(out.contains("✗ denied by policy"));
    }

    #[test]
    fn verbosity_gates_detail() {
        let quiet = render_session(&session(), &RenderOptions { verbosity: 0 });
        assert!(!quiet.contains("task: Review it"));
        let loud = render_session(&session(), &RenderOptions { verbosity: 1 });
        assert!(loud.contains("task: Review it"));
    }

    #[test]
    fn long_content_is_previewed() {
        let mut s = session();
        s.events[0].content = "x".repeat(500);
        let out = render_session(&s, &RenderOptions { verbosity: 0 });
        assert!(out.contains('…'));
        assert!(!out.contains(&"x".repeat(400)));
    }

    #[test]
    fn bash_args_summarized() {
        assert_eq!(
            summarize_args("bash", &json!({"command": "cargo test"})),
            "cargo test"
        );
        assert_eq!(
            summarize_args("web_fetch", &json!({"url": "https://docs.rs"})),
            "https://docs.rs"
        );
    }

    #[test]
    fn arg_summaries_clamp_on_char_boundaries() {
        // 5 ascii bytes + 2-byte chars puts byte 120 mid-char.
        let command = format!("echo {}", "ü".repeat(100));
        let summary = summarize_args("bash", &json!({"command": command}));
        assert!(summary.ends_with('…'));
        assert!(summary.len() <= 120 + '…'.len_utf8());

        let long_value = format!("k{}", "ü".repeat(80));
        let generic = summarize_args("feed", &json!({"entry": long_value}));
        assert!(generic.starts_with("entry=k"));
        assert!(generic.ends_with('…'));
    }
}
