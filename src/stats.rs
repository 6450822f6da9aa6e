//! Aggregate statistics over a session log, with optional cost accounting.

use std::collections::HashMap;
use vigil_core::event::UsageMeta;
use vigil_core::{EventKind, Session};

/// Per-model pricing: dollars per million input / output tokens.
#[derive(Clone, Copy, Debug)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    pub event_count: usize,
    pub total_ms: u64,
    /// Goal name → wall-clock duration, in declaration order of goal_end.
    pub goal_ms: Vec<(String, u64)>,
    pub llm_call_count: usize,
    pub llm_total_ms: u64,
    pub llm_avg_ms: u64,
    pub tool_call_count: usize,
    pub tool_failure_count: usize,
    pub execution_supervisions: usize,
    pub security_supervisions: usize,
    pub bash_deterministic_checks: usize,
    pub bash_llm_checks: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Total dollars, present when pricing covered at least one model.
    pub cost: Option<f64>,
}

/// Compute aggregates over a session. Pure — never touches the log.
pub fn compute_stats(
    session: &Session,
    pricing: &HashMap<String, ModelPricing>,
) -> SessionStats {
    let mut stats = SessionStats {
        event_count: session.events.len(),
        ..Default::default()
    };

    if let (Some(first), Some(last)) = (session.events.first(), session.events.last()) {
        stats.total_ms = (last.ts - first.ts).num_milliseconds().max(0) as u64;
    }

    let mut goal_starts: HashMap<String, chrono::DateTime<chrono::Utc>> = HashMap::new();
    let mut cost = 0.0f64;
    let mut priced_any = false;

    for event in &session.events {
        match event.kind {
            EventKind::GoalStart => {
                goal_starts.entry(event.goal.clone()).or_insert(event.ts);
            }
            EventKind::GoalEnd => {
                if let Some(start) = goal_starts.get(&event.goal) {
                    let ms = (event.ts - *start).num_milliseconds().max(0) as u64;
                    stats.goal_ms.push((event.goal.clone(), ms));
                }
            }
            EventKind::Assistant => {
                stats.llm_call_count += 1;
                stats.llm_total_ms += event.duration_ms;
                if let Ok(usage) = serde_json::from_value::<UsageMeta>(event.meta.clone()) {
                    stats.input_tokens += usage.input_tokens;
                    stats.output_tokens += usage.output_tokens;
                    if let Some(p) = pricing.get(&usage.model) {
                        cost += usage.input_tokens as f64 / 1e6 * p.input_per_mtok
                            + usage.output_tokens as f64 / 1e6 * p.output_per_mtok;
                        priced_any = true;
                    }
                }
            }
            EventKind::ToolCall => stats.tool_call_count += 1,
            EventKind::ToolResult => {
                if event.success == Some(false) {
                    stats.tool_failure_count += 1;
                }
            }
            EventKind::PhaseSupervise => stats.execution_supervisions += 1,
            EventKind::SecuritySupervisor => stats.security_supervisions += 1,
            EventKind::BashSecurity => {
                match event.meta["check"].as_str() {
                    Some("[llm]") => stats.bash_llm_checks += 1,
                    _ => stats.bash_deterministic_checks += 1,
                }
            }
            _ => {}
        }
    }

    if stats.llm_call_count > 0 {
        stats.llm_avg_ms = stats.llm_total_ms / stats.llm_call_count as u64;
    }
    if priced_any {
        stats.cost = Some(cost);
    }
    stats
}

/// Parse a repeatable `--cost MODEL:IN,OUT` argument.
pub fn parse_cost_spec(spec: &str) -> Result<(String, ModelPricing), String> {
    let (model, prices) = spec
        .split_once(':')
        .ok_or_else(|| format!("bad cost spec '{}', expected MODEL:IN,OUT", spec))?;
    let (input, output) = prices
        .split_once(',')
        .ok_or_else(|| format!("bad cost spec '{}', expected MODEL:IN,OUT", spec))?;
    let input_per_mtok: f64 = input
        .trim()
        .parse()
        .map_err(|_| format!("bad input price in '{}'", spec))?;
    let output_per_mtok: f64 = output
        .trim()
        .parse()
        .map_err(|_| format!("bad output price in '{}'", spec))?;
    Ok((
        model.trim().to_string(),
        ModelPricing {
            input_per_mtok,
            output_per_mtok,
        },
    ))
}

pub fn format_stats(stats: &SessionStats) -> String {
    let mut out = String::new();
    out.push_str("─── Stats ───\n");
    out.push_str(&format!(
        "events: {}   wall clock: {}\n",
        stats.event_count,
        format_ms(stats.total_ms)
    ));
    out.push_str(&format!(
        "llm calls: {} ({} total, {} avg)\n",
        stats.llm_call_count,
        format_ms(stats.llm_total_ms),
        format_ms(stats.llm_avg_ms)
    ));
    out.push_str(&format!(
        "tool calls: {} ({} failed)\n",
        stats.tool_call_count, stats.tool_failure_count
    ));
    out.push_str(&format!(
        "supervisions: {} execution, {} security\n",
        stats.execution_supervisions, stats.security_supervisions
    ));
    out.push_str(&format!(
        "bash checks: {} deterministic, {} llm\n",
        stats.bash_deterministic_checks, stats.bash_llm_checks
    ));
    if !stats.goal_ms.is_empty() {
        out.push_str("per goal:\n");
        for (goal, ms) in &stats.goal_ms {
            out.push_str(&format!("  {}: {}\n", goal, format_ms(*ms)));
        }
    }
    if stats.input_tokens + stats.output_tokens > 0 {
        out.push_str(&format!(
            "tokens: {} in, {} out\n",
            stats.input_tokens, stats.output_tokens
        ));
    }
    if let Some(cost) = stats.cost {
        out.push_str(&format!("cost: ${:.4}\n", cost));
    }
    out
}

fn format_ms(ms: u64) -> String {
    if ms >= 60_000 {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    } else if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::event::UsageMeta;
    use vigil_core::{Event, EventKind};

    fn assistant(duration_ms: u64, model: &str, input: u64, output: u64) -> Event {
        Event::of(EventKind::Assistant)
            .duration(duration_ms)
            .meta(&UsageMeta {
                model: model.to_string(),
                input_tokens: input,
                output_tokens: output,
            })
    }

    fn session_with(events: Vec<Event>) -> Session {
        let mut session = Session::default();
        for (i, mut e) in events.into_iter().enumerate() {
            e.seq = i as u64 + 1;
            session.events.push(e);
        }
        session
    }

    #[test]
    fn llm_call_aggregates() {
        let session = session_with(vec![
            assistant(100, "model", 1000, 500),
            assistant(200, "model", 1000, 500),
            assistant(300, "model", 1000, 500),
        ]);
        let stats = compute_stats(&session, &HashMap::new());
        assert_eq!(stats.llm_call_count, 3);
        assert_eq!(stats.llm_total_ms, 600);
        assert_eq!(stats.llm_avg_ms, 200);
        assert!(stats.cost.is_none());
    }

    #[test]
    fn cost_accounting_matches_pricing() {
        let session = session_with(vec![
            assistant(100, "model", 1000, 500),
            assistant(200, "model", 1000, 500),
            assistant(300, "model", 1000, 500),
        ]);
        let mut pricing = HashMap::new();
        let (name, price) = parse_cost_spec("model:3,15").unwrap();
        pricing.insert(name, price);
        let stats = compute_stats(&session, &pricing);
        // 3 × (1000/1e6·3 + 500/1e6·15) = 0.0315
        let cost = stats.cost.unwrap();
        assert!((cost - 0.0315).abs() < 1e-9, "got {}", cost);
        assert_eq!(stats.input_tokens, 3000);
        assert_eq!(stats.output_tokens, 1500);
    }

    #[test]
    fn supervisor_and_bash_check_counters() {
        let mut bash_det = Event::of(EventKind::BashSecurity);
        bash_det.meta = serde_json::json!({"check": "[deterministic]", "decision": "allow"});
        let mut bash_llm = Event::of(EventKind::BashSecurity);
        bash_llm.meta = serde_json::json!({"check": "[llm]", "decision": "deny"});
        let session = session_with(vec![
            Event::of(EventKind::PhaseSupervise),
            Event::of(EventKind::SecuritySupervisor),
            Event::of(EventKind::SecuritySupervisor),
            bash_det,
            bash_llm,
        ]);
        let stats = compute_stats(&session, &HashMap::new());
        assert_eq!(stats.execution_supervisions, 1);
        assert_eq!(stats.security_supervisions, 2);
        assert_eq!(stats.bash_deterministic_checks, 1);
        assert_eq!(stats.bash_llm_checks, 1);
    }

    #[test]
    fn goal_durations_from_start_end_pairs() {
        let base = chrono::Utc::now();
        let mut start = Event::of(EventKind::GoalStart).goal("g");
        start.ts = base;
        let mut end = Event::of(EventKind::GoalEnd).goal("g");
        end.ts = base + chrono::Duration::milliseconds(1500);
        let session = session_with(vec![start, end]);
        let stats = compute_stats(&session, &HashMap::new());
        assert_eq!(stats.goal_ms, vec![("g".to_string(), 1500)]);
    }

    #[test]
    fn cost_spec_parsing() {
        let (model, price) = parse_cost_spec("claude-sonnet-4:3,15").unwrap();
        assert_eq!(model, "claude-sonnet-4");
        assert!((price.input_per_mtok - 3.0).abs() < f64::EPSILON);
        assert!((price.output_per_mtok - 15.0).abs() < f64::EPSILON);

        assert!(parse_cost_spec("no-colon").is_err());
        assert!(parse_cost_spec("m:1").is_err());
        assert!(parse_cost_spec("m:a,b").is_err());
    }
}
