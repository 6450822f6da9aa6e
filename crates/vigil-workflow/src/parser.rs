//! Workflow language parser — one statement per line.
//!
//! Keywords are case-sensitive; `#` starts a comment outside strings.
//! Errors read `line N: <message>` and abort the parse.

use crate::ast::{AgentDef, GoalDef, Input, Step, StepKind, Workflow};
use vigil_core::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
enum Token {
    /// Identifier, keyword, number, path, or `$var`.
    Word(String),
    /// Double-quoted string, quotes removed.
    Str(String),
    Arrow,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(w) => format!("'{}'", w),
            Token::Str(_) => "string".into(),
            Token::Arrow => "'->'".into(),
            Token::Comma => "','".into(),
        }
    }
}

fn tokenize(line: &str, line_no: usize) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '#' => break,
            c if c.is_whitespace() => {
                chars.next();
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    s.push(c);
                }
                if !closed {
                    return Err(Error::parse(line_no, "unterminated string"));
                }
                tokens.push(Token::Str(s));
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '-' => {
                chars.next();
                if chars.peek() == Some(&'>') {
                    chars.next();
                    tokens.push(Token::Arrow);
                } else {
                    // A bare '-' continues a path-like word.
                    let mut w = String::from("-");
                    while let Some(&c) = chars.peek() {
                        if c.is_whitespace() || c == ',' || c == '"' || c == '#' {
                            break;
                        }
                        w.push(c);
                        chars.next();
                    }
                    tokens.push(Token::Word(w));
                }
            }
            _ => {
                let mut w = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == ',' || c == '"' || c == '#' {
                        break;
                    }
                    if c == '-' {
                        // Stop only at '->'; hyphens inside paths are fine.
                        let mut ahead = chars.clone();
                        ahead.next();
                        if ahead.peek() == Some(&'>') {
                            break;
                        }
                    }
                    w.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(w));
            }
        }
    }
    Ok(tokens)
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Cursor over one statement's tokens.
struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
    line: usize,
}

impl Cursor {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn err(&self, message: impl Into<String>) -> Error {
        Error::parse(self.line, message)
    }

    fn expect_ident(&mut self, what: &str) -> Result<String> {
        match self.next() {
            Some(Token::Word(w)) if is_ident(&w) => Ok(w),
            Some(t) => Err(self.err(format!("expected {} but found {}", what, t.describe()))),
            None => Err(self.err(format!("missing {}", what))),
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        match self.next() {
            Some(Token::Word(w)) if w == kw => Ok(()),
            Some(t) => Err(self.err(format!("expected {} but found {}", kw, t.describe()))),
            None => Err(self.err(format!("missing {} clause", kw))),
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(Token::Word(w)) if w == kw) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_arrow(&mut self) -> bool {
        if matches!(self.peek(), Some(Token::Arrow)) {
            self.pos += 1;
            return true;
        }
        false
    }

    /// `ident [, ident]*`
    fn ident_list(&mut self, what: &str) -> Result<Vec<String>> {
        let mut names = vec![self.expect_ident(what)?];
        while matches!(self.peek(), Some(Token::Comma)) {
            self.pos += 1;
            names.push(self.expect_ident(what)?);
        }
        Ok(names)
    }

    fn end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(self.err(format!("unexpected {} at end of statement", t.describe()))),
        }
    }
}

/// Parse workflow source. FROM targets stay unresolved; the loader fills in
/// prompt bodies afterwards.
pub fn parse_workflow(source: &str) -> Result<Workflow> {
    let mut wf = Workflow::default();
    let mut saw_name = false;

    for (i, raw_line) in source.lines().enumerate() {
        let line_no = i + 1;
        let tokens = tokenize(raw_line.trim_end_matches('\r'), line_no)?;
        if tokens.is_empty() {
            continue;
        }
        let mut cur = Cursor {
            tokens,
            pos: 0,
            line: line_no,
        };

        let keyword = match cur.next() {
            Some(Token::Word(w)) => w,
            Some(t) => return Err(cur.err(format!("expected keyword, found {}", t.describe()))),
            None => continue,
        };

        match keyword.as_str() {
            "NAME" => {
                if saw_name {
                    return Err(cur.err("duplicate NAME statement"));
                }
                wf.name = cur.expect_ident("workflow name")?;
                saw_name = true;
                cur.end()?;
            }
            "INPUT" => {
                let name = cur.expect_ident("input name")?;
                let default = if cur.eat_keyword("DEFAULT") {
                    match cur.next() {
                        Some(Token::Str(s)) => Some(s),
                        Some(Token::Word(w)) => Some(w),
                        _ => return Err(cur.err("DEFAULT requires a value")),
                    }
                } else {
                    None
                };
                wf.inputs.push(Input {
                    name,
                    default,
                    line: line_no,
                });
                cur.end()?;
            }
            "AGENT" => {
                let name = cur.expect_ident("agent name")?;
                let mut agent = AgentDef {
                    name,
                    line: line_no,
                    ..Default::default()
                };
                match cur.next() {
                    Some(Token::Word(w)) if w == "FROM" => match cur.next() {
                        Some(Token::Word(path)) => agent.from = Some(path),
                        Some(Token::Str(path)) => agent.from = Some(path),
                        _ => return Err(cur.err("FROM requires a path")),
                    },
                    Some(Token::Str(prompt)) => agent.prompt = prompt,
                    _ => {
                        return Err(cur.err("AGENT requires a FROM path or a prompt string"));
                    }
                }
                if cur.eat_arrow() {
                    agent.outputs = cur.ident_list("output field")?;
                }
                if cur.eat_keyword("REQUIRES") {
                    match cur.next() {
                        Some(Token::Str(profile)) => agent.profile = Some(profile),
                        _ => return Err(cur.err("REQUIRES requires a quoted profile name")),
                    }
                }
                cur.end()?;
                wf.agents.push(agent);
            }
            "GOAL" => {
                let name = cur.expect_ident("goal name")?;
                let mut goal = GoalDef {
                    name,
                    line: line_no,
                    ..Default::default()
                };
                match cur.next() {
                    Some(Token::Str(outcome)) => goal.outcome = outcome,
                    Some(Token::Word(w)) if w == "FROM" => match cur.next() {
                        Some(Token::Word(path)) => goal.from = Some(path),
                        Some(Token::Str(path)) => goal.from = Some(path),
                        _ => return Err(cur.err("FROM requires a path")),
                    },
                    _ => {
                        return Err(cur.err("GOAL requires an outcome string or a FROM path"));
                    }
                }
                if cur.eat_arrow() {
                    goal.outputs = cur.ident_list("output field")?;
                }
                if cur.eat_keyword("USING") {
                    goal.using = cur.ident_list("agent name")?;
                }
                cur.end()?;
                wf.goals.push(goal);
            }
            "RUN" => {
                let name = cur.expect_ident("step name")?;
                cur.expect_keyword("USING")?;
                let goals = cur.ident_list("goal name")?;
                cur.end()?;
                wf.steps.push(Step {
                    kind: StepKind::Run,
                    name,
                    goals,
                    within_limit: None,
                    within_var: None,
                    line: line_no,
                });
            }
            "LOOP" => {
                let name = cur.expect_ident("step name")?;
                cur.expect_keyword("USING")?;
                let goals = cur.ident_list("goal name")?;
                cur.expect_keyword("WITHIN")?;
                let (within_limit, within_var) = match cur.next() {
                    Some(Token::Word(w)) if w.starts_with('$') => {
                        let var = w[1..].to_string();
                        if !is_ident(&var) {
                            return Err(cur.err(format!("invalid variable reference '{}'", w)));
                        }
                        (None, Some(var))
                    }
                    Some(Token::Word(w)) => match w.parse::<u64>() {
                        Ok(n) => (Some(n), None),
                        Err(_) => {
                            return Err(cur.err(format!(
                                "WITHIN requires a number or $variable, found '{}'",
                                w
                            )));
                        }
                    },
                    _ => return Err(cur.err("LOOP is missing its WITHIN clause")),
                };
                cur.end()?;
                wf.steps.push(Step {
                    kind: StepKind::Loop,
                    name,
                    goals,
                    within_limit,
                    within_var,
                    line: line_no,
                });
            }
            other => {
                return Err(Error::parse(line_no, format!("unknown keyword '{}'", other)));
            }
        }
    }

    Ok(wf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_workflow() {
        let wf = parse_workflow(
            "NAME t\nINPUT topic DEFAULT \"go\"\nGOAL a \"Analyze $topic\"\nRUN main USING a\n",
        )
        .unwrap();
        assert_eq!(wf.name, "t");
        assert_eq!(wf.inputs.len(), 1);
        assert_eq!(wf.inputs[0].name, "topic");
        assert_eq!(wf.inputs[0].default.as_deref(), Some("go"));
        assert_eq!(wf.goals[0].outcome, "Analyze $topic");
        assert_eq!(wf.steps[0].kind, StepKind::Run);
        assert_eq!(wf.steps[0].goals, vec!["a"]);
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        let wf = parse_workflow("# header\nNAME t\n\nGOAL a \"x\" # trailing\nRUN m USING a\n")
            .unwrap();
        assert_eq!(wf.goals[0].outcome, "x");
    }

    #[test]
    fn loop_with_literal_and_var() {
        let wf = parse_workflow(
            "NAME t\nINPUT max DEFAULT 10\nGOAL g \"x\"\nLOOP s USING g WITHIN $max\nLOOP s2 USING g WITHIN 3\n",
        )
        .unwrap();
        assert_eq!(wf.steps[0].within_var.as_deref(), Some("max"));
        assert_eq!(wf.steps[0].within_limit, None);
        assert_eq!(wf.steps[1].within_limit, Some(3));
    }

    #[test]
    fn agent_with_outputs_and_profile() {
        let wf = parse_workflow(
            "NAME t\nAGENT critic \"Review code\" -> verdict, notes REQUIRES \"fast\"\nGOAL g \"x\" USING critic\nRUN m USING g\n",
        )
        .unwrap();
        let agent = &wf.agents[0];
        assert_eq!(agent.outputs, vec!["verdict", "notes"]);
        assert_eq!(agent.profile.as_deref(), Some("fast"));
        assert_eq!(wf.goals[0].using, vec!["critic"]);
    }

    #[test]
    fn agent_from_path_is_recorded() {
        let wf = parse_workflow("NAME t\nAGENT a FROM prompts/critic.md\nGOAL g \"x\"\nRUN m USING g\n")
            .unwrap();
        assert_eq!(wf.agents[0].from.as_deref(), Some("prompts/critic.md"));
    }

    #[test]
    fn error_carries_line_number() {
        let err = parse_workflow("NAME t\nRUN m\n").unwrap_err().to_string();
        assert!(err.starts_with("line 2:"), "got: {}", err);
        assert!(err.contains("USING"));
    }

    #[test]
    fn duplicate_name_rejected() {
        let err = parse_workflow("NAME a\nNAME b\n").unwrap_err().to_string();
        assert!(err.contains("duplicate NAME"));
    }

    #[test]
    fn unknown_keyword_rejected() {
        let err = parse_workflow("FROB x\n").unwrap_err().to_string();
        assert!(err.starts_with("line 1:"));
        assert!(err.contains("FROB"));
    }

    #[test]
    fn unterminated_string_rejected() {
        let err = parse_workflow("GOAL a \"open\n").unwrap_err().to_string();
        assert!(err.contains("unterminated"));
    }

    #[test]
    fn crlf_tolerated() {
        let wf = parse_workflow("NAME t\r\nGOAL a \"x\"\r\nRUN m USING a\r\n").unwrap();
        assert_eq!(wf.name, "t");
    }
}
