//! Run state — inputs, per-goal results, workflow outputs.

use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

#[derive(Clone, Debug, Default)]
pub struct RunState {
    pub inputs: HashMap<String, String>,
    /// Goal/step name → structured result.
    pub state: Map<String, Value>,
    /// Flattened structured output fields, workflow-wide.
    pub outputs: Map<String, Value>,
}

impl RunState {
    pub fn new(inputs: HashMap<String, String>) -> Self {
        Self {
            inputs,
            state: Map::new(),
            outputs: Map::new(),
        }
    }

    /// The `$name` substitution table: inputs plus every structured output
    /// recorded so far. Outputs shadow inputs on collision.
    pub fn vars(&self) -> HashMap<String, String> {
        let mut vars = self.inputs.clone();
        for (k, v) in &self.outputs {
            vars.insert(k.clone(), value_to_string(v));
        }
        vars
    }

    /// Record a goal's result: the raw text plus any structured fields.
    pub fn record_goal(&mut self, goal: &str, text: &str, structured: Option<&Value>) {
        let mut entry = Map::new();
        entry.insert("result".to_string(), Value::String(text.to_string()));
        if let Some(Value::Object(fields)) = structured {
            for (k, v) in fields {
                entry.insert(k.clone(), v.clone());
                self.outputs.insert(k.clone(), v.clone());
            }
        }
        self.state.insert(goal.to_string(), Value::Object(entry));
    }

    /// Stable fingerprint of the latest results of `goals`, used for LOOP
    /// convergence. Only the named goals participate.
    pub fn fingerprint(&self, goals: &[String]) -> u64 {
        let mut hasher = DefaultHasher::new();
        for goal in goals {
            goal.hash(&mut hasher);
            if let Some(entry) = self.state.get(goal) {
                entry.to_string().hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outputs_feed_vars() {
        let mut inputs = HashMap::new();
        inputs.insert("topic".to_string(), "go".to_string());
        let mut state = RunState::new(inputs);
        state.record_goal("a", "done", Some(&json!({"verdict": "ship it"})));

        let vars = state.vars();
        assert_eq!(vars.get("topic").map(String::as_str), Some("go"));
        assert_eq!(vars.get("verdict").map(String::as_str), Some("ship it"));
    }

    #[test]
    fn fingerprint_tracks_only_named_goals() {
        let mut state = RunState::new(HashMap::new());
        state.record_goal("a", "one", None);
        let before = state.fingerprint(&["a".to_string()]);

        // An unrelated goal changing does not move the fingerprint.
        state.record_goal("b", "noise", None);
        assert_eq!(before, state.fingerprint(&["a".to_string()]));

        state.record_goal("a", "two", None);
        assert_ne!(before, state.fingerprint(&["a".to_string()]));
    }

    #[test]
    fn non_string_outputs_stringify() {
        let mut state = RunState::new(HashMap::new());
        state.record_goal("a", "x", Some(&json!({"count": 3})));
        assert_eq!(state.vars().get("count").map(String::as_str), Some("3"));
    }
}
