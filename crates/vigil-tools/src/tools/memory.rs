//! memory_read / memory_write tools — key/value store
//!
//! Process-local by default; persists to a JSON file when given one.

use crate::registry::{Tool, ToolResult};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct MemoryStore {
    entries: DashMap<String, String>,
    persist_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new(persist_path: Option<PathBuf>) -> Arc<Self> {
        let entries = DashMap::new();
        if let Some(path) = &persist_path {
            if let Ok(content) = std::fs::read_to_string(path) {
                match serde_json::from_str::<std::collections::HashMap<String, String>>(&content) {
                    Ok(map) => {
                        for (k, v) in map {
                            entries.insert(k, v);
                        }
                    }
                    Err(e) => warn!("memory store at {} is corrupt: {}", path.display(), e),
                }
            }
        }
        Arc::new(Self {
            entries,
            persist_path,
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush();
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    fn flush(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let map: std::collections::HashMap<String, String> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match serde_json::to_string_pretty(&map) {
            Ok(body) => {
                if let Err(e) = std::fs::write(path, body) {
                    warn!("failed to persist memory store: {}", e);
                }
            }
            Err(e) => warn!("failed to serialize memory store: {}", e),
        }
    }
}

pub struct MemoryReadTool {
    store: Arc<MemoryStore>,
}

impl MemoryReadTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for MemoryReadTool {
    fn name(&self) -> &str {
        "memory_read"
    }

    fn description(&self) -> &str {
        "Read a value from persistent memory by key. Omit key to list all keys."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "The key to read. Omit to list keys."
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        match args["key"].as_str() {
            Some(key) => match self.store.get(key) {
                Some(value) => ToolResult::text(value),
                None => ToolResult::error(format!("no memory entry for key '{}'", key)),
            },
            None => {
                let keys = self.store.keys();
                if keys.is_empty() {
                    ToolResult::text("(memory is empty)")
                } else {
                    ToolResult::text(keys.join("\n"))
                }
            }
        }
    }
}

pub struct MemoryWriteTool {
    store: Arc<MemoryStore>,
}

impl MemoryWriteTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for MemoryWriteTool {
    fn name(&self) -> &str {
        "memory_write"
    }

    fn description(&self) -> &str {
        "Write a key/value pair to persistent memory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "The key to write"
                },
                "value": {
                    "type": "string",
                    "description": "The value to store"
                }
            },
            "required": ["key", "value"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let key = match args["key"].as_str() {
            Some(k) => k,
            None => return ToolResult::error("Missing required parameter: key"),
        };
        let value = match args["value"].as_str() {
            Some(v) => v,
            None => return ToolResult::error("Missing required parameter: value"),
        };
        self.store.set(key, value);
        debug!("memory_write: {} ({} bytes)", key, value.len());
        ToolResult::text(format!("Stored '{}'", key))
    }
}
