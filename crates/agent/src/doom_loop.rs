//! Doom-loop detection.
//!
//! Tracks consecutive failures per call signature (tool name plus the
//! canonical JSON of its arguments). When one signature fails `threshold`
//! times in a row the tracker asks for a corrective system message and
//! starts counting again from zero. A success resets only its own
//! signature.

use std::collections::HashMap;
use tracing::warn;

/// Default consecutive-failure threshold.
pub const DOOM_LOOP_THRESHOLD: u32 = 3;

#[derive(Debug)]
pub struct DoomLoopTracker {
    failures: HashMap<String, u32>,
    threshold: u32,
}

impl Default for DoomLoopTracker {
    fn default() -> Self {
        Self::new(DOOM_LOOP_THRESHOLD)
    }
}

impl DoomLoopTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: HashMap::new(),
            threshold: threshold.max(1),
        }
    }

    /// Record one tool outcome. Returns a corrective message when the
    /// signature just reached the threshold.
    pub fn record(
        &mut self,
        tool_name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
        is_error: bool,
    ) -> Option<String> {
        let sig = signature(tool_name, arguments);

        if !is_error {
            self.failures.remove(&sig);
            return None;
        }

        let count = self.failures.entry(sig.clone()).or_insert(0);
        *count += 1;
        if *count < self.threshold {
            return None;
        }

        let failures = *count;
        self.failures.remove(&sig);
        warn!(tool = %tool_name, failures, "Repeated identical tool failure, injecting correction");
        Some(corrective_message(tool_name, failures))
    }

    /// Consecutive failures currently counted for a call.
    pub fn failures(&self, tool_name: &str, arguments: &serde_json::Map<String, serde_json::Value>) -> u32 {
        self.failures
            .get(&signature(tool_name, arguments))
            .copied()
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.failures.clear();
    }
}

/// Tool name plus recursively key-sorted compact JSON of the arguments.
pub fn signature(tool_name: &str, arguments: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut out = String::with_capacity(tool_name.len() + 32);
    out.push_str(tool_name);
    out.push(':');
    write_canonical(&mut out, &serde_json::Value::Object(arguments.clone()));
    out
}

fn write_canonical(out: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(out, &map[key]);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn corrective_message(tool_name: &str, failures: u32) -> String {
    format!(
        "The tool `{tool_name}` has failed {failures} times in a row with identical arguments. \
         Do not call it again with the same arguments. Change the arguments, use a different \
         tool, or explain the problem to the user."
    )
}
