//! Card classification for tool results.
//!
//! The display category of a result is a pure function of its shape,
//! never of model output. Fields are checked in a fixed precedence order,
//! so a payload carrying both `error` and `results` is an error card.

use serde::{Deserialize, Serialize};

/// Maximum characters of an error message shown on a card.
pub const ERROR_PREVIEW_CHARS: usize = 200;

/// Maximum characters of compact JSON shown on a generic card.
const GENERIC_PREVIEW_CHARS: usize = 200;

const IMAGE_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".jpeg", ".svg", ".gif", ".webp"];

/// Display category of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    Error,
    Metrics,
    PhaseDiagram,
    Quality,
    Image,
    Results,
    Generic,
    /// A plan block from streamed text, not a tool result
    Plan,
}

/// A tool result, viewed through the fields that decide its category.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultShape<'a> {
    Error(String),
    Metrics {
        algorithm: &'a serde_json::Value,
        metrics: &'a serde_json::Value,
    },
    PhaseDiagram {
        stable_phases: Option<&'a serde_json::Value>,
    },
    Quality {
        score: &'a serde_json::Value,
        findings: &'a serde_json::Value,
    },
    Image {
        filename: &'a str,
    },
    Results {
        items: &'a [serde_json::Value],
    },
    Generic(&'a serde_json::Value),
}

impl<'a> ResultShape<'a> {
    /// Classify a result value by field presence.
    pub fn of(value: &'a serde_json::Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::Generic(value);
        };

        if let Some(error) = object.get("error").filter(|e| !e.is_null()) {
            let message = match error {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Self::Error(message);
        }

        if let (Some(metrics), Some(algorithm)) = (object.get("metrics"), object.get("algorithm")) {
            return Self::Metrics { algorithm, metrics };
        }

        if object.contains_key("stable_phases") || object.contains_key("phase_diagram") {
            return Self::PhaseDiagram {
                stable_phases: object.get("stable_phases"),
            };
        }

        if let (Some(score), Some(findings)) = (object.get("quality_score"), object.get("findings")) {
            return Self::Quality { score, findings };
        }

        if let Some(filename) = object
            .get("filename")
            .and_then(|f| f.as_str())
            .filter(|f| is_image_filename(f))
        {
            return Self::Image { filename };
        }

        if let Some(items) = object.get("results").and_then(|r| r.as_array()) {
            return Self::Results { items };
        }

        Self::Generic(value)
    }

    pub fn kind(&self) -> CardKind {
        match self {
            Self::Error(_) => CardKind::Error,
            Self::Metrics { .. } => CardKind::Metrics,
            Self::PhaseDiagram { .. } => CardKind::PhaseDiagram,
            Self::Quality { .. } => CardKind::Quality,
            Self::Image { .. } => CardKind::Image,
            Self::Results { .. } => CardKind::Results,
            Self::Generic(_) => CardKind::Generic,
        }
    }

    /// Short human-readable card content.
    pub fn summary(&self) -> String {
        match self {
            Self::Error(message) => truncate(message, ERROR_PREVIEW_CHARS),
            Self::Metrics { algorithm, metrics } => {
                let algorithm = algorithm.as_str().map_or_else(|| algorithm.to_string(), str::to_string);
                let count = metrics.as_object().map_or(0, |m| m.len());
                format!("{algorithm}: {count} metrics")
            }
            Self::PhaseDiagram { stable_phases } => match stable_phases.and_then(|p| p.as_array()) {
                Some(phases) => format!("Phase diagram with {} stable phases", phases.len()),
                None => "Phase diagram".to_string(),
            },
            Self::Quality { score, findings } => {
                let count = findings.as_array().map_or(0, |f| f.len());
                format!("Quality score {score} with {count} findings")
            }
            Self::Image { filename } => (*filename).to_string(),
            Self::Results { items } => match items.len() {
                1 => "1 result".to_string(),
                n => format!("{n} results"),
            },
            Self::Generic(value) => generic_summary(value),
        }
    }
}

/// The card category of a tool result.
pub fn classify(value: &serde_json::Value) -> CardKind {
    ResultShape::of(value).kind()
}

/// Display verb for a tool, derived from its name.
pub fn verb_for(tool_name: &str) -> &'static str {
    let name = tool_name.to_ascii_lowercase();
    const VERBS: [(&[&str], &str); 8] = [
        (&["peek_result"], "Reading stored result"),
        (&["search", "find", "lookup", "query"], "Searching"),
        (&["predict", "estimate"], "Predicting"),
        (&["plot", "chart", "draw", "render"], "Plotting"),
        (&["read", "load", "fetch", "get"], "Reading"),
        (&["write", "save", "export"], "Writing"),
        (&["calc", "compute", "add", "sum"], "Computing"),
        (&["analy", "assess", "check"], "Analyzing"),
    ];
    VERBS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| name.contains(n)))
        .map_or("Running", |(_, verb)| *verb)
}

fn is_image_filename(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn generic_summary(value: &serde_json::Value) -> String {
    if value.get("stored").and_then(|s| s.as_bool()) == Some(true) {
        let size = value.get("totalSize").and_then(|s| s.as_u64()).unwrap_or(0);
        return format!("Large result stored ({size} characters)");
    }
    match value {
        serde_json::Value::String(s) => truncate(s, GENERIC_PREVIEW_CHARS),
        other => truncate(&other.to_string(), GENERIC_PREVIEW_CHARS),
    }
}

/// Cut to at most `max` characters, marking the cut with "...".
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}
