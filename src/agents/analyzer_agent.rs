use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::info;

use crate::agent::{
    context::AgentContext,
    core::base_agent::{AgentBehavior, BaseAgent},
    types::{AgentCapability, AgentType},
};
use crate::agents::ANALYZER_AGENT_ID;
use crate::error::Result;
use crate::multi_agent::coordination::task::TaskInput;

/// Nesting depth below which items are no longer counted
const MAX_COUNT_DEPTH: usize = 3;

/// One finished analysis, kept for [`AnalyzerAgent::analysis_history`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub task: String,
    pub result: Value,
}

/// Extracts insights, patterns and statistics from arbitrary JSON data.
pub struct AnalyzerAgent {
    base: BaseAgent,
    history: RwLock<Vec<AnalysisRecord>>,
}

impl Default for AnalyzerAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerAgent {
    pub fn new() -> Self {
        Self::with_id(ANALYZER_AGENT_ID)
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            base: BaseAgent::new(
                id,
                AgentType::Analyzer,
                vec![
                    AgentCapability::Analysis,
                    AgentCapability::PatternDetection,
                    AgentCapability::Statistics,
                    AgentCapability::Visualization,
                ],
            ),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Runs the full analysis over a sequence of values.
    pub async fn analyze_trends(&self, data: Vec<Value>) -> Value {
        self.analyze("Analyze trends in data", &Value::Array(data))
            .await
    }

    /// Past analyses, oldest first, trimmed to the last `limit`.
    pub async fn analysis_history(&self, limit: Option<usize>) -> Vec<AnalysisRecord> {
        let history = self.history.read().await;
        let skip = match limit {
            Some(limit) => history.len().saturating_sub(limit),
            None => 0,
        };
        history[skip..].to_vec()
    }

    async fn analyze(&self, description: &str, data: &Value) -> Value {
        info!("Analyzer agent processing: {}", description);

        let insights = extract_insights(data);
        let patterns = detect_patterns(data);
        let visualizations = suggest_visualizations(&patterns);

        let result = json!({
            "insights": insights,
            "patterns": patterns,
            "statistics": statistics(data),
            "visualizations": visualizations,
            "data_summary": summarize(data),
            "agent": self.base.id,
        });

        self.history.write().await.push(AnalysisRecord {
            task: description.to_string(),
            result: result.clone(),
        });
        result
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

/// Human readable observations about `data`.
pub fn extract_insights(data: &Value) -> Vec<String> {
    let mut insights = Vec::new();

    match data {
        Value::Object(map) => {
            if let Some(results) = map.get("results").and_then(Value::as_object) {
                let sources = results
                    .get("consolidated_data")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                if sources > 0 {
                    insights.push(format!("Data consolidated from {sources} sources"));
                    let reliability = results
                        .get("reliability_score")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0);
                    insights.push(
                        if reliability > 0.8 {
                            "High reliability data (>80%)"
                        } else if reliability > 0.6 {
                            "Moderate reliability data (60-80%)"
                        } else {
                            "Lower reliability data (<60%)"
                        }
                        .to_string(),
                    );
                }
            }

            if let Some(confidence) = map.get("confidence").and_then(Value::as_f64) {
                insights.push(format!("Data confidence level: {:.0}%", confidence * 100.0));
            }

            let total = count_items(data, 0);
            if total > 0 {
                insights.push(format!("Total data points analyzed: {total}"));
            }
        }
        Value::Array(items) => {
            insights.push(format!("Analyzed {} items", items.len()));
            if let Some(first) = items.first() {
                insights.push(format!("Data type: {}", kind(first)));
            }
        }
        other => insights.push(format!("Data type: {}", kind(other))),
    }

    if insights.is_empty() {
        insights.push("Data structure analyzed".to_string());
        insights.push("Ready for further processing".to_string());
    }
    insights
}

/// Structural patterns: keys, nesting, element kinds, numeric ranges.
pub fn detect_patterns(data: &Value) -> Vec<Value> {
    let mut patterns = Vec::new();

    match data {
        Value::Object(map) => {
            if !map.is_empty() {
                let keys: Vec<&str> = map.keys().take(5).map(String::as_str).collect();
                patterns.push(json!({
                    "type": "structure",
                    "description": format!("Object with {} keys", map.len()),
                    "details": format!("Key patterns: {}", keys.join(", ")),
                }));
            }

            let nested = map.values().filter(|v| is_container(v)).count();
            if nested > 0 {
                patterns.push(json!({
                    "type": "nesting",
                    "description": format!("Contains {nested} nested structures"),
                    "details": "Hierarchical data organization",
                }));
            }
        }
        Value::Array(items) if !items.is_empty() => {
            let mut kinds: BTreeMap<&str, usize> = BTreeMap::new();
            for item in items {
                *kinds.entry(kind(item)).or_default() += 1;
            }
            patterns.push(json!({
                "type": "data_types",
                "description": "Data type distribution",
                "details": kinds,
            }));

            if let Some(numbers) = as_numbers(items) {
                let (min, max) = min_max(&numbers);
                patterns.push(json!({
                    "type": "numeric_sequence",
                    "description": "Numeric data sequence",
                    "details": format!("Range: {min} to {max}"),
                }));
            }
        }
        _ => {}
    }

    patterns
}

/// Size and shape figures for `data`.
pub fn statistics(data: &Value) -> Value {
    let mut stats = json!({
        "data_type": kind(data),
        "total_size": format_size(data.to_string().len()),
    });

    match data {
        Value::Object(map) => {
            stats["key_count"] = json!(map.len());
            stats["has_nested_data"] = json!(map.values().any(is_container));
        }
        Value::Array(items) => {
            stats["item_count"] = json!(items.len());
            if let Some(numbers) = as_numbers(items) {
                let (min, max) = min_max(&numbers);
                let avg = numbers.iter().sum::<f64>() / numbers.len() as f64;
                stats["numeric_stats"] = json!({ "min": min, "max": max, "avg": avg });
            }
        }
        _ => {}
    }

    stats
}

/// Chart suggestions derived from the detected patterns.
pub fn suggest_visualizations(patterns: &[Value]) -> Vec<Value> {
    let has_type = |name: &str| patterns.iter().any(|p| p["type"] == name);
    let mut charts = Vec::new();

    if patterns
        .iter()
        .any(|p| p.to_string().to_lowercase().contains("count"))
    {
        charts.push(chart(
            "bar_chart",
            "Data Distribution",
            "Visual representation of data counts",
        ));
    }
    if has_type("numeric_sequence") {
        charts.push(chart("line_chart", "Trend Analysis", "Visual representation of data trends"));
    }
    if has_type("data_types") {
        charts.push(chart("pie_chart", "Type Distribution", "Distribution of data types"));
    }
    if charts.is_empty() {
        charts.push(chart("summary_chart", "Data Overview", "High-level summary visualization"));
    }

    charts
}

fn chart(kind: &str, title: &str, description: &str) -> Value {
    json!({ "type": kind, "title": title, "description": description })
}

pub fn summarize(data: &Value) -> String {
    match data {
        Value::Object(map) => format!("Object with {} keys", map.len()),
        Value::Array(items) => format!("List with {} items", items.len()),
        Value::String(text) => format!("String with {} characters", text.chars().count()),
        other => format!("Data of type {}", kind(other)),
    }
}

/// Entries of every object and array down to [`MAX_COUNT_DEPTH`].
pub fn count_items(data: &Value, depth: usize) -> usize {
    if depth > MAX_COUNT_DEPTH {
        return 0;
    }
    match data {
        Value::Object(map) => {
            map.len() + map.values().map(|v| count_items(v, depth + 1)).sum::<usize>()
        }
        Value::Array(items) => {
            items.len() + items.iter().map(|v| count_items(v, depth + 1)).sum::<usize>()
        }
        _ => 0,
    }
}

fn as_numbers(items: &[Value]) -> Option<Vec<f64>> {
    if items.is_empty() {
        return None;
    }
    items.iter().map(Value::as_f64).collect()
}

fn min_max(numbers: &[f64]) -> (f64, f64) {
    numbers
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &n| (lo.min(n), hi.max(n)))
}

fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[async_trait]
impl AgentBehavior for AnalyzerAgent {
    fn get_id(&self) -> &str {
        &self.base.id
    }

    fn get_type(&self) -> AgentType {
        self.base.agent_type
    }

    fn get_capabilities(&self) -> &[AgentCapability] {
        &self.base.capabilities
    }

    async fn process_task(&self, _ctx: &AgentContext, task: TaskInput) -> Result<Value> {
        let data = task.param("data").cloned().unwrap_or_else(|| json!({}));
        Ok(self.analyze(&task.description, &data).await)
    }
}
