use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::agent::{
    context::AgentContext,
    core::base_agent::{AgentBehavior, BaseAgent},
    types::{AgentCapability, AgentType},
};
use crate::agents::{ANALYZER_AGENT_ID, RESEARCH_AGENT_ID, WRITER_AGENT_ID};
use crate::error::Result;
use crate::multi_agent::{communication::MessageType, coordination::task::TaskInput};

/// Writer agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Simulated drafting time
    pub generation_latency_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            generation_latency_ms: 200,
        }
    }
}

/// Writing parameters read from a task
#[derive(Debug, Clone, PartialEq)]
pub struct WritingBrief {
    pub topic: String,
    pub style: String,
    pub content_type: String,
    pub needs_research: bool,
    pub needs_analysis: bool,
}

impl WritingBrief {
    pub fn from_task(task: &TaskInput) -> Self {
        Self {
            topic: task
                .param_str("topic")
                .map(str::to_string)
                .unwrap_or_else(|| task.description.clone()),
            style: task.param_str("style").unwrap_or("formal").to_string(),
            content_type: task.param_str("content_type").unwrap_or("article").to_string(),
            needs_research: task.param_bool("needs_research").unwrap_or(true),
            needs_analysis: task.param_bool("needs_analysis").unwrap_or(false),
        }
    }
}

/// Produces structured documents, asking the research and analyzer agents
/// for material when the brief calls for it.
pub struct WriterAgent {
    base: BaseAgent,
    config: WriterConfig,
    content_cache: RwLock<HashMap<String, String>>,
}

impl WriterAgent {
    pub fn new(config: WriterConfig) -> Self {
        Self::with_id(WRITER_AGENT_ID, config)
    }

    pub fn with_id(id: impl Into<String>, config: WriterConfig) -> Self {
        Self {
            base: BaseAgent::new(
                id,
                AgentType::Writer,
                vec![
                    AgentCapability::Writing,
                    AgentCapability::ContentCreation,
                    AgentCapability::Summarization,
                    AgentCapability::Structuring,
                ],
            ),
            config,
            content_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Writes `content_type` on `topic` and returns the text.
    pub async fn create_content(
        &self,
        ctx: &AgentContext,
        topic: &str,
        content_type: &str,
        style: &str,
    ) -> Result<String> {
        let task = TaskInput::new(format!("Write {content_type} on {topic}"))
            .with_task_id(uuid::Uuid::new_v4().to_string())
            .with_parameter("topic", json!(topic))
            .with_parameter("content_type", json!(content_type))
            .with_parameter("style", json!(style));

        let result = self.process_task(ctx, task).await?;
        Ok(result["content"].as_str().unwrap_or_default().to_string())
    }

    /// Last document written on `topic`.
    pub async fn cached_content(&self, topic: &str) -> Option<String> {
        self.content_cache.read().await.get(topic).cloned()
    }

    async fn request_research(&self, ctx: &AgentContext, topic: &str) -> Option<Value> {
        info!("Requesting research on: {}", topic);
        let task = TaskInput::new(format!("Research: {topic}"))
            .with_task_id(uuid::Uuid::new_v4().to_string())
            .with_parameter("query", json!(topic));
        self.request_result(ctx, RESEARCH_AGENT_ID, &task).await
    }

    async fn request_analysis(&self, ctx: &AgentContext, data: Value) -> Option<Value> {
        info!("Requesting data analysis");
        let task = TaskInput::new("Analyze research data")
            .with_task_id(uuid::Uuid::new_v4().to_string())
            .with_parameter("data", data);
        self.request_result(ctx, ANALYZER_AGENT_ID, &task).await
    }

    /// `result` of the RESULT answering `task`; `None` on error or timeout.
    async fn request_result(
        &self,
        ctx: &AgentContext,
        to: &str,
        task: &TaskInput,
    ) -> Option<Value> {
        let Some(pending) = ctx.request_task(to, task).await else {
            warn!("Could not reach {}", to);
            return None;
        };

        match pending.wait(ctx.request_timeout()).await {
            Some(reply) if reply.message_type == MessageType::Result => {
                info!("Received result from {}", to);
                reply.payload.get("result").cloned()
            }
            Some(reply) => {
                warn!("{} answered with {}: {}", to, reply.message_type, reply.payload);
                None
            }
            None => {
                warn!("No response from {} within {:?}", to, ctx.request_timeout());
                None
            }
        }
    }

    async fn generate(
        &self,
        brief: &WritingBrief,
        research: Option<&Value>,
        analysis: Option<&Value>,
    ) -> String {
        if self.config.generation_latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.generation_latency_ms)).await;
        }

        let mut sections = vec![introduction(&brief.topic, &brief.style)];
        if let Some(research) = research {
            sections.push(research_section(research));
        }
        if let Some(analysis) = analysis {
            sections.push(analysis_section(analysis));
        }
        sections.push(conclusion(&brief.topic, &brief.style));

        sections.join("\n\n")
    }
}

fn introduction(topic: &str, style: &str) -> String {
    match style {
        "formal" => format!(
            "# {topic}\n\nThis document provides a comprehensive overview of {topic}. \
             The following sections explore key aspects, research findings, \
             and analytical insights."
        ),
        "casual" => format!(
            "# {topic}\n\nLet's dive into {topic}! \
             We'll explore what makes this interesting and what we've learned."
        ),
        _ => format!("# {topic}\n\nAn exploration of {topic} and its implications."),
    }
}

fn research_section(research: &Value) -> String {
    let mut section = String::from("## Research Findings\n\n");
    let confidence = research["confidence"].as_f64().unwrap_or(0.0);

    if let Some(sources) = research["results"]["consolidated_data"].as_array()
        && !sources.is_empty()
    {
        section.push_str("Based on multiple sources, the following information was gathered:\n\n");
        for (i, source) in sources.iter().enumerate() {
            let name = source["source"].as_str().unwrap_or("unknown");
            let summary = source["data"]["summary"].as_str().unwrap_or("Data available");
            let _ = writeln!(section, "- Source {} ({}): {}", i + 1, name, summary);
        }
    }

    let _ = write!(section, "\n*Research confidence: {:.0}%*", confidence * 100.0);
    section
}

fn analysis_section(analysis: &Value) -> String {
    let mut section = String::from("## Analysis & Insights\n\n");
    match analysis["insights"].as_array() {
        Some(insights) if !insights.is_empty() => {
            section.push_str("Key insights from the analysis:\n\n");
            for insight in insights.iter().filter_map(Value::as_str) {
                let _ = writeln!(section, "- {insight}");
            }
        }
        _ => section
            .push_str("Analytical processing reveals important patterns and trends in the data."),
    }
    section
}

fn conclusion(topic: &str, style: &str) -> String {
    match style {
        "formal" => format!(
            "## Conclusion\n\nIn summary, this analysis of {topic} provides valuable insights \
             supported by research and data analysis. The findings contribute to our \
             understanding and inform future directions."
        ),
        "casual" => format!(
            "## Wrapping Up\n\nThat's our look at {topic}! \
             We've covered the key points and what they mean."
        ),
        _ => format!(
            "## Conclusion\n\nThis overview of {topic} synthesizes research and analysis \
             to provide a comprehensive perspective."
        ),
    }
}

#[async_trait]
impl AgentBehavior for WriterAgent {
    fn get_id(&self) -> &str {
        &self.base.id
    }

    fn get_type(&self) -> AgentType {
        self.base.agent_type
    }

    fn get_capabilities(&self) -> &[AgentCapability] {
        &self.base.capabilities
    }

    async fn process_task(&self, ctx: &AgentContext, task: TaskInput) -> Result<Value> {
        let brief = WritingBrief::from_task(&task);
        info!("Writer agent creating {} on: {}", brief.content_type, brief.topic);

        let research = if brief.needs_research {
            self.request_research(ctx, &brief.topic).await
        } else {
            None
        };
        let analysis = match &research {
            Some(data) if brief.needs_analysis => self.request_analysis(ctx, data.clone()).await,
            _ => None,
        };

        let content = self.generate(&brief, research.as_ref(), analysis.as_ref()).await;
        self.content_cache
            .write()
            .await
            .insert(brief.topic.clone(), content.clone());

        Ok(json!({
            "word_count": content.split_whitespace().count(),
            "content": content,
            "topic": brief.topic,
            "content_type": brief.content_type,
            "style": brief.style,
            "agent": self.base.id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent::core::runtime::{AgentRuntime, RuntimeConfig};
    use crate::agents::research_agent::{ResearchAgent, ResearchConfig};
    use crate::multi_agent::communication::MessageBus;

    fn instant() -> WriterAgent {
        WriterAgent::new(WriterConfig {
            generation_latency_ms: 0,
        })
    }

    fn offline_ctx() -> AgentContext {
        AgentContext::new(
            WRITER_AGENT_ID,
            Arc::new(MessageBus::default()),
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_brief_defaults() {
        let brief = WritingBrief::from_task(&TaskInput::new("Write content for: rust"));
        assert_eq!(brief.topic, "Write content for: rust");
        assert_eq!(brief.style, "formal");
        assert_eq!(brief.content_type, "article");
        assert!(brief.needs_research);
        assert!(!brief.needs_analysis);
    }

    #[tokio::test]
    async fn test_writes_without_research() {
        let agent = instant();
        let task = TaskInput::new("ignored")
            .with_parameter("topic", json!("Ownership"))
            .with_parameter("style", json!("casual"))
            .with_parameter("needs_research", json!(false));

        let result = agent.process_task(&offline_ctx(), task).await.unwrap();
        let content = result["content"].as_str().unwrap();
        assert!(content.starts_with("# Ownership\n\nLet's dive into Ownership!"));
        assert!(content.contains("## Wrapping Up"));
        assert!(!content.contains("## Research Findings"));
        assert_eq!(result["style"], "casual");
        assert_eq!(result["word_count"], content.split_whitespace().count());
        assert_eq!(agent.cached_content("Ownership").await.as_deref(), Some(content));
    }

    #[tokio::test]
    async fn test_missing_research_agent_is_not_fatal() {
        let agent = instant();
        let ctx = offline_ctx();
        ctx.replies().set_active(true);

        let content = agent
            .create_content(&ctx, "Borrowing", "report", "other")
            .await
            .unwrap();
        assert!(content.contains("An exploration of Borrowing"));
        assert!(!content.contains("## Research Findings"));
    }

    #[tokio::test]
    async fn test_research_is_requested_over_the_bus() {
        let bus = Arc::new(MessageBus::default());
        let config = RuntimeConfig {
            recv_timeout_ms: 20,
            request_timeout_ms: 2_000,
        };
        let research = AgentRuntime::new(
            ResearchAgent::new(ResearchConfig {
                search_latency_ms: 0,
            }),
            bus.clone(),
            config.clone(),
        );
        let writer = AgentRuntime::new(instant(), bus.clone(), config);
        research.start().await.unwrap();
        writer.start().await.unwrap();

        let result = writer
            .process_task(TaskInput::new("x").with_parameter("topic", json!("Lifetimes")))
            .await
            .unwrap();
        let content = result["content"].as_str().unwrap();
        assert!(content.contains("## Research Findings"));
        assert!(content.contains("Source 1 (web_search): Web search results for: Lifetimes"));
        assert!(content.contains("*Research confidence:"));

        writer.stop().await;
        research.stop().await;
    }
}
