use std::sync::Arc;

use serde_json::{Map, json};
use tracing::info;

use agentmesh::{
    agent::core::AgentRuntime,
    agents::{AnalyzerAgent, ManagerAgent, ResearchAgent, WriterAgent},
    multi_agent::MessageBus,
    shared::{GlobalConfig, init_tracing},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GlobalConfig::default();
    init_tracing(&config);

    info!("Starting research report demo...");

    let bus = Arc::new(MessageBus::new(config.message_bus.clone()));
    let research = AgentRuntime::new(
        ResearchAgent::new(config.research.clone()),
        bus.clone(),
        config.runtime.clone(),
    );
    let analyzer = AgentRuntime::new(AnalyzerAgent::new(), bus.clone(), config.runtime.clone());
    let writer = AgentRuntime::new(
        WriterAgent::new(config.writer.clone()),
        bus.clone(),
        config.runtime.clone(),
    );
    let manager = AgentRuntime::new(
        ManagerAgent::new(config.manager.clone()),
        bus.clone(),
        config.runtime.clone(),
    );

    research.start().await?;
    analyzer.start().await?;
    writer.start().await?;
    manager.start().await?;

    research
        .behavior()
        .add_to_knowledge_base(
            "climate change",
            json!({ "summary": "Long-term shifts in temperatures and weather patterns" }),
        )
        .await;

    let mut parameters = Map::new();
    parameters.insert("topic".into(), json!("Climate Change"));
    parameters.insert("style".into(), json!("formal"));

    let result = manager
        .delegate("Research and write a report on climate change", parameters)
        .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if let Some(content) = result["content"][0]["content"].as_str() {
        println!("\n{content}");
    }

    let stats = bus.get_stats().await;
    info!(
        "Bus delivered {} messages ({} failed)",
        stats.total_messages, stats.failed_deliveries
    );

    manager.stop().await;
    writer.stop().await;
    analyzer.stop().await;
    research.stop().await;

    info!("Demo finished");
    Ok(())
}
