//! Scripted Birth Certificate Call
//!
//! Runs one complete call against the scripted collaborators: the caller
//! asks for a birth certificate, answers every field, the browser and
//! payment doubles succeed, and the confirmation SMS is printed at the end.
//! No external services are required.
//!
//! Run with: cargo run -p speakwise-agent --example scripted_call

use std::sync::Arc;
use std::time::Duration;

use speakwise_agent::{prompts, scripted_ports, AgentConfig, CallRouter, Orchestrator};
use speakwise_contracts::Transcript;
use speakwise_core::{InMemorySessionStore, ServiceCatalog, SessionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,speakwise_agent=debug".into()),
        )
        .init();

    let catalog = Arc::new(ServiceCatalog::builtin());
    let ports = scripted_ports(catalog.clone());
    let notifier = ports.notifier.clone();

    let manager = Arc::new(SessionManager::new(
        catalog,
        Arc::new(InMemorySessionStore::new()),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        manager.clone(),
        ports.collaborators.clone(),
        AgentConfig::default(),
    ));
    let router = CallRouter::new(orchestrator, AgentConfig::default());

    // Print every spoken line as it happens.
    let mut spoken = ports.spoken;
    tokio::spawn(async move {
        while let Some((_, line)) = spoken.recv().await {
            println!("  agent>  {line}");
        }
    });

    println!("=== Scripted Birth Certificate Call ===");
    println!();

    let session_id = router.on_call_started("+250788123456").await?;

    let turns = [
        "I would like a birth certificate",
        "yes",
        "1199 8800 1234 5678",
        "Gasabo",
        "Jali",
        "education",
        "yes, go ahead",
    ];
    for turn in turns {
        // Pacing keeps the printed dialogue in speaking order.
        tokio::time::sleep(Duration::from_millis(200)).await;
        println!("  caller> {turn}");
        router.on_turn_received(session_id, Transcript::certain(turn)).await?;
    }

    while router.active_calls() > 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let session = manager.get(session_id).await?;
    println!();
    println!("call ended with status {}", session.status);
    for (name, value) in &session.fields {
        println!("  {name}: {value}");
    }
    for (recipient, message) in notifier.sent() {
        println!();
        println!("sms to {recipient}:");
        println!("  {}", prompts::render_notification(&message));
    }
    Ok(())
}
