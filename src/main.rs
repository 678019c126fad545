//! # Analytics Buffer Demo
//!
//! Reports events before any back end exists, registers a printing
//! listener a little later through the discovery slot, and shows the
//! queued events being flushed in order.

use analytics::{
    Analytics, AnalyticsConfig, EventData, FileStore, LifecycleSignal, Listener, ListenerSlot,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("=================================================");
    println!("  Analytics Buffer - Deferred Listener Demo      ");
    println!("=================================================");
    println!();

    let store_path = std::env::var("ANALYTICS_STORE_PATH")
        .unwrap_or_else(|_| "./var/data/analytics.json".to_string());
    let store = FileStore::open(&store_path)?;
    let config = AnalyticsConfig::from_env();

    println!("Configuration:");
    println!("  - Store: {}", store_path);
    println!("  - Poll interval: {}ms", config.poll_interval.as_millis());
    println!(
        "  - Registration timeout: {}ms",
        config.registration_timeout.as_millis()
    );
    println!();

    let slot = ListenerSlot::new();
    let analytics = Arc::new(Analytics::new(config, &store, slot.clone()));
    println!("✓ Tracking id: {}", analytics.tracking_id());
    if analytics.identity().was_generated() {
        println!("  (new session, persisted for next run)");
    }
    println!();

    let (lifecycle_tx, lifecycle_rx) = mpsc::channel(8);
    analytics.spawn_lifecycle_listener(lifecycle_rx);

    analytics.set_global("app", "analytics-demo");
    analytics.start_timer("session");

    let mut progress = EventData::new();
    progress.insert("percent".into(), json!(10));
    analytics.report_event("login", EventData::new(), false);
    analytics.report_event("progress", progress.clone(), false);
    progress.insert("percent".into(), json!(60));
    analytics.report_event("progress", progress, true);

    println!(
        "Queued before registration: {} events (state: {})",
        analytics.buffer().pending_len(),
        analytics.state()
    );
    println!();

    // Simulate the host going to the background for a while
    lifecycle_tx.send(LifecycleSignal::Suspend).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    lifecycle_tx.send(LifecycleSignal::Resume).await?;

    println!("Registering back-end...");
    slot.set(Listener::callback(|name, data| {
        println!("  → {:<10} {}", name, serde_json::Value::Object(data.clone()));
        Ok(())
    }));

    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut done = EventData::new();
    done.insert("duration_ms".into(), json!(analytics.stop_timer("session")));
    analytics.report_event("logout", done, false);
    println!();

    let stats = analytics.stats();
    println!("Dispatch Statistics:");
    println!("  - State: {}", analytics.state());
    println!("  - Reported: {}", stats.reported);
    println!("  - Replaced in queue: {}", stats.replaced);
    println!("  - Sent: {}", stats.sent);
    println!("  - Dropped: {}", stats.dropped);
    println!();

    analytics.shutdown();

    println!("=================================================");
    println!("  Demo Finished");
    println!("=================================================");

    Ok(())
}
