use crawl_cache::prelude::*;
use crawl_cache::{TracingMetrics, TracingSink};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing subscriber
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // 2. Cache metrics and activity records both go to tracing
    let fill = fill_fn(|request: FillRequest| async move {
        Ok(FillOutput::new(format!("ocr text for {}", request.url().unwrap_or("?"))))
    });
    let system = CacheSystem::builder(MemoryDurableStore::new(), fill)
        .metrics(
            TracingMetrics::new()
                .with_service_name("crawler")
                .with_slow_fill_threshold(Duration::from_secs(2)),
        )
        .activity_sink(TracingSink)
        .build();

    let scan = Identifier::url("https://example.com/receipt.png");
    system.router().fetch(Category::Ocr, scan.clone()).await?;
    system.router().fetch(Category::Ocr, scan).await?;

    // 3. Flush activity so the records show up
    system.shutdown().await?;
    Ok(())
}
