use crawl_cache::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let version = Arc::new(AtomicUsize::new(0));
    let fill = {
        let version = version.clone();
        fill_fn(move |_request: FillRequest| {
            let version = version.clone();
            async move {
                sleep(Duration::from_millis(200)).await;
                let v = version.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(FillOutput::new(format!("screenshot v{v}")))
            }
        })
    };

    // Screenshots expire after one second and are served stale while refreshing
    let config = CacheConfig::default().policy(
        Category::Screenshot,
        CategoryPolicy::new().ttl_secs(1).capacity(64).swr(true),
    );
    let router = CacheTierRouter::new(MemoryDurableStore::new(), fill, config);
    let page = Identifier::url("https://example.com/");

    let first = router.fetch(Category::Screenshot, page.clone()).await?;
    println!("1. {:?}: {}", first.source, String::from_utf8_lossy(&first.payload));

    println!("Waiting for the screenshot to expire...");
    sleep(Duration::from_millis(1100)).await;

    let stale = router.fetch(Category::Screenshot, page.clone()).await?;
    println!(
        "2. {:?} (stale: {}): {}",
        stale.source,
        stale.is_stale(),
        String::from_utf8_lossy(&stale.payload)
    );

    // Let the background refresh finish
    sleep(Duration::from_millis(300)).await;

    let fresh = router.fetch(Category::Screenshot, page).await?;
    println!("3. {:?}: {}", fresh.source, String::from_utf8_lossy(&fresh.payload));

    Ok(())
}
