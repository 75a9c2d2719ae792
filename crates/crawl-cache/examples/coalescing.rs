use crawl_cache::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // 1. Count how often the crawler is actually invoked
    let crawls = Arc::new(AtomicUsize::new(0));
    let fill = {
        let crawls = crawls.clone();
        fill_fn(move |request: FillRequest| {
            let crawls = crawls.clone();
            async move {
                // Simulate a slow page render (100ms)
                sleep(Duration::from_millis(100)).await;
                let n = crawls.fetch_add(1, Ordering::SeqCst) + 1;
                println!("Crawling {}... (count: {})", request.url().unwrap_or("?"), n);
                Ok(FillOutput::new("<html>rendered</html>"))
            }
        })
    };

    let system = CacheSystem::builder(MemoryDurableStore::new(), fill).build();

    // 2. Ten workers ask for the same page at once
    println!("Spawning 10 concurrent fetches for the same URL...");
    let mut handles = Vec::new();
    for i in 0..10 {
        let router = system.router().clone();
        // Casing and fragment differences normalize to one key
        let url = if i % 2 == 0 {
            "https://example.com/pricing"
        } else {
            "https://EXAMPLE.com/pricing#plans"
        };
        handles.push(tokio::spawn(async move {
            router.fetch(Category::Url, Identifier::url(url)).await
        }));
    }

    for handle in handles {
        let fetched = handle.await??;
        assert_eq!(fetched.payload.as_ref(), b"<html>rendered</html>");
    }

    // 3. Verify coalescing
    let total = crawls.load(Ordering::SeqCst);
    println!("Total crawls performed: {}", total);
    if total != 1 {
        panic!("Coalescing failed! Expected 1 crawl, got {}", total);
    }
    println!("SUCCESS: concurrent fetches shared one crawl.");

    system.shutdown().await?;
    Ok(())
}
