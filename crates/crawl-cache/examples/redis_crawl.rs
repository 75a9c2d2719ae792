use crawl_cache::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    println!("Connecting to Redis at {}", redis_url);

    let config = RedisConfig::new(redis_url).pool_size(5).prefix("example");

    match RedisDurableStore::new(config).await {
        Ok(store) => {
            // Leases make concurrent crawler processes share one fill per key
            let leases = store.lease_provider();
            let fill = fill_fn(|request: FillRequest| async move {
                Ok(FillOutput::new(format!(
                    "<html>{}</html>",
                    request.url().unwrap_or_default()
                )))
            });
            let system = CacheSystem::builder(store, fill)
                .lease_provider(leases)
                .build();
            system.start();

            let page = Identifier::url("https://example.com/about");
            for _ in 0..2 {
                let fetched = system.router().fetch(Category::Url, page.clone()).await?;
                println!("{:?}: {} bytes", fetched.source, fetched.payload.len());
            }

            let report = system.stats(None).await;
            println!("{:#?}", report.category(Category::Url).stats);

            system.shutdown().await?;
        }
        Err(e) => {
            eprintln!("Failed to connect to Redis: {}", e);
            eprintln!("Ensure Redis is running or set REDIS_URL");
        }
    }

    Ok(())
}
