use crawl_cache::prelude::*;
use serde_json::json;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let fill = fill_fn(|_request: FillRequest| async { Ok(FillOutput::new("")) });
    let system = CacheSystem::builder(MemoryDurableStore::new(), fill)
        .config(CacheConfig::default().min_quality_score(0.5))
        .build();
    let corpus = system.deduplicator();

    let samples = [
        NewSample::new(json!({"title": "Pricing", "links": 12}), 0.9, "https://a.example/pricing"),
        // Same features, different key order: a duplicate
        NewSample::new(json!({"links": 12, "title": "Pricing"}), 0.8, "https://b.example/pricing"),
        // Too noisy to keep
        NewSample::new(json!({"title": "404", "links": 0}), 0.1, "https://a.example/missing"),
        NewSample::new(json!({"title": "Docs", "links": 40}), 0.7, "https://a.example/docs"),
    ];

    for sample in samples {
        let source = sample.source_url.clone();
        match corpus.insert(sample).await? {
            SampleInsert::Inserted(s) => println!("stored     {} ({})", s.content_hash, source),
            SampleInsert::Duplicate(s) => println!("duplicate  {} ({})", s.content_hash, source),
            SampleInsert::BelowQuality { score, threshold } => {
                println!("dropped    score {score} < {threshold} ({source})")
            }
        }
    }

    println!("{:?}", corpus.counters());
    Ok(())
}
