use raw_focus::config::AppConfig;
use raw_focus::store::DocumentStore;
use sqlx::Row;

/// Prints every collection of the local store, or only those named on the command line.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    let wanted: Vec<String> = std::env::args().skip(1).collect();
    println!("Connecting to {}", config.database_url);
    let store = DocumentStore::connect(&config.database_url).await?;
    store.migrate().await?;

    let rows = sqlx::query("SELECT collection, COUNT(1) AS c FROM documents GROUP BY collection ORDER BY collection")
        .fetch_all(&store.pool)
        .await?;
    println!("\n-- collections --");
    let mut collections = Vec::new();
    for r in rows.iter() {
        let collection: String = r.try_get("collection").unwrap_or_default();
        let count: i64 = r.try_get("c").unwrap_or(0);
        println!("{} ({} documents)", collection, count);
        collections.push(collection);
    }

    for collection in collections {
        if !wanted.is_empty() && !wanted.iter().any(|w| collection.starts_with(w.as_str())) {
            continue;
        }
        println!("\n-- {} --", collection);
        for doc in store.list(&collection).await? {
            let body = serde_json::to_string(&doc.data).unwrap_or_default();
            println!("{} updated={} {}", doc.id, doc.update_time.to_rfc3339(), body);
        }
    }

    Ok(())
}
