//! vkv-demo: two writers editing one book record.
//!
//! Loads config, opens the configured backend, then walks through a
//! concurrent edit: both writers read the same snapshot, the first put wins,
//! the second is rejected as stale and retried after a field merge.

use serde_json::{json, Value};
use std::sync::Arc;
use vkv_client::{
    ConflictResolver, DurableBackend, FieldMap, FieldMerge, KvError, MemoryBackend, Resolution,
    StoreBackend, StoreClient, Versioned,
};
use vkv_config::BackendKind;
use vkv_storage::FsyncPolicy;

type Book = FieldMap<Value>;

const KEY: &str = "potter1";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    vkv_metrics::init_tracing();

    // First CLI arg is the YAML config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    let config = match vkv_config::load_from_file(std::path::Path::new(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                "failed to load config from {}: {}, using defaults",
                config_path,
                e
            );
            vkv_config::load_from_str("writer_id: c1\n")?
        }
    };
    tracing::info!(
        "writer {} using {:?} store '{}'",
        config.writer_id,
        config.store.backend,
        config.store.name
    );

    match config.store.backend {
        BackendKind::Memory => {
            let client = StoreClient::new(Arc::new(MemoryBackend::new()));
            run(&client, &config.writer_id).await?;
        }
        BackendKind::Durable => {
            let fsync = FsyncPolicy::from_str_config(&config.store.fsync);
            let backend = Arc::new(DurableBackend::open(&config.store.store_dir(), fsync)?);
            let client = StoreClient::new(backend.clone());
            run(&client, &config.writer_id).await?;
            backend.sync().await?;
        }
    }

    tracing::debug!("metrics:\n{}", vkv_metrics::encode_metrics());
    Ok(())
}

async fn run<B: StoreBackend>(client: &StoreClient<B>, writer: &str) -> Result<(), KvError> {
    let other = if writer == "c2" { "c1" } else { "c2" };

    let mut book: Versioned<Book> = client.get_or_default(KEY).await?;
    if book.marker().is_empty() {
        book.value_mut().insert("title".into(), json!("Harry Potter"));
        let marker = client.put(KEY, &book, writer).await?;
        tracing::info!("created {} at {}", KEY, marker);
    }

    // Both writers start from the same snapshot.
    let ancestor: Versioned<Book> = client.get(KEY).await?;
    tracing::info!("read {} at {}: {:?}", KEY, ancestor.marker(), ancestor.value());

    let mut retitled = ancestor.clone();
    retitled.value_mut().insert(
        "title".into(),
        json!("Harry Potter and the Philosopher's Stone"),
    );
    let mut attributed = ancestor.clone();
    attributed
        .value_mut()
        .insert("author".into(), json!("J.K. Rowling"));

    let marker = client.put(KEY, &retitled, writer).await?;
    tracing::info!("{} committed title edit at {}", writer, marker);

    let stale = match client.put(KEY, &attributed, other).await {
        Ok(marker) => {
            tracing::warn!("{} unexpectedly committed at {}", other, marker);
            return Ok(());
        }
        Err(KvError::StaleWrite(stale)) => stale,
        Err(e) => return Err(e),
    };
    tracing::info!("{} rejected: {}", other, stale);

    let resolver = FieldMerge::with_ancestor(ancestor.into_value());
    match resolver.resolve_stale(&stale)? {
        Resolution::Merged {
            versioned,
            decisions,
        } => {
            for d in &decisions {
                tracing::info!("  {} taken from {:?}", d.field, d.source);
            }
            let marker = client.put(KEY, &versioned, other).await?;
            tracing::info!("{} committed merge at {}", other, marker);
        }
        Resolution::Unresolved { conflicting, .. } => {
            tracing::warn!("{} left unresolved, conflicting: {:?}", KEY, conflicting);
        }
    }

    let now: Versioned<Book> = client.get(KEY).await?;
    tracing::info!("final {} at {}: {:?}", KEY, now.marker(), now.value());
    Ok(())
}
