//! Vector backend health.
//!
//! Used by `vh health` and `GET /health/vectorstore`. For the networked
//! backend this makes one lightweight request to the service; it never
//! creates collections.

use anyhow::Result;
use serde::Serialize;
use std::time::Duration;

use crate::config::{Config, VectorStoreConfig};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VectorStoreHealth {
    pub backend: &'static str,
    /// Index directory (local) or service URL (networked).
    pub location: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub async fn vector_store_health(config: &Config) -> Result<VectorStoreHealth> {
    match &config.vector_store {
        VectorStoreConfig::Local { .. } => {
            let dir = config.local_index_dir();
            let exists = dir.is_dir();
            Ok(VectorStoreHealth {
                backend: "local",
                location: dir.display().to_string(),
                reachable: true,
                detail: (!exists).then(|| "index directory not created yet".to_string()),
            })
        }
        VectorStoreConfig::Networked { url, api_key, .. } => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()?;
            let mut req = client.get(format!("{}/collections", url.trim_end_matches('/')));
            let key = api_key
                .clone()
                .or_else(|| std::env::var("QDRANT_API_KEY").ok());
            if let Some(key) = key {
                req = req.header("api-key", key);
            }
            let (reachable, detail) = match req.send().await {
                Ok(r) if r.status().is_success() => (true, None),
                Ok(r) => (false, Some(format!("HTTP {}", r.status()))),
                Err(e) => (false, Some(e.to_string())),
            };
            Ok(VectorStoreHealth {
                backend: "networked",
                location: url.clone(),
                reachable,
                detail,
            })
        }
    }
}

pub fn print_health(health: &VectorStoreHealth) {
    println!("{:<12} {:<10} LOCATION", "BACKEND", "REACHABLE");
    println!(
        "{:<12} {:<10} {}",
        health.backend, health.reachable, health.location
    );
    if let Some(detail) = &health.detail {
        println!("  {}", detail);
    }
}
