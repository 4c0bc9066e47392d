//! Embedding providers, tried in preference order: a configured HTTP
//! endpoint, then a local embedding library (behind the `embeddings-local`
//! feature), then a deterministic feature-extraction fallback so retrieval
//! keeps working offline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Prefix applied to texts embedded for indexing.
pub const DOCUMENT_PREFIX: &str = "search_document: ";
/// Prefix applied to retrieval queries.
pub const QUERY_PREFIX: &str = "search_query: ";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const WARMUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmbeddingConfig {
    pub model: String,
    pub db_file: String,
    /// Base URL of an OpenAI-compatible embeddings endpoint.
    pub endpoint: Option<String>,
    /// Dimensionality of the hashed fallback embedder.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text-v1.5".into(),
            db_file: "continuity.db".into(),
            endpoint: None,
            dimensions: 384,
        }
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn id(&self) -> &str;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

/// OpenAI-compatible `POST /v1/embeddings` client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(endpoint: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            url: format!("{}/v1/embeddings", endpoint.trim_end_matches('/')),
            model: model.to_string(),
        })
    }

    async fn request(&self, texts: &[String], timeout: Duration) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };
        let response = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(anyhow!(
                "embedding endpoint returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            ));
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    /// Short-timeout probe used to discover the dimensionality.
    pub async fn warmup(&self) -> Result<usize> {
        let probe = vec![format!("{}warmup", DOCUMENT_PREFIX)];
        let vectors = self.request(&probe, WARMUP_TIMEOUT).await?;
        vectors
            .first()
            .map(|v| v.len())
            .filter(|d| *d > 0)
            .ok_or_else(|| anyhow!("embedding endpoint returned an empty vector"))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts, REQUEST_TIMEOUT).await
    }

    fn id(&self) -> &str {
        "http-endpoint"
    }
}

/// Local embedding library tier: an in-process model via fastembed. Heavy
/// (ONNX runtime, model download on first use), so it is gated behind the
/// `embeddings-local` feature.
#[cfg(feature = "embeddings-local")]
pub struct LocalEmbedder {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
    dimensions: usize,
}

#[cfg(feature = "embeddings-local")]
impl LocalEmbedder {
    pub fn new(model_name: &str) -> Result<Self> {
        let model = match model_name.to_lowercase().as_str() {
            "all-minilm-l6-v2" => fastembed::EmbeddingModel::AllMiniLML6V2,
            "all-minilm-l12-v2" => fastembed::EmbeddingModel::AllMiniLML12V2,
            "bge-small-en-v1.5" => fastembed::EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => fastembed::EmbeddingModel::BGEBaseENV15,
            // HTTP-only model names land here; the small default is fine for
            // a fallback tier.
            _ => fastembed::EmbeddingModel::AllMiniLML6V2,
        };
        let dimensions = match model {
            fastembed::EmbeddingModel::BGEBaseENV15 => 768,
            _ => 384,
        };

        // InitOptions is non-exhaustive, so mutate the default.
        let mut options = fastembed::InitOptions::default();
        options.model_name = model;
        options.show_download_progress = false;
        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| anyhow!("failed to load local embedding model: {}", e))?;

        Ok(Self {
            model: std::sync::Mutex::new(model),
            dimensions,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(feature = "embeddings-local")]
#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| anyhow!("local embedding failed: {}", e))
    }

    fn id(&self) -> &str {
        "local-fastembed"
    }
}

/// Terminal tier: a deterministic feature-extraction pipeline. Each token is
/// hashed (FNV-1a) into a signed feature vector, the token vectors are
/// mean-pooled, and the result is L2-normalized. Never fails, needs no
/// network, and no model files.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dimensions];
        for token in &tokens {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        if !tokens.is_empty() {
            let count = tokens.len() as f32;
            for value in vector.iter_mut() {
                *value /= count;
            }
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn id(&self) -> &str {
        "hash-fnv1a"
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_string())
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Walk the provider chain in preference order — HTTP endpoint, local
/// embedding library, hashed feature extraction — and return a ready
/// embedder plus its frozen dimensionality. The terminal tier makes total
/// failure unreachable in practice, but callers still treat the result as
/// optional.
pub async fn init_embedder(config: &EmbeddingConfig) -> Option<(Arc<dyn Embedder>, usize)> {
    if let Some(endpoint) = &config.endpoint {
        match HttpEmbedder::new(endpoint, &config.model) {
            Ok(embedder) => match embedder.warmup().await {
                Ok(dimensions) => {
                    info!(endpoint = %endpoint, dimensions, "embedding endpoint ready");
                    return Some((Arc::new(embedder), dimensions));
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "embedding endpoint warmup failed, falling back");
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to build embedding client, falling back");
            }
        }
    }

    #[cfg(feature = "embeddings-local")]
    match LocalEmbedder::new(&config.model) {
        Ok(embedder) => {
            let dimensions = embedder.dimensions();
            info!(dimensions, "local embedding model ready");
            return Some((Arc::new(embedder), dimensions));
        }
        Err(e) => {
            warn!(error = %e, "local embedding model unavailable, falling back");
        }
    }

    let dimensions = config.dimensions;
    info!(dimensions, "using hashed feature-extraction embedder");
    Some((Arc::new(HashEmbedder::new(dimensions)), dimensions))
}
