use anyhow::{Result, anyhow, ensure};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use candle_core::{Device, Tensor, DType};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{XLMRobertaModel, Config as XLMRobertaConfig};
use tokenizers::Tokenizer;

use opsrag_core::config::LocalEmbeddingSettings;

pub mod device;
pub mod pool;
pub mod tokenize;

pub use pool::masked_mean_l2;

/// Synchronous in-process text encoder.
pub trait TextEncoder: Send + Sync {
    /// Short model label used in provider ids.
    fn model_name(&self) -> &str;
    fn dim(&self) -> usize;
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// BGE-M3 (XLM-RoBERTa) with masked mean pooling and L2 normalisation.
pub struct EmbeddingModel { model: XLMRobertaModel, tokenizer: Tokenizer, device: Device, max_len: usize, dim: usize }

impl EmbeddingModel {
    pub fn new(model_dir: &Path, max_len: usize, dim: usize) -> Result<Self> {
        ensure!(dim > 0 && max_len > 0, "embedding dim and max_len must be positive (dim={dim}, max_len={max_len})");
        let device = device::select_device();
        info!(dir = %model_dir.display(), "loading BGE-M3 model");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let weights_path = model_dir.join("pytorch_model.bin");
        let weights = candle_core::pickle::read_all(&weights_path)?;
        let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        info!(dim, max_len, "BGE-M3 model loaded");
        Ok(Self { model, tokenizer, device, max_len, dim })
    }

    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize::tokenize_on_device(&self.tokenizer, text, self.max_len, &self.device)?;
        let token_type_ids = Tensor::zeros((1, self.max_len), DType::I64, &self.device)?;
        let hidden_states = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let emb = masked_mean_l2(&hidden_states, &attention_mask)?;
        let emb_cpu: Vec<f32> = emb.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()?;
        if emb_cpu.len() != self.dim {
            return Err(anyhow!("model produced {} dims, configured for {}", emb_cpu.len(), self.dim));
        }
        if start.elapsed().as_millis() > 100 { debug!(ms = start.elapsed().as_millis() as u64, "slow embedding"); }
        Ok(emb_cpu)
    }
}

impl TextEncoder for EmbeddingModel {
    fn model_name(&self) -> &str { "bge-m3" }
    fn dim(&self) -> usize { self.dim }
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { texts.iter().map(|t| self.embed_text(t)).collect() }
}

/// Deterministic bag-of-words hashing encoder. Needs no model files.
///
/// Tokens are lowercased alphanumeric runs, hashed with XxHash64 into `dim`
/// buckets; the result is L2-normalised, so shared vocabulary means higher cosine.
pub struct FakeEmbedder { dim: usize }

impl FakeEmbedder {
    pub fn new(dim: usize) -> Result<Self> {
        ensure!(dim > 0, "embedding dim must be positive");
        Ok(Self { dim })
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher}; use twox_hash::XxHash64;
        let mut v = vec![0f32; self.dim];
        let tokens = text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).map(|t| t.to_lowercase());
        for (i, token) in tokens.enumerate() {
            let mut hasher = XxHash64::with_seed(0); token.hash(&mut hasher); let h = hasher.finish();
            let idx = (h as usize) % self.dim; let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += 0.5 + val * 0.5 + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6); for x in &mut v { *x /= norm; } v
    }
}

impl TextEncoder for FakeEmbedder {
    fn model_name(&self) -> &str { "hash" }
    fn dim(&self) -> usize { self.dim }
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { Ok(texts.iter().map(|t| self.embed_text(t)).collect()) }
}

/// Load the in-process encoder described by `settings`.
///
/// `use_fake` (or `APP_USE_FAKE_EMBEDDINGS=1`) selects [`FakeEmbedder`];
/// otherwise model files are located and loaded eagerly.
pub fn load_local_encoder(settings: &LocalEmbeddingSettings) -> Result<Box<dyn TextEncoder>> {
    let env_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
    if settings.use_fake || env_fake {
        info!(dim = settings.dim, "using FakeEmbedder");
        return Ok(Box::new(FakeEmbedder::new(settings.dim)?));
    }
    let model_dir = resolve_model_dir(settings.model_dir.as_deref())?;
    Ok(Box::new(EmbeddingModel::new(&model_dir, settings.max_len, settings.dim)?))
}

fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = configured {
        let p = opsrag_core::config::expand_path(dir);
        if p.exists() { return Ok(p); }
        warn!(dir = %p.display(), "configured model_dir does not exist");
    }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) { let p = PathBuf::from(&dir); if p.exists() { debug!(var, dir = %p.display(), "using model dir from env"); return Ok(p); } }
    }
    for candidate in ["../models/bge-m3", "models/bge-m3"] {
        let p = Path::new(candidate); if p.exists() { return Ok(p.to_path_buf()); }
    }
    Err(anyhow!("Could not locate BGE-M3 model directory"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_embedder_is_normalised_and_deterministic() {
        let e = FakeEmbedder::new(256).unwrap();
        let a = e.embed_text("The sky is blue.");
        let b = e.embed_text("The sky is blue.");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn fake_embedder_ignores_case_and_punctuation() {
        let e = FakeEmbedder::new(256).unwrap();
        assert_eq!(e.embed_text("Sky? BLUE!"), e.embed_text("sky blue"));
    }

    #[test]
    fn empty_text_gives_zero_vector_without_nan() {
        let v = FakeEmbedder::new(8).unwrap().embed_text("  ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(FakeEmbedder::new(0).is_err());
        let settings = LocalEmbeddingSettings { use_fake: true, dim: 0, ..Default::default() };
        assert!(load_local_encoder(&settings).is_err());
    }
}
