//! # Embedding adapter
//!
//! The retrieval engine never computes embeddings itself; it consumes anything
//! implementing [`Embedder`]. The crate ships [`SentenceEmbedder`], a pure-Rust
//! (Candle) port of `sentence-transformers/all-MiniLM-L6-v2` producing 384-d,
//! L2-normalized vectors.
//!
//! Implementations must be deterministic enough that embedding the same text
//! twice yields vectors whose cosine similarity is 1.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::error::{CopilotError, Result};

/// Hugging Face repository of the default sentence-embedding model.
pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Output width of [`DEFAULT_MODEL_ID`].
pub const DEFAULT_DIMENSION: usize = 384;

/// Maps text to a fixed-length vector.
pub trait Embedder {
    /// Length of every vector returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

impl<E: Embedder + ?Sized> Embedder for &E {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text)
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text)
    }
}

/// BERT sentence embeddings computed on the CPU with Candle.
pub struct SentenceEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl SentenceEmbedder {
    /// Load [`DEFAULT_MODEL_ID`], downloading it into the Hugging Face cache on
    /// first use.
    pub fn load() -> Result<Self> {
        Self::load_model(DEFAULT_MODEL_ID, "main")
    }

    /// Load any BERT-architecture sentence model from the Hub.
    pub fn load_model(model_id: &str, revision: &str) -> Result<Self> {
        info!("Loading embedding model {}@{}", model_id, revision);
        let device = Device::Cpu;

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, revision.to_string());
        let api = Api::new().map_err(hub_error)?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo.get("config.json").map_err(hub_error)?;
        let tokenizer_filename = api_repo.get("tokenizer.json").map_err(hub_error)?;
        let weights_filename = api_repo.get("model.safetensors").map_err(hub_error)?;

        let config = std::fs::read_to_string(config_filename)?;
        let config: Config = serde_json::from_str(&config)
            .map_err(|e| CopilotError::Embedding(format!("bad model config: {e}")))?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| CopilotError::Embedding(format!("failed to load tokenizer: {e}")))?;

        // SAFETY: the safetensors file lives in the read-only HF cache and is not
        // modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension: config.hidden_size,
        })
    }

    /// Mean pooling over token embeddings, weighted by the attention mask.
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> Result<Tensor> {
        // embeddings: [1, seq_len, hidden]; mask must broadcast as [1, seq_len, 1]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;

        Ok(sum.broadcast_div(&count)?.squeeze(0)?)
    }

    fn normalize(&self, tensor: &Tensor) -> Result<Tensor> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        Ok(tensor.broadcast_div(&norm)?)
    }
}

impl Embedder for SentenceEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    /// Tokenize (truncating at the model's 512 token limit), run BERT, mean-pool
    /// and L2-normalize.
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| CopilotError::Embedding(format!("tokenization error: {e}")))?;
        debug!("Embedding {} tokens", tokens.get_ids().len());

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;
        let pooled = self.mean_pooling(&output, tokens.get_attention_mask())?;
        let embedding = self.normalize(&pooled)?;

        Ok(embedding.to_vec1::<f32>()?)
    }
}

fn hub_error(err: hf_hub::api::sync::ApiError) -> CopilotError {
    CopilotError::Embedding(format!("model download failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::cosine_similarity;

    struct Constant(Vec<f32>);

    impl Embedder for Constant {
        fn dimension(&self) -> usize {
            self.0.len()
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_embed_batch_defaults_to_per_text() {
        let embedder = Constant(vec![1.0, 2.0]);
        let vectors = embedder.embed_batch(&["a", "b", "c"]).unwrap();
        assert_eq!(vectors.len(), 3);
        assert!(vectors.iter().all(|v| v == &vec![1.0, 2.0]));
    }

    #[test]
    fn test_references_and_boxes_are_embedders() {
        let embedder: Box<dyn Embedder> = Box::new(Constant(vec![0.0, 1.0, 0.0]));
        assert_eq!(embedder.dimension(), 3);
        let by_ref = &embedder;
        assert_eq!(by_ref.embed("x").unwrap(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    #[ignore = "downloads all-MiniLM-L6-v2 from the Hugging Face Hub"]
    fn test_sentence_embedder_is_self_similar() {
        let embedder = SentenceEmbedder::load().unwrap();
        assert_eq!(embedder.dimension(), DEFAULT_DIMENSION);

        let a = embedder.embed("Rust is cool.").unwrap();
        let b = embedder.embed("Rust is cool.").unwrap();
        assert_eq!(a.len(), DEFAULT_DIMENSION);
        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-5);
    }
}
