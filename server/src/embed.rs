//! Static embedding model behind the core's [`Embedder`] trait.
//!
//! The model lives on a dedicated worker thread; requests cross over a
//! channel. The model type itself never needs to be `Send` or `Sync`.

use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use tracing::info;

use filesense_core::{Embedder, Error, Result};
use model2vec_rs::model::StaticModel;

struct Job {
    texts: Vec<String>,
    reply: mpsc::Sender<Result<Vec<Vec<f32>>>>,
}

pub struct StaticModelEmbedder {
    dim: usize,
    jobs: Mutex<mpsc::Sender<Job>>,
}

impl StaticModelEmbedder {
    /// Load `model_id` from the HuggingFace Hub (cached locally after the
    /// first download) and spawn the worker. Blocks until the model is ready.
    pub fn load(model_id: &str, dim: usize) -> anyhow::Result<Self> {
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();
        let model_id = model_id.to_string();
        let id_for_log = model_id.clone();

        thread::Builder::new().name("embedder".into()).spawn(move || {
            let model = match StaticModel::from_pretrained(&model_id, None, None, None) {
                Ok(m) => {
                    let _ = ready_tx.send(Ok(()));
                    m
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            while let Ok(job) = jobs_rx.recv() {
                let vectors: Vec<Vec<f32>> =
                    job.texts.iter().map(|t| model.encode_single(t)).collect();
                let _ = job.reply.send(Ok(vectors));
            }
        })?;

        ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("embedder worker exited during startup"))?
            .map_err(|e| anyhow::anyhow!("failed to load embedding model {id_for_log}: {e}"))?;
        info!(model = id_for_log.as_str(), dim, "Embedding model ready");
        Ok(Self { dim, jobs: Mutex::new(jobs_tx) })
    }
}

impl Embedder for StaticModelEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.jobs
            .lock()
            .unwrap()
            .send(Job { texts: texts.to_vec(), reply: reply_tx })
            .map_err(|_| Error::Embedder("embedding worker is gone".into()))?;
        let vectors = reply_rx
            .recv()
            .map_err(|_| Error::Embedder("embedding worker dropped the request".into()))??;

        for v in &vectors {
            if v.len() != self.dim {
                return Err(Error::Embedder(format!(
                    "model produced {} dims, config says {}",
                    v.len(),
                    self.dim
                )));
            }
        }
        Ok(vectors)
    }
}
