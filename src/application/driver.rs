// ============================================================
// Layer 2 — Driver (line-delimited JSON protocol)
// ============================================================
// Reads one JSON request per stdin line and writes exactly one
// JSON response per stdout line. Logs go to stderr so stdout
// stays protocol-clean.
//
//   → {"type": "initialize", "inputSchema": {...}, "outputSchema": {...}}
//   ← {"type": "initialized"}
//   → {"type": "prepareBatch", "samples": [...], "outputs": [...], "fileName": "b1.json"}
//   ← {"type": "batchPrepared", "fileName": "b1.json"}
//   → {"type": "iteration", "batchFilename": "b1.json"}
//   ← {"type": "iterationCompleted", "loss": 0.71, "objects": [...]}
//
// Any failure (bad JSON, unknown type, engine error) becomes an
// `error` response and the driver keeps reading.
//
// Flow of a session:
//   initialize → graph + fresh parameters + default Adam
//   reset      → new optimizer (algorithm + parameters)
//   prepare*   → batch files, usable by any later iteration
//   iteration  → one optimizer step
//   evaluate*  → forward pass only
//   save/load  → parameters + graph description in a directory

use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data::artifact::BatchArtifact;
use crate::domain::{config::EngineConfig, schema::LayerSpec, traits::Persistable};
use crate::infra::word_vectors::WordVectors;
use crate::ml::{
    graph::SchemaGraph,
    trainer::{OptimizerParams, TrainingSession},
};

fn default_directory() -> PathBuf {
    PathBuf::from("model")
}

// ─── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    Handshake,
    Initialize {
        input_schema:     Option<Value>,
        output_schema:    Option<Value>,
        primary_schema:   Option<Value>,
        secondary_schema: Option<Value>,
        primary_layers:   Option<Vec<LayerSpec>>,
        secondary_layers: Option<Vec<LayerSpec>>,
    },
    Reset {
        optimization_algorithm: String,
        #[serde(default)]
        optimization_parameters: Map<String, Value>,
    },
    PrepareBatch {
        samples:           Option<Vec<Value>>,
        outputs:           Option<Vec<Value>>,
        primary_samples:   Option<Vec<Value>>,
        secondary_samples: Option<Vec<Value>>,
        primary_ids:       Option<Vec<String>>,
        secondary_ids:     Option<Vec<String>>,
        valences:          Option<Vec<f32>>,
        file_name:         PathBuf,
    },
    PrepareInputBatch {
        samples:   Vec<Value>,
        file_name: PathBuf,
    },
    PrepareOutputBatch {
        samples:   Vec<Value>,
        file_name: PathBuf,
    },
    Iteration {
        batch_filename:        Option<PathBuf>,
        input_batch_filename:  Option<PathBuf>,
        output_batch_filename: Option<PathBuf>,
    },
    Evaluate {
        samples: Vec<Value>,
    },
    EvaluateBatch {
        batch_filename: PathBuf,
    },
    Save {
        #[serde(default = "default_directory")]
        directory: PathBuf,
    },
    Load {
        #[serde(default = "default_directory")]
        directory: PathBuf,
    },
}

// ─── Responses ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Response {
    Handshake { name: &'static str, version: &'static str },
    Initialized,
    ResetCompleted,
    BatchPrepared { file_name: PathBuf },
    BatchInputPrepared { file_name: PathBuf },
    BatchOutputPrepared { file_name: PathBuf },
    IterationCompleted {
        loss: f64,
        #[serde(flatten)]
        decoded: Map<String, Value>,
    },
    EvaluationCompleted {
        #[serde(skip_serializing_if = "Option::is_none")]
        loss: Option<f64>,
        #[serde(flatten)]
        decoded: Map<String, Value>,
    },
    Saved { directory: PathBuf },
    Loaded { directory: PathBuf },
    Error { message: String },
}

// ─── Driver ───────────────────────────────────────────────────────────────────

pub struct Driver<B: AutodiffBackend> {
    config:  EngineConfig,
    words:   Option<Arc<WordVectors>>,
    device:  B::Device,
    session: Option<TrainingSession<B>>,
}

impl<B: AutodiffBackend> Driver<B> {
    pub fn new(config: EngineConfig, words: Option<Arc<WordVectors>>, device: B::Device) -> Self {
        Self { config, words, device, session: None }
    }

    /// Serve requests until `input` ends.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> Result<()> {
        for line in input.lines() {
            let line = line.context("Cannot read request line")?;
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<Request>(&line) {
                Ok(request) => self.handle(request).unwrap_or_else(|e| {
                    tracing::warn!("Request failed: {:#}", e);
                    Response::Error { message: format!("{e:#}") }
                }),
                Err(e) => {
                    tracing::warn!("Malformed request: {}", e);
                    Response::Error { message: format!("invalid request: {e}") }
                }
            };
            serde_json::to_writer(&mut output, &response)?;
            output.write_all(b"\n")?;
            output.flush()?;
        }
        tracing::info!("Input closed, driver exiting");
        Ok(())
    }

    fn session(&mut self) -> Result<&mut TrainingSession<B>> {
        self.session
            .as_mut()
            .ok_or_else(|| anyhow!("no graph yet: send 'initialize' or 'load' first"))
    }

    pub fn handle(&mut self, request: Request) -> Result<Response> {
        match request {
            Request::Handshake => Ok(Response::Handshake {
                name:    env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
            }),

            Request::Initialize {
                input_schema,
                output_schema,
                primary_schema,
                secondary_schema,
                primary_layers,
                secondary_layers,
            } => {
                let config = self.config.clone();
                let words  = self.words.clone();
                let graph  = match (input_schema, output_schema, primary_schema, secondary_schema) {
                    (Some(input), Some(output), _, _) => SchemaGraph::transform(input, output, config, words)?,
                    (_, _, Some(primary), Some(secondary)) => SchemaGraph::matching(
                        primary,
                        secondary,
                        primary_layers.unwrap_or_else(default_matching_layers),
                        secondary_layers.unwrap_or_else(default_matching_layers),
                        config,
                        words,
                    )?,
                    _ => {
                        return Err(anyhow!(
                            "initialize needs inputSchema + outputSchema or primarySchema + secondarySchema"
                        ))
                    }
                };
                self.session = Some(TrainingSession::new(graph, self.device.clone()));
                Ok(Response::Initialized)
            }

            Request::Reset { optimization_algorithm, optimization_parameters } => {
                let params = OptimizerParams::from_map(&optimization_parameters)?;
                self.session()?.reset(&optimization_algorithm, &params)?;
                Ok(Response::ResetCompleted)
            }

            Request::PrepareBatch {
                samples,
                outputs,
                primary_samples,
                secondary_samples,
                primary_ids,
                secondary_ids,
                valences,
                file_name,
            } => {
                let graph = self.session()?.graph_mut();
                let batch = if graph.is_matching() {
                    graph.prepare_matching_batch(
                        &primary_samples.context("missing 'primarySamples'")?,
                        &secondary_samples.context("missing 'secondarySamples'")?,
                        primary_ids.context("missing 'primaryIds'")?,
                        secondary_ids.context("missing 'secondaryIds'")?,
                        valences.context("missing 'valences'")?,
                    )?
                } else {
                    let samples = samples.context("missing 'samples'")?;
                    graph.prepare_batch(&samples, outputs.as_deref())?
                };
                batch.save(&file_name)?;
                Ok(Response::BatchPrepared { file_name })
            }

            Request::PrepareInputBatch { samples, file_name } => {
                self.session()?.graph_mut().prepare_input_batch(&samples)?.save(&file_name)?;
                Ok(Response::BatchInputPrepared { file_name })
            }

            Request::PrepareOutputBatch { samples, file_name } => {
                self.session()?.graph_mut().prepare_output_batch(&samples)?.save(&file_name)?;
                Ok(Response::BatchOutputPrepared { file_name })
            }

            Request::Iteration { batch_filename, input_batch_filename, output_batch_filename } => {
                let session = self.session()?;
                let batch   = match (batch_filename, input_batch_filename, output_batch_filename) {
                    (Some(path), _, _) => BatchArtifact::load(&path)?,
                    (None, Some(input), Some(output)) => {
                        let mut batch = BatchArtifact::load(&input)?;
                        batch.merge(BatchArtifact::load(&output)?);
                        batch
                    }
                    _ => return Err(anyhow!("iteration needs batchFilename or inputBatchFilename + outputBatchFilename")),
                };
                let (loss, decoded) = session.iteration(&batch)?;
                Ok(Response::IterationCompleted { loss, decoded })
            }

            Request::Evaluate { samples } => {
                let result = self.session()?.evaluate_samples(&samples)?;
                Ok(Response::EvaluationCompleted { loss: result.loss, decoded: result.decoded })
            }

            Request::EvaluateBatch { batch_filename } => {
                let session = self.session()?;
                let result  = session.evaluate(&BatchArtifact::load(&batch_filename)?)?;
                Ok(Response::EvaluationCompleted { loss: result.loss, decoded: result.decoded })
            }

            Request::Save { directory } => {
                self.session()?.export_parameters(&directory)?;
                Ok(Response::Saved { directory })
            }

            Request::Load { directory } => {
                self.load(&directory)?;
                Ok(Response::Loaded { directory })
            }
        }
    }

    fn load(&mut self, directory: &Path) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => session.import_parameters(directory),
            None => {
                let session = TrainingSession::load(directory, self.words.clone(), self.device.clone())?;
                self.session = Some(session);
                Ok(())
            }
        }
    }
}

/// Head used by a matching tree that names no layers.
fn default_matching_layers() -> Vec<LayerSpec> {
    vec![LayerSpec::new("dense").with("units", "outputSize")]
}
