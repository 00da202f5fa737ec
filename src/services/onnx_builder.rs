// Shared ONNX Runtime session construction and pooling
//
// Both the region detector and the sequence recognizer load their graphs
// through here so the compute profile is honored the same way everywhere.

use anyhow::{anyhow, bail, Context, Result};
use crossbeam::channel::{bounded, Receiver, RecvError, Sender};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::core::types::ComputeProfile;

#[cfg(feature = "tensorrt")]
use ort::execution_providers::TensorRTExecutionProvider;

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

#[cfg(all(target_os = "macos", feature = "coreml"))]
use ort::execution_providers::CoreMLExecutionProvider;

#[cfg(all(target_os = "windows", feature = "directml"))]
use ort::execution_providers::DirectMLExecutionProvider;

#[cfg(feature = "openvino")]
use ort::execution_providers::OpenVINOExecutionProvider;

/// Thread count for ONNX Runtime CPU inference.
///
/// Windows is capped at 6 threads: past that, synchronization overhead
/// outweighs the extra cores (microsoft/onnxruntime#3713).
fn optimal_intra_op_threads() -> usize {
    let total_cores = num_cpus::get();

    #[cfg(target_os = "windows")]
    let optimal = std::cmp::min(6, total_cores).max(1);

    #[cfg(not(target_os = "windows"))]
    let optimal = total_cores.max(1);

    debug!("CPU threads: {} total cores, using {} for inference", total_cores, optimal);
    optimal
}

/// Fixed-size pool of sessions for one model.
///
/// Backed by a crossbeam bounded channel: `acquire` blocks until a session
/// is free, so a pool of one serializes inference on that model.
pub struct SessionPool {
    sender: Sender<Session>,
    receiver: Receiver<Session>,
    backend: String,
}

impl SessionPool {
    /// Build `size` sessions for the model at `model_path`
    pub fn build(
        model_path: &Path,
        model_name: &str,
        profile: ComputeProfile,
        size: usize,
    ) -> Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = bounded(size);

        let (backend, first) = build_session(model_path, model_name, profile)?;
        sender
            .send(first)
            .map_err(|_| anyhow!("Failed to initialize {} session pool", model_name))?;

        for i in 1..size {
            debug!("Creating {} session {} of {}", model_name, i + 1, size);
            let (_, session) = build_session(model_path, model_name, profile)?;
            sender
                .send(session)
                .map_err(|_| anyhow!("Failed to add session to {} pool", model_name))?;
        }

        info!("✓ {}: {} ({} sessions)", model_name, backend, size);
        Ok(Self {
            sender,
            receiver,
            backend,
        })
    }

    /// Execution provider the sessions were registered with
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Take a session out of the pool; it returns on drop
    pub fn acquire(&self) -> Result<PooledSession<'_>, RecvError> {
        let session = self.receiver.recv()?;
        Ok(PooledSession {
            pool: self,
            session: Some(session),
        })
    }
}

/// Session borrowed from a [`SessionPool`]
pub struct PooledSession<'a> {
    pool: &'a SessionPool,
    session: Option<Session>,
}

impl Deref for PooledSession<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        // Only `None` after drop has taken it
        self.session.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledSession<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledSession<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            // The pool owns the receiver, so the channel cannot be disconnected here
            let _ = self.pool.sender.send(session);
        }
    }
}

/// Accelerators compiled into this build, in preference order
fn accelerator_providers() -> Vec<(&'static str, ExecutionProviderDispatch)> {
    #[allow(unused_mut)]
    let mut providers: Vec<(&'static str, ExecutionProviderDispatch)> = Vec::new();

    #[cfg(feature = "tensorrt")]
    providers.push(("TensorRT", TensorRTExecutionProvider::default().build()));

    #[cfg(feature = "cuda")]
    providers.push(("CUDA", CUDAExecutionProvider::default().build()));

    #[cfg(all(target_os = "macos", feature = "coreml"))]
    providers.push(("CoreML", CoreMLExecutionProvider::default().build()));

    #[cfg(all(target_os = "windows", feature = "directml"))]
    providers.push(("DirectML", DirectMLExecutionProvider::default().build()));

    #[cfg(feature = "openvino")]
    providers.push((
        "OpenVINO",
        OpenVINOExecutionProvider::default()
            .with_device_type("GPU")
            .build(),
    ));

    providers
}

fn commit_with_provider(
    name: &str,
    provider: ExecutionProviderDispatch,
    model_path: &Path,
) -> Result<Session> {
    let builder = Session::builder()?.with_execution_providers([provider.error_on_failure()])?;

    // DirectML needs sequential execution and no memory pattern
    let builder = if name == "DirectML" {
        builder
            .with_parallel_execution(false)?
            .with_memory_pattern(false)?
            .with_optimization_level(GraphOptimizationLevel::Level1)?
    } else {
        builder.with_optimization_level(GraphOptimizationLevel::Level3)?
    };

    let session = builder
        .with_intra_threads(optimal_intra_op_threads())?
        .with_inter_threads(1)?
        .commit_from_file(model_path)?;
    Ok(session)
}

fn commit_cpu(model_path: &Path, model_name: &str) -> Result<Session> {
    Session::builder()
        .context(format!("Failed to create ONNX session builder for {}", model_name))?
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .context(format!("Failed to configure CPU execution provider for {}", model_name))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context(format!("Failed to set graph optimization level for {}", model_name))?
        .with_intra_threads(optimal_intra_op_threads())
        .context(format!("Failed to configure intra-op threads for {}", model_name))?
        .with_inter_threads(1)
        .context(format!("Failed to configure inter-op threads for {}", model_name))?
        .commit_from_file(model_path)
        .context(format!(
            "Failed to load {} ONNX model from {}",
            model_name,
            model_path.display()
        ))
}

/// Build one ONNX Runtime session for `model_path` under `profile`.
///
/// * `AcceleratorOnly` tries each compiled-in accelerator and fails if none
///   registers.
/// * `Mixed` tries the accelerators, then falls back to CPU.
/// * `CpuOnly` goes straight to CPU.
///
/// Returns (backend_name, Session)
pub fn build_session(
    model_path: &Path,
    model_name: &str,
    profile: ComputeProfile,
) -> Result<(String, Session)> {
    if !model_path.exists() {
        bail!(
            "{} model not found at {}",
            model_name,
            model_path.display()
        );
    }

    if profile != ComputeProfile::CpuOnly {
        let providers = accelerator_providers();
        if providers.is_empty() && profile == ComputeProfile::AcceleratorOnly {
            bail!(
                "Compute profile 'accelerator' requested for {} but no accelerator \
                execution provider is compiled in (enable cuda, tensorrt, coreml, directml or openvino)",
                model_name
            );
        }

        for (name, provider) in providers {
            match commit_with_provider(name, provider, model_path) {
                Ok(session) => {
                    info!("✓ Using {} acceleration for {}", name, model_name);
                    return Ok((name.to_string(), session));
                }
                Err(e) => debug!("{} unavailable for {}: {}", name, model_name, e),
            }
        }

        if profile == ComputeProfile::AcceleratorOnly {
            bail!(
                "No accelerator could be registered for {} under compute profile 'accelerator'",
                model_name
            );
        }
    }

    let session = commit_cpu(model_path, model_name)?;
    if profile == ComputeProfile::Mixed {
        warn!("⚠️  Using CPU-only inference for {} (no accelerator available)", model_name);
    } else {
        info!("✓ Using CPU for {}", model_name);
    }
    Ok(("CPU".to_string(), session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_reported() {
        let err = build_session(
            Path::new("does/not/exist.onnx"),
            "detector",
            ComputeProfile::CpuOnly,
        )
        .err()
        .map(|e| e.to_string())
        .unwrap_or_default();
        assert!(err.contains("detector model not found"));
    }

    #[test]
    fn intra_op_threads_is_positive() {
        assert!(optimal_intra_op_threads() >= 1);
    }
}
