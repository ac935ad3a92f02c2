//! # rxplain
//!
//! Turn a photographed medical prescription into structured,
//! patient-readable, translated medicine instructions using Vision
//! Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Prescriptions mix cramped handwriting, pharmacy shorthand (1-0-1,
//! TDS, HS), and brand names — classical OCR alone produces garbage, and a
//! single model call fails often enough (quota windows, retired model ids,
//! empty bodies) to be useless in production. This crate is the resilient
//! middle layer: it drives a prioritized chain of vision models with
//! classified retry policies, repairs whatever structured output comes
//! back, and falls back to local-OCR-plus-text-model when the whole vision
//! chain is down.
//!
//! ## Pipeline Overview
//!
//! ```text
//! photo bytes
//!  │
//!  ├─ 1. Image     decode, enhance, resize, JPEG + base64 (spawn_blocking)
//!  ├─ 2. Prompt    deterministic schema contract per target language
//!  ├─ 3. Failover  ordered model chain, classified retry/backoff
//!  │        └─ Invoke   one round trip per attempt (the only network I/O)
//!  ├─ 4. Normalize fence stripping, safe defaults, glyph derivation,
//!  │               cardinality padding
//!  └─ 5. OCR       tesseract + text-only chain, same normalizer
//!                  (only after total primary exhaustion)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rxplain::{process, PipelineConfig, PipelineInput};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GOOGLE_API_KEY / OPENAI_API_KEY / …
//!     let config = PipelineConfig::default();
//!     let bytes = std::fs::read("prescription.jpg")?;
//!     let result = process(PipelineInput::Image(bytes), "Hindi", &config).await?;
//!     for med in &result.translated {
//!         println!("{}: {} {}", med.name, med.dosage, med.visual_timing);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//!
//! * `english` and `translated` always have equal length; position `i` in
//!   both refers to the same physical medicine.
//! * Every record field is populated — placeholder defaults are injected,
//!   so no null-checks downstream.
//! * Exactly one terminal error shape for chain failure
//!   ([`RxplainError::PipelineFailed`]) carrying the last classified
//!   error; transient failures never surface individually.
//! * Worst-case latency is bounded by
//!   [`PipelineConfig::worst_case_latency`]; size your request timeout
//!   above it or set `overall_timeout` below your deadline.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `rxplain` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! rxplain = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{ClientError, EdgequakeClient, GenerationParams, ImagePayload, ModelClient, ModelRequest};
pub use config::{
    FieldDefaults, Modality, ModelCandidate, PipelineConfig, PipelineConfigBuilder, RetryPolicy,
    SCHEMA_VERSION,
};
pub use error::{ErrorKind, RxplainError};
pub use output::{InteractionWarning, MedicineRecord, PipelineResult, Severity};
pub use pipeline::ocr::{OcrEngine, TesseractCli};
pub use process::{process, process_report, process_sync, InferenceRequest, PipelineInput};
pub use progress::{NoopObserver, Observer, PipelineObserver};
