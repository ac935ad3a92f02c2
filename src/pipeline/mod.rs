//! Pipeline stages for prescription inference.
//!
//! Each submodule implements exactly one transformation step. Keeping
//! stages separate makes each independently testable and lets us swap
//! implementations (e.g. the OCR engine) without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ image ──▶ invoke ◀──▶ failover ──▶ normalize
//! (path/URL) (resize,   (one        (retry,      (repair,
//!             encode)    attempt)    advance)     defaults)
//!                                      │
//!                           exhausted  ▼
//!                                     ocr ──▶ invoke/failover ──▶ normalize
//! ```
//!
//! 1. [`input`]     — canonicalise a user-supplied path or URL to bytes
//! 2. [`image`]     — decode, enhance, resize, and re-encode the photo;
//!    runs in `spawn_blocking` because pixel work is CPU-bound
//! 3. [`invoke`]    — one network round trip per call, with the total
//!    error-classification mapping; the only stage with network I/O
//! 4. [`failover`]  — the (model, attempt) state machine driving retries,
//!    backoff, and model advancement
//! 5. [`normalize`] — deterministic repair of model output into the
//!    guaranteed-complete result schema
//! 6. [`ocr`]       — local text extraction and the text-only fallback
//!    chain, reusing [`failover`] and [`normalize`]

pub mod failover;
pub mod image;
pub mod input;
pub mod invoke;
pub mod normalize;
pub mod ocr;
