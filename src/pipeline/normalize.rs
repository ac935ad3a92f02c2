//! Response normalisation: raw model text → guaranteed-complete result.
//!
//! Models wrap output in code fences despite instructions, drop optional
//! fields, return mismatched collection lengths, and mix scalar types.
//! This stage applies deterministic repair rules so every downstream
//! consumer sees one canonical, fully populated shape.
//!
//! ## Rule Order
//!
//! Rules must run in this specific order: strip fences before parsing,
//! parse before defaulting, default before glyph derivation (derivation
//! reads the dosage field), and pad collections last so padded entries are
//! built from already-completed counterparts.
//!
//! Normalisation is a fixed point: re-running it on its own serialized
//! output changes nothing.

use crate::config::{FieldDefaults, PipelineConfig};
use crate::error::RxplainError;
use crate::output::{MedicineRecord, PipelineResult};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Morning / afternoon / night glyphs, in slot order.
pub const MORNING_GLYPH: &str = "☀️";
pub const AFTERNOON_GLYPH: &str = "🌤️";
pub const NIGHT_GLYPH: &str = "🌙";

/// Normalize raw model text into a [`PipelineResult`].
///
/// Steps, in order:
/// 1. Strip fenced-code-block delimiters and a leading "json" label
/// 2. Parse; on failure → [`RxplainError::MalformedResponse`]
/// 3. Require at least one of the two top-level collections
/// 4. Fill missing/blank fields with the configured safe defaults
/// 5. Derive `visual_timing` from the dosage triplet where absent
/// 6. Pad the shorter collection so both have equal cardinality
pub fn normalize_response(
    raw: &str,
    config: &PipelineConfig,
) -> Result<PipelineResult, RxplainError> {
    let cleaned = strip_wrapping(raw);

    let value: serde_json::Value =
        serde_json::from_str(&cleaned).map_err(|e| RxplainError::MalformedResponse {
            detail: format!("invalid JSON: {e}"),
        })?;

    let obj = value.as_object().ok_or_else(|| RxplainError::MalformedResponse {
        detail: "top level is not an object".into(),
    })?;

    if !obj.contains_key("english") && !obj.contains_key("translated") {
        return Err(RxplainError::MalformedResponse {
            detail: "neither 'english' nor 'translated' collection present".into(),
        });
    }

    let mut result: PipelineResult =
        serde_json::from_value(value).map_err(|e| RxplainError::MalformedResponse {
            detail: format!("schema mismatch: {e}"),
        })?;

    for record in result.english.iter_mut().chain(result.translated.iter_mut()) {
        fill_defaults(record, &config.defaults);
    }

    pad_collections(&mut result, &config.defaults);

    debug!(
        medicines = result.english.len(),
        interactions = result.dangerous_combinations.len(),
        "response normalized"
    );

    Ok(result)
}

// ── Step 1: fence stripping ──────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```\s*$").unwrap());

/// Strip an outer code fence and a leading case-insensitive "json" label.
/// Models are known to wrap output despite instructions.
pub fn strip_wrapping(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    };

    if inner
        .get(..4)
        .is_some_and(|label| label.eq_ignore_ascii_case("json"))
    {
        inner[4..].trim_start().to_string()
    } else {
        inner
    }
}

// ── Step 4: safe defaults ────────────────────────────────────────────────

/// Fill blank fields so the caller never needs null-checks.
///
/// `frequency` mirrors `timing` and `precautions` mirrors `warnings` when
/// absent — the model is asked to duplicate them, and consumers read
/// whichever name they know. `generic_alternative` legitimately stays
/// empty (not every medicine has one). `visual_timing` is derived, not
/// defaulted.
fn fill_defaults(record: &mut MedicineRecord, defaults: &FieldDefaults) {
    fill(&mut record.name, &defaults.name);
    fill(&mut record.purpose, &defaults.purpose);
    fill(&mut record.dosage, &defaults.dosage);
    fill(&mut record.timing, &defaults.timing);
    if record.frequency.trim().is_empty() {
        record.frequency = record.timing.clone();
    }
    fill(&mut record.duration, &defaults.duration);
    fill(&mut record.warnings, &defaults.warnings);
    if record.precautions.trim().is_empty() {
        record.precautions = record.warnings.clone();
    }
    if record.visual_timing.trim().is_empty() {
        record.visual_timing = derive_visual_timing(&record.dosage, &record.timing);
    }
}

fn fill(field: &mut String, default: &str) {
    if field.trim().is_empty() {
        *field = default.to_string();
    }
}

// ── Step 5: glyph derivation ─────────────────────────────────────────────

static RE_TRIPLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\s*-\s*(\d+)\s*-\s*(\d+)").unwrap());

/// Derive the glyph sequence from the Morning-Afternoon-Night dosage
/// triplet; fall back to keyword matching in the free-text dosage and
/// timing fields; if nothing matches, return empty rather than guessing.
pub fn derive_visual_timing(dosage: &str, timing: &str) -> String {
    if let Some(caps) = RE_TRIPLET.captures(dosage) {
        let mut glyphs: Vec<&str> = Vec::new();
        if &caps[1] != "0" {
            glyphs.push(MORNING_GLYPH);
        }
        if &caps[2] != "0" {
            glyphs.push(AFTERNOON_GLYPH);
        }
        if &caps[3] != "0" {
            glyphs.push(NIGHT_GLYPH);
        }
        return glyphs.join(" ");
    }

    let from_dosage = keyword_glyphs(dosage);
    if !from_dosage.is_empty() {
        return from_dosage;
    }
    keyword_glyphs(timing)
}

fn keyword_glyphs(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut glyphs = Vec::new();
    if lower.contains("morn") || lower.contains(" am") || lower.starts_with("am") {
        glyphs.push(MORNING_GLYPH);
    }
    if lower.contains("after") || lower.contains("noon") || lower.contains("lunch") {
        glyphs.push(AFTERNOON_GLYPH);
    }
    if lower.contains("night")
        || lower.contains("bed")
        || lower.contains("evening")
        || lower.contains(" pm")
    {
        glyphs.push(NIGHT_GLYPH);
    }
    glyphs.join(" ")
}

// ── Step 6: cardinality padding ──────────────────────────────────────────

/// Guarantee equal cardinality and ordering across the two collections.
///
/// Position `i` in both refers to the same physical medicine, and
/// downstream consumers index positionally — so a mismatched response is
/// padded by duplicating the counterpart entry's non-text fields (name,
/// dosage, glyphs) with placeholder text, never by dropping data.
fn pad_collections(result: &mut PipelineResult, defaults: &FieldDefaults) {
    fn placeholder_from(source: &MedicineRecord, defaults: &FieldDefaults) -> MedicineRecord {
        MedicineRecord {
            name: source.name.clone(),
            dosage: source.dosage.clone(),
            visual_timing: source.visual_timing.clone(),
            purpose: defaults.purpose.clone(),
            timing: defaults.timing.clone(),
            frequency: defaults.timing.clone(),
            duration: defaults.duration.clone(),
            warnings: defaults.warnings.clone(),
            precautions: defaults.warnings.clone(),
            generic_alternative: String::new(),
        }
    }

    if result.english.len() > result.translated.len() {
        for i in result.translated.len()..result.english.len() {
            let padded = placeholder_from(&result.english[i], defaults);
            result.translated.push(padded);
        }
    } else if result.translated.len() > result.english.len() {
        for i in result.english.len()..result.translated.len() {
            let padded = placeholder_from(&result.translated[i], defaults);
            result.english.push(padded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    // ── fence stripping ──────────────────────────────────────────────────

    #[test]
    fn strips_json_fence() {
        assert_eq!(
            strip_wrapping("```json\n{\"english\": []}\n```"),
            "{\"english\": []}"
        );
    }

    #[test]
    fn strips_bare_fence() {
        assert_eq!(strip_wrapping("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn strips_leading_json_label() {
        assert_eq!(strip_wrapping("JSON {\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn unwrapped_text_passes_through() {
        assert_eq!(strip_wrapping("{\"a\": 1}"), "{\"a\": 1}");
    }

    // ── glyph derivation ─────────────────────────────────────────────────

    #[test]
    fn triplet_one_zero_one_is_morning_and_night() {
        assert_eq!(
            derive_visual_timing("1-0-1", ""),
            format!("{MORNING_GLYPH} {NIGHT_GLYPH}")
        );
    }

    #[test]
    fn triplet_zero_one_zero_is_afternoon_only() {
        assert_eq!(derive_visual_timing("0-1-0", ""), AFTERNOON_GLYPH);
    }

    #[test]
    fn triplet_all_ones_is_all_three() {
        assert_eq!(
            derive_visual_timing("1-1-1", ""),
            format!("{MORNING_GLYPH} {AFTERNOON_GLYPH} {NIGHT_GLYPH}")
        );
    }

    #[test]
    fn triplet_all_zeros_is_empty() {
        assert_eq!(derive_visual_timing("0-0-0", ""), "");
    }

    #[test]
    fn unparseable_dosage_with_no_keywords_is_empty_not_error() {
        assert_eq!(derive_visual_timing("as needed", ""), "");
    }

    #[test]
    fn keyword_fallback_on_dosage_text() {
        assert_eq!(
            derive_visual_timing("one tablet every morning", ""),
            MORNING_GLYPH
        );
    }

    #[test]
    fn keyword_fallback_reaches_timing_field() {
        assert_eq!(derive_visual_timing("as directed", "at bedtime"), NIGHT_GLYPH);
    }

    #[test]
    fn triplet_with_strength_prefix_falls_back_to_keywords() {
        // "500mg at night" has no leading triplet; keyword matching applies.
        assert_eq!(derive_visual_timing("500mg at night", ""), NIGHT_GLYPH);
    }

    // ── defaulting ───────────────────────────────────────────────────────

    #[test]
    fn lone_name_gets_all_fields_populated() {
        let raw = r#"{"english": [{"name": "Paracetamol"}], "translated": []}"#;
        let result = normalize_response(raw, &config()).unwrap();

        let rec = &result.english[0];
        assert_eq!(rec.name, "Paracetamol");
        assert_eq!(rec.purpose, "As prescribed by doctor");
        assert_eq!(rec.dosage, "As directed");
        assert_eq!(rec.timing, "As directed");
        assert_eq!(rec.frequency, "As directed");
        assert_eq!(rec.duration, "As prescribed");
        assert_eq!(rec.warnings, "Follow doctor's advice");
        assert_eq!(rec.precautions, "Follow doctor's advice");
        // "As directed" parses as no triplet and matches no keyword.
        assert_eq!(rec.visual_timing, "");
        assert_eq!(rec.generic_alternative, "");
    }

    #[test]
    fn blank_name_defaults_to_unknown_medicine() {
        let raw = r#"{"english": [{"name": "", "purpose": "for fever"}], "translated": []}"#;
        let result = normalize_response(raw, &config()).unwrap();
        assert_eq!(result.english[0].name, "Unknown Medicine");
        assert_eq!(result.english[0].purpose, "for fever");
    }

    #[test]
    fn frequency_mirrors_supplied_timing() {
        let raw = r#"{"english": [{"name": "X", "timing": "After food"}], "translated": []}"#;
        let result = normalize_response(raw, &config()).unwrap();
        assert_eq!(result.english[0].frequency, "After food");
    }

    #[test]
    fn visual_timing_derived_from_dosage() {
        let raw = r#"{"english": [{"name": "X", "dosage": "1-0-1"}], "translated": []}"#;
        let result = normalize_response(raw, &config()).unwrap();
        assert_eq!(
            result.english[0].visual_timing,
            format!("{MORNING_GLYPH} {NIGHT_GLYPH}")
        );
    }

    #[test]
    fn supplied_visual_timing_is_kept() {
        let raw = format!(
            r#"{{"english": [{{"name": "X", "dosage": "1-1-1", "visual_timing": "{NIGHT_GLYPH}"}}], "translated": []}}"#
        );
        let result = normalize_response(&raw, &config()).unwrap();
        assert_eq!(result.english[0].visual_timing, NIGHT_GLYPH);
    }

    // ── structural validation ────────────────────────────────────────────

    #[test]
    fn non_json_is_malformed() {
        let err = normalize_response("I could not read the prescription.", &config()).unwrap_err();
        assert!(matches!(err, RxplainError::MalformedResponse { .. }));
    }

    #[test]
    fn missing_both_collections_is_malformed() {
        let err = normalize_response(r#"{"medicines": []}"#, &config()).unwrap_err();
        assert!(matches!(err, RxplainError::MalformedResponse { .. }));
    }

    #[test]
    fn one_collection_is_enough() {
        let result = normalize_response(r#"{"english": []}"#, &config()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn top_level_array_is_malformed() {
        let err = normalize_response(r#"[{"name": "X"}]"#, &config()).unwrap_err();
        assert!(matches!(err, RxplainError::MalformedResponse { .. }));
    }

    // ── cardinality padding ──────────────────────────────────────────────

    #[test]
    fn shorter_translated_collection_is_padded() {
        let raw = r#"{
            "english": [
                {"name": "Amoxicillin 500mg", "dosage": "1-1-1", "purpose": "for infection"},
                {"name": "Paracetamol", "dosage": "1-0-1", "purpose": "for fever"}
            ],
            "translated": [
                {"name": "Amoxicillin 500mg", "dosage": "1-1-1", "purpose": "संक्रमण के लिए"}
            ]
        }"#;
        let result = normalize_response(raw, &config()).unwrap();

        assert_eq!(result.english.len(), result.translated.len());
        let padded = &result.translated[1];
        // Non-text fields duplicated from the canonical entry…
        assert_eq!(padded.name, "Paracetamol");
        assert_eq!(padded.dosage, "1-0-1");
        assert_eq!(padded.visual_timing, result.english[1].visual_timing);
        // …text fields hold placeholders.
        assert_eq!(padded.purpose, "As prescribed by doctor");
    }

    #[test]
    fn shorter_english_collection_is_padded() {
        let raw = r#"{
            "english": [],
            "translated": [{"name": "Cetirizine", "dosage": "0-0-1"}]
        }"#;
        let result = normalize_response(raw, &config()).unwrap();
        assert_eq!(result.english.len(), 1);
        assert_eq!(result.english[0].name, "Cetirizine");
    }

    // ── idempotence ──────────────────────────────────────────────────────

    #[test]
    fn normalization_is_a_fixed_point() {
        let raw = r#"{
            "english": [
                {"name": "Paracetamol 500mg", "dosage": "1-0-1", "purpose": "for fever"},
                {"name": "Amoxicillin"}
            ],
            "translated": [
                {"name": "Paracetamol 500mg", "dosage": "1-0-1", "purpose": "बुखार के लिए"}
            ],
            "dangerous_combinations": [
                {"medicines": "Paracetamol + Amoxicillin", "risk": "none really", "severity": "medium"}
            ]
        }"#;
        let once = normalize_response(raw, &config()).unwrap();
        let serialized = serde_json::to_string(&once).unwrap();
        let twice = normalize_response(&serialized, &config()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn failure_report_is_a_fixed_point() {
        let report = PipelineResult::failure("all models failed");
        let serialized = serde_json::to_string(&report).unwrap();
        let normalized = normalize_response(&serialized, &config()).unwrap();
        assert_eq!(report, normalized);
    }

    // ── full-shape parse ─────────────────────────────────────────────────

    #[test]
    fn interactions_survive_normalization() {
        let raw = r#"{
            "english": [{"name": "Aspirin"}, {"name": "Warfarin"}],
            "translated": [{"name": "Aspirin"}, {"name": "Warfarin"}],
            "dangerous_combinations": [{
                "medicines": ["Aspirin", "Warfarin"],
                "risk": "Increased bleeding risk",
                "risk_translated": "रक्तस्राव का खतरा",
                "severity": "high"
            }]
        }"#;
        let result = normalize_response(raw, &config()).unwrap();
        assert_eq!(result.dangerous_combinations.len(), 1);
        assert_eq!(
            result.dangerous_combinations[0].medicines,
            vec!["Aspirin", "Warfarin"]
        );
    }

    #[test]
    fn fenced_response_normalizes_end_to_end() {
        let raw = "```json\n{\"english\": [{\"name\": \"Ibuprofen\", \"dosage\": \"1-1-1\"}], \"translated\": []}\n```";
        let result = normalize_response(raw, &config()).unwrap();
        assert_eq!(result.english.len(), 1);
        assert_eq!(result.translated.len(), 1);
        assert_eq!(
            result.english[0].visual_timing,
            format!("{MORNING_GLYPH} {AFTERNOON_GLYPH} {NIGHT_GLYPH}")
        );
    }
}
