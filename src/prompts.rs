//! Prompt rendering for prescription interpretation.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — the vision path and the OCR-text
//!    fallback path embed the same schema contract, so the two cannot
//!    drift apart.
//!
//! 2. **Testability** — unit tests can inspect rendered prompts directly
//!    without spinning up a real model, making prompt regressions easy to
//!    catch.
//!
//! Rendering is a pure, deterministic function of (target language,
//! modality): same inputs, same bytes, every time.

use crate::config::Modality;

/// The output schema, stated field-by-field. Shared verbatim by both
/// modalities; `{language}` is substituted at render time.
const SCHEMA_BLOCK: &str = r#"RETURN ONLY VALID JSON with this EXACT structure:
{
  "english": [
    {
      "name": "Full medicine name with strength if visible (e.g., Paracetamol 500mg)",
      "purpose": "Simple purpose in plain language (e.g., 'for fever and pain')",
      "dosage": "Standard Morning-Afternoon-Night format (e.g., 1-0-1, 1-1-1, 0-0-1)",
      "visual_timing": "Glyphs: ☀️ for morning, 🌤️ for afternoon, 🌙 for night (e.g., ☀️ 🌙)",
      "timing": "When to take (e.g., After food, Before food, At bedtime)",
      "frequency": "Same as timing field",
      "duration": "How long (e.g., 5 days, 2 weeks, Continue)",
      "warnings": "Important warnings (e.g., Avoid alcohol, Take with water)",
      "precautions": "Same as warnings",
      "generic_alternative": "Cheaper generic option with brief description, or empty string"
    }
  ],
  "translated": [
    {
      "name": "Medicine name (keep in original script — brand names are not translated)",
      "purpose": "FULLY translated in {language} script",
      "dosage": "1-0-1 (keep numeric format)",
      "visual_timing": "☀️ 🌙 (keep glyphs)",
      "timing": "FULLY translated in {language} script",
      "frequency": "FULLY translated in {language} script",
      "duration": "FULLY translated in {language} script",
      "warnings": "FULLY translated in {language} script",
      "precautions": "FULLY translated in {language} script",
      "generic_alternative": "FULLY translated in {language} script"
    }
  ],
  "dangerous_combinations": [
    {
      "medicines": ["Medicine A", "Medicine B"],
      "risk": "Clear explanation in English of what could happen",
      "risk_translated": "Same explanation FULLY in {language} script",
      "severity": "high or medium"
    }
  ]
}

The "translated" array must contain exactly one entry per "english" entry,
in the same order.

Check ALL medicine pairs for dangerous interactions. If none are found,
return "dangerous_combinations": [] — never omit the field.

TRANSLATION RULES FOR {language}:
- Medicine names stay in their original script (brand names)
- ALL other human-readable fields MUST be in {language} script
- Use simple, village-friendly language; avoid medical jargon

DO NOT use markdown code blocks. Return ONLY the raw JSON object."#;

/// Reading guidance for the vision modality.
const VISION_PREAMBLE: &str = r#"You are an expert medical prescription analyzer helping patients understand their medicines.

TASK: Analyze this prescription image with MAXIMUM ACCURACY and extract ALL medicine information.

INSTRUCTIONS:
1. READ CAREFULLY: Look for handwritten AND printed text
2. EXTRACT EVERYTHING: Medicine names, dosages, frequencies, durations, special instructions
3. HANDLE ABBREVIATIONS: OD=once daily, BD=twice daily, TDS=three times, QID=four times, SOS=as needed
4. DOSAGE PATTERNS: Convert to Morning-Afternoon-Night format (e.g., 1-0-1, 1-1-1, 0-0-1)
5. TIMING CLUES: "AC" = before food, "PC" = after food, "HS" = at bedtime, "PRN" = as needed
6. DURATION: Extract days/weeks (e.g., "5 days", "2 weeks", "1 month")
7. SPECIAL NOTES: Capture warnings like "avoid alcohol", "take with water", "empty stomach"
8. UNCLEAR TEXT: Extract what you CAN read; mark uncertain extractions with "(?)" in the name
9. Do NOT diagnose"#;

/// Reading guidance for the text modality: the user turn carries text
/// extracted by local OCR, with all the noise that implies.
const TEXT_PREAMBLE: &str = r#"You are a medical prescription parser. The user message contains text extracted from a prescription photograph using OCR. It may contain spelling errors, stray characters, and broken formatting.

INSTRUCTIONS:
1. Fix obvious OCR spelling mistakes in medicine names
2. Expand medical abbreviations (OD=once daily, BD=twice daily, TDS=three times, 1-0-1 = morning and night)
3. Identify ALL medicines present
4. Convert into patient-friendly instructions
5. If you cannot extract clear medicine information, return empty arrays
6. Do NOT diagnose"#;

/// Render the instruction prompt for the given target language and
/// modality.
///
/// The returned text states the full schema contract; for
/// [`Modality::Text`] the OCR extraction travels separately as the user
/// turn so the instructions stay byte-identical across requests.
pub fn instruction_prompt(language: &str, modality: Modality) -> String {
    let preamble = match modality {
        Modality::Vision => VISION_PREAMBLE,
        Modality::Text => TEXT_PREAMBLE,
    };
    format!(
        "{preamble}\n\n{}",
        SCHEMA_BLOCK.replace("{language}", language)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_prompt_embeds_language() {
        let p = instruction_prompt("Hindi", Modality::Vision);
        assert!(p.contains("FULLY translated in Hindi script"));
        assert!(p.contains("TRANSLATION RULES FOR Hindi"));
        assert!(!p.contains("{language}"));
    }

    #[test]
    fn prompt_states_all_schema_fields() {
        let p = instruction_prompt("Tamil", Modality::Vision);
        for field in [
            "\"name\"",
            "\"purpose\"",
            "\"dosage\"",
            "\"visual_timing\"",
            "\"timing\"",
            "\"frequency\"",
            "\"duration\"",
            "\"warnings\"",
            "\"precautions\"",
            "\"generic_alternative\"",
            "\"dangerous_combinations\"",
        ] {
            assert!(p.contains(field), "missing schema field {field}");
        }
    }

    #[test]
    fn prompt_forbids_markdown_fencing() {
        for modality in [Modality::Vision, Modality::Text] {
            let p = instruction_prompt("Telugu", modality);
            assert!(p.contains("DO NOT use markdown code blocks"));
            assert!(p.contains("raw JSON object"));
        }
    }

    #[test]
    fn prompt_requires_interaction_check_and_empty_collection() {
        let p = instruction_prompt("Hindi", Modality::Vision);
        assert!(p.contains("Check ALL medicine pairs"));
        assert!(p.contains(r#""dangerous_combinations": []"#));
        assert!(p.contains("never omit the field"));
    }

    #[test]
    fn brand_names_stay_untranslated() {
        let p = instruction_prompt("Kannada", Modality::Vision);
        assert!(p.contains("Medicine names stay in their original script"));
    }

    #[test]
    fn text_prompt_mentions_ocr_noise() {
        let p = instruction_prompt("Hindi", Modality::Text);
        assert!(p.contains("OCR"));
        assert!(p.contains("spelling"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = instruction_prompt("Malayalam", Modality::Vision);
        let b = instruction_prompt("Malayalam", Modality::Vision);
        assert_eq!(a, b);
    }
}
