//! Prompts for OCR and schema-constrained extraction.
//!
//! Every instruction sent to a model lives here so that wording changes never
//! touch request or validation code, and tests can inspect the prompts
//! directly. Callers can override the extraction system prompt via
//! [`crate::config::Settings::system_prompt`].

/// Fixed conversion instruction for the DeepSeek-OCR model.
pub const OCR_PROMPT: &str = "<image>\n<|grounding|>Convert the document to markdown.";

/// Shape of the JSON document the extraction model must return.
///
/// Mirrors [`crate::schema::StructuredRecord`]; `?` marks optional fields.
pub const SCHEMA_DESCRIPTION: &str = r#"{
  "organization": {
    "name": string,                      // required, non-empty
    "description": string,               // required, non-empty
    "url": string?                       // website if printed on the flyer
  },
  "services_at_locations": [
    {
      "service": {
        "name": string,
        "description": string,
        "status": "active" | "inactive" | "defunct" | "temporarily closed",
        "eligibility": string?,          // who may use the service
        "fees": string?,                 // cost, e.g. "Free"
        "schedules": [
          {
            "description": string?,
            "freq": "WEEKLY" | "MONTHLY",
            "byday": ["MO" | "TU" | "WE" | "TH" | "FR" | "SA" | "SU"]?,
            "opens_at": "HH:MM",         // 24-hour clock
            "closes_at": "HH:MM"
          }
        ],
        "phones": [
          {
            "number": string,
            "phone_type": "text" | "voice" | "fax" | "cell" | "video" | "pager" | "textphone"
          }
        ]
      },
      "location": {
        "name": string,
        "description": string?,
        "addresses": [
          {
            "address_1": string,
            "city": string,
            "state_province": string,
            "postal_code": string,
            "address_type": "physical" | "postal" | "virtual"
          }
        ]
      }
    }
  ]
}"#;

/// Default system prompt for extraction.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert data extractor for the Human Services Data Specification (HSDS).
You read community-services flyers and record the organization, every service it offers, and where and when each service is available.

Follow these rules precisely:

1. Extract only what the flyer states. Do not invent phone numbers, addresses or hours.
2. Create one services_at_locations entry for every (service, location) pair on the flyer.
3. Use "active" as the status unless the flyer says the service is closed or discontinued.
4. Omit optional fields that the flyer does not mention. Use [] for empty lists.
5. Convert times to the 24-hour HH:MM format.
6. Answer with a single JSON object matching the schema below. No commentary, no markdown fences."#;

/// Build the full system message: instructions followed by the schema.
pub fn system_message(custom: Option<&str>) -> String {
    format!(
        "{}\n\nAnswer in JSON using this schema:\n{}",
        custom.unwrap_or(DEFAULT_SYSTEM_PROMPT),
        SCHEMA_DESCRIPTION
    )
}

/// User turn accompanying the flyer image.
pub const IMAGE_INSTRUCTION: &str =
    "Extract the HSDS data from this community services flyer image.";

/// User turn wrapping OCR output for text-only extraction.
pub fn text_instruction(ocr_text: &str) -> String {
    format!(
        "Extract the HSDS data from the following community services flyer, transcribed to markdown by OCR:\n\n\"\"\"\n{}\n\"\"\"",
        ocr_text
    )
}
