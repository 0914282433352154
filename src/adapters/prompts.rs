//! Prompt text shared by the extraction vendors.

use super::ExtractionContext;

/// System prompt that pins the reply to a single JSON object
pub const EXTRACTION_SYSTEM: &str = "You extract job details for a trades business \
    from transcribed voicemails. Respond with one JSON object only. \
    Do not use markdown code fences. Do not add explanations.";

/// Field contract the model must follow
const EXTRACTION_SCHEMA: &str = "\
Return a JSON object with these keys:
- confidence: number between 0 and 1, how sure you are this is a real job request
- clientName: caller's name, or null
- clientPhone: caller's callback number, or null
- clientEmail: caller's email, or null
- serviceType: short trade label such as \"Plumbing\" or \"Electrical\", or null
- description: one or two sentences describing the work, or null
- scheduledDate: requested date as YYYY-MM-DD, or null
- scheduledTime: requested time such as \"2:00 PM\", or null
- location: service address, or null
- estimatedPrice: number if the caller mentions a budget or quote, or null
- urgency: one of \"low\", \"medium\", \"high\", \"emergency\", or null
- followUpRequired: true if the caller asked for a call back

Use null for anything the caller did not say. Do not invent details.";

/// Build the user prompt for one transcript
pub fn extraction_prompt(transcript: &str, context: &ExtractionContext) -> String {
    let mut prompt = format!(
        "{}\n\nThe voicemail was received on {} (UTC). Resolve relative dates such as \
         \"tomorrow\" or \"next Tuesday\" against that date.\n\
         The caller's number is {}.\n",
        EXTRACTION_SCHEMA,
        context.received_at.format("%A, %Y-%m-%d %H:%M"),
        context.from_number,
    );

    if let Some(country) = &context.country_hint {
        prompt.push_str(&format!("Phone numbers are in country {}.\n", country));
    }

    prompt.push_str("\nTranscript:\n\"\"\"\n");
    prompt.push_str(transcript.trim());
    prompt.push_str("\n\"\"\"");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_prompt_embeds_received_date_and_transcript() {
        let context = ExtractionContext {
            call_sid: "CA1".to_string(),
            user_id: "u1".to_string(),
            from_number: "+15551230000".to_string(),
            received_at: Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap(),
            country_hint: Some("US".to_string()),
        };

        let prompt = extraction_prompt("  Hi, my sink is leaking.  ", &context);

        assert!(prompt.contains("Saturday, 2024-06-01 09:30"));
        assert!(prompt.contains("+15551230000"));
        assert!(prompt.contains("country US"));
        assert!(prompt.contains("\nHi, my sink is leaking.\n"));
    }
}
