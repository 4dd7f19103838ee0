use crate::llm::GenerationError;

/// Lead-ins models like to put before the draft itself.
const BOILERPLATE_PREFIXES: &[&str] = &[
    "here's a draft:",
    "here's the draft:",
    "here is a draft:",
    "here is the draft:",
    "draft message:",
    "message draft:",
    "here's the message:",
    "here is the message:",
    "here's your message:",
    "here is your message:",
];

/// Drops a boilerplate lead-in (case-insensitive, through its colon) and trims.
pub fn strip_boilerplate(text: &str) -> &str {
    let trimmed = text.trim();
    for prefix in BOILERPLATE_PREFIXES {
        let matches = trimmed
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
        if matches {
            return trimmed[prefix.len()..].trim();
        }
    }
    trimmed
}

pub fn finalize_reply(raw: &str) -> Result<String, GenerationError> {
    let reply = strip_boilerplate(raw);
    if reply.is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(reply.to_string())
}

#[cfg(test)]
mod tests {
    use super::{finalize_reply, strip_boilerplate};
    use crate::llm::GenerationError;

    #[test]
    fn lead_ins_are_removed_case_insensitively() {
        assert_eq!(strip_boilerplate("Here's a draft: Can you do $31k?"), "Can you do $31k?");
        assert_eq!(strip_boilerplate("HERE IS YOUR MESSAGE:\n\nHi Sam,"), "Hi Sam,");
        assert_eq!(strip_boilerplate("  draft message:  Thanks!  "), "Thanks!");
    }

    #[test]
    fn ordinary_replies_are_only_trimmed() {
        assert_eq!(strip_boilerplate("  Here's what I think: offer $30k "), "Here's what I think: offer $30k");
        assert_eq!(strip_boilerplate("Thanks for the quote."), "Thanks for the quote.");
    }

    #[test]
    fn empty_drafts_fail() {
        assert!(matches!(finalize_reply("Here is the draft:   "), Err(GenerationError::Empty)));
        assert!(matches!(finalize_reply(""), Err(GenerationError::Empty)));
        assert_eq!(finalize_reply("Message draft: Deal.").expect("reply"), "Deal.");
    }
}
