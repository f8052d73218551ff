use crate::types::{ChatMessage, MessageRole};

/// Service names and engagement phrases that mark a visitor as a sales
/// lead. Matched by plain substring containment on the case-folded text.
const INTEREST_KEYWORDS: &[&str] = &[
    "pricing",
    "price",
    "cost",
    "fee",
    "quote",
    "consult",
    "demo",
    "sign up",
    "signup",
    "get started",
    "onboard",
    "proposal",
    "hire",
    "medical billing",
    "medical coding",
    "claims submission",
    "denial management",
    "ar recovery",
    "accounts receivable",
    "revenue cycle",
    "credentialing",
    "eligibility verification",
];

/// True when any user-authored message mentions one of the interest
/// keywords. Pure and order-independent: the user messages are folded into
/// one lowercase haystack, so re-running on the same set always gives the
/// same answer.
pub fn shows_service_interest(messages: &[ChatMessage]) -> bool {
    let haystack = messages
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");

    INTEREST_KEYWORDS
        .iter()
        .any(|keyword| haystack.contains(keyword))
}
