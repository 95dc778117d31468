use once_cell::sync::Lazy;
use regex::Regex;

/// Key/value secrets: query parameters and JSON-ish fields carrying credentials or URL signatures.
static KEYED_SECRET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(access_token|client_secret|appsecret_proof|x-amz-signature|signature|sig|token)(["']?\s*[:=]\s*["']?)([A-Za-z0-9_\-\.%/+]{6,})"#,
    )
    .expect("valid regex")
});

static BEARER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9_\-\.=]{8,}").expect("valid regex"));

/// Graph user and page tokens.
static PLATFORM_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bEAA[A-Za-z0-9]{20,}\b").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redacted {
    pub content: String,
    pub redaction_count: usize,
}

/// Scrubs credentials out of text before it is logged or persisted as an error message.
#[derive(Debug, Default, Clone)]
pub struct Redactor {
    long_tokens: bool,
}

impl Redactor {
    pub fn new(long_tokens: bool) -> Self {
        Self { long_tokens }
    }

    pub fn redact(&self, input: &str) -> Redacted {
        let mut redaction_count = 0usize;
        let mut content = input.to_string();

        let keyed = KEYED_SECRET.find_iter(&content).count();
        if keyed > 0 {
            redaction_count += keyed;
            content = KEYED_SECRET
                .replace_all(&content, |caps: &regex::Captures<'_>| {
                    format!("{}{}[REDACTED]", &caps[1], &caps[2])
                })
                .into_owned();
        }

        for (pattern, replacement) in [(&*BEARER, "Bearer [REDACTED]"), (&*PLATFORM_TOKEN, "[REDACTED_TOKEN]")] {
            let matches = pattern.find_iter(&content).count();
            if matches > 0 {
                redaction_count += matches;
                content = pattern.replace_all(&content, replacement).into_owned();
            }
        }

        if self.long_tokens {
            content = content
                .split(' ')
                .map(|word| {
                    if word.len() > 48 && word.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
                        redaction_count += 1;
                        "[REDACTED_LONG_TOKEN]".to_string()
                    } else {
                        word.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
        }

        Redacted {
            content,
            redaction_count,
        }
    }
}

/// Redacted form of an error, suitable for `creation_error` and `last_sync_error` columns.
pub fn redact_error(error: &impl std::fmt::Display) -> String {
    Redactor::new(true).redact(&error.to_string()).content
}
