//! Browser origin allowlist for WebSocket upgrades.
//!
//! Entries are exact origins (`https://dual-math.vercel.app`), a single
//! wildcard label (`https://*.vercel.app`), or `*` for any origin. Requests
//! without an `Origin` header come from non-browser clients and are allowed.

pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://localhost:3000",
    "http://127.0.0.1:5173",
    "http://127.0.0.1:3000",
    "https://dual-math.vercel.app",
    "https://dualmath.onrender.com",
    "https://*.vercel.app",
    "https://*.onrender.com",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    Any,
    Exact(String),
    Wildcard { prefix: String, suffix: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginPolicy {
    rules: Vec<Rule>,
}

impl OriginPolicy {
    /// Builds a policy from configured entries; blank entries are skipped and
    /// an empty list falls back to the defaults.
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        let rules: Vec<Rule> = entries
            .iter()
            .map(|e| e.as_ref().trim().trim_end_matches('/'))
            .filter(|e| !e.is_empty())
            .map(parse_rule)
            .collect();
        if rules.is_empty() {
            return Self::default();
        }
        Self { rules }
    }

    pub fn any() -> Self {
        Self {
            rules: vec![Rule::Any],
        }
    }

    pub fn allows(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        self.rules.iter().any(|rule| match rule {
            Rule::Any => true,
            Rule::Exact(exact) => exact == origin,
            Rule::Wildcard { prefix, suffix } => {
                origin.len() > prefix.len() + suffix.len()
                    && origin.starts_with(prefix.as_str())
                    && origin.ends_with(suffix.as_str())
            }
        })
    }

    pub fn describe(&self) -> String {
        self.rules
            .iter()
            .map(|rule| match rule {
                Rule::Any => "*".to_string(),
                Rule::Exact(exact) => exact.clone(),
                Rule::Wildcard { prefix, suffix } => format!("{}*{}", prefix, suffix),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self {
            rules: DEFAULT_ALLOWED_ORIGINS.iter().map(|e| parse_rule(e)).collect(),
        }
    }
}

fn parse_rule(entry: &str) -> Rule {
    if entry == "*" {
        return Rule::Any;
    }
    match entry.split_once('*') {
        Some((prefix, suffix)) => Rule::Wildcard {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        },
        None => Rule::Exact(entry.to_string()),
    }
}
