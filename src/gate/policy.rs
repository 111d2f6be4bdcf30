//! Role-based policy enforcement over `(subject, object, action)`.
//!
//! Rule file format, one rule per line:
//!
//! ```text
//! # subject, object, action[, effect]
//! p, 888, /v1/me, GET
//! p, 888, /v1/users/:id, GET|PUT
//! p, *, /admin/*, *, deny
//! ```
//!
//! - subject: an authority id or `*`
//! - object: a path; `:name` matches one segment, `*` any run of one segment,
//!   a trailing `/*` the prefix and everything below it. Repeated and
//!   trailing slashes are ignored, as they are in request paths
//! - action: a method, `*`, or a `|` separated list (case-insensitive)
//! - effect: `allow` (default) or `deny`
//!
//! Any matching deny wins over every allow. No match means deny.

use regex::Regex;
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("policy line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("invalid object pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

#[derive(Debug, Clone)]
pub struct PolicyRule {
    subject: String,
    object_re: Regex,
    /// `None` matches any method.
    actions: Option<Vec<String>>,
    effect: Effect,
}

impl PolicyRule {
    /// # Errors
    /// Returns an error if the object pattern does not compile.
    pub fn new(subject: &str, object: &str, action: &str, effect: Effect) -> Result<Self, PolicyError> {
        let actions = if action == "*" {
            None
        } else {
            Some(
                action
                    .split('|')
                    .map(|method| method.trim().to_ascii_uppercase())
                    .filter(|method| !method.is_empty())
                    .collect(),
            )
        };

        Ok(Self {
            subject: subject.to_string(),
            object_re: compile_object(object)?,
            actions,
            effect,
        })
    }

    #[must_use]
    pub fn matches(&self, subject: &str, object: &str, action: &str) -> bool {
        (self.subject == "*" || self.subject == subject)
            && self.object_re.is_match(object)
            && self.actions.as_ref().map_or(true, |actions| {
                actions
                    .iter()
                    .any(|method| method.eq_ignore_ascii_case(action))
            })
    }
}

// The literal part goes through the same normalization as request paths, so
// `/v1/me/` and `//v1/me` compile like `/v1/me`.
fn compile_object(pattern: &str) -> Result<Regex, PolicyError> {
    let source = if pattern == "*" {
        "^.*$".to_string()
    } else {
        let (body, tail) = match pattern.strip_suffix("/*") {
            Some(body) => (body, "(?:/.*)?"),
            None => (pattern, ""),
        };
        let segments: Vec<String> = body
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment {
                "*" => "[^/]*".to_string(),
                param if param.len() > 1 && param.starts_with(':') => "[^/]+".to_string(),
                literal => regex::escape(literal),
            })
            .collect();

        match (segments.is_empty(), tail.is_empty()) {
            // `/*` covers everything below the root
            (true, false) => "^/.*$".to_string(),
            (true, true) => "^/$".to_string(),
            (false, _) => format!("^/{}{tail}$", segments.join("/")),
        }
    };

    Regex::new(&source).map_err(|source| PolicyError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// An immutable, compiled set of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<PolicyRule>,
}

impl RuleSet {
    /// Parse rules from policy file text.
    ///
    /// # Errors
    /// Returns an error naming the first malformed line.
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        let mut rules = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let content = raw.trim();
            if content.is_empty() || content.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = content.split(',').map(str::trim).collect();
            let parse_error = |reason: &str| PolicyError::Parse {
                line,
                reason: reason.to_string(),
            };

            if fields[0] != "p" {
                return Err(parse_error("rules must start with `p`"));
            }
            if !(4..=5).contains(&fields.len()) {
                return Err(parse_error("expected `p, subject, object, action[, effect]`"));
            }
            if fields[1..4].iter().any(|field| field.is_empty()) {
                return Err(parse_error("subject, object and action must not be empty"));
            }

            let effect = match fields.get(4).map(|effect| effect.to_ascii_lowercase()) {
                None => Effect::Allow,
                Some(effect) if effect == "allow" => Effect::Allow,
                Some(effect) if effect == "deny" => Effect::Deny,
                Some(_) => return Err(parse_error("effect must be `allow` or `deny`")),
            };

            rules.push(PolicyRule::new(fields[1], fields[2], fields[3], effect)?);
        }

        Ok(Self { rules })
    }

    /// Read and parse a policy file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self, PolicyError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| PolicyError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&text)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn decide(&self, subject: &str, object: &str, action: &str) -> Decision {
        let mut allowed = false;
        for rule in self
            .rules
            .iter()
            .filter(|rule| rule.matches(subject, object, action))
        {
            match rule.effect {
                Effect::Deny => return Decision::Deny,
                Effect::Allow => allowed = true,
            }
        }

        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// Collapse repeated `/`, drop a trailing `/` (root excepted) and any query.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Process-wide cache of the active rule set.
pub struct PolicyEnforcer {
    rules: RwLock<Arc<RuleSet>>,
    development: bool,
}

impl fmt::Debug for PolicyEnforcer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEnforcer")
            .field("rules", &self.rules().len())
            .field("development", &self.development)
            .finish()
    }
}

impl PolicyEnforcer {
    /// `development` bypasses enforcement entirely.
    #[must_use]
    pub fn new(rules: RuleSet, development: bool) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            development,
        }
    }

    #[must_use]
    pub fn rules(&self) -> Arc<RuleSet> {
        let guard = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Swap in a new rule set. Requests already deciding keep the old one.
    pub fn reload(&self, rules: RuleSet) {
        let count = rules.len();
        let mut guard = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(rules);
        drop(guard);
        debug!(rules = count, "policy reloaded");
    }

    #[instrument(skip(self), level = "debug")]
    pub fn enforce(&self, subject: &str, object: &str, action: &str) -> Decision {
        if self.development {
            return Decision::Allow;
        }

        let decision = self.rules().decide(subject, &normalize_path(object), action);
        debug!(?decision);
        decision
    }
}
