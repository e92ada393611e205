//! Exclusion rule snapshots
//!
//! The active [`RuleSet`] is immutable and published through a
//! `tokio::sync::watch` channel. A query clones the `Arc` once and keeps that
//! snapshot for its whole lifetime; a reload builds and validates a complete
//! replacement before swapping it in.

use config::{Config, File, FileFormat};
use lexforge_common::{
    errors::{AppError, Result},
    metrics,
    models::ExclusionRule,
};
use regex_lite::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Layout of the rules file
#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    excluded_areas: Vec<ExclusionRule>,
}

/// Lowercase the literal text of a pattern. Escapes such as `\W` or `\S`
/// change meaning with case, so the character after a backslash is kept.
fn lowercase_literals(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(c);
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// A validated rule with its query vocabulary prepared for matching
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: ExclusionRule,
    keywords: Vec<String>,
    aliases: Vec<String>,
    patterns: Vec<Regex>,
}

impl CompiledRule {
    fn compile(rule: ExclusionRule) -> Result<Self> {
        let invalid = |message: String| AppError::Configuration {
            message: format!("excluded area '{}': {}", rule.area_id, message),
        };

        if rule.area_id.trim().is_empty() {
            return Err(AppError::Configuration {
                message: "excluded area with empty area_id".to_string(),
            });
        }
        if rule.referral_message.trim().is_empty() {
            return Err(invalid("referral_message is empty".to_string()));
        }

        let patterns = rule
            .query_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(&lowercase_literals(p))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| invalid(format!("invalid query pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            keywords: normalized(&rule.keywords),
            aliases: normalized(&rule.aliases),
            patterns,
            rule,
        })
    }

    pub fn rule(&self) -> &ExclusionRule {
        &self.rule
    }

    pub fn area_id(&self) -> &str {
        &self.rule.area_id
    }

    /// Lowercased keywords
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Lowercased aliases
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Query patterns, compiled from their lowercased source
    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }
}

fn normalized(terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Immutable, versioned set of excluded areas
#[derive(Debug, Clone)]
pub struct RuleSet {
    version: u64,
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Validate and compile `rules`; order is preserved for tie-breaking
    pub fn new(version: u64, rules: Vec<ExclusionRule>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());

        for rule in rules {
            if !seen.insert(rule.area_id.clone()) {
                return Err(AppError::Configuration {
                    message: format!("duplicate excluded area '{}'", rule.area_id),
                });
            }
            compiled.push(CompiledRule::compile(rule)?);
        }

        Ok(Self {
            version,
            rules: compiled,
        })
    }

    pub fn empty() -> Self {
        Self {
            version: 0,
            rules: Vec::new(),
        }
    }

    /// Parse rules from file contents in the given format
    pub fn parse(version: u64, contents: &str, format: FileFormat) -> Result<Self> {
        let file: RulesFile = Config::builder()
            .add_source(File::from_str(contents, format))
            .build()?
            .try_deserialize()?;
        Self::new(version, file.excluded_areas)
    }

    /// Load rules from disk; the extension may be omitted
    pub fn load(version: u64, path: &str) -> Result<Self> {
        let file: RulesFile = Config::builder()
            .add_source(File::with_name(path))
            .build()?
            .try_deserialize()?;
        Self::new(version, file.excluded_areas)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn get(&self, area_id: &str) -> Option<&ExclusionRule> {
        self.rules
            .iter()
            .find(|r| r.area_id() == area_id)
            .map(CompiledRule::rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Publishes the current rule set and replaces it on reload
pub struct RuleRegistry {
    tx: watch::Sender<Arc<RuleSet>>,
    path: Option<String>,
}

impl RuleRegistry {
    pub fn new(initial: RuleSet) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx, path: None }
    }

    /// Load the initial set from `path`; startup fails if it is invalid
    pub fn from_path(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let initial = RuleSet::load(1, &path)?;
        info!(
            path = %path,
            areas = initial.len(),
            "Loaded excluded areas"
        );
        metrics::record_rule_reload(true, initial.version());

        let (tx, _rx) = watch::channel(Arc::new(initial));
        Ok(Self { tx, path: Some(path) })
    }

    /// The rule set to use for one query
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<RuleSet>> {
        self.tx.subscribe()
    }

    pub fn version(&self) -> u64 {
        self.tx.borrow().version()
    }

    /// Validate `rules` and publish them as the next version
    pub fn replace(&self, rules: Vec<ExclusionRule>) -> Result<u64> {
        let next = RuleSet::new(0, rules)?;
        Ok(self.publish(next))
    }

    /// Re-read the rules file. On failure the current set stays active.
    pub fn reload(&self) -> Result<u64> {
        let Some(path) = self.path.as_deref() else {
            return Ok(self.version());
        };

        match RuleSet::load(0, path) {
            Ok(next) => {
                let version = self.publish(next);
                metrics::record_rule_reload(true, version);
                Ok(version)
            }
            Err(e) => {
                error!(
                    path = %path,
                    active_version = self.version(),
                    error = %e,
                    "Exclusion rule reload failed, keeping previous rule set"
                );
                metrics::record_rule_reload(false, self.version());
                Err(e)
            }
        }
    }

    /// Number `next` after the active set and swap it in. The version is
    /// assigned under the channel lock so concurrent publishers never share one.
    fn publish(&self, mut next: RuleSet) -> u64 {
        let areas = next.len();
        let mut version = 0;
        self.tx.send_modify(|current| {
            version = current.version() + 1;
            next.version = version;
            *current = Arc::new(next);
        });
        info!(version, areas, "Exclusion rule set published");
        version
    }

    /// Reload on a fixed interval until the runtime shuts down
    pub fn spawn_reload_task(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            // First tick completes immediately; the initial set is already loaded
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if self.reload().is_err() {
                    warn!("Serving stale exclusion rules until the next reload");
                }
            }
        })
    }
}
