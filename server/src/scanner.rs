//! The interface to the scanning pipeline

use std::error::Error as StdError;
use std::fmt;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::suspect::Suspect;

/// The final decision about a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Deliver it, with whatever changes the scanners queued
    Accept,
    /// Ask the client to try again later
    Defer(String),
    /// Refuse it permanently
    Reject(String),
    /// Accept it but never deliver it
    Discard,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Accept => write!(f, "accept"),
            Verdict::Defer(reason) => write!(f, "defer ({reason})"),
            Verdict::Reject(reason) => write!(f, "reject ({reason})"),
            Verdict::Discard => write!(f, "discard"),
        }
    }
}

/// Something that decides about a message
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Examine `suspect`, possibly changing it, and decide
    async fn scan(&self, suspect: &mut Suspect) -> Verdict;
}

/// What a single plugin thinks about a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No opinion, ask the next plugin
    Dunno,
    /// Accept, skipping the remaining plugins
    Accept,
    /// Defer with a reason
    Defer(String),
    /// Reject with a reason
    Reject(String),
    /// Discard silently
    Discard,
}

/// Errors plugins may return
pub type PluginError = Box<dyn StdError + Send + Sync>;

/// One step of a [`Pipeline`]
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name used in logs and processing error tags
    fn name(&self) -> &str;

    /// Examine the suspect
    async fn examine(&self, suspect: &mut Suspect) -> Result<Outcome, PluginError>;
}

/// Runs plugins in order until one of them decides.
///
/// A failing plugin is tagged as `processing_error.<name>` on the suspect
/// and skipped. If no plugin decides, the message is accepted.
#[derive(Default)]
pub struct Pipeline {
    plugins: Vec<Box<dyn Plugin>>,
}

impl Pipeline {
    /// An empty pipeline, accepting everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin
    #[must_use]
    pub fn with_plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Number of plugins
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugins are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[async_trait]
impl Scanner for Pipeline {
    async fn scan(&self, suspect: &mut Suspect) -> Verdict {
        for plugin in &self.plugins {
            match plugin.examine(suspect).await {
                Ok(Outcome::Dunno) => debug!(id = %suspect.id(), plugin = plugin.name(), "dunno"),
                Ok(Outcome::Accept) => return Verdict::Accept,
                Ok(Outcome::Defer(reason)) => return Verdict::Defer(reason),
                Ok(Outcome::Reject(reason)) => return Verdict::Reject(reason),
                Ok(Outcome::Discard) => return Verdict::Discard,
                Err(err) => {
                    warn!(id = %suspect.id(), plugin = plugin.name(), "plugin failed: {err}");
                    let tag = format!("processing_error.{}", plugin.name());
                    suspect.set_tag(&tag, &err.to_string());
                }
            }
        }
        Verdict::Accept
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suspect::tests::transaction;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    struct Fixed(&'static str, Outcome);

    #[async_trait]
    impl Plugin for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn examine(&self, _suspect: &mut Suspect) -> Result<Outcome, PluginError> {
            Ok(self.1.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl Plugin for Failing {
        fn name(&self) -> &str {
            "clamav"
        }

        async fn examine(&self, _suspect: &mut Suspect) -> Result<Outcome, PluginError> {
            Err("connection refused".into())
        }
    }

    #[rstest]
    #[case(vec![], Verdict::Accept)]
    #[case(vec![Outcome::Dunno, Outcome::Dunno], Verdict::Accept)]
    #[case(vec![Outcome::Dunno, Outcome::Reject("spam".into()), Outcome::Accept], Verdict::Reject("spam".into()))]
    #[case(vec![Outcome::Defer("greylisted".into()), Outcome::Discard], Verdict::Defer("greylisted".into()))]
    #[case(vec![Outcome::Discard], Verdict::Discard)]
    #[tokio::test]
    async fn test_first_decision_wins(#[case] outcomes: Vec<Outcome>, #[case] expected: Verdict) {
        let dir = tempfile::tempdir().expect("Failed creating temp dir");
        let transaction = transaction(dir.path(), "a@example.com", &["b@example.com"]);
        let mut suspect = Suspect::new(transaction);
        let pipeline = outcomes
            .into_iter()
            .fold(Pipeline::new(), |p, o| p.with_plugin(Fixed("fixed", o)));

        assert_eq!(pipeline.scan(&mut suspect).await, expected);
    }

    #[tokio::test]
    async fn test_plugin_failure_is_tagged() {
        let dir = tempfile::tempdir().expect("Failed creating temp dir");
        let transaction = transaction(dir.path(), "a@example.com", &["b@example.com"]);
        let mut suspect = Suspect::new(transaction);
        let pipeline = Pipeline::new()
            .with_plugin(Failing)
            .with_plugin(Fixed("after", Outcome::Reject("virus".into())));

        let verdict = pipeline.scan(&mut suspect).await;

        assert_eq!(verdict, Verdict::Reject("virus".into()));
        assert_eq!(suspect.tag("processing_error.clamav"), Some("connection refused"));
    }
}
