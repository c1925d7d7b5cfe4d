//! Learning-path templates.
//!
//! A template is an immutable, ordered plan of exercise steps. Templates are
//! assembled once at startup and shared read-only by every run that
//! references them; runs only persist the template id.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where the source text of a read-and-respond step comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    News,
    Book,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::News => "news",
            SourceKind::Book => "book",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned exercise unit: a kind tag plus its kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Read or listen to a passage, then retell and answer questions about it.
    ReadRespond { source: SourceKind },
    /// Drill the vocabulary selected in the previous step, one term at a time.
    VocabDrill,
    /// Spaced review over a sample of the vocabulary collected during the run.
    Review { sample_size: usize },
}

impl StepKind {
    /// Short tag used in persisted session rows and report output.
    pub fn tag(&self) -> &'static str {
        match self {
            StepKind::ReadRespond { .. } => "read_respond",
            StepKind::VocabDrill => "vocab_drill",
            StepKind::Review { .. } => "review",
        }
    }
}

/// An immutable plan of exercise steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub level: String,
    pub steps: Vec<StepKind>,
}

impl Template {
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// The step at `index`, or `None` past the end of the plan.
    pub fn step(&self, index: usize) -> Option<&StepKind> {
        self.steps.get(index)
    }
}

/// Holds the configured templates. Built once at startup, never mutated.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    templates: HashMap<String, Template>,
}

impl TemplateStore {
    /// An empty store; templates are added with [`TemplateStore::register`].
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// The built-in plans the original practice routine shipped with.
    pub fn with_defaults() -> Self {
        let mut store = Self::new();
        store.register(Template {
            id: "daily-news".into(),
            name: "Daily news cycle".into(),
            level: "medium".into(),
            steps: vec![
                StepKind::ReadRespond {
                    source: SourceKind::News,
                },
                StepKind::VocabDrill,
                StepKind::Review { sample_size: 2 },
            ],
        });
        store.register(Template {
            id: "book-chapter".into(),
            name: "Book chapter with double review".into(),
            level: "hard".into(),
            steps: vec![
                StepKind::ReadRespond {
                    source: SourceKind::Book,
                },
                StepKind::VocabDrill,
                StepKind::ReadRespond {
                    source: SourceKind::Book,
                },
                StepKind::Review { sample_size: 4 },
            ],
        });
        store
    }

    /// Registers a template, replacing any previous one with the same id.
    /// Only meaningful during startup configuration.
    pub fn register(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    /// All templates, sorted by id for stable listing.
    pub fn list(&self) -> Vec<&Template> {
        let mut all: Vec<&Template> = self.templates.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_registered_and_ordered() {
        let store = TemplateStore::with_defaults();
        let listed = store.list();
        assert!(listed.len() >= 2);
        let ids: Vec<&str> = listed.iter().map(|t| t.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn daily_news_plan_shape() {
        let store = TemplateStore::with_defaults();
        let t = store.get("daily-news").expect("built-in template");
        assert_eq!(t.step_count(), 3);
        assert!(matches!(
            t.step(0),
            Some(StepKind::ReadRespond {
                source: SourceKind::News
            })
        ));
        assert!(matches!(t.step(1), Some(StepKind::VocabDrill)));
        assert!(matches!(t.step(2), Some(StepKind::Review { sample_size: 2 })));
        assert!(t.step(3).is_none());
    }

    #[test]
    fn unknown_template_is_none() {
        let store = TemplateStore::with_defaults();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn step_kind_tags_are_stable() {
        assert_eq!(
            StepKind::ReadRespond {
                source: SourceKind::News
            }
            .tag(),
            "read_respond"
        );
        assert_eq!(StepKind::VocabDrill.tag(), "vocab_drill");
        assert_eq!(StepKind::Review { sample_size: 1 }.tag(), "review");
    }

    #[test]
    fn step_kind_serializes_with_kind_tag() {
        let json = serde_json::to_string(&StepKind::ReadRespond {
            source: SourceKind::Book,
        })
        .unwrap();
        assert!(json.contains("\"kind\":\"read_respond\""), "{json}");
        assert!(json.contains("\"book\""), "{json}");
    }
}
