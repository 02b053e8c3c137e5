//! Optional model-metadata enrichment.
//!
//! External catalogs sit behind one interface; the bundled source is a
//! static table of well-known model families carrying release dates,
//! per-token pricing and capability hints. Observed data always wins over
//! enrichment.

use chrono::NaiveDate;

use crate::adapter::DeclaredCaps;

/// Metadata contributed by an enrichment source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelMetadata {
    pub display_name: Option<String>,
    pub release_date: Option<NaiveDate>,
    /// USD per million input tokens.
    pub input_per_mtok: Option<f64>,
    /// USD per million output tokens.
    pub output_per_mtok: Option<f64>,
    pub caps: DeclaredCaps,
}

/// One enrichment source. Lookup is by vendor model id.
pub trait ModelEnrichment: Send + Sync {
    fn lookup(&self, vendor_id: &str) -> Option<ModelMetadata>;
}

/// No enrichment at all.
pub struct NoEnrichment;

impl ModelEnrichment for NoEnrichment {
    fn lookup(&self, _vendor_id: &str) -> Option<ModelMetadata> {
        None
    }
}

/// Bundled static table keyed by id substring, longest match first.
pub struct StaticEnrichment {
    entries: Vec<(&'static str, ModelMetadata)>,
}

fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

fn chat_caps() -> DeclaredCaps {
    DeclaredCaps {
        streaming: Some(true),
        tools: Some(true),
        vision: Some(true),
        embeddings: Some(false),
        ..Default::default()
    }
}

impl StaticEnrichment {
    pub fn builtin() -> Self {
        let entry = |needle: &'static str,
                     name: &str,
                     released: Option<NaiveDate>,
                     input: f64,
                     output: f64,
                     caps: DeclaredCaps| {
            (
                needle,
                ModelMetadata {
                    display_name: Some(name.to_string()),
                    release_date: released,
                    input_per_mtok: Some(input),
                    output_per_mtok: Some(output),
                    caps,
                },
            )
        };

        let reasoning = DeclaredCaps {
            reasoning: Some(true),
            ..chat_caps()
        };
        let embedding = DeclaredCaps {
            streaming: Some(false),
            tools: Some(false),
            vision: Some(false),
            embeddings: Some(true),
            ..Default::default()
        };

        Self {
            entries: vec![
                entry("gpt-4o-mini", "GPT-4o Mini", date(2024, 7, 18), 0.15, 0.60, chat_caps()),
                entry("gpt-4o", "GPT-4o", date(2024, 5, 13), 2.5, 10.0, chat_caps()),
                entry("o3-mini", "o3-mini", date(2025, 1, 31), 1.1, 4.4, reasoning),
                entry(
                    "claude-3-5-haiku",
                    "Claude 3.5 Haiku",
                    date(2024, 10, 22),
                    0.8,
                    4.0,
                    chat_caps(),
                ),
                entry(
                    "claude-3-5-sonnet",
                    "Claude 3.5 Sonnet",
                    date(2024, 10, 22),
                    3.0,
                    15.0,
                    chat_caps(),
                ),
                entry(
                    "claude-3-opus",
                    "Claude 3 Opus",
                    date(2024, 2, 29),
                    15.0,
                    75.0,
                    chat_caps(),
                ),
                entry(
                    "gemini-2.0-flash",
                    "Gemini 2.0 Flash",
                    date(2025, 2, 5),
                    0.075,
                    0.30,
                    chat_caps(),
                ),
                entry(
                    "gemini-1.5-pro",
                    "Gemini 1.5 Pro",
                    date(2024, 5, 23),
                    1.25,
                    5.0,
                    chat_caps(),
                ),
                entry(
                    "text-embedding-3-small",
                    "Text Embedding 3 Small",
                    date(2024, 1, 25),
                    0.02,
                    0.0,
                    embedding,
                ),
                entry(
                    "text-embedding-3-large",
                    "Text Embedding 3 Large",
                    date(2024, 1, 25),
                    0.13,
                    0.0,
                    embedding,
                ),
            ],
        }
    }
}

impl ModelEnrichment for StaticEnrichment {
    fn lookup(&self, vendor_id: &str) -> Option<ModelMetadata> {
        self.entries
            .iter()
            .filter(|(needle, _)| vendor_id.contains(needle))
            .max_by_key(|(needle, _)| needle.len())
            .map(|(_, metadata)| metadata.clone())
    }
}
