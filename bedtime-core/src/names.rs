//! Character name registry.
//!
//! The registry is the only state shared between pipeline runs. Every
//! reservation does its read-check-insert under one lock, so two runs can
//! never claim the same name. Comparison ignores case and surrounding
//! whitespace.

use crate::budget::MeteredService;
use crate::service::{Prompt, PromptRole};
use crate::stages::{Categorization, Category};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

const NAMES_PROMPT: &str = include_str!("stages/prompts/names.txt");

const NAMES_TEMPERATURE: f32 = 0.7;
const RETRY_TEMPERATURE: f32 = 0.95;

/// Most recent names listed as "already used" in the prompt.
const USED_NAMES_IN_PROMPT: usize = 100;

/// Longest candidate accepted, in words.
const MAX_NAME_WORDS: usize = 3;

/// Placeholder names handed out when the service cannot supply enough.
pub const STATIC_POOL: [&str; 24] = [
    "Amara", "Kenji", "Leilani", "Mateo", "Priya", "Tariq", "Ingrid", "Kofi",
    "Sakura", "Diego", "Nadia", "Oren", "Zuri", "Rafael", "Mei", "Anika",
    "Tomas", "Aiyana", "Emeka", "Freya", "Hamid", "Ximena", "Bodhi", "Yuki",
];

/// Names tried first for each category before the shared pool.
fn category_names(category: Category) -> [&'static str; 3] {
    match category {
        Category::Animal => ["Zara", "Koda", "Nina"],
        Category::Adventure => ["Aria", "Finn", "Maya"],
        Category::Friendship => ["Leo", "Sage", "Ivy"],
        Category::Fantasy => ["Orion", "Luna", "Kai"],
        Category::Bedtime => ["Nova", "River", "Skye"],
        Category::Learning => ["Phoenix", "Willow", "Sage"],
        Category::Family => ["Ember", "Forest", "Rain"],
        Category::Magic => ["Stella", "Cosmo", "Aurora"],
    }
}

/// Where the names in a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameSource {
    /// Every name came from the generation service.
    Generated,
    /// Generated names topped up from the static pool.
    Supplemented,
    /// Every name came from the static pool.
    Pool,
}

/// Names reserved for one story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameBatch {
    pub names: Vec<String>,
    pub source: NameSource,
    /// Generation calls spent on this batch.
    pub attempts: u32,
}

impl NameBatch {
    /// The service was asked but the batch still needed the pool.
    pub fn fell_back(&self) -> bool {
        self.attempts > 0 && self.source != NameSource::Generated
    }

    pub fn first(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Pull candidate names out of a free-form reply.
///
/// Accepts one name per line or comma-separated lists, strips list markers
/// and trailing punctuation, and drops anything longer than three words.
pub fn parse_candidates(reply: &str) -> Vec<String> {
    reply
        .lines()
        .filter(|line| !line.trim_end().ends_with(':'))
        .flat_map(|line| line.split(','))
        .filter_map(|raw| {
            let name = raw
                .trim()
                .trim_start_matches(|c: char| {
                    c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*' | '•' | '#')
                })
                .trim()
                .trim_matches(|c: char| matches!(c, '"' | '\'' | '*' | '`'))
                .trim_end_matches(|c: char| c.is_ascii_punctuation())
                .trim();

            let words = name.split_whitespace().count();
            (words > 0 && words <= MAX_NAME_WORDS).then(|| name.to_string())
        })
        .collect()
}

/// Process-wide set of names already used in a story.
pub struct NameRegistry {
    names: Mutex<LruCache<String, String>>,
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NameRegistry {
    /// An unbounded registry: names are never forgotten.
    pub fn new() -> Self {
        Self {
            names: Mutex::new(LruCache::unbounded()),
        }
    }

    /// A registry that forgets the least recently reserved names beyond
    /// `capacity`. Evicted names may be issued again.
    pub fn with_capacity(capacity: usize) -> Self {
        match NonZeroUsize::new(capacity) {
            Some(capacity) => Self {
                names: Mutex::new(LruCache::new(capacity)),
            },
            None => Self::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, String>> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(&key(name))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Every registered name, oldest reservation first.
    pub fn names(&self) -> Vec<String> {
        self.lock().iter().rev().map(|(_, name)| name.clone()).collect()
    }

    fn recent(&self, limit: usize) -> Vec<String> {
        self.lock().iter().take(limit).map(|(_, name)| name.clone()).collect()
    }

    /// Forget every name.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Register names without a service call (used when loading a saved
    /// registry). Returns how many were new.
    pub fn insert_all<I, S>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut guard = self.lock();
        let mut added = 0;
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if guard.put(key(name), name.to_string()).is_none() {
                added += 1;
            }
        }
        added
    }

    /// Atomically claim up to `needed` candidates not yet registered.
    fn claim<I>(&self, candidates: I, needed: usize) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut guard = self.lock();
        let mut claimed = Vec::new();
        for candidate in candidates {
            if claimed.len() >= needed {
                break;
            }
            let k = key(&candidate);
            if guard.contains(&k) {
                continue;
            }
            guard.put(k, candidate.clone());
            claimed.push(candidate);
        }
        claimed
    }

    /// Claim `needed` names from the category's set and then the static
    /// pool, suffixing pool names with a round number once both are used up.
    fn claim_from_pool(&self, category: Category, needed: usize) -> Vec<String> {
        let mut guard = self.lock();
        let mut claimed = Vec::new();
        let mut round = 1usize;
        while claimed.len() < needed {
            let candidates: Vec<String> = if round == 1 {
                category_names(category)
                    .into_iter()
                    .chain(STATIC_POOL)
                    .map(str::to_string)
                    .collect()
            } else {
                STATIC_POOL
                    .iter()
                    .map(|base| format!("{base} {round}"))
                    .collect()
            };
            for candidate in candidates {
                if claimed.len() >= needed {
                    break;
                }
                let k = key(&candidate);
                if guard.contains(&k) {
                    continue;
                }
                guard.put(k, candidate.clone());
                claimed.push(candidate);
            }
            round += 1;
        }
        claimed
    }

    /// Reserve `count` names from the static pool without any service call.
    pub fn reserve_from_pool(&self, category: Category, count: usize) -> NameBatch {
        NameBatch {
            names: self.claim_from_pool(category, count),
            source: NameSource::Pool,
            attempts: 0,
        }
    }

    /// Reserve `count` names for a story.
    ///
    /// Asks the service once, retries once at a higher temperature when the
    /// reply is short on usable names, then tops up from the static pool.
    /// A call is only made when the budget still covers `reserved` calls
    /// afterwards. Never fails.
    pub async fn reserve(
        &self,
        categorization: &Categorization,
        count: usize,
        service: &MeteredService,
        reserved: usize,
    ) -> NameBatch {
        let mut names = Vec::new();
        let mut attempts = 0u32;

        for temperature in [NAMES_TEMPERATURE, RETRY_TEMPERATURE] {
            if names.len() >= count || !service.budget().can_afford(1, reserved) {
                break;
            }
            attempts += 1;

            let prompt = self.names_prompt(categorization, count - names.len(), temperature);
            match service.complete(&prompt).await {
                Ok(reply) => {
                    let candidates = parse_candidates(&reply);
                    let claimed = self.claim(candidates, count - names.len());
                    debug!(claimed = claimed.len(), temperature, "names reply");
                    names.extend(claimed);
                }
                Err(e) => {
                    warn!(error = %e, "name generation failed, using static pool");
                    break;
                }
            }
        }

        let generated = names.len();
        if generated < count {
            names.extend(self.claim_from_pool(categorization.category, count - generated));
        }

        let source = match generated {
            0 => NameSource::Pool,
            n if n < count => NameSource::Supplemented,
            _ => NameSource::Generated,
        };

        NameBatch {
            names,
            source,
            attempts,
        }
    }

    fn names_prompt(&self, categorization: &Categorization, count: usize, temperature: f32) -> Prompt {
        let used = self.recent(USED_NAMES_IN_PROMPT);
        let used = if used.is_empty() {
            "none".to_string()
        } else {
            used.join(", ")
        };

        Prompt::new(
            PromptRole::Names,
            format!(
                "Generate {count} unique character names for a {tone} {category} story \
                 with themes: {themes}.\n\nAlready used (do NOT use these): {used}",
                tone = categorization.tone,
                category = categorization.category,
                themes = categorization.themes_text(),
            ),
        )
        .with_system(NAMES_PROMPT)
        .with_temperature(temperature)
        .with_max_tokens(100)
    }
}
