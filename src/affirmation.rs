//! Affirmations for captured memories

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::types::Mood;

/// Input for one affirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffirmationRequest {
    pub mood: Mood,
    /// Stable text used to pick among variants (usually the memory title)
    pub seed: String,
    /// Optional first name to address the user
    pub name: Option<String>,
}

impl AffirmationRequest {
    pub fn new(mood: Mood, seed: impl Into<String>) -> Self {
        Self {
            mood,
            seed: seed.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffirmationSource {
    Rules,
    Generated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Affirmation {
    pub text: String,
    pub mood: Mood,
    pub source: AffirmationSource,
}

#[async_trait]
pub trait AffirmationGenerator: Send + Sync {
    async fn generate(&self, request: &AffirmationRequest) -> Result<Affirmation>;

    fn name(&self) -> &str;
}

fn variants(mood: Mood) -> &'static [&'static str] {
    match mood {
        Mood::Happy => &[
            "Your joy is worth holding on to. Let this moment remind you how much light you carry.",
            "Happiness looks good on you. You deserve every bit of it.",
            "Celebrate this. Moments like these are yours to keep.",
        ],
        Mood::Calm => &[
            "This stillness is a strength. You can return to it whenever you need.",
            "Peace lives inside you, and you found your way to it today.",
            "Breathe it in. Calm is something you created.",
        ],
        Mood::Grateful => &[
            "Gratitude turns what you have into enough. Thank you for noticing.",
            "The good you see around you reflects the good within you.",
            "Noticing the gifts in your life is a gift in itself.",
        ],
        Mood::Excited => &[
            "Your enthusiasm is contagious. Let it carry you forward.",
            "Something wonderful is unfolding, and you are ready for it.",
            "Follow that spark. It knows where you are meant to go.",
        ],
        Mood::Reflective => &[
            "Looking inward takes courage. You are learning more about yourself every day.",
            "Your thoughts deserve this quiet attention.",
            "Every reflection is a step toward understanding who you are becoming.",
        ],
        Mood::Sad => &[
            "It is okay to feel this. Your feelings are valid and they will pass.",
            "Be gentle with yourself today. You are doing the best you can.",
            "Even on heavy days, you are not alone and you are still worthy of love.",
        ],
        Mood::Anxious => &[
            "You have made it through every hard moment so far. You can get through this one.",
            "Take one slow breath. Right now, in this moment, you are safe.",
            "You do not have to solve everything today. One small step is enough.",
        ],
        Mood::Angry => &[
            "Your anger is telling you something matters. You can listen without being ruled by it.",
            "It is okay to feel strongly. You get to choose what you do next.",
            "Give yourself space. Clarity will come once the storm settles.",
        ],
        Mood::Tired => &[
            "Rest is not a reward, it is a need. You are allowed to slow down.",
            "You have given a lot today. It is okay to recharge.",
            "Tomorrow is a fresh start. For now, be kind to your tired self.",
        ],
        Mood::Neutral => &[
            "Ordinary days matter too. Thank you for capturing this one.",
            "Every moment you notice becomes part of your story.",
            "You showed up for yourself today, and that counts.",
        ],
    }
}

/// FNV-1a, stable across platforms and releases
fn stable_hash(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Picks a mood-specific affirmation deterministically from the seed
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedAffirmationGenerator;

impl RuleBasedAffirmationGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn pick(&self, request: &AffirmationRequest) -> Affirmation {
        let options = variants(request.mood);
        let index = (stable_hash(request.seed.trim()) % options.len() as u64) as usize;
        let body = options[index];

        let text = match request.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => format!("{}, {}", name, lowercase_first(body)),
            _ => body.to_string(),
        };

        Affirmation {
            text,
            mood: request.mood,
            source: AffirmationSource::Rules,
        }
    }
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl AffirmationGenerator for RuleBasedAffirmationGenerator {
    async fn generate(&self, request: &AffirmationRequest) -> Result<Affirmation> {
        Ok(self.pick(request))
    }

    fn name(&self) -> &str {
        "rules"
    }
}

/// Tries the primary generator and falls back to rules on any error
pub struct FallbackAffirmationGenerator {
    primary: Arc<dyn AffirmationGenerator>,
    fallback: RuleBasedAffirmationGenerator,
}

impl FallbackAffirmationGenerator {
    pub fn new(primary: Arc<dyn AffirmationGenerator>) -> Self {
        Self {
            primary,
            fallback: RuleBasedAffirmationGenerator,
        }
    }
}

#[async_trait]
impl AffirmationGenerator for FallbackAffirmationGenerator {
    async fn generate(&self, request: &AffirmationRequest) -> Result<Affirmation> {
        match self.primary.generate(request).await {
            Ok(affirmation) if !affirmation.text.trim().is_empty() => Ok(affirmation),
            Ok(_) => {
                tracing::warn!(
                    "Generator {} returned an empty affirmation, using rules",
                    self.primary.name()
                );
                Ok(self.fallback.pick(request))
            }
            Err(e) => {
                tracing::warn!(
                    "Generator {} failed, using rules: {}",
                    self.primary.name(),
                    e
                );
                Ok(self.fallback.pick(request))
            }
        }
    }

    fn name(&self) -> &str {
        "fallback"
    }
}
