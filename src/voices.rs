// src/voices.rs
//! Narration voice catalog. Static and read-only.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceCategory {
    Male,
    Female,
}

impl VoiceCategory {
    pub fn label(&self) -> &'static str {
        match self {
            VoiceCategory::Male => "male",
            VoiceCategory::Female => "female",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoiceOption {
    pub id: &'static str,
    pub name: &'static str,
    pub category: VoiceCategory,
}

const fn voice(id: &'static str, name: &'static str, category: VoiceCategory) -> VoiceOption {
    VoiceOption { id, name, category }
}

pub const MALE_VOICES: [VoiceOption; 6] = [
    voice("male_1", "David", VoiceCategory::Male),
    voice("male_2", "James", VoiceCategory::Male),
    voice("male_3", "Mark", VoiceCategory::Male),
    voice("male_4", "Paul", VoiceCategory::Male),
    voice("male_5", "John", VoiceCategory::Male),
    voice("male_6", "Chris", VoiceCategory::Male),
];

pub const FEMALE_VOICES: [VoiceOption; 6] = [
    voice("female_1", "Sarah", VoiceCategory::Female),
    voice("female_2", "Emily", VoiceCategory::Female),
    voice("female_3", "Jessica", VoiceCategory::Female),
    voice("female_4", "Linda", VoiceCategory::Female),
    voice("female_5", "Maria", VoiceCategory::Female),
    voice("female_6", "Anna", VoiceCategory::Female),
];

/// Voice preselected when the caller does not pick one.
pub const DEFAULT_VOICE_ID: &str = "male_1";

/// All voices, male first, in catalog order.
pub fn all_voices() -> impl Iterator<Item = &'static VoiceOption> {
    MALE_VOICES.iter().chain(FEMALE_VOICES.iter())
}

pub fn find_voice(id: &str) -> Option<&'static VoiceOption> {
    all_voices().find(|v| v.id == id)
}

pub fn voices_in(category: VoiceCategory) -> impl Iterator<Item = &'static VoiceOption> {
    all_voices().filter(move |v| v.category == category)
}
