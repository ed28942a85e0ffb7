//! Engine capabilities
//!
//! Every option the engine recognizes lives here as a typed field. Values can
//! be deserialized from a config document or read from `CONVO_*` environment
//! variables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Textual predicate used to compare bot responses with expectations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchingMode {
    Exact,
    Include,
    IncludeIgnoreCase,
    Regexp,
    RegexpIgnoreCase,
    Wildcard,
    #[default]
    WildcardIgnoreCase,
}

impl MatchingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Include => "include",
            Self::IncludeIgnoreCase => "includeIgnoreCase",
            Self::Regexp => "regexp",
            Self::RegexpIgnoreCase => "regexpIgnoreCase",
            Self::Wildcard => "wildcard",
            Self::WildcardIgnoreCase => "wildcardIgnoreCase",
        }
    }
}

impl fmt::Display for MatchingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" | "equals" => Ok(Self::Exact),
            "include" => Ok(Self::Include),
            "includeIgnoreCase" | "includeLowerCase" => Ok(Self::IncludeIgnoreCase),
            "regexp" => Ok(Self::Regexp),
            "regexpIgnoreCase" => Ok(Self::RegexpIgnoreCase),
            "wildcard" => Ok(Self::Wildcard),
            "wildcardIgnoreCase" | "wildcardLowerCase" => Ok(Self::WildcardIgnoreCase),
            other => Err(format!("unknown matching mode: {other}")),
        }
    }
}

/// Granularity of a captured variable span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMatchingMode {
    /// A run of non-whitespace characters
    #[default]
    NonWhitespace,
    /// A single word
    Word,
    /// Anything, across lines
    Joker,
}

impl MemoryMatchingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonWhitespace => "non_whitespace",
            Self::Word => "word",
            Self::Joker => "joker",
        }
    }
}

impl FromStr for MemoryMatchingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "non_whitespace" => Ok(Self::NonWhitespace),
            "word" => Ok(Self::Word),
            "joker" => Ok(Self::Joker),
            other => Err(format!("unknown memory matching mode: {other}")),
        }
    }
}

/// How utterance references in `me` steps are expanded into conversations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtteranceExpansionMode {
    #[default]
    All,
    First,
    Random,
}

impl FromStr for UtteranceExpansionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "first" => Ok(Self::First),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown utterance expansion mode: {other}")),
        }
    }
}

/// Utterance expansion settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UtteranceExpansion {
    pub mode: UtteranceExpansionMode,
    /// Upper bound of variants picked per group in `random` mode
    pub random_count: usize,
    /// Pair same-ordinal variants across groups instead of the cross product
    pub associate_indexes: bool,
}

impl Default for UtteranceExpansion {
    fn default() -> Self {
        Self {
            mode: UtteranceExpansionMode::All,
            random_count: 1,
            associate_indexes: false,
        }
    }
}

/// Configuration consumed by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub matching_mode: MatchingMode,
    pub memory_matching_mode: MemoryMatchingMode,
    /// Strip HTML tags and collapse whitespace before comparing text
    pub normalize_text: bool,
    /// Capture variables from bot responses
    pub enable_memory: bool,
    pub collect_all_assertion_errors: bool,
    /// Milliseconds per character to wait before sending a user message
    pub simulate_writing_speed: Option<u64>,
    /// Gate for environment access, inline code and external modules
    pub allow_unsafe: bool,
    #[serde(with = "duration_millis")]
    pub wait_for_bot_timeout: Option<Duration>,
    pub utterance_expansion: UtteranceExpansion,
    /// Free-form values readable through `$cap(NAME)`
    pub custom: BTreeMap<String, String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            matching_mode: MatchingMode::default(),
            memory_matching_mode: MemoryMatchingMode::default(),
            normalize_text: true,
            enable_memory: true,
            collect_all_assertion_errors: false,
            simulate_writing_speed: None,
            allow_unsafe: false,
            wait_for_bot_timeout: Some(Duration::from_secs(10)),
            utterance_expansion: UtteranceExpansion::default(),
            custom: BTreeMap::new(),
        }
    }
}

impl Capabilities {
    /// Build capabilities from `CONVO_*` environment variables.
    ///
    /// Absent or unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            matching_mode: env_parse("CONVO_MATCHING_MODE").unwrap_or(defaults.matching_mode),
            memory_matching_mode: env_parse("CONVO_MEMORY_MATCHING_MODE")
                .unwrap_or(defaults.memory_matching_mode),
            normalize_text: env_flag("CONVO_NORMALIZE_TEXT").unwrap_or(defaults.normalize_text),
            enable_memory: env_flag("CONVO_ENABLE_MEMORY").unwrap_or(defaults.enable_memory),
            collect_all_assertion_errors: env_flag("CONVO_COLLECT_ALL_ASSERTION_ERRORS")
                .unwrap_or(defaults.collect_all_assertion_errors),
            simulate_writing_speed: env_parse::<u64>("CONVO_WRITING_SPEED_MS")
                .filter(|ms| *ms > 0),
            allow_unsafe: env_flag("CONVO_ALLOW_UNSAFE").unwrap_or(defaults.allow_unsafe),
            wait_for_bot_timeout: env_parse::<u64>("CONVO_WAIT_FOR_BOT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .or(defaults.wait_for_bot_timeout),
            utterance_expansion: UtteranceExpansion {
                mode: env_parse("CONVO_UTTERANCE_EXPANSION_MODE")
                    .unwrap_or(defaults.utterance_expansion.mode),
                random_count: env_parse("CONVO_UTTERANCE_RANDOM_COUNT")
                    .unwrap_or(defaults.utterance_expansion.random_count),
                associate_indexes: defaults.utterance_expansion.associate_indexes,
            },
            custom: defaults.custom,
        }
    }

    /// Resolve a capability by its option name, for `$cap(NAME)`.
    ///
    /// Custom entries shadow recognized option names.
    pub fn lookup(&self, name: &str) -> Option<String> {
        if let Some(value) = self.custom.get(name) {
            return Some(value.clone());
        }
        let value = match name {
            "SCRIPTING_MATCHING_MODE" => self.matching_mode.as_str().to_string(),
            "SCRIPTING_MEMORY_MATCHING_MODE" => self.memory_matching_mode.as_str().to_string(),
            "SCRIPTING_NORMALIZE_TEXT" => self.normalize_text.to_string(),
            "SCRIPTING_ENABLE_MEMORY" => self.enable_memory.to_string(),
            "SCRIPTING_ENABLE_MULTIPLE_ASSERT_ERRORS" => {
                self.collect_all_assertion_errors.to_string()
            }
            "SIMULATE_WRITING_SPEED" => self.simulate_writing_speed?.to_string(),
            "SECURITY_ALLOW_UNSAFE" => self.allow_unsafe.to_string(),
            "WAITFORBOTTIMEOUT" => self.wait_for_bot_timeout?.as_millis().to_string(),
            _ => return None,
        };
        Some(value)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            #[allow(clippy::cast_possible_truncation)]
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
