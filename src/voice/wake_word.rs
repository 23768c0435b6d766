//! Wake phrase matching
//!
//! Matching is substring containment after case folding and whitespace
//! removal, so "你 好 机 器 人" from a local recognizer still matches. Entries
//! are tried in registration order and the first hit wins.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Command selected by a wake phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandTag {
    /// Free-form question for the reasoning collaborator
    Chat,
    /// Describe what the camera sees
    TakePhoto,
    /// Motion command
    Move,
}

impl CommandTag {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::TakePhoto => "take_photo",
            Self::Move => "move",
        }
    }
}

impl std::fmt::Display for CommandTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered wake phrase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeWordEntry {
    /// Phrase to listen for
    pub phrase: String,

    /// Command it selects
    pub tag: CommandTag,

    /// Spoken when the phrase is detected
    #[serde(default)]
    pub acknowledgement: Option<String>,

    /// Whether a spoken command is recorded after the acknowledgement
    #[serde(default = "default_capture_command")]
    pub capture_command: bool,
}

const fn default_capture_command() -> bool {
    true
}

impl WakeWordEntry {
    /// Entry that records a command and has no acknowledgement
    #[must_use]
    pub fn new(phrase: impl Into<String>, tag: CommandTag) -> Self {
        Self {
            phrase: phrase.into(),
            tag,
            acknowledgement: None,
            capture_command: true,
        }
    }

    /// Set the acknowledgement prompt
    #[must_use]
    pub fn with_acknowledgement(mut self, text: impl Into<String>) -> Self {
        self.acknowledgement = Some(text.into());
        self
    }

    /// Skip command recording for this phrase
    #[must_use]
    pub const fn without_command(mut self) -> Self {
        self.capture_command = false;
        self
    }
}

/// Default registry used by the robot
#[must_use]
pub fn default_wake_words() -> Vec<WakeWordEntry> {
    vec![
        WakeWordEntry::new("你好机器人", CommandTag::Chat).with_acknowledgement("你好，请提问："),
        WakeWordEntry::new("机器人这是什么", CommandTag::TakePhoto)
            .with_acknowledgement("正在拍摄环境照片")
            .without_command(),
        WakeWordEntry::new("机器人出发", CommandTag::Move).with_acknowledgement("好的，如何移动？"),
    ]
}

/// Ordered wake phrase registry
#[derive(Debug, Clone)]
pub struct WakeWordMatcher {
    entries: Vec<WakeWordEntry>,
    folded: Vec<String>,
}

impl WakeWordMatcher {
    /// Create a matcher over `entries` in registration order
    ///
    /// # Errors
    ///
    /// Returns error if the list is empty or a phrase folds to nothing
    pub fn new(entries: Vec<WakeWordEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::Config("at least one wake word is required".to_string()));
        }

        let folded: Vec<String> = entries.iter().map(|e| fold(&e.phrase)).collect();
        if let Some(pos) = folded.iter().position(String::is_empty) {
            return Err(Error::Config(format!(
                "wake word #{} is blank",
                pos + 1
            )));
        }

        tracing::debug!(wake_words = ?folded, "wake word matcher initialized");

        Ok(Self { entries, folded })
    }

    /// First registered entry whose phrase occurs in `text`
    #[must_use]
    pub fn find(&self, text: &str) -> Option<&WakeWordEntry> {
        let haystack = fold(text);
        if haystack.is_empty() {
            return None;
        }
        self.folded
            .iter()
            .position(|phrase| haystack.contains(phrase.as_str()))
            .map(|i| &self.entries[i])
    }

    /// Tag of the first matching entry
    #[must_use]
    pub fn match_tag(&self, text: &str) -> Option<CommandTag> {
        self.find(text).map(|e| e.tag)
    }

    /// Registered entries in order
    #[must_use]
    pub fn entries(&self) -> &[WakeWordEntry] {
        &self.entries
    }
}

/// Case-fold and strip whitespace
fn fold(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold() {
        assert_eq!(fold("  Hey ORIN "), "heyorin");
        assert_eq!(fold("你 好 机 器 人"), "你好机器人");
    }

    #[test]
    fn test_rejects_empty_registry() {
        assert!(WakeWordMatcher::new(Vec::new()).is_err());
        assert!(WakeWordMatcher::new(vec![WakeWordEntry::new("  ", CommandTag::Chat)]).is_err());
    }

    #[test]
    fn test_no_match_on_empty_text() {
        let matcher = WakeWordMatcher::new(default_wake_words()).unwrap();
        assert_eq!(matcher.match_tag(""), None);
        assert_eq!(matcher.match_tag("   "), None);
    }

    #[test]
    fn test_default_registry() {
        let matcher = WakeWordMatcher::new(default_wake_words()).unwrap();
        assert_eq!(matcher.match_tag("你好机器人。"), Some(CommandTag::Chat));
        assert_eq!(matcher.match_tag("机器人这是什么？"), Some(CommandTag::TakePhoto));
        assert_eq!(matcher.match_tag("机器人出发"), Some(CommandTag::Move));
        assert_eq!(matcher.match_tag("今天天气不错"), None);

        let photo = matcher.find("机器人这是什么").unwrap();
        assert!(!photo.capture_command);
    }

    #[test]
    fn test_entry_deserializes_with_defaults() {
        let entry: WakeWordEntry = toml::from_str(
            r#"
            phrase = "hey robot"
            tag = "take_photo"
            "#,
        )
        .unwrap();
        assert_eq!(entry.tag, CommandTag::TakePhoto);
        assert!(entry.capture_command);
        assert!(entry.acknowledgement.is_none());
    }
}
