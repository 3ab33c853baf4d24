//! Control records: the per-account metadata this whole crate revolves
//! around.
//!
//! A [`ControlRecord`] is the unit of shared state for one pool account. It
//! is deliberately tiny (a description, an owner token, and a sorted tag
//! list) because the encoded form has to fit inside a size-limited metadata
//! slot in the backing store; see [`codec`] for the wire format and the
//! exact limit.
//!
//! # Key Concepts
//!
//! - **Owner token**: an opaque string naming whoever is currently using
//!   the account. The empty string means the account is free. The control
//!   plane never interprets the token beyond equality checks.
//! - **Tags**: classification labels kept sorted and de-duplicated so that
//!   equality of two records is equality of their semantics. Tag names are
//!   restricted to a conservative charset so they can never collide with
//!   the filter language's operators (`!`, `=`, `,`).

mod codec;

pub use codec::{decode, encode, CodecError, FORMAT_VERSION, MAX_ENCODED_LEN};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised when a tag name does not fit the tag charset.
///
/// Tags must match `[A-Za-z][A-Za-z0-9._-]*`. The restriction keeps tag
/// names unambiguous inside filter expressions, where `!`, `=`, and `,`
/// are structural characters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TagError {
    /// The tag is empty.
    #[error("tag must not be empty")]
    Empty,

    /// The tag does not start with an ASCII letter.
    #[error("tag {tag:?} must start with an ASCII letter")]
    LeadingChar {
        /// The offending tag.
        tag: String,
    },

    /// The tag contains a character outside `[A-Za-z0-9._-]`.
    #[error("tag {tag:?} contains forbidden character {ch:?}")]
    ForbiddenChar {
        /// The offending tag.
        tag: String,
        /// The first forbidden character encountered.
        ch: char,
    },
}

/// Validates a tag name against the tag charset.
pub fn validate_tag(tag: &str) -> Result<(), TagError> {
    let mut chars = tag.chars();
    match chars.next() {
        None => return Err(TagError::Empty),
        Some(c) if c.is_ascii_alphabetic() => {},
        Some(_) => {
            return Err(TagError::LeadingChar {
                tag: tag.to_string(),
            })
        },
    }
    for ch in chars {
        if !ch.is_ascii_alphanumeric() && !matches!(ch, '.' | '_' | '-') {
            return Err(TagError::ForbiddenChar {
                tag: tag.to_string(),
                ch,
            });
        }
    }
    Ok(())
}

/// Shared control metadata for one pool account.
///
/// The zero value (all fields empty) is meaningful: it is what a freshly
/// initialized account carries, and what an empty metadata slot decodes to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRecord {
    /// Free-form note about what the account is currently used for.
    #[serde(default)]
    pub desc: String,

    /// Opaque owner token. Empty means the account is free.
    #[serde(default)]
    pub owner: String,

    /// Classification tags, kept sorted and de-duplicated.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ControlRecord {
    /// Returns the zero record: unowned, undescribed, untagged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when some caller holds the account.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        !self.owner.is_empty()
    }

    /// Returns true when the account is available for allocation.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.owner.is_empty()
    }

    /// Replaces the owner token.
    pub fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = owner.into();
    }

    /// Marks the account free.
    pub fn clear_owner(&mut self) {
        self.owner.clear();
    }

    /// Replaces the description.
    pub fn set_desc(&mut self, desc: impl Into<String>) {
        self.desc = desc.into();
    }

    /// Returns true when the record carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Adds a tag, keeping the tag list sorted. Returns `false` when the
    /// tag was already present.
    pub fn add_tag(&mut self, tag: &str) -> Result<bool, TagError> {
        validate_tag(tag)?;
        match self.tags.binary_search_by(|t| t.as_str().cmp(tag)) {
            Ok(_) => Ok(false),
            Err(idx) => {
                self.tags.insert(idx, tag.to_string());
                Ok(true)
            },
        }
    }

    /// Removes a tag. Returns `false` when the tag was not present.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        self.tags.len() != before
    }

    /// Restores the canonical tag order after direct mutation of
    /// [`ControlRecord::tags`]. Decoded and merged records are already
    /// canonical.
    pub fn canonicalize_tags(&mut self) {
        self.tags.sort_unstable();
        self.tags.dedup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_record_is_free() {
        let record = ControlRecord::new();
        assert!(record.is_free());
        assert!(!record.is_owned());
        assert!(record.desc.is_empty());
        assert!(record.tags.is_empty());
    }

    #[test]
    fn owner_round_trip() {
        let mut record = ControlRecord::new();
        record.set_owner("ci-run-42");
        assert!(record.is_owned());
        record.clear_owner();
        assert!(record.is_free());
    }

    #[test]
    fn add_tag_keeps_sorted_order() {
        let mut record = ControlRecord::new();
        assert!(record.add_tag("prod").unwrap());
        assert!(record.add_tag("ci").unwrap());
        assert!(record.add_tag("lab-3").unwrap());
        assert_eq!(record.tags, vec!["ci", "lab-3", "prod"]);
    }

    #[test]
    fn add_tag_is_idempotent() {
        let mut record = ControlRecord::new();
        assert!(record.add_tag("ci").unwrap());
        assert!(!record.add_tag("ci").unwrap());
        assert_eq!(record.tags, vec!["ci"]);
    }

    #[test]
    fn remove_tag_reports_presence() {
        let mut record = ControlRecord::new();
        record.add_tag("ci").unwrap();
        assert!(record.remove_tag("ci"));
        assert!(!record.remove_tag("ci"));
    }

    #[test]
    fn validate_tag_accepts_full_charset() {
        for tag in ["a", "Ab3", "team.core_x-1", "Z9.-_"] {
            assert!(validate_tag(tag).is_ok(), "tag {tag:?} should be valid");
        }
    }

    #[test]
    fn validate_tag_rejects_empty() {
        assert_eq!(validate_tag(""), Err(TagError::Empty));
    }

    #[test]
    fn validate_tag_rejects_non_letter_start() {
        assert!(matches!(
            validate_tag("3ci"),
            Err(TagError::LeadingChar { .. })
        ));
        assert!(matches!(
            validate_tag("-ci"),
            Err(TagError::LeadingChar { .. })
        ));
    }

    #[test]
    fn validate_tag_rejects_filter_operators() {
        for (tag, bad) in [("ci!x", '!'), ("ci=x", '='), ("ci,x", ','), ("ci x", ' ')] {
            match validate_tag(tag) {
                Err(TagError::ForbiddenChar { ch, .. }) => assert_eq!(ch, bad),
                other => panic!("expected ForbiddenChar for {tag:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn canonicalize_sorts_and_dedups() {
        let mut record = ControlRecord {
            tags: vec!["b".into(), "a".into(), "b".into()],
            ..ControlRecord::default()
        };
        record.canonicalize_tags();
        assert_eq!(record.tags, vec!["a", "b"]);
    }
}
