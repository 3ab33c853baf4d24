//! The account selection mini-language.
//!
//! A filter is a comma-separated list of entries applied to a candidate
//! [`AccountSet`]. Which of the three matching modes applies is decided
//! per candidate set, in this order:
//!
//! - **ID mode**: some entry is a syntactically valid account ID. The
//!   whole filter must then consist of IDs; non-negated IDs must all be
//!   present in the candidate set.
//! - **Name mode**: some entry, exactly as written, equals a candidate's
//!   display name. The whole filter is then treated as display names,
//!   under the same found-or-error rule. Name mode wins over tag
//!   semantics even when an entry also looks like a tag, so an account
//!   named `ci` hides the `ci` tag.
//! - **Tag mode** (default): entries are `[!]tag` membership tests, all
//!   ANDed together; `!` requires absence. Two reserved names exist:
//!   `owner` (presence, absence via `!owner`, or comparison via
//!   `owner=value` / `owner!=value`, where the value `me` resolves to the
//!   caller identity) and `err` (additionally include accounts whose
//!   record could not be loaded, which every filter otherwise excludes).
//!   `owner` is the only entry that takes a value; tag names cannot
//!   contain `=`, so anything else with a value is rejected at parse.
//!
//! Tag matching is evaluated through a 64-bit mask, one bit per tag
//! entry: an account's bits over the queried tags must equal the bits of
//! the non-negated entries. Filters with more than 64 tag entries are
//! rejected outright rather than silently misbehaving.

use thiserror::Error;

use crate::account::{AccountId, AccountSet};
use crate::record::ControlRecord;

/// Width of the tag match bitmask, and thus the most tag entries one
/// filter may carry.
pub const MAX_TAG_ENTRIES: usize = 64;

/// Error raised while parsing or applying a filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FilterError {
    /// The entry does not fit the filter grammar.
    #[error("invalid filter entry {entry:?}: {reason}")]
    InvalidEntry {
        /// The entry as written.
        entry: String,
        /// What was wrong with it.
        reason: String,
    },

    /// An ID-mode filter named an account the candidate set lacks.
    #[error("filter names account id {id} but the candidate set has no such account")]
    UnknownId {
        /// The missing account ID.
        id: String,
    },

    /// A name-mode filter named an account the candidate set lacks.
    #[error("filter names account {name:?} but the candidate set has no such account")]
    UnknownName {
        /// The missing display name.
        name: String,
    },

    /// An ID-mode filter mixed IDs with something else.
    #[error("entry {entry:?} is not an account id; id filters cannot mix ids with other entries")]
    ExpectedId {
        /// The offending entry as written.
        entry: String,
    },

    /// A tag-mode filter exceeded the bitmask width.
    #[error("tag filters support at most {max} tag entries, got {count}")]
    TooManyTags {
        /// Number of tag entries in the filter.
        count: usize,
        /// The [`MAX_TAG_ENTRIES`] limit.
        max: usize,
    },
}

/// Owner comparison carried by a reserved `owner` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OwnerTerm {
    Present,
    Absent,
    Equals(String),
    NotEquals(String),
}

impl OwnerTerm {
    fn matches(&self, rec: &ControlRecord) -> bool {
        match self {
            Self::Present => rec.is_owned(),
            Self::Absent => rec.is_free(),
            Self::Equals(value) => rec.owner == *value,
            Self::NotEquals(value) => rec.owner != *value,
        }
    }
}

/// One parsed filter entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    /// Plain entry: a tag test in tag mode, a name or ID in the other
    /// modes.
    Plain { name: String, negated: bool },
    /// Reserved `owner` entry.
    Owner(OwnerTerm),
    /// Reserved `err` entry.
    Errored,
}

#[derive(Debug, Clone)]
struct ParsedEntry {
    /// The entry as written (trimmed), used for name-mode detection.
    raw: String,
    term: Term,
}

/// A parsed account filter. Parsing is pure; candidate-set dependent
/// checks (mode detection, found-or-error rules) happen in
/// [`Filter::select`].
#[derive(Debug, Clone)]
pub struct Filter {
    entries: Vec<ParsedEntry>,
}

impl Filter {
    /// Parses a filter spec. `caller` is the identity substituted for the
    /// owner value `me`; pass the resolver's answer, or empty when no
    /// caller identity exists (in which case `owner=me` is an error).
    pub fn parse(spec: &str, caller: &str) -> Result<Self, FilterError> {
        let mut entries = Vec::new();
        for raw in spec.split(',').map(str::trim) {
            if raw.is_empty() {
                continue;
            }
            let term = parse_entry(raw, caller)?;
            entries.push(ParsedEntry {
                raw: raw.to_string(),
                term,
            });
        }
        Ok(Self { entries })
    }

    /// Returns true when the filter has no entries and therefore matches
    /// every managed account.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies the filter to `set`, keeping the matching handles in their
    /// original order.
    pub fn select(&self, set: &mut AccountSet) -> Result<(), FilterError> {
        if self.entries.iter().any(|e| match &e.term {
            Term::Plain { name, .. } => AccountId::is_valid(name),
            _ => false,
        }) {
            return self.select_by_id(set);
        }
        // An entry spelled exactly like a candidate's display name turns
        // the whole filter into a name filter, pseudo-tags included.
        if self
            .entries
            .iter()
            .any(|e| set.iter().any(|h| h.name() == e.raw))
        {
            return self.select_by_name(set);
        }
        self.select_by_tags(set)
    }

    fn select_by_id(&self, set: &mut AccountSet) -> Result<(), FilterError> {
        let mut required: Vec<&str> = Vec::new();
        let mut excluded: Vec<&str> = Vec::new();
        for entry in &self.entries {
            match &entry.term {
                Term::Plain { name, negated } if AccountId::is_valid(name) => {
                    if *negated {
                        excluded.push(name);
                    } else {
                        required.push(name);
                    }
                },
                _ => {
                    return Err(FilterError::ExpectedId {
                        entry: entry.raw.clone(),
                    })
                },
            }
        }
        for id in &required {
            if !set.iter().any(|h| h.id().as_str() == *id) {
                return Err(FilterError::UnknownId { id: (*id).to_string() });
            }
        }
        set.retain(|handle| {
            let id = handle.id().as_str();
            let wanted = required.is_empty() || required.contains(&id);
            wanted && !excluded.contains(&id)
        });
        Ok(())
    }

    fn select_by_name(&self, set: &mut AccountSet) -> Result<(), FilterError> {
        let mut required: Vec<&str> = Vec::new();
        let mut excluded: Vec<&str> = Vec::new();
        for entry in &self.entries {
            match entry.raw.strip_prefix('!') {
                Some(name) => excluded.push(name),
                None => required.push(entry.raw.as_str()),
            }
        }
        for name in &required {
            if !set.iter().any(|h| h.name() == *name) {
                return Err(FilterError::UnknownName {
                    name: (*name).to_string(),
                });
            }
        }
        set.retain(|handle| {
            let name = handle.name();
            let wanted = required.is_empty() || required.contains(&name);
            wanted && !excluded.contains(&name)
        });
        Ok(())
    }

    fn select_by_tags(&self, set: &mut AccountSet) -> Result<(), FilterError> {
        let mut tag_terms: Vec<(&str, bool)> = Vec::new();
        let mut owner_terms: Vec<&OwnerTerm> = Vec::new();
        let mut include_broken = false;
        for entry in &self.entries {
            match &entry.term {
                Term::Plain { name, negated } => tag_terms.push((name, *negated)),
                Term::Owner(term) => owner_terms.push(term),
                Term::Errored => include_broken = true,
            }
        }
        if tag_terms.len() > MAX_TAG_ENTRIES {
            return Err(FilterError::TooManyTags {
                count: tag_terms.len(),
                max: MAX_TAG_ENTRIES,
            });
        }

        let mut target = 0u64;
        for (i, (_, negated)) in tag_terms.iter().enumerate() {
            if !negated {
                target |= 1 << i;
            }
        }

        set.retain(|handle| match (&handle.error, &handle.current) {
            (None, Some(rec)) => {
                let mut mask = 0u64;
                for (i, (name, _)) in tag_terms.iter().enumerate() {
                    if rec.has_tag(name) {
                        mask |= 1 << i;
                    }
                }
                mask == target && owner_terms.iter().all(|term| term.matches(rec))
            },
            // Accounts whose record is unavailable never match on their
            // own merits; `err` opts them in.
            _ => include_broken,
        });
        Ok(())
    }
}

fn parse_entry(raw: &str, caller: &str) -> Result<Term, FilterError> {
    let (negated, rest) = match raw.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    if rest.is_empty() {
        return Err(invalid(raw, "nothing after '!'"));
    }
    if rest == "err" {
        if negated {
            return Err(invalid(raw, "err cannot be negated"));
        }
        return Ok(Term::Errored);
    }
    if rest == "owner" {
        return Ok(Term::Owner(if negated {
            OwnerTerm::Absent
        } else {
            OwnerTerm::Present
        }));
    }
    if let Some(value) = rest.strip_prefix("owner!=") {
        if negated {
            return Err(invalid(raw, "owner comparisons cannot take a leading '!'"));
        }
        return Ok(Term::Owner(OwnerTerm::NotEquals(resolve_me(
            value, caller, raw,
        )?)));
    }
    if let Some(value) = rest.strip_prefix("owner=") {
        if negated {
            return Err(invalid(
                raw,
                "owner comparisons cannot take a leading '!'; use owner!=",
            ));
        }
        return Ok(Term::Owner(OwnerTerm::Equals(resolve_me(
            value, caller, raw,
        )?)));
    }
    // Tag names cannot contain '=', so a value on anything but owner is a
    // typo, not a test that happens to match nothing.
    if rest.contains('=') {
        return Err(invalid(raw, "only owner entries take a value"));
    }
    Ok(Term::Plain {
        name: rest.to_string(),
        negated,
    })
}

fn resolve_me(value: &str, caller: &str, raw: &str) -> Result<String, FilterError> {
    if value != "me" {
        return Ok(value.to_string());
    }
    if caller.is_empty() {
        return Err(invalid(raw, "owner=me requires a caller identity"));
    }
    Ok(caller.to_string())
}

fn invalid(entry: &str, reason: &str) -> FilterError {
    FilterError::InvalidEntry {
        entry: entry.to_string(),
        reason: reason.to_string(),
    }
}
