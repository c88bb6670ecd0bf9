//! # Access Rights
//!
//! Fine-grained permission strings and sets of them.
//! A right names a domain, a resource and an action, or a wildcard over them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{RbacError, RbacResult};

/// Qualifier appended to a right to scope it to resources the user created.
pub const OWN_QUALIFIER: &str = "own";

/// The right that authorizes everything.
pub const ALL_RIGHTS: &str = "*";

/// A validated access right.
///
/// Accepted shapes:
/// - `*`: every right
/// - `domain:*`: every right in a domain
/// - `domain:resource:*`: every action on a resource
/// - `domain:resource:action`: one action
/// - `domain:resource:action:own`: one action, only on resources the user created
///
/// # Example
///
/// ```
/// use lms_rbac::AccessRight;
///
/// let held = AccessRight::parse("content:*").unwrap();
/// let required = AccessRight::parse("content:courses:manage").unwrap();
/// assert!(held.covers(&required));
///
/// let own = required.own_variant().unwrap();
/// assert_eq!(own.as_str(), "content:courses:manage:own");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct AccessRight(String);

impl AccessRight {
    /// Parse and validate a right.
    ///
    /// Segments are lower-cased before validation.
    ///
    /// # Example
    ///
    /// ```
    /// use lms_rbac::AccessRight;
    ///
    /// assert!(AccessRight::parse("*").is_ok());
    /// assert!(AccessRight::parse("Content:Courses:Read").is_ok());
    /// assert!(AccessRight::parse("content").is_err());
    /// assert!(AccessRight::parse("*:courses:read").is_err());
    /// ```
    pub fn parse(s: &str) -> RbacResult<Self> {
        let normalized = s.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(RbacError::EmptyRight);
        }
        if normalized == ALL_RIGHTS {
            return Ok(Self(normalized));
        }

        let segments: Vec<&str> = normalized.split(':').collect();
        let last = segments.len() - 1;
        for (idx, segment) in segments.iter().enumerate() {
            if *segment == "*" {
                if idx != last {
                    return Err(RbacError::MisplacedWildcard(normalized.clone()));
                }
                continue;
            }
            let valid = !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
            if !valid {
                return Err(RbacError::InvalidSegment {
                    right: normalized.clone(),
                    segment: segment.to_string(),
                });
            }
        }

        let wildcard = segments[last] == "*";
        let well_formed = match segments.len() {
            2 | 3 => wildcard || segments.len() == 3,
            4 => segments[3] == OWN_QUALIFIER,
            _ => false,
        };
        if !well_formed {
            return Err(RbacError::MalformedRight(normalized));
        }

        Ok(Self(normalized))
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `:`-separated segments.
    pub fn segments(&self) -> Vec<&str> {
        self.0.split(':').collect()
    }

    /// The domain segment (`None` for `*`).
    pub fn domain(&self) -> Option<&str> {
        if self.is_all() {
            None
        } else {
            self.0.split(':').next()
        }
    }

    /// Check if this is the `*` right.
    pub fn is_all(&self) -> bool {
        self.0 == ALL_RIGHTS
    }

    /// Check if this right ends in a wildcard segment.
    pub fn is_wildcard(&self) -> bool {
        self.0.ends_with('*')
    }

    /// Check if this is an own-scoped right.
    pub fn is_own_scoped(&self) -> bool {
        self.0.ends_with(":own") && self.segments().len() == 4
    }

    /// The own-scoped variant of a concrete `domain:resource:action` right.
    ///
    /// Wildcards and rights that are already own-scoped have no variant.
    pub fn own_variant(&self) -> Option<AccessRight> {
        if self.is_wildcard() || self.is_own_scoped() {
            return None;
        }
        Some(Self(format!("{}:{}", self.0, OWN_QUALIFIER)))
    }

    /// Check if holding this right grants `required`.
    ///
    /// A right covers another if:
    /// - They are equal
    /// - This is `*`
    /// - This is a wildcard whose prefix segments match the start of `required`
    /// - This is a concrete action and `required` is its own-scoped variant
    ///
    /// # Example
    ///
    /// ```
    /// use lms_rbac::AccessRight;
    ///
    /// let full = AccessRight::parse("content:courses:update").unwrap();
    /// let own = AccessRight::parse("content:courses:update:own").unwrap();
    /// assert!(full.covers(&own));
    /// assert!(!own.covers(&full));
    /// ```
    pub fn covers(&self, required: &AccessRight) -> bool {
        if self == required || self.is_all() {
            return true;
        }

        let held = self.segments();
        let wanted = required.segments();

        if self.is_wildcard() {
            let prefix = &held[..held.len() - 1];
            return wanted.len() > prefix.len() && wanted[..prefix.len()] == *prefix;
        }

        required.is_own_scoped() && held.len() == 3 && wanted[..3] == held[..]
    }
}

impl std::fmt::Display for AccessRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AccessRight {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccessRight {
    type Error = RbacError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessRight> for String {
    fn from(right: AccessRight) -> Self {
        right.0
    }
}

/// A set of access rights held by a role or a user.
///
/// Stored as sorted strings so cached and serialized forms are stable.
///
/// # Example
///
/// ```
/// use lms_rbac::AccessRightSet;
///
/// let set = AccessRightSet::from_strings(&["content:*", "analytics:reports:read"]);
/// assert!(set.has_str("content:modules:delete"));
/// assert!(!set.has_str("analytics:reports:export"));
/// assert_eq!(set.len(), 2);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessRightSet {
    rights: BTreeSet<String>,
}

impl AccessRightSet {
    /// Create a new empty set.
    pub fn new() -> Self {
        Self {
            rights: BTreeSet::new(),
        }
    }

    /// Add a right to the set.
    pub fn add(&mut self, right: AccessRight) {
        self.rights.insert(right.into());
    }

    /// Parse and add a right.
    pub fn add_str(&mut self, right: &str) -> RbacResult<()> {
        self.add(AccessRight::parse(right)?);
        Ok(())
    }

    /// Remove a right from the set.
    ///
    /// # Returns
    ///
    /// `true` if the right was present
    pub fn remove(&mut self, right: &AccessRight) -> bool {
        self.rights.remove(right.as_str())
    }

    /// Check if the set grants a right.
    ///
    /// This checks for:
    /// 1. Exact match
    /// 2. The `*` right
    /// 3. A wildcard over any prefix of the right's segments
    /// 4. The concrete right, when an own-scoped variant is requested
    pub fn has(&self, required: &AccessRight) -> bool {
        if self.rights.contains(required.as_str()) || self.rights.contains(ALL_RIGHTS) {
            return true;
        }

        let segments = required.segments();
        for len in 1..segments.len() {
            let wildcard = format!("{}:*", segments[..len].join(":"));
            if self.rights.contains(&wildcard) {
                return true;
            }
        }

        if required.is_own_scoped() {
            let base = segments[..3].join(":");
            if self.rights.contains(&base) {
                return true;
            }
        }

        false
    }

    /// Check a right given as a string. Malformed input is never granted.
    pub fn has_str(&self, required: &str) -> bool {
        AccessRight::parse(required)
            .map(|right| self.has(&right))
            .unwrap_or(false)
    }

    /// Check if the set holds `*`.
    pub fn is_unrestricted(&self) -> bool {
        self.rights.contains(ALL_RIGHTS)
    }

    /// Iterate over the rights as strings.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.rights.iter().map(String::as_str)
    }

    /// Rights as a sorted vector of strings.
    pub fn to_vec(&self) -> Vec<String> {
        self.rights.iter().cloned().collect()
    }

    /// Merge another set into this one.
    pub fn merge(&mut self, other: &AccessRightSet) {
        for right in &other.rights {
            self.rights.insert(right.clone());
        }
    }

    /// Create from a list of right strings, skipping malformed entries.
    pub fn from_strings(rights: &[&str]) -> Self {
        let mut set = Self::new();
        for right in rights {
            if let Ok(r) = AccessRight::parse(right) {
                set.add(r);
            }
        }
        set
    }

    /// Create from a list of right strings, failing on the first malformed entry.
    pub fn try_from_strings<I, S>(rights: I) -> RbacResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for right in rights {
            set.add(AccessRight::parse(right.as_ref())?);
        }
        Ok(set)
    }

    /// Get the count of rights.
    pub fn len(&self) -> usize {
        self.rights.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.rights.is_empty()
    }

    /// Clear all rights.
    pub fn clear(&mut self) {
        self.rights.clear();
    }

    /// Check if this set grants every right in another set.
    pub fn contains_all(&self, other: &AccessRightSet) -> bool {
        other.iter().all(|right| self.has_str(right))
    }

    /// Check if this set grants at least one right in another set.
    pub fn contains_any(&self, other: &AccessRightSet) -> bool {
        other.iter().any(|right| self.has_str(right))
    }
}

impl FromIterator<AccessRight> for AccessRightSet {
    fn from_iter<T: IntoIterator<Item = AccessRight>>(iter: T) -> Self {
        let mut set = AccessRightSet::new();
        for right in iter {
            set.add(right);
        }
        set
    }
}
