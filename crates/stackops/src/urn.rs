//! Canonical resource identifiers
//!
//! A URN uniquely addresses a managed resource within a stage:
//!
//! ```text
//! urn:stack:<stage>::<app>::<type-chain>::<name>
//! ```
//!
//! The type chain is the resource's type token, optionally prefixed by its
//! parent's type token joined with `$` (e.g. `app:web:Site$aws:s3:Bucket`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheme prefix shared by every URN
pub const URN_SCHEME: &str = "urn:stack:";

/// A validated resource URN
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Urn(String);

impl Urn {
    /// Parse and validate a URN string
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix(URN_SCHEME)
            .ok_or_else(|| Error::InvalidUrn(s.to_string()))?;

        let parts: Vec<&str> = rest.splitn(4, "::").collect();
        if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
            return Err(Error::InvalidUrn(s.to_string()));
        }

        // Every segment of the type chain must be a valid type token
        for segment in parts[2].split('$') {
            TypeToken::parse(segment).map_err(|_| Error::InvalidUrn(s.to_string()))?;
        }

        Ok(Self(s.to_string()))
    }

    /// Build a URN for a top-level resource
    pub fn build(stage: &str, app: &str, ty: &TypeToken, name: &str) -> Result<Self> {
        Self::parse(&format!("{URN_SCHEME}{stage}::{app}::{ty}::{name}"))
    }

    /// Build a URN for a resource owned by a parent, embedding the parent's
    /// type as the leading segment of the type chain
    pub fn build_nested(
        stage: &str,
        app: &str,
        parent_ty: &TypeToken,
        ty: &TypeToken,
        name: &str,
    ) -> Result<Self> {
        Self::parse(&format!(
            "{URN_SCHEME}{stage}::{app}::{parent_ty}${ty}::{name}"
        ))
    }

    fn segment(&self, index: usize) -> &str {
        self.0[URN_SCHEME.len()..]
            .splitn(4, "::")
            .nth(index)
            .unwrap_or_default()
    }

    /// Stage this resource belongs to
    pub fn stage(&self) -> &str {
        self.segment(0)
    }

    /// App this resource belongs to
    pub fn app(&self) -> &str {
        self.segment(1)
    }

    /// Full type chain, including any embedded parent types
    pub fn type_chain(&self) -> &str {
        self.segment(2)
    }

    /// The resource's own type token (last segment of the chain)
    pub fn resource_type(&self) -> &str {
        self.type_chain().rsplit('$').next().unwrap_or_default()
    }

    /// Resource name
    pub fn name(&self) -> &str {
        self.segment(3)
    }

    /// The raw URN string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Urn {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Urn> for String {
    fn from(urn: Urn) -> Self {
        urn.0
    }
}

/// A validated resource type token of the form `<pkg>:<module>:<Name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeToken(String);

impl TypeToken {
    /// Parse and validate a type token string
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(Error::InvalidTypeToken(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The raw token string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TypeToken {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<TypeToken> for String {
    fn from(token: TypeToken) -> Self {
        token.0
    }
}
