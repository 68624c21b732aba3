//! Field-to-field connections

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::error::DagError;

/// Maps one output field of a source block to one input field of a
/// destination block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Connection {
    src: Arc<str>,
    dst: Arc<str>,
}

impl Connection {
    pub fn new(src: &str, dst: &str) -> Self {
        Self {
            src: Arc::from(src),
            dst: Arc::from(dst),
        }
    }

    /// Shorthand for fields with the same name on both blocks.
    pub fn same(name: &str) -> Self {
        let name: Arc<str> = Arc::from(name);
        Self {
            src: Arc::clone(&name),
            dst: name,
        }
    }

    #[inline]
    pub fn src_field(&self) -> &Arc<str> {
        &self.src
    }

    #[inline]
    pub fn dst_field(&self) -> &Arc<str> {
        &self.dst
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.src, self.dst)
    }
}

/// Parses `"src:dst"`, or `"name"` for identical names.
impl FromStr for Connection {
    type Err = DagError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| DagError::InvalidConnection {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = spec.split(':');
        let src = parts.next().unwrap_or_default().trim();
        let dst = parts.next().map(str::trim);
        if parts.next().is_some() {
            return Err(invalid("more than one ':'"));
        }

        match dst {
            None if !src.is_empty() => Ok(Self::same(src)),
            Some(dst) if !src.is_empty() && !dst.is_empty() => Ok(Self::new(src, dst)),
            _ => Err(invalid("empty field name")),
        }
    }
}

/// `"src:dst"` links two fields, a bare name links equally named ones.
///
/// Malformed specs are not rejected here: they fail later as unknown fields.
/// Use `str::parse` to catch them up front.
impl From<&str> for Connection {
    fn from(spec: &str) -> Self {
        match spec.split_once(':') {
            Some((src, dst)) => Self::new(src.trim(), dst.trim()),
            None => Self::same(spec.trim()),
        }
    }
}

impl From<(&str, &str)> for Connection {
    fn from((src, dst): (&str, &str)) -> Self {
        Self::new(src, dst)
    }
}
