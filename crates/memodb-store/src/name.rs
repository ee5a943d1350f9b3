//! Names: the addressable entities of a store.
//!
//! A [`Name`] is either an immutable CID, a mutable [`Head`] binding, or a
//! memoized [`Call`] binding. Names round-trip through the path-only URI
//! grammar:
//!
//! ```text
//! /cid/<cid-text>
//! /head/<name>            (the name may itself contain slashes)
//! /call/<func>/<cid>,<cid>,...
//! ```

use std::fmt;
use std::str::FromStr;

use memodb_node::Cid;

use crate::error::{Result, StoreError};
use crate::uri::Uri;

/// A mutable binding from a symbolic name to a CID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Head(pub String);

impl Head {
    pub fn new(name: impl Into<String>) -> Self {
        Head(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Head {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uri = Uri {
            rootless: false,
            path_segments: vec!["head".to_string(), self.0.clone()],
            escape_slashes_in_segments: false,
            ..Uri::default()
        };
        f.write_str(&uri.encode())
    }
}

/// A memoized invocation: a function name applied to CID-identified
/// arguments. Ordered by function name, then argument list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Call {
    pub func: String,
    pub args: Vec<Cid>,
}

impl Call {
    pub fn new(func: impl Into<String>, args: Vec<Cid>) -> Self {
        Call {
            func: func.into(),
            args,
        }
    }

    /// The canonical textual key for the argument list: base32 CID texts
    /// joined with slashes. This is the persisted call-row key in every
    /// backend, including databases written by older tools.
    pub fn args_key(&self) -> String {
        let texts: Vec<String> = self.args.iter().map(Cid::to_text).collect();
        texts.join("/")
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let texts: Vec<String> = self.args.iter().map(Cid::to_text).collect();
        let uri = Uri {
            rootless: false,
            path_segments: vec!["call".to_string(), self.func.clone(), texts.join(",")],
            escape_slashes_in_segments: true,
            ..Uri::default()
        };
        f.write_str(&uri.encode())
    }
}

/// Any addressable entity: an immutable CID or a mutable binding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Name {
    Cid(Cid),
    Head(Head),
    Call(Call),
}

impl Name {
    /// Parse a name from its path-only URI form.
    pub fn parse(input: &str) -> Result<Name> {
        let uri = Uri::parse(input)?;
        if !uri.is_bare_path() || uri.rootless || uri.path_segments.is_empty() {
            return Err(StoreError::InvalidName(input.to_string()));
        }
        let segments = &uri.path_segments;
        match segments[0].as_str() {
            "head" if segments.len() >= 2 => {
                let name = uri.path_string(1);
                if name.is_empty() {
                    return Err(StoreError::InvalidName(input.to_string()));
                }
                Ok(Name::Head(Head(name)))
            }
            "cid" if segments.len() == 2 => Ok(Name::Cid(Cid::parse(&segments[1])?)),
            "call" if segments.len() == 3 => {
                let func = &segments[1];
                if func.is_empty() {
                    return Err(StoreError::InvalidName(input.to_string()));
                }
                let mut args = Vec::new();
                for arg in segments[2].split(',') {
                    args.push(Cid::parse(arg)?);
                }
                Ok(Name::Call(Call::new(func.clone(), args)))
            }
            _ => Err(StoreError::InvalidName(input.to_string())),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Name::Cid(cid) => {
                let uri = Uri {
                    rootless: false,
                    path_segments: vec!["cid".to_string(), cid.to_text()],
                    escape_slashes_in_segments: true,
                    ..Uri::default()
                };
                f.write_str(&uri.encode())
            }
            Name::Head(head) => head.fmt(f),
            Name::Call(call) => call.fmt(f),
        }
    }
}

impl From<Cid> for Name {
    fn from(cid: Cid) -> Self {
        Name::Cid(cid)
    }
}

impl From<Head> for Name {
    fn from(head: Head) -> Self {
        Name::Head(head)
    }
}

impl From<Call> for Name {
    fn from(call: Call) -> Self {
        Name::Call(call)
    }
}

impl FromStr for Name {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Name::parse(s)
    }
}
