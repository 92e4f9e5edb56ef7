use std::fmt;

use crate::proto::{FromProtobuf, IntoProtobuf};

pub(crate) mod proto {
    /// Wire representation of a [`super::BindingKey`]. Wildcards travel as
    /// their literal `*` / `#` tokens.
    #[derive(Clone, Eq, PartialEq, prost::Message)]
    pub struct BindingKey {
        #[prost(string, repeated, tag = "1")]
        pub parts: Vec<String>,
    }
}

/// A fragment of a [`BindingKey`]: a string literal, a single-token `*`
/// wildcard or a tail `#` wildcard
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum BindingKeyFragment {
    Value(String),
    Star,
    Sharp,
}

impl BindingKeyFragment {
    pub fn is_star(&self) -> bool {
        matches!(self, BindingKeyFragment::Star)
    }

    pub fn is_sharp(&self) -> bool {
        matches!(self, BindingKeyFragment::Sharp)
    }
}

impl From<&str> for BindingKeyFragment {
    fn from(value: &str) -> Self {
        match value {
            "*" => BindingKeyFragment::Star,
            "#" => BindingKeyFragment::Sharp,
            _ => BindingKeyFragment::Value(value.to_string()),
        }
    }
}

impl fmt::Display for BindingKeyFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingKeyFragment::Value(s) => write!(f, "{s}"),
            BindingKeyFragment::Star => write!(f, "*"),
            BindingKeyFragment::Sharp => write!(f, "#"),
        }
    }
}

/// Subscription-side key: a sequence of fragments, possibly wildcarded.
/// The empty key matches every routing key.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct BindingKey {
    fragments: Vec<BindingKeyFragment>,
}

impl BindingKey {
    pub fn new(fragments: Vec<BindingKeyFragment>) -> Self {
        Self { fragments }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fragment(&self, index: usize) -> Option<&BindingKeyFragment> {
        self.fragments.get(index)
    }

    pub fn fragments(&self) -> &[BindingKeyFragment] {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

impl From<Vec<&str>> for BindingKey {
    fn from(parts: Vec<&str>) -> Self {
        Self {
            fragments: parts.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<Vec<String>> for BindingKey {
    fn from(parts: Vec<String>) -> Self {
        Self {
            fragments: parts.iter().map(|p| p.as_str().into()).collect(),
        }
    }
}

impl From<RoutingKey> for BindingKey {
    fn from(key: RoutingKey) -> Self {
        Self {
            fragments: key
                .tokens
                .into_iter()
                .map(BindingKeyFragment::Value)
                .collect(),
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, fragment) in self.fragments.iter().enumerate() {
            if idx > 0 {
                write!(f, ".")?;
            }
            write!(f, "{fragment}")?;
        }
        Ok(())
    }
}

impl FromProtobuf for BindingKey {
    type Input = proto::BindingKey;

    fn from_protobuf(input: Self::Input) -> Self {
        Self::from(input.parts)
    }
}

impl IntoProtobuf for BindingKey {
    type Output = proto::BindingKey;

    fn into_protobuf(self) -> Self::Output {
        proto::BindingKey {
            parts: self.fragments.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Message-side key: the literal tokens of a message's routable fields, in
/// routing order
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct RoutingKey {
    tokens: Vec<String>,
}

impl RoutingKey {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    pub fn token(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl From<Vec<&str>> for RoutingKey {
    fn from(tokens: Vec<&str>) -> Self {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<Vec<String>> for RoutingKey {
    fn from(tokens: Vec<String>) -> Self {
        Self { tokens }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, token) in self.tokens.iter().enumerate() {
            if idx > 0 {
                write!(f, ".")?;
            }
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

/// Build a [`BindingKeyFragment`] from a literal, `*` or `#`
#[macro_export]
macro_rules! fragment {
    (*) => {
        $crate::routing::BindingKeyFragment::Star
    };

    (#) => {
        $crate::routing::BindingKeyFragment::Sharp
    };

    ($lit:literal) => {
        $crate::routing::BindingKeyFragment::Value($lit.to_string())
    };
}

/// Build a [`BindingKey`] from a list of literals, `*` and `#`
#[macro_export]
macro_rules! binding_key {
    () => {
        $crate::routing::BindingKey::empty()
    };

    ($($x:tt),* $(,)?) => {
        $crate::routing::BindingKey::new(vec![$($crate::fragment![$x]),+])
    };
}
