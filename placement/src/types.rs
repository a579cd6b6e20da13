//! Identifier newtypes shared by every component.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! string_id {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct $name(String);

    impl $name {
      pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
      }

      #[inline]
      pub fn as_str(&self) -> &str {
        &self.0
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
      }
    }

    impl From<&str> for $name {
      fn from(id: &str) -> Self {
        Self(id.to_string())
      }
    }

    impl From<String> for $name {
      fn from(id: String) -> Self {
        Self(id)
      }
    }

    impl Borrow<str> for $name {
      fn borrow(&self) -> &str {
        &self.0
      }
    }
  };
}

string_id! {
  /// A dataset's catalog path, e.g. `/Primary/Processed-v1/AOD`.
  DatasetId
}

string_id! {
  /// A logical file name as reported by the access stream.
  FileId
}

string_id! {
  /// A storage site name.
  SiteId
}
