//! Logging utilities for Formwork
//!
//! This module provides utilities for formatting values inside log messages.

use serde::Serialize;
use std::fmt::{self, Debug};

/// Renders a serializable value as YAML inside a log statement.
///
/// Value trees are logged this way when a form resolves its defaults or is
/// reset, so a snapshot reads as one block instead of a single JSON line:
///
/// ```ignore
/// debug!(defaults = %Pretty(&defaults), "form created with static defaults");
/// // defaults=
/// // username: Bret
/// // friends:
/// // - name: Antonette
/// ```
///
/// The output starts with a newline. Values that fail to serialize fall back
/// to their `Debug` form.
pub struct Pretty<T>(pub T);

impl<T: Serialize + Debug> fmt::Display for Pretty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\n")?;
        match serde_yaml::to_string(&self.0) {
            Ok(yaml) => f.write_str(&yaml),
            Err(_) => write!(f, "{:#?}", self.0),
        }
    }
}

impl<T: Serialize + Debug> Debug for Pretty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pretty_renders_yaml_with_leading_newline() {
        let value = json!({"username": "Bret", "channel": ""});
        let rendered = format!("{}", Pretty(&value));
        assert!(rendered.starts_with('\n'));
        assert!(rendered.contains("username: Bret"));
    }

    #[test]
    fn test_pretty_renders_field_arrays_as_block_lists() {
        let value = json!({"friends": [{"name": "Antonette"}]});
        let rendered = Pretty(&value).to_string();
        assert_eq!(rendered, "\nfriends:\n- name: Antonette\n");
    }

    #[test]
    fn test_pretty_debug_matches_display() {
        let value = json!(["a", "b"]);
        assert_eq!(format!("{:?}", Pretty(&value)), format!("{}", Pretty(&value)));
    }
}
