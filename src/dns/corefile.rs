//! Corefile inspection and patching
//!
//! Detection is a plain substring test and insertion goes right after the
//! first `{`. This is deliberately not a Corefile parser: a directive name
//! inside a comment or a zone name also counts as present, and a second
//! insert adds a second line. Callers go through [`DirectiveEditor`] so a
//! structural parser can be swapped in later.

use derive_more::{Display, Error};

#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum CorefileError {
    #[display(fmt = "malformed config: no '{{' found to insert {:?} after", directive)]
    MalformedConfig { directive: String },
}

type Result<T> = std::result::Result<T, CorefileError>;

/// Reads and rewrites named directives in a brace-structured config blob.
/// Implementations never perform I/O; persisting the result is the caller's job.
pub trait DirectiveEditor: Send + Sync {
    fn has_directive(&self, doc: &str, name: &str) -> bool;
    fn insert_directive(&self, doc: &str, name: &str) -> Result<String>;
}

/// Substring / first-brace implementation of [`DirectiveEditor`]
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicEditor;

impl DirectiveEditor for HeuristicEditor {
    fn has_directive(&self, doc: &str, name: &str) -> bool {
        let found = doc.contains(name);
        if found {
            log::debug!("Directive {:?} is present in Corefile", name);
        } else {
            log::debug!("Directive {:?} is NOT present in Corefile", name);
        }
        found
    }

    fn insert_directive(&self, doc: &str, name: &str) -> Result<String> {
        let idx = doc.find('{').ok_or_else(|| CorefileError::MalformedConfig {
            directive: name.to_string(),
        })?;

        let mut patched = String::with_capacity(doc.len() + name.len() + 5);
        patched.push_str(&doc[..=idx]);
        patched.push_str("\n    ");
        patched.push_str(name);
        patched.push_str(&doc[idx + 1..]);

        log::debug!("Inserted directive {:?} after byte {}", name, idx);
        Ok(patched)
    }
}

/// A fetched Corefile and whether query logging is already on
#[derive(Debug, Clone, PartialEq)]
pub struct CorefileDocument {
    pub raw: String,
    pub has_logging_directive: bool,
}

impl CorefileDocument {
    pub fn inspect(editor: &dyn DirectiveEditor, raw: String, logging_directive: &str) -> Self {
        let has_logging_directive = editor.has_directive(&raw, logging_directive);
        CorefileDocument {
            raw,
            has_logging_directive,
        }
    }
}
