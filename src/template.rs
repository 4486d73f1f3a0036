//! Two-stage script templating.
//!
//! Job scripts are rendered in two stages: container wrapping first
//! ([`wrap_container`]), which rewrites lines carrying a prefixed placeholder
//! into a container invocation with the placeholder renamed, then slot
//! resolution ([`substitute`]), which fills every `{{name}}` placeholder from
//! a [`ReplacementSet`]. Templates are parsed into an explicit segment list
//! rather than scanned with string offsets, so an unterminated `{{` fails at
//! parse time and resolution is a single pass over slots.

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::fmt;

/// The slot a container invocation must expose for the wrapped command.
pub const CMD_SLOT: &str = "cmd";

/// A fully rendered, schedulable job script. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script(String);

impl Script {
    pub fn new(contents: impl Into<String>) -> Self {
        Self(contents.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Placeholder values for one script, assembled by layering configuration
/// sections. Later layers win on key collision.
#[derive(Debug, Clone, Default)]
pub struct ReplacementSet {
    values: BTreeMap<String, String>,
}

impl ReplacementSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a layer of entries; existing keys are overwritten.
    pub fn layer<I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in entries {
            self.values.insert(key, value);
        }
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.values.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One parsed piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(String),
}

/// A template parsed into literal text interleaved with named slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse `{{name}}` slots out of the text. A `{{` without a matching
    /// `}}` is a malformed template.
    pub fn parse(text: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = text;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                bail!("unterminated placeholder in template near {:?}", rest);
            };
            segments.push(Segment::Slot(after[..end].to_string()));
            rest = &after[end + 2..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Names of every slot, in order of appearance.
    pub fn slot_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Slot(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn has_slot(&self, name: &str) -> bool {
        self.slot_names().any(|slot| slot == name)
    }

    /// A copy with every `from` slot renamed to `to`.
    fn rename_slot(&self, from: &str, to: &str) -> Self {
        let segments = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Slot(name) if name == from => Segment::Slot(to.to_string()),
                other => other.clone(),
            })
            .collect();
        Self { segments }
    }

    /// Fill every slot from the replacement set in a single pass.
    ///
    /// Replacement values are emitted literally; a value that carries `{{`
    /// of its own is rejected by the final gate below, so resolution order
    /// can never affect the outcome.
    pub fn resolve(&self, replacements: &ReplacementSet) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(name) => match replacements.get(name) {
                    Some(value) => out.push_str(value),
                    None => bail!("no replacement for placeholder {{{{{name}}}}}"),
                },
            }
        }
        if out.contains("{{") {
            bail!("replacement values re-introduced placeholder braces:\n{out}");
        }
        Ok(out)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => write!(f, "{text}")?,
                Segment::Slot(name) => write!(f, "{{{{{name}}}}}")?,
            }
        }
        Ok(())
    }
}

/// Stage one: rewrite every line carrying a `{{<prefix><name>}}` placeholder
/// into the container invocation with its `{{cmd}}` slot renamed to
/// `{{<name>}}`. Other lines pass through unchanged. The result is still a
/// template; stage two resolves the remaining slots.
pub fn wrap_container(script: &str, invocation: &str, prefix: &str) -> Result<String> {
    let invocation = Template::parse(invocation)?;
    if !invocation.has_slot(CMD_SLOT) {
        bail!("container invocation must contain {{{{{CMD_SLOT}}}}}: {invocation}");
    }

    let mut out = String::with_capacity(script.len());
    for line in script.split('\n') {
        let parsed = Template::parse(line)?;
        let mut prefixed = parsed
            .slot_names()
            .filter(|name| name.starts_with(prefix));

        match (prefixed.next(), prefixed.next()) {
            (None, _) => out.push_str(line),
            (Some(name), None) => {
                let command = &name[prefix.len()..];
                let wrapped = invocation.rename_slot(CMD_SLOT, command);
                out.push_str(&wrapped.to_string());
            }
            (Some(_), Some(_)) => {
                bail!("cannot wrap line with multiple {{{{{prefix}...}}}} placeholders: {line:?}");
            }
        }
        out.push('\n');
    }

    Ok(out)
}

/// Stage two: fill every `{{key}}` placeholder from the replacement set.
/// Fails if any placeholder is left unresolved.
pub fn substitute(script: &str, replacements: &ReplacementSet) -> Result<String> {
    Template::parse(script)?.resolve(replacements)
}

/// Render one job script: container wrapping, then slot resolution.
pub fn render(
    script: &str,
    invocation: &str,
    prefix: &str,
    replacements: &ReplacementSet,
) -> Result<Script> {
    let wrapped = wrap_container(script, invocation, prefix)?;
    Ok(Script::new(substitute(&wrapped, replacements)?))
}
