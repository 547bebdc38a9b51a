//! Anchor matching for drifting kernel sources.
//!
//! An operation carries an ordered list of [`AnchorCandidate`]s, one per
//! kernel-tree variant it knows about. [`find_anchor`] walks that list in
//! order and returns the first candidate that matches, together with the
//! context captured at the match site.
//!
//! Matching never guesses. A needle that occurs more than once under the
//! `Unique` policy is reported as [`PatchError::AmbiguousAnchor`]; callers
//! must pick `First`, `Last`, `After(marker)` or `Within(marker)` explicitly.

use crate::error::PatchError;
use regex::Regex;
use std::collections::BTreeMap;

/// Which occurrence of a needle an anchor refers to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Occurrence {
    /// Exactly one occurrence in the file; more is ambiguous
    #[default]
    Unique,
    First,
    Last,
    /// First occurrence after the end of a unique marker
    After(String),
    /// The single occurrence inside the function starting at a unique marker
    Within(String),
}

/// How a candidate locates its span.
#[derive(Debug, Clone)]
pub enum AnchorKind {
    Literal(String),
    Pattern(Regex),
    /// `#if…` block opening with the given text, spanning to its `#endif`
    PreprocessorBlock(String),
}

/// One fallback tier of an operation.
#[derive(Debug, Clone)]
pub struct AnchorCandidate {
    pub kind: AnchorKind,
    pub occurrence: Occurrence,
}

impl AnchorCandidate {
    pub fn literal(text: impl Into<String>) -> Self {
        AnchorCandidate {
            kind: AnchorKind::Literal(text.into()),
            occurrence: Occurrence::Unique,
        }
    }

    pub fn pattern(pattern: &str) -> Result<Self, PatchError> {
        let regex = Regex::new(pattern)
            .map_err(|e| PatchError::RegexInvalid(format!("{}: {}", pattern, e)))?;
        Ok(Self::from_regex(regex))
    }

    pub fn from_regex(regex: Regex) -> Self {
        AnchorCandidate {
            kind: AnchorKind::Pattern(regex),
            occurrence: Occurrence::Unique,
        }
    }

    pub fn preprocessor_block(opening: impl Into<String>) -> Self {
        AnchorCandidate {
            kind: AnchorKind::PreprocessorBlock(opening.into()),
            occurrence: Occurrence::Unique,
        }
    }

    pub fn first(mut self) -> Self {
        self.occurrence = Occurrence::First;
        self
    }

    pub fn last(mut self) -> Self {
        self.occurrence = Occurrence::Last;
        self
    }

    pub fn after(mut self, marker: impl Into<String>) -> Self {
        self.occurrence = Occurrence::After(marker.into());
        self
    }

    pub fn within(mut self, marker: impl Into<String>) -> Self {
        self.occurrence = Occurrence::Within(marker.into());
        self
    }

    /// Human-readable needle for diagnostics.
    pub fn needle(&self) -> &str {
        match &self.kind {
            AnchorKind::Literal(text) | AnchorKind::PreprocessorBlock(text) => text,
            AnchorKind::Pattern(regex) => regex.as_str(),
        }
    }
}

/// Values captured at the match site, keyed by name.
///
/// Always holds `matched` and `indent`; pattern candidates add their named
/// groups. A named group called `indent` replaces the detected indentation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorContext {
    values: BTreeMap<String, String>,
}

impl AnchorContext {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn matched(&self) -> &str {
        self.get("matched").unwrap_or_default()
    }

    pub fn indent(&self) -> &str {
        self.get("indent").unwrap_or_default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }
}

/// A successful match: which tier fired, the byte span, and captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorMatch {
    pub candidate: usize,
    pub start: usize,
    pub end: usize,
    pub context: AnchorContext,
}

/// Raw hit before occurrence selection.
struct Hit {
    start: usize,
    end: usize,
    groups: Vec<(String, String)>,
}

/// Finds the first candidate, in order, that matches `text`.
///
/// Returns `Ok(None)` when no candidate matches. Stops with
/// `Err(AmbiguousAnchor)` at the first candidate whose needle or marker is
/// ambiguous; later tiers are not consulted in that case.
pub fn find_anchor(
    text: &str,
    candidates: &[AnchorCandidate],
) -> Result<Option<AnchorMatch>, PatchError> {
    for (index, candidate) in candidates.iter().enumerate() {
        if let Some(hit) = match_candidate(text, index, candidate)? {
            let mut context = AnchorContext::default();
            context.insert("matched", &text[hit.start..hit.end]);
            context.insert("indent", line_indent(text, hit.start));
            for (name, value) in hit.groups {
                context.insert(name, value);
            }
            log::debug!(
                "[Anchor] [MATCH] tier {} at {}..{}: {:?}",
                index,
                hit.start,
                hit.end,
                candidate.needle()
            );
            return Ok(Some(AnchorMatch {
                candidate: index,
                start: hit.start,
                end: hit.end,
                context,
            }));
        }
        log::debug!("[Anchor] [MISS] tier {}: {:?}", index, candidate.needle());
    }
    Ok(None)
}

fn match_candidate(
    text: &str,
    index: usize,
    candidate: &AnchorCandidate,
) -> Result<Option<Hit>, PatchError> {
    let (region_start, region_end) = match &candidate.occurrence {
        Occurrence::Unique | Occurrence::First | Occurrence::Last => (0, text.len()),
        Occurrence::After(marker) => match unique_marker(text, marker, index)? {
            Some(pos) => (pos + marker.len(), text.len()),
            None => return Ok(None),
        },
        Occurrence::Within(marker) => match unique_marker(text, marker, index)? {
            Some(pos) => function_region(text, pos),
            None => return Ok(None),
        },
    };

    let mut hits = collect_hits(text, region_start, region_end, &candidate.kind);

    let hit = match candidate.occurrence {
        Occurrence::First | Occurrence::After(_) => {
            if hits.is_empty() {
                None
            } else {
                Some(hits.swap_remove(0))
            }
        }
        Occurrence::Last => hits.pop(),
        Occurrence::Unique | Occurrence::Within(_) => match hits.len() {
            0 => None,
            1 => hits.pop(),
            count => {
                return Err(PatchError::AmbiguousAnchor {
                    candidate: index,
                    needle: candidate.needle().to_string(),
                    count,
                })
            }
        },
    };
    Ok(hit)
}

fn collect_hits(text: &str, region_start: usize, region_end: usize, kind: &AnchorKind) -> Vec<Hit> {
    let region = &text[region_start..region_end];
    match kind {
        AnchorKind::Literal(needle) if needle.is_empty() => Vec::new(),
        AnchorKind::Literal(needle) => region
            .match_indices(needle.as_str())
            .map(|(offset, _)| Hit {
                start: region_start + offset,
                end: region_start + offset + needle.len(),
                groups: Vec::new(),
            })
            .collect(),
        AnchorKind::Pattern(regex) => pattern_hits(text, region_start, region_end, regex),
        AnchorKind::PreprocessorBlock(opening) if opening.is_empty() => Vec::new(),
        AnchorKind::PreprocessorBlock(opening) => region
            .match_indices(opening.as_str())
            .filter_map(|(offset, _)| {
                let start = region_start + offset;
                preprocessor_block_end(text, start).map(|end| Hit {
                    start,
                    end,
                    groups: Vec::new(),
                })
            })
            .collect(),
    }
}

/// Matches of `regex` lying inside `region_start..region_end`.
///
/// The search runs on the full text from `region_start`, so `^`, `$` and
/// `\b` see the real surrounding characters instead of the region edges.
fn pattern_hits(text: &str, region_start: usize, region_end: usize, regex: &Regex) -> Vec<Hit> {
    let mut hits = Vec::new();
    let mut pos = region_start;

    while pos <= region_end {
        let Some(caps) = regex.captures_at(text, pos) else {
            break;
        };
        let Some(whole) = caps.get(0) else {
            break;
        };
        if whole.end() > region_end {
            break;
        }

        let groups = regex
            .capture_names()
            .flatten()
            .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();
        hits.push(Hit {
            start: whole.start(),
            end: whole.end(),
            groups,
        });

        pos = if whole.is_empty() {
            // Step over one character so an empty match cannot repeat
            whole.end() + text[whole.end()..].chars().next().map_or(1, char::len_utf8)
        } else {
            whole.end()
        };
    }
    hits
}

/// Position of `needle` when it occurs exactly once.
///
/// `Ok(None)` when absent; `Err(count)` when it occurs `count` > 1 times.
/// Guards and verification checks scope with the same rule as anchors.
pub fn find_unique(text: &str, needle: &str) -> Result<Option<usize>, usize> {
    if needle.is_empty() {
        return Ok(None);
    }
    let mut positions = text.match_indices(needle).map(|(pos, _)| pos);
    match (positions.next(), positions.count()) {
        (None, _) => Ok(None),
        (Some(pos), 0) => Ok(Some(pos)),
        (Some(_), rest) => Err(rest + 1),
    }
}

/// Position of `marker`, which must occur at most once.
fn unique_marker(text: &str, marker: &str, index: usize) -> Result<Option<usize>, PatchError> {
    find_unique(text, marker).map_err(|count| PatchError::AmbiguousAnchor {
        candidate: index,
        needle: marker.to_string(),
        count,
    })
}

/// Span of the function starting at `start`: up to and including the first
/// following line that is a lone `}`. Runs to the end of the text when the
/// body is never closed.
pub fn function_region(text: &str, start: usize) -> (usize, usize) {
    let rest = &text[start..];
    let end = rest
        .match_indices("\n}")
        .map(|(offset, _)| offset + 2)
        .find(|&close| matches!(rest.as_bytes().get(close), None | Some(b'\n') | Some(b'\r')))
        .map(|close| start + close)
        .unwrap_or(text.len());
    (start, end)
}

/// End of the `#if…`/`#endif` block opening at `start`, including one
/// trailing newline. `None` when the block is unbalanced.
pub fn preprocessor_block_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut offset = start;
    for line in text[start..].split_inclusive('\n') {
        let line_end = offset + line.len();
        let directive = line.trim_start();
        if let Some(rest) = directive.strip_prefix('#') {
            let keyword = rest.trim_start();
            if keyword.starts_with("ifdef")
                || keyword.starts_with("ifndef")
                || keyword.starts_with("if ")
                || keyword.starts_with("if(")
            {
                depth += 1;
            } else if keyword.starts_with("endif") {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(line_end);
                }
            }
        }
        offset = line_end;
    }
    None
}

/// Leading whitespace of the line containing `pos`.
fn line_indent(text: &str, pos: usize) -> &str {
    let line_start = text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line = &text[line_start..];
    let width = line
        .bytes()
        .take_while(|b| *b == b' ' || *b == b'\t')
        .count();
    &line[..width]
}
