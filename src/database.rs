use crate::config::ConfigError;
use std::collections::HashMap;
use std::fmt;
use winnow::ascii::{float, line_ending, space0, space1, till_line_ending};
use winnow::combinator::{opt, separated, terminated};
use winnow::error::ContextError;
use winnow::token::take_while;
use winnow::Parser;

/// Flat key/value parameter database.
///
/// The text format has one entry per line, `key = value [value ...]`, with
/// `#` starting a comment. Keys may carry a detector prefix separated by a
/// dot (e.g. `ratedig.gasionwidth`).
///
/// # Examples
///
/// ```
/// use gemdig::database::Database;
/// use std::str::FromStr;
///
/// let db = Database::from_str("ratedig.adcbits = 12 # resolution\ntriggeroffset = 1 2")?;
/// assert_eq!(db.scalar("ratedig", "adcbits")?, 12.0);
/// assert_eq!(db.vector("ratedig", "triggeroffset")?, &[1.0, 2.0]);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Database {
    entries: HashMap<String, Vec<f64>>,
}

impl Database {
    /// Returns the values stored under `prefix.key`, falling back to `key`.
    pub fn get(&self, prefix: &str, key: &str) -> Option<&[f64]> {
        self.entries
            .get(&format!("{prefix}.{key}"))
            .or_else(|| self.entries.get(key))
            .map(Vec::as_slice)
    }

    pub fn vector(&self, prefix: &str, key: &str) -> Result<&[f64], ConfigError> {
        self.get(prefix, key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    pub fn scalar(&self, prefix: &str, key: &str) -> Result<f64, ConfigError> {
        self.optional_scalar(prefix, key)?
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    pub fn optional_scalar(&self, prefix: &str, key: &str) -> Result<Option<f64>, ConfigError> {
        match self.get(prefix, key) {
            None => Ok(None),
            Some([value]) => Ok(Some(*value)),
            Some(values) => Err(ConfigError::NotScalar {
                key: key.to_string(),
                found: values.len(),
            }),
        }
    }

    /// Insert (or replace) an entry.
    pub fn insert(&mut self, key: impl Into<String>, values: Vec<f64>) -> Option<Vec<f64>> {
        self.entries.insert(key.into(), values)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key<'s>(input: &mut &'s str) -> winnow::Result<&'s str> {
    take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
    })
    .parse_next(input)
}

fn values(input: &mut &str) -> winnow::Result<Vec<f64>> {
    separated(1.., float::<_, f64, _>, space1).parse_next(input)
}

fn comment(input: &mut &str) -> winnow::Result<()> {
    ('#', till_line_ending).void().parse_next(input)
}

// A line is either empty, a comment, or an entry with an optional trailing
// comment. Like the lookup-table parser, a bad line is reported as a whole.
fn parse_line(input: &mut &str) -> winnow::Result<Option<(String, Vec<f64>)>> {
    let entry = (key, space0, '=', space0, values).map(|(k, _, _, _, v)| (k.to_string(), v));

    let (_, entry, _, _) = (space0, opt(entry), space0, opt(comment)).parse_next(input)?;

    Ok(entry)
}

/// The error type returned when parsing a [`Database`] fails.
///
/// Points at the first line that is not empty, a comment or a valid entry.
#[derive(Debug)]
pub struct ParseError {
    input: String,
    span: std::ops::Range<usize>,
    line: usize,
    key: Option<String>,
}

impl ParseError {
    fn from_parse(error: winnow::error::ParseError<&str, ContextError>) -> Self {
        let input = error.input().to_string();
        let span = error.char_span();
        let line = input
            .chars()
            .take(span.start)
            .filter(|&c| c == '\n')
            .count()
            + 1;
        let key = input
            .lines()
            .nth(line - 1)
            .and_then(|text| key.parse_next(&mut text.trim_start()).ok())
            .map(str::to_string);
        Self {
            input,
            span,
            line,
            key,
        }
    }

    /// 1-based line number of the bad entry.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Key of the bad entry, if the line starts with one.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = match &self.key {
            Some(key) => format!("line {}: invalid value for `{key}`", self.line),
            None => format!("line {}: invalid database entry", self.line),
        };
        let message = annotate_snippets::Level::Error.title(&title).snippet(
            annotate_snippets::Snippet::source(&self.input)
                .fold(true)
                .annotation(annotate_snippets::Level::Error.span(self.span.clone())),
        );
        let renderer = annotate_snippets::Renderer::plain();
        let rendered = renderer.render(message);
        rendered.fmt(f)
    }
}

impl std::error::Error for ParseError {}

impl std::str::FromStr for Database {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let lines: Vec<Option<(String, Vec<f64>)>> =
            terminated(separated(0.., parse_line, line_ending), opt(line_ending))
                .parse(input)
                .map_err(ParseError::from_parse)?;

        // Later entries override earlier ones.
        let entries = lines.into_iter().flatten().collect();

        Ok(Self { entries })
    }
}
