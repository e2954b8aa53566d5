//! Terminal prompts: new patterns for unmatched files and run confirmation.

use std::io::{BufRead, Write};
use std::path::Path;

use crate::error::{MigrateError, Result};
use crate::identity::{normalize_path, PatternSource, TagPattern, TagTemplate};

const RULE: &str = "-------------------------------------------------------";

/// Reads one trimmed line; `None` at end of input.
fn read_answer<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn is_yes(answer: &str) -> bool {
    answer.eq_ignore_ascii_case("yes")
}

/// Asks `question` and returns true only for a case-insensitive `yes`.
pub fn confirm<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<bool> {
    writeln!(output, "{}", question)?;
    output.flush()?;
    Ok(read_answer(input)?.is_some_and(|a| is_yes(&a)))
}

/// [`PatternSource`] that asks an operator for each unmatched file.
///
/// The operator enters a pattern, a measurement, space separated
/// `key=value` tag templates and a field, then confirms. Empty or
/// rejected answers start over; end of input gives up.
pub struct InteractivePatternSource<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> InteractivePatternSource<R, W> {
    /// Creates a source over the given streams.
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Asks a yes/no question on the same streams.
    pub fn confirm(&mut self, question: &str) -> Result<bool> {
        confirm(&mut self.input, &mut self.output, question)
    }

    fn ask(&mut self, path: &Path, question: &str) -> Result<String> {
        writeln!(self.output, "{}", question)?;
        self.output.flush()?;
        read_answer(&mut self.input)?.ok_or_else(|| MigrateError::NoPatternAvailable(path.to_path_buf()))
    }

    fn ask_once(&mut self, path: &Path) -> Result<Option<TagPattern>> {
        let pattern = self.ask(path, "Pattern (e.g. carbon.agents.#HOST.#METRIC):")?;
        if pattern.is_empty() {
            return Ok(None);
        }
        let measurement = self.ask(path, "Measurement:")?;
        if measurement.is_empty() {
            return Ok(None);
        }
        let tags = self.ask(path, "Tags (e.g. host=#HOST dc=#DC), empty for none:")?;
        let field = self.ask(path, "Field (e.g. value):")?;
        if field.is_empty() {
            return Ok(None);
        }

        let mut candidate = TagPattern::new(pattern, measurement, field);
        candidate.tags = tags.split_whitespace().filter_map(TagTemplate::parse).collect();

        writeln!(self.output, "Pattern:     {}", candidate.pattern)?;
        writeln!(self.output, "Measurement: {}", candidate.measurement)?;
        for tag in &candidate.tags {
            writeln!(self.output, "Tag:         {}={}", tag.key, tag.value)?;
        }
        writeln!(self.output, "Field:       {}", candidate.field)?;

        let answer = self.ask(path, "Do you want to add this pattern? Yes/No")?;
        Ok(is_yes(&answer).then_some(candidate))
    }
}

impl<R: BufRead, W: Write> PatternSource for InteractivePatternSource<R, W> {
    fn resolve_unmatched(&mut self, path: &Path) -> Result<TagPattern> {
        writeln!(self.output, "{}", RULE)?;
        writeln!(self.output, "No pattern matches {}", path.display())?;
        writeln!(self.output, "Series path: {}", normalize_path(path))?;
        writeln!(self.output, "{}", RULE)?;

        loop {
            if let Some(pattern) = self.ask_once(path)? {
                return Ok(pattern);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_confirm() {
        let mut out = Vec::new();
        assert!(confirm(&mut Cursor::new("YES\n"), &mut out, "Continue?").unwrap());
        assert!(confirm(&mut Cursor::new("yes"), &mut out, "Continue?").unwrap());
        assert!(!confirm(&mut Cursor::new("y\n"), &mut out, "Continue?").unwrap());
        assert!(!confirm(&mut Cursor::new(""), &mut out, "Continue?").unwrap());
        assert!(String::from_utf8(out).unwrap().starts_with("Continue?\n"));
    }

    #[test]
    fn test_resolve_unmatched() {
        let input = "carbon.#HOST.load\nload\nhost=#HOST broken\nvalue\nyes\n";
        let mut source = InteractivePatternSource::new(Cursor::new(input), Vec::new());

        let pattern = source
            .resolve_unmatched(Path::new("carbon/host1/load.wsp"))
            .unwrap();

        assert_eq!(
            pattern,
            TagPattern::new("carbon.#HOST.load", "load", "value").with_tag("host", "#HOST")
        );
        let shown = String::from_utf8(source.output).unwrap();
        assert!(shown.contains("Series path: carbon.host1.load"));
    }

    #[test]
    fn test_rejected_pattern_asks_again() {
        let input = "a.#X\nm\n\nvalue\nno\n\nb.#Y\nm\n\nf\nYes\n";
        let mut source = InteractivePatternSource::new(Cursor::new(input), Vec::new());
        let pattern = source.resolve_unmatched(Path::new("b/y.wsp")).unwrap();
        assert_eq!(pattern.pattern, "b.#Y");
        assert_eq!(pattern.field, "f");
    }

    #[test]
    fn test_end_of_input_gives_up() {
        let mut source = InteractivePatternSource::new(Cursor::new("a.#X\n"), Vec::new());
        assert!(matches!(
            source.resolve_unmatched(Path::new("a/x.wsp")),
            Err(MigrateError::NoPatternAvailable(_))
        ));
    }
}
