//! Line protocol rendering for remote writes.
//!
//! ```text
//! measurement[,tag_key=tag_value]* field_key=value timestamp\n
//! ```

use std::fmt::{self, Write as _};

use crate::identity::SeriesIdentity;
use crate::remote::{RemoteError, Row};

const COMMA_SPACE: [char; 2] = [',', ' '];
const COMMA_EQ_SPACE: [char; 3] = [',', '=', ' '];

// Renders `src` with every special character (and backslash) prefixed by `\`.
fn escape<const N: usize>(src: &str, special_characters: [char; N]) -> Escaped<'_, N> {
    Escaped {
        src,
        special_characters,
    }
}

struct Escaped<'a, const N: usize> {
    src: &'a str,
    special_characters: [char; N],
}

impl<const N: usize> fmt::Display for Escaped<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ch in self.src.chars() {
            if self.special_characters.contains(&ch) || ch == '\\' {
                f.write_char('\\')?;
            }
            f.write_char(ch)?;
        }
        Ok(())
    }
}

/// Checks that `identity` has every part a line needs: a measurement, a
/// field and a value for each tag.
pub fn check_identity(identity: &SeriesIdentity) -> Result<(), RemoteError> {
    let reason = if identity.measurement().is_empty() {
        "empty measurement"
    } else if identity.field().is_empty() {
        "empty field"
    } else if identity.tags().iter().any(|(k, v)| k.is_empty() || v.is_empty()) {
        "empty tag"
    } else {
        return Ok(());
    };
    Err(RemoteError::InvalidSeries {
        key: identity.key(),
        reason,
    })
}

/// Appends one line for `row` to `buf`.
///
/// Returns false, leaving `buf` untouched, when the value is not finite
/// (line protocol has no representation for NaN or infinity) or the
/// identity fails [`check_identity`].
pub fn write_row(buf: &mut String, row: &Row) -> bool {
    if !row.value.is_finite() || check_identity(&row.identity).is_err() {
        return false;
    }
    let identity = &row.identity;
    // fmt::Write for String never fails.
    let _ = write!(buf, "{}", escape(identity.measurement(), COMMA_SPACE));
    for (key, value) in identity.tags() {
        let _ = write!(
            buf,
            ",{}={}",
            escape(key, COMMA_EQ_SPACE),
            escape(value, COMMA_EQ_SPACE)
        );
    }
    let _ = writeln!(
        buf,
        " {}={} {}",
        escape(identity.field(), COMMA_EQ_SPACE),
        row.value,
        row.timestamp
    );
    true
}

/// Renders rows into a line protocol body, skipping rows [`write_row`] refuses.
pub fn render(rows: &[Row]) -> String {
    let mut buf = String::with_capacity(rows.len() * 48);
    for row in rows {
        write_row(&mut buf, row);
    }
    buf
}
