//! Compact, single-line formatting of error chains for logging

use std::error::Error;
use std::fmt;

/// Displays an error followed by all its sources: `outer: inner: root`
pub struct FmtCompactError<'e, E>(&'e E);

impl<E> fmt::Display for FmtCompactError<'_, E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.0, f)?;

        let mut source = self.0.source();
        while let Some(err) = source {
            f.write_str(": ")?;
            fmt::Display::fmt(err, f)?;
            source = err.source();
        }
        Ok(())
    }
}

pub trait FmtCompact<'e> {
    type Report: fmt::Display + 'e;

    fn fmt_compact(self) -> Self::Report;
}

impl<'e, E> FmtCompact<'e> for &'e E
where
    E: Error + 'e,
{
    type Report = FmtCompactError<'e, E>;

    fn fmt_compact(self) -> Self::Report {
        FmtCompactError(self)
    }
}
