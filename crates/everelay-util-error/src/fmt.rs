use std::error::Error as StdError;
use std::fmt;

/// Formats an error and its full `source()` chain on a single line.
///
/// `tracing` fields are one-shot and do not expand `Debug`/`Display`
/// recursively the way `anyhow`'s `{:#}` does, so without this a
/// `tracing::error!(err = %e, ...)` only prints the outermost error,
/// silently dropping the cause chain that usually carries the actually
/// useful detail.
pub trait FmtCompact {
    fn fmt_compact(&self) -> FmtCompactDisplay<'_>;
}

impl<E> FmtCompact for E
where
    E: StdError,
{
    fn fmt_compact(&self) -> FmtCompactDisplay<'_> {
        FmtCompactDisplay(self)
    }
}

pub struct FmtCompactDisplay<'a>(&'a dyn StdError);

impl fmt::Display for FmtCompactDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut cur = self.0.source();
        while let Some(source) = cur {
            write!(f, ": {source}")?;
            cur = source.source();
        }
        Ok(())
    }
}
