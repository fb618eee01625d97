use crate::error::FormPostError;

/// One-shot outcome gate for a single request.
///
/// The first error recorded wins. Errors arriving after that are logged and
/// dropped, and the latch resolves exactly once because [`Latch::resolve`]
/// consumes it.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    error: Option<FormPostError>,
    suppressed: usize,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records `err` unless an earlier error already settled the request.
    /// Returns whether this call settled it.
    pub(crate) fn trip(&mut self, err: FormPostError) -> bool {
        if self.error.is_some() {
            self.suppressed += 1;
            tracing::warn!(error = %err, "suppressing error on settled request");
            return false;
        }

        tracing::debug!(error = %err, "request settled with error");
        self.error = Some(err);
        true
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.error.is_some()
    }

    /// Produces the single request outcome.
    pub(crate) fn resolve<T>(self, value: T) -> Result<T, FormPostError> {
        if self.suppressed > 0 {
            tracing::debug!(suppressed = self.suppressed, "secondary errors dropped");
        }
        match self.error {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }
}
