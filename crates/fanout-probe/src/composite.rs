//! Ordered fallback across several probers.

use std::path::Path;

use fanout_core::{Error, Result};

use crate::prober::Prober;
use crate::types::MediaInfo;

/// Tries each [`Prober`] that claims the file, in order, and returns the
/// first success.
///
/// When every candidate fails the error names each prober and its reason,
/// so "header walker refused, ffprobe missing" is visible in one line.
pub struct CompositeProber {
    probers: Vec<Box<dyn Prober>>,
}

impl CompositeProber {
    pub fn new(probers: Vec<Box<dyn Prober>>) -> Self {
        Self { probers }
    }

    /// Append a fallback behind the existing probers.
    pub fn push(&mut self, prober: Box<dyn Prober>) {
        self.probers.push(prober);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.probers.iter().map(|p| p.name()).collect()
    }
}

impl Prober for CompositeProber {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn supports(&self, path: &Path) -> bool {
        self.probers.iter().any(|p| p.supports(path))
    }

    fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let mut reasons = Vec::new();

        for prober in self.probers.iter().filter(|p| p.supports(path)) {
            match prober.probe(path) {
                Ok(info) => {
                    tracing::debug!(prober = prober.name(), path = %path.display(), "probed");
                    return Ok(info);
                }
                Err(e) => {
                    tracing::debug!(prober = prober.name(), error = %e, "prober failed");
                    reasons.push(format!("{}: {}", prober.name(), probe_reason(e)));
                }
            }
        }

        if reasons.is_empty() {
            return Err(Error::Probe(format!(
                "unsupported container: {}",
                path.display()
            )));
        }
        Err(Error::Probe(reasons.join("; ")))
    }
}

/// The message without the `Probe error:` prefix when nesting.
fn probe_reason(error: Error) -> String {
    match error {
        Error::Probe(message) => message,
        other => other.to_string(),
    }
}
