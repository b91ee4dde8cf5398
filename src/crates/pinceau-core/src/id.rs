//! DAG identifiers of the form `template[variant]:job`.

use std::fmt;
use std::str::FromStr;

use crate::error::{DagError, Result};

/// Variant name equivalent to "no variant".
pub const DEFAULT_VARIANT: &str = "_default_";

/// Parsed DAG id.
///
/// - `template` groups every variant and run of one graph definition
/// - `variant` selects a persisted parameter set (`_default_` when absent)
/// - `job` marks an isolated run instance
///
/// ```rust
/// use pinceau_core::DagId;
///
/// let id: DagId = "report[weekly]:42".parse().unwrap();
/// assert_eq!(id.template(), "report");
/// assert_eq!(id.variant(), "weekly");
/// assert_eq!(id.job(), Some("42"));
/// assert_eq!(id.variant_id(), "report[weekly]");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DagId {
    template: String,
    variant: Option<String>,
    job: Option<String>,
}

impl DagId {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            variant: None,
            job: None,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Variant name, [`DEFAULT_VARIANT`] when none was given.
    pub fn variant(&self) -> &str {
        self.variant.as_deref().unwrap_or(DEFAULT_VARIANT)
    }

    pub fn is_default_variant(&self) -> bool {
        self.variant.is_none()
    }

    pub fn job(&self) -> Option<&str> {
        self.job.as_deref()
    }

    /// `template[variant]`, or just `template` for the default variant.
    pub fn variant_id(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}[{}]", self.template, variant),
            None => self.template.clone(),
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        let variant = variant.into();
        self.variant = (variant != DEFAULT_VARIANT && !variant.is_empty()).then_some(variant);
        self
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    /// Same template and variant with a fresh random job suffix.
    pub fn new_job(&self) -> Self {
        self.clone().with_job(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for DagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.variant_id())?;
        if let Some(job) = &self.job {
            write!(f, ":{job}")?;
        }
        Ok(())
    }
}

impl FromStr for DagId {
    type Err = DagError;

    fn from_str(s: &str) -> Result<Self> {
        let (head, job) = match s.split_once(':') {
            Some((head, job)) => (head, Some(job.to_string())),
            None => (s, None),
        };

        let (template, variant) = match head.find('[') {
            Some(open) => {
                let rest = &head[open + 1..];
                let variant = rest.strip_suffix(']').ok_or_else(|| {
                    DagError::validation(format!("DAG id '{s}' has an unterminated variant"))
                })?;
                (&head[..open], Some(variant))
            }
            None => (head, None),
        };

        if template.is_empty() {
            return Err(DagError::validation(format!(
                "DAG id '{s}' has an empty template"
            )));
        }

        let mut id = DagId::new(template);
        if let Some(variant) = variant {
            id = id.with_variant(variant);
        }
        id.job = job.filter(|job| !job.is_empty());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_template() {
        let id: DagId = "test".parse().unwrap();
        assert_eq!(id.template(), "test");
        assert_eq!(id.variant(), DEFAULT_VARIANT);
        assert!(id.is_default_variant());
        assert_eq!(id.job(), None);
        assert_eq!(id.to_string(), "test");
    }

    #[test]
    fn test_default_variant_normalizes_away() {
        let id: DagId = "test[_default_]:abc".parse().unwrap();
        assert!(id.is_default_variant());
        assert_eq!(id.to_string(), "test:abc");
    }

    #[test]
    fn test_new_job_keeps_variant() {
        let id: DagId = "test[fast]".parse().unwrap();
        let job = id.new_job();
        assert_eq!(job.variant_id(), "test[fast]");
        assert!(job.to_string().starts_with("test[fast]:"));
    }

    #[test]
    fn test_rejects_malformed_ids() {
        assert!("test[fast".parse::<DagId>().is_err());
        assert!("[fast]".parse::<DagId>().is_err());
    }
}
