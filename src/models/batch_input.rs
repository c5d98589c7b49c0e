//! # Batch Input Parsing
//!
//! Turns the raw batch string handed to the driver into job descriptors.
//! Three forms are accepted:
//!
//! - a JSON array of structured descriptors
//!   `[{"id": "...", "source": {"bucket": "...", "key": "..."}, "destination": {...}, "parameters": {...}}]`
//!   (`id` and `parameters` optional)
//! - a JSON array of flat entries
//!   `[{"source_bucket": "...", "source_key": "...", "dest_bucket": "...", "dest_key": "..."}]`
//! - a comma-separated list of source keys, `a.jpg,b.png,folder/c.jpeg`, expanded
//!   with the default buckets. The destination key keeps the folder and
//!   prefixes the basename: `folder/c.jpeg` becomes `folder/enhanced_c.jpeg`.
//!
//! With no batch at all, [`BatchInput::resolve`] falls back to the single job
//! named by `[batch.single]`.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::job_descriptor::{JobDescriptor, JobId, Locator, INSTRUCTION_PARAMETER};
use crate::config::{BatchConfig, SingleJobConfig};
use crate::error::{ConveyorError, Result};

/// Values used to fill in what the raw input leaves out
#[derive(Debug, Clone, PartialEq)]
pub struct BatchDefaults {
    pub source_bucket: String,
    pub destination_bucket: String,
    pub destination_prefix: String,
    /// Applied to every job that does not carry its own instruction
    pub instruction: Option<String>,
}

impl BatchDefaults {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            source_bucket: config.source_bucket.clone(),
            destination_bucket: config.destination_bucket.clone(),
            destination_prefix: config.destination_prefix.clone(),
            instruction: Some(config.default_instruction.clone()),
        }
    }

    pub fn with_instruction(mut self, instruction: Option<String>) -> Self {
        if instruction.is_some() {
            self.instruction = instruction;
        }
        self
    }

    /// Destination key for a source key under the naming convention
    pub fn destination_key(&self, source_key: &str) -> String {
        let source = Locator::new(&self.source_bucket, source_key);
        match source.folder() {
            Some(folder) => format!("{folder}/{}{}", self.destination_prefix, source.basename()),
            None => format!("{}{}", self.destination_prefix, source.basename()),
        }
    }
}

impl Default for BatchDefaults {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

#[derive(Debug, Deserialize)]
struct StructuredEntry {
    id: Option<String>,
    source: Locator,
    destination: Locator,
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    source_bucket: String,
    source_key: String,
    dest_bucket: String,
    dest_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchEntry {
    Structured(StructuredEntry),
    Flat(FlatEntry),
}

impl BatchEntry {
    fn into_descriptor(self) -> JobDescriptor {
        match self {
            Self::Structured(entry) => JobDescriptor {
                id: entry.id.map(JobId::new).unwrap_or_else(JobId::generate),
                source: entry.source,
                destination: entry.destination,
                parameters: entry.parameters,
            },
            Self::Flat(entry) => JobDescriptor::new(
                Locator::new(entry.source_bucket, entry.source_key),
                Locator::new(entry.dest_bucket, entry.dest_key),
            ),
        }
    }
}

/// Parser for the driver's batch input
pub struct BatchInput;

impl BatchInput {
    /// Parse raw input into descriptors. Blank input yields an empty batch,
    /// which the dispatcher rejects.
    pub fn parse(input: &str, defaults: &BatchDefaults) -> Result<Vec<JobDescriptor>> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let mut jobs = if trimmed.starts_with('[') {
            Self::parse_json(trimmed)?
        } else {
            Self::parse_key_list(trimmed, defaults)
        };
        Self::apply_instruction(&mut jobs, defaults);
        Ok(jobs)
    }

    /// The job named by `single`, if it names a source key
    pub fn single(single: &SingleJobConfig, defaults: &BatchDefaults) -> Option<JobDescriptor> {
        let key = single.source_key.as_deref().map(str::trim).filter(|k| !k.is_empty())?;
        let source_bucket = single.source_bucket.as_ref().unwrap_or(&defaults.source_bucket);
        let destination_bucket = single
            .destination_bucket
            .as_ref()
            .unwrap_or(&defaults.destination_bucket);
        let destination_key = single
            .destination_key
            .clone()
            .unwrap_or_else(|| defaults.destination_key(key));

        let mut jobs = vec![JobDescriptor::new(
            Locator::new(source_bucket, key),
            Locator::new(destination_bucket, destination_key),
        )];
        Self::apply_instruction(&mut jobs, defaults);
        jobs.pop()
    }

    /// Jobs from the raw batch input, or the single configured job when the
    /// input is absent or blank
    pub fn resolve(
        input: Option<&str>,
        single: &SingleJobConfig,
        defaults: &BatchDefaults,
    ) -> Result<Vec<JobDescriptor>> {
        if let Some(input) = input.filter(|input| !input.trim().is_empty()) {
            return Self::parse(input, defaults);
        }
        Self::single(single, defaults).map(|job| vec![job]).ok_or_else(|| {
            ConveyorError::InvalidBatch(
                "no jobs given: set a batch input or a single source key".to_string(),
            )
        })
    }

    fn apply_instruction(jobs: &mut [JobDescriptor], defaults: &BatchDefaults) {
        if let Some(instruction) = &defaults.instruction {
            for job in jobs {
                job.parameters
                    .entry(INSTRUCTION_PARAMETER.to_string())
                    .or_insert_with(|| serde_json::Value::String(instruction.clone()));
            }
        }
    }

    fn parse_json(input: &str) -> Result<Vec<JobDescriptor>> {
        let entries: Vec<BatchEntry> = serde_json::from_str(input).map_err(|e| {
            ConveyorError::InvalidBatch(format!("batch input is not a valid job array: {e}"))
        })?;
        Ok(entries.into_iter().map(BatchEntry::into_descriptor).collect())
    }

    fn parse_key_list(input: &str, defaults: &BatchDefaults) -> Vec<JobDescriptor> {
        input
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| {
                JobDescriptor::new(
                    Locator::new(&defaults.source_bucket, key),
                    Locator::new(&defaults.destination_bucket, defaults.destination_key(key)),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> BatchDefaults {
        BatchDefaults {
            source_bucket: "source-bucket".to_string(),
            destination_bucket: "dest-bucket".to_string(),
            destination_prefix: "enhanced_".to_string(),
            instruction: None,
        }
    }

    #[test]
    fn test_comma_list_preserves_folders() {
        let jobs = BatchInput::parse("image1.jpg, folder/image3.jpeg ,,", &defaults()).unwrap();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].source, Locator::new("source-bucket", "image1.jpg"));
        assert_eq!(jobs[0].destination, Locator::new("dest-bucket", "enhanced_image1.jpg"));
        assert_eq!(
            jobs[1].destination,
            Locator::new("dest-bucket", "folder/enhanced_image3.jpeg")
        );
        assert_ne!(jobs[0].id, jobs[1].id);
    }

    #[test]
    fn test_flat_json_entries() {
        let input = r#"[{"source_bucket": "b1", "source_key": "x.jpg", "dest_bucket": "b2", "dest_key": "y.jpg"}]"#;
        let jobs = BatchInput::parse(input, &defaults()).unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].source, Locator::new("b1", "x.jpg"));
        assert_eq!(jobs[0].destination, Locator::new("b2", "y.jpg"));
    }

    #[test]
    fn test_structured_json_entries_keep_ids_and_parameters() {
        let input = r#"[{"id": "job-1", "source": {"bucket": "in", "key": "a.png"},
                        "destination": {"bucket": "out", "key": "a.png"},
                        "parameters": {"instruction": "sharpen"}}]"#;
        let defaults = defaults().with_instruction(Some("default".to_string()));
        let jobs = BatchInput::parse(input, &defaults).unwrap();

        assert_eq!(jobs[0].id, JobId::new("job-1"));
        assert_eq!(jobs[0].instruction(), Some("sharpen"));
    }

    #[test]
    fn test_default_instruction_fills_gaps() {
        let defaults = defaults().with_instruction(Some("brighten".to_string()));
        let jobs = BatchInput::parse("a.jpg", &defaults).unwrap();
        assert_eq!(jobs[0].instruction(), Some("brighten"));
    }

    #[test]
    fn test_single_job_fills_in_from_defaults() {
        let single = SingleJobConfig {
            source_key: Some("photos/cat.png".to_string()),
            ..SingleJobConfig::default()
        };
        let job = BatchInput::single(&single, &defaults()).unwrap();

        assert_eq!(job.source, Locator::new("source-bucket", "photos/cat.png"));
        assert_eq!(
            job.destination,
            Locator::new("dest-bucket", "photos/enhanced_cat.png")
        );

        let explicit = SingleJobConfig {
            source_bucket: Some("in".to_string()),
            source_key: Some("cat.png".to_string()),
            destination_bucket: Some("out".to_string()),
            destination_key: Some("done/cat.png".to_string()),
        };
        let job = BatchInput::single(&explicit, &defaults()).unwrap();
        assert_eq!(job.source, Locator::new("in", "cat.png"));
        assert_eq!(job.destination, Locator::new("out", "done/cat.png"));
    }

    #[test]
    fn test_resolve_falls_back_to_single_job() {
        let single = SingleJobConfig {
            source_key: Some("funny.png".to_string()),
            ..SingleJobConfig::default()
        };
        let defaults = defaults().with_instruction(Some("brighten".to_string()));

        let jobs = BatchInput::resolve(Some("  "), &single, &defaults).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].source.key, "funny.png");
        assert_eq!(jobs[0].instruction(), Some("brighten"));

        // A real batch wins over the single job
        let jobs = BatchInput::resolve(Some("a.png,b.png"), &single, &defaults).unwrap();
        assert_eq!(jobs.len(), 2);

        let error = BatchInput::resolve(None, &SingleJobConfig::default(), &defaults).unwrap_err();
        assert!(error.is_configuration());
    }

    #[test]
    fn test_blank_and_malformed_input() {
        assert!(BatchInput::parse("   ", &defaults()).unwrap().is_empty());

        let error = BatchInput::parse("[{\"source\": 1}]", &defaults()).unwrap_err();
        assert!(matches!(error, ConveyorError::InvalidBatch(_)));
    }
}
