// In-memory job catalog built from the configuration at startup

use crate::errors::ValidationError;
use crate::models::Job;
use std::collections::HashMap;
use tracing::info;

/// Immutable set of configured jobs, looked up by id for every run request.
#[derive(Default)]
pub struct JobCatalog {
    jobs: HashMap<String, Job>,
}

impl JobCatalog {
    /// Build the catalog, rejecting duplicate ids and invalid configs up
    /// front so a bad job never waits until its first run to fail.
    pub fn new(jobs: Vec<Job>) -> Result<Self, ValidationError> {
        let mut map = HashMap::with_capacity(jobs.len());
        for job in jobs {
            job.config.validate(job.provider)?;
            let id = job.id.clone();
            if map.insert(id.clone(), job).is_some() {
                return Err(ValidationError::InvalidSettings(format!(
                    "duplicate job id: {}",
                    id
                )));
            }
        }
        info!(count = map.len(), "Job catalog loaded");
        Ok(Self { jobs: map })
    }

    pub fn resolve(&self, id: &str) -> Result<&Job, ValidationError> {
        self.jobs
            .get(id)
            .ok_or_else(|| ValidationError::JobNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }
}
