//! Pipeline description and state file handling.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use psabpf_meter::{Pipeline, PipelineDescription, PipelineState};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{unix_now_ns, MonotonicClock};

/// Reads a pipeline description. Files ending in `.json` are parsed as
/// JSON, anything else as YAML.
pub fn load_description(path: &Path) -> Result<PipelineDescription> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline description {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let description: PipelineDescription = if is_json {
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?
    } else {
        serde_yaml::from_str(&text)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?
    };
    description
        .validate()
        .with_context(|| format!("Invalid pipeline description {}", path.display()))?;
    Ok(description)
}

/// On-disk state kept between invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    /// Packet-path clock reading when the file was written.
    pub clock_ns: u64,
    /// Wall-clock time when the file was written.
    pub saved_at_unix_ns: u64,
    /// Records, entries and tallies.
    pub pipeline: PipelineState,
}

impl StateFile {
    /// Reads a state file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read state file {} (run `meterctl init` first)",
                path.display()
            )
        })?;
        serde_json::from_str(&text).with_context(|| format!("Corrupt state file {}", path.display()))
    }

    /// Writes the state file, replacing it atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to encode state")?;
        let tmp = tmp_path(path);
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace state file {}", path.display()))?;
        debug!("State saved to {}", path.display());
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// A loaded pipeline, its clock, and where its state lives.
#[derive(Debug)]
pub struct Session {
    pipeline: Pipeline,
    clock: MonotonicClock,
    state_path: PathBuf,
}

impl Session {
    /// Builds an unconfigured pipeline whose state will be written to
    /// `state_path`. Refuses to clobber existing state unless `force` is set.
    pub fn create(description: &Path, state_path: &Path, force: bool) -> Result<Self> {
        if state_path.exists() && !force {
            bail!(
                "State file {} already exists (use --force to overwrite)",
                state_path.display()
            );
        }
        let description = load_description(description)?;
        let pipeline = Pipeline::from_description(&description)?;
        info!("Initialized state file {}", state_path.display());
        Ok(Self {
            pipeline,
            clock: MonotonicClock::new(),
            state_path: state_path.to_path_buf(),
        })
    }

    /// Builds the pipeline and loads the saved state into it.
    pub fn open(description: &Path, state_path: &Path) -> Result<Self> {
        let description = load_description(description)?;
        let pipeline = Pipeline::from_description(&description)?;
        let state = StateFile::load(state_path)?;
        pipeline
            .restore(&state.pipeline)
            .with_context(|| format!("State file {} does not match pipeline", state_path.display()))?;
        Ok(Self {
            pipeline,
            clock: MonotonicClock::resume(state.clock_ns, state.saved_at_unix_ns),
            state_path: state_path.to_path_buf(),
        })
    }

    /// Writes the current state back.
    pub fn save(&self) -> Result<()> {
        let state = StateFile {
            clock_ns: self.clock.now_ns(),
            saved_at_unix_ns: unix_now_ns(),
            pipeline: self.pipeline.snapshot(),
        };
        state.save(&self.state_path)
    }

    /// The loaded pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Current packet-path time.
    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    /// Records that a packet was metered at `now`, so the saved clock is
    /// never behind timestamps written into meter records.
    pub fn observe(&self, now: u64) {
        self.clock.advance_to(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tmp_path() {
        assert_eq!(
            tmp_path(Path::new("/var/run/meters.json")),
            PathBuf::from("/var/run/meters.json.tmp")
        );
    }

    #[test]
    fn test_description_formats() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("pipeline.yaml");
        fs::write(
            &yaml,
            "meters:\n  - name: ingress_meter1\n    capacity: 2\n    unit: PACKETS\n",
        )
        .unwrap();
        let json = dir.path().join("pipeline.json");
        fs::write(
            &json,
            r#"{"meters": [{"name": "ingress_meter1", "capacity": 2, "unit": "PACKETS"}]}"#,
        )
        .unwrap();

        assert_eq!(load_description(&yaml).unwrap(), load_description(&json).unwrap());
    }

    #[test]
    fn test_invalid_description_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        fs::write(&path, "meters:\n  - name: m\n    capacity: 0\n").unwrap();
        let err = load_description(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("capacity"));
    }
}
