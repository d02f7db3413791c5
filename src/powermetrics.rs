//! Read-only fan telemetry scraped from `powermetrics`.
//!
//! Used on machines where the SMC cannot be opened. The tool needs root and
//! its output format is not stable, so parsing is a heuristic: every line that
//! mentions both "fan" and "rpm" contributes each positive integer it contains,
//! in order, as one fan speed.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, warn};

use crate::error::ChannelError;

const SAMPLER_ARGS: [&str; 6] = ["-n", "1", "--samplers", "smc", "-i", "1"];

#[derive(Debug)]
pub struct PowermetricsSampler {
    program: PathBuf,
    speeds: Vec<u32>,
}

impl PowermetricsSampler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            speeds: Vec::new(),
        }
    }

    /// Runs the tool once and keeps the sampler only if that succeeded.
    pub fn probe(program: impl Into<PathBuf>) -> Result<Self, ChannelError> {
        let mut sampler = Self::new(program);
        sampler.refresh()?;
        Ok(sampler)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Samples once. Output without any fan speeds keeps the previous values.
    pub fn refresh(&mut self) -> Result<(), ChannelError> {
        let output = Command::new(&self.program)
            .args(SAMPLER_ARGS)
            .output()
            .map_err(|e| {
                ChannelError::Unavailable(format!("failed to run {}: {e}", self.program.display()))
            })?;

        if !output.status.success() {
            return Err(ChannelError::Unavailable(format!(
                "{} exited with {}",
                self.program.display(),
                output.status
            )));
        }

        self.ingest(&String::from_utf8_lossy(&output.stdout));
        Ok(())
    }

    pub fn fan_count(&self) -> usize {
        self.speeds.len()
    }

    pub fn fan_rpm(&self, index: usize) -> Option<u32> {
        self.speeds.get(index).copied()
    }

    fn ingest(&mut self, output: &str) {
        let speeds = parse_fan_speeds(output);
        if speeds.is_empty() {
            warn!("No fan speeds found in powermetrics output; keeping previous values");
        } else {
            debug!("powermetrics fan speeds: {speeds:?}");
            self.speeds = speeds;
        }
    }
}

/// Fan indices count as numbers too: `Fan 1: 1843 rpm` yields `[1, 1843]`.
/// Only positive integers are kept, so a `Fan 0` label is dropped.
pub fn parse_fan_speeds(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            lower.contains("fan") && lower.contains("rpm")
        })
        .flat_map(|line| {
            line.split(|c: char| !c.is_ascii_digit())
                .filter_map(|digits| digits.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "\
*** Sampled system activity (Mon Oct 12 10:00:00 2026) (1003.21ms elapsed) ***

**** SMC sensors ****

CPU die temperature: 48.12 C
Fan: 1843 rpm
Right fan: 2001 RPM
";

    #[test]
    fn picks_numbers_from_fan_rpm_lines() {
        assert_eq!(parse_fan_speeds(SAMPLE), vec![1843, 2001]);
    }

    #[test]
    fn numbered_labels_are_read_as_speeds() {
        assert_eq!(parse_fan_speeds("Fan 1: 1843 rpm\n"), vec![1, 1843]);
    }

    #[test]
    fn ignores_zero_and_unrelated_lines() {
        let text = "Fan 0: 0 rpm\nGPU die temperature: 51 C\nfan speed 1200 (rpm)\n";
        assert_eq!(parse_fan_speeds(text), vec![1200]);
    }

    #[test]
    fn empty_output_keeps_previous_speeds() {
        let mut sampler = PowermetricsSampler::new("/usr/bin/powermetrics");
        sampler.ingest(SAMPLE);
        sampler.ingest("nothing useful here\n");

        assert_eq!(sampler.fan_count(), 2);
        assert_eq!(sampler.fan_rpm(1), Some(2001));
        assert_eq!(sampler.fan_rpm(2), None);
    }

    #[test]
    fn probe_fails_for_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("powermetrics");
        assert!(matches!(
            PowermetricsSampler::probe(missing),
            Err(ChannelError::Unavailable(_))
        ));
    }
}
