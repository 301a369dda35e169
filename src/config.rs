//! Rig and session settings, read from a `ron` file.
//!
//! ```ron
//! (
//!     serial_port: Some("/dev/ttyACM0"),
//!     rig_overrides: {"RD_L": 60, "RD_R": 50, "SRVTT": 2000},
//!     scheduler: Auto((n_trials_sticky: 10)),
//! )
//! ```
//!
//! Every field has a default, so a file only lists what differs.

use crate::chatter::default_log_path;
use crate::error::{ArduError, Result};
use crate::params::{ParamSpec, ParamsTable};
use crate::scheduler::{AutoConfig, Scheduler, SchedulerKind, TrialType};
use crate::trial_matrix::Side;
use crate::trial_speak::BoolParam;
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, path::PathBuf, time::Duration};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Everything needed to start a session on one rig.
pub struct SessionConfig {
    /// Asked for interactively if absent
    pub serial_port: Option<String>,
    /// Serial speed
    pub baud_rate: u32,
    /// How long a device read may block
    pub read_timeout_ms: u64,
    /// Waited once before and once after flushing the port's boot noise
    pub settle_ms: u64,
    /// Defaults to a timestamped file in `log_dir`
    pub logfile: Option<PathBuf>,
    /// Where timestamped logfiles go
    pub log_dir: PathBuf,
    /// Replaces the standard parameter table entirely
    pub params: Option<Vec<ParamSpec>>,
    /// Starting values for this rig, applied on top of `params`
    pub rig_overrides: BTreeMap<String, i64>,
    /// Rows the scheduler picks from
    pub trial_types: Vec<TrialType>,
    /// The policy the session starts with
    pub scheduler: SchedulerKind,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            serial_port: None,
            baud_rate: 115200,
            read_timeout_ms: 10,
            settle_ms: 1000,
            logfile: None,
            log_dir: PathBuf::from("."),
            params: None,
            rig_overrides: BTreeMap::new(),
            trial_types: default_trial_types(),
            scheduler: SchedulerKind::default(),
        }
    }
}

/// Two stimulus positions on each side.
fn default_trial_types() -> Vec<TrialType> {
    let row = |rewside: Side, srvpos: i64| {
        let (shape, stppos) = match rewside {
            Side::Left => ("CV", 50),
            Side::Right => ("CC", 150),
        };
        TrialType {
            name: format!("{}-{}-{}-{:03}", shape, rewside, srvpos, stppos),
            rewside,
            srvpos,
            stppos,
        }
    };
    vec![
        row(Side::Left, 1150),
        row(Side::Right, 1150),
        row(Side::Left, 1175),
        row(Side::Right, 1175),
    ]
}

impl SessionConfig {
    /// Read a rig file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ArduError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_ron(&text)
    }

    /// Parse a rig file from text.
    pub fn from_ron(text: &str) -> Result<Self> {
        Ok(ron::from_str(text)?)
    }

    /// Pretty-printed, for use as a template.
    pub fn to_ron(&self) -> Result<String> {
        Ok(ron::ser::to_string_pretty(self, PrettyConfig::default())?)
    }

    /// Settings for running against the simulated rig: made-up calibration
    /// and the short auto scheduler thresholds.
    pub fn simulation() -> Self {
        let rig_overrides = [
            ("STPSPD", 30),
            ("2PSTP", BoolParam::No.code()),
            ("SRVTT", 2000),
            ("RD_L", 60),
            ("RD_R", 50),
            ("STPHAL", BoolParam::Yes.code()),
            ("HALPOS", 150),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect();

        SessionConfig {
            settle_ms: 0,
            rig_overrides,
            scheduler: SchedulerKind::Auto(AutoConfig::debug()),
            ..Default::default()
        }
    }

    /// The parameter table with rig overrides applied and checked.
    pub fn params_table(&self) -> Result<ParamsTable> {
        let mut table = match &self.params {
            Some(rows) => ParamsTable::new(rows.iter().cloned()),
            None => ParamsTable::standard(),
        };
        table.apply_overrides(&self.rig_overrides)?;
        table.validate_for_session()?;
        Ok(table)
    }

    /// The starting scheduler, over `trial_types`.
    pub fn build_scheduler(&self) -> Result<Box<dyn Scheduler>> {
        self.scheduler.build(self.trial_types.clone())
    }

    /// The configured logfile, or a timestamped one in `log_dir`.
    pub fn log_path(&self) -> PathBuf {
        self.logfile
            .clone()
            .unwrap_or_else(|| default_log_path(&self.log_dir))
    }

    /// Read timeout as a [Duration].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Settle delay as a [Duration].
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;

    #[test]
    fn empty_file_gives_defaults() {
        let config = SessionConfig::from_ron("()").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.trial_types.len(), 4);
        assert_eq!(config.trial_types[0].name, "CV-left-1150-050");
    }

    #[test]
    fn rig_file_overrides() {
        let config = SessionConfig::from_ron(
            r#"(
                serial_port: Some("/dev/ttyACM1"),
                rig_overrides: {"RD_L": 60, "RD_R": 50, "SRVTT": 2000, "STPSPD": 30,
                                "2PSTP": 2, "STPHAL": 3, "HALPOS": 150},
                scheduler: ForcedSide(Right),
            )"#,
        )
        .unwrap();
        assert_eq!(config.serial_port.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(config.scheduler, SchedulerKind::ForcedSide(Side::Right));

        let table = config.params_table().unwrap();
        assert_eq!(table.get("RD_L").unwrap().init_val, ParamValue::Value(60));
        assert!(config.build_scheduler().is_ok());
    }

    #[test]
    fn missing_calibration_is_a_config_problem() {
        let config = SessionConfig::default();
        assert!(matches!(
            config.params_table(),
            Err(ArduError::InvalidParameterValue { .. })
        ));

        let typo = SessionConfig::from_ron(r#"(rig_overrides: {"RDL": 60})"#).unwrap();
        assert!(matches!(typo.params_table(), Err(ArduError::Config(_))));

        assert!(matches!(
            SessionConfig::from_ron("(baud_rate: \"fast\")"),
            Err(ArduError::Config(_))
        ));
    }

    #[test]
    fn survives_a_round_trip_through_ron() {
        let config = SessionConfig::simulation();
        let text = config.to_ron().unwrap();
        assert_eq!(SessionConfig::from_ron(&text).unwrap(), config);
    }

    #[test]
    fn explicit_logfile_wins() {
        let mut config = SessionConfig::default();
        assert!(config
            .log_path()
            .to_string_lossy()
            .contains("ardulines."));
        config.logfile = Some(PathBuf::from("/tmp/session.log"));
        assert_eq!(config.log_path(), PathBuf::from("/tmp/session.log"));
    }

    #[test]
    fn shipped_rig_file_parses() {
        let config = SessionConfig::from_ron(include_str!("../config/rig_L1.ron")).unwrap();
        assert!(config.params_table().is_ok());
        assert!(config.build_scheduler().is_ok());
    }
}
