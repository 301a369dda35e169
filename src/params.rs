//! The table of every parameter the firmware understands.
//!
//! The value 0 can never be sent, so "must-define" doubles as the sentinel for
//! a parameter that something (the rig file, the scheduler, the user) has to
//! supply before it is used.

use crate::error::{ArduError, Result};
use crate::trial_speak::{self, BoolParam};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The starting value of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamValue {
    /// Has to be supplied before use
    MustDefine,
    /// A sendable integer
    Value(i64),
}

impl From<BoolParam> for ParamValue {
    fn from(value: BoolParam) -> Self {
        match value {
            BoolParam::MustDefine => ParamValue::MustDefine,
            other => ParamValue::Value(other.code()),
        }
    }
}

/// One row of the [ParamsTable].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Abbreviation used on the wire, e.g. `RWSD`
    pub name: String,
    /// Value before anything else is sent
    pub init_val: ParamValue,
    /// Must be set on every trial (by the scheduler)
    #[serde(default)]
    pub required_on_every_trial: bool,
    /// The firmware echoes it as `TRLP` on every trial
    #[serde(default)]
    pub reported_on_every_trial: bool,
    /// Offered to the user for editing mid-session
    #[serde(default)]
    pub ui_accessible: bool,
    /// Expected to differ between rigs; overridden from the rig file
    #[serde(default)]
    pub rig_dependent: bool,
    /// Sent once, after the device boots and before the first trial
    #[serde(default)]
    pub send_on_init: bool,
    /// Whatever was last sent with `SET`
    #[serde(default)]
    pub current_value: Option<i64>,
}

impl ParamSpec {
    fn row(name: &str, init_val: ParamValue, flags: [bool; 5]) -> Self {
        let [required_on_every_trial, reported_on_every_trial, ui_accessible, rig_dependent, send_on_init] =
            flags;
        ParamSpec {
            name: name.to_owned(),
            init_val,
            required_on_every_trial,
            reported_on_every_trial,
            ui_accessible,
            rig_dependent,
            send_on_init,
            current_value: None,
        }
    }
}

/// Parameter abbreviation to [ParamSpec], owned by the trial setter for one
/// session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParamsTable {
    params: BTreeMap<String, ParamSpec>,
}

impl ParamsTable {
    /// Build a table from rows. Later rows replace earlier ones with the same
    /// name.
    pub fn new(rows: impl IntoIterator<Item = ParamSpec>) -> Self {
        ParamsTable {
            params: rows.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    /// The two-alternative choice table.
    pub fn standard() -> Self {
        use ParamValue::Value as V;
        const MD: ParamValue = ParamValue::MustDefine;
        const NO: ParamValue = ParamValue::Value(trial_speak::NO);
        const YES: ParamValue = ParamValue::Value(trial_speak::YES);
        const T: bool = true;
        const F: bool = false;

        Self::new([
            ParamSpec::row("STPPOS", MD, [T, T, F, F, F]),
            ParamSpec::row("RWSD", MD, [T, T, F, F, F]),
            ParamSpec::row("SRVPOS", MD, [T, T, F, F, F]),
            ParamSpec::row("ISRND", NO, [T, T, F, F, F]),
            ParamSpec::row("RD_L", MD, [F, F, T, T, T]),
            ParamSpec::row("RD_R", MD, [F, F, T, T, T]),
            ParamSpec::row("ITI", V(50), [F, F, T, F, T]),
            ParamSpec::row("PSW", V(1), [F, F, F, F, F]),
            ParamSpec::row("TO", V(9000), [F, F, T, F, T]),
            ParamSpec::row("TOE", YES, [F, F, T, F, T]),
            ParamSpec::row("MRT", V(1), [F, F, T, F, T]),
            ParamSpec::row("STPSPD", MD, [F, F, F, T, T]),
            ParamSpec::row("STPFR", V(50), [F, F, F, T, T]),
            ParamSpec::row("2PSTP", MD, [F, F, F, T, T]),
            ParamSpec::row("SRVST", V(1000), [F, F, F, T, F]),
            ParamSpec::row("STPIP", V(50), [F, F, F, T, T]),
            ParamSpec::row("SRVFAR", V(1900), [F, F, F, T, T]),
            ParamSpec::row("SRVTT", MD, [F, F, F, T, T]),
            ParamSpec::row("RWIN", V(45000), [F, F, T, F, T]),
            ParamSpec::row("IRI", V(500), [F, F, F, F, F]),
            ParamSpec::row("TOUT", V(6), [F, F, T, T, T]),
            ParamSpec::row("RELT", V(6), [F, F, T, T, T]),
            ParamSpec::row("STPHAL", MD, [F, F, F, T, T]),
            ParamSpec::row("HALPOS", MD, [F, F, F, T, T]),
            ParamSpec::row("DIRDEL", NO, [T, T, F, F, F]),
            ParamSpec::row("OPTO", NO, [T, T, F, F, F]),
        ])
    }

    /// A row by wire name.
    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.get(name)
    }

    /// Rows in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.values()
    }

    /// Record that `value` was sent for `name`. This is also how a UI changes
    /// a value mid-session.
    pub fn set_current(&mut self, name: &str, value: i64) -> Result<()> {
        let spec = self
            .params
            .get_mut(name)
            .ok_or_else(|| ArduError::Config(format!("no parameter named {}", name)))?;
        spec.current_value = Some(value);
        Ok(())
    }

    /// Replace the starting values of rig-specific parameters.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, i64>) -> Result<()> {
        for (name, value) in overrides {
            let spec = self
                .params
                .get_mut(name)
                .ok_or_else(|| ArduError::Config(format!("cannot find param named {}", name)))?;
            spec.init_val = ParamValue::Value(*value);
        }
        Ok(())
    }

    /// Fails if any parameter that is sent on init is still must-define.
    pub fn validate_for_session(&self) -> Result<()> {
        match self
            .iter()
            .find(|p| p.send_on_init && p.init_val == ParamValue::MustDefine)
        {
            Some(p) => Err(ArduError::invalid_value(
                p.name.clone(),
                "must be defined before the session starts",
            )),
            None => Ok(()),
        }
    }

    /// Fails if a must-define parameter has neither been sent before nor is
    /// about to be, in `supplied`.
    pub fn check_defined(&self, supplied: &BTreeMap<String, i64>) -> Result<()> {
        match self.iter().find(|p| {
            p.init_val == ParamValue::MustDefine
                && p.current_value.is_none()
                && !supplied.contains_key(&p.name)
        }) {
            Some(p) => Err(ArduError::invalid_value(
                p.name.clone(),
                "must-define parameter was never supplied",
            )),
            None => Ok(()),
        }
    }

    /// `SET` commands for every send-on-init parameter, marking each as sent.
    /// Nothing is marked if any of them cannot be encoded.
    pub fn initial_commands(&mut self) -> Result<Vec<String>> {
        let mut sets = Vec::new();
        for spec in self.params.values().filter(|p| p.send_on_init) {
            let value = match spec.init_val {
                ParamValue::Value(v) => v,
                ParamValue::MustDefine => {
                    return Err(ArduError::invalid_value(
                        spec.name.clone(),
                        "must-define parameter was never supplied",
                    ))
                }
            };
            sets.push((spec.name.clone(), trial_speak::format_set(&spec.name, value)?, value));
        }

        Ok(sets
            .into_iter()
            .map(|(name, cmd, value)| {
                if let Some(spec) = self.params.get_mut(&name) {
                    spec.current_value = Some(value);
                }
                cmd
            })
            .collect())
    }
}
