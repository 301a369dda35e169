//! TrialSpeak, the line protocol spoken between the host and the rig.
//!
//! Every line the device prints has the shape `<time_ms> <command>
//! [<argument...>]`. The host only ever sends two kinds of line: `SET <PARAM>
//! <INT>` and `RELEASE_TRL`. This module is pure: it formats outgoing commands
//! and picks incoming lines apart, and never touches a device or a file.
//!
//! Lines that do not parse are skipped. A live serial stream is routinely
//! truncated at the start of a session, so a garbled line is not an error.

use crate::error::{ArduError, Result};
use log::debug;
use nom::{
    bytes::complete::take_till1,
    character::complete::{space1, u64},
    combinator::{opt, rest},
    sequence::{preceded, tuple},
    IResult,
};
use std::collections::BTreeMap;

/// Prefix of the device's echo of every line it receives
pub const ACK: &str = "ACK";
/// Host to device: go ahead with the next trial
pub const RELEASE_TRIAL: &str = "RELEASE_TRL";
/// Device to host: the trial has been released and is running
pub const TRIAL_RELEASED: &str = "TRL_RELEASED";
/// Device to host: a new trial is being set up
pub const TRIAL_START: &str = "TRL_START";
/// Device to host: a parameter of the current trial
pub const TRIAL_PARAM: &str = "TRLP";
/// Device to host: a result of the current trial
pub const TRIAL_RESULT: &str = "TRLR";
/// Device to host: the firmware state machine moved
pub const STATE_CHANGE: &str = "ST_CHG";
/// Device to host: something happened, e.g. a lick
pub const EVENT: &str = "EVENT";

/// Wire codes for responses (`RESP`) and reward sides (`RWSD`). These must
/// match the firmware.
pub const LEFT: i64 = 1;
/// Right side
pub const RIGHT: i64 = 2;
/// No response (responses only)
pub const NOGO: i64 = 3;

/// Wire codes for outcomes (`OUTC`), assuming two-alternative choice.
pub const HIT: i64 = 1;
/// Wrong side
pub const ERROR: i64 = 2;
/// Spoiled
pub const SPOIL: i64 = 3;

/// Wire codes for tri-state booleans.
pub const YES: i64 = 3;
/// No
pub const NO: i64 = 2;
/// Never sent; marks a value still to be supplied
pub const MUST_DEFINE: i64 = 0;

/// Boolean parameters are sent as one of these, because `0` cannot be
/// transmitted: the firmware's string-to-int conversion returns 0 on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BoolParam {
    /// Sent as 3
    Yes,
    /// Sent as 2
    No,
    /// Has to be supplied before it is used; never sent.
    MustDefine,
}

impl BoolParam {
    /// The integer that represents this value in a log or a `SET` command.
    pub fn code(self) -> i64 {
        match self {
            BoolParam::Yes => YES,
            BoolParam::No => NO,
            BoolParam::MustDefine => MUST_DEFINE,
        }
    }

    /// Inverse of [BoolParam::code]. Anything else is not a tri-state value.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            YES => Some(BoolParam::Yes),
            NO => Some(BoolParam::No),
            MUST_DEFINE => Some(BoolParam::MustDefine),
            _ => None,
        }
    }
}

impl From<bool> for BoolParam {
    fn from(value: bool) -> Self {
        if value {
            BoolParam::Yes
        } else {
            BoolParam::No
        }
    }
}

/// One line of TrialSpeak, borrowed from the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLine<'a> {
    /// Device clock in milliseconds
    pub time_ms: u64,
    /// The command token, no whitespace
    pub command: &'a str,
    /// The rest of the line after the command, if any
    pub argument: Option<&'a str>,
}

impl LogLine<'_> {
    /// The device time of this line, in seconds.
    pub fn time_s(&self) -> f64 {
        self.time_ms as f64 / 1000.0
    }
}

fn parse_log_line(s: &str) -> IResult<&str, LogLine<'_>> {
    let (remaining, (time_ms, _, command, argument)) = tuple((
        u64,
        space1,
        take_till1(|c: char| c.is_whitespace()),
        opt(preceded(space1, rest)),
    ))(s)?;

    let argument = argument.map(str::trim).filter(|a| !a.is_empty());
    Ok((
        remaining,
        LogLine {
            time_ms,
            command,
            argument,
        },
    ))
}

/// Parse one raw line. Returns `None` for anything that does not start with
/// a non-negative integer, whitespace, and a command token.
pub fn parse_line(line: &str) -> Option<LogLine<'_>> {
    match parse_log_line(line.trim()) {
        Ok((_, parsed)) => Some(parsed),
        Err(_) => {
            debug!("dropping malformed line {:?}", line);
            None
        }
    }
}

/// Format the command that sets `param_name` to `value` for the next trial.
pub fn format_set(param_name: &str, value: i64) -> Result<String> {
    if param_name.is_empty() || param_name.contains(char::is_whitespace) {
        return Err(ArduError::invalid_value(
            param_name,
            "parameter names must be a single token",
        ));
    }
    if value == 0 {
        return Err(ArduError::invalid_value(
            param_name,
            "zero is reserved as the unset value and cannot be sent",
        ));
    }
    Ok(format!("SET {} {}", param_name, value))
}

/// The command that lets the device begin the next trial.
pub fn format_release() -> &'static str {
    RELEASE_TRIAL
}

/// Split raw lines into per-trial groups.
///
/// The first group is always present and holds whatever came before the first
/// `TRL_START` (setup chatter, possibly nothing). Each later group begins with
/// its `TRL_START` line. Malformed lines stay in whatever group they fall in
/// and are dropped by the extractors.
pub fn split_into_trials<S: AsRef<str>>(lines: &[S]) -> Vec<&[S]> {
    let mut starts = vec![0];
    starts.extend(lines.iter().enumerate().filter_map(|(i, line)| {
        match parse_line(line.as_ref()) {
            Some(parsed) if parsed.command == TRIAL_START => Some(i),
            _ => None,
        }
    }));
    starts.push(lines.len());

    starts.windows(2).map(|w| &lines[w[0]..w[1]]).collect()
}

fn extract_pairs<S: AsRef<str>>(lines: &[S], command: &str) -> BTreeMap<String, i64> {
    let mut pairs = BTreeMap::new();
    for parsed in lines.iter().filter_map(|l| parse_line(l.as_ref())) {
        if parsed.command != command {
            continue;
        }
        let mut words = parsed.argument.unwrap_or("").split_whitespace();
        match (words.next(), words.next().map(str::parse::<i64>), words.next()) {
            (Some(name), Some(Ok(value)), None) => {
                // first occurrence is authoritative
                pairs.entry(name.to_lowercase()).or_insert(value);
            }
            _ => debug!("dropping malformed {} argument {:?}", command, parsed.argument),
        }
    }
    pairs
}

/// Every `TRLP <NAME> <VALUE>` in the trial, keyed by the lower-cased name.
pub fn extract_parameters<S: AsRef<str>>(trial_lines: &[S]) -> BTreeMap<String, i64> {
    extract_pairs(trial_lines, TRIAL_PARAM)
}

/// Every `TRLR <NAME> <VALUE>` in the trial, keyed by the lower-cased name.
pub fn extract_results<S: AsRef<str>>(trial_lines: &[S]) -> BTreeMap<String, i64> {
    extract_pairs(trial_lines, TRIAL_RESULT)
}

/// Start and release times of a trial, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrialTiming {
    /// Time of `TRL_START`
    pub start: Option<f64>,
    /// Time of `TRL_RELEASED`, if the device has released the trial yet
    pub release: Option<f64>,
}

fn unique_time<S: AsRef<str>>(lines: &[S], command: &str) -> Result<Option<f64>> {
    let mut times = lines
        .iter()
        .filter_map(|l| parse_line(l.as_ref()))
        .filter(|parsed| parsed.command == command)
        .map(|parsed| parsed.time_s());

    let first = times.next();
    if let Some(second) = times.next() {
        return Err(ArduError::violation(format!(
            "{} appears more than once in one trial (at {}s and {}s)",
            command,
            first.unwrap_or_default(),
            second
        )));
    }
    Ok(first)
}

/// Pull the `TRL_START` and `TRL_RELEASED` times out of one trial's lines.
/// Either appearing twice is a protocol violation.
pub fn extract_timing<S: AsRef<str>>(trial_lines: &[S]) -> Result<TrialTiming> {
    Ok(TrialTiming {
        start: unique_time(trial_lines, TRIAL_START)?,
        release: unique_time(trial_lines, TRIAL_RELEASED)?,
    })
}

/// Time in seconds of the first `ST_CHG <state0> <state1>` in the trial.
pub fn state_change_time<S: AsRef<str>>(trial_lines: &[S], state0: u32, state1: u32) -> Option<f64> {
    trial_lines
        .iter()
        .filter_map(|l| parse_line(l.as_ref()))
        .filter(|parsed| parsed.command == STATE_CHANGE)
        .find(|parsed| {
            let mut states = parsed
                .argument
                .unwrap_or("")
                .split_whitespace()
                .map(str::parse::<u32>);
            matches!(
                (states.next(), states.next()),
                (Some(Ok(s0)), Some(Ok(s1))) if s0 == state0 && s1 == state1
            )
        })
        .map(|parsed| parsed.time_s())
}

/// Times in seconds of every `EVENT <name>` line, e.g. `TOUCHED 1` for licks
/// on the left port.
pub fn event_times<S: AsRef<str>>(trial_lines: &[S], name: &str) -> Vec<f64> {
    trial_lines
        .iter()
        .filter_map(|l| parse_line(l.as_ref()))
        .filter(|parsed| parsed.command == EVENT && parsed.argument == Some(name))
        .map(|parsed| parsed.time_s())
        .collect()
}

/// Whether the device acknowledged a `RELEASE_TRL` somewhere in these lines.
pub fn is_release_acked<S: AsRef<str>>(trial_lines: &[S]) -> bool {
    trial_lines
        .iter()
        .filter_map(|l| parse_line(l.as_ref()))
        .any(|parsed| parsed.command == ACK && parsed.argument == Some(RELEASE_TRIAL))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_line() {
        let parsed = parse_line("5000 TRLR OUTC 1\n").unwrap();
        assert_eq!(
            parsed,
            LogLine {
                time_ms: 5000,
                command: "TRLR",
                argument: Some("OUTC 1"),
            }
        );
        assert_eq!(parsed.time_s(), 5.0);
    }

    #[test]
    fn parse_line_without_argument() {
        let parsed = parse_line("0 TRL_START\r\n").unwrap();
        assert_eq!(parsed.command, "TRL_START");
        assert_eq!(parsed.argument, None);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("TRL_START"), None);
        assert_eq!(parse_line("-5 TRL_START"), None);
        assert_eq!(parse_line("12"), None);
        assert_eq!(parse_line("12x TRL_START"), None);
        assert_eq!(parse_line("comm error in setup"), None);
    }

    #[test]
    fn set_refuses_zero() {
        for name in ["RWSD", "STPPOS", "ISRND", "X"] {
            assert!(matches!(
                format_set(name, 0),
                Err(ArduError::InvalidParameterValue { .. })
            ));
        }
        assert_eq!(format_set("RWSD", 1).unwrap(), "SET RWSD 1");
        assert_eq!(format_set("SRVPOS", -20).unwrap(), "SET SRVPOS -20");
    }

    #[test]
    fn set_refuses_bad_names() {
        assert!(format_set("", 3).is_err());
        assert!(format_set("RW SD", 3).is_err());
    }

    #[test]
    fn release_literal() {
        assert_eq!(format_release(), "RELEASE_TRL");
    }

    #[test]
    fn split_keeps_setup_group() {
        let lines = [
            "0 DBG begin setup",
            "10 TRL_START",
            "11 TRLP RWSD 1",
            "20 TRL_START",
        ];
        let groups = split_into_trials(&lines);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0], &["0 DBG begin setup"]);
        assert_eq!(groups[1], &["10 TRL_START", "11 TRLP RWSD 1"]);
        assert_eq!(groups[2], &["20 TRL_START"]);

        let empty: [&str; 0] = [];
        assert_eq!(split_into_trials(&empty).len(), 1);

        let starts_immediately = ["0 TRL_START"];
        let groups = split_into_trials(&starts_immediately);
        assert_eq!(groups.len(), 2);
        assert!(groups[0].is_empty());
    }

    #[test]
    fn parameters_are_lowercased_and_first_wins() {
        let lines = [
            "0 TRL_START",
            "1 TRLP RWSD 2",
            "1 TRLP STPPOS 50",
            "1 TRLP RWSD 1",
            "1 TRLP BROKEN",
            "2 TRLR OUTC 1",
        ];
        let params = extract_parameters(&lines);
        assert_eq!(params.len(), 2);
        assert_eq!(params["rwsd"], 2);
        assert_eq!(params["stppos"], 50);
        assert_eq!(extract_results(&lines)["outc"], 1);
    }

    #[test]
    fn timing_and_duplicates() {
        let lines = ["0 TRL_START", "20 TRL_RELEASED"];
        let timing = extract_timing(&lines).unwrap();
        assert_eq!(timing.start, Some(0.0));
        assert_eq!(timing.release, Some(0.02));

        let twice = ["0 TRL_START", "20 TRL_RELEASED", "30 TRL_RELEASED"];
        assert!(matches!(
            extract_timing(&twice),
            Err(ArduError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn ack_round_trip() {
        let cmd = format_set("STPPOS", 150).unwrap();
        let lines = vec![
            "100 TRL_START".to_owned(),
            format!("101 ACK {}", cmd),
            "102 TRLP STPPOS 150".to_owned(),
        ];
        let groups = split_into_trials(&lines);
        assert_eq!(extract_parameters(groups[1])["stppos"], 150);
    }

    #[test]
    fn state_changes_and_events() {
        let lines = [
            "0 TRL_START",
            "100 ST_CHG 1 2",
            "150 EVENT TOUCHED 1",
            "200 ST_CHG 1 2",
            "250 EVENT TOUCHED 2",
            "300 EVENT TOUCHED 1",
            "400 ACK RELEASE_TRL",
        ];
        assert_eq!(state_change_time(&lines, 1, 2), Some(0.1));
        assert_eq!(state_change_time(&lines, 3, 4), None);
        assert_eq!(event_times(&lines, "TOUCHED 1"), vec![0.15, 0.3]);
        assert!(is_release_acked(&lines));
        assert!(!is_release_acked(&lines[..3]));
    }

    #[test]
    fn bool_codes() {
        assert_eq!(BoolParam::Yes.code(), 3);
        assert_eq!(BoolParam::No.code(), 2);
        assert_eq!(BoolParam::MustDefine.code(), 0);
        assert_eq!(BoolParam::from_code(3), Some(BoolParam::Yes));
        assert_eq!(BoolParam::from_code(1), None);
        assert_eq!(BoolParam::from(false), BoolParam::No);
    }
}
