//! ArduFSM drives behavioral training rigs built on an Arduino running a
//! trial state machine. The Arduino talks a small line protocol, TrialSpeak,
//! over a serial port: it reports the parameters and results of every trial,
//! and accepts `SET` and `RELEASE_TRL` commands from the host.
//!
//! This is the host side. It relays lines to and from the device and keeps
//! a verbatim log of everything received ([chatter]). It parses that log into
//! a per-trial table ([trial_matrix]), and picks the parameters of the next
//! trial with a pluggable [scheduler]. The [trial_setter] ties those together
//! and decides when the device may start a new trial.
//!
//! The `ardufsm` binary runs a session against a rig or a simulated one
//! ([dummy_device]). The `monitor` binary summarizes an existing logfile.

#![warn(missing_docs)]
pub mod anova;
pub mod args;
pub mod chatter;
pub mod config;
pub mod device;
pub mod dummy_device;
pub mod error;
pub mod gui;
pub mod params;
pub mod scheduler;
pub mod session;
pub mod trial_matrix;
pub mod trial_setter;
pub mod trial_speak;
