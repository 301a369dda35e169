//! A simulated rig that speaks enough TrialSpeak to run a session without
//! hardware.

use crate::device::Device;
use crate::trial_matrix::Side;
use crate::trial_speak::{self, ACK, ERROR, HIT, RELEASE_TRIAL};
use rand::prelude::*;
use std::collections::{BTreeMap, VecDeque};
use std::io;

/// Responds to the host like a rig with a very fast, somewhat accurate animal.
///
/// Every line written to it is acknowledged. `SET` values are remembered and
/// reported back as `TRLP` lines when a trial is released. A released trial
/// finishes a fixed number of reads later, with a response that is correct
/// with probability `hit_probability`.
#[derive(Debug)]
pub struct DummyDevice {
    clock_ms: u64,
    ms_per_read: u64,
    partial: Vec<u8>,
    outgoing: VecDeque<u8>,
    params: BTreeMap<String, i64>,
    reads_per_trial: u32,
    /// Reads left until the running trial reports its outcome
    running: Option<u32>,
    hit_probability: f64,
    received: Vec<String>,
    rng: StdRng,
}

impl DummyDevice {
    /// A rig that has just booted. Its animal is right with probability
    /// `hit_probability`, `reads_per_trial` reads after each release.
    pub fn new(hit_probability: f64, reads_per_trial: u32) -> Self {
        let mut dev = DummyDevice {
            clock_ms: 0,
            ms_per_read: 10,
            partial: Vec::new(),
            outgoing: VecDeque::new(),
            params: BTreeMap::new(),
            reads_per_trial,
            running: None,
            hit_probability: hit_probability.clamp(0.0, 1.0),
            received: Vec::new(),
            rng: StdRng::from_entropy(),
        };
        dev.emit(&format!("{} 0 1", trial_speak::STATE_CHANGE));
        dev
    }

    /// Make the animal reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Every complete line the host has written, in order.
    pub fn received(&self) -> &[String] {
        &self.received
    }

    /// The last value set for `name`.
    pub fn param(&self, name: &str) -> Option<i64> {
        self.params.get(name).copied()
    }

    fn emit(&mut self, body: &str) {
        let line = format!("{} {}\n", self.clock_ms, body);
        self.outgoing.extend(line.bytes());
    }

    fn handle_line(&mut self, line: &str) {
        self.emit(&format!("{} {}", ACK, line));

        let mut tokens = line.split_whitespace();
        match (tokens.next(), tokens.next(), tokens.next()) {
            (Some("SET"), Some(name), Some(value)) => {
                if let Ok(value) = value.parse() {
                    self.params.insert(name.to_owned(), value);
                }
            }
            (Some(cmd), None, None) if cmd == RELEASE_TRIAL => self.release(),
            _ => {}
        }
    }

    fn release(&mut self) {
        self.emit(trial_speak::TRIAL_START);
        let params: Vec<(String, i64)> = self.params.iter().map(|(k, v)| (k.clone(), *v)).collect();
        for (name, value) in params {
            self.emit(&format!("{} {} {}", trial_speak::TRIAL_PARAM, name, value));
        }
        self.emit(trial_speak::TRIAL_RELEASED);
        self.running = Some(self.reads_per_trial);
    }

    fn finish_trial(&mut self) {
        let rewside = self
            .param("RWSD")
            .and_then(Side::from_code)
            .unwrap_or(Side::Left);
        let (choice, outcome) = if self.rng.gen_bool(self.hit_probability) {
            (rewside, HIT)
        } else {
            (rewside.opposite(), ERROR)
        };
        self.emit(&format!("{} RESP {}", trial_speak::TRIAL_RESULT, choice.code()));
        self.emit(&format!("{} OUTC {}", trial_speak::TRIAL_RESULT, outcome));
    }
}

impl Device for DummyDevice {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.clock_ms += self.ms_per_read;

        self.running = match self.running {
            Some(0) => {
                self.finish_trial();
                None
            }
            Some(n) => Some(n - 1),
            None => None,
        };

        let n = buf.len().min(self.outgoing.len());
        for (dst, src) in buf.iter_mut().zip(self.outgoing.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        for &c in bytes {
            if c == b'\n' {
                let line = String::from_utf8_lossy(&self.partial).trim().to_owned();
                self.partial.clear();
                if !line.is_empty() {
                    self.handle_line(&line);
                    self.received.push(line);
                }
            } else {
                self.partial.push(c);
            }
        }
        Ok(())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.outgoing.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial_matrix::TrialMatrix;

    fn drain(dev: &mut DummyDevice, reads: usize) -> Vec<String> {
        let mut bytes = Vec::new();
        let mut buf = [0u8; 64];
        for _ in 0..reads {
            let n = dev.read_available(&mut buf).unwrap();
            bytes.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn acks_and_releases() {
        let mut dev = DummyDevice::new(1.0, 2).with_seed(5);
        dev.write_all(b"SET RWSD 2\n").unwrap();
        dev.write_all(b"SET ITI 50\nRELEASE_TRL\n").unwrap();
        let lines = drain(&mut dev, 20);

        assert!(lines[0].ends_with("ST_CHG 0 1"));
        assert!(lines[1].ends_with("ACK SET RWSD 2"));
        assert!(lines[3].ends_with("ACK RELEASE_TRL"));
        assert!(lines.iter().any(|l| l.ends_with("TRLP RWSD 2")));
        assert!(lines.iter().any(|l| l.ends_with("TRLR RESP 2")));
        assert!(lines.iter().any(|l| l.ends_with("TRLR OUTC 1")));
        assert_eq!(dev.received(), ["SET RWSD 2", "SET ITI 50", "RELEASE_TRL"]);

        let tm = TrialMatrix::build(&lines).unwrap();
        assert_eq!(tm.len(), 1);
        assert!(tm.trials()[0].is_complete());
        assert_eq!(tm.trials()[0].params["iti"], 50);
    }

    #[test]
    fn always_wrong_animal() {
        let mut dev = DummyDevice::new(0.0, 0);
        dev.write_all(b"SET RWSD 1\nRELEASE_TRL\n").unwrap();
        let lines = drain(&mut dev, 10);
        assert!(lines.iter().any(|l| l.ends_with("TRLR RESP 2")));
        assert!(lines.iter().any(|l| l.ends_with("TRLR OUTC 2")));
    }

    #[test]
    fn split_writes_are_reassembled() {
        let mut dev = DummyDevice::new(1.0, 1);
        dev.write_all(b"SET IT").unwrap();
        assert!(dev.received().is_empty());
        dev.write_all(b"I 7\n").unwrap();
        assert_eq!(dev.param("ITI"), Some(7));
    }
}
