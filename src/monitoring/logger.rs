use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use crate::strategies::types::EdgeDecision;

/// Append-only CSV log of every decision, including zero-stake ones: a
/// rejected decision is historical signal for tuning, not noise.
pub struct CsvLogger {
    log_path: String,
    lock: Mutex<()>,
}

impl CsvLogger {
    pub fn new(log_path: String) -> Result<Self> {
        if !std::path::Path::new(&log_path).exists() {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&log_path)?;
            writeln!(
                file,
                "decided_at,station,event_day,bracket_lower,bracket_upper,p_model,delta_p,p_adjusted,market_mid,edge,kelly_fraction,stake,reason"
            )?;
        }
        Ok(Self {
            log_path,
            lock: Mutex::new(()),
        })
    }

    pub fn log_decision(&self, decision: &EdgeDecision) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut file = OpenOptions::new().append(true).open(&self.log_path)?;
        writeln!(
            file,
            "{},{},{},{},{},{:.6},{:.6},{:.6},{:.4},{:.6},{:.6},{:.2},{}",
            decision.decided_at.to_rfc3339(),
            decision.station,
            decision.event_day,
            decision.bracket.lower,
            decision.bracket.upper,
            decision.p_model,
            decision.delta_p,
            decision.p_adjusted,
            decision.market_mid,
            decision.edge,
            decision.kelly_fraction,
            decision.stake,
            decision.reason,
        )?;
        Ok(())
    }
}
