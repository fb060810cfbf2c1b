//! Pairing-code display collaborator.

/// Surfaces a pairing code to an operator.  Fire-and-forget: must not
/// block, and nothing it does can fail the connection attempt.
pub trait PairingDisplay: Send + Sync + 'static {
    fn show(&self, code: &str);
}

/// Writes the pairing code to the log.
pub struct LogPairingDisplay;

impl PairingDisplay for LogPairingDisplay {
    fn show(&self, code: &str) {
        tracing::warn!(pairing_code = %code, "pairing required: link this code from the companion app");
    }
}

/// Ignores pairing codes (tests, headless setups that read `status()`).
pub struct NoopPairingDisplay;

impl PairingDisplay for NoopPairingDisplay {
    fn show(&self, _code: &str) {}
}
