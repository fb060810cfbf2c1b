//! Pairing-code display for an operator watching the gateway's terminal.

use fl_channel::PairingDisplay;

/// Prints each pairing code to stderr in a frame, and logs it.  The code
/// is the raw string the network expects the companion app to scan or
/// type; rendering it as a QR image is left to whatever reads it from
/// `GET /v1/channel`.
pub struct TerminalPairingDisplay;

impl PairingDisplay for TerminalPairingDisplay {
    fn show(&self, code: &str) {
        tracing::warn!(pairing_code = %code, "pairing required");
        eprintln!("{}", frame(code));
    }
}

fn frame(code: &str) -> String {
    let title = " Link this device from the companion app ";
    let width = title.len().max(code.len() + 2);
    let rule = "─".repeat(width);
    format!(
        "┌{rule}┐\n│{title:^width$}│\n├{rule}┤\n│{code:^width$}│\n└{rule}┘",
        rule = rule,
        title = title,
        code = code,
        width = width,
    )
}
