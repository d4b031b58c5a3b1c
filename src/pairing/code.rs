//! Phone number and pairing code formatting.

use std::fmt;

use serde::Serialize;

/// Characters per group in a displayed pairing code.
pub const CODE_GROUP_LEN: usize = 4;

/// Separator between pairing code groups.
pub const CODE_SEPARATOR: char = '-';

/// Strip every non-digit character: `"+1 (555) 123-4567"` becomes `"15551234567"`.
pub fn normalize_phone_number(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Group a raw code in runs of four: `"ABCD1234"` becomes `"ABCD-1234"`.
///
/// A trailing short group is kept as is; there is never a trailing separator.
pub fn format_pairing_code(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len() + raw.len() / CODE_GROUP_LEN);
    for (i, group) in chars.chunks(CODE_GROUP_LEN).enumerate() {
        if i > 0 {
            out.push(CODE_SEPARATOR);
        }
        out.extend(group);
    }
    out
}

/// A pairing code formatted for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PairingCode(String);

impl PairingCode {
    /// Format a raw code as returned by the protocol.
    pub fn from_raw(raw: &str) -> Self {
        Self(format_pairing_code(raw.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
