//! Startup sequence of a Grbl connection.
//!
//! After reset the controller prints a version banner, then a free-form
//! notice (usually the alarm/unlock hint), then ordinary traffic:
//!
//! ```text
//! Grbl 1.1f ['$' for help]        AwaitingVersion      -> AwaitingUnlockNotice
//! [MSG:'$H'|'$X' to unlock]       AwaitingUnlockNotice -> Steady
//! ...                             Steady               -> Steady
//! ```

use crate::error::ProtocolError;

const BANNER_PREFIX: &str = "Grbl ";
const BANNER_SUFFIX: &str = " ['$' for help]";

/// State of the boot sequence. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootState {
    /// Waiting for the version banner.
    #[default]
    AwaitingVersion,
    /// Waiting for the first line after the banner.
    AwaitingUnlockNotice,
    /// Every line is an ordinary message.
    Steady,
}

/// What a line means in the state it arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootEvent {
    /// The banner was recognized; carries the version token (e.g. `1.1f`).
    Version(String),
    /// An ordinary message line.
    Message(String),
}

impl BootState {
    /// Interpret a line and return the next state with the event it produced.
    ///
    /// Only `AwaitingVersion` can fail: a malformed banner invalidates the
    /// whole session.
    pub fn advance(self, line: &str) -> Result<(BootState, BootEvent), ProtocolError> {
        match self {
            BootState::AwaitingVersion => {
                let version = parse_banner(line)?;
                Ok((BootState::AwaitingUnlockNotice, BootEvent::Version(version)))
            }
            BootState::AwaitingUnlockNotice => {
                Ok((BootState::Steady, BootEvent::Message(line.to_string())))
            }
            BootState::Steady => Ok((BootState::Steady, BootEvent::Message(line.to_string()))),
        }
    }

    /// Whether the banner and unlock notice have both been seen.
    pub fn is_steady(&self) -> bool {
        matches!(self, BootState::Steady)
    }
}

/// Extract the version token from a `Grbl <version> ['$' for help]` banner.
///
/// The version is `<digits>.<digits><letter>`.
pub fn parse_banner(line: &str) -> Result<String, ProtocolError> {
    let malformed = || ProtocolError::new(line, "version banner \"Grbl <version> ['$' for help]\"");

    let version = line
        .strip_prefix(BANNER_PREFIX)
        .and_then(|rest| rest.strip_suffix(BANNER_SUFFIX))
        .ok_or_else(malformed)?;

    if !is_version_token(version) {
        return Err(malformed());
    }

    Ok(version.to_string())
}

fn is_version_token(token: &str) -> bool {
    let Some((major, rest)) = token.split_once('.') else {
        return false;
    };
    let mut chars = rest.chars();
    let Some(letter) = chars.next_back() else {
        return false;
    };
    let minor = chars.as_str();

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(major) && all_digits(minor) && letter.is_ascii_alphabetic()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_sequence() {
        let state = BootState::default();

        let (state, event) = state.advance("Grbl 1.1f ['$' for help]").unwrap();
        assert_eq!(state, BootState::AwaitingUnlockNotice);
        assert_eq!(event, BootEvent::Version("1.1f".to_string()));

        let (state, event) = state.advance("[MSG:'$H'|'$X' to unlock]").unwrap();
        assert_eq!(state, BootState::Steady);
        assert_eq!(event, BootEvent::Message("[MSG:'$H'|'$X' to unlock]".to_string()));

        let (state, event) = state.advance("Grbl 1.1f ['$' for help]").unwrap();
        assert!(state.is_steady());
        assert_eq!(event, BootEvent::Message("Grbl 1.1f ['$' for help]".to_string()));
    }

    #[test]
    fn test_unlock_notice_is_not_validated() {
        let (state, event) = BootState::AwaitingUnlockNotice.advance("anything at all").unwrap();
        assert_eq!(state, BootState::Steady);
        assert_eq!(event, BootEvent::Message("anything at all".to_string()));
    }

    #[test]
    fn test_malformed_banner() {
        let err = BootState::AwaitingVersion.advance("Grbl bogus").unwrap_err();
        assert_eq!(err.input, "Grbl bogus");
    }

    #[test]
    fn test_parse_banner() {
        assert_eq!(parse_banner("Grbl 0.9j ['$' for help]").unwrap(), "0.9j");
        assert_eq!(parse_banner("Grbl 10.12a ['$' for help]").unwrap(), "10.12a");

        assert!(parse_banner("Grbl 1.1 ['$' for help]").is_err());
        assert!(parse_banner("Grbl 1.1ff ['$' for help]").is_err());
        assert!(parse_banner("Grbl .1f ['$' for help]").is_err());
        assert!(parse_banner("Grbl 1.f ['$' for help]").is_err());
        assert!(parse_banner("Grbl 1.1f").is_err());
        assert!(parse_banner("grbl 1.1f ['$' for help]").is_err());
        assert!(parse_banner(" Grbl 1.1f ['$' for help]").is_err());
    }
}
