use std::{fmt, str::FromStr};

use anyhow::{anyhow, Error};

/// Discrete host events delivered to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Exit,
    BeforeQuit,
    Suspend,
    Resume,
    LockScreen,
    UnlockScreen,
    VisibilityHidden,
    VisibilityVisible,
}

impl HostSignal {
    pub const ALL: [HostSignal; 8] = [
        HostSignal::Exit,
        HostSignal::BeforeQuit,
        HostSignal::Suspend,
        HostSignal::Resume,
        HostSignal::LockScreen,
        HostSignal::UnlockScreen,
        HostSignal::VisibilityHidden,
        HostSignal::VisibilityVisible,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HostSignal::Exit => "exit",
            HostSignal::BeforeQuit => "before-quit",
            HostSignal::Suspend => "suspend",
            HostSignal::Resume => "resume",
            HostSignal::LockScreen => "lock-screen",
            HostSignal::UnlockScreen => "unlock-screen",
            HostSignal::VisibilityHidden => "visibility-hidden",
            HostSignal::VisibilityVisible => "visibility-visible",
        }
    }
}

impl fmt::Display for HostSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostSignal {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        HostSignal::ALL
            .into_iter()
            .find(|signal| signal.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| anyhow!("unknown host signal '{value}'"))
    }
}
