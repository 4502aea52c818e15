//! XP formulas.
//!
//! Pure functions used to show an optimistic reward before the remote store
//! returns its authoritative value. The numbers here must stay identical to the
//! remote calculation; [`validate`] exists to catch divergence.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, XpError};

/// Flat reward for an interrupted session, independent of elapsed time.
pub const INTERRUPTED_XP: u32 = 10;

const BASE_SESSION_XP: f64 = 10.0;
const XP_PER_MINUTE: f64 = 0.5;
const PROJECT_XP_FACTOR: u32 = 10;
const BOSS_BATTLE_MULTIPLIER: u32 = 2;

/// Committed focus interval length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SessionDuration {
    Sixty,
    Ninety,
    OneTwenty,
}

impl SessionDuration {
    pub const ALL: [SessionDuration; 3] = [Self::Sixty, Self::Ninety, Self::OneTwenty];

    pub fn minutes(self) -> u32 {
        match self {
            Self::Sixty => 60,
            Self::Ninety => 90,
            Self::OneTwenty => 120,
        }
    }

    pub fn seconds(self) -> u32 {
        self.minutes() * 60
    }

    pub fn millis(self) -> u64 {
        u64::from(self.seconds()) * 1000
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        match minutes {
            60 => Some(Self::Sixty),
            90 => Some(Self::Ninety),
            120 => Some(Self::OneTwenty),
            _ => None,
        }
    }

    /// Cosmetic label shown next to the countdown.
    pub fn difficulty_label(self) -> &'static str {
        match self {
            Self::Sixty => "Standard",
            Self::Ninety => "Deep",
            Self::OneTwenty => "Marathon",
        }
    }
}

impl TryFrom<u32> for SessionDuration {
    type Error = String;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        Self::from_minutes(minutes).ok_or_else(|| format!("unsupported duration: {minutes}"))
    }
}

impl From<SessionDuration> for u32 {
    fn from(d: SessionDuration) -> u32 {
        d.minutes()
    }
}

impl fmt::Display for SessionDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}min", self.minutes())
    }
}

/// Declared energy level at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WillpowerLevel {
    High,
    Medium,
    Low,
}

impl WillpowerLevel {
    pub const ALL: [WillpowerLevel; 3] = [Self::High, Self::Medium, Self::Low];

    /// Lower willpower earns more.
    pub fn multiplier(self) -> f64 {
        match self {
            Self::High => 1.0,
            Self::Medium => 1.5,
            Self::Low => 2.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for WillpowerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WillpowerLevel {
    type Err = XpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(XpError::UnknownWillpower(other.to_string())),
        }
    }
}

/// XP for a completed session: `floor((10 + minutes * 0.5) * multiplier)`.
pub fn session_xp(duration: SessionDuration, willpower: WillpowerLevel) -> u32 {
    let base = BASE_SESSION_XP + f64::from(duration.minutes()) * XP_PER_MINUTE;
    (base * willpower.multiplier()).floor() as u32
}

/// XP for finishing a project: `cost * benefit * 10`, doubled for the boss battle.
pub fn project_xp(cost: u32, benefit: u32, is_boss_battle: bool) -> Result<u32, XpError> {
    check_scale("cost", cost)?;
    check_scale("benefit", benefit)?;
    let multiplier = if is_boss_battle { BOSS_BATTLE_MULTIPLIER } else { 1 };
    Ok(cost * benefit * PROJECT_XP_FACTOR * multiplier)
}

pub fn interrupted_xp() -> u32 {
    INTERRUPTED_XP
}

fn check_scale(field: &'static str, value: u32) -> Result<(), XpError> {
    if (1..=10).contains(&value) {
        Ok(())
    } else {
        Err(XpError::OutOfRange { field, value })
    }
}

/// Source of the authoritative session XP (the remote store).
pub trait RemoteXpSource {
    fn session_xp(
        &self,
        duration: SessionDuration,
        willpower: WillpowerLevel,
    ) -> Result<u32, CoreError>;
}

/// Outcome of comparing the local formula against the remote one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpValidation {
    pub duration: SessionDuration,
    pub willpower: WillpowerLevel,
    pub local: u32,
    pub remote: u32,
}

impl XpValidation {
    pub fn diverged(&self) -> bool {
        self.local != self.remote
    }
}

/// Compare the local session XP against the remote-computed value.
pub fn validate(
    source: &dyn RemoteXpSource,
    duration: SessionDuration,
    willpower: WillpowerLevel,
) -> Result<XpValidation, CoreError> {
    let local = session_xp(duration, willpower);
    let remote = source.session_xp(duration, willpower)?;
    let result = XpValidation {
        duration,
        willpower,
        local,
        remote,
    };
    if result.diverged() {
        tracing::warn!(
            %duration,
            %willpower,
            local,
            remote,
            "local session XP diverges from remote calculation"
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_xp_all_combinations() {
        let expected = [
            (SessionDuration::Sixty, WillpowerLevel::High, 40),
            (SessionDuration::Sixty, WillpowerLevel::Medium, 60),
            (SessionDuration::Sixty, WillpowerLevel::Low, 80),
            (SessionDuration::Ninety, WillpowerLevel::High, 55),
            (SessionDuration::Ninety, WillpowerLevel::Medium, 82),
            (SessionDuration::Ninety, WillpowerLevel::Low, 110),
            (SessionDuration::OneTwenty, WillpowerLevel::High, 70),
            (SessionDuration::OneTwenty, WillpowerLevel::Medium, 105),
            (SessionDuration::OneTwenty, WillpowerLevel::Low, 140),
        ];
        for (duration, willpower, xp) in expected {
            assert_eq!(session_xp(duration, willpower), xp, "{duration} / {willpower}");
        }
    }

    #[test]
    fn interrupted_xp_is_flat() {
        assert_eq!(interrupted_xp(), 10);
    }

    #[test]
    fn project_xp_scales_and_doubles_for_boss() {
        assert_eq!(project_xp(3, 4, false), Ok(120));
        assert_eq!(project_xp(3, 4, true), Ok(240));
        assert_eq!(project_xp(10, 10, true), Ok(2000));
        assert_eq!(project_xp(1, 1, false), Ok(10));
    }

    #[test]
    fn project_xp_rejects_out_of_range() {
        assert_eq!(
            project_xp(0, 5, false),
            Err(XpError::OutOfRange { field: "cost", value: 0 })
        );
        assert_eq!(
            project_xp(5, 11, false),
            Err(XpError::OutOfRange { field: "benefit", value: 11 })
        );
    }

    #[test]
    fn duration_round_trips_minutes() {
        for d in SessionDuration::ALL {
            assert_eq!(SessionDuration::from_minutes(d.minutes()), Some(d));
        }
        assert_eq!(SessionDuration::from_minutes(45), None);
        assert_eq!(SessionDuration::OneTwenty.seconds(), 7200);
    }

    #[test]
    fn willpower_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<WillpowerLevel>(), Ok(WillpowerLevel::High));
        assert_eq!(" low ".parse::<WillpowerLevel>(), Ok(WillpowerLevel::Low));
        assert!("exhausted".parse::<WillpowerLevel>().is_err());
    }

    struct FixedRemote(u32);

    impl RemoteXpSource for FixedRemote {
        fn session_xp(&self, _: SessionDuration, _: WillpowerLevel) -> Result<u32, CoreError> {
            Ok(self.0)
        }
    }

    #[test]
    fn validate_flags_divergence() {
        let ok = validate(&FixedRemote(40), SessionDuration::Sixty, WillpowerLevel::High).unwrap();
        assert!(!ok.diverged());

        let bad = validate(&FixedRemote(41), SessionDuration::Sixty, WillpowerLevel::High).unwrap();
        assert!(bad.diverged());
        assert_eq!(bad.local, 40);
        assert_eq!(bad.remote, 41);
    }
}
