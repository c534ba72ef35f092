//! H.264 `profile-level-id` (PLID) parsing, comparison and the SDP "answer"
//! algorithm, ported from the original media worker's negotiator.

use crate::error::{OrtcError, OrtcErrorCode};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    ConstrainedBaseline,
    Baseline,
    Main,
    ConstrainedHigh,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    L1B,
    L1,
    L1_1,
    L1_2,
    L1_3,
    L2,
    L2_1,
    L2_2,
    L3,
    L3_1,
    L3_2,
    L4,
    L4_1,
    L4_2,
    L5,
    L5_1,
    L5_2,
    L5_3,
}

impl Level {
    /// The raw `level_idc` byte value as it appears in the last two hex
    /// characters of a profile-level-id string.
    fn idc(self) -> u8 {
        match self {
            Level::L1B => 0,
            Level::L1 => 10,
            Level::L1_1 => 11,
            Level::L1_2 => 12,
            Level::L1_3 => 13,
            Level::L2 => 20,
            Level::L2_1 => 21,
            Level::L2_2 => 22,
            Level::L3 => 30,
            Level::L3_1 => 31,
            Level::L3_2 => 32,
            Level::L4 => 40,
            Level::L4_1 => 41,
            Level::L4_2 => 42,
            Level::L5 => 50,
            Level::L5_1 => 51,
            Level::L5_2 => 52,
            Level::L5_3 => 53,
        }
    }

    fn from_idc(idc: u8) -> Option<Level> {
        Some(match idc {
            0 => Level::L1B,
            10 => Level::L1,
            11 => Level::L1_1,
            12 => Level::L1_2,
            13 => Level::L1_3,
            20 => Level::L2,
            21 => Level::L2_1,
            22 => Level::L2_2,
            30 => Level::L3,
            31 => Level::L3_1,
            32 => Level::L3_2,
            40 => Level::L4,
            41 => Level::L4_1,
            42 => Level::L4_2,
            50 => Level::L5,
            51 => Level::L5_1,
            52 => Level::L5_2,
            53 => Level::L5_3,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plid {
    pub profile: Profile,
    pub level: Level,
}

const DEFAULT_PLID: Plid = Plid {
    profile: Profile::ConstrainedBaseline,
    level: Level::L3_1,
};

struct ProfilePattern {
    profile: Profile,
    profile_idc: u8,
    mask: u8,
    masked_value: u8,
}

/// Order matters: the first matching pattern wins, mirroring the original
/// table (constrained variants checked ahead of their unconstrained base).
const PROFILE_PATTERNS: &[ProfilePattern] = &[
    ProfilePattern { profile: Profile::ConstrainedBaseline, profile_idc: 0x42, mask: 0x4f, masked_value: 0x40 },
    ProfilePattern { profile: Profile::ConstrainedBaseline, profile_idc: 0x4D, mask: 0x8f, masked_value: 0x80 },
    ProfilePattern { profile: Profile::ConstrainedBaseline, profile_idc: 0x58, mask: 0xcf, masked_value: 0xc0 },
    ProfilePattern { profile: Profile::Baseline, profile_idc: 0x42, mask: 0x4f, masked_value: 0x00 },
    ProfilePattern { profile: Profile::Baseline, profile_idc: 0x58, mask: 0xcf, masked_value: 0x80 },
    ProfilePattern { profile: Profile::Main, profile_idc: 0x4D, mask: 0xaf, masked_value: 0x00 },
    ProfilePattern { profile: Profile::High, profile_idc: 0x64, mask: 0xff, masked_value: 0x00 },
    ProfilePattern { profile: Profile::ConstrainedHigh, profile_idc: 0x64, mask: 0xff, masked_value: 0x0c },
];

/// constraint_set3_flag bit of profile-iop; for level_idc==11 it disambiguates
/// level 1b from level 1.1.
const CONSTRAINT_SET3_FLAG: u8 = 0x10;

pub fn parse(spec: &str) -> Result<Plid, OrtcError> {
    if spec.len() != 6 || !spec.is_ascii() {
        return Err(invalid());
    }
    let numspec = u32::from_str_radix(spec, 16).map_err(|_| invalid())?;
    let level_idc = (numspec & 0xff) as u8;
    let profile_iop = ((numspec >> 8) & 0xff) as u8;
    let profile_idc = ((numspec >> 16) & 0xff) as u8;

    let level = if level_idc == Level::L1_1.idc() {
        if profile_iop & CONSTRAINT_SET3_FLAG != 0 {
            Level::L1B
        } else {
            Level::L1_1
        }
    } else {
        Level::from_idc(level_idc).ok_or_else(invalid)?
    };

    let profile = PROFILE_PATTERNS
        .iter()
        .find(|p| p.profile_idc == profile_idc && p.masked_value == (profile_iop & p.mask))
        .map(|p| p.profile)
        .ok_or_else(invalid)?;

    Ok(Plid { profile, level })
}

fn invalid() -> OrtcError {
    OrtcError::new(OrtcErrorCode::InvalidProfileLevelId, "malformed H.264 profile-level-id")
}

/// True iff `p1` and `p2` (profile-level-id strings, or empty for "use the
/// default") describe the same profile. Byte-identical 6-char strings are
/// treated as equal without even parsing, matching the source's fast path.
pub fn plid_equal(p1: &str, p2: &str) -> bool {
    if p1.len() == 6 && p1 == p2 {
        return true;
    }
    let pl1 = if p1.len() == 6 {
        match parse(p1) {
            Ok(p) => p,
            Err(_) => return false,
        }
    } else if p1.is_empty() {
        DEFAULT_PLID
    } else {
        return false;
    };
    let pl2 = if p2.len() == 6 {
        match parse(p2) {
            Ok(p) => p,
            Err(_) => return false,
        }
    } else if p2.is_empty() {
        DEFAULT_PLID
    } else {
        return false;
    };
    pl1.profile == pl2.profile
}

fn is_level_asymmetry_allowed(params: &Value) -> bool {
    match params.get("level-asymmetry-allowed") {
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::String(s)) => s == "1",
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

fn level_is_lesser_than(a: Level, b: Level) -> bool {
    if a == Level::L1B {
        return b.idc() > Level::L1.idc();
    }
    if b == Level::L1B {
        return a != Level::L1;
    }
    a.idc() < b.idc()
}

fn level_min(a: Level, b: Level) -> Level {
    if level_is_lesser_than(a, b) {
        a
    } else {
        b
    }
}

fn profile_level_id_of(params: &Value) -> Option<&str> {
    match params.get("profile-level-id") {
        Some(Value::String(s)) if s.len() == 6 => Some(s.as_str()),
        _ => None,
    }
}

/// Resolves the answer PLID for an H.264 codec pair. Returns `Ok(None)` when
/// neither side specifies a profile-level-id (nothing to negotiate);
/// `Err(ProfileLevelIdMismatch)` when the two sides name different profiles.
pub fn plid_to_answer(local_params: &Value, remote_params: &Value) -> Result<Option<Plid>, OrtcError> {
    let local_str = profile_level_id_of(local_params);
    let remote_str = profile_level_id_of(remote_params);
    if local_str.is_none() && remote_str.is_none() {
        return Ok(None);
    }

    let local_plid = match local_str {
        Some(s) => parse(s)?,
        None => DEFAULT_PLID,
    };
    let remote_plid = match remote_str {
        Some(s) => parse(s)?,
        None => DEFAULT_PLID,
    };

    if local_plid.profile != remote_plid.profile {
        return Err(OrtcError::new(
            OrtcErrorCode::ProfileLevelIdMismatch,
            "H.264 profile-level-id profile mismatch",
        ));
    }

    let asymmetry_allowed =
        is_level_asymmetry_allowed(local_params) && is_level_asymmetry_allowed(remote_params);
    let min_level = level_min(local_plid.level, remote_plid.level);
    let level = if asymmetry_allowed { local_plid.level } else { min_level };

    Ok(Some(Plid {
        profile: local_plid.profile,
        level,
    }))
}

pub fn write(plid: Plid) -> Result<String, OrtcError> {
    if plid.level == Level::L1B {
        return Ok(match plid.profile {
            Profile::ConstrainedBaseline => "42f00b".to_string(),
            Profile::Baseline => "42100b".to_string(),
            Profile::Main => "4d100b".to_string(),
            _ => return Err(invalid()),
        });
    }
    let iop = match plid.profile {
        Profile::ConstrainedBaseline => "42e0",
        Profile::Baseline => "4200",
        Profile::Main => "4d00",
        Profile::ConstrainedHigh => "640c",
        Profile::High => "6400",
    };
    Ok(format!("{iop}{:02x}", plid.level.idc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_the_documented_accept_set() {
        for spec in ["42e01f", "42e00b", "42f00b", "42C02A"] {
            assert!(parse(&spec.to_ascii_lowercase()).is_ok(), "{spec} should parse");
        }
    }

    #[test]
    fn rejects_the_documented_reject_set() {
        for spec in ["", " 42e01f", "e01f", "42e11f", "58601f", "64e01f"] {
            assert!(parse(spec).is_err(), "{spec} should be rejected");
        }
    }

    #[test]
    fn resolves_the_documented_profile_table() {
        let cases = [
            ("42a01f", Profile::Baseline),
            ("58a01f", Profile::Baseline),
            ("4d401f", Profile::Main),
            ("64001f", Profile::High),
            ("640c1f", Profile::ConstrainedHigh),
            ("42e01f", Profile::ConstrainedBaseline),
            ("42c02a", Profile::ConstrainedBaseline),
            ("4de01f", Profile::ConstrainedBaseline),
            ("58f01f", Profile::ConstrainedBaseline),
        ];
        for (spec, expected) in cases {
            assert_eq!(parse(spec).unwrap().profile, expected, "{spec}");
        }
    }

    #[test]
    fn parse_then_write_round_trips_on_canonical_forms() {
        // Round-trip only holds for the canonical iop byte `write` emits per
        // profile; other accepted variants (e.g. "42c02a") map to the same
        // profile via the bitmask table but aren't themselves canonical.
        for spec in ["42e01f", "42e00b", "42f00b", "4d001f", "64001f", "640c1f"] {
            let plid = parse(spec).unwrap();
            assert_eq!(write(plid).unwrap(), spec);
        }
    }

    #[test]
    fn answer_picks_the_lower_level_without_asymmetry() {
        let local = json!({"profile-level-id": "42e01f"});
        let remote = json!({"profile-level-id": "42e028"});
        let answer = plid_to_answer(&local, &remote).unwrap().unwrap();
        assert_eq!(answer.profile, Profile::ConstrainedBaseline);
        assert!(answer.level.idc() <= Level::L3_1.idc());
    }

    #[test]
    fn answer_rejects_mismatched_profiles() {
        let local = json!({"profile-level-id": "42e01f"});
        let remote = json!({"profile-level-id": "4d0032"});
        let err = plid_to_answer(&local, &remote).unwrap_err();
        assert_eq!(err.code(), OrtcErrorCode::ProfileLevelIdMismatch);
    }

    #[test]
    fn answer_is_none_when_neither_side_specifies_a_plid() {
        assert!(plid_to_answer(&json!({}), &json!({})).unwrap().is_none());
    }
}
