//! Parses WebRTC `scalabilityMode` strings (e.g. `"L3T3_KEY"`, `"S2T1"`)
//! into `(spatial_layers, temporal_layers, ksvc)`.

/// `zzz` and any other unrecognized string falls back to `(1, 1, false)`,
/// matching the original's lenient behavior rather than erroring: a
/// scalability mode is advisory, and a malformed one shouldn't fail producer
/// creation.
pub fn parse(mode: &str) -> (u8, u8, bool) {
    let ksvc = mode.ends_with("_KEY");
    let core = mode.strip_suffix("_KEY").unwrap_or(mode);

    let Some(rest) = core.strip_prefix(|c| c == 'S' || c == 'L') else {
        return (1, 1, false);
    };
    let Some(t_pos) = rest.find('T') else {
        return (1, 1, false);
    };
    let (spatial_str, temporal_str) = (&rest[..t_pos], &rest[t_pos + 1..]);

    let Ok(spatial) = spatial_str.parse::<u8>() else {
        return (1, 1, false);
    };
    let Ok(temporal) = temporal_str.parse::<u8>() else {
        return (1, 1, false);
    };
    if spatial == 0 || temporal == 0 {
        return (1, 1, false);
    }
    (spatial, temporal, ksvc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_documented_vectors() {
        assert_eq!(parse("S1T2"), (1, 2, false));
        assert_eq!(parse("L11T2_KEY"), (11, 2, true));
        assert_eq!(parse("zzz"), (1, 1, false));
    }

    #[test]
    fn s_prefixed_modes_accept_the_key_suffix_even_though_only_l_implies_ksvc() {
        // Preserves the source's observed (if questionable) behavior: the
        // regex doesn't distinguish S- from L-prefixed modes for `_KEY`.
        assert_eq!(parse("S2T3_KEY"), (2, 3, true));
    }
}
