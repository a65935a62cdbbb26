//! Fixed-width RINEX navigation record field parsing, shared by every
//! constellation's broadcast message in [`super`] (spec §4.5).

/// Splits one RINEX broadcast-orbit line into up to 4 numeric fields.
/// RINEX floats use `D` for the exponent and are right-aligned in 19-byte
/// columns starting after a 4-byte label/blank prefix.
pub fn parse_line_fields(line: &str) -> [f64; 4] {
    let mut out = [0.0; 4];
    let bytes: Vec<char> = line.chars().collect();
    let mut pos = 4usize;
    for slot in out.iter_mut() {
        if pos >= bytes.len() {
            break;
        }
        let end = (pos + 19).min(bytes.len());
        let field: String = bytes[pos..end].iter().collect();
        let field = field.trim().replace('D', "E").replace('d', "e");
        if !field.is_empty() {
            *slot = field.parse().unwrap_or(0.0);
        }
        pos = end;
    }
    out
}

/// Parses the epoch/clock line shared by every constellation:
/// `<prn> <y> <mon> <day> <h> <min> <sec> <af0> <af1> <af2>`.
pub struct EpochLine {
    pub prn_field: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: f64,
    pub clock_bias: f64,
    pub clock_drift: f64,
    pub clock_drift_rate: f64,
}

pub fn parse_epoch_line(line: &str) -> Option<EpochLine> {
    let mut parts = line.split_whitespace();
    let prn_field = parts.next()?.to_string();
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    let hour: u32 = parts.next()?.parse().ok()?;
    let minute: u32 = parts.next()?.parse().ok()?;
    let second: f64 = parts.next()?.replace('D', "E").parse().ok()?;
    let clock_bias: f64 = parts.next()?.replace('D', "E").parse().ok()?;
    let clock_drift: f64 = parts.next()?.replace('D', "E").parse().ok()?;
    let clock_drift_rate: f64 = parts.next()?.replace('D', "E").parse().ok()?;
    Some(EpochLine {
        prn_field,
        year,
        month,
        day,
        hour,
        minute,
        second,
        clock_bias,
        clock_drift,
        clock_drift_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_broadcast_orbit_line() {
        let line = "     .1000000000000D+02-.2500000000000D+00 .3000000000000D-02 .5153650654000D+04";
        let fields = parse_line_fields(line);
        assert!((fields[0] - 10.0).abs() < 1e-9);
        assert!((fields[1] - (-0.25)).abs() < 1e-9);
    }

    #[test]
    fn parses_epoch_line() {
        let line = "G01 2024 01 08 00 00 00.0 1.234D-04 2.345D-11 0.000D+00";
        let parsed = parse_epoch_line(line).unwrap();
        assert_eq!(parsed.prn_field, "G01");
        assert_eq!(parsed.year, 2024);
        assert!((parsed.clock_bias - 1.234e-4).abs() < 1e-12);
    }
}
