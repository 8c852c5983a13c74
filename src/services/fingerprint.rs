//! Content fingerprints used as duplicate keys for bulk import.
//!
//! Not a cryptographic identifier: collisions are possible, just rare for
//! realistic batch sizes.

const SEED: u32 = 5381;
const DELIMITER: &str = "|";
const RADIX: u32 = 36;

fn normalize(field: &str) -> String {
    field.trim().to_lowercase()
}

/// Fingerprint of the normalized `(title, date, category, notes)` tuple.
pub fn fingerprint(title: &str, date_iso: &str, category: &str, notes: &str) -> String {
    let joined = [
        normalize(title),
        date_iso.trim().to_string(),
        normalize(category),
        normalize(notes),
    ]
    .join(DELIMITER);

    to_radix(rolling_hash(&joined), RADIX)
}

/// `hash = hash * 33 + unit` over UTF-16 code units, wrapping at 32 bits.
fn rolling_hash(input: &str) -> u32 {
    input.encode_utf16().fold(SEED, |hash, unit| {
        hash.wrapping_mul(33).wrapping_add(u32::from(unit))
    })
}

fn to_radix(mut value: u32, radix: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let digit = value % radix;
        digits.push(std::char::from_digit(digit, radix).unwrap_or('0'));
        value /= radix;
    }
    digits.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casing_and_whitespace_do_not_matter() {
        let a = fingerprint("Team Sync", "2026-01-05", "Meeting", "Room 4");
        let b = fingerprint("  team sync ", "2026-01-05", " MEETING", "room 4  ");
        assert_eq!(a, b);
    }

    #[test]
    fn any_field_change_changes_the_key() {
        let base = fingerprint("Team Sync", "2026-01-05", "meeting", "");
        assert_ne!(base, fingerprint("Team Sync", "2026-01-06", "meeting", ""));
        assert_ne!(base, fingerprint("Team Sync", "2026-01-05", "deadline", ""));
        assert_ne!(base, fingerprint("Team Sync", "2026-01-05", "meeting", "x"));
        assert_ne!(base, fingerprint("Team Synk", "2026-01-05", "meeting", ""));
    }

    #[test]
    fn hash_matches_reference_values() {
        // djb2 of the empty string is the seed itself.
        assert_eq!(rolling_hash(""), 5381);
        assert_eq!(rolling_hash("a"), 5381 * 33 + 97);
        assert_eq!(to_radix(5381, 36), "45h");
        assert_eq!(to_radix(0, 36), "0");
        assert_eq!(to_radix(u32::MAX, 36), "1z141z3");
    }

    #[test]
    fn field_boundaries_are_kept() {
        assert_ne!(
            fingerprint("ab", "2026-01-05", "c", ""),
            fingerprint("a", "2026-01-05", "bc", "")
        );
    }
}
