//! Name and avatar derivation for participant tiles.

use serde::Serialize;

const PALETTE: [&str; 10] = [
    "#4F46E5", // Indigo
    "#10B981", // Emerald
    "#F59E0B", // Amber
    "#EF4444", // Red
    "#8B5CF6", // Violet
    "#EC4899", // Pink
    "#06B6D4", // Cyan
    "#F97316", // Orange
    "#6366F1", // Indigo
    "#14B8A6", // Teal
];

const FALLBACK_COLOR: &str = "#6B7280";

/// Placeholder shown for a remote participant the registry has not named.
pub fn fallback_name(uid: u32) -> String {
    format!("Remote User {uid}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Avatar {
    pub initials: String,
    pub color: &'static str,
}

impl Avatar {
    pub fn for_name(name: &str) -> Self {
        Self {
            initials: initials(name),
            color: color_for(name),
        }
    }
}

/// First letter of each space-separated word, uppercased, at most two.
pub fn initials(name: &str) -> String {
    if name.is_empty() {
        return "?".to_string();
    }

    let letters: String = name
        .split(' ')
        .filter_map(|part| part.chars().next())
        .collect();

    letters.to_uppercase().chars().take(2).collect()
}

/// Stable palette colour for a name.
pub fn color_for(name: &str) -> &'static str {
    if name.is_empty() {
        return FALLBACK_COLOR;
    }

    // hash = c + ((hash << 5) - hash) over UTF-16 code units.  Only the
    // shift truncates to 32 bits; the running sum keeps growing.
    let hash = name.encode_utf16().fold(0i64, |hash, unit| {
        let shifted = i64::from((hash as i32).wrapping_shl(5));
        i64::from(unit).wrapping_add(shifted.wrapping_sub(hash))
    });

    PALETTE[(hash.unsigned_abs() % PALETTE.len() as u64) as usize]
}
