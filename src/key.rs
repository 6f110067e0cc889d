//! Key identity: canonical names, aliases and scan-code resolution.
//!
//! Every user-supplied key token funnels through [`normalize_name`] and the
//! [`NameTable`] built from the backend's mapping. A name may resolve to
//! several scan codes (two "shift" keys) and a scan code may carry several
//! names (a keypad key doubling as "home"), so lookups in both directions
//! return sets rather than single values.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::event::ScanCode;

/// Alias -> canonical spelling. This table is the sole source of synonym
/// knowledge in the crate; nothing else hard-codes name equivalences.
static ALIASES: &[(&str, &str)] = &[
    // Modifier synonyms.
    ("control", "ctrl"),
    ("left control", "left ctrl"),
    ("right control", "right ctrl"),
    ("lctrl", "left ctrl"),
    ("rctrl", "right ctrl"),
    ("option", "alt"),
    ("left option", "left alt"),
    ("right option", "right alt"),
    ("lalt", "left alt"),
    ("ralt", "right alt"),
    ("altgr", "alt gr"),
    ("iso level3 shift", "alt gr"),
    ("lshift", "left shift"),
    ("rshift", "right shift"),
    ("command", "windows"),
    ("left command", "left windows"),
    ("right command", "right windows"),
    ("cmd", "windows"),
    ("super", "windows"),
    ("meta", "windows"),
    ("win", "windows"),
    ("left meta", "left windows"),
    ("right meta", "right windows"),
    // Named keys.
    ("escape", "esc"),
    ("return", "enter"),
    ("del", "delete"),
    ("ins", "insert"),
    ("break", "pause"),
    ("pgup", "page up"),
    ("pgdown", "page down"),
    ("pgdn", "page down"),
    ("prior", "page up"),
    ("next", "page down"),
    ("caps", "caps lock"),
    ("capslock", "caps lock"),
    ("numlock", "num lock"),
    ("scrolllock", "scroll lock"),
    ("spacebar", "space"),
    ("space bar", "space"),
    ("left arrow", "left"),
    ("right arrow", "right"),
    ("up arrow", "up"),
    ("down arrow", "down"),
    ("apps", "menu"),
    ("application", "menu"),
    ("prtsc", "print screen"),
    ("sysrq", "print screen"),
    // Whitespace characters spell out their key names.
    (" ", "space"),
    ("\n", "enter"),
    ("\r", "enter"),
    ("\t", "tab"),
    ("\u{8}", "backspace"),
    // Separator characters used by the hotkey grammar get speakable names.
    ("plus", "+"),
    ("comma", ","),
];

/// Unsided modifier names. Sided variants are "left "/"right " + one of
/// these.
static MODIFIERS: &[&str] = &["alt", "alt gr", "ctrl", "shift", "windows"];

/// Suffixes some platforms append to distinguish keypad variants of a key.
static STRIPPED_SUFFIXES: &[&str] = &[" (numeric pad)", " (keypad)"];

/// US-layout characters reachable as shift + base key. Uppercase letters are
/// handled separately.
static SHIFTED_CHARS: &[(char, char)] = &[
    ('!', '1'),
    ('@', '2'),
    ('#', '3'),
    ('$', '4'),
    ('%', '5'),
    ('^', '6'),
    ('&', '7'),
    ('*', '8'),
    ('(', '9'),
    (')', '0'),
    ('_', '-'),
    ('+', '='),
    ('{', '['),
    ('}', ']'),
    ('|', '\\'),
    (':', ';'),
    ('"', '\''),
    ('<', ','),
    ('>', '.'),
    ('?', '/'),
    ('~', '`'),
];

/// Navigation names preferred over keypad doubles when reporting a code.
static NAV_PREFERRED: &[&str] = &["home", "end", "page up", "page down"];

fn alias_lookup(name: &str) -> Option<&'static str> {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| *canonical)
}

/// Normalizes a user-supplied key name: lowercase, trim, collapse internal
/// whitespace, strip keypad suffixes, underscores to spaces (except for the
/// literal "_" key), then alias replacement.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();

    // Single characters skip trimming so that " " and "\n" survive long
    // enough to hit the alias table.
    if lowered.chars().count() == 1 {
        return match alias_lookup(&lowered) {
            Some(canonical) => canonical.to_string(),
            None => lowered,
        };
    }

    let mut collapsed = String::with_capacity(lowered.len());
    for part in lowered.split_whitespace() {
        if !collapsed.is_empty() {
            collapsed.push(' ');
        }
        collapsed.push_str(part);
    }

    for suffix in STRIPPED_SUFFIXES {
        if let Some(stripped) = collapsed.strip_suffix(suffix) {
            collapsed = stripped.to_string();
            break;
        }
    }

    if collapsed != "_" {
        collapsed = collapsed.replace('_', " ");
    }

    match alias_lookup(&collapsed) {
        Some(canonical) => canonical.to_string(),
        None => collapsed,
    }
}

/// Returns the unsided modifier a name refers to, if any. "left ctrl",
/// "ctrl" -> Some("ctrl"); "a" -> None.
pub fn base_modifier(name: &str) -> Option<&'static str> {
    let base = name
        .strip_prefix("left ")
        .or_else(|| name.strip_prefix("right "))
        .unwrap_or(name);
    MODIFIERS.iter().find(|m| **m == base).copied()
}

/// True for any modifier name, sided or not.
pub fn is_modifier(name: &str) -> bool {
    base_modifier(name).is_some()
}

fn is_sided(name: &str) -> bool {
    name.starts_with("left ") || name.starts_with("right ")
}

/// A keystroke that produces a character: one scan code, optionally shifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keystroke {
    pub scan_code: ScanCode,
    pub shift: bool,
}

/// Bidirectional mapping between canonical names and scan codes, built once
/// from the backend's key table.
#[derive(Debug, Default)]
pub struct NameTable {
    /// Canonical name -> scan codes, in the order the backend first
    /// reported each code.
    to_codes: HashMap<String, Vec<ScanCode>>,
    /// Scan code -> names, in registration order.
    to_names: HashMap<ScanCode, Vec<String>>,
    keypad: HashMap<ScanCode, bool>,
}

impl NameTable {
    /// Builds the table from backend `(scan_code, name, is_keypad)` entries.
    /// Names are normalized on the way in; duplicate pairs are ignored.
    pub fn from_mapping<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ScanCode, String, bool)>,
    {
        let mut table = NameTable::default();
        for (scan_code, raw_name, is_keypad) in entries {
            let name = normalize_name(&raw_name);
            if name.is_empty() {
                continue;
            }

            let codes = table.to_codes.entry(name.clone()).or_default();
            if !codes.contains(&scan_code) {
                codes.push(scan_code);
            }

            let names = table.to_names.entry(scan_code).or_default();
            if !names.iter().any(|n| n == &name) {
                names.push(name);
            }

            table.keypad.entry(scan_code).or_insert(is_keypad);
        }
        table
    }

    /// Forward lookup. Empty when the name is unknown; callers decide
    /// whether that is fatal.
    pub fn scan_codes(&self, name: &str) -> Vec<ScanCode> {
        self.to_codes
            .get(&normalize_name(name))
            .cloned()
            .unwrap_or_default()
    }

    /// All names registered for a code, in registration order.
    pub fn names(&self, scan_code: ScanCode) -> &[String] {
        self.to_names
            .get(&scan_code)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The name to report for a scan code: the first registered name that is
    /// not a sided modifier, with navigation names preferred over keypad
    /// doubles. `sided` asks for the raw first name instead.
    pub fn preferred_name(&self, scan_code: ScanCode, sided: bool) -> Option<&str> {
        let names = self.to_names.get(&scan_code)?;
        if sided {
            return names.first().map(String::as_str);
        }
        if let Some(nav) = names.iter().find(|n| NAV_PREFERRED.contains(&n.as_str())) {
            return Some(nav);
        }
        names
            .iter()
            .find(|n| !is_sided(n))
            .or_else(|| names.first())
            .map(String::as_str)
    }

    pub fn is_keypad(&self, scan_code: ScanCode) -> bool {
        self.keypad.get(&scan_code).copied().unwrap_or(false)
    }

    /// Resolves a key token to the set of scan codes that can satisfy it: a
    /// non-negative integer is taken as a literal scan code, anything else
    /// goes through name normalization and the forward map.
    pub fn key_to_scan_codes(&self, key: &str) -> Result<Vec<ScanCode>> {
        let token = key.trim();
        if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
            let code: ScanCode = token
                .parse()
                .map_err(|_| Error::UnknownKey(key.to_string()))?;
            return Ok(vec![code]);
        }

        let codes = self.scan_codes(token);
        if codes.is_empty() {
            Err(Error::UnknownKey(key.to_string()))
        } else {
            Ok(codes)
        }
    }

    /// Maps a character to the keystroke that types it, when the character
    /// is reachable with at most a shift modifier on this table. Characters
    /// outside the table fall back to the backend's Unicode path.
    pub fn to_keystroke(&self, ch: char) -> Option<Keystroke> {
        let direct = self.scan_codes(&ch.to_string());
        if let Some(&scan_code) = direct.first() {
            return Some(Keystroke {
                scan_code,
                shift: false,
            });
        }

        if ch.is_ascii_uppercase() {
            let base = ch.to_ascii_lowercase().to_string();
            if let Some(&scan_code) = self.scan_codes(&base).first() {
                return Some(Keystroke {
                    scan_code,
                    shift: true,
                });
            }
        }

        if let Some((_, base)) = SHIFTED_CHARS.iter().find(|(c, _)| *c == ch) {
            if let Some(&scan_code) = self.scan_codes(&base.to_string()).first() {
                return Some(Keystroke {
                    scan_code,
                    shift: true,
                });
            }
        }

        None
    }
}
