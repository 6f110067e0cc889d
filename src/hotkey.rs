//! Hotkey parsing: text specifications into matchable scan-code sets.
//!
//! A hotkey string like `"ctrl+shift+a, b"` compiles into an ordered list of
//! [`Step`]s, each holding the [`KeyClass`]es that must be simultaneously
//! down. A key class is the set of scan codes any of which satisfies the
//! token, so `ctrl` matches either physical ctrl key.

use crate::error::{Error, Result};
use crate::event::ScanCode;
use crate::key::{base_modifier, normalize_name, NameTable};

/// The set of scan codes that satisfy one key token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyClass {
    /// Normalized token the class was resolved from, kept for display.
    pub token: String,
    /// Scan codes in backend registration order; never empty.
    pub scan_codes: Vec<ScanCode>,
}

impl KeyClass {
    pub fn contains(&self, scan_code: ScanCode) -> bool {
        self.scan_codes.contains(&scan_code)
    }
}

/// An unordered set of key classes that must be concurrently held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub keys: Vec<KeyClass>,
}

impl Step {
    /// Expands the step to its Cartesian combinations: every way of picking
    /// one concrete scan code per key class.
    pub fn combinations(&self) -> Vec<Vec<ScanCode>> {
        let mut combos: Vec<Vec<ScanCode>> = vec![Vec::new()];
        for class in &self.keys {
            let mut next = Vec::with_capacity(combos.len() * class.scan_codes.len());
            for combo in &combos {
                for &code in &class.scan_codes {
                    let mut extended = combo.clone();
                    extended.push(code);
                    next.push(extended);
                }
            }
            combos = next;
        }
        combos
    }

    /// True when the scan code belongs to any key class of this step.
    pub fn involves(&self, scan_code: ScanCode) -> bool {
        self.keys.iter().any(|class| class.contains(scan_code))
    }
}

/// An ordered sequence of steps. The parsed form of a hotkey specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hotkey {
    pub steps: Vec<Step>,
}

impl Hotkey {
    /// A one-step hotkey from a literal scan code.
    pub fn from_scan_code(scan_code: ScanCode) -> Self {
        Hotkey::from_scan_codes(&[scan_code])
    }

    /// A one-step hotkey from a flat list of scan codes, one key class per
    /// code.
    pub fn from_scan_codes(scan_codes: &[ScanCode]) -> Self {
        Hotkey {
            steps: vec![Step {
                keys: scan_codes
                    .iter()
                    .map(|&code| KeyClass {
                        token: code.to_string(),
                        scan_codes: vec![code],
                    })
                    .collect(),
            }],
        }
    }

    pub fn is_single_step(&self) -> bool {
        self.steps.len() == 1
    }
}

impl std::fmt::Display for Hotkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps: Vec<String> = self
            .steps
            .iter()
            .map(|step| {
                step.keys
                    .iter()
                    .map(|class| speakable(&class.token))
                    .collect::<Vec<_>>()
                    .join("+")
            })
            .collect();
        write!(f, "{}", steps.join(", "))
    }
}

/// Replaces grammar separators with their literal key names so the result
/// can be parsed back.
fn speakable(token: &str) -> String {
    match token {
        "+" => "plus".to_string(),
        "," => "comma".to_string(),
        " " => "space".to_string(),
        other => other.to_string(),
    }
}

/// Parses a hotkey string like "ctrl+shift+a, b" into steps of key classes.
///
/// Whitespace around `,` and `+` is insignificant. The tokens `plus`,
/// `comma` and `space` stand for the characters they name. A bare integer is
/// a literal scan code.
pub fn parse_hotkey(table: &NameTable, spec: &str) -> Result<Hotkey> {
    // A single character is always one key, even if it is '+' or ','.
    if spec.chars().count() == 1 {
        return Ok(Hotkey {
            steps: vec![Step {
                keys: vec![resolve_token(table, spec)?],
            }],
        });
    }

    if spec.trim().is_empty() {
        return Err(Error::Parse("empty hotkey".to_string()));
    }

    let mut steps = Vec::new();
    for step_spec in spec.split(',') {
        let mut keys = Vec::new();
        for token in step_spec.split('+') {
            let token = token.trim();
            if token.is_empty() {
                return Err(Error::Parse(format!(
                    "empty key in {:?}; use 'plus' or 'comma' for literal separators",
                    spec
                )));
            }
            keys.push(resolve_token(table, token)?);
        }
        steps.push(Step { keys });
    }
    Ok(Hotkey { steps })
}

fn resolve_token(table: &NameTable, token: &str) -> Result<KeyClass> {
    let scan_codes = table.key_to_scan_codes(token)?;
    Ok(KeyClass {
        token: normalize_name(token),
        scan_codes,
    })
}

/// Builds the canonical display name for a set of simultaneously held keys:
/// names are normalized, side prefixes dropped, separators made speakable,
/// modifiers first in a standardized order, the rest sorted. A left inverse
/// of [`parse_hotkey`] for single-step hotkeys modulo alias normalization.
pub fn hotkey_name<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    const MODIFIER_ORDER: &[&str] = &["ctrl", "alt", "shift", "windows"];

    let mut cleaned: Vec<String> = names
        .into_iter()
        .map(|name| {
            let normalized = normalize_name(name.as_ref());
            let unsided = base_modifier(&normalized)
                .map(str::to_string)
                .unwrap_or(normalized);
            speakable(&unsided)
        })
        .collect();
    cleaned.sort();
    cleaned.dedup();

    cleaned.sort_by_key(|name| {
        (
            MODIFIER_ORDER
                .iter()
                .position(|m| m == name)
                .unwrap_or(MODIFIER_ORDER.len()),
            name.clone(),
        )
    });
    cleaned.join("+")
}
