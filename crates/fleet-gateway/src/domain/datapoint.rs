//! Datapoint name translation.
//!
//! Homebases push `(name, value)` datapoints with hierarchical slash paths
//! (`ess/subject`, `system/hostname`, `ess/git/branch`). Translation maps a
//! path deterministically onto the `(source, type)` halves of a status key.

/// A datapoint translated into status coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated {
    pub source: String,
    pub status_type: String,
    pub value: String,
}

/// Translate a datapoint name/value into `(source, type, value)`.
///
/// Total over every non-empty name:
///
/// - `@keys` → (`system`, `@keys`)
/// - `ess/git/<x>` → (`git`, `<x>`)
/// - `ess/obs_active` and `ess/in_obs` → (`ess`, `in_obs`), value coerced to
///   an integer (`0` if unparsable)
/// - `<a>/<rest>` → (`<a>`, `<rest>`)
/// - bare names → (`system`, name)
pub fn translate(name: &str, value: &str) -> Translated {
    if name == "@keys" {
        return Translated {
            source: "system".into(),
            status_type: "@keys".into(),
            value: value.to_string(),
        };
    }

    if let Some(git_key) = name.strip_prefix("ess/git/") {
        return Translated {
            source: "git".into(),
            status_type: git_key.to_string(),
            value: value.to_string(),
        };
    }

    if name == "ess/obs_active" || name == "ess/in_obs" {
        return Translated {
            source: "ess".into(),
            status_type: "in_obs".into(),
            value: coerce_integer(value),
        };
    }

    match name.split_once('/') {
        Some((source, rest)) => Translated {
            source: source.to_string(),
            status_type: rest.to_string(),
            value: value.to_string(),
        },
        None => Translated {
            source: "system".into(),
            status_type: name.to_string(),
            value: value.to_string(),
        },
    }
}

/// Coerce a value to its integer form, `"0"` when unparsable.
fn coerce_integer(value: &str) -> String {
    let trimmed = value.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return n.to_string();
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return (f as i64).to_string();
        }
    }
    "0".to_string()
}

/// Normalize a value to canonical decimal form when it is numeric.
///
/// `"007"` becomes `"7"`, `" 3.30"` becomes `"3.3"`; non-numeric values
/// (including booleans and JSON blobs) pass through untouched.
pub fn canonical_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return raw.to_string();
    }

    if let Ok(n) = trimmed.parse::<i64>() {
        return n.to_string();
    }

    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            // Shortest round-trip float formatting is the canonical form
            return format_float(f);
        }
    }

    raw.to_string()
}

/// Format a float, collapsing integral values to their integer form.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}
