//! Color resolution for presence markers and mesh styling.
//!
//! Collaborator colors arrive as hex strings, named colors, or
//! `var(--x)` CSS custom-property references that must be resolved
//! through the host theme palette. Unresolvable specs fall back to
//! `steelblue`, matching the presence default.

use std::collections::HashMap;

/// An rgb color with components in `0..=1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    #[must_use]
    pub const fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// The presence fallback color.
    pub const STEELBLUE: Self = Self::rgb(70.0 / 255.0, 130.0 / 255.0, 180.0 / 255.0);

    /// Parse `#rgb` or `#rrggbb`.
    #[must_use]
    pub fn from_hex(spec: &str) -> Option<Self> {
        let digits = spec.strip_prefix('#')?;
        let (r, g, b) = match digits.len() {
            3 => {
                let channel = |i: usize| u8::from_str_radix(&digits[i..=i], 16).ok().map(|v| v * 17);
                (channel(0)?, channel(1)?, channel(2)?)
            }
            6 => {
                let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
                (channel(0)?, channel(2)?, channel(4)?)
            }
            _ => return None,
        };
        Some(Self::rgb(f64::from(r) / 255.0, f64::from(g) / 255.0, f64::from(b) / 255.0))
    }

    /// Build from a `[r, g, b]` JSON array in `0..=1`, the shape gui
    /// overrides use.
    #[must_use]
    pub fn from_rgb_value(value: &serde_json::Value) -> Option<Self> {
        let arr = value.as_array()?;
        if arr.len() < 3 {
            return None;
        }
        Some(Self::rgb(arr[0].as_f64()?, arr[1].as_f64()?, arr[2].as_f64()?))
    }
}

fn named(name: &str) -> Option<Color> {
    let rgb = |r: u8, g: u8, b: u8| {
        Color::rgb(f64::from(r) / 255.0, f64::from(g) / 255.0, f64::from(b) / 255.0)
    };
    match name {
        "black" => Some(rgb(0, 0, 0)),
        "white" => Some(rgb(255, 255, 255)),
        "red" => Some(rgb(255, 0, 0)),
        "green" => Some(rgb(0, 128, 0)),
        "blue" => Some(rgb(0, 0, 255)),
        "orange" => Some(rgb(255, 165, 0)),
        "tomato" => Some(rgb(255, 99, 71)),
        "steelblue" => Some(Color::STEELBLUE),
        _ => None,
    }
}

/// Resolve a color spec against the theme palette, falling back to the
/// given default. `var(--x)` looks up `--x` in the palette and resolves
/// whatever it finds there.
#[must_use]
pub fn resolve_or(spec: &str, palette: &HashMap<String, String>, fallback: Color) -> Color {
    let spec = spec.trim();
    if let Some(var) = spec.strip_prefix("var(").and_then(|s| s.strip_suffix(')')) {
        return palette
            .get(var.trim())
            .map_or(fallback, |value| resolve_or(value, palette, fallback));
    }
    Color::from_hex(spec).or_else(|| named(spec)).unwrap_or(fallback)
}

/// Resolve a collaborator color spec; unresolvable specs become
/// steelblue.
#[must_use]
pub fn resolve(spec: &str, palette: &HashMap<String, String>) -> Color {
    resolve_or(spec, palette, Color::STEELBLUE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parsing() {
        assert_eq!(Color::from_hex("#ff0000"), Some(Color::rgb(1.0, 0.0, 0.0)));
        assert_eq!(Color::from_hex("#fff"), Some(Color::rgb(1.0, 1.0, 1.0)));
        assert_eq!(Color::from_hex("ff0000"), None);
        assert_eq!(Color::from_hex("#zzz"), None);
    }

    #[test]
    fn css_variable_resolves_through_palette() {
        let palette = HashMap::from([("--user-color".to_string(), "#00ff00".to_string())]);
        let color = resolve("var(--user-color)", &palette);
        assert_eq!(color, Color::rgb(0.0, 1.0, 0.0));
    }

    #[test]
    fn unknown_specs_fall_back_to_steelblue() {
        let palette = HashMap::new();
        assert_eq!(resolve("var(--missing)", &palette), Color::STEELBLUE);
        assert_eq!(resolve("chartreuse-ish", &palette), Color::STEELBLUE);
    }

    #[test]
    fn gui_override_rgb_array() {
        let value = serde_json::json!([0.1, 0.2, 0.3]);
        assert_eq!(Color::from_rgb_value(&value), Some(Color::rgb(0.1, 0.2, 0.3)));
        assert_eq!(Color::from_rgb_value(&serde_json::json!("red")), None);
        assert_eq!(Color::from_rgb_value(&serde_json::json!([1.0])), None);
    }
}
