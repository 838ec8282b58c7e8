//! Terminal styling applied to prefixes and the health panel label.

use std::str::FromStr;

use crossterm::style::{Attribute, Color, ContentStyle};

/// Color plus text attributes, threaded opaquely through the renderer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Style {
    pub color: Option<Color>,
    pub bold: bool,
    pub underline: bool,
}

impl Style {
    /// Style with only a foreground color
    pub fn color(color: Color) -> Self {
        Self {
            color: Some(color),
            ..Self::default()
        }
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn underline(mut self) -> Self {
        self.underline = true;
        self
    }

    pub fn is_plain(&self) -> bool {
        self.color.is_none() && !self.bold && !self.underline
    }

    /// Wrap `text` in the escape sequences of this style
    ///
    /// A plain style returns the text unchanged.
    pub fn apply(&self, text: &str) -> String {
        if self.is_plain() {
            return text.to_string();
        }

        let mut style = ContentStyle::new();
        style.foreground_color = self.color;
        if self.bold {
            style.attributes.set(Attribute::Bold);
        }
        if self.underline {
            style.attributes.set(Attribute::Underlined);
        }
        style.apply(text).to_string()
    }
}

/// Error for unrecognised style descriptors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid color: {0}")]
pub struct StyleParseError(pub String);

impl FromStr for Style {
    type Err = StyleParseError;

    /// Parse `color[.bold][.underline]`
    ///
    /// Colors are names (`red`, `hiblue`), 256-color indices (`208`) or
    /// hex triplets (`#ff8800`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut style = Style::default();

        let color = parts.next().unwrap_or_default();
        if !color.is_empty() {
            style.color = Some(parse_color(color)?);
        }

        for modifier in parts {
            match modifier.to_ascii_lowercase().as_str() {
                "bold" => style.bold = true,
                "underline" => style.underline = true,
                _ => return Err(StyleParseError(s.to_string())),
            }
        }

        Ok(style)
    }
}

fn parse_color(s: &str) -> Result<Color, StyleParseError> {
    if let Ok(index) = s.parse::<u8>() {
        return Ok(Color::AnsiValue(index));
    }

    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex).ok_or_else(|| StyleParseError(s.to_string()));
    }

    let color = match s.to_ascii_lowercase().as_str() {
        "black" => Color::Black,
        "red" => Color::DarkRed,
        "green" => Color::DarkGreen,
        "yellow" => Color::DarkYellow,
        "blue" => Color::DarkBlue,
        "magenta" => Color::DarkMagenta,
        "cyan" => Color::DarkCyan,
        "white" => Color::Grey,
        "hiblack" => Color::DarkGrey,
        "hired" => Color::Red,
        "higreen" => Color::Green,
        "hiyellow" => Color::Yellow,
        "hiblue" => Color::Blue,
        "himagenta" => Color::Magenta,
        "hicyan" => Color::Cyan,
        "hiwhite" => Color::White,
        _ => return Err(StyleParseError(s.to_string())),
    };
    Ok(color)
}

fn parse_hex(hex: &str) -> Option<Color> {
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Color::Rgb { r, g, b })
}
