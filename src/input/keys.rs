//! Key names and combos (`"enter"`, `"ctrl+shift+s"`).

use std::fmt;
use std::str::FromStr;

use super::InputError;

/// A keyboard key, independent of any platform backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Control,
    Shift,
    Alt,
    Meta,
    Enter,
    Tab,
    Escape,
    Backspace,
    Delete,
    Space,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    CapsLock,
    /// F1..=F12
    F(u8),
    Char(char),
}

impl Key {
    /// Modifier keys released by an emergency stop.
    pub const MODIFIERS: [Key; 4] = [Key::Control, Key::Shift, Key::Alt, Key::Meta];

    pub fn is_modifier(&self) -> bool {
        Self::MODIFIERS.contains(self)
    }
}

impl FromStr for Key {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let mut chars = name.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Ok(Key::Char(c));
        }
        let lower = name.to_ascii_lowercase();
        let key = match lower.as_str() {
            "ctrl" | "control" => Key::Control,
            "shift" => Key::Shift,
            "alt" | "option" => Key::Alt,
            "meta" | "cmd" | "command" | "win" | "super" => Key::Meta,
            "enter" | "return" => Key::Enter,
            "tab" => Key::Tab,
            "esc" | "escape" => Key::Escape,
            "backspace" => Key::Backspace,
            "delete" | "del" => Key::Delete,
            "space" => Key::Space,
            "up" => Key::Up,
            "down" => Key::Down,
            "left" => Key::Left,
            "right" => Key::Right,
            "home" => Key::Home,
            "end" => Key::End,
            "pageup" => Key::PageUp,
            "pagedown" => Key::PageDown,
            "capslock" => Key::CapsLock,
            "plus" => Key::Char('+'),
            other => match other.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                Some(n @ 1..=12) => Key::F(n),
                _ => return Err(InputError::UnknownKey(name.to_string())),
            },
        };
        Ok(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::F(n) => write!(f, "f{n}"),
            Key::Char(c) => write!(f, "{c}"),
            other => write!(f, "{}", format!("{other:?}").to_ascii_lowercase()),
        }
    }
}

/// Parse a `+`-separated combo. Modifiers come first in the returned order as written.
pub fn parse_combo(combo: &str) -> Result<Vec<Key>, InputError> {
    let trimmed = combo.trim();
    if trimmed.is_empty() {
        return Err(InputError::UnknownKey(combo.to_string()));
    }
    if trimmed == "+" {
        return Ok(vec![Key::Char('+')]);
    }
    // A trailing `++` is a separator followed by the plus key itself.
    if let Some(head) = trimmed.strip_suffix("++") {
        let mut keys = parse_combo(head)?;
        keys.push(Key::Char('+'));
        return Ok(keys);
    }
    trimmed.split('+').map(str::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_combos() {
        assert_eq!(
            parse_combo("ctrl+shift+s").unwrap(),
            vec![Key::Control, Key::Shift, Key::Char('s')]
        );
        assert_eq!(parse_combo("Enter").unwrap(), vec![Key::Enter]);
        assert_eq!(parse_combo("f5").unwrap(), vec![Key::F(5)]);
        assert_eq!(parse_combo("+").unwrap(), vec![Key::Char('+')]);
        assert_eq!(parse_combo("A").unwrap(), vec![Key::Char('A')]);
    }

    #[test]
    fn plus_key_after_a_separator() {
        assert_eq!(
            parse_combo("ctrl++").unwrap(),
            vec![Key::Control, Key::Char('+')]
        );
        assert_eq!(
            parse_combo("ctrl+shift++").unwrap(),
            vec![Key::Control, Key::Shift, Key::Char('+')]
        );
        assert!(parse_combo("ctrl+").is_err());
        assert!(parse_combo("++").is_err());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse_combo("ctrl+hyper").is_err());
        assert!(parse_combo("f13").is_err());
        assert!(parse_combo("  ").is_err());
    }

    #[test]
    fn display_round_trips_names() {
        for key in [Key::PageDown, Key::F(12), Key::Char('x'), Key::Control] {
            assert_eq!(key.to_string().parse::<Key>().unwrap(), key);
        }
    }
}
