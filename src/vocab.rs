//! Mode vocabulary learned from the peer's capability advertisement.
//!
//! Cross-protocol consumers address modes by symbolic name (`op`, `ban`,
//! `regonly`); the letters behind those names, the A/B/C/D argument
//! classes, and the prefix-mode table all come from `CAPAB` and are only
//! stable once the link is marked connected.

use std::collections::HashMap;

/// The four channel-mode argument classes of the ISUPPORT model.
///
/// A: list-valued, argument on both signs. B: argument on both signs.
/// C: argument when setting only. D: never an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeClass {
    A,
    B,
    C,
    D,
}

/// Partition of mode letters into classes, from a `CHANMODES=A,B,C,D`
/// (or `USERMODES=...`) token.
#[derive(Debug, Clone, Default)]
pub struct ModeClasses {
    pub a: String,
    pub b: String,
    pub c: String,
    pub d: String,
}

impl ModeClasses {
    /// Parse the comma-separated four-bucket form.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(4, ',');
        let (a, b, c, d) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        Some(ModeClasses {
            a: a.to_string(),
            b: b.to_string(),
            c: c.to_string(),
            d: d.to_string(),
        })
    }

    /// Look up which class a letter belongs to.
    pub fn classify(&self, letter: char) -> Option<ModeClass> {
        if self.a.contains(letter) {
            Some(ModeClass::A)
        } else if self.b.contains(letter) {
            Some(ModeClass::B)
        } else if self.c.contains(letter) {
            Some(ModeClass::C)
        } else if self.d.contains(letter) {
            Some(ModeClass::D)
        } else {
            None
        }
    }
}

/// The live symbolic-name and class tables for one link.
#[derive(Debug, Clone, Default)]
pub struct ModeVocabulary {
    cmodes: HashMap<String, char>,
    umodes: HashMap<String, char>,
    pub cmode_classes: ModeClasses,
    pub umode_classes: ModeClasses,
    prefix_modes: HashMap<char, char>,
}

impl ModeVocabulary {
    /// Ingest a `CAPAB CHANMODES` advertisement: space-separated
    /// `name=letter` pairs, where the letter may carry a status symbol
    /// (`op=@o`).
    ///
    /// Two names are normalized for cross-protocol neutrality:
    /// `reginvite` becomes `regonly` and `founder` becomes `owner`.
    pub fn learn_cmodes(&mut self, pairs: &str) {
        for pair in pairs.split_whitespace() {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = match name.trim_start_matches(':') {
                "reginvite" => "regonly",
                "founder" => "owner",
                other => other,
            };
            if let Some(letter) = value.chars().last() {
                self.cmodes.insert(name.to_string(), letter);
            }
        }
    }

    /// Ingest a `CAPAB USERMODES` advertisement.
    pub fn learn_umodes(&mut self, pairs: &str) {
        for pair in pairs.split_whitespace() {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            if let Some(letter) = value.chars().last() {
                self.umodes
                    .insert(name.trim_start_matches(':').to_string(), letter);
            }
        }
    }

    /// Ingest a `PREFIX=(letters)symbols` token, zipping mode letters to
    /// their status symbols.
    pub fn learn_prefixes(&mut self, spec: &str) -> Option<()> {
        let open = spec.find('(')?;
        let close = spec[open + 1..].find(')')? + open + 1;
        let letters = &spec[open + 1..close];
        let symbols = &spec[close + 1..];
        if letters.is_empty() || symbols.chars().count() < letters.chars().count() {
            return None;
        }
        for (letter, symbol) in letters.chars().zip(symbols.chars()) {
            self.prefix_modes.insert(letter, symbol);
        }
        Some(())
    }

    /// Resolve a symbolic channel-mode name to its letter.
    pub fn cmode(&self, name: &str) -> Option<char> {
        self.cmodes.get(name).copied()
    }

    /// Resolve a symbolic user-mode name to its letter.
    pub fn umode(&self, name: &str) -> Option<char> {
        self.umodes.get(name).copied()
    }

    /// Whether a channel-mode letter is a membership status mode.
    pub fn is_prefix_mode(&self, letter: char) -> bool {
        self.prefix_modes.contains_key(&letter)
    }

    /// The status symbol for a prefix-mode letter (`o` yields `@`).
    pub fn prefix_symbol(&self, letter: char) -> Option<char> {
        self.prefix_modes.get(&letter).copied()
    }

    /// Whether a channel-mode letter is list-valued (class A).
    pub fn is_list_mode(&self, letter: char) -> bool {
        self.cmode_classes.a.contains(letter)
    }
}
