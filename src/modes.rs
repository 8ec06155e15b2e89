//! Mode string parsing and serialization.
//!
//! A mode string such as `+ovl-b user1 user2 50 *!*@spam` is an ordered
//! list of signed letters with interleaved arguments. Which letters
//! consume an argument depends on the letter's class in the
//! [`ModeVocabulary`](crate::vocab::ModeVocabulary) and on the sign, so
//! parsing is only possible against a negotiated vocabulary.

use serde::ser::{Serialize, SerializeTuple, Serializer};
use tracing::warn;

use crate::vocab::{ModeClass, ModeVocabulary};

/// A stored `(letter, argument)` pair, the form kept in user and channel
/// records.
pub type ModePair = (char, Option<String>);

/// Whether a change sets or unsets its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeSign {
    Add,
    Remove,
}

impl ModeSign {
    /// The wire character for this sign.
    pub fn symbol(self) -> char {
        match self {
            ModeSign::Add => '+',
            ModeSign::Remove => '-',
        }
    }
}

/// One parsed mode change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModeChange {
    pub sign: ModeSign,
    pub letter: char,
    pub arg: Option<String>,
}

impl ModeChange {
    /// A setting change.
    pub fn add(letter: char, arg: Option<String>) -> Self {
        ModeChange { sign: ModeSign::Add, letter, arg }
    }

    /// An unsetting change.
    pub fn remove(letter: char, arg: Option<String>) -> Self {
        ModeChange { sign: ModeSign::Remove, letter, arg }
    }

    /// The signed letter, e.g. `+o`.
    pub fn signed(&self) -> String {
        let mut s = String::with_capacity(2);
        s.push(self.sign.symbol());
        s.push(self.letter);
        s
    }
}

impl From<&ModePair> for ModeChange {
    fn from((letter, arg): &ModePair) -> Self {
        ModeChange::add(*letter, arg.clone())
    }
}

// Hook payloads carry changes as `["+o", arg]` pairs.
impl Serialize for ModeChange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(2)?;
        tup.serialize_element(&self.signed())?;
        tup.serialize_element(&self.arg)?;
        tup.end()
    }
}

/// What kind of record a mode string applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTarget {
    Channel,
    User,
}

/// Parse a tokenized mode string against the vocabulary.
///
/// `pieces` is the argument vector starting at the letters token, e.g.
/// `["+ovl-b", "user1", "user2", "50", "*!*@spam"]`. Argument consumption:
/// prefix modes and classes A and B consume on both signs, class C on `+`
/// only, class D never. Unknown letters are skipped without consuming an
/// argument.
pub fn parse_modes(vocab: &ModeVocabulary, target: ModeTarget, pieces: &[&str]) -> Vec<ModeChange> {
    let mut changes = Vec::new();
    let Some((letters, rest)) = pieces.split_first() else {
        return changes;
    };
    let mut args = rest.iter();
    let mut sign = ModeSign::Add;

    for c in letters.chars() {
        match c {
            '+' => sign = ModeSign::Add,
            '-' => sign = ModeSign::Remove,
            _ => {
                let takes_arg = match target {
                    ModeTarget::Channel if vocab.is_prefix_mode(c) => true,
                    ModeTarget::Channel => match vocab.cmode_classes.classify(c) {
                        Some(ModeClass::A) | Some(ModeClass::B) => true,
                        Some(ModeClass::C) => sign == ModeSign::Add,
                        Some(ModeClass::D) => false,
                        None => {
                            warn!(letter = %c, "skipping unknown channel mode");
                            continue;
                        }
                    },
                    ModeTarget::User => match vocab.umode_classes.classify(c) {
                        Some(ModeClass::A) | Some(ModeClass::B) => true,
                        Some(ModeClass::C) => sign == ModeSign::Add,
                        // Letters outside the advertised user-mode classes
                        // are common (the class token only covers modes
                        // with arguments), so treat them as argumentless.
                        Some(ModeClass::D) | None => false,
                    },
                };
                let arg = if takes_arg {
                    match args.next() {
                        Some(a) => Some((*a).to_string()),
                        None => {
                            warn!(letter = %c, "mode is missing its argument, skipping");
                            continue;
                        }
                    }
                } else {
                    None
                };
                changes.push(ModeChange { sign, letter: c, arg });
            }
        }
    }
    changes
}

/// Serialize changes back into wire form: the inverse of [`parse_modes`].
///
/// Letters are grouped under their sign in input order and arguments
/// follow in the same order. The empty set renders as `+` and no trailing
/// space is emitted when there are no arguments.
pub fn join_modes<'a, I>(changes: I) -> String
where
    I: IntoIterator<Item = &'a ModeChange>,
{
    let mut out = String::new();
    let mut args: Vec<&str> = Vec::new();
    let mut prev: Option<ModeSign> = None;

    for change in changes {
        if prev != Some(change.sign) {
            out.push(change.sign.symbol());
            prev = Some(change.sign);
        }
        out.push(change.letter);
        if let Some(arg) = change.arg.as_deref() {
            args.push(arg);
        }
    }
    if out.is_empty() {
        return "+".to_string();
    }
    if !args.is_empty() {
        out.push(' ');
        out.push_str(&args.join(" "));
    }
    out
}
