//! Date-folder name normalization.
//!
//! People type date folders in many ways: `2025-12-21`, `21.12.2025`,
//! `20251221`, `21. Dezember 2025`, `December 21st, 2025`, or nested
//! `2025/12/21`. Everything is normalized to a canonical `YYYY-MM-DD` key.
//! Text after a recognised date (`2025-12-21 Sportfest`) is ignored.

use chrono::NaiveDate;

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

/// Month names and abbreviations (English, German, French, Spanish), lowercase.
const MONTH_NAMES: &[(&str, u32)] = &[
    ("january", 1), ("jan", 1), ("januar", 1), ("jänner", 1), ("janvier", 1), ("janv", 1), ("enero", 1), ("ene", 1),
    ("february", 2), ("feb", 2), ("februar", 2), ("février", 2), ("fevrier", 2), ("févr", 2), ("fevr", 2), ("febrero", 2),
    ("march", 3), ("mar", 3), ("märz", 3), ("maerz", 3), ("mär", 3), ("mrz", 3), ("mars", 3), ("marzo", 3),
    ("april", 4), ("apr", 4), ("avril", 4), ("avr", 4), ("abril", 4), ("abr", 4),
    ("may", 5), ("mai", 5), ("mayo", 5),
    ("june", 6), ("jun", 6), ("juni", 6), ("juin", 6), ("junio", 6),
    ("july", 7), ("jul", 7), ("juli", 7), ("juillet", 7), ("juil", 7), ("julio", 7),
    ("august", 8), ("aug", 8), ("août", 8), ("aout", 8), ("agosto", 8), ("ago", 8),
    ("september", 9), ("sep", 9), ("sept", 9), ("septembre", 9), ("septiembre", 9), ("setiembre", 9),
    ("october", 10), ("oct", 10), ("oktober", 10), ("okt", 10), ("octobre", 10), ("octubre", 10),
    ("november", 11), ("nov", 11), ("novembre", 11), ("noviembre", 11),
    ("december", 12), ("dec", 12), ("dezember", 12), ("dez", 12), ("décembre", 12), ("decembre", 12),
    ("déc", 12), ("diciembre", 12), ("dic", 12),
];

/// Words that may sit between date parts without meaning anything.
const FILLER_WORDS: &[&str] = &["st", "nd", "rd", "th", "er", "de", "del", "of", "the"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(String),
    Word(String),
}

fn tokenize(name: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;

    let flush = |current: &mut String, in_digits: bool, tokens: &mut Vec<Token>| {
        if current.is_empty() {
            return;
        }
        let text = std::mem::take(current);
        if in_digits {
            tokens.push(Token::Num(text));
        } else {
            tokens.push(Token::Word(text.to_lowercase()));
        }
    };

    for ch in name.chars() {
        if ch.is_ascii_digit() {
            if !in_digits {
                flush(&mut current, in_digits, &mut tokens);
                in_digits = true;
            }
            current.push(ch);
        } else if ch.is_alphabetic() {
            if in_digits {
                flush(&mut current, in_digits, &mut tokens);
                in_digits = false;
            }
            current.push(ch);
        } else {
            flush(&mut current, in_digits, &mut tokens);
        }
    }
    flush(&mut current, in_digits, &mut tokens);

    tokens
        .into_iter()
        .filter(|t| !matches!(t, Token::Word(w) if FILLER_WORDS.contains(&w.as_str())))
        .collect()
}

fn month_from_word(word: &str) -> Option<u32> {
    MONTH_NAMES
        .iter()
        .find(|(name, _)| *name == word)
        .map(|(_, month)| *month)
}

fn year_of(digits: &str) -> Option<i32> {
    if digits.len() != 4 {
        return None;
    }
    let year: i32 = digits.parse().ok()?;
    (MIN_YEAR..=MAX_YEAR).contains(&year).then_some(year)
}

fn small_of(digits: &str) -> Option<u32> {
    if digits.is_empty() || digits.len() > 2 {
        return None;
    }
    digits.parse().ok()
}

fn build(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse a single folder name that spells out a full date.
pub fn parse_date_folder(name: &str) -> Option<NaiveDate> {
    let tokens = tokenize(name.trim());
    let first_three: Vec<&Token> = tokens.iter().take(3).collect();

    match first_three.as_slice() {
        [Token::Num(compact), ..] if compact.len() == 8 => {
            let year = year_of(&compact[0..4])?;
            build(year, compact[4..6].parse().ok()?, compact[6..8].parse().ok()?)
        }
        // YYYY MM DD
        [Token::Num(y), Token::Num(m), Token::Num(d)] if y.len() == 4 => {
            build(year_of(y)?, small_of(m)?, small_of(d)?)
        }
        // DD MM YYYY
        [Token::Num(d), Token::Num(m), Token::Num(y)] if y.len() == 4 => {
            build(year_of(y)?, small_of(m)?, small_of(d)?)
        }
        // YYYY Month DD
        [Token::Num(y), Token::Word(m), Token::Num(d)] if y.len() == 4 => {
            build(year_of(y)?, month_from_word(m)?, small_of(d)?)
        }
        // DD Month YYYY
        [Token::Num(d), Token::Word(m), Token::Num(y)] => {
            build(year_of(y)?, month_from_word(m)?, small_of(d)?)
        }
        // Month DD YYYY
        [Token::Word(m), Token::Num(d), Token::Num(y)] => {
            build(year_of(y)?, month_from_word(m)?, small_of(d)?)
        }
        _ => None,
    }
}

/// A folder that is only a year, e.g. `2025`.
pub fn parse_year_folder(name: &str) -> Option<i32> {
    match tokenize(name.trim()).as_slice() {
        [Token::Num(y)] => year_of(y),
        _ => None,
    }
}

/// A month folder inside a year folder: `12`, `Dezember`, `12 Dezember`, `12-December`.
pub fn parse_month_folder(name: &str) -> Option<u32> {
    let month = match tokenize(name.trim()).first()? {
        Token::Num(m) => small_of(m)?,
        Token::Word(w) => month_from_word(w)?,
    };
    (1..=12).contains(&month).then_some(month)
}

/// A year-month folder, e.g. `2025-12` or `Dezember 2025`.
pub fn parse_year_month_folder(name: &str) -> Option<(i32, u32)> {
    let tokens = tokenize(name.trim());
    let (year, month) = match tokens.as_slice() {
        [Token::Num(y), Token::Num(m), ..] if y.len() == 4 => (year_of(y)?, small_of(m)?),
        [Token::Num(y), Token::Word(m), ..] if y.len() == 4 => (year_of(y)?, month_from_word(m)?),
        [Token::Word(m), Token::Num(y), ..] => (year_of(y)?, month_from_word(m)?),
        _ => return None,
    };
    // A third numeric part makes it a full date, not a year-month folder.
    if matches!(tokens.get(2), Some(Token::Num(_))) {
        return None;
    }
    (1..=12).contains(&month).then_some((year, month))
}

/// A day folder inside a month folder: `21`, `21 Sportfest`.
pub fn parse_day_folder(name: &str) -> Option<u32> {
    match tokenize(name.trim()).first()? {
        Token::Num(d) => small_of(d),
        Token::Word(_) => None,
    }
}

/// Canonical `YYYY-MM-DD` key.
pub fn canonical_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
