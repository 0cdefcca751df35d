//! Naming rules used to derive default table names, property names and
//! foreign keys from association aliases.
//!
//! `Posts` → table `posts`, property `posts`, foreign key on the child side
//! `post_id`; `PostsTags` → table `posts_tags`.

use regex::Regex;
use std::sync::LazyLock;

struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

fn rules(table: &[(&str, &'static str)]) -> Vec<Rule> {
    table
        .iter()
        .filter_map(|(pattern, replacement)| {
            match Regex::new(pattern) {
                Ok(pattern) => Some(Rule {
                    pattern,
                    replacement,
                }),
                Err(e) => {
                    tracing::warn!(
                        pattern = %pattern,
                        error = %e,
                        "Invalid inflection pattern, rule skipped"
                    );
                    None
                }
            }
        })
        .collect()
}

static UNCOUNTABLE: &[&str] = &[
    "data",
    "equipment",
    "fish",
    "information",
    "media",
    "money",
    "news",
    "rice",
    "series",
    "sheep",
    "species",
];

static SINGULAR: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    rules(&[
        (r"(?i)(s)tatuses$", "${1}tatus"),
        (r"(?i)(quiz)zes$", "${1}"),
        (r"(?i)(matr)ices$", "${1}ix"),
        (r"(?i)(vert|ind)ices$", "${1}ex"),
        (r"(?i)^(ox)en", "${1}"),
        (r"(?i)(alias)(es)*$", "${1}"),
        (r"(?i)(alumn|bacill|cact|foc|fung|nucle|radi|stimul|syllab|termin)i$", "${1}us"),
        (r"(?i)(cris|ax|test)es$", "${1}is"),
        (r"(?i)(shoe)s$", "${1}"),
        (r"(?i)(o)es$", "${1}"),
        (r"ouses$", "ouse"),
        (r"([^a])uses$", "${1}us"),
        (r"(?i)([ml])ice$", "${1}ouse"),
        (r"(?i)(x|ch|ss|sh)es$", "${1}"),
        (r"(?i)(m)ovies$", "${1}ovie"),
        (r"(?i)([^aeiouy]|qu)ies$", "${1}y"),
        (r"(?i)(tive|hive|drive)s$", "${1}"),
        (r"(?i)([le])ves$", "${1}f"),
        (r"(?i)([^rfoa])ves$", "${1}fe"),
        (r"(?i)(analy|diagno|^ba|parenthe|progno|synop|the)ses$", "${1}sis"),
        (r"(?i)([ti])a$", "${1}um"),
        (r"(?i)(p)eople$", "${1}erson"),
        (r"(?i)(m)en$", "${1}an"),
        (r"(?i)(c)hildren$", "${1}hild"),
        (r"eaus$", "eau"),
        (r"^(.*us)$", "${1}"),
        (r"(?i)s$", ""),
    ])
});

static PLURAL: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    rules(&[
        (r"(?i)(s)tatus$", "${1}tatuses"),
        (r"(?i)(quiz)$", "${1}zes"),
        (r"(?i)^(ox)$", "${1}en"),
        (r"(?i)([ml])ouse$", "${1}ice"),
        (r"(?i)(matr|vert|ind)(ix|ex)$", "${1}ices"),
        (r"(?i)(x|ch|ss|sh)$", "${1}es"),
        (r"(?i)([^aeiouy]|qu)y$", "${1}ies"),
        (r"(?i)(hive|chef)$", "${1}s"),
        (r"(?i)([^f])fe$", "${1}ves"),
        (r"(?i)([lr])f$", "${1}ves"),
        (r"(?i)sis$", "ses"),
        (r"(?i)([ti])um$", "${1}a"),
        (r"(?i)(p)erson$", "${1}eople"),
        (r"(?i)(c)hild$", "${1}hildren"),
        (r"(?i)(buffal|tomat)o$", "${1}oes"),
        (r"(?i)(alumn|bacill|cact|foc|fung|nucle|radi|stimul|syllab|termin)us$", "${1}i"),
        (r"(?i)us$", "uses"),
        (r"(?i)(alias)$", "${1}es"),
        (r"(?i)(ax|cris|test)is$", "${1}es"),
        (r"s$", "s"),
        (r"$", "s"),
    ])
});

fn is_uncountable(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    UNCOUNTABLE.iter().any(|u| lower.ends_with(u))
}

fn apply(rules: &[Rule], word: &str) -> String {
    if word.is_empty() || is_uncountable(word) {
        return word.to_string();
    }
    for rule in rules {
        if rule.pattern.is_match(word) {
            return rule.pattern.replace(word, rule.replacement).into_owned();
        }
    }
    word.to_string()
}

/// Singular form of an English word (`posts` → `post`, `categories` → `category`).
pub fn singularize(word: &str) -> String {
    apply(&SINGULAR, word)
}

/// Plural form of an English word (`post` → `posts`, `category` → `categories`).
pub fn pluralize(word: &str) -> String {
    apply(&PLURAL, word)
}

/// `PostsTags` → `posts_tags`.
pub fn underscore(word: &str) -> String {
    let mut out = String::with_capacity(word.len() + 4);
    let mut prev: Option<char> = None;
    for ch in word.chars() {
        if ch.is_ascii_uppercase() {
            if prev.is_some_and(|p| p.is_alphanumeric() || p == '_') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
        prev = Some(ch);
    }
    out
}

/// `posts_tags` → `PostsTags`.
pub fn camelize(word: &str) -> String {
    word.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Default table name for a table alias (`BlogPosts` → `blog_posts`).
pub fn tableize(alias: &str) -> String {
    underscore(alias)
}

/// Default foreign key column pointing at rows of `alias` (`Users` → `user_id`).
pub fn foreign_key(alias: &str) -> String {
    format!("{}_id", singularize(&underscore(alias)))
}
