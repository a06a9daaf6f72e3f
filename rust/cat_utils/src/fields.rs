// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Serde adaptors for the loosely typed values found in documents converted
//! from XML, where every leaf may arrive as text and single-element lists
//! may arrive unwrapped.

use serde::de;
use serde::Deserialize;
use serde::Deserializer;
use std::fmt::Display;
use std::str::FromStr;

/// `'y'` / `'n'` tokens as `bool`.
pub(crate) mod yes_no {
    use serde::de;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(crate::yes_no_token(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Token {
            Bool(bool),
            Text(String),
        }

        match Token::deserialize(deserializer)? {
            Token::Bool(value) => Ok(value),
            Token::Text(text) => crate::parse_yes_no(&text).map_err(de::Error::custom),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberToken<T> {
    Number(T),
    Text(String),
}

fn parse_number<T, E>(text: &str) -> Result<T, E>
where
    T: FromStr,
    T::Err: Display,
    E: de::Error,
{
    text.trim()
        .parse::<T>()
        .map_err(|e| E::custom(format!("invalid number {text:?}: {e}")))
}

/// A number given either as a JSON number or as decimal text.
pub(crate) fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match NumberToken::<T>::deserialize(deserializer)? {
        NumberToken::Number(value) => Ok(value),
        NumberToken::Text(text) => parse_number(&text),
    }
}

/// Like [`number`], with `null` and empty text mapping to `None`.
pub(crate) fn opt_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match Option::<NumberToken<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberToken::Number(value)) => Ok(Some(value)),
        Some(NumberToken::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(NumberToken::Text(text)) => parse_number(&text).map(Some),
    }
}

/// A list that may have been collapsed to its only element.
pub(crate) fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::<T>::deserialize(deserializer)? {
        OneOrMany::Many(values) => values,
        OneOrMany::One(value) => vec![value],
    })
}

/// [`one_or_many`] for optional lists.
pub(crate) fn opt_one_or_many<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(
        Option::<OneOrMany<T>>::deserialize(deserializer)?.map(|list| match list {
            OneOrMany::Many(values) => values,
            OneOrMany::One(value) => vec![value],
        }),
    )
}
