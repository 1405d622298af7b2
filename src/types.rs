// src/types.rs

use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// One captured frame. The bitmap is ephemeral; only downsampled
/// fingerprints survive past a single pipeline cycle.
#[derive(Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rank {
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
    Ace,
}

impl Rank {
    pub fn to_str(&self) -> &'static str {
        match self {
            Rank::Two => "2",
            Rank::Three => "3",
            Rank::Four => "4",
            Rank::Five => "5",
            Rank::Six => "6",
            Rank::Seven => "7",
            Rank::Eight => "8",
            Rank::Nine => "9",
            Rank::Ten => "T",
            Rank::Jack => "J",
            Rank::Queen => "Q",
            Rank::King => "K",
            Rank::Ace => "A",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "2" => Some(Rank::Two),
            "3" => Some(Rank::Three),
            "4" => Some(Rank::Four),
            "5" => Some(Rank::Five),
            "6" => Some(Rank::Six),
            "7" => Some(Rank::Seven),
            "8" => Some(Rank::Eight),
            "9" => Some(Rank::Nine),
            "T" | "10" => Some(Rank::Ten),
            "J" => Some(Rank::Jack),
            "Q" => Some(Rank::Queen),
            "K" => Some(Rank::King),
            "A" => Some(Rank::Ace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Suit {
    Clubs,
    Diamonds,
    Hearts,
    Spades,
}

/// Coarse color grouping used by the color-family cross-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorFamily {
    Red,
    Black,
}

impl Suit {
    pub fn to_str(&self) -> &'static str {
        match self {
            Suit::Clubs => "c",
            Suit::Diamonds => "d",
            Suit::Hearts => "h",
            Suit::Spades => "s",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "c" | "♣" => Some(Suit::Clubs),
            "d" | "♦" => Some(Suit::Diamonds),
            "h" | "♥" => Some(Suit::Hearts),
            "s" | "♠" => Some(Suit::Spades),
            _ => None,
        }
    }

    pub fn color(&self) -> ColorFamily {
        match self {
            Suit::Diamonds | Suit::Hearts => ColorFamily::Red,
            Suit::Clubs | Suit::Spades => ColorFamily::Black,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

impl Card {
    pub fn new(rank: Rank, suit: Suit) -> Self {
        Self { rank, suit }
    }

    /// Parse notation like "As", "Th" or "10♥".
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() < 2 {
            return None;
        }
        let suit_char = s.chars().last()?;
        let rank_part = &s[..s.len() - suit_char.len_utf8()];
        Some(Card {
            rank: Rank::from_str(rank_part)?,
            suit: Suit::from_str(&suit_char.to_string())?,
        })
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.rank.to_str(), self.suit.to_str())
    }
}

/// Identity of an extracted field. Seat indices are zero-based; board
/// slots run 0..5 left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldId {
    Pot,
    HeroHand,
    BoardSlot(u8),
    SeatStack(u8),
    SeatAction(u8),
    Timer,
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldId::Pot => write!(f, "pot"),
            FieldId::HeroHand => write!(f, "hero_hand"),
            FieldId::BoardSlot(i) => write!(f, "board_{}", i),
            FieldId::SeatStack(i) => write!(f, "seat_{}_stack", i),
            FieldId::SeatAction(i) => write!(f, "seat_{}_action", i),
            FieldId::Timer => write!(f, "timer"),
        }
    }
}

/// A recognized value. Numbers cover monetary amounts and the timer;
/// categories cover action labels and other closed vocabularies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Card(Card),
    Category(String),
}

impl FieldValue {
    /// Canonical key for grouping votes by identity. Numbers are rounded
    /// to cents so OCR jitter below a cent collapses into one group.
    pub fn group_key(&self) -> String {
        match self {
            FieldValue::Number(n) => format!("n:{:.2}", n),
            FieldValue::Text(t) => format!("t:{}", t),
            FieldValue::Card(c) => format!("c:{}", c),
            FieldValue::Category(c) => format!("k:{}", c),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_card(&self) -> Option<Card> {
        match self {
            FieldValue::Card(c) => Some(*c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
    Unknown,
}

impl ConfidenceTier {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.85 {
            ConfidenceTier::High
        } else if confidence >= 0.60 {
            ConfidenceTier::Medium
        } else if confidence > 0.0 {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::Unknown
        }
    }
}

/// Axis-aligned rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Fused output of one ensemble call for one region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub value: Option<FieldValue>,
    pub confidence: f32,
    /// Name of the strategy that carried the winning group.
    pub method: String,
    pub bbox: Option<Rect>,
    /// Set when confidence fell below the acceptance threshold. The value
    /// is still reported, never silently discarded or upgraded.
    pub low_confidence: bool,
}

impl RecognitionResult {
    pub fn empty(method: &str) -> Self {
        Self {
            value: None,
            confidence: 0.0,
            method: method.to_string(),
            bbox: None,
            low_confidence: true,
        }
    }
}

/// One field of a partial state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldReading {
    pub value: FieldValue,
    pub confidence: f32,
    pub tier: ConfidenceTier,
}

/// Per-cycle snapshot. Usability depends only on the required-critical
/// subset; optional fields may be missing without demoting the state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialState {
    /// Serialized as entry pairs; JSON maps only take string keys.
    #[serde(with = "field_map")]
    pub fields: HashMap<FieldId, FieldReading>,
    pub missing_required: HashSet<FieldId>,
    pub frame_no: u64,
}

impl PartialState {
    pub fn insert(&mut self, id: FieldId, value: FieldValue, confidence: f32) {
        self.fields.insert(
            id,
            FieldReading {
                value,
                confidence,
                tier: ConfidenceTier::from_confidence(confidence),
            },
        );
        self.missing_required.remove(&id);
    }

    pub fn mark_missing_required(&mut self, id: FieldId) {
        if !self.fields.contains_key(&id) {
            self.missing_required.insert(id);
        }
    }

    pub fn is_usable(&self) -> bool {
        self.missing_required.is_empty()
    }

    pub fn get(&self, id: &FieldId) -> Option<&FieldReading> {
        self.fields.get(id)
    }

    pub fn number(&self, id: &FieldId) -> Option<f64> {
        self.fields.get(id).and_then(|r| r.value.as_number())
    }
}

mod field_map {
    use super::{FieldId, FieldReading};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        map: &HashMap<FieldId, FieldReading>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<FieldId, FieldReading>, D::Error> {
        let pairs = Vec::<(FieldId, FieldReading)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

/// Failure taxonomy used by the error-pattern detector and health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Recovered via cache or a fallback path; logged at debug level.
    Transient,
    /// Value corrected or flagged by a validator; not fatal.
    Validation,
    /// Optional field missing; a usable state continues.
    Degraded,
    /// Capture or recognition backend wholly unavailable.
    Critical,
    /// Suspected leak or memory pressure; surfaced, never auto-restarted.
    Resource,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Validation => "validation",
            ErrorKind::Degraded => "degraded",
            ErrorKind::Critical => "critical",
            ErrorKind::Resource => "resource",
        };
        write!(f, "{}", s)
    }
}

/// What the recognition cache keys on, alongside the content digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionKind {
    CardFace,
    Amount,
    ActionLabel,
    TimerValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_parse_variants() {
        assert_eq!(
            Card::parse("As"),
            Some(Card::new(Rank::Ace, Suit::Spades))
        );
        assert_eq!(
            Card::parse("10♥"),
            Some(Card::new(Rank::Ten, Suit::Hearts))
        );
        assert_eq!(Card::parse("Td").unwrap().to_string(), "Td");
        assert_eq!(Card::parse("Xx"), None);
        assert_eq!(Card::parse(""), None);
    }

    #[test]
    fn test_suit_color_families() {
        assert_eq!(Suit::Hearts.color(), ColorFamily::Red);
        assert_eq!(Suit::Diamonds.color(), ColorFamily::Red);
        assert_eq!(Suit::Spades.color(), ColorFamily::Black);
        assert_eq!(Suit::Clubs.color(), ColorFamily::Black);
    }

    #[test]
    fn test_confidence_tiers() {
        assert_eq!(ConfidenceTier::from_confidence(0.95), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_confidence(0.70), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_confidence(0.30), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_confidence(0.0), ConfidenceTier::Unknown);
    }

    #[test]
    fn test_usable_depends_only_on_required() {
        let mut state = PartialState::default();
        state.insert(FieldId::Pot, FieldValue::Number(120.0), 0.9);
        state.mark_missing_required(FieldId::HeroHand);
        assert!(!state.is_usable());

        state.insert(
            FieldId::HeroHand,
            FieldValue::Text("AsKh".to_string()),
            0.9,
        );
        // Optional fields absent; state must still be usable.
        assert!(state.is_usable());
    }

    #[test]
    fn test_group_key_collapses_subcent_jitter() {
        let a = FieldValue::Number(12.501);
        let b = FieldValue::Number(12.499);
        let c = FieldValue::Number(12.60);
        assert_eq!(a.group_key(), b.group_key());
        assert_ne!(a.group_key(), c.group_key());
    }
}
