// src/validate.rs
// Cross-frame and cross-field validation. Validators never discard a
// reading silently: a rejected or substituted value always leaves a
// correction record behind.

use crate::config::ValidationConfig;
use crate::roi::NormRect;
use crate::types::{Card, ColorFamily, ErrorKind, ExtractionKind, FieldId};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

static AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]+(?:\.[0-9]+)?").expect("amount regex"));

/// Blind pairs for the stakes this pipeline is calibrated against.
/// Recognized small/big blind amounts snap to the nearest entry.
static STAKES_TABLE: Lazy<Vec<(f64, f64)>> = Lazy::new(|| {
    vec![
        (0.01, 0.02),
        (0.02, 0.05),
        (0.05, 0.10),
        (0.10, 0.25),
        (0.25, 0.50),
        (0.50, 1.00),
        (1.00, 2.00),
        (2.00, 5.00),
        (5.00, 10.00),
        (10.00, 25.00),
        (25.00, 50.00),
        (50.00, 100.00),
    ]
});

/// Repair the character confusions OCR engines make against this
/// vocabulary before parsing. Kind-specific: "O" is a zero inside an
/// amount but a legitimate letter inside an action label.
pub fn normalize_recognized_text(raw: &str, kind: ExtractionKind) -> String {
    let raw = raw.trim();
    match kind {
        ExtractionKind::Amount => normalize_amount(raw),
        ExtractionKind::CardFace => normalize_card(raw),
        ExtractionKind::ActionLabel => raw
            .chars()
            .filter(|c| c.is_ascii_alphabetic() || *c == '-')
            .collect(),
        ExtractionKind::TimerValue => raw
            .chars()
            .map(digit_repair)
            .filter(|c| c.is_ascii_digit() || *c == ':')
            .collect(),
    }
}

fn digit_repair(c: char) -> char {
    match c {
        'O' | 'o' => '0',
        'l' | 'I' | '|' => '1',
        'S' => '5',
        'B' => '8',
        other => other,
    }
}

fn normalize_amount(raw: &str) -> String {
    let repaired: String = raw
        .chars()
        .map(digit_repair)
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | 'k' | 'K' | 'm' | 'M'))
        .collect();

    let multiplier = if repaired.ends_with(['k', 'K']) {
        1_000.0
    } else if repaired.ends_with(['m', 'M']) {
        1_000_000.0
    } else {
        1.0
    };

    let digits: String = repaired
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    match AMOUNT_RE.find(&digits) {
        Some(m) if multiplier != 1.0 => m
            .as_str()
            .parse::<f64>()
            .map(|n| format!("{}", n * multiplier))
            .unwrap_or_default(),
        Some(m) => m.as_str().to_string(),
        None => String::new(),
    }
}

fn normalize_card(raw: &str) -> String {
    let trimmed: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if trimmed.len() < 2 {
        return trimmed;
    }
    let suit = trimmed
        .chars()
        .last()
        .map(|c| c.to_ascii_lowercase())
        .unwrap_or_default();
    let rank_raw: String = trimmed[..trimmed.len() - suit.len_utf8()]
        .chars()
        .map(|c| c.to_ascii_uppercase())
        .collect();
    // "1O" and "IO" are tens misread; a bare "0" or "O" likewise.
    let rank = match rank_raw.as_str() {
        "1O" | "IO" | "I0" | "O" | "0" => "10".to_string(),
        "1" => "10".to_string(),
        other => other.to_string(),
    };
    format!("{}{}", rank, suit)
}

/// Snap a recognized blind pair onto the stakes table. Both blinds must
/// land within the relative tolerance of the same entry.
pub fn snap_blinds(sb: f64, bb: f64, tolerance: f64) -> Option<(f64, f64)> {
    STAKES_TABLE.iter().copied().find(|(table_sb, table_bb)| {
        relative_close(sb, *table_sb, tolerance) && relative_close(bb, *table_bb, tolerance)
    })
}

fn relative_close(value: f64, reference: f64, tolerance: f64) -> bool {
    if reference == 0.0 {
        return value == 0.0;
    }
    ((value - reference) / reference).abs() <= tolerance
}

/// Suit color must match the independently observed ink color.
pub fn color_consistent(card: Card, observed: ColorFamily) -> bool {
    card.suit.color() == observed
}

/// A field's ROI center must sit inside the layout band where that role
/// lives on the table.
pub fn layout_consistent(expected: &NormRect, actual: &NormRect, band: f64) -> bool {
    let (ex, ey) = expected.center();
    let (ax, ay) = actual.center();
    (ex - ax).abs() <= band && (ey - ay).abs() <= band
}

/// Record of one validator intervention.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub field: FieldId,
    pub rule: &'static str,
    pub kind: ErrorKind,
    pub detail: String,
}

/// Per-seat action lifecycle within a hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatAction {
    Idle,
    Betting,
    Checked,
    Called,
    Raised,
    Folded,
    AllIn,
}

impl SeatAction {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "bet" | "betting" => Some(SeatAction::Betting),
            "check" | "checked" => Some(SeatAction::Checked),
            "call" | "called" => Some(SeatAction::Called),
            "raise" | "raised" | "re-raise" => Some(SeatAction::Raised),
            "fold" | "folded" => Some(SeatAction::Folded),
            "all-in" | "allin" => Some(SeatAction::AllIn),
            "" | "idle" | "waiting" => Some(SeatAction::Idle),
            _ => None,
        }
    }

    /// Folded and all-in are absorbing until the next hand.
    fn accepts(self, next: SeatAction) -> bool {
        match self {
            SeatAction::Folded => matches!(next, SeatAction::Folded | SeatAction::Idle),
            SeatAction::AllIn => matches!(next, SeatAction::AllIn | SeatAction::Idle),
            _ => true,
        }
    }
}

/// Stateful validator run over each cycle's readings. Tracks the pot,
/// per-seat stacks and per-seat action state across frames of one hand.
pub struct StateValidator {
    cfg: ValidationConfig,
    last_pot: Option<f64>,
    seat_actions: HashMap<u8, SeatAction>,
    seat_stacks: HashMap<u8, f64>,
}

impl StateValidator {
    pub fn new(cfg: ValidationConfig) -> Self {
        Self {
            cfg,
            last_pot: None,
            seat_actions: HashMap::new(),
            seat_stacks: HashMap::new(),
        }
    }

    /// Within a hand the pot never shrinks. A drop beyond tolerance is
    /// treated as a misread and the previous value is substituted. The
    /// first reading of a hand is usually just the posted blinds, so it
    /// snaps onto the stakes table when a pair matches.
    pub fn check_pot(&mut self, pot: f64) -> (f64, Option<Correction>) {
        match self.last_pot {
            Some(previous) if pot < previous * (1.0 - self.cfg.pot_tolerance) => {
                let correction = Correction {
                    field: FieldId::Pot,
                    rule: "pot_continuity",
                    kind: ErrorKind::Validation,
                    detail: format!("read {:.2}, kept {:.2}", pot, previous),
                };
                debug!(read = pot, kept = previous, "pot regression rejected");
                (previous, Some(correction))
            }
            Some(_) => {
                self.last_pot = Some(pot);
                (pot, None)
            }
            None => {
                // Candidate pair assumes the usual bb = 2 x sb split of
                // the posted total.
                let snapped =
                    snap_blinds(pot / 3.0, pot * 2.0 / 3.0, self.cfg.stakes_snap_tolerance)
                        .map(|(sb, bb)| sb + bb)
                        .filter(|posted| (posted - pot).abs() > f64::EPSILON);
                match snapped {
                    Some(posted) => {
                        self.last_pot = Some(posted);
                        let correction = Correction {
                            field: FieldId::Pot,
                            rule: "stakes_snap",
                            kind: ErrorKind::Validation,
                            detail: format!("read {:.2}, snapped to posted {:.2}", pot, posted),
                        };
                        debug!(read = pot, posted, "opening pot snapped to stakes");
                        (posted, Some(correction))
                    }
                    None => {
                        self.last_pot = Some(pot);
                        (pot, None)
                    }
                }
            }
        }
    }

    /// Chips only leave a stack mid-hand. An increase beyond the pot
    /// tolerance is a misread; the previous stack is kept.
    pub fn check_stack(&mut self, seat: u8, stack: f64) -> (f64, Option<Correction>) {
        match self.seat_stacks.get(&seat).copied() {
            Some(previous) if stack > previous * (1.0 + self.cfg.pot_tolerance) => {
                let correction = Correction {
                    field: FieldId::SeatStack(seat),
                    rule: "stack_monotonic",
                    kind: ErrorKind::Validation,
                    detail: format!("read {:.2}, kept {:.2}", stack, previous),
                };
                (previous, Some(correction))
            }
            _ => {
                self.seat_stacks.insert(seat, stack);
                (stack, None)
            }
        }
    }

    /// Validate an action transition for a seat. Illegal transitions
    /// keep the seat's current state.
    pub fn check_action(&mut self, seat: u8, label: &str) -> (SeatAction, Option<Correction>) {
        let current = self
            .seat_actions
            .get(&seat)
            .copied()
            .unwrap_or(SeatAction::Idle);
        let Some(next) = SeatAction::parse(label) else {
            let correction = Correction {
                field: FieldId::SeatAction(seat),
                rule: "action_vocabulary",
                kind: ErrorKind::Validation,
                detail: format!("unknown label {:?}", label),
            };
            return (current, Some(correction));
        };
        if !current.accepts(next) {
            let correction = Correction {
                field: FieldId::SeatAction(seat),
                rule: "action_transition",
                kind: ErrorKind::Validation,
                detail: format!("{:?} -> {:?} rejected", current, next),
            };
            return (current, Some(correction));
        }
        self.seat_actions.insert(seat, next);
        (next, None)
    }

    /// Pot reset plus a wiped board means a new hand; every per-hand
    /// invariant restarts.
    pub fn new_hand(&mut self) {
        self.last_pot = None;
        self.seat_actions.clear();
        self.seat_stacks.clear();
    }

    pub fn last_pot(&self) -> Option<f64> {
        self.last_pot
    }
}
