//! Feelings parser

use super::Parser;
use crate::error::{Error, Result};
use crate::records::{ParsedResult, float_value};
use crate::topics;
use sensa_wire::Snapshot;

pub const NAME: &str = "feelings";

pub struct FeelingsParser;

impl Parser for FeelingsParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn topic(&self) -> &'static str {
        topics::FEELINGS
    }

    /// Values must lie in [0, 1].
    fn parse(&self, user_id: u64, snapshot: &Snapshot) -> Result<ParsedResult> {
        let feelings = snapshot
            .feelings
            .as_ref()
            .ok_or(Error::MissingField("feelings"))?;
        if let Some(name) = feelings.out_of_range() {
            return Err(Error::InvalidField(format!("{} is outside [0, 1]", name)));
        }

        Ok(ParsedResult::new(self.topic(), snapshot.id(), user_id)
            .with("hunger", float_value(feelings.hunger))
            .with("thirst", float_value(feelings.thirst))
            .with("exhaustion", float_value(feelings.exhaustion))
            .with("happiness", float_value(feelings.happiness)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensa_wire::Feelings;

    fn snapshot(hunger: f32) -> Snapshot {
        let mut snapshot = Snapshot::at(1575446887339);
        snapshot.feelings = Some(Feelings {
            hunger,
            thirst: 0.25,
            exhaustion: 0.0,
            happiness: 1.0,
        });
        snapshot
    }

    #[test]
    fn test_parse_feelings() {
        let result = FeelingsParser.parse(3, &snapshot(0.5)).unwrap();
        assert_eq!(result.topic, "feelings");
        assert_eq!(result.fields["hunger"], 0.5);
        assert_eq!(result.fields["thirst"], 0.25);
        assert_eq!(result.fields["happiness"], 1.0);
        assert_eq!(result.snapshot_id(), Some(1575446887339));
    }

    #[test]
    fn test_published_values_match_capture() {
        let mut snapshot = Snapshot::at(1575446887339);
        snapshot.feelings = Some(Feelings {
            hunger: 0.5,
            thirst: 0.3,
            exhaustion: 0.2,
            happiness: 1.0,
        });

        let result = FeelingsParser.parse(3, &snapshot).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&result.to_json().unwrap()).unwrap();
        assert_eq!(value["hunger"], 0.5);
        assert_eq!(value["thirst"], 0.3);
        assert_eq!(value["exhaustion"], 0.2);
        assert_eq!(value["happiness"], 1.0);
        assert_eq!(value["id"], 1575446887339u64);
        assert_eq!(value["user_id"], 3);
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err = FeelingsParser.parse(3, &snapshot(1.5)).unwrap_err();
        assert!(matches!(err, Error::InvalidField(msg) if msg.starts_with("hunger")));
    }

    #[test]
    fn test_missing_feelings() {
        assert!(matches!(
            FeelingsParser.parse(3, &Snapshot::at(1)),
            Err(Error::MissingField("feelings"))
        ));
    }
}
