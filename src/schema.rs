//! The HSDS-equivalent target schema.
//!
//! These types are the only shape the extraction stage will accept from a
//! model. Deserialisation with `serde_json` enforces structure (required keys,
//! enum tokens, time formats); [`StructuredRecord::validate`] then enforces the
//! value-level rules that serde cannot express, such as non-empty names.
//! Both happen in one place, immediately after the extraction call, so a
//! record that exists is a record that is valid.
//!
//! Optional scalars deserialise from a missing key or `null`. Lists default to
//! empty when the key is absent.

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Root output of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub organization: Organization,
    pub services_at_locations: Vec<ServiceAtLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// "This service is offered at this location."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAtLocation {
    pub service: Service,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub description: String,
    pub status: ServiceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees: Option<String>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    #[serde(default)]
    pub phones: Vec<PhoneNumber>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "inactive")]
    Inactive,
    #[serde(rename = "defunct")]
    Defunct,
    #[serde(rename = "temporarily closed")]
    TemporarilyClosed,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Inactive => "inactive",
            ServiceStatus::Defunct => "defunct",
            ServiceStatus::TemporarilyClosed => "temporarily closed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub freq: Frequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byday: Option<Vec<Weekday>>,
    pub opens_at: TimeOfDay,
    pub closes_at: TimeOfDay,
}

/// iCal-style recurrence frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Weekly,
    Monthly,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
        })
    }
}

/// iCal `BYDAY` token (`MO` … `SU`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Weekday {
    Mo,
    Tu,
    We,
    Th,
    Fr,
    Sa,
    Su,
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Weekday::Mo => "MO",
            Weekday::Tu => "TU",
            Weekday::We => "WE",
            Weekday::Th => "TH",
            Weekday::Fr => "FR",
            Weekday::Sa => "SA",
            Weekday::Su => "SU",
        })
    }
}

/// Wall-clock time of day, accepted as `HH:MM` or `HH:MM:SS` and written as
/// `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay(pub NaiveTime);

impl TimeOfDay {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        NaiveTime::parse_from_str(s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .ok()
            .map(TimeOfDay)
    }

    pub fn hm(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(TimeOfDay)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TimeOfDay::parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid time of day '{raw}', expected HH:MM"))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub number: String,
    pub phone_type: PhoneType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhoneType {
    Text,
    Voice,
    Fax,
    Cell,
    Video,
    Pager,
    Textphone,
}

impl fmt::Display for PhoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhoneType::Text => "text",
            PhoneType::Voice => "voice",
            PhoneType::Fax => "fax",
            PhoneType::Cell => "cell",
            PhoneType::Video => "video",
            PhoneType::Pager => "pager",
            PhoneType::Textphone => "textphone",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub address_1: String,
    pub city: String,
    pub state_province: String,
    pub postal_code: String,
    pub address_type: AddressType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Physical,
    Postal,
    Virtual,
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressType::Physical => "physical",
            AddressType::Postal => "postal",
            AddressType::Virtual => "virtual",
        })
    }
}

impl StructuredRecord {
    /// Check the value-level rules serde cannot express.
    ///
    /// Returns every violation, not just the first, so one failed run tells
    /// the operator everything that was wrong with the model's answer.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();

        if self.organization.name.trim().is_empty() {
            violations.push("organization.name is empty".to_string());
        }
        if self.organization.description.trim().is_empty() {
            violations.push("organization.description is empty".to_string());
        }

        for (i, sal) in self.services_at_locations.iter().enumerate() {
            if sal.service.name.trim().is_empty() {
                violations.push(format!("services_at_locations[{i}].service.name is empty"));
            }
            if sal.location.name.trim().is_empty() {
                violations.push(format!("services_at_locations[{i}].location.name is empty"));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLYER_JSON: &str = r#"{
        "organization": {"name": "Eastside Food Bank", "description": "Free groceries", "url": null},
        "services_at_locations": [{
            "service": {
                "name": "Food Pantry",
                "description": "Weekly groceries",
                "status": "active",
                "fees": "Free",
                "schedules": [{"freq": "WEEKLY", "byday": ["TU", "TH"], "opens_at": "09:00", "closes_at": "12:30:00"}],
                "phones": [{"number": "555-0100", "phone_type": "voice"}]
            },
            "location": {
                "name": "Community Hall",
                "addresses": [{"address_1": "12 Main St", "city": "Springfield", "state_province": "OR", "postal_code": "97477", "address_type": "physical"}]
            }
        }]
    }"#;

    #[test]
    fn parses_flyer_record() {
        let record: StructuredRecord = serde_json::from_str(FLYER_JSON).expect("valid record");
        assert_eq!(record.organization.url, None);
        let sal = &record.services_at_locations[0];
        assert_eq!(sal.service.status, ServiceStatus::Active);
        assert_eq!(sal.service.eligibility, None);
        let sched = &sal.service.schedules[0];
        assert_eq!(sched.byday.as_deref(), Some(&[Weekday::Tu, Weekday::Th][..]));
        assert_eq!(sched.closes_at.to_string(), "12:30");
        assert!(record.validate().is_ok());
    }

    #[test]
    fn missing_lists_default_to_empty() {
        let json = r#"{
            "organization": {"name": "A", "description": "B"},
            "services_at_locations": [{
                "service": {"name": "S", "description": "D", "status": "inactive"},
                "location": {"name": "L"}
            }]
        }"#;
        let record: StructuredRecord = serde_json::from_str(json).unwrap();
        let sal = &record.services_at_locations[0];
        assert!(sal.service.schedules.is_empty());
        assert!(sal.service.phones.is_empty());
        assert!(sal.location.addresses.is_empty());
    }

    #[test]
    fn services_at_locations_key_is_required() {
        let json = r#"{"organization": {"name": "A", "description": "B"}}"#;
        let err = serde_json::from_str::<StructuredRecord>(json).unwrap_err();
        assert!(err.to_string().contains("services_at_locations"), "got: {err}");

        let json = r#"{"organization": {"name": "A", "description": "B"}, "services_at_locations": []}"#;
        let record: StructuredRecord = serde_json::from_str(json).unwrap();
        assert!(record.services_at_locations.is_empty());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_status_token() {
        let json = FLYER_JSON.replace("\"active\"", "\"open\"");
        assert!(serde_json::from_str::<StructuredRecord>(&json).is_err());
    }

    #[test]
    fn rejects_missing_organization() {
        let json = r#"{"services_at_locations": []}"#;
        let err = serde_json::from_str::<StructuredRecord>(json).unwrap_err();
        assert!(err.to_string().contains("organization"));
    }

    #[test]
    fn rejects_bad_time() {
        let json = FLYER_JSON.replace("\"09:00\"", "\"9am\"");
        let err = serde_json::from_str::<StructuredRecord>(&json).unwrap_err();
        assert!(err.to_string().contains("9am"), "got: {err}");
    }

    #[test]
    fn validate_reports_every_violation() {
        let mut record: StructuredRecord = serde_json::from_str(FLYER_JSON).unwrap();
        record.organization.name = "  ".into();
        record.organization.description.clear();
        record.services_at_locations[0].location.name.clear();

        let violations = record.validate().unwrap_err();
        assert_eq!(violations.len(), 3, "{violations:?}");
        assert!(violations[2].contains("location.name"));
    }

    #[test]
    fn json_round_trip_preserves_values() {
        let record: StructuredRecord = serde_json::from_str(FLYER_JSON).unwrap();
        let text = serde_json::to_string_pretty(&record).unwrap();
        let back: StructuredRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(record, back);
        // Absent optionals are omitted, not written as null.
        assert!(!text.contains("\"url\""));
    }

    #[test]
    fn status_display_matches_wire_token() {
        for status in [
            ServiceStatus::Active,
            ServiceStatus::Inactive,
            ServiceStatus::Defunct,
            ServiceStatus::TemporarilyClosed,
        ] {
            let wire = serde_json::to_string(&status).unwrap();
            assert_eq!(wire, format!("\"{status}\""));
        }
    }
}
