//! Reporting and persistence of an extracted record.
//!
//! The summary is for operators: a fixed, line-oriented layout with optional
//! fields left out entirely when the flyer did not provide them. The JSON file
//! is for machines: 2-space indented UTF-8 with non-ASCII characters kept as
//! is. Both writers go through [`write_atomic`], so a crash mid-write never
//! leaves a truncated artifact behind.

use crate::error::HsdsError;
use crate::pipeline::ocr::OcrText;
use crate::schema::{Schedule, StructuredRecord};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

const RULE: &str = "================================================================================";

/// Display adapter producing the human-readable summary.
pub struct Summary<'a>(pub &'a StructuredRecord);

/// Render the summary of `record` as a string.
pub fn render_summary(record: &StructuredRecord) -> String {
    Summary(record).to_string()
}

/// `Some` only for present, non-blank values.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.0;
        let org = &record.organization;

        writeln!(f, "{RULE}")?;
        writeln!(f, "HSDS DATA EXTRACTION SUMMARY")?;
        writeln!(f, "{RULE}")?;

        writeln!(f)?;
        writeln!(f, "ORGANIZATION")?;
        writeln!(f, "   Name: {}", org.name)?;
        writeln!(f, "   Description: {}", org.description)?;
        if let Some(url) = present(&org.url) {
            writeln!(f, "   Website: {url}")?;
        }

        writeln!(f)?;
        writeln!(
            f,
            "SERVICES & LOCATIONS ({} found)",
            record.services_at_locations.len()
        )?;

        for (idx, sal) in record.services_at_locations.iter().enumerate() {
            let service = &sal.service;
            writeln!(f)?;
            writeln!(f, "   [{}] SERVICE: {}", idx + 1, service.name)?;
            writeln!(f, "       Description: {}", service.description)?;
            writeln!(f, "       Status: {}", service.status)?;
            if let Some(eligibility) = present(&service.eligibility) {
                writeln!(f, "       Eligibility: {eligibility}")?;
            }
            if let Some(fees) = present(&service.fees) {
                writeln!(f, "       Fees: {fees}")?;
            }

            if !service.schedules.is_empty() {
                writeln!(f, "       Schedules:")?;
                for schedule in &service.schedules {
                    write_schedule(f, schedule)?;
                }
            }

            if !service.phones.is_empty() {
                writeln!(f, "       Phone Numbers:")?;
                for phone in &service.phones {
                    writeln!(f, "         - {} ({})", phone.number, phone.phone_type)?;
                }
            }

            let location = &sal.location;
            writeln!(f)?;
            writeln!(f, "       LOCATION: {}", location.name)?;
            if let Some(description) = present(&location.description) {
                writeln!(f, "          Description: {description}")?;
            }
            for addr in &location.addresses {
                writeln!(f, "          Address: {}", addr.address_1)?;
                writeln!(
                    f,
                    "                   {}, {} {}",
                    addr.city, addr.state_province, addr.postal_code
                )?;
                writeln!(f, "                   Type: {}", addr.address_type)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "{RULE}")
    }
}

fn write_schedule(f: &mut fmt::Formatter<'_>, schedule: &Schedule) -> fmt::Result {
    writeln!(
        f,
        "         - {}",
        present(&schedule.description).unwrap_or("Schedule")
    )?;
    writeln!(f, "           Frequency: {}", schedule.freq)?;
    if let Some(days) = schedule.byday.as_ref().filter(|d| !d.is_empty()) {
        let days: Vec<String> = days.iter().map(ToString::to_string).collect();
        writeln!(f, "           Days: {}", days.join(","))?;
    }
    writeln!(
        f,
        "           Hours: {} - {}",
        schedule.opens_at, schedule.closes_at
    )
}

/// Serialise `record` to `path` as indented JSON.
///
/// Parent directories are created as needed.
pub async fn save_json(record: &StructuredRecord, path: &Path) -> Result<(), HsdsError> {
    let json = serde_json::to_string_pretty(record).map_err(|e| HsdsError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: std::io::Error::other(e),
    })?;
    write_atomic(path, json.into_bytes()).await?;
    info!("HSDS data saved to: {}", path.display());
    Ok(())
}

/// Write the raw OCR output to `path`, byte for byte.
pub async fn save_ocr_text(text: &OcrText, path: &Path) -> Result<(), HsdsError> {
    write_atomic(path, text.as_str().as_bytes().to_vec()).await?;
    info!("OCR text saved to: {}", path.display());
    Ok(())
}

/// Write `contents` to a temp file beside `path`, then rename it into place.
pub async fn write_atomic(path: &Path, contents: Vec<u8>) -> Result<(), HsdsError> {
    let target = path.to_path_buf();
    let fail = |source: std::io::Error| HsdsError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    tokio::task::spawn_blocking(move || write_atomic_blocking(&target, &contents))
        .await
        .map_err(|e| fail(std::io::Error::other(e)))?
        .map_err(fail)
}

fn write_atomic_blocking(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::*;
    use tempfile::TempDir;

    fn record() -> StructuredRecord {
        StructuredRecord {
            organization: Organization {
                name: "Café Esperanza".into(),
                description: "Comidas gratuitas".into(),
                url: None,
            },
            services_at_locations: vec![ServiceAtLocation {
                service: Service {
                    name: "Hot Meals".into(),
                    description: "Dinner for anyone".into(),
                    status: ServiceStatus::Active,
                    eligibility: Some(String::new()),
                    fees: Some("Free".into()),
                    schedules: vec![Schedule {
                        description: None,
                        freq: Frequency::Weekly,
                        byday: Some(vec![Weekday::Mo, Weekday::We]),
                        opens_at: TimeOfDay::hm(17, 0).unwrap(),
                        closes_at: TimeOfDay::hm(19, 30).unwrap(),
                    }],
                    phones: vec![PhoneNumber {
                        number: "555-0199".into(),
                        phone_type: PhoneType::Voice,
                    }],
                },
                location: Location {
                    name: "Parish Hall".into(),
                    description: None,
                    addresses: vec![Address {
                        address_1: "1 Church Rd".into(),
                        city: "Salem".into(),
                        state_province: "OR".into(),
                        postal_code: "97301".into(),
                        address_type: AddressType::Physical,
                    }],
                },
            }],
        }
    }

    #[test]
    fn summary_layout() {
        let text = render_summary(&record());
        assert!(text.contains("SERVICES & LOCATIONS (1 found)"));
        assert_eq!(text.matches("] SERVICE:").count(), 1);
        assert!(text.contains("   [1] SERVICE: Hot Meals\n"));
        assert!(text.contains("         - Schedule\n"));
        assert!(text.contains("           Days: MO,WE\n"));
        assert!(text.contains("           Hours: 17:00 - 19:30\n"));
        assert!(text.contains("         - 555-0199 (voice)\n"));
        assert!(text.contains("                   Salem, OR 97301\n"));
    }

    #[test]
    fn summary_omits_absent_optionals() {
        let text = render_summary(&record());
        assert!(!text.contains("Website:"));
        // Present but blank counts as absent.
        assert!(!text.contains("Eligibility:"));
        assert!(text.contains("       Fees: Free\n"));
        assert!(!text.contains("          Description:"));
    }

    #[test]
    fn summary_is_deterministic() {
        assert_eq!(render_summary(&record()), render_summary(&record()));
    }

    #[tokio::test]
    async fn json_is_indented_and_keeps_unicode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/out/record.json");
        save_json(&record(), &path).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Café Esperanza"));
        assert!(text.starts_with("{\n  \"organization\": {\n    \"name\""));

        let back: StructuredRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record());
    }

    #[tokio::test]
    async fn ocr_text_written_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ocr.txt");
        let text = OcrText::new("# Title\n\n  spaced  \n");
        save_ocr_text(&text, &path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Title\n\n  spaced  \n");
    }

    #[tokio::test]
    async fn unwritable_path_is_persistence_failure() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        // A regular file where a directory is needed.
        let path = blocker.join("record.json");
        let err = save_json(&record(), &path).await.unwrap_err();
        assert!(err.is_persistence(), "got {err:?}");
    }
}
