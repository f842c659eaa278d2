//! CSV report writer with fixed columns

use crate::proxy::models::CheckResult;
use crate::Result;
use anyhow::Context;
use std::path::Path;

/// Column order is part of the output contract
const COLUMNS: [&str; 7] = [
    "proxy",
    "status",
    "response_time",
    "country",
    "city",
    "anonymity",
    "protocol",
];

pub fn write(results: &[CheckResult], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV file {}", path.display()))?;

    writer.write_record(COLUMNS)?;
    for result in results {
        let response_time = result
            .response_time_ms
            .map(|ms| format!("{:.1}", ms))
            .unwrap_or_else(|| "N/A".to_string());
        let status = result.status.to_string();
        let anonymity = result.anonymity.to_string();
        let protocol = result.protocol.to_string();
        writer.write_record([
            result.proxy.as_str(),
            status.as_str(),
            response_time.as_str(),
            result.country.as_str(),
            result.city.as_str(),
            anonymity.as_str(),
            protocol.as_str(),
        ])?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write CSV results to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::sample_results;
    use std::fs;

    #[test]
    fn test_csv_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        write(&sample_results(), &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "proxy,status,response_time,country,city,anonymity,protocol"
        );
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("http://10.0.0.1:8080,FAST,120.0,US,Dallas,"));
    }

    #[test]
    fn test_csv_absent_response_time_is_na() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        write(&sample_results(), &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let failed_line = content
            .lines()
            .find(|l| l.contains("FAILED"))
            .expect("failed row present");
        assert!(failed_line.contains(",N/A,"));
    }
}
