use thiserror::Error;
use url::Url;

pub const REQUIRED_HEADERS: [&str; 4] = ["TeamName", "ID_Proof", "Bank_details", "Invoice"];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("CSV must contain at least a header row and one data row")]
    TooShort,
    #[error("CSV is missing required headers: {0}")]
    MissingHeaders(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    pub team_name: String,
    pub id_proof: String,
    pub bank_details: String,
    pub invoice: String,
}

/// One unit of download work: a target folder and the file references
/// that land in it. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub folder_name: String,
    pub file_refs: Vec<FileRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub remote_id: String,
    pub logical_name: String,
}

/// Parses the raw CSV text into rows. Rows whose column count does not
/// match the header are skipped with a warning, matching how operators
/// hand-edit these sheets.
pub fn parse_manifest(text: &str) -> Result<Vec<ManifestRow>, ManifestError> {
    let mut lines = text.lines();
    let header_line = lines.next().ok_or(ManifestError::TooShort)?;
    let headers: Vec<&str> = header_line.split(',').map(str::trim).collect();

    let missing: Vec<&str> = REQUIRED_HEADERS
        .iter()
        .copied()
        .filter(|required| !headers.contains(required))
        .collect();
    if !missing.is_empty() {
        return Err(ManifestError::MissingHeaders(missing.join(", ")));
    }

    let column = |name: &str| headers.iter().position(|h| *h == name).unwrap_or_default();
    let team_col = column("TeamName");
    let id_proof_col = column("ID_Proof");
    let bank_col = column("Bank_details");
    let invoice_col = column("Invoice");

    let mut rows = Vec::new();
    for (index, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let values: Vec<&str> = line.split(',').map(str::trim).collect();
        if values.len() != headers.len() {
            tracing::warn!(
                "line {} has {} values, expected {}; skipping",
                index + 2,
                values.len(),
                headers.len()
            );
            continue;
        }
        rows.push(ManifestRow {
            team_name: values[team_col].to_string(),
            id_proof: values[id_proof_col].to_string(),
            bank_details: values[bank_col].to_string(),
            invoice: values[invoice_col].to_string(),
        });
    }

    if rows.is_empty() {
        return Err(ManifestError::TooShort);
    }
    Ok(rows)
}

/// Reports per-row validation problems without rejecting the manifest;
/// the engine degrades a missing reference to a per-file error later.
pub fn validate_rows(rows: &[ManifestRow]) -> Vec<String> {
    let mut errors = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let row_num = index + 1;
        if row.team_name.is_empty() {
            errors.push(format!("Row {row_num}: Missing TeamName"));
        }
        if row.id_proof.is_empty() {
            errors.push(format!("Row {row_num}: Missing ID_Proof"));
        }
        if row.bank_details.is_empty() {
            errors.push(format!("Row {row_num}: Missing Bank_details"));
        }
        if row.invoice.is_empty() {
            errors.push(format!("Row {row_num}: Missing Invoice"));
        }
    }
    errors
}

pub fn to_download_tasks(rows: &[ManifestRow]) -> Vec<DownloadTask> {
    rows.iter()
        .map(|row| DownloadTask {
            folder_name: row.team_name.clone(),
            file_refs: vec![
                FileRef {
                    remote_id: extract_drive_id(&row.id_proof),
                    logical_name: "ID_Proof".into(),
                },
                FileRef {
                    remote_id: extract_drive_id(&row.bank_details),
                    logical_name: "Bank_details".into(),
                },
                FileRef {
                    remote_id: extract_drive_id(&row.invoice),
                    logical_name: "Invoice".into(),
                },
            ],
        })
        .collect()
}

/// Accepts the share-link formats Drive hands out as well as bare ids:
/// `…/file/d/{id}/view`, `…?id={id}`, or the id itself. Anything else
/// passes through unchanged.
pub fn extract_drive_id(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }

    if let Some(rest) = value.split("/file/d/").nth(1) {
        let id: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if !id.is_empty() {
            return id;
        }
    }

    if let Ok(url) = Url::parse(value) {
        let id = url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned());
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            return id;
        }
    }

    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "TeamName,ID_Proof,Bank_details,Invoice\n\
        TeamA,https://drive.google.com/file/d/abc123XYZ/view,https://drive.google.com/open?id=def456,ghi789\n\
        \n\
        TeamB,only,two\n\
        TeamC,,bank,inv\n";

    #[test]
    fn parses_rows_and_skips_malformed_lines() {
        let rows = parse_manifest(CSV).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].team_name, "TeamA");
        assert_eq!(rows[1].team_name, "TeamC");
        assert_eq!(rows[1].id_proof, "");
    }

    #[test]
    fn missing_headers_fail_parsing() {
        let err = parse_manifest("TeamName,Invoice\nTeamA,x\n").unwrap_err();
        assert!(matches!(err, ManifestError::MissingHeaders(ref list)
            if list.contains("ID_Proof") && list.contains("Bank_details")));
    }

    #[test]
    fn header_only_input_is_too_short() {
        assert!(matches!(
            parse_manifest("TeamName,ID_Proof,Bank_details,Invoice\n"),
            Err(ManifestError::TooShort)
        ));
    }

    #[test]
    fn validation_reports_empty_fields_per_row() {
        let rows = parse_manifest(CSV).unwrap();
        let errors = validate_rows(&rows);
        assert_eq!(errors, vec!["Row 2: Missing ID_Proof".to_string()]);
    }

    #[test]
    fn tasks_carry_extracted_ids_in_manifest_order() {
        let rows = parse_manifest(CSV).unwrap();
        let tasks = to_download_tasks(&rows);

        assert_eq!(tasks[0].folder_name, "TeamA");
        let refs = &tasks[0].file_refs;
        assert_eq!(refs[0].logical_name, "ID_Proof");
        assert_eq!(refs[0].remote_id, "abc123XYZ");
        assert_eq!(refs[1].remote_id, "def456");
        assert_eq!(refs[2].remote_id, "ghi789");
    }

    #[test]
    fn extracts_id_from_file_link() {
        assert_eq!(
            extract_drive_id("https://drive.google.com/file/d/1a2B3c_d-4/view?usp=sharing"),
            "1a2B3c_d-4"
        );
    }

    #[test]
    fn extracts_id_from_open_link() {
        assert_eq!(
            extract_drive_id("https://drive.google.com/open?id=1a2B3c"),
            "1a2B3c"
        );
    }

    #[test]
    fn bare_or_unrecognized_values_pass_through() {
        assert_eq!(extract_drive_id("1a2B3c_d-4"), "1a2B3c_d-4");
        assert_eq!(extract_drive_id("not a link"), "not a link");
        assert_eq!(extract_drive_id(""), "");
    }
}
