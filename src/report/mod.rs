//! Writing the impact matrix to CSV and JSON, and summarising it on screen

use crate::error::Result;
use crate::matrix::{ImpactMatrix, MatrixRow, FIXED_COLUMNS};
use colored::Colorize;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::fs;
use std::path::{Path, PathBuf};

const FILE_SUFFIX: &str = "CA-Impact-Matrix";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
    Both,
}

impl OutputFormat {
    fn wants_csv(&self) -> bool {
        matches!(self, OutputFormat::Csv | OutputFormat::Both)
    }

    fn wants_json(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Both)
    }
}

/// File stem such as `2024-05-01-1330-CA-Impact-Matrix`
pub fn file_stem<Tz: chrono::TimeZone>(now: &chrono::DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}-{}", now.format("%Y-%m-%d-%H%M"), FILE_SUFFIX)
}

fn python_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

/// Header row shared by both formats
pub fn header(matrix: &ImpactMatrix) -> Vec<&str> {
    FIXED_COLUMNS
        .iter()
        .copied()
        .chain(matrix.columns.iter().map(String::as_str))
        .collect()
}

/// Write the matrix as CSV; an empty matrix still gets its header
pub fn write_csv(matrix: &ImpactMatrix, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(header(matrix))?;

    for row in &matrix.rows {
        let mut record = vec![
            row.user.as_str(),
            row.upn.as_str(),
            row.job.as_str(),
            python_bool(row.external),
            python_bool(row.enabled),
        ];
        record.extend(row.in_scope.iter().map(|v| python_bool(*v)));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

struct RowView<'a> {
    columns: &'a [String],
    row: &'a MatrixRow,
}

impl Serialize for RowView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FIXED_COLUMNS.len() + self.columns.len()))?;
        map.serialize_entry("user", &self.row.user)?;
        map.serialize_entry("upn", &self.row.upn)?;
        map.serialize_entry("job", &self.row.job)?;
        map.serialize_entry("external", &self.row.external)?;
        map.serialize_entry("enabled", &self.row.enabled)?;
        for (column, value) in self.columns.iter().zip(&self.row.in_scope) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

struct MatrixView<'a>(&'a ImpactMatrix);

impl Serialize for MatrixView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.rows.len()))?;
        for row in &self.0.rows {
            seq.serialize_element(&RowView {
                columns: &self.0.columns,
                row,
            })?;
        }
        seq.end()
    }
}

/// Render the matrix as a pretty-printed JSON array, keys in column order
pub fn to_json(matrix: &ImpactMatrix) -> Result<String> {
    Ok(serde_json::to_string_pretty(&MatrixView(matrix))?)
}

pub fn write_json(matrix: &ImpactMatrix, path: &Path) -> Result<()> {
    fs::write(path, to_json(matrix)?)?;
    Ok(())
}

/// Write the requested files into `dir` and return their paths
pub fn export(
    matrix: &ImpactMatrix,
    dir: &Path,
    stem: &str,
    format: OutputFormat,
) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }

    let mut written = Vec::new();

    if format.wants_csv() {
        let path = dir.join(format!("{}.csv", stem));
        write_csv(matrix, &path)?;
        tracing::debug!("Wrote {}", path.display());
        written.push(path);
    }

    if format.wants_json() {
        let path = dir.join(format!("{}.json", stem));
        write_json(matrix, &path)?;
        tracing::debug!("Wrote {}", path.display());
        written.push(path);
    }

    Ok(written)
}

/// One summary line, padded before colouring
fn summary_line(column: &str, count: usize, total: usize) -> String {
    let name_display = if column.chars().count() > 58 {
        format!("{}...", column.chars().take(55).collect::<String>())
    } else {
        column.to_string()
    };

    let count_display = format!("{:>12}", format!("{}/{}", count, total));
    let count_display = if count == 0 {
        count_display.dimmed()
    } else if count == total {
        count_display.green()
    } else {
        count_display.yellow()
    };

    format!("{:<60} {}", name_display, count_display)
}

/// Print how many users each policy applies to
pub fn print_summary(matrix: &ImpactMatrix) {
    let total = matrix.rows.len();

    println!(
        "\n{} {}",
        format!("{:<60}", "Policy").bold(),
        format!("{:>12}", "Users").bold()
    );
    println!("{}", "─".repeat(73));

    for (column, count) in matrix.coverage() {
        println!("{}", summary_line(column, count, total));
    }

    if !matrix.failures.is_empty() {
        println!(
            "\n{} {} user(s) skipped after lookup errors:",
            "!".yellow(),
            matrix.failures.len()
        );
        for failure in &matrix.failures {
            println!("  {} {}: {}", "✗".red(), failure.upn, failure.error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample_matrix() -> ImpactMatrix {
        ImpactMatrix {
            columns: vec!["Require MFA".into(), "Block legacy".into()],
            rows: vec![MatrixRow {
                user: "Jane Doe".into(),
                upn: "jane@contoso.com".into(),
                job: "Engineer".into(),
                external: false,
                enabled: true,
                in_scope: vec![true, false],
            }],
            failures: Vec::new(),
        }
    }

    fn strip_ansi(s: &str) -> String {
        let mut out = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c == '\x1b' {
                for c in chars.by_ref() {
                    if c == 'm' {
                        break;
                    }
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    #[test]
    fn test_summary_line_width_ignores_colour() {
        colored::control::set_override(true);
        let line = summary_line("Require MFA", 3, 10);
        colored::control::unset_override();

        assert!(line.contains('\x1b'));
        let visible = strip_ansi(&line);
        assert_eq!(visible, format!("{:<60} {:>12}", "Require MFA", "3/10"));
        assert_eq!(visible.chars().count(), 73);
    }

    #[test]
    fn test_summary_line_truncates_long_names() {
        let long = "x".repeat(80);
        let visible = strip_ansi(&summary_line(&long, 0, 1));
        assert!(visible.starts_with(&format!("{}...", "x".repeat(55))));
        assert_eq!(visible.chars().count(), 73);
    }

    #[test]
    fn test_file_stem() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap();
        assert_eq!(file_stem(&now), "2024-03-09-0705-CA-Impact-Matrix");
    }

    #[test]
    fn test_csv_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.csv");
        write_csv(&sample_matrix(), &path).unwrap();

        let contents = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "user,upn,job,external,enabled,Require MFA,Block legacy");
        assert_eq!(lines[1], "Jane Doe,jane@contoso.com,Engineer,False,True,True,False");
    }

    #[test]
    fn test_empty_matrix_csv_has_header_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.csv");
        let matrix = ImpactMatrix {
            columns: vec!["P".into()],
            ..Default::default()
        };
        write_csv(&matrix, &path).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "user,upn,job,external,enabled,P\n");
    }

    #[test]
    fn test_json_keeps_column_order() {
        let json = to_json(&sample_matrix()).unwrap();
        let user_pos = json.find("\"user\"").unwrap();
        let enabled_pos = json.find("\"enabled\"").unwrap();
        let mfa_pos = json.find("\"Require MFA\"").unwrap();
        let legacy_pos = json.find("\"Block legacy\"").unwrap();
        assert!(user_pos < enabled_pos && enabled_pos < mfa_pos && mfa_pos < legacy_pos);

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["Require MFA"], true);
        assert_eq!(parsed[0]["external"], false);
        assert_eq!(to_json(&ImpactMatrix::default()).unwrap(), "[]");
    }

    #[test]
    fn test_export_formats() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("reports");

        let both = export(&sample_matrix(), &out, "stem", OutputFormat::Both).unwrap();
        assert_eq!(both.len(), 2);
        assert!(out.join("stem.csv").exists());
        assert!(out.join("stem.json").exists());

        let json_only = export(&sample_matrix(), &out, "other", OutputFormat::Json).unwrap();
        assert_eq!(json_only, vec![out.join("other.json")]);
        assert!(!out.join("other.csv").exists());
    }
}
