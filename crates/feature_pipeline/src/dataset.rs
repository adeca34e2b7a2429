//! Row-oriented tabular datasets read from CSV.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};

/// An in-memory tabular dataset: a header row plus string-valued rows.
#[derive(Debug, Clone)]
pub struct Dataset {
    headers: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    /// Parses a CSV byte buffer with a header row.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is not valid CSV.
    pub fn from_csv_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(data);

        let headers: Vec<String> = reader
            .headers()
            .context("Failed to read CSV header row")?
            .iter()
            .map(str::to_string)
            .collect();

        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.context("Failed to read CSV record")?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self {
            headers,
            index,
            rows,
        })
    }

    fn headers(&self) -> &[String] {
        &self.headers
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a named column, if present.
    fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Cell value by row index and column name. `None` when the column
    /// is absent or the cell is missing from a short row.
    #[must_use]
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    /// Ensures every named column is present.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing column.
    pub fn require_columns<S: AsRef<str>>(&self, columns: &[S]) -> Result<()> {
        for column in columns {
            let column = column.as_ref();
            if self.column_index(column).is_none() {
                bail!("Dataset is missing required column '{column}'");
            }
        }
        Ok(())
    }

    /// Serializes the full dataset back to CSV with `score`,
    /// `is_anomaly`, and `threshold` columns appended. Row order is
    /// preserved; `scores` and `flags` must align 1:1 with the rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the lengths disagree or serialization fails.
    pub fn to_scored_csv(&self, scores: &[f64], flags: &[bool], threshold: f64) -> Result<Vec<u8>> {
        if scores.len() != self.rows.len() || flags.len() != self.rows.len() {
            bail!(
                "Score vector length {} does not match dataset rows {}",
                scores.len(),
                self.rows.len()
            );
        }

        let mut writer = csv::Writer::from_writer(Vec::new());

        let mut header: Vec<&str> = self.headers().iter().map(String::as_str).collect();
        header.extend(["score", "is_anomaly", "threshold"]);
        writer.write_record(&header).context("Failed to write CSV header")?;

        for (row, (score, flag)) in self.rows.iter().zip(scores.iter().zip(flags)) {
            let mut record: Vec<String> = row.clone();
            record.push(score.to_string());
            record.push(flag.to_string());
            record.push(threshold.to_string());
            writer.write_record(&record).context("Failed to write CSV record")?;
        }

        writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush CSV output: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"period,amount,currency\n2026-01-01,10.5,usd\n2026-01-02,,cad\n";

    #[test]
    fn parses_headers_and_rows() {
        let dataset = Dataset::from_csv_bytes(SAMPLE).expect("sample should parse");
        assert_eq!(dataset.headers(), ["period", "amount", "currency"]);
        assert_eq!(dataset.n_rows(), 2);
        assert_eq!(dataset.value(0, "amount"), Some("10.5"));
        assert_eq!(dataset.value(1, "amount"), Some(""));
        assert_eq!(dataset.value(1, "missing"), None);
    }

    #[test]
    fn require_columns_names_the_missing_one() {
        let dataset = Dataset::from_csv_bytes(SAMPLE).expect("sample should parse");
        assert!(dataset.require_columns(&["period", "amount"]).is_ok());

        let err = dataset
            .require_columns(&["period", "account_id"])
            .expect_err("missing column should fail");
        assert!(err.to_string().contains("account_id"));
    }

    #[test]
    fn scored_csv_appends_verdict_columns() {
        let dataset = Dataset::from_csv_bytes(SAMPLE).expect("sample should parse");
        let bytes = dataset
            .to_scored_csv(&[0.25, -0.5], &[false, true], -0.1)
            .expect("scored csv should serialize");

        let text = String::from_utf8(bytes).expect("csv should be utf-8");
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("period,amount,currency,score,is_anomaly,threshold")
        );
        assert_eq!(lines.next(), Some("2026-01-01,10.5,usd,0.25,false,-0.1"));
        assert_eq!(lines.next(), Some("2026-01-02,,cad,-0.5,true,-0.1"));
    }

    #[test]
    fn scored_csv_rejects_misaligned_scores() {
        let dataset = Dataset::from_csv_bytes(SAMPLE).expect("sample should parse");
        assert!(dataset.to_scored_csv(&[0.1], &[false], 0.0).is_err());
    }
}
