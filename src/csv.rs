//! Header-indexed CSV tables for upstream exports whose column order and
//! naming drift between releases.

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::error::EcoError;

#[derive(Debug, Clone)]
pub struct Table {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl Table {
    /// The first record is the header. Rows may be shorter or longer than it.
    pub fn parse(text: &str) -> Result<Self, EcoError> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .trim(Trim::All)
            .from_reader(text.trim_start_matches('\u{feff}').as_bytes());

        let headers = reader
            .headers()
            .map_err(|err| EcoError::Csv(format!("header row: {err}")))?
            .clone();
        if headers.iter().all(str::is_empty) {
            return Err(EcoError::Csv("missing header row".to_string()));
        }
        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| EcoError::Csv(err.to_string()))?;
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    /// Index of the first header matching any alias, compared
    /// case-insensitively. Aliases are tried in order.
    pub fn column(&self, aliases: &[&str]) -> Option<usize> {
        aliases.iter().find_map(|alias| {
            self.headers
                .iter()
                .position(|header| header.eq_ignore_ascii_case(alias.trim()))
        })
    }

    pub fn require_column(&self, aliases: &[&str]) -> Result<usize, EcoError> {
        self.column(aliases)
            .ok_or_else(|| EcoError::Csv(format!("missing column {}", aliases.join("|"))))
    }
}

/// Cell at `index`, `None` when the row is short or the cell is blank.
pub fn cell(row: &StringRecord, index: usize) -> Option<&str> {
    row.get(index)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Parses a numeric cell, tolerating thousands separators.
pub fn number(row: &StringRecord, index: usize) -> Option<f64> {
    cell(row, index).and_then(|value| value.replace(',', "").parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubled_quotes_and_embedded_commas() {
        let table = Table::parse("a,b,c\nx,\"say \"\"hi\"\", ok\",z\n").unwrap();
        assert_eq!(cell(&table.rows()[0], 1), Some(r#"say "hi", ok"#));
        assert_eq!(cell(&table.rows()[0], 2), Some("z"));
    }

    #[test]
    fn quoted_field_may_span_lines() {
        let table =
            Table::parse("type,location,year\nFlood,\"Sylhet,\nSunamganj\",2020\nFlood,Dhaka,2019\n")
                .unwrap();
        assert_eq!(table.rows().len(), 2);
        assert_eq!(cell(&table.rows()[0], 1), Some("Sylhet,\nSunamganj"));
        assert_eq!(cell(&table.rows()[0], 2), Some("2020"));
    }

    #[test]
    fn columns_found_by_name() {
        let table =
            Table::parse("\u{feff}Year, Value ,Country\r\n2020,1.5,US\r\n\r\n2021,2,US,extra\r\n")
                .unwrap();
        assert_eq!(table.column(&["year"]), Some(0));
        assert_eq!(table.column(&["value"]), Some(1));
        assert_eq!(table.column(&["missing", "country"]), Some(2));
        assert_eq!(table.rows().len(), 2);
        assert_eq!(number(&table.rows()[1], 1), Some(2.0));
        assert_eq!(cell(&table.rows()[0], 7), None);
    }

    #[test]
    fn thousands_separator_in_quoted_number() {
        let table = Table::parse("year,value\n2019,\"1,234.5\"\n").unwrap();
        assert_eq!(number(&table.rows()[0], 1), Some(1234.5));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(Table::parse("").is_err());
    }
}
