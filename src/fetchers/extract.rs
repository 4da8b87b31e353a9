//! Ordered extraction strategies for JSON payloads whose field names drift
//! between upstream API versions.

use serde_json::Value;

use crate::domain::year_of;

pub type Strategy<T> = fn(&Value) -> Option<T>;

/// First strategy that yields a value wins.
pub fn first_of<T>(record: &Value, strategies: &[Strategy<T>]) -> Option<T> {
    strategies.iter().find_map(|strategy| strategy(record))
}

/// Numeric field, accepting JSON numbers and numeric strings.
pub fn number_field(record: &Value, key: &str) -> Option<f64> {
    let value = match record.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|value| value.is_finite())
}

/// Year field given as a number or a four-digit string, or as a date string
/// (`2021-01-01T00:00:00Z`).
pub fn year_field(record: &Value, key: &str) -> Option<i32> {
    match record.get(key)? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64))
            .and_then(|year| i32::try_from(year).ok()),
        Value::String(text) => year_of(text),
        _ => None,
    }
}

/// The list of records in a payload: the payload itself when it is an array,
/// otherwise the first array found under one of `keys`.
pub fn records<'a>(payload: &'a Value, keys: &[&str]) -> &'a [Value] {
    if let Some(array) = payload.as_array() {
        return array;
    }
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn by_year(record: &Value) -> Option<i32> {
        year_field(record, "year")
    }

    fn by_date(record: &Value) -> Option<i32> {
        year_field(record, "date")
    }

    #[test]
    fn strategies_tried_in_order() {
        let strategies: &[Strategy<i32>] = &[by_year, by_date];
        let both = json!({"year": 2019, "date": "2001"});
        assert_eq!(first_of(&both, strategies), Some(2019));
        let date_only = json!({"date": "2020-03-01"});
        assert_eq!(first_of(&date_only, strategies), Some(2020));
        assert_eq!(first_of(&json!({"other": 1}), strategies), None);
    }

    #[test]
    fn numbers_from_strings() {
        let record = json!({"a": "1,500.5", "b": 3, "c": "n/a"});
        assert_eq!(number_field(&record, "a"), Some(1500.5));
        assert_eq!(number_field(&record, "b"), Some(3.0));
        assert_eq!(number_field(&record, "c"), None);
    }

    #[test]
    fn records_from_nested_or_flat() {
        let flat = json!([{"year": 1}]);
        let nested = json!({"meta": {}, "data": [{"year": 1}, {"year": 2}]});
        assert_eq!(records(&flat, &["data"]).len(), 1);
        assert_eq!(records(&nested, &["emissions", "data"]).len(), 2);
        assert!(records(&json!({"x": 1}), &["data"]).is_empty());
    }
}
